use rand::RngCore;
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey};

use crate::error::{KernelError, Result};

/// Length of each ECDSA scalar (`r`, `s`) on the wire.
pub const SCALAR_LEN: usize = 32;
/// SEC1 compressed public key length.
pub const PUBLIC_KEY_LEN: usize = 33;

/// secp256k1 ECDSA over 32-byte digests.
pub struct EcdsaBackend;

impl EcdsaBackend {
    /// Fresh key pair from the OS RNG. Out-of-range scalars are redrawn.
    pub fn generate_keypair() -> Result<(SecretKey, Vec<u8>)> {
        let secp = Secp256k1::signing_only();
        let mut rng = rand::rngs::OsRng;
        for _ in 0..16 {
            let mut raw = [0u8; 32];
            rng.try_fill_bytes(&mut raw)
                .map_err(|e| KernelError::CryptoInitialization(format!("os rng: {}", e)))?;
            if let Ok(secret) = SecretKey::from_slice(&raw) {
                let public = PublicKey::from_secret_key(&secp, &secret);
                return Ok((secret, public.serialize().to_vec()));
            }
        }
        Err(KernelError::CryptoInitialization(
            "could not draw a valid secp256k1 scalar".to_string(),
        ))
    }

    /// Sign a digest; returns big-endian `(r, s)`.
    pub fn sign_digest(secret: &SecretKey, digest: &[u8; 32]) -> (Vec<u8>, Vec<u8>) {
        let secp = Secp256k1::signing_only();
        let msg = Message::from_digest(*digest);
        let compact = secp.sign_ecdsa(&msg, secret).serialize_compact();
        (compact[..SCALAR_LEN].to_vec(), compact[SCALAR_LEN..].to_vec())
    }

    /// Fails closed on any malformed component.
    pub fn verify_digest(public_key: &[u8], digest: &[u8; 32], r: &[u8], s: &[u8]) -> bool {
        if r.len() != SCALAR_LEN || s.len() != SCALAR_LEN {
            return false;
        }
        let pk = match PublicKey::from_slice(public_key) {
            Ok(pk) => pk,
            Err(_) => return false,
        };
        let mut compact = [0u8; 2 * SCALAR_LEN];
        compact[..SCALAR_LEN].copy_from_slice(r);
        compact[SCALAR_LEN..].copy_from_slice(s);
        let sig = match Signature::from_compact(&compact) {
            Ok(sig) => sig,
            Err(_) => return false,
        };
        let secp = Secp256k1::verification_only();
        secp.verify_ecdsa(&Message::from_digest(*digest), &sig, &pk).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_digest() {
        let (sk, pk) = EcdsaBackend::generate_keypair().expect("keypair");
        assert_eq!(pk.len(), PUBLIC_KEY_LEN);
        let digest = [7u8; 32];
        let (r, s) = EcdsaBackend::sign_digest(&sk, &digest);
        assert_eq!(r.len(), SCALAR_LEN);
        assert_eq!(s.len(), SCALAR_LEN);
        assert!(EcdsaBackend::verify_digest(&pk, &digest, &r, &s));
        assert!(!EcdsaBackend::verify_digest(&pk, &[8u8; 32], &r, &s));
    }

    #[test]
    fn short_scalars_fail_closed() {
        let (sk, pk) = EcdsaBackend::generate_keypair().expect("keypair");
        let digest = [1u8; 32];
        let (r, s) = EcdsaBackend::sign_digest(&sk, &digest);
        assert!(!EcdsaBackend::verify_digest(&pk, &digest, &r[1..], &s));
        assert!(!EcdsaBackend::verify_digest(&pk, &digest, &r, &[]));
        assert!(!EcdsaBackend::verify_digest(&pk[1..], &digest, &r, &s));
    }
}
