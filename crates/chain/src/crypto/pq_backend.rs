use rand::RngCore;

use crate::error::{KernelError, Result};

/// Kyber768 public key size in bytes.
pub const KYBER768_PUBLIC_LEN: usize = 1184;
/// Kyber768 secret key size in bytes.
pub const KYBER768_SECRET_LEN: usize = 2400;

/// Opaque post-quantum key material. The kernel stores and hands out the
/// public half; it never interprets either blob.
#[derive(Clone)]
pub struct KemKeyPair {
    pub public: Vec<u8>,
    pub secret: Vec<u8>,
}

impl std::fmt::Debug for KemKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KemKeyPair")
            .field("public_len", &self.public.len())
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Source of post-quantum key blobs.
pub trait KemProvider: Send + Sync {
    fn generate(&self) -> Result<KemKeyPair>;
    fn name(&self) -> &'static str;
}

/// Produces Kyber768-sized blobs from the OS RNG. It fixes the exchange
/// format only; no KEM arithmetic happens here.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpaqueBlobKem;

impl KemProvider for OpaqueBlobKem {
    fn generate(&self) -> Result<KemKeyPair> {
        let mut rng = rand::rngs::OsRng;
        let mut public = vec![0u8; KYBER768_PUBLIC_LEN];
        let mut secret = vec![0u8; KYBER768_SECRET_LEN];
        rng.try_fill_bytes(&mut public)
            .and_then(|_| rng.try_fill_bytes(&mut secret))
            .map_err(|e| KernelError::CryptoInitialization(format!("kem blob: {}", e)))?;
        Ok(KemKeyPair { public, secret })
    }

    fn name(&self) -> &'static str {
        "kyber768-opaque"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_sizes_match_kyber768() {
        let kp = OpaqueBlobKem.generate().expect("kem");
        assert_eq!(kp.public.len(), KYBER768_PUBLIC_LEN);
        assert_eq!(kp.secret.len(), KYBER768_SECRET_LEN);
        let other = OpaqueBlobKem.generate().expect("kem");
        assert_ne!(kp.public, other.public);
    }
}
