//! # Cryptographic Foundation
//!
//! Hashing helpers plus the key store used to sign and verify transactions.
//!
//! ```text
//!   key_id ──► KeyEntry { secp256k1 secret, compressed public, KEM blob,
//!                         version, retired public keys }
//! ```
//!
//! Private key bytes never leave this module. Verification always uses the
//! public key embedded in the signature, so rotating a key never invalidates
//! signatures produced before the rotation.
use parking_lot::RwLock;
use sha3::{Digest, Sha3_256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{KernelError, Result};
use crate::tx::{Transaction, TxSignature};
use crate::types::Hash;

#[path = "crypto/ecdsa_backend.rs"]
mod ecdsa_backend;
#[path = "crypto/pq_backend.rs"]
mod pq_backend;

pub use ecdsa_backend::{EcdsaBackend, PUBLIC_KEY_LEN, SCALAR_LEN};
pub use pq_backend::{KemKeyPair, KemProvider, OpaqueBlobKem, KYBER768_PUBLIC_LEN, KYBER768_SECRET_LEN};

/// Key id the kernel itself signs with.
pub const KERNEL_KEY_ID: &str = "kernel";

// ════════════════════════════════════════════════════════════════════════════
// HASHING
// ════════════════════════════════════════════════════════════════════════════

/// SHA3-256 of `data`.
pub fn sha3_256(data: &[u8]) -> Hash {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    Hash::from_bytes(hasher.finalize().into())
}

/// SHA3-256 over the concatenation of `parts`.
pub fn sha3_256_concat(parts: &[&[u8]]) -> Hash {
    let mut hasher = Sha3_256::new();
    for p in parts {
        hasher.update(p);
    }
    Hash::from_bytes(hasher.finalize().into())
}

// ════════════════════════════════════════════════════════════════════════════
// KEY STORE
// ════════════════════════════════════════════════════════════════════════════

struct KeyEntry {
    secret: secp256k1::SecretKey,
    public: Vec<u8>,
    kem: KemKeyPair,
    version: u32,
    retired: Vec<Vec<u8>>,
}

pub struct CryptoFoundation {
    keys: RwLock<HashMap<String, KeyEntry>>,
    kem: Arc<dyn KemProvider>,
}

impl std::fmt::Debug for CryptoFoundation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoFoundation")
            .field("keys", &self.keys.read().len())
            .field("kem", &self.kem.name())
            .finish()
    }
}

impl CryptoFoundation {
    /// Build the foundation and create the kernel signing key. Any failure
    /// here is `CryptoInitialization` and must abort startup.
    pub fn initialize(kem: Arc<dyn KemProvider>) -> Result<Self> {
        let foundation = Self {
            keys: RwLock::new(HashMap::new()),
            kem,
        };
        foundation
            .register_key(KERNEL_KEY_ID)
            .map_err(|e| KernelError::CryptoInitialization(e.to_string()))?;
        info!(kem = foundation.kem.name(), "crypto foundation initialized");
        Ok(foundation)
    }

    fn new_entry(&self, version: u32, retired: Vec<Vec<u8>>) -> Result<KeyEntry> {
        let (secret, public) = EcdsaBackend::generate_keypair()?;
        let kem = self.kem.generate()?;
        Ok(KeyEntry { secret, public, kem, version, retired })
    }

    /// Create a key pair for `key_id` and return its compressed public key.
    /// Registering an existing id returns the current public key unchanged.
    pub fn register_key(&self, key_id: &str) -> Result<Vec<u8>> {
        if let Some(existing) = self.keys.read().get(key_id) {
            return Ok(existing.public.clone());
        }
        let entry = self.new_entry(1, Vec::new())?;
        let public = entry.public.clone();
        let mut keys = self.keys.write();
        let stored = keys.entry(key_id.to_string()).or_insert(entry);
        debug!(key_id, "registered signing key");
        Ok(stored.public.clone())
    }

    /// Sign a 32-byte payload hash with the active key of `key_id`.
    pub fn sign(&self, payload_hash: &Hash, key_id: &str) -> Result<TxSignature> {
        let keys = self.keys.read();
        let entry = keys
            .get(key_id)
            .ok_or_else(|| KernelError::KeyNotFound(key_id.to_string()))?;
        let (r, s) = EcdsaBackend::sign_digest(&entry.secret, payload_hash.as_bytes());
        Ok(TxSignature { r, s, public_key: entry.public.clone() })
    }

    /// Refresh the content hash and attach a signature over it.
    pub fn sign_transaction(&self, tx: &mut Transaction, key_id: &str) -> Result<()> {
        tx.hash = tx.compute_hash();
        tx.signature = Some(self.sign(&tx.hash, key_id)?);
        Ok(())
    }

    /// See [`verify_transaction`].
    pub fn verify(&self, tx: &Transaction) -> bool {
        verify_transaction(tx)
    }

    /// Rotate every registered key.
    pub fn rotate_keys(&self) -> Result<()> {
        let ids: Vec<String> = self.keys.read().keys().cloned().collect();
        for id in ids {
            self.rotate_key(&id)?;
        }
        Ok(())
    }

    /// Replace the active key of `key_id`. The old public key is moved into
    /// history; the swap happens under one write lock.
    pub fn rotate_key(&self, key_id: &str) -> Result<Vec<u8>> {
        if !self.keys.read().contains_key(key_id) {
            return Err(KernelError::KeyNotFound(key_id.to_string()));
        }
        let mut fresh = self.new_entry(0, Vec::new())?;

        let mut keys = self.keys.write();
        let entry = keys
            .get_mut(key_id)
            .ok_or_else(|| KernelError::KeyNotFound(key_id.to_string()))?;
        fresh.retired = std::mem::take(&mut entry.retired);
        fresh.retired.push(entry.public.clone());
        fresh.version = entry.version + 1;
        let public = fresh.public.clone();
        *entry = fresh;
        info!(key_id, version = entry.version, "rotated signing key");
        Ok(public)
    }

    pub fn public_key(&self, key_id: &str) -> Result<Vec<u8>> {
        self.keys
            .read()
            .get(key_id)
            .map(|e| e.public.clone())
            .ok_or_else(|| KernelError::KeyNotFound(key_id.to_string()))
    }

    pub fn kem_public_blob(&self, key_id: &str) -> Result<Vec<u8>> {
        self.keys
            .read()
            .get(key_id)
            .map(|e| e.kem.public.clone())
            .ok_or_else(|| KernelError::KeyNotFound(key_id.to_string()))
    }

    /// 1 for a freshly registered key, +1 per rotation.
    pub fn key_version(&self, key_id: &str) -> Result<u32> {
        self.keys
            .read()
            .get(key_id)
            .map(|e| e.version)
            .ok_or_else(|| KernelError::KeyNotFound(key_id.to_string()))
    }

    pub fn retired_public_keys(&self, key_id: &str) -> Result<Vec<Vec<u8>>> {
        self.keys
            .read()
            .get(key_id)
            .map(|e| e.retired.clone())
            .ok_or_else(|| KernelError::KeyNotFound(key_id.to_string()))
    }
}

/// Fails closed: false when the signature is missing or malformed, the
/// stored hash no longer matches the content, or ECDSA verification fails.
pub fn verify_transaction(tx: &Transaction) -> bool {
    let sig = match &tx.signature {
        Some(sig) => sig,
        None => return false,
    };
    if sig.r.len() != SCALAR_LEN || sig.s.len() != SCALAR_LEN {
        return false;
    }
    if tx.compute_hash() != tx.hash {
        return false;
    }
    EcdsaBackend::verify_digest(&sig.public_key, tx.hash.as_bytes(), &sig.r, &sig.s)
}
