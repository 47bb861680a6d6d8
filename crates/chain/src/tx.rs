//! transaction model, content hashing and a small builder for clients
use serde::{Serialize, Deserialize};
use std::collections::BTreeMap;

use crate::crypto::sha3_256;
use crate::types::{hex_bytes, Amount, Hash};

/// Reference to a prior transaction output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxInput {
    pub previous_tx_hash: Hash,
    pub output_index: u32,
    #[serde(default)]
    pub unlock_script: String,
}

/// New ownership or data assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxOutput {
    pub address: String,
    pub amount: Amount,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub lock_script: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyLevel {
    #[default]
    Public,
    Private,
    Confidential,
}

/// The computation a transaction asks an execution worker to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub module_hash: String,
    pub function_name: String,
    /// Ordered call parameters.
    #[serde(default)]
    pub parameters: Vec<serde_json::Value>,
    pub gas_limit: u64,
    /// Storage keys the call declares it will touch (key -> access mode).
    #[serde(default)]
    pub storage_access: BTreeMap<String, String>,
    #[serde(default)]
    pub privacy: PrivacyLevel,
}

impl Command {
    pub fn call(module_hash: impl Into<String>, function_name: impl Into<String>, gas_limit: u64) -> Self {
        Self {
            module_hash: module_hash.into(),
            function_name: function_name.into(),
            parameters: Vec::new(),
            gas_limit,
            storage_access: BTreeMap::new(),
            privacy: PrivacyLevel::Public,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxMetadata {
    /// Unix seconds at creation.
    pub timestamp: i64,
    pub gas_price: u64,
    /// 0 (lowest) ..= 255 (highest)
    pub priority: u8,
    pub version: u8,
}

/// ECDSA (secp256k1) proof bound to one transaction hash.
///
/// `r` and `s` are 32-byte big-endian scalars; anything else fails
/// verification. `public_key` is the SEC1 compressed signer key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxSignature {
    #[serde(with = "hex_bytes")]
    pub r: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub s: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub public_key: Vec<u8>,
}

impl TxSignature {
    /// Hex of the embedded public key; this is the signer identity used by
    /// nonce tracking and reward accounting.
    pub fn signer_id(&self) -> String {
        hex::encode(&self.public_key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub command: Command,
    pub metadata: TxMetadata,
    pub signature: Option<TxSignature>,
    pub nonce: u64,
    pub hash: Hash,
}

/// Everything except the signature and the hash itself.
#[derive(Serialize)]
struct HashMaterial<'a> {
    inputs: &'a [TxInput],
    outputs: &'a [TxOutput],
    command: &'a Command,
    metadata: &'a TxMetadata,
    nonce: u64,
}

impl Transaction {
    /// Build and seal (hash) an unsigned transaction.
    pub fn new(
        inputs: Vec<TxInput>,
        outputs: Vec<TxOutput>,
        command: Command,
        metadata: TxMetadata,
        nonce: u64,
    ) -> Self {
        let mut tx = Transaction {
            inputs,
            outputs,
            command,
            metadata,
            signature: None,
            nonce,
            hash: Hash::zero(),
        };
        tx.seal();
        tx
    }

    pub fn builder(command: Command) -> TxBuilder {
        TxBuilder::new(command)
    }

    /// Canonical bytes the content hash commits to.
    pub fn hash_material(&self) -> Vec<u8> {
        let material = HashMaterial {
            inputs: &self.inputs,
            outputs: &self.outputs,
            command: &self.command,
            metadata: &self.metadata,
            nonce: self.nonce,
        };
        // string-keyed maps and plain values only; JSON encoding cannot fail
        serde_json::to_vec(&material).expect("transaction hash material encodes to JSON")
    }

    pub fn compute_hash(&self) -> Hash {
        sha3_256(&self.hash_material())
    }

    /// Recompute the content hash. Any existing signature is dropped since
    /// it was bound to the previous hash.
    pub fn seal(&mut self) {
        self.hash = self.compute_hash();
        self.signature = None;
    }

    pub fn is_sealed(&self) -> bool {
        self.hash == self.compute_hash()
    }

    /// `gas_price * gas_limit`, widened so it cannot overflow.
    pub fn fee(&self) -> u128 {
        self.metadata.gas_price as u128 * self.command.gas_limit as u128
    }

    pub fn gas_limit(&self) -> u64 {
        self.command.gas_limit
    }

    pub fn signer(&self) -> Option<String> {
        self.signature.as_ref().map(|s| s.signer_id())
    }

    /// Whether the command has to be executed by an external worker.
    pub fn requires_execution(&self) -> bool {
        !self.command.function_name.is_empty()
    }
}

/// Client-side builder; `build()` returns a sealed, unsigned transaction.
#[derive(Debug, Clone)]
pub struct TxBuilder {
    inputs: Vec<TxInput>,
    outputs: Vec<TxOutput>,
    command: Command,
    metadata: TxMetadata,
    nonce: u64,
}

impl TxBuilder {
    pub fn new(command: Command) -> Self {
        Self {
            inputs: Vec::new(),
            outputs: Vec::new(),
            command,
            metadata: TxMetadata {
                timestamp: chrono::Utc::now().timestamp(),
                gas_price: 1,
                priority: 0,
                version: 1,
            },
            nonce: 0,
        }
    }

    pub fn nonce(mut self, nonce: u64) -> Self {
        self.nonce = nonce;
        self
    }

    pub fn gas_price(mut self, gas_price: u64) -> Self {
        self.metadata.gas_price = gas_price;
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.metadata.priority = priority;
        self
    }

    pub fn timestamp(mut self, timestamp: i64) -> Self {
        self.metadata.timestamp = timestamp;
        self
    }

    pub fn param(mut self, value: serde_json::Value) -> Self {
        self.command.parameters.push(value);
        self
    }

    pub fn input(mut self, input: TxInput) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn output(mut self, address: impl Into<String>, amount: Amount, data: impl Into<String>) -> Self {
        self.outputs.push(TxOutput {
            address: address.into(),
            amount,
            data: data.into(),
            lock_script: String::new(),
        });
        self
    }

    pub fn build(self) -> Transaction {
        Transaction::new(self.inputs, self.outputs, self.command, self.metadata, self.nonce)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Transaction {
        Transaction::builder(Command::call("mod-a", "run", 100))
            .nonce(3)
            .gas_price(20)
            .timestamp(1_700_000_000)
            .param(serde_json::json!({"k": 1}))
            .output("addr-1", 5, "memo")
            .build()
    }

    #[test]
    fn hash_is_pure_function_of_fields() {
        let a = sample();
        let b = sample();
        assert_eq!(a.hash, b.hash);
        assert!(a.is_sealed());
    }

    #[test]
    fn hash_material_is_json_of_content() {
        let tx = sample();
        let material = tx.hash_material();
        let v: serde_json::Value = serde_json::from_slice(&material).expect("material is JSON");
        assert_eq!(v["nonce"], 3);
        assert_eq!(v["command"]["parameters"][0]["k"], 1);
        assert_ne!(tx.hash, sha3_256(b""));
    }

    #[test]
    fn any_field_change_breaks_seal() {
        let mut tx = sample();
        tx.nonce += 1;
        assert!(!tx.is_sealed());

        let mut tx = sample();
        tx.command.parameters.push(serde_json::json!(7));
        assert!(!tx.is_sealed());

        let mut tx = sample();
        tx.metadata.priority = 9;
        assert!(!tx.is_sealed());

        let mut tx = sample();
        tx.outputs[0].amount = 6;
        assert!(!tx.is_sealed());
    }

    #[test]
    fn signature_is_not_part_of_hash() {
        let mut tx = sample();
        let before = tx.compute_hash();
        tx.signature = Some(TxSignature { r: vec![1; 32], s: vec![2; 32], public_key: vec![3; 33] });
        assert_eq!(before, tx.compute_hash());
    }

    #[test]
    fn seal_drops_stale_signature() {
        let mut tx = sample();
        tx.signature = Some(TxSignature { r: vec![1; 32], s: vec![2; 32], public_key: vec![3; 33] });
        tx.nonce = 4;
        tx.seal();
        assert!(tx.signature.is_none());
        assert!(tx.is_sealed());
    }

    #[test]
    fn fee_does_not_overflow() {
        let tx = Transaction::builder(Command::call("m", "f", u64::MAX))
            .gas_price(u64::MAX)
            .build();
        assert_eq!(tx.fee(), u64::MAX as u128 * u64::MAX as u128);
    }

    #[test]
    fn json_roundtrip_keeps_hash_valid() {
        let tx = sample();
        let json = serde_json::to_string(&tx).expect("serialize");
        let back: Transaction = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, tx);
        assert!(back.is_sealed());
    }
}
