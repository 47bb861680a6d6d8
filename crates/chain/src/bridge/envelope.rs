//! Wire envelopes exchanged with execution workers (JSON).
use serde::{Deserialize, Serialize};

use crate::error::{KernelError, Result};
use crate::tx::Transaction;
use crate::types::Hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Run the transaction's command and report the result.
    Execute,
    /// Dry run; no state is expected to change on the worker.
    Simulate,
}

/// Kernel → worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    #[serde(rename = "type")]
    pub kind: CommandKind,
    pub transaction: Transaction,
    /// Unique per bridge; with the worker id it forms the correlation key.
    pub timestamp: u64,
}

/// Worker → kernel.
///
/// `success = false` requires a non-empty `error` and no `result`;
/// `success = true` must not carry an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(alias = "node_id")]
    pub worker_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: u64,
}

impl ResponseEnvelope {
    pub fn success(worker_id: impl Into<String>, timestamp: u64, result: serde_json::Value) -> Self {
        Self { worker_id: worker_id.into(), success: true, result: Some(result), error: None, timestamp }
    }

    pub fn failure(worker_id: impl Into<String>, timestamp: u64, error: impl Into<String>) -> Self {
        Self { worker_id: worker_id.into(), success: false, result: None, error: Some(error.into()), timestamp }
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_id.is_empty() {
            return Err(KernelError::InvalidEnvelope("empty worker_id".to_string()));
        }
        let has_error = self.error.as_deref().is_some_and(|e| !e.is_empty());
        if self.success {
            if has_error {
                return Err(KernelError::InvalidEnvelope("successful response carries an error".to_string()));
            }
        } else {
            if !has_error {
                return Err(KernelError::InvalidEnvelope("failed response without error".to_string()));
            }
            if self.result.is_some() {
                return Err(KernelError::InvalidEnvelope("failed response carries a result".to_string()));
            }
        }
        Ok(())
    }

    pub fn key(&self) -> CorrelationKey {
        CorrelationKey { worker_id: self.worker_id.clone(), timestamp: self.timestamp }
    }

    /// Parse and validate in one step.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let env: ResponseEnvelope =
            serde_json::from_slice(bytes).map_err(|e| KernelError::InvalidEnvelope(e.to_string()))?;
        env.validate()?;
        Ok(env)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CorrelationKey {
    pub worker_id: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum ExecutionStatus {
    Succeeded(serde_json::Value),
    Failed(String),
    TimedOut,
    /// No worker ever received the command.
    Undelivered(String),
}

/// Final result of one dispatched request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub key: CorrelationKey,
    pub tx_hash: Hash,
    pub status: ExecutionStatus,
    pub latency_ms: u64,
}

impl ExecutionOutcome {
    /// Outcome for a command that never reached a worker. The key is empty
    /// because no correlation key was ever assigned.
    pub fn undelivered(tx_hash: Hash, reason: impl Into<String>) -> Self {
        Self {
            key: CorrelationKey { worker_id: String::new(), timestamp: 0 },
            tx_hash,
            status: ExecutionStatus::Undelivered(reason.into()),
            latency_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, ExecutionStatus::Succeeded(_))
    }

    /// `WorkerTimeout` for timed-out requests, `None` otherwise.
    pub fn timeout_error(&self) -> Option<KernelError> {
        match self.status {
            ExecutionStatus::TimedOut => Some(KernelError::WorkerTimeout {
                worker_id: self.key.worker_id.clone(),
                timestamp: self.key.timestamp,
            }),
            _ => None,
        }
    }
}
