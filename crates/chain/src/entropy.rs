//! # Entropy Source
//!
//! Contract for the sampling unit the contribution gate draws from. The
//! kernel only relies on the interface: 32 bytes per sample, a measured
//! duration and a resource figure, plus a health check. Three sources ship
//! with the crate:
//!
//! | Source | Backing | Use |
//! |--------|---------|-----|
//! | `OsEntropySource` | OS RNG | production |
//! | `SeededEntropySource` | ChaCha20, fixed seed | tests and simulation |
//! | `ConstantEntropySource` | a repeated byte | degenerate-source drills |
use parking_lot::Mutex;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::error::{KernelError, Result};
use crate::types::now_ms;

pub const SAMPLE_LEN: usize = 32;

/// One draw from an entropy source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntropySample {
    pub bytes: [u8; SAMPLE_LEN],
    pub timestamp_ms: u64,
    /// Wall time the draw took, in microseconds.
    pub duration_us: u64,
    /// Abstract resource units spent on the draw.
    pub resource_usage: f64,
}

impl EntropySample {
    /// Shannon entropy of the byte histogram, normalized to `[0, 1]` by the
    /// maximum reachable for this sample length.
    pub fn normalized_entropy(&self) -> f64 {
        normalized_shannon(&self.bytes)
    }
}

pub fn normalized_shannon(bytes: &[u8]) -> f64 {
    if bytes.len() < 2 {
        return 0.0;
    }
    let mut counts = [0u32; 256];
    for b in bytes {
        counts[*b as usize] += 1;
    }
    let n = bytes.len() as f64;
    let h: f64 = counts
        .iter()
        .filter(|c| **c > 0)
        .map(|c| {
            let p = *c as f64 / n;
            -p * p.log2()
        })
        .sum();
    let max = (bytes.len().min(256) as f64).log2();
    (h / max).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum SourceHealth {
    Healthy,
    Degraded(String),
    Failed(String),
}

pub trait EntropySource: Send + Sync {
    fn sample(&self) -> Result<EntropySample>;
    fn health(&self) -> SourceHealth;
    fn name(&self) -> &'static str;
}

fn timed_sample<F>(fill: F) -> Result<EntropySample>
where
    F: FnOnce(&mut [u8; SAMPLE_LEN]) -> Result<()>,
{
    let started = Instant::now();
    let mut bytes = [0u8; SAMPLE_LEN];
    fill(&mut bytes)?;
    let duration_us = started.elapsed().as_micros() as u64;
    Ok(EntropySample {
        bytes,
        timestamp_ms: now_ms(),
        duration_us,
        resource_usage: 1.0 + duration_us as f64 / 1_000.0,
    })
}

// ════════════════════════════════════════════════════════════════════════════
// OS
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
pub struct OsEntropySource {
    draws: AtomicU64,
    failures: AtomicU64,
}

impl OsEntropySource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EntropySource for OsEntropySource {
    fn sample(&self) -> Result<EntropySample> {
        self.draws.fetch_add(1, Ordering::Relaxed);
        timed_sample(|buf| {
            rand::rngs::OsRng.try_fill_bytes(buf).map_err(|e| {
                self.failures.fetch_add(1, Ordering::Relaxed);
                KernelError::EntropyUnavailable(e.to_string())
            })
        })
    }

    fn health(&self) -> SourceHealth {
        let draws = self.draws.load(Ordering::Relaxed);
        let failures = self.failures.load(Ordering::Relaxed);
        match failures {
            0 => SourceHealth::Healthy,
            f if f >= draws => SourceHealth::Failed(format!("{} of {} draws failed", f, draws)),
            f => SourceHealth::Degraded(format!("{} of {} draws failed", f, draws)),
        }
    }

    fn name(&self) -> &'static str {
        "os"
    }
}

// ════════════════════════════════════════════════════════════════════════════
// SEEDED
// ════════════════════════════════════════════════════════════════════════════

/// Deterministic stream: two sources with the same seed yield the same bytes.
pub struct SeededEntropySource {
    rng: Mutex<ChaCha20Rng>,
}

impl SeededEntropySource {
    pub fn new(seed: u64) -> Self {
        Self { rng: Mutex::new(ChaCha20Rng::seed_from_u64(seed)) }
    }
}

impl EntropySource for SeededEntropySource {
    fn sample(&self) -> Result<EntropySample> {
        timed_sample(|buf| {
            self.rng.lock().fill_bytes(buf);
            Ok(())
        })
    }

    fn health(&self) -> SourceHealth {
        SourceHealth::Healthy
    }

    fn name(&self) -> &'static str {
        "seeded-chacha20"
    }
}

// ════════════════════════════════════════════════════════════════════════════
// CONSTANT
// ════════════════════════════════════════════════════════════════════════════

/// Emits the same byte forever. Always reported as degraded.
#[derive(Debug, Clone, Copy)]
pub struct ConstantEntropySource(pub u8);

impl EntropySource for ConstantEntropySource {
    fn sample(&self) -> Result<EntropySample> {
        let byte = self.0;
        timed_sample(|buf| {
            buf.fill(byte);
            Ok(())
        })
    }

    fn health(&self) -> SourceHealth {
        SourceHealth::Degraded("constant output".to_string())
    }

    fn name(&self) -> &'static str {
        "constant"
    }
}
