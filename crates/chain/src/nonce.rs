use std::collections::HashMap;

use crate::error::{KernelError, Result};

/// Last accepted nonce per signer (hex public key).
///
/// A signer with no history must start at 0; afterwards only `last + 1` is
/// accepted. Replays (`<= last`) and gaps (`> last + 1`) are both rejected.
#[derive(Debug, Default, Clone)]
pub struct NonceTracker {
    last: HashMap<String, u64>,
}

impl NonceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The nonce the next transaction from `signer` must carry.
    pub fn expected(&self, signer: &str) -> u64 {
        match self.last.get(signer) {
            Some(n) => n.saturating_add(1),
            None => 0,
        }
    }

    /// Pure check, no mutation.
    pub fn check(&self, signer: &str, nonce: u64) -> Result<()> {
        let expected = self.expected(signer);
        // saturating expected at u64::MAX means the signer is exhausted
        let exhausted = self.last.get(signer) == Some(&u64::MAX);
        if nonce != expected || exhausted {
            return Err(KernelError::ReplayedOrOutOfOrderNonce {
                signer: signer.to_string(),
                expected,
                got: nonce,
            });
        }
        Ok(())
    }

    /// Record `nonce` as accepted. Callers run `check` first.
    pub fn advance(&mut self, signer: &str, nonce: u64) {
        self.last.insert(signer.to_string(), nonce);
    }

    pub fn last(&self, signer: &str) -> Option<u64> {
        self.last.get(signer).copied()
    }

    pub fn signers(&self) -> usize {
        self.last.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_nonce_is_zero() {
        let t = NonceTracker::new();
        assert!(t.check("a", 0).is_ok());
        assert!(t.check("a", 1).is_err());
        assert_eq!(t.last("a"), None);
    }

    #[test]
    fn replay_and_gap_rejected() {
        let mut t = NonceTracker::new();
        t.advance("a", 0);
        t.advance("a", 1);
        assert_eq!(
            t.check("a", 1),
            Err(KernelError::ReplayedOrOutOfOrderNonce { signer: "a".into(), expected: 2, got: 1 })
        );
        assert!(t.check("a", 3).is_err());
        assert!(t.check("a", 2).is_ok());
        // other signers are independent
        assert!(t.check("b", 0).is_ok());
    }

    #[test]
    fn max_nonce_exhausts_signer() {
        let mut t = NonceTracker::new();
        t.advance("a", u64::MAX);
        assert!(t.check("a", u64::MAX).is_err());
    }
}
