//! Contribution rewards: fixed 70/20/10 split and the reward pool ledger.
//!
//! | Share | Weight | Recipient |
//! |-------|--------|-----------|
//! | originators | 70 | signers of the block's transactions, split evenly |
//! | validator | 20 | block proposer |
//! | maintenance | 10 + rounding | `network_maintenance` account |

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::types::{Amount, Hash};

/// Data originators receive 70% of each distribution.
pub const ORIGINATOR_WEIGHT: u128 = 70;

/// The block proposer receives 20%.
pub const VALIDATOR_WEIGHT: u128 = 20;

pub const MAINTENANCE_WEIGHT: u128 = 10;

/// Total weight (must equal 100)
pub const TOTAL_WEIGHT: u128 = 100;

pub const MAINTENANCE_ACCOUNT: &str = "network_maintenance";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardSplit {
    pub originators: Amount,
    pub validator: Amount,
    pub maintenance: Amount,
}

impl RewardSplit {
    pub fn total(&self) -> Amount {
        self.originators + self.validator + self.maintenance
    }
}

/// `weight / 100` of `amount` without overflowing for any `u128`.
fn weighted(amount: Amount, weight: u128) -> Amount {
    (amount / TOTAL_WEIGHT) * weight + (amount % TOTAL_WEIGHT) * weight / TOTAL_WEIGHT
}

/// Split `total` 70/20/10. Maintenance takes the rounding remainder, so the
/// parts always sum to `total` exactly.
pub fn split_reward(total: Amount) -> RewardSplit {
    let originators = weighted(total, ORIGINATOR_WEIGHT);
    let validator = weighted(total, VALIDATOR_WEIGHT);
    RewardSplit {
        originators,
        validator,
        maintenance: total - originators - validator,
    }
}

/// Record of one block's payout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distribution {
    pub block_hash: Hash,
    pub amount: Amount,
    pub split: RewardSplit,
    pub originator_payouts: Vec<(String, Amount)>,
    pub validator: String,
    /// Maintenance share plus any originator rounding or unclaimed share.
    pub maintenance: Amount,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardPoolSnapshot {
    pub remaining: Amount,
    pub distributed_total: Amount,
    pub maintenance_balance: Amount,
    pub accounts: usize,
    pub last_distribution: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct RewardPool {
    remaining: Amount,
    block_reward: Amount,
    balances: HashMap<String, Amount>,
    distributed_total: Amount,
    last_distribution: Option<i64>,
}

impl RewardPool {
    pub fn new(initial_pool: Amount, block_reward: Amount) -> Self {
        Self {
            remaining: initial_pool,
            block_reward,
            balances: HashMap::new(),
            distributed_total: 0,
            last_distribution: None,
        }
    }

    /// Pay out one block: `min(block_reward, remaining) + fees`, split
    /// 70/20/10. Duplicate originators are counted once.
    pub fn distribute(
        &mut self,
        block_hash: Hash,
        originators: &[String],
        validator: &str,
        fees: Amount,
    ) -> Distribution {
        let emission = self.block_reward.min(self.remaining);
        self.remaining -= emission;
        let amount = emission.saturating_add(fees);
        let split = split_reward(amount);

        let distinct: BTreeSet<&String> = originators.iter().collect();
        let mut maintenance = split.maintenance;
        let mut originator_payouts = Vec::with_capacity(distinct.len());
        if distinct.is_empty() {
            maintenance += split.originators;
        } else {
            let n = distinct.len() as u128;
            let each = split.originators / n;
            maintenance += split.originators - each * n;
            for who in distinct {
                originator_payouts.push((who.clone(), each));
            }
        }

        for (who, amt) in &originator_payouts {
            self.credit(who, *amt);
        }
        self.credit(validator, split.validator);
        self.credit(MAINTENANCE_ACCOUNT, maintenance);

        let timestamp = chrono::Utc::now().timestamp();
        self.distributed_total = self.distributed_total.saturating_add(amount);
        self.last_distribution = Some(timestamp);

        Distribution {
            block_hash,
            amount,
            split,
            originator_payouts,
            validator: validator.to_string(),
            maintenance,
            timestamp,
        }
    }

    fn credit(&mut self, account: &str, amount: Amount) {
        if amount == 0 {
            return;
        }
        let bal = self.balances.entry(account.to_string()).or_insert(0);
        *bal = bal.saturating_add(amount);
    }

    pub fn balance(&self, account: &str) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn remaining(&self) -> Amount {
        self.remaining
    }

    pub fn snapshot(&self) -> RewardPoolSnapshot {
        RewardPoolSnapshot {
            remaining: self.remaining,
            distributed_total: self.distributed_total,
            maintenance_balance: self.balance(MAINTENANCE_ACCOUNT),
            accounts: self.balances.len(),
            last_distribution: self.last_distribution,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_sum_to_total() {
        assert_eq!(ORIGINATOR_WEIGHT + VALIDATOR_WEIGHT + MAINTENANCE_WEIGHT, TOTAL_WEIGHT);
    }

    #[test]
    fn split_exact_and_remainder() {
        let s = split_reward(1_000);
        assert_eq!((s.originators, s.validator, s.maintenance), (700, 200, 100));
        let s = split_reward(7);
        assert_eq!(s.total(), 7);
        assert_eq!((s.originators, s.validator, s.maintenance), (4, 1, 2));
        assert_eq!(split_reward(u128::MAX).total(), u128::MAX);
    }

    #[test]
    fn distribute_caps_emission_at_remaining() {
        let mut pool = RewardPool::new(500, 1_000);
        let d = pool.distribute(Hash::zero(), &["alice".into()], "val", 0);
        assert_eq!(d.amount, 500);
        assert_eq!(pool.remaining(), 0);
        let d = pool.distribute(Hash::zero(), &["alice".into()], "val", 10);
        assert_eq!(d.amount, 10);
    }

    #[test]
    fn originator_share_even_with_remainder_to_maintenance() {
        let mut pool = RewardPool::new(1_000_000, 1_000);
        let originators = vec!["a".to_string(), "b".to_string(), "c".to_string(), "a".to_string()];
        let d = pool.distribute(Hash::zero(), &originators, "val", 0);
        // 700 / 3 = 233 each, 1 left over
        assert_eq!(d.originator_payouts.len(), 3);
        assert!(d.originator_payouts.iter().all(|(_, amt)| *amt == 233));
        assert_eq!(d.maintenance, 101);
        assert_eq!(pool.balance("a"), 233);
        assert_eq!(pool.balance("val"), 200);
        assert_eq!(pool.balance(MAINTENANCE_ACCOUNT), 101);
    }

    #[test]
    fn no_originators_sends_share_to_maintenance() {
        let mut pool = RewardPool::new(1_000_000, 1_000);
        let d = pool.distribute(Hash::zero(), &[], "val", 0);
        assert!(d.originator_payouts.is_empty());
        assert_eq!(d.maintenance, 800);
        assert_eq!(pool.snapshot().maintenance_balance, 800);
        assert_eq!(pool.snapshot().distributed_total, 1_000);
    }
}
