//! Reward split and pool accounting.

use proptest::prelude::*;

use aether_chain::crypto::sha3_256;
use aether_chain::tokenomics::{split_reward, RewardPool, MAINTENANCE_ACCOUNT};

proptest! {
    #[test]
    fn prop_split_is_exact_and_ordered(total in any::<u128>()) {
        let split = split_reward(total);
        prop_assert_eq!(split.total(), total);
        prop_assert!(split.originators >= split.validator);
    }

    #[test]
    fn prop_small_amounts_match_percentages(total in 0u128..10_000_000) {
        let split = split_reward(total);
        prop_assert_eq!(split.originators, total * 70 / 100);
        prop_assert_eq!(split.validator, total * 20 / 100);
    }

    #[test]
    fn prop_distribution_conserves_value(
        block_reward in 0u64..1_000_000,
        fees in 0u128..1_000_000,
        originators in proptest::collection::vec("[a-d]", 0..6),
    ) {
        let mut pool = RewardPool::new(10_000_000, block_reward as u128);
        let d = pool.distribute(sha3_256(b"block"), &originators, "validator", fees);

        let paid: u128 = d.originator_payouts.iter().map(|(_, a)| *a).sum::<u128>()
            + d.split.validator
            + d.maintenance;
        prop_assert_eq!(paid, d.amount);
        prop_assert_eq!(d.amount, block_reward as u128 + fees);
        prop_assert_eq!(pool.remaining(), 10_000_000 - block_reward as u128);

        let credited: u128 = d.originator_payouts.iter().map(|(who, _)| pool.balance(who)).sum::<u128>()
            + pool.balance("validator")
            + pool.balance(MAINTENANCE_ACCOUNT);
        prop_assert_eq!(credited, d.amount);
    }
}

#[test]
fn duplicate_originators_are_paid_once() {
    let mut pool = RewardPool::new(1_000_000, 1_000);
    let signers = vec!["alice".to_string(), "alice".to_string(), "bob".to_string()];
    let d = pool.distribute(sha3_256(b"b1"), &signers, "proposer", 0);

    assert_eq!(d.originator_payouts.len(), 2);
    assert_eq!(pool.balance("alice"), 350);
    assert_eq!(pool.balance("bob"), 350);
    assert_eq!(pool.balance("proposer"), 200);
    assert_eq!(pool.balance(MAINTENANCE_ACCOUNT), 100);
}

#[test]
fn exhausted_pool_still_pays_fees() {
    let mut pool = RewardPool::new(1_500, 1_000);
    pool.distribute(sha3_256(b"b1"), &[], "p", 0);
    let d = pool.distribute(sha3_256(b"b2"), &[], "p", 0);
    assert_eq!(d.amount, 500);
    assert_eq!(pool.remaining(), 0);

    let d = pool.distribute(sha3_256(b"b3"), &["alice".to_string()], "p", 100);
    assert_eq!(d.amount, 100);
    assert_eq!(pool.balance("alice"), 70);
    assert_eq!(pool.snapshot().distributed_total, 1_600);
}
