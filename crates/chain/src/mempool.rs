use std::collections::{BTreeMap, HashMap};

use crate::error::{KernelError, Result};
use crate::tx::Transaction;
use crate::types::{now_ms, Hash};

#[derive(Debug, Clone)]
struct Entry {
    seq: u64,
    admitted_at_ms: u64,
    tx: Transaction,
}

/// Pending transactions keyed by hash, ordered by admission sequence.
///
/// Not internally synchronized: the admission pipeline owns it behind the
/// same lock as the nonce tracker.
#[derive(Debug, Clone)]
pub struct Mempool {
    entries: HashMap<Hash, Entry>,
    order: BTreeMap<u64, Hash>,
    next_seq: u64,
    capacity: usize,
}

impl Mempool {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_seq: 0,
            capacity,
        }
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Insert with the next admission sequence number.
    pub fn insert(&mut self, tx: Transaction) -> Result<u64> {
        if self.entries.contains_key(&tx.hash) {
            return Err(KernelError::DuplicateTransaction(tx.hash));
        }
        if self.is_full() {
            return Err(KernelError::PoolFull(format!("mempool at capacity {}", self.capacity)));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, tx.hash);
        self.entries.insert(tx.hash, Entry { seq, admitted_at_ms: now_ms(), tx });
        Ok(seq)
    }

    pub fn remove(&mut self, hash: &Hash) -> Option<Transaction> {
        let entry = self.entries.remove(hash)?;
        self.order.remove(&entry.seq);
        Some(entry.tx)
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash) -> Option<&Transaction> {
        self.entries.get(hash).map(|e| &e.tx)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Oldest-first selection. Stops at the first transaction that would
    /// push the total gas past `max_gas`; nothing is removed.
    pub fn select(&self, max_txs: usize, max_gas: u64) -> Vec<Transaction> {
        let mut out = Vec::new();
        let mut gas: u64 = 0;
        for hash in self.order.values() {
            if out.len() >= max_txs {
                break;
            }
            let Some(entry) = self.entries.get(hash) else { continue };
            let next = match gas.checked_add(entry.tx.gas_limit()) {
                Some(g) if g <= max_gas => g,
                _ => break,
            };
            gas = next;
            out.push(entry.tx.clone());
        }
        out
    }

    /// Pending transactions admitted with a sequence number in `from..to`,
    /// in admission order.
    pub fn admitted_between(&self, from: u64, to: u64) -> Vec<(u64, Transaction)> {
        if from >= to {
            return Vec::new();
        }
        self.order
            .range(from..to)
            .filter_map(|(seq, h)| self.entries.get(h).map(|e| (*seq, e.tx.clone())))
            .collect()
    }

    /// Admission time of the oldest pending transaction.
    pub fn oldest_admitted_ms(&self) -> Option<u64> {
        self.order
            .values()
            .next()
            .and_then(|h| self.entries.get(h))
            .map(|e| e.admitted_at_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::Command;

    fn tx(nonce: u64, gas: u64) -> Transaction {
        Transaction::builder(Command::call("m", "f", gas)).nonce(nonce).timestamp(1).build()
    }

    #[test]
    fn duplicate_and_capacity() {
        let mut m = Mempool::new(2);
        let a = tx(0, 10);
        m.insert(a.clone()).expect("insert");
        assert_eq!(m.insert(a.clone()), Err(KernelError::DuplicateTransaction(a.hash)));
        m.insert(tx(1, 10)).expect("insert");
        assert!(matches!(m.insert(tx(2, 10)), Err(KernelError::PoolFull(_))));
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn select_oldest_first_with_gas_stop() {
        let mut m = Mempool::new(10);
        let txs: Vec<_> = [(0, 40), (1, 40), (2, 10), (3, 5)].iter().map(|(n, g)| tx(*n, *g)).collect();
        for t in &txs {
            m.insert(t.clone()).expect("insert");
        }
        let picked = m.select(10, 90);
        // third tx fits (90) but the fourth would exceed; order preserved
        assert_eq!(picked.iter().map(|t| t.nonce).collect::<Vec<_>>(), vec![0, 1, 2]);
        let picked = m.select(10, 50);
        assert_eq!(picked.iter().map(|t| t.nonce).collect::<Vec<_>>(), vec![0]);
        assert_eq!(m.select(2, u64::MAX).len(), 2);
        assert_eq!(m.len(), 4);
    }

    #[test]
    fn admitted_between_skips_removed_entries() {
        let mut m = Mempool::new(10);
        let txs: Vec<_> = (0..4).map(|n| tx(n, 1)).collect();
        for t in &txs {
            m.insert(t.clone()).expect("insert");
        }
        m.remove(&txs[1].hash);
        let seqs: Vec<u64> = m.admitted_between(0, 3).into_iter().map(|(seq, _)| seq).collect();
        assert_eq!(seqs, vec![0, 2]);
        assert!(m.admitted_between(3, 3).is_empty());
        assert!(m.admitted_between(5, 2).is_empty());
    }

    #[test]
    fn remove_keeps_order_consistent() {
        let mut m = Mempool::new(10);
        let a = tx(0, 1);
        let b = tx(1, 1);
        m.insert(a.clone()).expect("a");
        m.insert(b.clone()).expect("b");
        assert!(m.remove(&a.hash).is_some());
        assert!(m.remove(&a.hash).is_none());
        assert_eq!(m.select(10, 100)[0].hash, b.hash);
    }
}
