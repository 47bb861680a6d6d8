//! Execution Worker Registry
//!
//! Tracks the execution workers the bridge can dispatch to.
//!
//! # Time Unit
//!
//! All timestamps in this module are Unix **milliseconds**. Every operation
//! that depends on the clock takes `now` as a parameter so the state
//! machine can be driven deterministically.
//!
//! # Status Transitions
//!
//! ```text
//!   announce() ──► Connected ◄──── heartbeat() ────┐
//!                     │                            │
//!                     │ silent >= degraded_after   │
//!                     ▼                            │
//!                  Degraded ───────────────────────┘
//!                     │
//!                     │ silent >= liveness_timeout
//!                     ▼
//!                   Lost ──── silent >= removal_after ──► removed
//!                     │
//!                     └── announce() ──► Connected
//! ```
//!
//! A lost worker ignores heartbeats; it has to announce itself again.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::BridgeConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Connected,
    Degraded,
    Lost,
}

/// One execution worker as seen by the bridge.
///
/// # Fields
///
/// - `id` - worker identifier, also the first half of every correlation key
/// - `address`, `port` - where the transport reaches the worker
/// - `last_seen` - last announce, heartbeat or response (ms)
/// - `last_dispatched` - last time it was picked for a request (ms, 0 = never)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConnection {
    pub id: String,
    pub address: String,
    pub port: u16,
    pub last_seen: u64,
    pub status: NodeStatus,
    pub last_dispatched: u64,
    pub dispatched: u64,
}

/// Workers whose status changed during one [`NodeRegistry::sweep`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub degraded: Vec<String>,
    pub lost: Vec<String>,
    pub removed: Vec<String>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.degraded.is_empty() && self.lost.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct NodeRegistry {
    nodes: HashMap<String, NodeConnection>,
    degraded_after_ms: u64,
    liveness_timeout_ms: u64,
    removal_after_ms: u64,
}

impl NodeRegistry {
    pub fn new(cfg: &BridgeConfig) -> Self {
        Self {
            nodes: HashMap::new(),
            degraded_after_ms: cfg.degraded_after_ms,
            liveness_timeout_ms: cfg.liveness_timeout_ms,
            removal_after_ms: cfg.removal_after_ms,
        }
    }

    /// Register a worker or bring a known one back to `Connected`.
    ///
    /// # Returns
    ///
    /// `true` if the worker was unknown or not connected before the call.
    pub fn announce(&mut self, id: &str, address: &str, port: u16, now: u64) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) => {
                let changed = node.status != NodeStatus::Connected;
                node.address = address.to_string();
                node.port = port;
                node.last_seen = now;
                node.status = NodeStatus::Connected;
                changed
            }
            None => {
                self.nodes.insert(
                    id.to_string(),
                    NodeConnection {
                        id: id.to_string(),
                        address: address.to_string(),
                        port,
                        last_seen: now,
                        status: NodeStatus::Connected,
                        last_dispatched: 0,
                        dispatched: 0,
                    },
                );
                true
            }
        }
    }

    /// Refresh liveness. Degraded workers recover; lost or unknown workers
    /// are not touched.
    ///
    /// # Returns
    ///
    /// `false` if the heartbeat was ignored.
    pub fn heartbeat(&mut self, id: &str, now: u64) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) if node.status != NodeStatus::Lost => {
                node.last_seen = now.max(node.last_seen);
                node.status = NodeStatus::Connected;
                true
            }
            _ => false,
        }
    }

    /// Apply the liveness thresholds to every worker.
    pub fn sweep(&mut self, now: u64) -> SweepReport {
        let mut report = SweepReport::default();
        for node in self.nodes.values_mut() {
            let silent = now.saturating_sub(node.last_seen);
            if silent >= self.removal_after_ms {
                report.removed.push(node.id.clone());
            } else if silent >= self.liveness_timeout_ms {
                if node.status != NodeStatus::Lost {
                    node.status = NodeStatus::Lost;
                    report.lost.push(node.id.clone());
                }
            } else if silent >= self.degraded_after_ms && node.status == NodeStatus::Connected {
                node.status = NodeStatus::Degraded;
                report.degraded.push(node.id.clone());
            }
        }
        for id in &report.removed {
            self.nodes.remove(id);
        }
        report.degraded.sort();
        report.lost.sort();
        report.removed.sort();
        report
    }

    /// Pick the connected worker dispatched to least recently and stamp it.
    /// Ties go to the smallest id.
    pub fn select_lru(&mut self, now: u64) -> Option<NodeConnection> {
        let id = self
            .nodes
            .values()
            .filter(|n| n.status == NodeStatus::Connected)
            .min_by(|a, b| a.last_dispatched.cmp(&b.last_dispatched).then_with(|| a.id.cmp(&b.id)))
            .map(|n| n.id.clone())?;
        let node = self.nodes.get_mut(&id)?;
        node.last_dispatched = now.max(node.last_dispatched + 1);
        node.dispatched += 1;
        Some(node.clone())
    }

    pub fn get(&self, id: &str) -> Option<&NodeConnection> {
        self.nodes.get(id)
    }

    pub fn status(&self, id: &str) -> Option<NodeStatus> {
        self.nodes.get(id).map(|n| n.status)
    }

    pub fn connected_count(&self) -> usize {
        self.nodes.values().filter(|n| n.status == NodeStatus::Connected).count()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All workers, sorted by id.
    pub fn list(&self) -> Vec<NodeConnection> {
        let mut v: Vec<_> = self.nodes.values().cloned().collect();
        v.sort_by(|a, b| a.id.cmp(&b.id));
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> NodeRegistry {
        NodeRegistry::new(&BridgeConfig {
            degraded_after_ms: 10,
            liveness_timeout_ms: 30,
            removal_after_ms: 100,
            ..BridgeConfig::default()
        })
    }

    #[test]
    fn sweep_walks_status_machine() {
        let mut r = registry();
        r.announce("w1", "127.0.0.1", 9000, 0);
        assert!(r.sweep(5).is_empty());
        assert_eq!(r.sweep(10).degraded, vec!["w1".to_string()]);
        assert_eq!(r.sweep(30).lost, vec!["w1".to_string()]);
        // already lost, no duplicate report
        assert!(r.sweep(40).lost.is_empty());
        assert_eq!(r.sweep(100).removed, vec!["w1".to_string()]);
        assert!(r.is_empty());
    }

    #[test]
    fn heartbeat_recovers_degraded_but_not_lost() {
        let mut r = registry();
        r.announce("w1", "h", 1, 0);
        r.sweep(15);
        assert_eq!(r.status("w1"), Some(NodeStatus::Degraded));
        assert!(r.heartbeat("w1", 16));
        assert_eq!(r.status("w1"), Some(NodeStatus::Connected));

        r.sweep(50);
        assert_eq!(r.status("w1"), Some(NodeStatus::Lost));
        assert!(!r.heartbeat("w1", 51));
        assert!(r.select_lru(51).is_none());
        assert!(r.announce("w1", "h", 1, 52));
        assert_eq!(r.select_lru(53).map(|n| n.id), Some("w1".to_string()));
    }

    #[test]
    fn lru_rotates_across_connected() {
        let mut r = registry();
        r.announce("b", "h", 1, 0);
        r.announce("a", "h", 1, 0);
        let picks: Vec<String> = (1..=4).filter_map(|t| r.select_lru(t)).map(|n| n.id).collect();
        assert_eq!(picks, vec!["a", "b", "a", "b"]);
    }

    #[test]
    fn unknown_heartbeat_is_ignored() {
        let mut r = registry();
        assert!(!r.heartbeat("ghost", 1));
    }
}
