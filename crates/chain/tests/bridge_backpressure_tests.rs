//! Bridge manager behaviour with small queues and slow workers.
//! Run with: cargo test --test bridge_backpressure_tests

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use aether_chain::bridge::{BridgeHandle, BridgeManager, CommandKind, ExecutionBridge};
use aether_chain::config::BridgeConfig;
use aether_chain::shutdown::Shutdown;
use aether_chain::*;

const WAIT: Duration = Duration::from_secs(10);

struct Rig {
    bridge: Arc<ExecutionBridge>,
    transport: Arc<ChannelTransport>,
    handle: BridgeHandle,
    shutdown: Arc<Shutdown>,
}

fn rig(cfg: BridgeConfig) -> Rig {
    let transport = Arc::new(ChannelTransport::new(cfg.command_queue));
    let bridge = Arc::new(ExecutionBridge::new(&cfg, transport.clone()));
    let shutdown = Arc::new(Shutdown::new());
    let (manager, handle) = BridgeManager::new(bridge.clone(), &cfg, shutdown.clone());
    manager.start();
    Rig { bridge, transport, handle, shutdown }
}

fn tx(nonce: u64) -> Transaction {
    Transaction::builder(Command::call("m", "f", 1)).nonce(nonce).timestamp(0).build()
}

/// Echo worker that blocks on the response queue like a real one would.
fn echo_worker(rig: &Rig, id: &'static str) -> tokio::task::JoinHandle<usize> {
    let mut inbox = rig.transport.attach(id);
    rig.bridge.announce(id, "127.0.0.1", 7000);
    let responses = rig.handle.clone();
    tokio::spawn(async move {
        let mut answered = 0;
        while let Some(cmd) = inbox.recv().await {
            let reply = ResponseEnvelope::success(id, cmd.timestamp, serde_json::json!({"ok": true}));
            if responses.respond(reply).await.is_err() {
                break;
            }
            answered += 1;
        }
        answered
    })
}

// ============================================================
// BURSTS
// ============================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn burst_on_tiny_queues_resolves_every_dispatch() {
    let rig = rig(BridgeConfig { command_queue: 2, response_queue: 2, ..BridgeConfig::default() });
    let _worker = echo_worker(&rig, "w1");

    let calls: Vec<_> = (0..200)
        .map(|n| {
            let handle = rig.handle.clone();
            tokio::spawn(async move { handle.dispatch(CommandKind::Execute, tx(n)).await })
        })
        .collect();

    let results = timeout(WAIT, async {
        let mut out = Vec::new();
        for call in calls {
            out.push(call.await.unwrap());
        }
        out
    })
    .await
    .expect("bridge manager stalled");

    let mut delivered = 0;
    for result in results {
        match result {
            Ok(ticket) => {
                let outcome = timeout(WAIT, ticket.outcome).await.unwrap().unwrap();
                assert!(outcome.is_success());
                delivered += 1;
            }
            Err(e) => assert!(matches!(e, KernelError::PoolFull(_)), "unexpected {:?}", e),
        }
    }
    assert!(delivered >= 2);
    assert_eq!(rig.bridge.pending_len(), 0);
    rig.shutdown.trigger();
}

#[tokio::test]
async fn responses_flow_while_one_worker_is_stuck() {
    let rig = rig(BridgeConfig { command_queue: 1, response_queue: 1, ..BridgeConfig::default() });

    // never reads its inbox
    let _stuck = rig.transport.attach("stuck");
    rig.bridge.announce("stuck", "127.0.0.1", 7001);
    rig.handle.dispatch(CommandKind::Execute, tx(0)).await.unwrap();
    assert!(matches!(
        rig.handle.dispatch(CommandKind::Execute, tx(1)).await,
        Err(KernelError::PoolFull(_))
    ));

    let _worker = echo_worker(&rig, "w2");
    let ticket = rig.handle.dispatch(CommandKind::Execute, tx(2)).await.unwrap();
    assert_eq!(ticket.worker_id, "w2");
    let outcome = timeout(WAIT, ticket.outcome).await.unwrap().unwrap();
    assert!(outcome.is_success());
    assert_eq!(rig.bridge.pending_len(), 1);
    rig.shutdown.trigger();
}
