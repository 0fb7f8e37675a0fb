//! Coordinator Tests
//!
//! Drive `PrimaryStandby` through its wire commands with fake storage
//! hooks. Most tests use a single unreachable peer; the rest put a second
//! coordinator behind a loopback server.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use tandemkv::network::{CommandRegistry, Server};
use tandemkv::protocol::{Reply, Request, MAX_PAYLOAD_SIZE};
use tandemkv::replication::{
    PrimaryStandby, ReplicationHooks, Role, ShipOutcome, StandbyStatus, PROMOTE_COMMAND,
    READY_FLAG, ROLE_COMMAND, SHIP_COMMAND, SYNC_REG_COMMAND,
};
use tandemkv::{Config, Result, SequenceId, TandemError};

use super::{bind_server, dead_addr, wait_until, TICK_MS, WAIT};

/// Holds a snapshot build open until the test releases it
#[derive(Clone)]
struct SnapshotGate {
    entered: Sender<()>,
    release: Receiver<()>,
}

#[derive(Default)]
struct FakeHooks {
    applied: Mutex<Vec<Vec<u8>>>,
    snapshots_built: AtomicUsize,
    promotions: AtomicUsize,
    snapshot_gate: Mutex<Option<SnapshotGate>>,
    oversized_snapshot: AtomicBool,
    fail_apply: AtomicBool,
}

impl ReplicationHooks for FakeHooks {
    fn current_sequence(&self) -> SequenceId {
        SequenceId::START
    }

    fn snapshot(&self, _from: SequenceId) -> Result<Vec<u8>> {
        self.snapshots_built.fetch_add(1, Ordering::SeqCst);
        let gate = self.snapshot_gate.lock().clone();
        if let Some(gate) = gate {
            gate.entered.send(()).unwrap();
            gate.release.recv().unwrap();
        }
        if self.oversized_snapshot.load(Ordering::SeqCst) {
            return Ok(vec![0u8; MAX_PAYLOAD_SIZE as usize + 1]);
        }
        Ok(b"snapshot".to_vec())
    }

    fn apply_snapshot_and_incremental(&self, _payload: &[u8]) -> Result<()> {
        Ok(())
    }

    fn apply_wal_log(&self, payload: &[u8]) -> Result<()> {
        if self.fail_apply.load(Ordering::SeqCst) {
            return Err(TandemError::Storage("apply refused".to_string()));
        }
        self.applied.lock().push(payload.to_vec());
        Ok(())
    }

    fn on_promote(&self) -> Result<()> {
        self.promotions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    coordinator: PrimaryStandby,
    registry: CommandRegistry,
    hooks: Arc<FakeHooks>,
}

fn harness(liveness_window_ms: u64) -> Harness {
    harness_with(liveness_window_ms, &[("b", dead_addr())])
}

/// Coordinator "a" with the given remote peers, driven through a registry
fn harness_with(liveness_window_ms: u64, peers: &[(&str, String)]) -> Harness {
    let mut builder = Config::builder()
        .node_name("a")
        .peer("a", "127.0.0.1:0")
        .peer_tick_ms(TICK_MS)
        .liveness_window_ms(liveness_window_ms)
        .reaper_interval_ms(20)
        .request_timeout_ms(200);
    for (name, addr) in peers {
        builder = builder.peer(*name, addr.clone());
    }
    let config = builder.build();

    let hooks = Arc::new(FakeHooks::default());
    let coordinator = PrimaryStandby::new(&config, hooks.clone());
    let registry = CommandRegistry::new();
    coordinator.initialize(&registry).unwrap();

    Harness {
        coordinator,
        registry,
        hooks,
    }
}

/// A coordinator reachable over loopback
struct LiveNode {
    coordinator: PrimaryStandby,
    server: Server,
    hooks: Arc<FakeHooks>,
}

impl LiveNode {
    fn start(name: &str, server: Server, peers: &[(&str, String)]) -> Self {
        let mut builder = Config::builder()
            .node_name(name)
            .peer(name, server.local_addr().to_string())
            .peer_tick_ms(TICK_MS)
            .reaper_interval_ms(20)
            .request_timeout_ms(200);
        for (peer, addr) in peers {
            builder = builder.peer(*peer, addr.clone());
        }
        let config = builder.build();

        let hooks = Arc::new(FakeHooks::default());
        let coordinator = PrimaryStandby::new(&config, hooks.clone());
        coordinator.initialize(&server).unwrap();

        Self {
            coordinator,
            server,
            hooks,
        }
    }

    fn addr(&self) -> String {
        self.server.local_addr().to_string()
    }
}

impl Drop for LiveNode {
    fn drop(&mut self) {
        self.coordinator.shutdown();
        self.server.shutdown();
    }
}

fn sync_reg(node: &str) -> Request {
    Request::new(SYNC_REG_COMMAND)
        .arg(node)
        .arg(bincode::serialize(&SequenceId::START).unwrap())
}

fn expect_error(reply: Reply) -> String {
    match reply {
        Reply::Error(message) => message,
        other => panic!("Expected error reply, got {:?}", other),
    }
}

// =============================================================================
// Role Tests
// =============================================================================

#[test]
fn test_starts_as_standby() {
    let h = harness(20_000);

    assert_eq!(h.coordinator.role(), Role::Standby);
    assert_eq!(h.coordinator.standby_count(), 1);
    assert!(!h.coordinator.writable());
    assert!(matches!(
        h.coordinator.ship(b"log"),
        Err(TandemError::NotPrimary)
    ));
}

#[test]
fn test_role_over_registry() {
    let h = harness(20_000);
    let role = Request::new(ROLE_COMMAND).arg("b");

    assert_eq!(h.registry.dispatch(&role), Reply::Integer(2));
    h.coordinator.promote().unwrap();
    assert_eq!(h.registry.dispatch(&role), Reply::Integer(1));
}

#[test]
fn test_promote_is_idempotent() {
    let h = harness(20_000);

    h.coordinator.promote().unwrap();
    h.coordinator.promote().unwrap();
    assert!(h.registry.dispatch(&Request::new(PROMOTE_COMMAND)).is_ok());

    assert_eq!(h.coordinator.role(), Role::Primary);
    assert_eq!(h.hooks.promotions.load(Ordering::SeqCst), 1);
}

#[test]
fn test_initialize_twice_is_noop() {
    let h = harness(20_000);
    h.coordinator.initialize(&h.registry).unwrap();
    h.coordinator.shutdown();
    h.coordinator.shutdown();
}

// =============================================================================
// Registration Tests
// =============================================================================

#[test]
fn test_sync_reg_registers_ready_standby() {
    let h = harness(20_000);
    h.coordinator.promote().unwrap();
    assert!(!h.coordinator.writable());

    let reply = h.registry.dispatch(&sync_reg("b"));

    assert_eq!(reply, Reply::Bulk(b"snapshot".to_vec()));
    assert_eq!(h.coordinator.standby_status("b"), Some(StandbyStatus::Ready));
    assert_eq!(h.coordinator.ready_standbys(), vec!["b".to_string()]);
    assert!(h.coordinator.writable());
}

#[test]
fn test_sync_reg_refused_by_standby() {
    let h = harness(20_000);

    let message = expect_error(h.registry.dispatch(&sync_reg("b")));
    assert!(message.contains("not primary"));
    assert_eq!(h.hooks.snapshots_built.load(Ordering::SeqCst), 0);
}

#[test]
fn test_sync_reg_unknown_node() {
    let h = harness(20_000);
    h.coordinator.promote().unwrap();

    expect_error(h.registry.dispatch(&sync_reg("stranger")));
    assert_eq!(h.coordinator.standby_status("stranger"), None);
}

#[test]
fn test_oversized_snapshot_deregisters_standby() {
    let h = harness(20_000);
    h.coordinator.promote().unwrap();
    h.hooks.oversized_snapshot.store(true, Ordering::SeqCst);

    let message = expect_error(h.registry.dispatch(&sync_reg("b")));
    assert!(message.contains("too large"));
    assert_eq!(h.coordinator.standby_status("b"), None);
    assert!(!h.coordinator.writable());
}

#[test]
fn test_sync_reg_malformed_arguments() {
    let h = harness(20_000);
    h.coordinator.promote().unwrap();

    expect_error(h.registry.dispatch(&Request::new(SYNC_REG_COMMAND).arg("b")));
    expect_error(
        h.registry
            .dispatch(&Request::new(SYNC_REG_COMMAND).arg("b").arg("x")),
    );
    assert_eq!(h.coordinator.standby_status("b"), None);
}

// =============================================================================
// Ship Tests
// =============================================================================

#[test]
fn test_ship_without_standbys() {
    let h = harness(20_000);
    h.coordinator.promote().unwrap();

    assert_eq!(h.coordinator.ship(b"log").unwrap(), 0);
}

#[test]
fn test_ship_failure_deregisters_standby() {
    let h = harness(20_000);
    h.coordinator.promote().unwrap();
    h.registry.dispatch(&sync_reg("b"));
    assert!(h.coordinator.writable());

    match h.coordinator.ship(b"log") {
        Err(TandemError::ShipFailed { failures }) => {
            assert_eq!(failures.len(), 1);
            assert!(failures[0].starts_with("b:"));
        }
        other => panic!("Expected ShipFailed, got {:?}", other),
    }

    assert_eq!(h.coordinator.standby_status("b"), None);
    assert!(matches!(
        h.coordinator.last_ship("b"),
        Some(ShipOutcome::Failed(_))
    ));
    assert!(!h.coordinator.writable());

    // Nobody left to ship to
    assert_eq!(h.coordinator.ship(b"next").unwrap(), 0);
}

#[test]
fn test_ships_during_snapshot_are_queued_then_flushed_in_order() {
    let standby = LiveNode::start("b", bind_server(), &[]);
    let h = harness_with(20_000, &[("b", standby.addr())]);
    h.coordinator.promote().unwrap();

    let (entered_tx, entered_rx) = channel::bounded(1);
    let (release_tx, release_rx) = channel::bounded(1);
    *h.hooks.snapshot_gate.lock() = Some(SnapshotGate {
        entered: entered_tx,
        release: release_rx,
    });

    thread::scope(|s| {
        let registration = s.spawn(|| h.registry.dispatch(&sync_reg("b")));
        entered_rx.recv_timeout(WAIT).unwrap();

        assert_eq!(h.coordinator.standby_status("b"), Some(StandbyStatus::Pending));
        assert!(!h.coordinator.writable());

        // Pending standbys are not counted as delivered
        assert_eq!(h.coordinator.ship(b"one").unwrap(), 0);
        assert_eq!(h.coordinator.ship(b"two").unwrap(), 0);
        assert!(standby.hooks.applied.lock().is_empty());

        release_tx.send(()).unwrap();
        assert_eq!(
            registration.join().unwrap(),
            Reply::Bulk(b"snapshot".to_vec())
        );
    });

    assert_eq!(h.coordinator.standby_status("b"), Some(StandbyStatus::Ready));
    assert!(wait_until(|| standby.hooks.applied.lock().len() == 2));

    assert_eq!(h.coordinator.ship(b"three").unwrap(), 1);
    assert_eq!(
        *standby.hooks.applied.lock(),
        vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]
    );
}

#[test]
fn test_ship_failure_does_not_block_healthy_standby() {
    let standby = LiveNode::start("b", bind_server(), &[]);
    let h = harness_with(20_000, &[("b", standby.addr()), ("c", dead_addr())]);
    h.coordinator.promote().unwrap();
    assert_eq!(h.registry.dispatch(&sync_reg("b")), Reply::Bulk(b"snapshot".to_vec()));
    assert_eq!(h.registry.dispatch(&sync_reg("c")), Reply::Bulk(b"snapshot".to_vec()));
    assert!(h.coordinator.writable());

    match h.coordinator.ship(b"log") {
        Err(TandemError::ShipFailed { failures }) => {
            assert_eq!(failures.len(), 1);
            assert!(failures[0].starts_with("c:"));
        }
        other => panic!("Expected ShipFailed, got {:?}", other),
    }

    assert_eq!(*standby.hooks.applied.lock(), vec![b"log".to_vec()]);
    assert_eq!(h.coordinator.standby_status("b"), Some(StandbyStatus::Ready));
    assert_eq!(h.coordinator.standby_status("c"), None);
    assert!(matches!(
        h.coordinator.last_ship("b"),
        Some(ShipOutcome::Delivered)
    ));
    assert!(matches!(
        h.coordinator.last_ship("c"),
        Some(ShipOutcome::Failed(_))
    ));
}

#[test]
fn test_standby_applies_shipped_logs() {
    let h = harness(20_000);

    for log in [&b"one"[..], &b"two"[..], &b"three"[..]] {
        assert!(h
            .registry
            .dispatch(&Request::new(SHIP_COMMAND).arg(log))
            .is_ok());
    }

    assert_eq!(
        *h.hooks.applied.lock(),
        vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]
    );
}

#[test]
fn test_primary_refuses_shipped_logs() {
    let h = harness(20_000);
    h.coordinator.promote().unwrap();

    expect_error(h.registry.dispatch(&Request::new(SHIP_COMMAND).arg("log")));
    expect_error(h.registry.dispatch(&Request::new(SHIP_COMMAND)));
    assert!(h.hooks.applied.lock().is_empty());
}

// =============================================================================
// Liveness Tests
// =============================================================================

#[test]
fn test_reaper_evicts_silent_standby() {
    let h = harness(100);
    h.coordinator.promote().unwrap();
    h.registry.dispatch(&sync_reg("b"));

    assert!(wait_until(|| h.coordinator.standby_status("b").is_none()));
    assert!(!h.coordinator.writable());
}

#[test]
fn test_role_queries_keep_standby_alive() {
    let h = harness(400);
    h.coordinator.promote().unwrap();
    h.registry.dispatch(&sync_reg("b"));

    let role = Request::new(ROLE_COMMAND).arg("b");
    for _ in 0..20 {
        h.registry.dispatch(&role);
        thread::sleep(Duration::from_millis(50));
    }

    assert_eq!(h.coordinator.standby_status("b"), Some(StandbyStatus::Ready));
}

#[test]
fn test_ready_claim_from_unregistered_standby_rejected() {
    let h = harness(20_000);
    let claim = Request::new(ROLE_COMMAND).arg("b").arg(READY_FLAG);

    // Only a primary checks the claim
    assert_eq!(h.registry.dispatch(&claim), Reply::Integer(2));

    h.coordinator.promote().unwrap();
    let message = expect_error(h.registry.dispatch(&claim));
    assert!(message.contains("not registered"));

    h.registry.dispatch(&sync_reg("b"));
    assert_eq!(h.registry.dispatch(&claim), Reply::Integer(1));
}

#[test]
fn test_deregistered_standby_handshakes_again() {
    let primary_server = bind_server();
    let standby_server = bind_server();
    let primary_addr = primary_server.local_addr().to_string();
    let standby_addr = standby_server.local_addr().to_string();

    let primary = LiveNode::start("a", primary_server, &[("b", standby_addr)]);
    primary.coordinator.promote().unwrap();
    let standby = LiveNode::start("b", standby_server, &[("a", primary_addr)]);

    assert!(wait_until(|| primary.coordinator.writable()));
    assert!(wait_until(|| standby.coordinator.is_ready_with("a")));
    assert_eq!(primary.hooks.snapshots_built.load(Ordering::SeqCst), 1);

    // A rejected ship drops the registration on the primary
    standby.hooks.fail_apply.store(true, Ordering::SeqCst);
    assert!(matches!(
        primary.coordinator.ship(b"lost"),
        Err(TandemError::ShipFailed { .. })
    ));
    assert_eq!(primary.coordinator.standby_status("b"), None);
    standby.hooks.fail_apply.store(false, Ordering::SeqCst);

    // The standby notices on its next ROLE query and registers again
    assert!(wait_until(|| primary.coordinator.standby_status("b")
        == Some(StandbyStatus::Ready)));
    assert!(wait_until(|| standby.coordinator.is_ready_with("a")));
    assert_eq!(primary.hooks.snapshots_built.load(Ordering::SeqCst), 2);

    assert_eq!(primary.coordinator.ship(b"next").unwrap(), 1);
    assert_eq!(*standby.hooks.applied.lock(), vec![b"next".to_vec()]);
}
