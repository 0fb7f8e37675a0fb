//! Cluster Tests
//!
//! Two nodes replicating over loopback: bootstrap, shipping, failure and
//! promotion.

use std::time::Duration;

use tandemkv::network::PeerClient;
use tandemkv::protocol::{Reply, Request};
use tandemkv::replication::{ReplicatorClient, Role, ShipOutcome, StandbyStatus};
use tandemkv::TandemError;

use super::{bind_server, ready_pair, wait_until, Node};

const CLIENT_TIMEOUT: Duration = Duration::from_secs(2);

// =============================================================================
// Bootstrap Tests
// =============================================================================

#[test]
fn test_standby_bootstraps_from_snapshot() {
    let primary_server = bind_server();
    let standby_server = bind_server();
    let peers = [
        ("primary", primary_server.local_addr()),
        ("standby", standby_server.local_addr()),
    ];

    let primary = Node::open("primary", primary_server, &peers);
    primary.store.promote().unwrap();
    for i in 0..50 {
        let key = format!("key{:03}", i);
        primary.store.put(key.as_bytes(), b"before").unwrap();
    }
    primary.store.delete(b"key007").unwrap();
    assert!(!primary.store.writable());

    let standby = Node::open("standby", standby_server, &peers);

    assert!(wait_until(|| primary.store.writable()));
    assert!(wait_until(|| standby
        .store
        .coordinator()
        .is_ready_with("primary")));
    assert_eq!(
        primary.store.coordinator().standby_status("standby"),
        Some(StandbyStatus::Ready)
    );

    assert_eq!(standby.user_entries(), primary.user_entries());
    assert_eq!(standby.store.get(b"key007").unwrap(), None);
    assert_eq!(
        standby.store.engine().replicated_position().unwrap(),
        Some(primary.store.engine().current_position().unwrap())
    );
}

#[test]
fn test_empty_primary_bootstrap() {
    let (primary, standby) = ready_pair();

    assert!(standby.user_entries().is_empty());
    assert_eq!(primary.store.coordinator().ready_count(), 1);
    assert_eq!(standby.store.role(), Role::Standby);
}

// =============================================================================
// Shipping Tests
// =============================================================================

#[test]
fn test_writes_ship_in_order() {
    let (primary, standby) = ready_pair();

    for i in 0..30 {
        let value = format!("v{}", i);
        let position = primary.store.put(b"counter", value.as_bytes()).unwrap();

        // Ship is synchronous: the standby has applied it before put returns
        assert_eq!(
            standby.store.engine().replicated_position().unwrap(),
            Some(position)
        );
        assert_eq!(standby.store.get(b"counter").unwrap(), Some(value.into_bytes()));
    }

    primary.store.delete(b"counter").unwrap();
    assert_eq!(standby.store.get(b"counter").unwrap(), None);
    assert_eq!(standby.user_entries(), primary.user_entries());
    assert_eq!(
        primary.store.coordinator().last_ship("standby"),
        Some(ShipOutcome::Delivered)
    );
}

#[test]
fn test_commands_over_the_wire() {
    let (primary, standby) = ready_pair();
    let to_primary = PeerClient::new(primary.addr().to_string(), CLIENT_TIMEOUT);
    let to_standby = PeerClient::new(standby.addr().to_string(), CLIENT_TIMEOUT);

    let set = Request::new("SET").arg("greeting").arg("hello");
    assert!(to_primary.call(&set).unwrap().is_ok());

    let get = Request::new("GET").arg("greeting");
    assert_eq!(
        to_standby.call(&get).unwrap(),
        Reply::Bulk(b"hello".to_vec())
    );

    assert!(to_primary
        .call(&Request::new("DEL").arg("greeting"))
        .unwrap()
        .is_ok());
    assert_eq!(to_standby.call(&get).unwrap(), Reply::Null);

    // Wrong arity is an error reply, not a dropped connection
    assert!(matches!(
        to_primary.call(&Request::new("SET").arg("only-key")).unwrap(),
        Reply::Error(_)
    ));
}

#[test]
fn test_standby_rejects_writes() {
    let (_primary, standby) = ready_pair();

    assert!(matches!(
        standby.store.put(b"k", b"v"),
        Err(TandemError::NotPrimary)
    ));
    assert!(matches!(
        standby.store.delete(b"k"),
        Err(TandemError::NotPrimary)
    ));

    let client = PeerClient::new(standby.addr().to_string(), CLIENT_TIMEOUT);
    match client.call(&Request::new("SET").arg("k").arg("v")).unwrap() {
        Reply::Error(message) => assert!(message.contains("not primary")),
        other => panic!("Expected error reply, got {:?}", other),
    }
    assert_eq!(standby.store.get(b"k").unwrap(), None);
}

// =============================================================================
// Failure Tests
// =============================================================================

#[test]
fn test_lost_standby_blocks_writable() {
    let (primary, standby) = ready_pair();
    assert!(primary.store.writable());

    drop(standby);

    match primary.store.put(b"k", b"v") {
        Err(TandemError::ShipFailed { failures }) => assert_eq!(failures.len(), 1),
        other => panic!("Expected ShipFailed, got {:?}", other),
    }

    // Durable locally even though the standby missed it
    assert_eq!(primary.store.get(b"k").unwrap(), Some(b"v".to_vec()));
    assert!(!primary.store.writable());
    assert_eq!(primary.store.coordinator().standby_status("standby"), None);
    assert!(matches!(
        primary.store.coordinator().last_ship("standby"),
        Some(ShipOutcome::Failed(_))
    ));

    // With no registered standby, later writes succeed without shipping
    primary.store.put(b"k", b"v2").unwrap();
}

// =============================================================================
// Promotion Tests
// =============================================================================

#[test]
fn test_promote_standby_after_primary_loss() {
    let (primary, standby) = ready_pair();
    primary.store.put(b"a", b"1").unwrap();
    primary.store.put(b"b", b"2").unwrap();
    drop(primary);

    assert!(wait_until(|| !standby
        .store
        .coordinator()
        .is_ready_with("primary")));

    let term_before = standby.store.engine().current_sequence().term;
    standby.store.promote().unwrap();
    let term_after = standby.store.engine().current_sequence().term;

    assert_eq!(standby.store.role(), Role::Primary);
    assert_eq!(term_after, term_before + 1);

    // Promotion is idempotent and does not start another term
    standby.store.promote().unwrap();
    assert_eq!(standby.store.engine().current_sequence().term, term_after);

    // Replicated data is kept and the new primary accepts writes
    assert_eq!(standby.store.get(b"a").unwrap(), Some(b"1".to_vec()));
    standby.store.put(b"c", b"3").unwrap();
    assert_eq!(standby.store.get(b"c").unwrap(), Some(b"3".to_vec()));
    assert!(!standby.store.writable());
}

#[test]
fn test_role_and_promote_over_the_wire() {
    let (primary, standby) = ready_pair();
    let primary_client = ReplicatorClient::new(primary.addr().to_string(), CLIENT_TIMEOUT);
    let standby_client = ReplicatorClient::new(standby.addr().to_string(), CLIENT_TIMEOUT);

    assert_eq!(primary_client.role("observer", false).unwrap(), Role::Primary);
    assert_eq!(standby_client.role("observer", false).unwrap(), Role::Standby);

    standby_client.promote().unwrap();
    assert_eq!(standby_client.role("observer", false).unwrap(), Role::Primary);
    assert_eq!(standby.store.role(), Role::Primary);
}
