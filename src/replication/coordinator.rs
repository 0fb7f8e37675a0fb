//! Primary/standby coordinator
//!
//! Owns the role state machine and all peer bookkeeping:
//! - standby side: one worker per peer that polls its role and runs the
//!   SYNC_REG handshake against a primary
//! - primary side: the registry of pending/ready standbys, Ship fan-out and
//!   the liveness reaper

use std::collections::HashMap;
use std::iter;
use std::mem;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{Result, TandemError};
use crate::network::CommandRegistrar;
use crate::protocol::ensure_payload_fits;
use crate::wal::SequenceId;

use super::commands::{self, ReplicatorClient};
use super::{ReplicationHooks, Role};

/// Registration state of a standby, as seen by the primary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandbyStatus {
    /// SYNC_REG received, snapshot not yet built; ships are queued
    Pending,
    /// Receives every ship
    Ready,
}

/// Result of the last ship to a standby
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShipOutcome {
    Delivered,
    Failed(String),
}

struct Standby {
    status: StandbyStatus,

    /// Ships not yet delivered: queued while pending, or awaiting the flush
    /// that follows registration
    backlog: Vec<Vec<u8>>,

    /// Distinguishes this registration from a later one by the same node
    generation: u64,

    last_seen: Instant,
}

#[derive(Default)]
struct PrimaryState {
    standbys: HashMap<String, Standby>,
    last_ship: HashMap<String, ShipOutcome>,
}

/// Standby-side view of one peer
#[derive(Default)]
struct Link {
    ready: bool,
    last_seen: Option<Instant>,
}

struct PeerClients {
    /// ROLE and SYNC_REG from the peer worker
    control: ReplicatorClient,
    /// SHIP from the write path
    shipper: ReplicatorClient,
}

pub(super) struct Inner {
    node_name: String,
    standby_count: usize,
    peer_tick: Duration,
    liveness_window: Duration,
    reaper_interval: Duration,

    hooks: Arc<dyn ReplicationHooks>,
    role: AtomicU8,
    peers: HashMap<String, PeerClients>,

    primary: Mutex<PrimaryState>,
    links: Mutex<HashMap<String, Link>>,

    /// Held by a standby for a whole handshake, by its SHIP handler and by
    /// promotion
    handshake: Mutex<()>,

    /// Serializes ship fan-out and backlog flushes so each standby sees
    /// logs in write order
    ship_lock: Mutex<()>,

    next_generation: AtomicU64,
}

/// Coordinates replication between this node and its configured peers
pub struct PrimaryStandby {
    inner: Arc<Inner>,
    stop: Mutex<Option<Sender<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl PrimaryStandby {
    /// Build a coordinator in the Standby role; nothing runs until `initialize`
    pub fn new(config: &Config, hooks: Arc<dyn ReplicationHooks>) -> Self {
        let cluster = &config.cluster;
        let timeout = cluster.request_timeout();
        let peers = cluster
            .remote_peers()
            .map(|(name, addr)| {
                let clients = PeerClients {
                    control: ReplicatorClient::new(addr.clone(), timeout),
                    shipper: ReplicatorClient::new(addr.clone(), timeout),
                };
                (name.clone(), clients)
            })
            .collect();

        Self {
            inner: Arc::new(Inner {
                node_name: cluster.node_name.clone(),
                standby_count: cluster.standby_count(),
                peer_tick: cluster.peer_tick(),
                liveness_window: cluster.liveness_window(),
                reaper_interval: cluster.reaper_interval(),
                hooks,
                role: AtomicU8::new(Role::Standby as u8),
                peers,
                primary: Mutex::new(PrimaryState::default()),
                links: Mutex::new(HashMap::new()),
                handshake: Mutex::new(()),
                ship_lock: Mutex::new(()),
                next_generation: AtomicU64::new(0),
            }),
            stop: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Register the wire commands and start one worker per remote peer plus
    /// the liveness reaper. Calling it again is a no-op.
    pub fn initialize(&self, registrar: &dyn CommandRegistrar) -> Result<()> {
        let mut stop = self.stop.lock();
        if stop.is_some() {
            return Ok(());
        }

        commands::register(&self.inner, registrar);

        let (sender, receiver) = channel::bounded::<()>(0);
        let mut workers = self.workers.lock();

        for name in self.inner.peers.keys() {
            let inner = Arc::clone(&self.inner);
            let peer = name.clone();
            let stop_rx = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("peer-{}", name))
                .spawn(move || run_peer_worker(inner, peer, stop_rx))?;
            workers.push(handle);
        }

        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name("reaper".to_string())
            .spawn(move || run_reaper(inner, receiver))?;
        workers.push(handle);

        *stop = Some(sender);
        tracing::info!(
            "Replication started for {} ({} peer(s))",
            self.inner.node_name,
            self.inner.peers.len()
        );
        Ok(())
    }

    /// Forward one log to every ready standby.
    ///
    /// Pending standbys get it queued instead. Each failing standby is
    /// de-registered; all failures are reported together. Returns how many
    /// standbys acknowledged.
    pub fn ship(&self, payload: &[u8]) -> Result<usize> {
        self.inner.ship(payload)
    }

    /// Become primary. Idempotent.
    pub fn promote(&self) -> Result<()> {
        self.inner.promote()
    }

    pub fn role(&self) -> Role {
        self.inner.role()
    }

    /// Primary with every configured standby ready
    pub fn writable(&self) -> bool {
        self.role().is_primary() && self.ready_count() == self.inner.standby_count
    }

    /// Standbys currently registered as ready
    pub fn ready_count(&self) -> usize {
        self.inner
            .primary
            .lock()
            .standbys
            .values()
            .filter(|s| s.status == StandbyStatus::Ready)
            .count()
    }

    /// Names of the ready standbys, sorted
    pub fn ready_standbys(&self) -> Vec<String> {
        let state = self.inner.primary.lock();
        let mut names: Vec<String> = state
            .standbys
            .iter()
            .filter(|(_, s)| s.status == StandbyStatus::Ready)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Number of standbys a primary expects
    pub fn standby_count(&self) -> usize {
        self.inner.standby_count
    }

    pub fn standby_status(&self, node: &str) -> Option<StandbyStatus> {
        self.inner.primary.lock().standbys.get(node).map(|s| s.status)
    }

    pub fn last_ship(&self, node: &str) -> Option<ShipOutcome> {
        self.inner.primary.lock().last_ship.get(node).cloned()
    }

    /// Standby side: whether the handshake with `peer` has completed
    pub fn is_ready_with(&self, peer: &str) -> bool {
        self.inner.is_ready_with(peer)
    }

    /// Standby side: when `peer` last answered a ROLE query
    pub fn last_seen(&self, peer: &str) -> Option<Instant> {
        self.inner.links.lock().get(peer).and_then(|l| l.last_seen)
    }

    pub fn node_name(&self) -> &str {
        &self.inner.node_name
    }

    /// Stop the peer workers and the reaper and wait for them
    pub fn shutdown(&self) {
        // Dropping the sender disconnects every worker's receiver
        if self.stop.lock().take().is_none() {
            return;
        }
        for handle in self.workers.lock().drain(..) {
            if handle.join().is_err() {
                tracing::error!("Replication worker panicked");
            }
        }
        tracing::info!("Replication stopped for {}", self.inner.node_name);
    }
}

impl Drop for PrimaryStandby {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    pub(super) fn role(&self) -> Role {
        if self.role.load(Ordering::Acquire) == Role::Primary as u8 {
            Role::Primary
        } else {
            Role::Standby
        }
    }

    /// Refresh the last-seen time of a registered standby; false if `node`
    /// is not registered
    pub(super) fn touch(&self, node: &str) -> bool {
        match self.primary.lock().standbys.get_mut(node) {
            Some(standby) => {
                standby.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // Primary side
    // =========================================================================

    /// Handle SYNC_REG: register `node` as pending, build the snapshot, then
    /// mark it ready. Ships queued meanwhile are flushed on a background
    /// thread.
    pub(super) fn sync_and_register(
        self: &Arc<Self>,
        node: &str,
        from: SequenceId,
    ) -> Result<Vec<u8>> {
        if !self.role().is_primary() {
            return Err(TandemError::NotPrimary);
        }
        if !self.peers.contains_key(node) {
            return Err(TandemError::Replication(format!("unknown node: {}", node)));
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let previous = self.primary.lock().standbys.insert(
            node.to_string(),
            Standby {
                status: StandbyStatus::Pending,
                backlog: Vec::new(),
                generation,
                last_seen: Instant::now(),
            },
        );
        if previous.is_some() {
            tracing::info!("Standby {} re-registering", node);
        }
        tracing::debug!("Standby {} pending, snapshot requested from {}", node, from);

        let payload = match self
            .hooks
            .snapshot(from)
            .and_then(|payload| ensure_payload_fits(payload.len()).map(|()| payload))
        {
            Ok(payload) => payload,
            Err(e) => {
                self.deregister(node, generation, &e.to_string());
                return Err(e);
            }
        };

        let queued = {
            let mut state = self.primary.lock();
            match state.standbys.get_mut(node) {
                Some(standby) if standby.generation == generation => {
                    standby.status = StandbyStatus::Ready;
                    standby.last_seen = Instant::now();
                    standby.backlog.len()
                }
                _ => {
                    return Err(TandemError::Replication(format!(
                        "registration of {} was superseded",
                        node
                    )))
                }
            }
        };

        if queued > 0 {
            let inner = Arc::clone(self);
            let peer = node.to_string();
            let spawned = thread::Builder::new()
                .name(format!("flush-{}", node))
                .spawn(move || inner.flush_backlog(&peer, generation));
            if let Err(e) = spawned {
                // The next ship delivers the backlog first
                tracing::warn!("Could not start backlog flush for {}: {}", node, e);
            }
        }

        tracing::info!(
            "Standby {} registered ({} byte snapshot, {} queued)",
            node,
            payload.len(),
            queued
        );
        Ok(payload)
    }

    pub(super) fn ship(&self, payload: &[u8]) -> Result<usize> {
        if !self.role().is_primary() {
            return Err(TandemError::NotPrimary);
        }

        let _ship_guard = self.ship_lock.lock();

        let mut targets = Vec::new();
        {
            let mut state = self.primary.lock();
            for (name, standby) in state.standbys.iter_mut() {
                match standby.status {
                    StandbyStatus::Pending => standby.backlog.push(payload.to_vec()),
                    StandbyStatus::Ready => targets.push((
                        name.clone(),
                        standby.generation,
                        mem::take(&mut standby.backlog),
                    )),
                }
            }
        }

        let mut delivered = 0;
        let mut failures = Vec::new();
        for (name, generation, backlog) in targets {
            let logs = backlog.iter().map(Vec::as_slice).chain(iter::once(payload));
            match self.deliver(&name, generation, logs) {
                Ok(()) => delivered += 1,
                Err(e) => failures.push(format!("{}: {}", name, e)),
            }
        }

        if failures.is_empty() {
            Ok(delivered)
        } else {
            Err(TandemError::ShipFailed { failures })
        }
    }

    fn flush_backlog(&self, node: &str, generation: u64) {
        let _ship_guard = self.ship_lock.lock();

        let backlog = {
            let mut state = self.primary.lock();
            match state.standbys.get_mut(node) {
                Some(standby)
                    if standby.generation == generation
                        && standby.status == StandbyStatus::Ready =>
                {
                    mem::take(&mut standby.backlog)
                }
                _ => return,
            }
        };
        if backlog.is_empty() {
            return;
        }

        let count = backlog.len();
        if self
            .deliver(node, generation, backlog.iter().map(Vec::as_slice))
            .is_ok()
        {
            tracing::debug!("Flushed {} queued log(s) to {}", count, node);
        }
    }

    /// Send `logs` in order; the first failure de-registers the standby.
    /// Called with `ship_lock` held.
    fn deliver<'a>(
        &self,
        node: &str,
        generation: u64,
        logs: impl Iterator<Item = &'a [u8]>,
    ) -> Result<()> {
        let clients = self
            .peers
            .get(node)
            .ok_or_else(|| TandemError::Replication(format!("unknown node: {}", node)))?;

        for log in logs {
            if let Err(e) = clients.shipper.ship(log) {
                self.deregister(node, generation, &e.to_string());
                return Err(e);
            }
        }

        let mut state = self.primary.lock();
        if let Some(standby) = state.standbys.get_mut(node) {
            if standby.generation == generation {
                standby.last_seen = Instant::now();
            }
        }
        state.last_ship.insert(node.to_string(), ShipOutcome::Delivered);
        Ok(())
    }

    fn deregister(&self, node: &str, generation: u64, reason: &str) {
        let mut state = self.primary.lock();
        let current = state.standbys.get(node).map(|s| s.generation);
        if current == Some(generation) {
            state.standbys.remove(node);
            tracing::warn!("De-registered standby {}: {}", node, reason);
        }
        state
            .last_ship
            .insert(node.to_string(), ShipOutcome::Failed(reason.to_string()));
    }

    /// Evict standbys not heard from within the liveness window
    fn reap(&self) {
        if !self.role().is_primary() {
            return;
        }
        let window = self.liveness_window;
        let mut state = self.primary.lock();
        state.standbys.retain(|name, standby| {
            let alive = standby.last_seen.elapsed() <= window;
            if !alive {
                tracing::warn!(
                    "Evicting standby {}: not seen for {:?}",
                    name,
                    standby.last_seen.elapsed()
                );
            }
            alive
        });
    }

    // =========================================================================
    // Standby side
    // =========================================================================

    /// Handle SHIP. Waits for any running handshake so shipped logs land
    /// after the snapshot.
    pub(super) fn apply_shipped(&self, payload: &[u8]) -> Result<()> {
        let _handshake_guard = self.handshake.lock();
        if self.role().is_primary() {
            return Err(TandemError::Replication(
                "refusing shipped log: node is primary".to_string(),
            ));
        }
        self.hooks.apply_wal_log(payload)
    }

    pub(super) fn promote(&self) -> Result<()> {
        let _handshake_guard = self.handshake.lock();
        if self.role().is_primary() {
            tracing::debug!("Promote ignored: {} is already primary", self.node_name);
            return Ok(());
        }

        self.hooks.on_promote()?;
        self.role.store(Role::Primary as u8, Ordering::Release);
        for link in self.links.lock().values_mut() {
            link.ready = false;
        }

        tracing::info!("{} promoted to primary", self.node_name);
        Ok(())
    }

    fn is_ready_with(&self, peer: &str) -> bool {
        self.links.lock().get(peer).map_or(false, |l| l.ready)
    }

    /// One peer-worker iteration
    fn tick(&self, peer: &str) {
        let clients = match self.peers.get(peer) {
            Some(clients) => clients,
            None => return,
        };

        let claims_ready = self.is_ready_with(peer);
        let peer_role = match clients.control.role(&self.node_name, claims_ready) {
            Ok(role) => role,
            Err(e) => {
                let mut links = self.links.lock();
                let link = links.entry(peer.to_string()).or_default();
                if link.ready && matches!(e, TandemError::NotRegistered(_)) {
                    tracing::warn!("Primary {} dropped our registration, resyncing", peer);
                } else if link.ready {
                    tracing::warn!("Lost primary {}: {}", peer, e);
                } else {
                    tracing::debug!("Peer {} unreachable: {}", peer, e);
                }
                link.ready = false;
                return;
            }
        };

        self.links
            .lock()
            .entry(peer.to_string())
            .or_default()
            .last_seen = Some(Instant::now());

        if peer_role == Role::Standby {
            return;
        }
        if self.role().is_primary() {
            tracing::warn!("Peer {} also reports primary", peer);
            return;
        }
        if self.is_ready_with(peer) {
            return;
        }

        if let Err(e) = self.handshake_with(peer, &clients.control) {
            tracing::warn!("Handshake with primary {} failed: {}", peer, e);
        }
    }

    fn handshake_with(&self, peer: &str, client: &ReplicatorClient) -> Result<()> {
        let _handshake_guard = self.handshake.lock();
        if self.role().is_primary() {
            return Ok(());
        }

        let from = self.hooks.current_sequence();
        tracing::debug!("Registering with primary {} from {}", peer, from);

        let payload = client.sync_and_register(&self.node_name, from)?;
        self.hooks.apply_snapshot_and_incremental(&payload)?;

        self.links.lock().entry(peer.to_string()).or_default().ready = true;
        tracing::info!(
            "Synchronized with primary {} ({} bytes)",
            peer,
            payload.len()
        );
        Ok(())
    }
}

fn run_peer_worker(inner: Arc<Inner>, peer: String, stop: Receiver<()>) {
    tracing::debug!("Peer worker for {} started", peer);
    loop {
        inner.tick(&peer);
        match stop.recv_timeout(inner.peer_tick) {
            Err(RecvTimeoutError::Timeout) => continue,
            _ => break,
        }
    }
    tracing::debug!("Peer worker for {} stopped", peer);
}

fn run_reaper(inner: Arc<Inner>, stop: Receiver<()>) {
    loop {
        match stop.recv_timeout(inner.reaper_interval) {
            Err(RecvTimeoutError::Timeout) => inner.reap(),
            _ => break,
        }
    }
}
