//! Replication wire commands
//!
//! Server-side handlers for the four `REPLICATOR.*` commands and the
//! client that issues them.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::error::{Result, TandemError};
use crate::network::{CommandHandler, CommandRegistrar, PeerClient};
use crate::protocol::{Reply, Request};
use crate::wal::SequenceId;

use super::coordinator::Inner;
use super::{
    Role, PROMOTE_COMMAND, READY_FLAG, ROLE_COMMAND, SHIP_COMMAND, SYNC_REG_COMMAND,
};

/// Attempts per SHIP before the peer is considered failed
pub const SHIP_ATTEMPTS: usize = 3;

/// Pause between SHIP attempts
pub const SHIP_BACKOFF: Duration = Duration::from_millis(500);

pub(super) fn register(inner: &Arc<Inner>, registrar: &dyn CommandRegistrar) {
    registrar.add_command_handler(ROLE_COMMAND, handler(inner, handle_role));
    registrar.add_command_handler(SYNC_REG_COMMAND, handler(inner, handle_sync_reg));
    registrar.add_command_handler(SHIP_COMMAND, handler(inner, handle_ship));
    registrar.add_command_handler(PROMOTE_COMMAND, handler(inner, handle_promote));
}

fn handler(
    inner: &Arc<Inner>,
    f: fn(&Arc<Inner>, &[Vec<u8>]) -> Result<Reply>,
) -> CommandHandler {
    let inner = Arc::clone(inner);
    Arc::new(move |args: &[Vec<u8>]| f(&inner, args))
}

/// Leading text of a `TandemError::NotRegistered` reply
const NOT_REGISTERED_PREFIX: &str = "not registered: ";

/// `REPLICATOR.ROLE [node [ready]]`
fn handle_role(inner: &Arc<Inner>, args: &[Vec<u8>]) -> Result<Reply> {
    if let Some(node) = args.get(1) {
        let node = node_name(node)?;
        let registered = inner.touch(&node);
        let claims_ready = args.get(2).map_or(false, |flag| flag == READY_FLAG);
        if claims_ready && !registered && inner.role().is_primary() {
            return Err(TandemError::NotRegistered(node));
        }
    }
    Ok(Reply::Integer(inner.role().as_wire()))
}

/// `REPLICATOR.SYNC_REG node seq`
fn handle_sync_reg(inner: &Arc<Inner>, args: &[Vec<u8>]) -> Result<Reply> {
    let node = node_name(arg(args, 1, "node")?)?;
    let from: SequenceId = bincode::deserialize(arg(args, 2, "sequence id")?)
        .map_err(|e| TandemError::Protocol(format!("bad sequence id: {}", e)))?;

    let payload = inner.sync_and_register(&node, from)?;
    Ok(Reply::Bulk(payload))
}

/// `REPLICATOR.SHIP record`
fn handle_ship(inner: &Arc<Inner>, args: &[Vec<u8>]) -> Result<Reply> {
    let payload = arg(args, 1, "record")?;
    inner.apply_shipped(payload)?;
    Ok(Reply::ok())
}

/// `REPLICATOR.PROMOTE`
fn handle_promote(inner: &Arc<Inner>, _args: &[Vec<u8>]) -> Result<Reply> {
    inner.promote()?;
    Ok(Reply::ok())
}

fn arg<'a>(args: &'a [Vec<u8>], index: usize, what: &str) -> Result<&'a [u8]> {
    args.get(index)
        .map(Vec::as_slice)
        .ok_or_else(|| TandemError::Protocol(format!("missing argument: {}", what)))
}

fn node_name(raw: &[u8]) -> Result<String> {
    String::from_utf8(raw.to_vec())
        .map_err(|_| TandemError::Protocol("node name is not valid UTF-8".to_string()))
}

/// Typed client for the `REPLICATOR.*` commands on one peer
pub struct ReplicatorClient {
    peer: PeerClient,
}

impl ReplicatorClient {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            peer: PeerClient::new(addr, timeout),
        }
    }

    pub fn addr(&self) -> &str {
        self.peer.addr()
    }

    /// Ask the peer for its role, identifying this node as `node`.
    ///
    /// With `ready` set, a primary that has not registered `node` replies
    /// with an error instead of its role.
    pub fn role(&self, node: &str, ready: bool) -> Result<Role> {
        let mut request = Request::new(ROLE_COMMAND).arg(node);
        if ready {
            request = request.arg(READY_FLAG);
        }
        match self.peer.call(&request)? {
            Reply::Integer(value) => Role::from_wire(value),
            Reply::Error(message) => match message.strip_prefix(NOT_REGISTERED_PREFIX) {
                Some(node) => Err(TandemError::NotRegistered(node.to_string())),
                None => Err(unexpected(ROLE_COMMAND, Reply::Error(message))),
            },
            other => Err(unexpected(ROLE_COMMAND, other)),
        }
    }

    /// Register with a primary and fetch its snapshot payload
    pub fn sync_and_register(&self, node: &str, from: SequenceId) -> Result<Vec<u8>> {
        let request = Request::new(SYNC_REG_COMMAND)
            .arg(node)
            .arg(bincode::serialize(&from)?);
        match self.peer.call(&request)? {
            Reply::Bulk(payload) => Ok(payload),
            other => Err(unexpected(SYNC_REG_COMMAND, other)),
        }
    }

    /// Deliver one log; retried a fixed number of times with a fixed pause.
    ///
    /// Redelivery is safe because the receiver fences on log position.
    pub fn ship(&self, payload: &[u8]) -> Result<()> {
        let request = Request::new(SHIP_COMMAND).arg(payload);

        let mut last_error = None;
        for attempt in 1..=SHIP_ATTEMPTS {
            let error = match self.peer.call(&request) {
                Ok(reply) if reply.is_ok() => return Ok(()),
                Ok(other) => unexpected(SHIP_COMMAND, other),
                Err(e) => e,
            };
            tracing::debug!(
                "Ship to {} failed (attempt {}/{}): {}",
                self.addr(),
                attempt,
                SHIP_ATTEMPTS,
                error
            );
            last_error = Some(error);
            if attempt < SHIP_ATTEMPTS {
                thread::sleep(SHIP_BACKOFF);
            }
        }

        Err(last_error.unwrap_or_else(|| {
            TandemError::Replication(format!("ship to {} failed", self.addr()))
        }))
    }

    /// Ask the peer to become primary
    pub fn promote(&self) -> Result<()> {
        let request = Request::new(PROMOTE_COMMAND);
        match self.peer.call(&request)? {
            reply if reply.is_ok() => Ok(()),
            other => Err(unexpected(PROMOTE_COMMAND, other)),
        }
    }
}

fn unexpected(command: &str, reply: Reply) -> TandemError {
    match reply {
        Reply::Error(message) => TandemError::Replication(format!("{}: {}", command, message)),
        other => TandemError::Protocol(format!("{}: unexpected reply {:?}", command, other)),
    }
}
