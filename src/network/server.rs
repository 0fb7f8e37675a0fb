//! TCP Server
//!
//! Accepts connections and serves each on its own thread.

use std::collections::HashMap;
use std::io::{BufWriter, ErrorKind};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{Result, TandemError};
use crate::protocol::{write_reply, Reply};

use super::{CommandHandler, CommandRegistrar, CommandRegistry, Connection};

/// How long the acceptor sleeps when no connection is pending
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Live connections, keyed by connection id, so shutdown can close them
type ConnectionTable = Arc<Mutex<HashMap<u64, TcpStream>>>;

/// TCP server for TandemKV
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: Arc<CommandRegistry>,

    max_connections: usize,
    read_timeout_ms: u64,
    write_timeout_ms: u64,

    shutdown: Arc<AtomicBool>,
    connections: ConnectionTable,
    acceptor: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    /// Bind the listen address; nothing is accepted until `start`
    pub fn bind(config: &Config) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen_addr).map_err(|e| {
            TandemError::Network(format!("Failed to bind {}: {}", config.listen_addr, e))
        })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            registry: Arc::new(CommandRegistry::new()),
            max_connections: config.max_connections,
            read_timeout_ms: config.read_timeout_ms,
            write_timeout_ms: config.write_timeout_ms,
            shutdown: Arc::new(AtomicBool::new(false)),
            connections: Arc::new(Mutex::new(HashMap::new())),
            acceptor: Mutex::new(None),
        })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    /// Number of connections currently being served
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Spawn the acceptor thread. Calling it twice is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut acceptor = self.acceptor.lock();
        if acceptor.is_some() {
            return Ok(());
        }

        let listener = self.listener.try_clone()?;
        let registry = Arc::clone(&self.registry);
        let shutdown = Arc::clone(&self.shutdown);
        let connections = Arc::clone(&self.connections);
        let limits = ConnectionLimits {
            max_connections: self.max_connections,
            read_timeout_ms: self.read_timeout_ms,
            write_timeout_ms: self.write_timeout_ms,
        };

        let handle = thread::Builder::new()
            .name("acceptor".to_string())
            .spawn(move || accept_loop(listener, registry, shutdown, connections, limits))?;
        *acceptor = Some(handle);

        tracing::info!("Server listening on {}", self.local_addr);
        Ok(())
    }

    /// Start and block until `shutdown` is called from another thread
    pub fn run(&self) -> Result<()> {
        self.start()?;
        let handle = self.acceptor.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                return Err(TandemError::Network("acceptor thread panicked".to_string()));
            }
        }
        Ok(())
    }

    /// Stop accepting, close every live connection and join the acceptor
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        for (_, stream) in self.connections.lock().drain() {
            let _ = stream.shutdown(Shutdown::Both);
        }

        if let Some(handle) = self.acceptor.lock().take() {
            let _ = handle.join();
        }
        tracing::info!("Server on {} shut down", self.local_addr);
    }
}

impl CommandRegistrar for Server {
    fn add_command_handler(&self, name: &str, handler: CommandHandler) {
        self.registry.add_command_handler(name, handler);
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[derive(Clone, Copy)]
struct ConnectionLimits {
    max_connections: usize,
    read_timeout_ms: u64,
    write_timeout_ms: u64,
}

fn accept_loop(
    listener: TcpListener,
    registry: Arc<CommandRegistry>,
    shutdown: Arc<AtomicBool>,
    connections: ConnectionTable,
    limits: ConnectionLimits,
) {
    let next_id = AtomicU64::new(0);

    while !shutdown.load(Ordering::Acquire) {
        let (stream, addr) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
                continue;
            }
            Err(e) => {
                tracing::warn!("Accept failed: {}", e);
                thread::sleep(ACCEPT_POLL_INTERVAL);
                continue;
            }
        };

        if let Err(e) = stream.set_nonblocking(false) {
            tracing::warn!("Dropping connection from {}: {}", addr, e);
            continue;
        }

        if connections.lock().len() >= limits.max_connections {
            tracing::warn!("Rejecting {}: connection limit reached", addr);
            let mut writer = BufWriter::new(stream);
            let _ = write_reply(&mut writer, &Reply::error("too many connections"));
            continue;
        }

        let id = next_id.fetch_add(1, Ordering::Relaxed);
        match stream.try_clone() {
            Ok(tracked) => {
                connections.lock().insert(id, tracked);
            }
            Err(e) => {
                tracing::warn!("Dropping connection from {}: {}", addr, e);
                continue;
            }
        }

        let registry = Arc::clone(&registry);
        let table = Arc::clone(&connections);
        let spawned = thread::Builder::new()
            .name(format!("conn-{}", id))
            .spawn(move || {
                serve(stream, registry, limits);
                table.lock().remove(&id);
            });
        if let Err(e) = spawned {
            tracing::error!("Failed to spawn connection thread: {}", e);
            connections.lock().remove(&id);
        }
    }
}

fn serve(stream: TcpStream, registry: Arc<CommandRegistry>, limits: ConnectionLimits) {
    let mut connection = match Connection::new(stream, registry) {
        Ok(connection) => connection,
        Err(e) => {
            tracing::warn!("Failed to set up connection: {}", e);
            return;
        }
    };

    if let Err(e) = connection.set_timeouts(limits.read_timeout_ms, limits.write_timeout_ms) {
        tracing::warn!("Failed to set timeouts for {}: {}", connection.peer_addr(), e);
        return;
    }

    if let Err(e) = connection.handle() {
        tracing::debug!("Connection {} closed with error: {}", connection.peer_addr(), e);
    }
}
