//! Network Module
//!
//! TCP server, per-connection handling and the peer client.
//!
//! ## Architecture
//! - Single acceptor thread
//! - One thread per connection, capped by `max_connections`
//! - Requests routed by name through the `CommandRegistry`

mod client;
mod connection;
mod registry;
mod server;

pub use client::PeerClient;
pub use connection::Connection;
pub use registry::{CommandHandler, CommandRegistrar, CommandRegistry};
pub use server::Server;
