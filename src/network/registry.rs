//! Command Registry
//!
//! Maps command names to handlers. Components register the commands they
//! serve; the server dispatches each request by name.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;
use crate::protocol::{Reply, Request};

/// Handler invoked with every argument of a request (command name first)
pub type CommandHandler = Arc<dyn Fn(&[Vec<u8>]) -> Result<Reply> + Send + Sync>;

/// Anything commands can be registered with
pub trait CommandRegistrar {
    /// Register `handler` under `name` (case-insensitive); replaces any previous one
    fn add_command_handler(&self, name: &str, handler: CommandHandler);
}

/// Name → handler table shared by all connections
pub struct CommandRegistry {
    handlers: RwLock<HashMap<String, CommandHandler>>,
}

impl CommandRegistry {
    /// Create a registry that already answers PING
    pub fn new() -> Self {
        let registry = Self {
            handlers: RwLock::new(HashMap::new()),
        };
        registry.add_command_handler(
            "PING",
            Arc::new(|_args: &[Vec<u8>]| Ok(Reply::Status("PONG".to_string()))),
        );
        registry
    }

    /// Run the handler for `request`.
    ///
    /// Unknown commands and handler failures become error replies; they
    /// never close the connection.
    pub fn dispatch(&self, request: &Request) -> Reply {
        let name = match request.command_name() {
            Some(name) => name,
            None => return Reply::error("empty request"),
        };

        let handler = match self.handlers.read().get(&name) {
            Some(handler) => Arc::clone(handler),
            None => return Reply::error(format!("unknown command: {}", name)),
        };

        match handler(request.args()) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!("Command {} failed: {}", name, e);
                Reply::error(e.to_string())
            }
        }
    }

    /// Registered command names (lowercase)
    pub fn commands(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistrar for CommandRegistry {
    fn add_command_handler(&self, name: &str, handler: CommandHandler) {
        self.handlers.write().insert(name.to_ascii_lowercase(), handler);
    }
}
