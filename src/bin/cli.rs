//! TandemKV CLI Client
//!
//! Command-line interface for interacting with a TandemKV node.

use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tandemkv::network::PeerClient;
use tandemkv::protocol::{Reply, Request};
use tandemkv::replication::{ReplicatorClient, Role};

/// TandemKV CLI
#[derive(Parser, Debug)]
#[command(name = "tandemkv-cli")]
#[command(about = "CLI for the TandemKV key-value store")]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:6380")]
    server: String,

    /// Request timeout in milliseconds
    #[arg(short, long, default_value = "5000")]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// Ping the server
    Ping,

    /// Show the node's replication role
    Role,

    /// Promote the node to primary
    Promote,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let timeout = Duration::from_millis(args.timeout_ms);

    let result = match args.command {
        Commands::Role => ReplicatorClient::new(&args.server, timeout)
            .role("cli", false)
            .map(|role| match role {
                Role::Primary => "primary".to_string(),
                Role::Standby => "standby".to_string(),
            }),
        Commands::Promote => ReplicatorClient::new(&args.server, timeout)
            .promote()
            .map(|()| "OK".to_string()),
        command => {
            let request = match command {
                Commands::Get { key } => Request::new("GET").arg(key),
                Commands::Set { key, value } => Request::new("SET").arg(key).arg(value),
                Commands::Del { key } => Request::new("DEL").arg(key),
                _ => Request::new("PING"),
            };
            PeerClient::new(&args.server, timeout)
                .call(&request)
                .and_then(|reply| match reply {
                    Reply::Error(message) => Err(tandemkv::TandemError::Protocol(message)),
                    other => Ok(render(other)),
                })
        }
    };

    match result {
        Ok(output) => {
            println!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("(error) {}", e);
            ExitCode::FAILURE
        }
    }
}

fn render(reply: Reply) -> String {
    match reply {
        Reply::Status(s) => s,
        Reply::Null => "(nil)".to_string(),
        Reply::Integer(i) => format!("(integer) {}", i),
        Reply::Bulk(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Reply::Error(message) => format!("(error) {}", message),
    }
}
