//! Request definitions
//!
//! A request is an array of binary-safe arguments. The first argument is
//! the textual command name; dispatch ignores its case.

/// A parsed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    args: Vec<Vec<u8>>,
}

impl Request {
    /// Start a request for `command`
    pub fn new(command: &str) -> Self {
        Self {
            args: vec![command.as_bytes().to_vec()],
        }
    }

    /// Build a request from raw arguments (command name first)
    pub fn from_args(args: Vec<Vec<u8>>) -> Self {
        Self { args }
    }

    /// Append an argument
    pub fn arg(mut self, arg: impl AsRef<[u8]>) -> Self {
        self.args.push(arg.as_ref().to_vec());
        self
    }

    /// Lowercased command name, or None for an empty request
    pub fn command_name(&self) -> Option<String> {
        self.args
            .first()
            .map(|name| String::from_utf8_lossy(name).to_ascii_lowercase())
    }

    /// All arguments, command name included
    pub fn args(&self) -> &[Vec<u8>] {
        &self.args
    }
}
