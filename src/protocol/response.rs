//! Reply definitions
//!
//! Represents replies sent back for a request.

/// Reply type tags on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReplyType {
    Status = 0x00,
    Null = 0x01,
    Error = 0x02,
    Integer = 0x03,
    Bulk = 0x04,
}

/// A reply to send to a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Short status string, e.g. "OK" or "PONG"
    Status(String),

    /// Absent value (GET on a missing key)
    Null,

    /// Failure message; the connection stays open
    Error(String),

    /// Signed integer (ROLE)
    Integer(i64),

    /// Binary payload (GET value, SYNC_REG snapshot)
    Bulk(Vec<u8>),
}

impl Reply {
    /// Create an OK status reply
    pub fn ok() -> Self {
        Reply::Status("OK".to_string())
    }

    /// Create an ERROR reply
    pub fn error(message: impl Into<String>) -> Self {
        Reply::Error(message.into())
    }

    /// Get the reply type tag
    pub fn reply_type(&self) -> ReplyType {
        match self {
            Reply::Status(_) => ReplyType::Status,
            Reply::Null => ReplyType::Null,
            Reply::Error(_) => ReplyType::Error,
            Reply::Integer(_) => ReplyType::Integer,
            Reply::Bulk(_) => ReplyType::Bulk,
        }
    }

    /// True for the "OK" status reply
    pub fn is_ok(&self) -> bool {
        matches!(self, Reply::Status(s) if s == "OK")
    }
}
