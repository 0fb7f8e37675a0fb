//! Blocking client
//!
//! One lazily opened connection to a remote node. Any I/O failure drops the
//! connection; the next call reconnects.

use std::io::{BufReader, BufWriter};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Result, TandemError};
use crate::protocol::{read_reply, write_request, Reply, Request};

struct Stream {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

/// Client for a single peer address
pub struct PeerClient {
    addr: String,
    timeout: Duration,
    stream: Mutex<Option<Stream>>,
}

impl PeerClient {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
            stream: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.stream.lock().is_some()
    }

    /// Send one request and wait for its reply.
    ///
    /// Error replies are returned as `Ok(Reply::Error(..))`; only transport
    /// failures are `Err`.
    pub fn call(&self, request: &Request) -> Result<Reply> {
        let mut guard = self.stream.lock();
        if guard.is_none() {
            *guard = Some(self.connect()?);
        }

        let result = match guard.as_mut() {
            Some(stream) => exchange(stream, request),
            None => Err(TandemError::Network(format!("not connected to {}", self.addr))),
        };

        if let Err(ref e) = result {
            tracing::debug!("Dropping connection to {}: {}", self.addr, e);
            *guard = None;
        }
        result
    }

    /// Close the connection, if any
    pub fn disconnect(&self) {
        *self.stream.lock() = None;
    }

    fn connect(&self) -> Result<Stream> {
        let addr = self
            .addr
            .to_socket_addrs()
            .map_err(|e| TandemError::Network(format!("Bad address {}: {}", self.addr, e)))?
            .next()
            .ok_or_else(|| TandemError::Network(format!("No address for {}", self.addr)))?;

        let stream = TcpStream::connect_timeout(&addr, self.timeout)
            .map_err(|e| TandemError::Network(format!("Connect to {} failed: {}", self.addr, e)))?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        stream.set_nodelay(true)?;

        tracing::debug!("Connected to {}", self.addr);
        Ok(Stream {
            reader: BufReader::new(stream.try_clone()?),
            writer: BufWriter::new(stream),
        })
    }
}

fn exchange(stream: &mut Stream, request: &Request) -> Result<Reply> {
    write_request(&mut stream.writer, request)?;
    read_reply(&mut stream.reader)
}
