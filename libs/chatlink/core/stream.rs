//! Streams owned by the I/O core
//!
//! A [`Stream`] wraps one non-blocking TCP socket. Only the I/O thread ever
//! holds a `&mut Stream`; other threads refer to it by [`StreamId`] and go
//! through `IoCore::post_stream_action`.

use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Process-unique stream identifier. Ids start at 1 and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u64);

impl StreamId {
    pub const INVALID: StreamId = StreamId(0);

    pub(crate) fn from_raw(raw: u64) -> Self {
        StreamId(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    pub(crate) fn token(self) -> Token {
        Token(self.0 as usize)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Low-level socket state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Closed,
    Connecting,
    Connected,
}

/// Lifecycle event delivered to a stream's handler on the I/O thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// The pending connect completed
    Connect,
    /// Bytes read from the socket
    Data(Vec<u8>),
    /// Socket failure; a `Close` follows
    Error(String),
    /// The pending connect exceeded its deadline; a `Close` follows
    Timeout,
    /// The socket was released. The stream may be reconnected from here.
    Close,
    /// Last event for this id; the context is removed afterwards
    Destroy,
}

/// One socket, owned by the I/O core
pub struct Stream {
    id: StreamId,
    label: String,
    registry: Arc<Registry>,
    running: Arc<AtomicBool>,
    connect_timeout: Duration,
    socket: Option<TcpStream>,
    state: SocketState,
    peer: Option<SocketAddr>,
    pending_write: Vec<u8>,
    connect_deadline: Option<Instant>,
    close_requested: bool,
}

impl Stream {
    pub(crate) fn new(
        id: StreamId,
        label: String,
        registry: Arc<Registry>,
        running: Arc<AtomicBool>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            id,
            label,
            registry,
            running,
            connect_timeout,
            socket: None,
            state: SocketState::Closed,
            peer: None,
            pending_write: Vec::new(),
            connect_deadline: None,
            close_requested: false,
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> SocketState {
        self.state
    }

    /// Address of the last connect attempt
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Start a non-blocking connect, replacing any current socket.
    ///
    /// Returns `false` if the address cannot be resolved or the connect
    /// cannot be initiated. Completion is reported as `Connect`, failure as
    /// `Error` followed by `Close`.
    pub fn connect(&mut self, host: &str, port: u16) -> bool {
        if !self.running.load(Ordering::Acquire) {
            return false;
        }
        self.teardown();
        self.close_requested = false;

        let addr = match (host, port).to_socket_addrs().map(|mut addrs| addrs.next()) {
            Ok(Some(addr)) => addr,
            Ok(None) => {
                warn!(stream_id = %self.id, host, port, "No address for host");
                return false;
            }
            Err(e) => {
                warn!(stream_id = %self.id, host, port, error = %e, "Failed to resolve host");
                return false;
            }
        };

        let mut socket = match TcpStream::connect(addr) {
            Ok(socket) => socket,
            Err(e) => {
                warn!(stream_id = %self.id, %addr, error = %e, "Failed to start connect");
                return false;
            }
        };

        if let Err(e) = self.registry.register(
            &mut socket,
            self.id.token(),
            Interest::READABLE | Interest::WRITABLE,
        ) {
            warn!(stream_id = %self.id, error = %e, "Failed to register socket");
            return false;
        }

        debug!(stream_id = %self.id, %addr, "Connecting");
        self.socket = Some(socket);
        self.peer = Some(addr);
        self.state = SocketState::Connecting;
        self.connect_deadline = Some(Instant::now() + self.connect_timeout);
        true
    }

    /// Queue bytes and flush as much as the socket accepts.
    ///
    /// Returns `false` if there is no live socket.
    pub fn write(&mut self, data: &[u8]) -> bool {
        if self.socket.is_none() || self.close_requested {
            return false;
        }

        self.pending_write.extend_from_slice(data);
        if self.state == SocketState::Connected {
            if let Err(e) = self.flush() {
                warn!(stream_id = %self.id, error = %e, "Write failed");
                self.close();
                return false;
            }
        }
        true
    }

    /// Request the socket be released. The I/O core tears it down and
    /// delivers `Close` once the current callback returns.
    pub fn close(&mut self) {
        if self.socket.is_some() {
            self.close_requested = true;
        }
    }

    pub(crate) fn is_close_requested(&self) -> bool {
        self.close_requested
    }

    pub(crate) fn take_close_request(&mut self) -> bool {
        std::mem::take(&mut self.close_requested)
    }

    pub(crate) fn connect_deadline(&self) -> Option<Instant> {
        match self.state {
            SocketState::Connecting => self.connect_deadline,
            _ => None,
        }
    }

    /// Check a pending connect. `Ok(true)` once connected, `Ok(false)` while
    /// still in progress.
    pub(crate) fn finish_connect(&mut self) -> io::Result<bool> {
        let Some(socket) = self.socket.as_ref() else {
            return Ok(false);
        };

        if let Some(err) = socket.take_error()? {
            return Err(err);
        }

        match socket.peer_addr() {
            Ok(_) => {
                self.state = SocketState::Connected;
                self.connect_deadline = None;
                self.flush()?;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub(crate) fn flush(&mut self) -> io::Result<()> {
        let Some(socket) = self.socket.as_mut() else {
            return Ok(());
        };

        while !self.pending_write.is_empty() {
            match socket.write(&self.pending_write) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.pending_write.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub(crate) fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.socket.as_mut() {
            Some(socket) => socket.read(buf),
            None => Ok(0),
        }
    }

    /// Deregister and drop the socket
    pub(crate) fn teardown(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            if let Err(e) = self.registry.deregister(&mut socket) {
                debug!(stream_id = %self.id, error = %e, "Deregister failed");
            }
            let _ = socket.shutdown(Shutdown::Both);
        }
        self.state = SocketState::Closed;
        self.connect_deadline = None;
        self.pending_write.clear();
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("state", &self.state)
            .field("peer", &self.peer)
            .finish()
    }
}
