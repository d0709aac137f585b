//! Stream handler capability
//!
//! A stream handler is the protocol state machine bound to one connection
//! attempt. The connection managers feed it socket events and interpret the
//! [`HandlerState`] it returns; the handler itself never touches the socket,
//! it only calls the raw send function it was bound with.
//!
//! ```text
//! I/O Core ──Connect──> on_connect()  ──> HandlerState
//!          ──Data────> on_message()  ──> HandlerState
//! Manager  ──────────> send_message() ──> raw send ──> PostStreamAction(Write)
//! ```
//!
//! Handlers compose: the WebSocket handler wraps another handler and binds
//! that inner handler's raw send to its own framing function.

use std::sync::Arc;

/// Raw byte sink a handler writes through.
///
/// Returns `false` when the bytes could not be queued.
pub type SendFn = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

/// Callback receiving each application line a handler does not consume itself.
pub type MessageFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Status reported by a handler after each event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerState {
    /// Input was not meaningful in the current state
    UnhandledResponse,
    /// Waiting for the server to answer
    AwaitingResponse,
    /// An application message was delivered to the message callback
    MessageReceived,
    /// An outstanding message completed its server round-trip
    MessageSent,
    /// Handshake (and join, if required) completed
    Connected,
    /// Fatal for this attempt; the caller closes the stream
    HandlerError,
}

impl HandlerState {
    fn rank(self) -> u8 {
        match self {
            HandlerState::UnhandledResponse => 0,
            HandlerState::AwaitingResponse => 1,
            HandlerState::MessageReceived => 2,
            HandlerState::MessageSent => 3,
            HandlerState::Connected => 4,
            HandlerState::HandlerError => 5,
        }
    }

    /// Combine the states produced by several lines of one chunk,
    /// keeping the most significant.
    pub fn merge(self, other: HandlerState) -> HandlerState {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }
}

/// Protocol state machine driven by a connection manager
pub trait StreamHandler: Send {
    /// Called once the socket is connected
    fn on_connect(&mut self) -> HandlerState;

    /// Called for every chunk of inbound bytes
    fn on_message(&mut self, data: &[u8]) -> HandlerState;

    /// Send an application payload. Returns `false` if the handler is not
    /// in a state that allows sending.
    fn send_message(&mut self, data: &[u8]) -> bool;

    /// Bind the raw byte sink used for every outgoing write
    fn set_send_function(&mut self, send: SendFn);
}
