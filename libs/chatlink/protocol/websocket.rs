//! Framed protocol handler (WebSocket)
//!
//! Performs the HTTP Upgrade handshake and then exchanges frames. When an
//! inner handler is bound it acts as an adapter: decoded text payloads go to
//! the inner handler's `on_message`, and the inner handler's raw writes are
//! framed before they reach the socket.
//!
//! ```text
//! socket ──bytes──> WebSocketHandler ──get_frame──> inner.on_message(payload)
//! socket <──frame── WebSocketHandler <──make_frame── inner raw send
//! ```

use crate::codec::{get_frame, make_frame, FrameDecode, FrameType, Opcode};
use crate::traits::{HandlerState, MessageFn, SendFn, StreamHandler};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

const HANDSHAKE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsState {
    New,
    AwaitingHandshake,
    Handshook,
}

/// WebSocket handshake + framing, optionally wrapping another handler
pub struct WebSocketHandler {
    host: String,
    state: WsState,
    raw_send: Arc<RwLock<Option<SendFn>>>,
    handshook: Arc<AtomicBool>,
    inner: Option<Box<dyn StreamHandler>>,
    on_message: Option<MessageFn>,
    buffer: Vec<u8>,
}

impl WebSocketHandler {
    /// Create a handler for `host`. The inner handler, if any, is rebound to
    /// send through this handler's framing function.
    pub fn new(host: impl Into<String>, inner: Option<Box<dyn StreamHandler>>) -> Self {
        let raw_send = Arc::new(RwLock::new(None));
        let handshook = Arc::new(AtomicBool::new(false));

        let inner = inner.map(|mut handler| {
            handler.set_send_function(framed_sender(Arc::clone(&raw_send), Arc::clone(&handshook)));
            handler
        });

        Self {
            host: host.into(),
            state: WsState::New,
            raw_send,
            handshook,
            inner,
            on_message: None,
            buffer: Vec::new(),
        }
    }

    /// Receives text payloads when no inner handler is bound
    pub fn set_message_function(&mut self, callback: MessageFn) {
        self.on_message = Some(callback);
    }

    pub fn state(&self) -> WsState {
        self.state
    }

    fn upgrade_request(&self) -> String {
        format!(
            "GET / HTTP/1.1\r\n\
             Host: {}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {}\r\n\
             Sec-WebSocket-Version: 13\r\n\r\n",
            self.host, HANDSHAKE_KEY
        )
    }

    fn send_raw(&self, bytes: &[u8]) -> bool {
        match self.raw_send.read().as_ref() {
            Some(send) => send(bytes),
            None => false,
        }
    }

    fn handle_handshake(&mut self) -> HandlerState {
        let Some(end) = find(&self.buffer, HEADER_TERMINATOR) else {
            if status_code(&self.buffer) == Some(400) {
                warn!(host = %self.host, "WebSocket upgrade rejected (400)");
                return HandlerState::HandlerError;
            }
            return HandlerState::AwaitingResponse;
        };

        let status = status_code(&self.buffer[..end]);
        if status != Some(101) {
            warn!(host = %self.host, ?status, "WebSocket upgrade rejected");
            return HandlerState::HandlerError;
        }

        self.buffer.drain(..end + HEADER_TERMINATOR.len());
        self.state = WsState::Handshook;
        self.handshook.store(true, Ordering::Release);
        debug!(host = %self.host, "WebSocket handshake complete");

        let state = match self.inner.as_mut() {
            Some(inner) => inner.on_connect(),
            None => HandlerState::Connected,
        };

        if self.buffer.is_empty() || state == HandlerState::HandlerError {
            state
        } else {
            state.merge(self.handle_frames())
        }
    }

    fn handle_frames(&mut self) -> HandlerState {
        let mut result: Option<HandlerState> = None;

        while let FrameDecode::Complete(frame) = get_frame(&self.buffer) {
            self.buffer.drain(..frame.consumed);

            let state = match frame.frame_type {
                FrameType::Text if !frame.payload.is_empty() => match self.inner.as_mut() {
                    Some(inner) => inner.on_message(&frame.payload),
                    None => {
                        if let Some(ref callback) = self.on_message {
                            callback(&String::from_utf8_lossy(&frame.payload));
                        }
                        HandlerState::MessageReceived
                    }
                },
                FrameType::Ping => {
                    trace!(host = %self.host, "WebSocket ping");
                    if self.send_raw(&make_frame(Opcode::Pong, &frame.payload, true)) {
                        HandlerState::AwaitingResponse
                    } else {
                        HandlerState::HandlerError
                    }
                }
                FrameType::Pong => HandlerState::AwaitingResponse,
                FrameType::Error => {
                    debug!(host = %self.host, "WebSocket close or invalid frame");
                    HandlerState::HandlerError
                }
                _ => HandlerState::UnhandledResponse,
            };

            result = Some(match result {
                Some(previous) => previous.merge(state),
                None => state,
            });
            if state == HandlerState::HandlerError {
                break;
            }
        }

        result.unwrap_or(HandlerState::AwaitingResponse)
    }
}

impl StreamHandler for WebSocketHandler {
    fn on_connect(&mut self) -> HandlerState {
        debug_assert!(
            self.raw_send.read().is_some(),
            "WebSocketHandler connected without a send function"
        );

        self.buffer.clear();
        self.handshook.store(false, Ordering::Release);

        let request = self.upgrade_request();
        if !self.send_raw(request.as_bytes()) {
            return HandlerState::HandlerError;
        }

        self.state = WsState::AwaitingHandshake;
        HandlerState::AwaitingResponse
    }

    fn on_message(&mut self, data: &[u8]) -> HandlerState {
        self.buffer.extend_from_slice(data);
        match self.state {
            WsState::New => HandlerState::UnhandledResponse,
            WsState::AwaitingHandshake => self.handle_handshake(),
            WsState::Handshook => self.handle_frames(),
        }
    }

    fn send_message(&mut self, data: &[u8]) -> bool {
        if self.state != WsState::Handshook {
            return false;
        }
        match self.inner.as_mut() {
            Some(inner) => inner.send_message(data),
            None => self.send_raw(&make_frame(Opcode::Text, data, true)),
        }
    }

    fn set_send_function(&mut self, send: SendFn) {
        *self.raw_send.write() = Some(send);
    }
}

/// Send function handed to the inner handler: frames each write as a
/// masked text frame.
fn framed_sender(raw_send: Arc<RwLock<Option<SendFn>>>, handshook: Arc<AtomicBool>) -> SendFn {
    Arc::new(move |payload: &[u8]| {
        if !handshook.load(Ordering::Acquire) {
            return false;
        }
        match raw_send.read().as_ref() {
            Some(send) => send(&make_frame(Opcode::Text, payload, true)),
            None => false,
        }
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

/// Status code from an HTTP status line, if one is complete
fn status_code(bytes: &[u8]) -> Option<u16> {
    let line_end = find(bytes, b"\r\n")?;
    let line = std::str::from_utf8(&bytes[..line_end]).ok()?;
    let mut parts = line.split_whitespace();
    if !parts.next()?.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}
