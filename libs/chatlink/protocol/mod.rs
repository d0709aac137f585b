//! Stream handlers for the two wire protocols
//!
//! - **IrcHandler**: PASS/NICK authentication, optional JOIN, keep-alive PING
//! - **WebSocketHandler**: HTTP Upgrade + frame codec, optionally wrapping
//!   another handler

pub mod irc;
pub mod message;
pub mod websocket;

pub use irc::{IrcHandler, IrcState};
pub use message::{IrcCommands, IrcMessage};
pub use websocket::{WebSocketHandler, WsState};
