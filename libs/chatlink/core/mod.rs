//! # Chatlink Core
//!
//! Runtime pieces shared by every connection manager:
//!
//! - **IoCore**: the single background thread owning all sockets
//! - **Stream / StreamEvent**: one socket and its lifecycle events
//! - **DispatchQueue**: deferred callbacks drained on the consumer thread
//! - **AtomicConnectionState**: lock-free channel state
//! - **TransportConfig**: YAML configuration with environment overrides

pub mod config;
pub mod connection_state;
pub mod dispatch;
pub mod io_core;
pub mod stream;

pub use config::{ConfigError, PortRule, TransportConfig};
pub use connection_state::{AtomicConnectionState, ConnectionState};
pub use dispatch::DispatchQueue;
pub use io_core::{IoCore, StreamEventHandler};
pub use stream::{SocketState, Stream, StreamEvent, StreamId};
