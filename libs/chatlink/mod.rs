//! # Chatlink
//!
//! Chat transport speaking IRC over raw TCP or WebSocket frames.
//!
//! ## Features
//!
//! - **Single I/O thread**: every socket lives on one mio event loop; other
//!   threads reach a stream only by id through queued actions
//! - **Host failover**: candidates from the host-list endpoint are ranked by
//!   configured port priority and attempted in order
//! - **Epoch tagging**: notifications from a previous connection cycle are
//!   discarded on delivery
//! - **Consumer-thread callbacks**: state changes, keyword matches and whisper
//!   results are queued and run from `ChatTransport::dispatch_events`

pub mod traits;
pub mod codec;
pub mod protocol;
pub mod core;
pub mod manager;

// Re-export all traits
pub use traits::*;

pub use self::core::{
    AtomicConnectionState, ConfigError, ConnectionState, DispatchQueue, IoCore, PortRule, Stream,
    StreamEvent, StreamId, TransportConfig,
};

pub use protocol::{IrcHandler, IrcMessage, WebSocketHandler};

pub use manager::{
    CallbackToken, CandidateHost, ChannelEvent, ChatChannel, ChatTransport, HostKind,
    ReqwestRequester, WhisperResult,
};
