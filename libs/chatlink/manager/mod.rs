//! # Chatlink Managers
//!
//! Connection management on top of the I/O core:
//!
//! - **ChatTransport**: owns the core, the dispatch queue and every channel
//! - **ChatChannel**: one logical channel with failover and keyword matching
//! - **Whisperer**: one-shot sends over the group endpoint
//! - **HostRotation**: ranked candidate list with failure flags
//! - **ReqwestRequester**: default host-list requester

pub mod channel;
pub mod hosts;
pub mod http;
mod link;
pub mod rotation;
pub mod transport;
pub mod whisper;

pub use channel::{CallbackToken, ChannelEvent, ChatChannel, KeywordCallback, StateCallback};
pub use hosts::{parse_host_list, CandidateHost, HostKind};
pub use http::ReqwestRequester;
pub use rotation::HostRotation;
pub use transport::ChatTransport;
pub use whisper::{WhisperCallback, WhisperResult};
