//! # Chatlink Traits
//!
//! Core traits and types shared by the transport:
//!
//! - **StreamHandler**: protocol state machine bound to one connection attempt
//! - **HandlerState**: status a handler reports after each event
//! - **HostListRequester**: external HTTP collaborator used for host discovery
//! - **ChatError**: error taxonomy

pub mod error;
pub mod handler;
pub mod requester;

pub use error::{ChatError, Result};
pub use handler::{HandlerState, MessageFn, SendFn, StreamHandler};
pub use requester::{Headers, HostListRequester, HttpCallback, HttpResponse};
