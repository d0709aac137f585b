//! Chatlink - Main Library
//!
//! Re-exports the chat transport and the helpers shared by its binaries.
//!
//! ## Architecture
//!
//! - **bin_common**: Common utilities for binary executables (CLI, logging, shutdown)
//! - **chatlink**: IRC/WebSocket chat transport (re-exported from workspace)
//!
//! ## Usage in Binaries
//!
//! ```rust
//! use chatlink_app::bin_common::{init_tracing, load_config_from_env};
//! use chatlink_app::chatlink::ChatTransport;
//! ```

// Re-export workspace libraries for convenience
pub use chatlink;

// Binary common utilities
pub mod bin_common {
    //! Common utilities for binary executables

    pub mod cli;
    pub mod logging;
    pub mod shutdown;

    pub use cli::{load_config_from_env, parse_args, CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};
    pub use logging::init_tracing;
    pub use shutdown::ShutdownManager;
}
