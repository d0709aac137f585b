use thiserror::Error;

/// Main error type for chatlink
#[derive(Error, Debug)]
pub enum ChatError {
    /// No candidate host could be reached
    #[error("Connection error: {0}")]
    Connection(String),

    /// Handshake or authentication rejected by the server
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// One-shot send without a registered token for the sender
    #[error("No credentials registered for '{0}'")]
    MissingCredential(String),

    /// Host list request failed or returned an unexpected payload
    #[error("Host list error: {0}")]
    HostList(String),

    /// Keyword pattern failed to compile
    #[error("Invalid keyword pattern '{pattern}': {reason}")]
    InvalidKeyword { pattern: String, reason: String },

    /// Socket level failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP requester failure
    #[error("HTTP error: {0}")]
    Http(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The I/O core is no longer running
    #[error("I/O core has been shut down")]
    Shutdown,
}

impl From<crate::core::ConfigError> for ChatError {
    fn from(e: crate::core::ConfigError) -> Self {
        ChatError::Configuration(e.to_string())
    }
}

/// Result type for chatlink operations
pub type Result<T> = std::result::Result<T, ChatError>;
