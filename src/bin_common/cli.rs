//! CLI utilities for binaries
//!
//! Handles configuration path resolution and arguments
//! for all binary executables.

use std::path::PathBuf;

/// Environment variable overriding the configuration path
pub const CONFIG_PATH_ENV: &str = "CHATLINK_CONFIG_PATH";

/// Configuration path used when the variable is unset
pub const DEFAULT_CONFIG_PATH: &str = "config/chatlink.yaml";

/// Load configuration path from environment or use default
///
/// # Examples
/// ```
/// use chatlink_app::bin_common::load_config_from_env;
///
/// let path = load_config_from_env();
/// ```
pub fn load_config_from_env() -> PathBuf {
    std::env::var(CONFIG_PATH_ENV)
        .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
        .into()
}

/// Parse command line arguments for a binary
///
/// Returns a vector of arguments (excluding the program name)
pub fn parse_args() -> Vec<String> {
    std::env::args().skip(1).collect()
}
