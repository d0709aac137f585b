use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config file: {0}")]
    FileError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Connection preference for one port of the host list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRule {
    pub port: u16,
    /// Lower is preferred, negative excludes the port
    pub priority: i32,
    #[serde(default)]
    pub ssl: bool,
}

impl PortRule {
    pub fn new(port: u16, priority: i32, ssl: bool) -> Self {
        Self { port, priority, ssl }
    }
}

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Host serving the `/servers` host-list endpoint
    pub api_server: String,
    /// Sent as the `Client-ID` header on host-list requests
    pub client_id: String,
    /// IRC nickname used by channel connections
    pub user: String,
    /// IRC password (`oauth:` token) used by channel connections
    pub password: String,
    pub irc_ports: Vec<PortRule>,
    pub websocket_ports: Vec<PortRule>,
    /// Priority for ports without a rule
    pub unlisted_port_priority: i32,
    /// Readiness wait of the I/O loop
    pub select_timeout_ms: u64,
    /// Deadline for a single connect attempt
    pub connect_timeout_ms: u64,
    pub read_buffer_size: usize,
    /// Argument of the keep-alive PING sent after each message
    pub ping_token: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            api_server: "api.twitch.tv".to_string(),
            client_id: String::new(),
            user: "justinfan12345".to_string(),
            password: "blah".to_string(),
            irc_ports: vec![
                PortRule::new(6667, 0, false),
                PortRule::new(80, 1, false),
                PortRule::new(443, -1, true),
            ],
            websocket_ports: vec![PortRule::new(80, 2, false), PortRule::new(443, -1, true)],
            unlisted_port_priority: 10,
            select_timeout_ms: 1000,
            connect_timeout_ms: 10_000,
            read_buffer_size: 4096,
            ping_token: "chatlink".to_string(),
        }
    }
}

impl TransportConfig {
    /// Load configuration from a YAML file, apply environment overrides,
    /// and validate
    pub fn load(config_path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let yaml_content = std::fs::read_to_string(config_path)?;
        let mut config: TransportConfig = serde_yaml::from_str(&yaml_content)?;

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Override credentials and endpoints from `CHATLINK_*` variables
    pub fn apply_env_overrides(&mut self) {
        if let Ok(user) = std::env::var("CHATLINK_USER") {
            info!("Overriding user from environment variable");
            self.user = user;
        }
        if let Ok(password) = std::env::var("CHATLINK_PASSWORD") {
            info!("Overriding password from environment variable");
            self.password = password;
        }
        if let Ok(client_id) = std::env::var("CHATLINK_CLIENT_ID") {
            self.client_id = client_id;
        }
        if let Ok(api_server) = std::env::var("CHATLINK_API_SERVER") {
            info!("Overriding API server from environment variable");
            self.api_server = api_server;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_server.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "api_server must not be empty".to_string(),
            ));
        }

        if self.user.trim().is_empty() {
            return Err(ConfigError::ValidationError("user must not be empty".to_string()));
        }

        if self.select_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "select_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "connect_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.read_buffer_size == 0 {
            return Err(ConfigError::ValidationError(
                "read_buffer_size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Priority for `port`; a negative value excludes it
    pub fn port_priority(&self, port: u16, websocket: bool) -> i32 {
        self.port_rule(port, websocket)
            .map(|rule| rule.priority)
            .unwrap_or(self.unlisted_port_priority)
    }

    /// Whether `port` is configured as TLS
    pub fn is_port_ssl(&self, port: u16, websocket: bool) -> bool {
        self.port_rule(port, websocket).map(|rule| rule.ssl).unwrap_or(false)
    }

    fn port_rule(&self, port: u16, websocket: bool) -> Option<&PortRule> {
        let rules = if websocket {
            &self.websocket_ports
        } else {
            &self.irc_ports
        };
        rules.iter().find(|rule| rule.port == port)
    }

    pub fn select_timeout(&self) -> Duration {
        Duration::from_millis(self.select_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Host-list endpoint for a channel
    pub fn channel_servers_url(&self, channel: &str) -> String {
        format!("https://{}/servers?channel={}", self.api_server, channel)
    }

    /// Host-list endpoint for one-shot (group) sends
    pub fn group_servers_url(&self) -> String {
        format!("https://{}/servers?cluster=group", self.api_server)
    }

    /// Log configuration summary
    pub fn log(&self) {
        info!("Configuration loaded:");
        info!("  API server: {}", self.api_server);
        info!("  User: {}", self.user);
        info!("  IRC ports: {:?}", self.irc_ports);
        info!("  WebSocket ports: {:?}", self.websocket_ports);
        info!("  Connect timeout: {} ms", self.connect_timeout_ms);
    }
}
