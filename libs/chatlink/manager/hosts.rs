//! Candidate hosts and host-list parsing
//!
//! The host-list endpoint answers with JSON of the form
//! `{"servers": ["host:port", ...], "websockets_servers": ["host:port", ...]}`.
//! Each entry becomes a [`CandidateHost`] whose priority and TLS flag come
//! from the configured port rules.

use crate::core::TransportConfig;
use crate::error::{ChatError, Result};
use serde_json::Value;
use std::fmt;

const IRC_SERVERS_KEY: &str = "servers";
const WEBSOCKET_SERVERS_KEY: &str = "websockets_servers";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostKind {
    /// Plain IRC over TCP
    Raw,
    /// IRC tunneled over WebSocket frames
    WebSocket,
}

impl fmt::Display for HostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostKind::Raw => f.write_str("IRC"),
            HostKind::WebSocket => f.write_str("WebSocket"),
        }
    }
}

/// One entry considered during failover
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateHost {
    pub address: String,
    pub port: u16,
    /// Lower is preferred; negative entries are never attempted
    pub priority: i32,
    pub kind: HostKind,
    pub ssl: bool,
    pub connection_failed: bool,
}

impl CandidateHost {
    pub fn new(address: impl Into<String>, port: u16, priority: i32, kind: HostKind) -> Self {
        Self {
            address: address.into(),
            port,
            priority,
            kind,
            ssl: false,
            connection_failed: false,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.address.is_empty() && self.port != 0 && self.priority >= 0
    }

    pub fn is_websocket(&self) -> bool {
        self.kind == HostKind::WebSocket
    }
}

impl fmt::Display for CandidateHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.address, self.port, self.kind)
    }
}

/// Build the ranked candidate list from a host-list response body.
///
/// Entries with negative priority are dropped; the rest are sorted by
/// ascending priority, keeping response order among equal priorities.
pub fn parse_host_list(body: &Value, config: &TransportConfig) -> Result<Vec<CandidateHost>> {
    let mut hosts = Vec::new();
    collect_hosts(&mut hosts, body, IRC_SERVERS_KEY, HostKind::Raw, config)?;
    collect_hosts(&mut hosts, body, WEBSOCKET_SERVERS_KEY, HostKind::WebSocket, config)?;
    hosts.sort_by_key(|host| host.priority);
    Ok(hosts)
}

fn collect_hosts(
    hosts: &mut Vec<CandidateHost>,
    body: &Value,
    key: &str,
    kind: HostKind,
    config: &TransportConfig,
) -> Result<()> {
    let Some(entries) = body.get(key) else {
        return Ok(());
    };
    let entries = entries
        .as_array()
        .ok_or_else(|| ChatError::HostList(format!("'{}' is not an array", key)))?;

    let websocket = kind == HostKind::WebSocket;
    for entry in entries {
        let entry = entry
            .as_str()
            .ok_or_else(|| ChatError::HostList(format!("'{}' entry is not a string", key)))?;
        let (address, port) = split_host_port(entry)?;

        let mut host = CandidateHost::new(address, port, config.port_priority(port, websocket), kind);
        host.ssl = config.is_port_ssl(port, websocket);
        if host.is_valid() {
            hosts.push(host);
        }
    }
    Ok(())
}

fn split_host_port(entry: &str) -> Result<(&str, u16)> {
    let (address, port) = entry
        .rsplit_once(':')
        .ok_or_else(|| ChatError::HostList(format!("missing port in '{}'", entry)))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| ChatError::HostList(format!("invalid port in '{}'", entry)))?;
    Ok((address, port))
}
