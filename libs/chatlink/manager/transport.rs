//! Top-level transport
//!
//! Owns the I/O core, the dispatch queue, the host-list requester, every
//! channel handle and the whisper credentials. The host application calls
//! [`ChatTransport::dispatch_events`] once per tick to run queued callbacks.

use super::channel::ChatChannel;
use super::http::ReqwestRequester;
use super::link::TransportContext;
use super::whisper::{WhisperResult, Whisperer};
use crate::core::{DispatchQueue, IoCore, TransportConfig};
use crate::error::{ChatError, Result};
use crate::traits::HostListRequester;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

pub struct ChatTransport {
    ctx: TransportContext,
    channels: RwLock<HashMap<String, ChatChannel>>,
    credentials: RwLock<HashMap<String, String>>,
}

impl ChatTransport {
    /// Start the I/O core and build a transport around `requester`
    pub fn new(config: TransportConfig, requester: Arc<dyn HostListRequester>) -> Result<Self> {
        config.validate()?;
        config.log();
        let io = IoCore::start(&config)?;

        Ok(Self {
            ctx: TransportContext {
                config: Arc::new(config),
                io,
                dispatch: DispatchQueue::new(),
                requester,
            },
            channels: RwLock::new(HashMap::new()),
            credentials: RwLock::new(HashMap::new()),
        })
    }

    /// Transport using the bundled reqwest requester
    pub fn with_http(config: TransportConfig) -> Result<Self> {
        Self::new(config, Arc::new(ReqwestRequester::new()?))
    }

    /// Load a YAML configuration file and start a transport around `requester`
    pub fn from_config_file(path: impl AsRef<Path>, requester: Arc<dyn HostListRequester>) -> Result<Self> {
        Self::new(TransportConfig::load(path)?, requester)
    }

    pub fn config(&self) -> &TransportConfig {
        &self.ctx.config
    }

    pub fn io(&self) -> &IoCore {
        &self.ctx.io
    }

    /// Get the channel handle for `id`, creating it on first use
    pub fn channel(&self, id: &str) -> ChatChannel {
        let key = id.to_lowercase();
        if let Some(channel) = self.channels.read().get(&key) {
            return channel.clone();
        }

        self.channels
            .write()
            .entry(key)
            .or_insert_with_key(|key| {
                debug!(channel = %key, "Creating channel");
                ChatChannel::new(key.as_str(), self.ctx.clone())
            })
            .clone()
    }

    pub fn has_channel(&self, id: &str) -> bool {
        self.channels.read().contains_key(&id.to_lowercase())
    }

    /// Disconnect and forget a channel. Returns `false` if it did not exist.
    pub fn destroy_channel(&self, id: &str) -> bool {
        let removed = self.channels.write().remove(&id.to_lowercase());
        match removed {
            Some(channel) => {
                channel.disconnect();
                true
            }
            None => false,
        }
    }

    pub fn disconnect_all(&self) {
        let channels: Vec<ChatChannel> = self.channels.read().values().cloned().collect();
        for channel in channels {
            channel.disconnect();
        }
    }

    pub fn register_credentials(&self, user: &str, token: &str) {
        self.credentials
            .write()
            .insert(user.to_lowercase(), token.to_string());
    }

    pub fn unregister_credentials(&self, user: &str) {
        self.credentials.write().remove(&user.to_lowercase());
    }

    pub fn unregister_all_credentials(&self) {
        self.credentials.write().clear();
    }

    /// Token registered for `user`
    pub fn credentials(&self, user: &str) -> Result<String> {
        let user = user.to_lowercase();
        match self.credentials.read().get(&user) {
            Some(token) => Ok(token.clone()),
            None => Err(ChatError::MissingCredential(user)),
        }
    }

    /// Send one whisper as `sender`. `callback` runs exactly once, from
    /// [`ChatTransport::dispatch_events`].
    pub fn send_whisper<F>(&self, sender: &str, recipient: &str, body: &str, callback: F)
    where
        F: FnOnce(WhisperResult) + Send + 'static,
    {
        let token = self.credentials(sender);
        Whisperer::start(self.ctx.clone(), sender, token, recipient, body, Box::new(callback));
    }

    /// Run every queued callback on the calling thread
    pub fn dispatch_events(&self) -> usize {
        self.ctx.dispatch.drain_and_run()
    }

    pub fn pending_events(&self) -> usize {
        self.ctx.dispatch.len()
    }

    /// Disconnect every channel and stop the I/O core
    pub fn shutdown(&self) {
        if !self.ctx.io.is_running() {
            return;
        }
        info!(channels = self.channels.read().len(), "Shutting down chat transport");
        self.disconnect_all();
        self.ctx.io.shutdown();
    }
}

impl Drop for ChatTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}
