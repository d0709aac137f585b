//! Channel connection manager
//!
//! One `ChatChannel` per logical channel. Work happens on three threads:
//!
//! ```text
//! consumer   connect() ──> epoch = reserve id, state Connecting ──> requester.get()
//! requester  host list ──> parse + rank ──> io.open_stream(epoch)
//! I/O        created / events ──> rotation + handler ──> post_state / keyword events
//! consumer   dispatch_events() ──> epoch check ──> state change, callbacks, subscribers
//! ```
//!
//! Every notification is posted to the dispatch queue tagged with the epoch
//! it was produced under; a reconnect or disconnect changes the epoch and
//! so silently cancels notifications still in flight.

use super::hosts::{parse_host_list, CandidateHost};
use super::link::{build_handler, stream_sender, TransportContext};
use super::rotation::HostRotation;
use crate::core::{AtomicConnectionState, ConnectionState, Stream, StreamEvent, StreamId};
use crate::error::{ChatError, Result};
use crate::protocol::{IrcHandler, IrcMessage};
use crate::traits::{HandlerState, HttpResponse, StreamHandler};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use regex::{Regex, RegexBuilder};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Identifies a registered callback
pub type CallbackToken = u64;

/// Receives every connection state change
pub type StateCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Receives `(matched_text, username)` for each keyword match
pub type KeywordCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

static NEXT_CALLBACK_TOKEN: AtomicU64 = AtomicU64::new(1);

fn next_callback_token() -> CallbackToken {
    NEXT_CALLBACK_TOKEN.fetch_add(1, Ordering::Relaxed)
}

/// Notification delivered to subscribers on the consumer thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    StateChanged(ConnectionState),
    KeywordMatched {
        keyword: String,
        matched: String,
        username: String,
    },
}

#[derive(Default)]
struct CallbackRegistry {
    state: BTreeMap<CallbackToken, StateCallback>,
    keyword: BTreeMap<CallbackToken, (String, KeywordCallback)>,
}

/// Connection attempt state, touched only from I/O thread callbacks
#[derive(Default)]
struct ChannelLink {
    rotation: HostRotation,
    handler: Option<Box<dyn StreamHandler>>,
    successful: bool,
    rejected: bool,
}

struct ChannelInner {
    id: String,
    ctx: TransportContext,
    epoch: AtomicU64,
    state: AtomicConnectionState,
    registry: Mutex<CallbackRegistry>,
    keywords: RwLock<BTreeMap<String, Regex>>,
    subscribers: Mutex<Vec<Sender<ChannelEvent>>>,
    link: Mutex<ChannelLink>,
    /// Why the channel last entered `Error`; cleared by a new connect
    last_error: Mutex<Option<String>>,
}

/// Handle to one logical chat channel. Clones share the same channel.
#[derive(Clone)]
pub struct ChatChannel {
    inner: Arc<ChannelInner>,
}

impl ChatChannel {
    pub(crate) fn new(id: impl Into<String>, ctx: TransportContext) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                id: id.into().to_lowercase(),
                ctx,
                epoch: AtomicU64::new(StreamId::INVALID.as_u64()),
                state: AtomicConnectionState::default(),
                registry: Mutex::new(CallbackRegistry::default()),
                keywords: RwLock::new(BTreeMap::new()),
                subscribers: Mutex::new(Vec::new()),
                link: Mutex::new(ChannelLink::default()),
                last_error: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.is_connected()
    }

    /// Reason for the current or most recent `Error` state
    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.lock().clone()
    }

    /// Stream id of the current connection cycle
    pub fn epoch(&self) -> StreamId {
        self.inner.current_epoch()
    }

    /// Start a connection cycle. A no-op while `Connecting` or `Connected`.
    ///
    /// `Connecting` is claimed atomically, so concurrent callers start at
    /// most one cycle.
    pub fn connect(&self) -> Result<()> {
        let inner = &self.inner;
        if !inner.ctx.io.is_running() {
            return Err(ChatError::Shutdown);
        }
        let Some(previous) = inner.claim_connecting() else {
            debug!(channel = %inner.id, state = %inner.state.get(), "Connect ignored");
            return Ok(());
        };

        let epoch = inner.ctx.io.reserve_stream_id();
        inner.epoch.store(epoch.as_u64(), Ordering::Release);
        *inner.last_error.lock() = None;
        inner.announce(previous, ConnectionState::Connecting);

        let url = inner.ctx.config.channel_servers_url(&inner.id);
        info!(channel = %inner.id, %url, "Requesting host list");

        let weak = Arc::downgrade(&self.inner);
        inner.ctx.requester.get(
            &url,
            inner.ctx.host_list_headers(),
            Box::new(move |response| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_host_list(epoch, response);
                }
            }),
        );
        Ok(())
    }

    /// Close the current stream and discard its pending notifications.
    /// `Error` persists; any other state becomes `Disconnected`.
    pub fn disconnect(&self) {
        let inner = &self.inner;
        let previous = StreamId::from_raw(inner.epoch.swap(StreamId::INVALID.as_u64(), Ordering::AcqRel));
        if previous.is_valid() {
            debug!(channel = %inner.id, stream_id = %previous, "Disconnecting");
            if let Err(e) = inner.ctx.io.close_stream(previous) {
                debug!(channel = %inner.id, error = %e, "Close not posted");
            }
        }
        inner.change_state(StreamId::INVALID, ConnectionState::Disconnected);
    }

    pub fn register_connection_state_change<F>(&self, callback: F) -> CallbackToken
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        let token = next_callback_token();
        self.inner.registry.lock().state.insert(token, Arc::new(callback));
        token
    }

    pub fn unregister_connection_state_change(&self, token: CallbackToken) {
        self.inner.registry.lock().state.remove(&token);
    }

    /// Register a case-insensitive regular expression searched in every
    /// chat message. Tokens registered with the same pattern share one
    /// compiled expression.
    pub fn register_keyword<F>(&self, pattern: &str, callback: F) -> Result<CallbackToken>
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        {
            let mut keywords = self.inner.keywords.write();
            if !keywords.contains_key(pattern) {
                let regex = RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| ChatError::InvalidKeyword {
                        pattern: pattern.to_string(),
                        reason: e.to_string(),
                    })?;
                keywords.insert(pattern.to_string(), regex);
            }
        }

        let callback: KeywordCallback = Arc::new(callback);
        let token = next_callback_token();
        self.inner
            .registry
            .lock()
            .keyword
            .insert(token, (pattern.to_string(), callback));
        Ok(token)
    }

    pub fn unregister_keyword(&self, token: CallbackToken) {
        let mut registry = self.inner.registry.lock();
        let Some((pattern, _)) = registry.keyword.remove(&token) else {
            return;
        };
        let still_used = registry.keyword.values().any(|(p, _)| *p == pattern);
        drop(registry);

        if !still_used {
            self.inner.keywords.write().remove(&pattern);
        }
    }

    /// Receive state changes and keyword matches as they are dispatched
    pub fn subscribe(&self) -> Receiver<ChannelEvent> {
        let (tx, rx) = unbounded();
        self.inner.subscribers.lock().push(tx);
        rx
    }
}

impl ChannelInner {
    fn current_epoch(&self) -> StreamId {
        StreamId::from_raw(self.epoch.load(Ordering::Acquire))
    }

    fn is_current(&self, epoch: StreamId) -> bool {
        self.current_epoch() == epoch
    }

    /// Move to `Connecting` unless already active. Returns the state left.
    fn claim_connecting(&self) -> Option<ConnectionState> {
        loop {
            let current = self.state.get();
            if current.is_active() {
                return None;
            }
            if self.state.transition(current, ConnectionState::Connecting) {
                return Some(current);
            }
        }
    }

    /* requester thread */

    fn on_host_list(self: &Arc<Self>, epoch: StreamId, response: Result<HttpResponse>) {
        if !self.is_current(epoch) {
            trace!(channel = %self.id, stream_id = %epoch, "Discarding stale host list");
            return;
        }

        let hosts = match response {
            Ok(response) if response.is_success() => match parse_host_list(&response.body, &self.ctx.config) {
                Ok(hosts) => hosts,
                Err(e) => {
                    warn!(channel = %self.id, error = %e, "Error parsing host list");
                    self.post_error(epoch, e);
                    return;
                }
            },
            Ok(response) => {
                warn!(channel = %self.id, status = response.status, "Error retrieving host list");
                self.post_error(epoch, ChatError::HostList(format!("HTTP status {}", response.status)));
                return;
            }
            Err(e) => {
                warn!(channel = %self.id, error = %e, "Error retrieving host list");
                self.post_error(epoch, e);
                return;
            }
        };
        debug!(channel = %self.id, count = hosts.len(), "Host list received");

        let on_event = Arc::downgrade(self);
        let on_created = Arc::downgrade(self);
        let opened = self.ctx.io.open_stream(
            epoch,
            format!("channel:{}", self.id),
            move |stream: &mut Stream, event| match on_event.upgrade() {
                Some(inner) => inner.on_stream_event(stream, event),
                None => {
                    if !matches!(event, StreamEvent::Close | StreamEvent::Destroy) {
                        stream.close();
                    }
                }
            },
            move |stream: &mut Stream| match on_created.upgrade() {
                Some(inner) => inner.on_stream_created(stream, hosts),
                None => stream.close(),
            },
        );

        if let Err(e) = opened {
            warn!(channel = %self.id, error = %e, "Failed to open stream");
            self.post_error(epoch, e);
        }
    }

    /* I/O thread */

    fn on_stream_created(self: &Arc<Self>, stream: &mut Stream, hosts: Vec<CandidateHost>) {
        if !self.is_current(stream.id()) {
            debug!(channel = %self.id, stream_id = %stream.id(), "Stream created for a stale epoch");
            stream.close();
            return;
        }

        let mut link = self.link.lock();
        link.rotation.replace(hosts);
        link.handler = None;
        link.successful = false;
        link.rejected = false;
        self.attempt_next(stream, &mut link);
    }

    fn attempt_next(self: &Arc<Self>, stream: &mut Stream, link: &mut ChannelLink) {
        let epoch = stream.id();
        match link.rotation.attempt(|host| stream.connect(&host.address, host.port)) {
            Some(host) => {
                link.handler = Some(self.make_handler(&host, epoch));
            }
            None => {
                warn!(channel = %self.id, "Failed to connect to the chat server: all candidates failed");
                link.handler = None;
                link.rotation.reset();
                self.post_error(epoch, ChatError::Connection("all candidates failed".to_string()));
            }
        }
    }

    fn make_handler(self: &Arc<Self>, host: &CandidateHost, epoch: StreamId) -> Box<dyn StreamHandler> {
        let config = &self.ctx.config;
        let mut irc = IrcHandler::new(config.user.clone(), config.password.clone(), Some(self.id.as_str()))
            .with_ping_token(config.ping_token.clone());

        let weak = Arc::downgrade(self);
        irc.set_message_function(Arc::new(move |line: &str| {
            if let Some(inner) = weak.upgrade() {
                inner.on_chat_line(epoch, line);
            }
        }));

        build_handler(host, irc, stream_sender(self.ctx.io.clone(), epoch))
    }

    fn on_stream_event(self: &Arc<Self>, stream: &mut Stream, event: StreamEvent) {
        let epoch = stream.id();
        if !self.is_current(epoch) {
            if !matches!(event, StreamEvent::Close | StreamEvent::Destroy) {
                trace!(channel = %self.id, stream_id = %epoch, "Closing stream of a stale epoch");
                stream.close();
            }
            return;
        }

        let mut link = self.link.lock();
        match event {
            StreamEvent::Connect => {
                let state = link
                    .handler
                    .as_mut()
                    .map_or(HandlerState::HandlerError, |handler| handler.on_connect());
                if state == HandlerState::HandlerError {
                    // Close fails over to the next candidate
                    warn!(channel = %self.id, host = ?link.rotation.current().map(|h| h.to_string()), "Handler failed on connect");
                    stream.close();
                }
            }
            StreamEvent::Data(bytes) => {
                let state = link
                    .handler
                    .as_mut()
                    .map_or(HandlerState::UnhandledResponse, |handler| handler.on_message(&bytes));
                match state {
                    HandlerState::Connected if !link.successful => {
                        link.successful = true;
                        if let Some(host) = link.rotation.current() {
                            info!(channel = %self.id, host = %host, "Connected to chat server");
                        }
                        self.post_state(epoch, ConnectionState::Connected);
                    }
                    HandlerState::HandlerError => self.reject(stream, &mut link, "protocol rejected"),
                    _ => {}
                }
            }
            StreamEvent::Error(reason) => {
                if link.successful {
                    warn!(channel = %self.id, reason = %reason, "Connection error");
                    self.post_error(epoch, ChatError::Connection(reason));
                } else {
                    debug!(channel = %self.id, reason = %reason, "Connect attempt error");
                }
            }
            StreamEvent::Timeout => {
                debug!(channel = %self.id, host = ?link.rotation.current(), "Connect attempt timed out");
            }
            StreamEvent::Close => {
                link.handler = None;
                if link.successful {
                    info!(channel = %self.id, "Disconnected from chat server");
                    link.successful = false;
                    link.rejected = false;
                    link.rotation.reset();
                    self.post_state(epoch, ConnectionState::Disconnected);
                } else if link.rejected {
                    link.rejected = false;
                    link.rotation.reset();
                } else {
                    if let Some(host) = link.rotation.mark_current_failed() {
                        warn!(channel = %self.id, host = %host, "Connection attempt failed");
                    }
                    self.attempt_next(stream, &mut link);
                }
            }
            StreamEvent::Destroy => {
                link.handler = None;
            }
        }
    }

    /// Protocol-level rejection: surfaces as `Error`, no failover
    fn reject(self: &Arc<Self>, stream: &mut Stream, link: &mut ChannelLink, reason: &str) {
        warn!(channel = %self.id, host = ?link.rotation.current().map(|h| h.to_string()), reason, "Chat server rejected the connection");
        link.rejected = true;
        self.post_error(stream.id(), ChatError::Protocol(reason.to_string()));
        stream.close();
    }

    /// Search a received line for registered keywords
    fn on_chat_line(self: &Arc<Self>, epoch: StreamId, line: &str) {
        let Some(message) = IrcMessage::parse(line) else {
            return;
        };
        if !message.is("PRIVMSG") || message.params.len() < 2 {
            return;
        }
        let (Some(text), Some(username)) = (message.text(), message.nick()) else {
            return;
        };

        let keywords = self.keywords.read();
        for (keyword, regex) in keywords.iter() {
            if let Some(found) = regex.find(text) {
                let weak = Arc::downgrade(self);
                let keyword = keyword.clone();
                let matched = found.as_str().to_string();
                let username = username.to_string();
                self.ctx.dispatch.post(move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.keyword_event(epoch, keyword, matched, username);
                    }
                });
            }
        }
    }

    /* any thread */

    fn post_state(self: &Arc<Self>, epoch: StreamId, state: ConnectionState) {
        let weak = Arc::downgrade(self);
        self.ctx.dispatch.post(move || {
            if let Some(inner) = weak.upgrade() {
                inner.change_state(epoch, state);
            }
        });
    }

    fn post_error(self: &Arc<Self>, epoch: StreamId, error: ChatError) {
        let weak = Arc::downgrade(self);
        self.ctx.dispatch.post(move || {
            if let Some(inner) = weak.upgrade() {
                inner.enter_error(epoch, error);
            }
        });
    }

    /* consumer thread */

    fn change_state(&self, epoch: StreamId, state: ConnectionState) {
        if !self.is_current(epoch) {
            trace!(channel = %self.id, stream_id = %epoch, %state, "Discarding stale state change");
            return;
        }

        let previous = self.state.get();
        if previous == state || (state == ConnectionState::Disconnected && previous == ConnectionState::Error) {
            return;
        }
        if !self.state.transition(previous, state) {
            trace!(channel = %self.id, %state, "State changed concurrently");
            return;
        }
        self.announce(previous, state);
    }

    fn enter_error(&self, epoch: StreamId, error: ChatError) {
        if !self.is_current(epoch) {
            trace!(channel = %self.id, stream_id = %epoch, "Discarding stale error");
            return;
        }
        *self.last_error.lock() = Some(error.to_string());
        self.change_state(epoch, ConnectionState::Error);
    }

    /// Log and deliver a state change already stored
    fn announce(&self, previous: ConnectionState, state: ConnectionState) {
        info!(channel = %self.id, from = %previous, to = %state, "Connection state changed");
        self.notify(ChannelEvent::StateChanged(state));

        // Tokens are snapshotted so callbacks may unregister themselves or others
        let tokens: Vec<CallbackToken> = self.registry.lock().state.keys().copied().collect();
        for token in tokens {
            let callback = self.registry.lock().state.get(&token).cloned();
            if let Some(callback) = callback {
                callback(state);
            }
        }
    }

    fn keyword_event(&self, epoch: StreamId, keyword: String, matched: String, username: String) {
        if !self.is_current(epoch) {
            trace!(channel = %self.id, stream_id = %epoch, "Discarding stale keyword event");
            return;
        }

        let callbacks: Vec<KeywordCallback> = self
            .registry
            .lock()
            .keyword
            .values()
            .filter(|(pattern, _)| *pattern == keyword)
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in callbacks {
            callback(&matched, &username);
        }

        self.notify(ChannelEvent::KeywordMatched {
            keyword,
            matched,
            username,
        });
    }

    fn notify(&self, event: ChannelEvent) {
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}
