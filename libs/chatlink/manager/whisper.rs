//! One-shot whisper sender
//!
//! Resolves the group host list, fails over like a channel, logs in with the
//! sender's token, sends one whisper line and closes the stream after the
//! server answers the keep-alive that follows it. Exactly one
//! [`WhisperResult`] is delivered through the dispatch queue.

use super::hosts::{parse_host_list, CandidateHost};
use super::link::{build_handler, stream_sender, TransportContext};
use super::rotation::HostRotation;
use crate::core::{AtomicConnectionState, ConnectionState, Stream, StreamEvent};
use crate::error::Result;
use crate::protocol::{IrcCommands, IrcHandler};
use crate::traits::{HandlerState, HttpResponse, StreamHandler};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhisperResult {
    Success,
    /// No token registered for the sender
    MissingCredential,
    /// No host accepted the connection, or it dropped before the send
    /// was confirmed
    ConnectionError,
}

impl WhisperResult {
    /// Connection state a send ends in
    pub fn final_state(self) -> ConnectionState {
        match self {
            WhisperResult::Success => ConnectionState::Disconnected,
            WhisperResult::MissingCredential | WhisperResult::ConnectionError => ConnectionState::Failed,
        }
    }
}

impl fmt::Display for WhisperResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WhisperResult::Success => f.write_str("Success"),
            WhisperResult::MissingCredential => f.write_str("MissingCredential"),
            WhisperResult::ConnectionError => f.write_str("ConnectionError"),
        }
    }
}

/// Completion callback, invoked once on the consumer thread
pub type WhisperCallback = Box<dyn FnOnce(WhisperResult) + Send>;

#[derive(Default)]
struct WhisperLink {
    rotation: HostRotation,
    handler: Option<Box<dyn StreamHandler>>,
    successful: bool,
}

pub(crate) struct Whisperer {
    ctx: TransportContext,
    sender: String,
    token: String,
    recipient: String,
    body: String,
    state: AtomicConnectionState,
    completed: AtomicBool,
    callback: Mutex<Option<WhisperCallback>>,
    link: Mutex<WhisperLink>,
}

impl Whisperer {
    fn new(
        ctx: TransportContext,
        sender: &str,
        token: String,
        recipient: &str,
        body: &str,
        callback: WhisperCallback,
    ) -> Arc<Self> {
        Arc::new(Whisperer {
            ctx,
            sender: sender.to_lowercase(),
            token,
            recipient: recipient.to_lowercase(),
            body: body.to_string(),
            state: AtomicConnectionState::new(ConnectionState::Connecting),
            completed: AtomicBool::new(false),
            callback: Mutex::new(Some(callback)),
            link: Mutex::new(WhisperLink::default()),
        })
    }

    /// Start a send with the sender's registered password
    pub(crate) fn start(
        ctx: TransportContext,
        sender: &str,
        token: Result<String>,
        recipient: &str,
        body: &str,
        callback: WhisperCallback,
    ) {
        let (token, missing) = match token {
            Ok(token) => (token, None),
            Err(e) => (String::new(), Some(e)),
        };

        let whisperer = Whisperer::new(ctx, sender, token, recipient, body, callback);
        if let Some(e) = missing {
            warn!(error = %e, "Whisper not sent");
            whisperer.complete(WhisperResult::MissingCredential);
            return;
        }
        if whisperer.token.is_empty() {
            warn!(sender = %whisperer.sender, "Empty token registered for whisper sender");
            whisperer.complete(WhisperResult::MissingCredential);
            return;
        }

        let url = whisperer.ctx.config.group_servers_url();
        debug!(sender = %whisperer.sender, recipient = %whisperer.recipient, %url, "Requesting group host list");

        let pending = Arc::clone(&whisperer);
        whisperer.ctx.requester.get(
            &url,
            whisperer.ctx.host_list_headers(),
            Box::new(move |response| pending.on_host_list(response)),
        );
    }

    /* requester thread */

    fn on_host_list(self: Arc<Self>, response: Result<HttpResponse>) {
        let hosts = match response {
            Ok(response) if response.is_success() => match parse_host_list(&response.body, &self.ctx.config) {
                Ok(hosts) => hosts,
                Err(e) => {
                    warn!(error = %e, "Error parsing group host list");
                    self.complete(WhisperResult::ConnectionError);
                    return;
                }
            },
            Ok(response) => {
                warn!(status = response.status, "Error retrieving group host list");
                self.complete(WhisperResult::ConnectionError);
                return;
            }
            Err(e) => {
                warn!(error = %e, "Error retrieving group host list");
                self.complete(WhisperResult::ConnectionError);
                return;
            }
        };

        let on_event = Arc::clone(&self);
        let on_created = Arc::clone(&self);
        let created = self.ctx.io.create_stream(
            format!("whisper:{}", self.recipient),
            move |stream: &mut Stream, event| on_event.on_stream_event(stream, event),
            move |stream: &mut Stream| on_created.on_stream_created(stream, hosts),
        );

        if let Err(e) = created {
            warn!(error = %e, "Failed to create whisper stream");
            self.complete(WhisperResult::ConnectionError);
        }
    }

    /* I/O thread */

    fn on_stream_created(&self, stream: &mut Stream, hosts: Vec<CandidateHost>) {
        let mut link = self.link.lock();
        link.rotation.replace(hosts);
        self.attempt_next(stream, &mut link);
    }

    fn attempt_next(&self, stream: &mut Stream, link: &mut WhisperLink) {
        match link.rotation.attempt(|host| stream.connect(&host.address, host.port)) {
            Some(host) => {
                let irc = IrcHandler::new(self.sender.clone(), self.token.clone(), None)
                    .with_ping_token(self.ctx.config.ping_token.clone());
                let send = stream_sender(self.ctx.io.clone(), stream.id());
                link.handler = Some(build_handler(&host, irc, send));
            }
            None => {
                warn!("Failed to connect to the chat server: all candidates failed");
                link.handler = None;
                link.rotation.reset();
                self.complete(WhisperResult::ConnectionError);
            }
        }
    }

    fn on_stream_event(&self, stream: &mut Stream, event: StreamEvent) {
        let mut link = self.link.lock();
        match event {
            StreamEvent::Connect => {
                let state = link
                    .handler
                    .as_mut()
                    .map_or(HandlerState::HandlerError, |handler| handler.on_connect());
                if state == HandlerState::HandlerError {
                    // Close fails over to the next candidate
                    warn!(host = ?link.rotation.current().map(|h| h.to_string()), "Whisper handler failed on connect");
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
                        self.state.transition(ConnectionState::Connecting, ConnectionState::Connected);
                        let line = IrcCommands::whisper(&self.recipient, &self.body).to_line();
                        let sent = link
                            .handler
                            .as_mut()
                            .map_or(false, |handler| handler.send_message(line.as_bytes()));
                        if !sent {
                            self.fail(stream);
                        }
                    }
                    HandlerState::MessageSent => {
                        if let Some(host) = link.rotation.current() {
                            info!(host = %host, recipient = %self.recipient, "Whisper sent");
                        }
                        self.complete(WhisperResult::Success);
                        stream.close();
                    }
                    HandlerState::HandlerError => self.fail(stream),
                    _ => {}
                }
            }
            StreamEvent::Error(reason) => debug!(reason = %reason, "Whisper stream error"),
            StreamEvent::Timeout => debug!(host = ?link.rotation.current(), "Whisper connect timed out"),
            StreamEvent::Close => {
                link.handler = None;
                if self.is_completed() {
                    return;
                }
                if link.successful {
                    warn!(recipient = %self.recipient, "Connection lost before the whisper was confirmed");
                    self.complete(WhisperResult::ConnectionError);
                } else {
                    if let Some(host) = link.rotation.mark_current_failed() {
                        warn!(host = %host, "Whisper connection attempt failed");
                    }
                    self.attempt_next(stream, &mut link);
                }
            }
            StreamEvent::Destroy => {
                link.handler = None;
                self.complete(WhisperResult::ConnectionError);
            }
        }
    }

    fn fail(&self, stream: &mut Stream) {
        self.complete(WhisperResult::ConnectionError);
        stream.close();
    }

    /* any thread */

    fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Deliver the result once; later calls are ignored
    fn complete(&self, result: WhisperResult) {
        if self.completed.swap(true, Ordering::AcqRel) {
            return;
        }

        let previous = self.state.swap(result.final_state());
        debug!(recipient = %self.recipient, %result, from = %previous, to = %result.final_state(), "Whisper completed");

        if let Some(callback) = self.callback.lock().take() {
            self.ctx.dispatch.post(move || callback(result));
        }
    }
}
