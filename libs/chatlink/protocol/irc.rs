//! Line protocol handler (IRC)
//!
//! Drives the authentication and join handshake over raw CRLF lines:
//!
//! ```text
//! New ──on_connect: PASS, NICK──> AwaitingWelcome ──001──> AwaitingJoin ──JOIN/366──> Ready
//!                                                   └──(no channel)──────────────────> Ready
//! ```
//!
//! Once `Ready`, `send_message` writes the payload followed by a `PING`; the
//! next `PING`/`PONG` seen reports `MessageSent`, which is how a one-shot
//! sender learns the server stayed responsive after accepting the write.

use super::message::{IrcCommands, IrcMessage};
use crate::traits::{HandlerState, MessageFn, SendFn, StreamHandler};
use tracing::{debug, trace, warn};

const RPL_WELCOME: &str = "001";
const RPL_ENDOFNAMES: &str = "366";
const ERR_PASSWDMISMATCH: &str = "464";
const LOGIN_FAILURE_NOTICES: [&str; 2] = ["login authentication failed", "improperly formatted auth"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrcState {
    New,
    AwaitingWelcome,
    AwaitingJoin,
    Ready,
}

/// IRC authentication + join state machine
pub struct IrcHandler {
    nickname: String,
    password: String,
    channel: Option<String>,
    ping_token: String,
    state: IrcState,
    send: Option<SendFn>,
    on_message: Option<MessageFn>,
    message_outstanding: bool,
    /// Bytes of an incomplete line; decoded only once the line ends
    partial: Vec<u8>,
}

impl IrcHandler {
    /// Create a handler. `channel` is the channel name without '#';
    /// `None` skips the join step.
    pub fn new(nickname: impl Into<String>, password: impl Into<String>, channel: Option<&str>) -> Self {
        Self {
            nickname: nickname.into().to_lowercase(),
            password: password.into(),
            channel: channel
                .filter(|c| !c.is_empty())
                .map(|c| format!("#{}", c.trim_start_matches('#').to_lowercase())),
            ping_token: "chatlink".to_string(),
            state: IrcState::New,
            send: None,
            on_message: None,
            message_outstanding: false,
            partial: Vec::new(),
        }
    }

    /// Token used on the keep-alive PING that follows a sent message
    pub fn with_ping_token(mut self, token: impl Into<String>) -> Self {
        self.ping_token = token.into();
        self
    }

    /// Register the callback receiving unconsumed lines once `Ready`
    pub fn set_message_function(&mut self, callback: MessageFn) {
        self.on_message = Some(callback);
    }

    pub fn state(&self) -> IrcState {
        self.state
    }

    pub fn is_message_outstanding(&self) -> bool {
        self.message_outstanding
    }

    fn send_line(&self, message: &IrcMessage) -> bool {
        match self.send {
            Some(ref send) => {
                trace!(line = %message.to_line().trim_end(), "irc >>");
                send(message.to_line().as_bytes())
            }
            None => false,
        }
    }

    fn handle_line(&mut self, line: &str) -> HandlerState {
        if line.is_empty() {
            return HandlerState::UnhandledResponse;
        }
        trace!(line, "irc <<");

        let Some(message) = IrcMessage::parse(line) else {
            return HandlerState::UnhandledResponse;
        };

        match self.state {
            IrcState::New => HandlerState::UnhandledResponse,
            IrcState::AwaitingWelcome => self.handle_welcome(&message),
            IrcState::AwaitingJoin => self.handle_join(&message),
            IrcState::Ready => self.handle_ready(line, &message),
        }
    }

    fn handle_welcome(&mut self, message: &IrcMessage) -> HandlerState {
        if message.is(RPL_WELCOME) {
            match self.channel.clone() {
                Some(channel) => {
                    debug!(channel = %channel, "Authenticated, joining channel");
                    self.state = IrcState::AwaitingJoin;
                    if !self.send_line(&IrcCommands::join(&channel)) {
                        return HandlerState::HandlerError;
                    }
                    HandlerState::AwaitingResponse
                }
                None => {
                    debug!("Authenticated");
                    self.state = IrcState::Ready;
                    HandlerState::Connected
                }
            }
        } else if is_login_failure(message) {
            warn!(reply = ?message.text(), "IRC login rejected");
            HandlerState::HandlerError
        } else if message.is("PING") {
            self.reply_pong(message)
        } else {
            HandlerState::UnhandledResponse
        }
    }

    fn handle_join(&mut self, message: &IrcMessage) -> HandlerState {
        let joined_channel = message.is("JOIN")
            && match (message.arg(0), self.channel.as_deref()) {
                (Some(joined), Some(expected)) => joined.eq_ignore_ascii_case(expected),
                _ => false,
            };

        if joined_channel || message.is(RPL_ENDOFNAMES) {
            debug!(channel = ?self.channel, "Channel joined");
            self.state = IrcState::Ready;
            HandlerState::Connected
        } else if message.is("PING") {
            self.reply_pong(message)
        } else {
            HandlerState::UnhandledResponse
        }
    }

    fn handle_ready(&mut self, line: &str, message: &IrcMessage) -> HandlerState {
        if message.is("PING") {
            if self.reply_pong(message) == HandlerState::HandlerError {
                return HandlerState::HandlerError;
            }
            self.take_outstanding()
        } else if message.is("PONG") {
            self.take_outstanding()
        } else {
            if let Some(ref callback) = self.on_message {
                callback(line);
            }
            HandlerState::MessageReceived
        }
    }

    fn reply_pong(&self, ping: &IrcMessage) -> HandlerState {
        let token = ping.text().unwrap_or(&self.ping_token);
        if self.send_line(&IrcCommands::pong(token)) {
            HandlerState::AwaitingResponse
        } else {
            HandlerState::HandlerError
        }
    }

    fn take_outstanding(&mut self) -> HandlerState {
        if std::mem::take(&mut self.message_outstanding) {
            HandlerState::MessageSent
        } else {
            HandlerState::AwaitingResponse
        }
    }
}

fn is_login_failure(message: &IrcMessage) -> bool {
    if message.is(ERR_PASSWDMISMATCH) {
        return true;
    }
    message.is("NOTICE")
        && message
            .text()
            .map(|text| {
                let text = text.to_lowercase();
                LOGIN_FAILURE_NOTICES.iter().any(|marker| text.contains(marker))
            })
            .unwrap_or(false)
}

impl StreamHandler for IrcHandler {
    fn on_connect(&mut self) -> HandlerState {
        debug_assert!(self.send.is_some(), "IrcHandler connected without a send function");
        if self.send.is_none() {
            return HandlerState::HandlerError;
        }

        self.partial.clear();
        self.message_outstanding = false;

        let sent = self.send_line(&IrcCommands::pass(&self.password))
            && self.send_line(&IrcCommands::nick(&self.nickname));
        if !sent {
            return HandlerState::HandlerError;
        }

        self.state = IrcState::AwaitingWelcome;
        HandlerState::AwaitingResponse
    }

    fn on_message(&mut self, data: &[u8]) -> HandlerState {
        self.partial.extend_from_slice(data);

        let mut result: Option<HandlerState> = None;
        while let Some(pos) = self.partial.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.partial.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(&['\r', '\n'][..]);
            let state = self.handle_line(line);
            result = Some(match result {
                Some(previous) => previous.merge(state),
                None => state,
            });
            if state == HandlerState::HandlerError {
                break;
            }
        }

        result.unwrap_or(HandlerState::AwaitingResponse)
    }

    fn send_message(&mut self, data: &[u8]) -> bool {
        if self.state != IrcState::Ready {
            return false;
        }
        let Some(send) = self.send.clone() else {
            return false;
        };

        let mut payload = data.to_vec();
        if !payload.ends_with(b"\r\n") {
            payload.extend_from_slice(b"\r\n");
        }

        if !send(&payload) {
            return false;
        }
        self.message_outstanding = true;
        self.send_line(&IrcCommands::ping(&self.ping_token))
    }

    fn set_send_function(&mut self, send: SendFn) {
        self.send = Some(send);
    }
}
