//! IRC line parsing and building
//!
//! Grammar: `message = ["@" tags SPACE] [":" prefix SPACE] command [params] crlf`

/// One parsed IRC line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcMessage {
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl IrcMessage {
    /// Create a new IRC message
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            prefix: None,
            command: command.into(),
            params: Vec::new(),
        }
    }

    /// Add a middle parameter
    pub fn param(mut self, param: impl Into<String>) -> Self {
        self.params.push(param.into());
        self
    }

    /// Add the trailing parameter (may contain spaces)
    pub fn trailing(mut self, text: impl Into<String>) -> Self {
        self.params.push(format!(":{}", text.into()));
        self
    }

    /// Serialize to a CRLF-terminated line
    pub fn to_line(&self) -> String {
        let mut line = String::new();

        if let Some(ref prefix) = self.prefix {
            line.push(':');
            line.push_str(prefix);
            line.push(' ');
        }

        line.push_str(&self.command);

        for param in &self.params {
            line.push(' ');
            line.push_str(param);
        }

        line.push_str("\r\n");
        line
    }

    /// Parse one line. Message tags are skipped.
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(&['\r', '\n'][..]);

        if rest.starts_with('@') {
            rest = rest.split_once(' ').map(|(_, tail)| tail)?;
        }
        rest = rest.trim_start_matches(' ');

        let mut prefix = None;
        if let Some(stripped) = rest.strip_prefix(':') {
            let (p, tail) = stripped.split_once(' ')?;
            prefix = Some(p.to_string());
            rest = tail.trim_start_matches(' ');
        }

        let (command, mut rest) = match rest.split_once(' ') {
            Some((command, tail)) => (command, tail),
            None => (rest, ""),
        };
        if command.is_empty() {
            return None;
        }

        let mut params = Vec::new();
        loop {
            rest = rest.trim_start_matches(' ');
            if rest.is_empty() {
                break;
            }
            if rest.starts_with(':') {
                params.push(rest.to_string());
                break;
            }
            match rest.split_once(' ') {
                Some((param, tail)) => {
                    params.push(param.to_string());
                    rest = tail;
                }
                None => {
                    params.push(rest.to_string());
                    break;
                }
            }
        }

        Some(Self {
            prefix,
            command: command.to_string(),
            params,
        })
    }

    /// Parameter at `index` with any leading ':' of the trailing form removed
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.params
            .get(index)
            .map(|p| p.strip_prefix(':').unwrap_or(p))
    }

    /// Last parameter without its ':' marker
    pub fn text(&self) -> Option<&str> {
        self.params.len().checked_sub(1).and_then(|i| self.arg(i))
    }

    /// Nickname part of the prefix (`nick!user@host`)
    pub fn nick(&self) -> Option<&str> {
        self.prefix
            .as_deref()
            .map(|p| p.split_once('!').map(|(nick, _)| nick).unwrap_or(p))
    }

    /// Whether the command matches, ignoring case
    pub fn is(&self, command: &str) -> bool {
        self.command.eq_ignore_ascii_case(command)
    }
}

/// Builders for the commands the transport sends
pub struct IrcCommands;

impl IrcCommands {
    pub fn pass(password: &str) -> IrcMessage {
        IrcMessage::new("PASS").param(password)
    }

    pub fn nick(nickname: &str) -> IrcMessage {
        IrcMessage::new("NICK").param(nickname)
    }

    pub fn join(channel: &str) -> IrcMessage {
        IrcMessage::new("JOIN").param(channel)
    }

    pub fn ping(token: &str) -> IrcMessage {
        IrcMessage::new("PING").trailing(token)
    }

    pub fn pong(token: &str) -> IrcMessage {
        IrcMessage::new("PONG").trailing(token)
    }

    pub fn privmsg(target: &str, text: &str) -> IrcMessage {
        IrcMessage::new("PRIVMSG").param(target).trailing(text)
    }

    /// One-shot whisper routed through the recipient's channel
    pub fn whisper(recipient: &str, body: &str) -> IrcMessage {
        Self::privmsg(&format!("#{}", recipient), &format!("/w {} {}", recipient, body))
    }
}
