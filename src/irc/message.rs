//! Chat wire protocol: line parsing and outbound formatting.
//!
//! Lines have the shape `[@tags ]:identifier COMMAND [channel] [:trailing]`.
//! Only the subset of commands the chat service emits is modeled. Welcome
//! numerics and unknown numerics parse to `Ok(None)`; they are expected
//! traffic, not errors.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Numerics sent during the connection welcome sequence.
const WELCOME_NUMERICS: &[&str] = &["001", "002", "003", "004", "353", "366", "372", "375", "376"];

/// Server text meaning the presented credentials were rejected.
const AUTH_FAILURE_PHRASES: &[&str] = &["Login authentication failed", "Improperly formatted auth"];

/// Commands delivered to plugins.
const DISPATCHABLE_COMMANDS: &[&str] = &[
    "PRIVMSG",
    "JOIN",
    "PART",
    "NOTICE",
    "CLEARCHAT",
    "HOSTTARGET",
    "PING",
    "CAP",
    "GLOBALUSERSTATE",
];

/// Malformed chat line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The line was empty.
    Empty,
    /// No `:identifier` token where one is required.
    MissingIdentifier(String),
    /// Nothing after the identifier.
    MissingCommand(String),
    /// A channel-scoped command without its channel token.
    MissingChannel(String),
    /// A non-numeric command this client does not model.
    UnsupportedCommand(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty chat line"),
            Self::MissingIdentifier(line) => write!(f, "missing identifier: {line}"),
            Self::MissingCommand(line) => write!(f, "missing command: {line}"),
            Self::MissingChannel(line) => write!(f, "missing channel: {line}"),
            Self::UnsupportedCommand(command) => write!(f, "unsupported command: {command}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Source of a line: `name!alt@host`, or a bare host for server messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedIdentifier {
    /// Nickname, when the source is a user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// User part after `!`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
    /// Host part (the whole token for server sources).
    pub host: String,
}

impl ParsedIdentifier {
    fn parse(token: &str) -> Self {
        match token.split_once('!') {
            Some((name, rest)) => {
                let (alt, host) = rest.split_once('@').unwrap_or((rest, ""));
                Self {
                    name: Some(name.to_string()),
                    alt: Some(alt.to_string()),
                    host: host.to_string(),
                }
            }
            None => match token.split_once('@') {
                Some((name, host)) => Self {
                    name: Some(name.to_string()),
                    alt: None,
                    host: host.to_string(),
                },
                None => Self {
                    name: None,
                    alt: None,
                    host: token.to_string(),
                },
            },
        }
    }
}

impl fmt::Display for ParsedIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.name, &self.alt) {
            (Some(name), Some(alt)) => write!(f, "{name}!{alt}@{}", self.host),
            (Some(name), None) => write!(f, "{name}@{}", self.host),
            _ => f.write_str(&self.host),
        }
    }
}

/// Structured command, tagged by its wire keyword.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "UPPERCASE")]
pub enum ParsedCommand {
    /// A user joined `channel`.
    Join { channel: String },
    /// A user left `channel`.
    Part { channel: String },
    /// Liveness probe carried with a source prefix.
    Ping { text: String },
    /// Capability negotiation reply (`* ACK`, `* NAK`).
    Cap { params: String, text: String },
    /// Server notice.
    Notice { channel: String, text: String },
    /// Chat message.
    Privmsg { channel: String, text: String },
    /// Chat cleared, or one user's messages purged.
    ClearChat {
        channel: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user: Option<String>,
    },
    /// A single message was deleted.
    ClearMsg { channel: String, text: String },
    /// Sent once after login.
    GlobalUserState,
    /// Bot's state in `channel`.
    UserState { channel: String },
    /// Room settings for `channel`.
    RoomState { channel: String },
    /// Host mode started or stopped.
    HostTarget { channel: String, text: String },
    /// Subscription, raid and similar channel events.
    UserNotice {
        channel: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    /// Direct message to `target`.
    Whisper { target: String, text: String },
    /// The server is about to drop the connection.
    Reconnect,
}

impl ParsedCommand {
    /// Wire keyword of this command.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Join { .. } => "JOIN",
            Self::Part { .. } => "PART",
            Self::Ping { .. } => "PING",
            Self::Cap { .. } => "CAP",
            Self::Notice { .. } => "NOTICE",
            Self::Privmsg { .. } => "PRIVMSG",
            Self::ClearChat { .. } => "CLEARCHAT",
            Self::ClearMsg { .. } => "CLEARMSG",
            Self::GlobalUserState => "GLOBALUSERSTATE",
            Self::UserState { .. } => "USERSTATE",
            Self::RoomState { .. } => "ROOMSTATE",
            Self::HostTarget { .. } => "HOSTTARGET",
            Self::UserNotice { .. } => "USERNOTICE",
            Self::Whisper { .. } => "WHISPER",
            Self::Reconnect => "RECONNECT",
        }
    }
}

/// One parsed chat line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedMessage {
    /// Raw tag blob (without the leading `@`); see [`Tags::decode`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
    /// Source of the line.
    pub identifier: ParsedIdentifier,
    /// Command and its fields.
    #[serde(flatten)]
    pub command: ParsedCommand,
}

impl ParsedMessage {
    /// Whether plugins receive this command.
    #[must_use]
    pub fn is_dispatchable(&self) -> bool {
        DISPATCHABLE_COMMANDS.contains(&self.command.name())
    }

    /// Channel the command is scoped to, if any.
    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        match &self.command {
            ParsedCommand::Join { channel }
            | ParsedCommand::Part { channel }
            | ParsedCommand::Notice { channel, .. }
            | ParsedCommand::Privmsg { channel, .. }
            | ParsedCommand::ClearChat { channel, .. }
            | ParsedCommand::ClearMsg { channel, .. }
            | ParsedCommand::UserState { channel }
            | ParsedCommand::RoomState { channel }
            | ParsedCommand::HostTarget { channel, .. }
            | ParsedCommand::UserNotice { channel, .. } => Some(channel),
            _ => None,
        }
    }

    /// Decoded tags, empty when the line carried none.
    #[must_use]
    pub fn decoded_tags(&self) -> Tags {
        self.tags.as_deref().map(Tags::decode).unwrap_or_default()
    }
}

impl fmt::Display for ParsedMessage {
    /// Render back to wire form (without line terminator).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(tags) = &self.tags {
            write!(f, "@{tags} ")?;
        }
        write!(f, ":{} {}", self.identifier, self.command.name())?;
        match &self.command {
            ParsedCommand::Join { channel }
            | ParsedCommand::Part { channel }
            | ParsedCommand::UserState { channel }
            | ParsedCommand::RoomState { channel } => write!(f, " {channel}"),
            ParsedCommand::Notice { channel, text }
            | ParsedCommand::Privmsg { channel, text }
            | ParsedCommand::ClearMsg { channel, text }
            | ParsedCommand::HostTarget { channel, text } => write!(f, " {channel} :{text}"),
            ParsedCommand::ClearChat { channel, user } | ParsedCommand::UserNotice { channel, text: user } => {
                write!(f, " {channel}")?;
                match user {
                    Some(user) => write!(f, " :{user}"),
                    None => Ok(()),
                }
            }
            ParsedCommand::Ping { text } => write!(f, " :{text}"),
            ParsedCommand::Cap { params, text } => write!(f, " {params} :{text}"),
            ParsedCommand::Whisper { target, text } => write!(f, " {target} :{text}"),
            ParsedCommand::GlobalUserState | ParsedCommand::Reconnect => Ok(()),
        }
    }
}

/// Parse one chat line.
///
/// Returns `Ok(None)` for welcome and other numeric replies.
pub fn parse(line: &str) -> Result<Option<ParsedMessage>, ProtocolError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Err(ProtocolError::Empty);
    }

    let (tags, rest) = split_tags(line);

    let Some(rest) = rest.strip_prefix(':') else {
        return Err(ProtocolError::MissingIdentifier(line.to_string()));
    };
    let (identifier, rest) = rest.split_once(' ').unwrap_or((rest, ""));
    let identifier = ParsedIdentifier::parse(identifier);

    let (middle, trailing) = match rest.split_once(" :") {
        Some((middle, trailing)) => (middle, Some(trailing)),
        None => match rest.strip_prefix(':') {
            Some(trailing) => ("", Some(trailing)),
            None => (rest, None),
        },
    };
    let mut params = middle.split_whitespace();

    let Some(command) = params.next() else {
        return Err(ProtocolError::MissingCommand(line.to_string()));
    };

    if is_numeric(command) {
        return Ok(None);
    }

    let text = || trailing.unwrap_or_default().to_string();
    let channel = |params: &mut std::str::SplitWhitespace<'_>| {
        params
            .next()
            .map(str::to_string)
            .ok_or_else(|| ProtocolError::MissingChannel(line.to_string()))
    };

    let command = match command {
        "JOIN" => ParsedCommand::Join { channel: channel(&mut params)? },
        "PART" => ParsedCommand::Part { channel: channel(&mut params)? },
        "PING" => ParsedCommand::Ping {
            text: trailing
                .map(str::to_string)
                .or_else(|| params.next().map(str::to_string))
                .unwrap_or_default(),
        },
        "CAP" => ParsedCommand::Cap {
            params: params.by_ref().collect::<Vec<_>>().join(" "),
            text: text(),
        },
        "NOTICE" => ParsedCommand::Notice { channel: channel(&mut params)?, text: text() },
        "PRIVMSG" => ParsedCommand::Privmsg { channel: channel(&mut params)?, text: text() },
        "CLEARCHAT" => ParsedCommand::ClearChat {
            channel: channel(&mut params)?,
            user: trailing.map(str::to_string),
        },
        "CLEARMSG" => ParsedCommand::ClearMsg { channel: channel(&mut params)?, text: text() },
        "GLOBALUSERSTATE" => ParsedCommand::GlobalUserState,
        "USERSTATE" => ParsedCommand::UserState { channel: channel(&mut params)? },
        "ROOMSTATE" => ParsedCommand::RoomState { channel: channel(&mut params)? },
        "HOSTTARGET" => ParsedCommand::HostTarget { channel: channel(&mut params)?, text: text() },
        "USERNOTICE" => ParsedCommand::UserNotice {
            channel: channel(&mut params)?,
            text: trailing.map(str::to_string),
        },
        "WHISPER" => ParsedCommand::Whisper {
            target: channel(&mut params)?,
            text: text(),
        },
        "RECONNECT" => ParsedCommand::Reconnect,
        other => return Err(ProtocolError::UnsupportedCommand(other.to_string())),
    };

    Ok(Some(ParsedMessage {
        tags: tags.map(str::to_string),
        identifier,
        command,
    }))
}

fn split_tags(line: &str) -> (Option<&str>, &str) {
    match line.strip_prefix('@') {
        Some(tagged) => match tagged.split_once(' ') {
            Some((tags, rest)) => (Some(tags), rest),
            None => (Some(tagged), ""),
        },
        None => (None, line),
    }
}

fn is_numeric(command: &str) -> bool {
    !command.is_empty() && command.bytes().all(|b| b.is_ascii_digit())
}

fn command_token(line: &str) -> Option<&str> {
    let (_, rest) = split_tags(line);
    let mut tokens = rest.split_whitespace();
    let first = tokens.next()?;
    if first.starts_with(':') {
        tokens.next()
    } else {
        Some(first)
    }
}

/// Whether `line` belongs to the connection welcome sequence.
#[must_use]
pub fn is_welcome(line: &str) -> bool {
    command_token(line).is_some_and(|command| WELCOME_NUMERICS.contains(&command))
}

/// Payload of an unprefixed `PING` line, if `line` is one.
#[must_use]
pub fn ping_payload(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("PING")?;
    if !rest.is_empty() && !rest.starts_with(' ') {
        return None;
    }
    let payload = rest.trim_start();
    Some(payload.strip_prefix(':').unwrap_or(payload))
}

/// Whether `line` reports rejected credentials.
///
/// Substring match against the server's wording; there is no structured
/// signal for this condition.
#[must_use]
pub fn is_auth_failure(line: &str) -> bool {
    AUTH_FAILURE_PHRASES.iter().any(|phrase| line.contains(phrase))
}

/// Destination of an outbound chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The configured channel.
    Default,
    /// An explicit channel.
    Channel(String),
    /// A user, addressed as `@user`.
    Tell(String),
}

/// Build an outbound `PRIVMSG` line (without terminator).
#[must_use]
pub fn format(default_channel: &str, target: &Target, text: &str) -> String {
    let destination = match target {
        Target::Default => format!("#{}", default_channel.trim_start_matches('#')),
        Target::Channel(channel) => format!("#{}", channel.trim_start_matches('#')),
        Target::Tell(user) => format!("@{}", user.trim_start_matches('@')),
    };
    format!("PRIVMSG {destination} :{text}")
}

/// Decoded IRCv3 message tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags(BTreeMap<String, String>);

impl Tags {
    /// Decode a `key=value;key2=value2` blob, unescaping values.
    #[must_use]
    pub fn decode(blob: &str) -> Self {
        let blob = blob.strip_prefix('@').unwrap_or(blob);
        let map = blob
            .split(';')
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((key, value)) => (key.to_string(), unescape(value)),
                None => (pair.to_string(), String::new()),
            })
            .collect();
        Self(map)
    }

    /// Value for `key`; empty values are reported as `Some("")`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Iterate over all tags in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of tags.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when no tags were present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            // Trailing lone backslash is dropped
            None => {}
        }
    }
    out
}
