//! Text-chat service: wire codec and socket client.
//!
//! - [`message`] - pure parse/format of chat lines
//! - [`client`] - [`ChatClient`], one socket with login handshake and reconnect

pub mod client;
pub mod message;

pub use client::{ChatClient, ChatTiming};
pub use message::{
    format, parse, ParsedCommand, ParsedIdentifier, ParsedMessage, ProtocolError, Tags, Target,
};
