//! Event-feed service (JSON over WebSocket).
//!
//! - [`message`] - frame decoding
//! - [`backoff`] - reconnect delay
//! - [`client`] - [`EventFeedClient`], session handling and reconnect

pub mod backoff;
pub mod client;
pub mod message;

pub use backoff::Backoff;
pub use client::{EventFeedClient, EventFeedError};
pub use message::{EventFeedMessage, Metadata, Session};
