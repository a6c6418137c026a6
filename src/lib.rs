//! streambot - chat bot with reducer plugins.
//!
//! The bot keeps two accounts authenticated, listens to the broadcaster's
//! event feed, joins a text chat as the bot and feeds every chat frame to a
//! set of Lua reducer plugins.
//!
//! # Architecture
//!
//! - **CredentialStore** - per-account OAuth tokens, validate / refresh / authorize
//! - **ChatClient** - chat socket with login handshake and reconnect
//! - **EventFeedClient** - event-feed socket with session handling and backoff
//! - **PluginEngine** - isolated reducer state per plugin
//! - **Split** - primary (event feed) and secondary (chat + plugins) roles,
//!   restarted as a new generation when the configuration is saved
//!
//! # Modules
//!
//! - [`auth`] - credentials and token persistence
//! - [`irc`] - chat codec and client
//! - [`eventsub`] - event-feed client
//! - [`plugin`] - reducer plugins
//! - [`split`] - execution split and supervisor
//! - [`config`] - configuration loading/saving
//! - [`commands`] - CLI subcommands

pub mod auth;
pub mod commands;
pub mod config;
pub mod env;
pub mod eventsub;
pub mod irc;
pub mod plugin;
pub mod split;
pub mod ws;

// Re-export commonly used types
pub use auth::{CredentialStore, IdentityKind};
pub use config::{Config, ConfigEvent};
pub use eventsub::{EventFeedClient, EventFeedMessage};
pub use irc::{ChatClient, ParsedMessage};
pub use plugin::PluginEngine;
pub use split::Handle;
