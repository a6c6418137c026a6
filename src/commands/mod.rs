//! CLI subcommand implementations for streambot.
//!
//! - [`start`] - run the bot with stdin operator commands
//! - [`config`] - read and write configuration values
//! - [`plugins`] - list plugins on disk
//! - [`authorize`] - print an authorization URL
//!
//! # Usage
//!
//! ```ignore
//! use streambot::commands;
//!
//! commands::config::get("bot.name")?;
//! commands::plugins::list()?;
//! ```

pub mod authorize;
pub mod config;
pub mod plugins;
pub mod start;

/// The current version of streambot, derived from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
