//! `streambot start` - run the bot.
//!
//! Loads the configuration and plugin manifest, starts the supervisor and
//! reads operator commands from stdin until `quit`, end of input or ctrl-c.
//!
//! # Stdin commands
//!
//! ```text
//! code <bot|caster> <state> <code>   finish an authorization redirect
//! say <text>                         send a chat message
//! status                             print the current status as JSON
//! reload                             re-read config.json and restart
//! quit                               shut down
//! ```

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use crate::auth::IdentityKind;
use crate::config::{Config, ConfigEvent};
use crate::plugin::PluginEngine;
use crate::split::{self, Handle};

/// One parsed stdin line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// `code <kind> <state> <code>`.
    Code {
        /// Identity being authorized.
        kind: IdentityKind,
        /// `state` from the redirect.
        state: String,
        /// `code` from the redirect.
        code: String,
    },
    /// `say <text>`.
    Say(String),
    /// `status`.
    Status,
    /// `reload`.
    Reload,
    /// `quit`.
    Quit,
}

impl Input {
    /// Parse a stdin line; `Err` carries a usage hint.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        let input = match word {
            "code" => {
                let mut parts = rest.split_whitespace();
                let (Some(kind), Some(state), Some(code)) = (parts.next(), parts.next(), parts.next())
                else {
                    return Err("usage: code <bot|caster> <state> <code>".to_string());
                };
                Self::Code {
                    kind: kind.parse()?,
                    state: state.to_string(),
                    code: code.to_string(),
                }
            }
            "say" if !rest.is_empty() => Self::Say(rest.to_string()),
            "say" => return Err("usage: say <text>".to_string()),
            "status" => Self::Status,
            "reload" => Self::Reload,
            "quit" | "exit" => Self::Quit,
            other => return Err(format!("unknown command: {other}")),
        };
        Ok(Some(input))
    }
}

/// Runs the bot until shutdown.
pub async fn run(headless: bool) -> Result<()> {
    let mut config = Config::load()?;
    if headless {
        config.headless_authorization = true;
    }
    log::info!("streambot v{} starting ({})", super::VERSION, crate::env::Environment::current());

    let plugins = PluginEngine::new();
    let loaded = plugins.load_manifest(&config.plugins).await;
    log::info!("Loaded {} of {} plugins", loaded.len(), config.plugins.len());

    let (listening_tx, listening_rx) = watch::channel(false);
    let (handle, supervisor) = split::start(config, plugins, listening_rx);

    // Stdin is the redirect receiver; credentials start once it is read.
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    listening_tx.send_replace(true);
    println!("streambot running. Commands: code, say, status, reload, quit");

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => match Input::parse(&line) {
                    Ok(Some(Input::Quit)) => break,
                    Ok(Some(input)) => execute(&handle, input).await,
                    Ok(None) => {}
                    Err(usage) => println!("{usage}"),
                },
                Ok(None) => {
                    if headless {
                        // Detached from a terminal: keep running until ctrl-c
                        let _ = tokio::signal::ctrl_c().await;
                    }
                    break;
                }
                Err(e) => {
                    log::error!("Failed to read stdin: {e}");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                println!("Shutting down...");
                break;
            }
        }
    }

    handle.shutdown();
    if let Err(e) = supervisor.await {
        log::error!("Supervisor task failed: {e}");
    }
    Ok(())
}

async fn execute(handle: &Handle, input: Input) {
    match input {
        Input::Code { kind, state, code } => {
            match handle.complete_authorization(kind, &state, &code).await {
                Ok(_) => println!("{kind} authorized"),
                Err(e) => println!("{kind} authorization failed: {e}"),
            }
        }
        Input::Say(text) => {
            if !handle.send_chat(text) {
                println!("chat unavailable");
            }
        }
        Input::Status => match serde_json::to_string_pretty(&handle.status()) {
            Ok(json) => println!("{json}"),
            Err(e) => println!("status unavailable: {e}"),
        },
        Input::Reload => match Config::load() {
            Ok(config) => handle.apply(ConfigEvent::Saved(Box::new(config))),
            Err(e) => println!("reload failed: {e:#}"),
        },
        Input::Quit => handle.shutdown(),
    }
}
