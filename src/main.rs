//! streambot CLI.
//!
//! This is the main binary entry point. See the `streambot` library for the
//! core functionality.

use anyhow::Result;
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use streambot::{commands, IdentityKind};

/// mimalloc provides better multi-threaded performance than the system allocator.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use commands::VERSION;

// CLI
#[derive(Parser)]
#[command(name = "streambot")]
#[command(version = VERSION)]
#[command(about = "Chat bot with Lua reducer plugins")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot
    Start {
        /// Print authorization URLs instead of opening a browser
        #[arg(long)]
        headless: bool,
    },
    /// Plugin utilities
    Plugins {
        #[command(subcommand)]
        command: PluginCommands,
    },
    /// Show or change configuration values (dot notation keys)
    Config {
        key: Option<String>,
        value: Option<String>,
    },
    /// Print the authorization URL for an account
    AuthorizeUrl {
        /// `bot` or `caster`
        kind: IdentityKind,
    },
}

#[derive(Subcommand)]
enum PluginCommands {
    /// List plugins in the plugins directory
    List,
}

fn init_logging() -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();

    // STREAMBOT_LOG_FILE keeps log output away from the stdin command prompt
    if let Ok(path) = std::env::var("STREAMBOT_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .map_err(|e| anyhow::anyhow!("Failed to create log file at {path}: {e}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }

    builder.init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        log::error!("PANIC: {:?}", panic_info);
        default_hook(panic_info);
    }));

    let cli = Cli::parse();

    match cli.command {
        Commands::Start { headless } => commands::start::run(headless).await?,
        Commands::Plugins {
            command: PluginCommands::List,
        } => commands::plugins::list()?,
        Commands::Config { key, value } => match (key, value) {
            (None, _) => commands::config::show()?,
            (Some(key), None) => commands::config::get(&key)?,
            (Some(key), Some(value)) => {
                commands::config::set(&key, &value)?;
            }
        },
        Commands::AuthorizeUrl { kind } => commands::authorize::url(kind)?,
    }

    Ok(())
}
