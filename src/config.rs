//! Configuration loading and persistence.
//!
//! Handles reading and writing the streambot configuration file. Components
//! never share a mutable configuration: each receives a cloned [`Config`]
//! snapshot at construction, and a save produces a [`ConfigEvent`] carrying
//! the new snapshot.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::{fs, path::PathBuf};

use crate::auth::{Identity, IdentityKind};

/// Default identity-provider base URL.
pub const DEFAULT_IDENTITY_PROVIDER_URL: &str = "https://id.twitch.tv/oauth2";
/// Default chat socket URL.
pub const DEFAULT_IRC_URL: &str = "wss://irc-ws.chat.twitch.tv:443";
/// Default event-feed socket URL.
pub const DEFAULT_EVENTSUB_URL: &str = "wss://eventsub.wss.twitch.tv/ws";
/// Default event-feed keepalive timeout in seconds.
pub const DEFAULT_EVENTSUB_KEEPALIVE_SECS: u64 = 30;
/// Export looked up in a plugin module when the manifest names none.
pub const DEFAULT_REDUCER_EXPORT: &str = "reducer";

/// Account settings for one identity (bot or broadcaster).
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct IdentitySettings {
    /// Platform user id.
    pub id: String,
    /// Login / display name.
    pub name: String,
    /// Space-separated OAuth scopes requested for this identity.
    pub scope: String,
}

/// One plugin entry in the startup manifest.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PluginManifestEntry {
    /// Registry name of the plugin.
    pub name: String,
    /// Path to the plugin's entry module.
    pub path: PathBuf,
    /// Name of the reducer export inside the module.
    #[serde(default = "default_reducer_export")]
    pub reducer: String,
}

fn default_reducer_export() -> String {
    DEFAULT_REDUCER_EXPORT.to_string()
}

/// Configuration snapshot for one running instance.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    /// OAuth client id.
    pub client_id: String,
    /// OAuth client secret.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_secret: String,
    /// Redirect URI registered with the identity provider.
    pub redirect_uri: String,
    /// Base URL of the identity provider (`/authorize`, `/token`, `/validate`).
    pub identity_provider_url: String,
    /// Chat socket URL.
    pub irc_url: String,
    /// Event-feed socket URL.
    pub eventsub_url: String,
    /// Event-feed keepalive timeout in seconds.
    pub eventsub_keepalive_timeout: u64,
    /// Bot account.
    pub bot: IdentitySettings,
    /// Broadcaster account.
    pub caster: IdentitySettings,
    /// Channel to join; defaults to the bot name when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Print the authorization URL instead of opening a browser.
    #[serde(default)]
    pub headless_authorization: bool,
    /// Directory holding per-identity token files.
    pub data_dir: PathBuf,
    /// Directory scanned by `plugins list`.
    pub plugins_dir: PathBuf,
    /// Plugins loaded at startup.
    #[serde(default)]
    pub plugins: Vec<PluginManifestEntry>,
}

/// Change notification emitted when a configuration is saved.
#[derive(Debug, Clone)]
pub enum ConfigEvent {
    /// The configuration was persisted; carries the new snapshot.
    Saved(Box<Config>),
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = Self::default_data_dir();
        let plugins_dir = data_dir.join("plugins");

        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: "http://localhost:3000/oauth/callback".to_string(),
            identity_provider_url: DEFAULT_IDENTITY_PROVIDER_URL.to_string(),
            irc_url: DEFAULT_IRC_URL.to_string(),
            eventsub_url: DEFAULT_EVENTSUB_URL.to_string(),
            eventsub_keepalive_timeout: DEFAULT_EVENTSUB_KEEPALIVE_SECS,
            bot: IdentitySettings {
                scope: "chat:read chat:edit".to_string(),
                ..IdentitySettings::default()
            },
            caster: IdentitySettings {
                scope: "channel:read:redemptions".to_string(),
                ..IdentitySettings::default()
            },
            channel: None,
            headless_authorization: false,
            data_dir,
            plugins_dir,
            plugins: Vec::new(),
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// Directory selection priority:
    /// 1. `STREAMBOT_CONFIG_DIR` env var: explicit override
    /// 2. `STREAMBOT_ENV=test`: `tmp/streambot-test` under the manifest dir
    /// 3. Default: platform config dir (`~/.config/streambot` on Linux)
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("STREAMBOT_CONFIG_DIR") {
            PathBuf::from(dir)
        } else if crate::env::is_test_mode() {
            PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tmp/streambot-test")
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("streambot")
        };
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn default_data_dir() -> PathBuf {
        if crate::env::is_test_mode() {
            PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tmp/streambot-test/data")
        } else {
            dirs::data_dir()
                .map(|d| d.join("streambot"))
                .unwrap_or_else(|| PathBuf::from("data"))
        }
    }

    /// Loads configuration from file, with environment variable overrides.
    pub fn load() -> Result<Self> {
        let mut config = match Self::load_from_file() {
            Ok(config) => config,
            Err(e) => {
                log::debug!("Using default configuration: {e}");
                Self::default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn load_from_file() -> Result<Self> {
        let config_path = Self::config_dir()?.join("config.json");
        if config_path.exists() {
            let content = fs::read_to_string(&config_path)?;
            Ok(serde_json::from_str(&content)
                .with_context(|| format!("Invalid config file: {}", config_path.display()))?)
        } else {
            anyhow::bail!("Config file not found")
        }
    }

    fn apply_env_overrides(&mut self) {
        fn set(target: &mut String, var: &str) {
            if let Ok(value) = std::env::var(var) {
                *target = value;
            }
        }

        set(&mut self.client_id, "TWITCH_CLIENT_ID");
        set(&mut self.client_secret, "TWITCH_CLIENT_SECRET");
        set(&mut self.redirect_uri, "SERVER_REDIRECT_URL");
        set(&mut self.identity_provider_url, "TWITCH_IDENTITY_PROVIDER_URL");
        set(&mut self.irc_url, "TWITCH_IRC_URL");
        set(&mut self.eventsub_url, "TWITCH_EVENTSUB_URL");
        set(&mut self.bot.id, "TWITCH_BOT_ID");
        set(&mut self.bot.name, "TWITCH_BOT_NAME");
        set(&mut self.bot.scope, "TWITCH_BOT_SCOPE");
        set(&mut self.caster.id, "TWITCH_CASTER_ID");
        set(&mut self.caster.name, "TWITCH_CASTER_NAME");
        set(&mut self.caster.scope, "TWITCH_CASTER_SCOPE");

        if let Ok(timeout) = std::env::var("TWITCH_EVENTSUB_KEEPALIVE_TIMEOUT") {
            if let Ok(secs) = timeout.parse::<u64>() {
                self.eventsub_keepalive_timeout = secs;
            }
        }

        if let Ok(channel) = std::env::var("TWITCH_CHANNEL") {
            self.channel = (!channel.is_empty()).then_some(channel);
        }

        if let Ok(flag) = std::env::var("OIDC_AUTHORIZE_LINK") {
            self.headless_authorization = matches!(flag.as_str(), "1" | "true");
        }

        if let Ok(dir) = std::env::var("STREAMBOT_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }

        if let Ok(dir) = std::env::var("STREAMBOT_PLUGINS_DIR") {
            self.plugins_dir = PathBuf::from(dir);
        }
    }

    /// Persists the configuration to disk and returns the change event.
    pub fn save(&self) -> Result<ConfigEvent> {
        let config_path = Self::config_dir()?.join("config.json");
        fs::write(&config_path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;

        // Owner read/write only: the file carries the client secret
        #[cfg(unix)]
        fs::set_permissions(&config_path, fs::Permissions::from_mode(0o600))?;

        log::info!("Configuration saved to {}", config_path.display());
        Ok(ConfigEvent::Saved(Box::new(self.clone())))
    }

    /// Channel the bot joins (without `#`).
    pub fn chat_channel(&self) -> &str {
        self.channel.as_deref().unwrap_or(&self.bot.name)
    }

    /// Build the [`Identity`] for the given account kind.
    pub fn identity(&self, kind: IdentityKind) -> Identity {
        let settings = match kind {
            IdentityKind::Bot => &self.bot,
            IdentityKind::Caster => &self.caster,
        };
        Identity {
            kind,
            id: settings.id.clone(),
            display_name: settings.name.clone(),
            scope: settings.scope.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.irc_url, DEFAULT_IRC_URL);
        assert_eq!(config.eventsub_url, DEFAULT_EVENTSUB_URL);
        assert_eq!(config.eventsub_keepalive_timeout, 30);
        assert!(config.plugins.is_empty());
    }

    #[test]
    fn test_chat_channel_falls_back_to_bot_name() {
        let mut config = Config::default();
        config.bot.name = "helper_bot".to_string();
        assert_eq!(config.chat_channel(), "helper_bot");

        config.channel = Some("streamer".to_string());
        assert_eq!(config.chat_channel(), "streamer");
    }

    #[test]
    fn test_serialization_skips_empty_secret() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("client_secret"));
    }

    #[test]
    fn test_manifest_entry_defaults_reducer_export() {
        let entry: PluginManifestEntry =
            serde_json::from_str(r#"{"name":"counter","path":"/tmp/counter/index.lua"}"#).unwrap();
        assert_eq!(entry.reducer, "reducer");
    }

    #[test]
    fn test_identity_uses_matching_settings() {
        let mut config = Config::default();
        config.caster.id = "42".to_string();
        config.caster.name = "streamer".to_string();

        let identity = config.identity(IdentityKind::Caster);
        assert_eq!(identity.kind, IdentityKind::Caster);
        assert_eq!(identity.id, "42");
        assert_eq!(identity.display_name, "streamer");
    }
}
