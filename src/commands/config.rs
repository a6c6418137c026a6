//! `streambot config` - read and write configuration values.
//!
//! Keys use dot notation over the JSON form of [`Config`]:
//!
//! ```bash
//! # Print the effective configuration
//! streambot config
//!
//! # Read one value
//! streambot config bot.name
//!
//! # Set a value (parsed as JSON, falling back to a string)
//! streambot config eventsub_keepalive_timeout 20
//! streambot config channel mychannel
//! ```
//!
//! A write is checked by decoding the result back into [`Config`] before it
//! is saved, so a typo cannot leave an unreadable `config.json` behind.

use anyhow::{Context, Result};
use serde_json::Value;

use crate::config::{Config, ConfigEvent};

/// Placeholder printed instead of the client secret.
const REDACTED: &str = "<redacted>";

/// Prints the effective configuration (file plus environment overrides).
pub fn show() -> Result<()> {
    let config = Config::load()?;
    println!("{}", serde_json::to_string_pretty(&redacted(&config)?)?);
    Ok(())
}

/// Prints the value at `key_path`.
///
/// # Errors
///
/// Returns an error if any key in the path does not exist.
pub fn get(key_path: &str) -> Result<()> {
    let config = Config::load()?;
    let root = redacted(&config)?;
    println!("{}", serde_json::to_string_pretty(lookup(&root, key_path)?)?);
    Ok(())
}

/// Sets the value at `key_path` and saves the configuration.
///
/// # Errors
///
/// Returns an error if an intermediate key is not an object, or if the
/// result no longer decodes as a [`Config`].
pub fn set(key_path: &str, new_value: &str) -> Result<ConfigEvent> {
    let config = Config::load()?;
    let mut root = serde_json::to_value(&config)?;
    assign(&mut root, key_path, new_value)?;

    let updated: Config = serde_json::from_value(root)
        .with_context(|| format!("Setting '{key_path}' produced an invalid configuration"))?;
    let event = updated.save()?;
    println!("Set {key_path}");
    Ok(event)
}

fn redacted(config: &Config) -> Result<Value> {
    let mut root = serde_json::to_value(config)?;
    if let Some(secret) = root.get_mut("client_secret") {
        *secret = Value::String(REDACTED.to_string());
    }
    Ok(root)
}

/// Navigate `root` along a dot-notation path.
fn lookup<'a>(root: &'a Value, key_path: &str) -> Result<&'a Value> {
    let mut value = root;
    for key in key_path.split('.') {
        value = match value {
            Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            other => other.get(key),
        }
        .with_context(|| format!("Key '{key}' not found in path '{key_path}'"))?;
    }
    Ok(value)
}

/// Set the value at a dot-notation path, creating intermediate objects.
///
/// `new_value` is parsed as JSON first; if that fails it is stored as a
/// string.
fn assign(root: &mut Value, key_path: &str, new_value: &str) -> Result<()> {
    let parsed: Value = serde_json::from_str(new_value)
        .unwrap_or_else(|_| Value::String(new_value.to_string()));

    let keys: Vec<&str> = key_path.split('.').collect();
    let Some((last, parents)) = keys.split_last() else {
        anyhow::bail!("Empty key path");
    };

    let mut current = root;
    for key in parents {
        let Some(obj) = current.as_object_mut() else {
            anyhow::bail!("Cannot navigate through '{key}' - not an object");
        };
        let entry = obj
            .entry((*key).to_string())
            .or_insert_with(|| serde_json::json!({}));
        if !entry.is_object() {
            *entry = serde_json::json!({});
        }
        current = entry;
    }

    let Some(obj) = current.as_object_mut() else {
        anyhow::bail!("Cannot set key '{last}' - parent is not an object");
    };
    obj.insert((*last).to_string(), parsed);
    Ok(())
}
