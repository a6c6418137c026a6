//! `log` table for plugin reducers.
//!
//! ```lua
//! log.info("counted " .. state.count .. " messages")
//! log.warn("unknown command: " .. action.text)
//! ```
//!
//! Messages go through the `log` crate with target `plugin`, prefixed with
//! the plugin name, so they respect the process's filter settings.

use anyhow::{anyhow, Result};
use mlua::Lua;

/// Register the global `log` table for plugin `name`.
pub fn register(lua: &Lua, name: &str) -> Result<()> {
    let log_table = lua
        .create_table()
        .map_err(|e| anyhow!("Failed to create log table: {e}"))?;

    for level in [
        log::Level::Error,
        log::Level::Warn,
        log::Level::Info,
        log::Level::Debug,
    ] {
        let plugin = name.to_string();
        let function = lua
            .create_function(move |_, msg: String| {
                log::log!(target: "plugin", level, "[{}] {}", plugin, msg);
                Ok(())
            })
            .map_err(|e| anyhow!("Failed to create log function: {e}"))?;

        let key = level.as_str().to_ascii_lowercase();
        log_table
            .set(key.as_str(), function)
            .map_err(|e| anyhow!("Failed to set log.{key}: {e}"))?;
    }

    lua.globals()
        .set("log", log_table)
        .map_err(|e| anyhow!("Failed to register log table globally: {e}"))?;

    Ok(())
}
