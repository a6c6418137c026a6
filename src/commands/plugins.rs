//! `streambot plugins list` - show plugins found in the plugins directory.

use anyhow::{Context, Result};

use crate::config::Config;
use crate::plugin::{PluginEngine, PluginListing};

/// Lists plugin directories under the configured `plugins_dir`.
///
/// A plugin is marked active when the configuration's manifest names it.
///
/// # Output Format
///
/// ```text
/// Plugins in /home/me/.local/share/streambot/plugins
///
///   * counter    /home/me/.local/share/streambot/plugins/counter/index.lua
///     greeter    /home/me/.local/share/streambot/plugins/greeter/index.lua
/// ```
pub fn list() -> Result<()> {
    let config = Config::load()?;
    let listings = scan(&config)?;

    println!("Plugins in {}", config.plugins_dir.display());
    println!();
    if listings.is_empty() {
        println!("  (none)");
    }
    for listing in listings {
        let marker = if listing.active { '*' } else { ' ' };
        println!("  {marker} {:<10} {}", listing.name, listing.path.display());
    }
    Ok(())
}

/// Plugin directories, with `active` taken from the manifest.
///
/// This process loads no plugins, so the engine's own `active` (loaded now)
/// would always be `false`; "in the manifest" is what `start` will load.
pub fn scan(config: &Config) -> Result<Vec<PluginListing>> {
    let mut listings = PluginEngine::new()
        .list(&config.plugins_dir)
        .with_context(|| format!("Failed to read {}", config.plugins_dir.display()))?;
    for listing in &mut listings {
        listing.active = config.plugins.iter().any(|p| p.name == listing.name);
    }
    Ok(listings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PluginManifestEntry;

    #[test]
    fn test_scan_marks_manifest_entries_active() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["counter", "greeter"] {
            std::fs::create_dir(dir.path().join(name)).unwrap();
            std::fs::write(dir.path().join(name).join("index.lua"), "return {}").unwrap();
        }
        std::fs::create_dir(dir.path().join("empty")).unwrap();

        let config = Config {
            plugins_dir: dir.path().to_path_buf(),
            plugins: vec![PluginManifestEntry {
                name: "counter".to_string(),
                path: dir.path().join("counter"),
                reducer: "reducer".to_string(),
            }],
            ..Config::default()
        };

        let listings = scan(&config).unwrap();
        let summary: Vec<_> = listings.iter().map(|l| (l.name.as_str(), l.active)).collect();
        assert_eq!(summary, vec![("counter", true), ("greeter", false)]);
    }

    #[test]
    fn test_scan_missing_dir_errors() {
        let config = Config {
            plugins_dir: "/nonexistent/streambot/plugins".into(),
            ..Config::default()
        };
        assert!(scan(&config).is_err());
    }
}
