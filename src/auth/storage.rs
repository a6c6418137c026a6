//! Per-identity token file.
//!
//! Tokens live at `{data_dir}/{kind}.json` as `{access_token, refresh_token}`,
//! pretty-printed with four-space indentation. A missing or corrupt file is
//! not an error for readers: it just means "no tokens yet".

use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use super::{IdentityKind, TokenPair};

/// Partial token update; absent fields keep their previous value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenUpdate {
    /// New access token, if any.
    pub access: Option<String>,
    /// New refresh token, if any.
    pub refresh: Option<String>,
}

impl TokenUpdate {
    /// Update carrying both tokens of `pair`.
    #[must_use]
    pub fn from_pair(pair: &TokenPair) -> Self {
        Self {
            access: Some(pair.access_token.clone()),
            refresh: Some(pair.refresh_token.clone()),
        }
    }

    /// Apply this update over `current`.
    #[must_use]
    pub fn merge(&self, current: &TokenPair) -> TokenPair {
        TokenPair {
            access_token: self
                .access
                .clone()
                .unwrap_or_else(|| current.access_token.clone()),
            refresh_token: self
                .refresh
                .clone()
                .unwrap_or_else(|| current.refresh_token.clone()),
        }
    }
}

/// Result of a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Written {
    /// The pair now on disk.
    pub tokens: TokenPair,
    /// Where it was written.
    pub path: PathBuf,
}

/// Location of one identity's persisted tokens.
#[derive(Debug, Clone)]
pub struct TokenFile {
    path: PathBuf,
}

impl TokenFile {
    /// Token file for `kind` inside `data_dir`.
    #[must_use]
    pub fn new(data_dir: &Path, kind: IdentityKind) -> Self {
        Self {
            path: data_dir.join(format!("{}.json", kind.as_str())),
        }
    }

    /// Token file at an explicit path.
    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted pair.
    ///
    /// Returns `None` (and logs why) when the file is missing or unreadable.
    pub fn read(&self) -> Option<TokenPair> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                log::info!("[oidc] No token file at {}: {}", self.path.display(), e);
                return None;
            }
        };

        match serde_json::from_str::<TokenPair>(&content) {
            Ok(pair) => Some(pair),
            Err(e) => {
                log::warn!(
                    "[oidc] Ignoring corrupt token file {}: {}",
                    self.path.display(),
                    e
                );
                None
            }
        }
    }

    /// Persist `pair`, creating the parent directory if needed.
    pub fn write(&self, pair: &TokenPair) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        fs::write(&self.path, to_pretty_json(pair)?)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;

        #[cfg(unix)]
        fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }
}

/// Serialize with four-space indentation.
fn to_pretty_json<T: Serialize>(value: &T) -> Result<String> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    Ok(String::from_utf8(buf)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn pair(access: &str, refresh: &str) -> TokenPair {
        TokenPair {
            access_token: access.to_string(),
            refresh_token: refresh.to_string(),
        }
    }

    #[test]
    fn test_path_is_keyed_by_kind() {
        let file = TokenFile::new(Path::new("/data"), IdentityKind::Bot);
        assert_eq!(file.path(), Path::new("/data/bot.json"));
        let file = TokenFile::new(Path::new("/data"), IdentityKind::Caster);
        assert_eq!(file.path(), Path::new("/data/caster.json"));
    }

    #[test]
    fn test_read_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        let file = TokenFile::new(dir.path(), IdentityKind::Bot);
        assert!(file.read().is_none());
    }

    #[test]
    fn test_read_corrupt_file_is_none() {
        let dir = TempDir::new().unwrap();
        let file = TokenFile::new(dir.path(), IdentityKind::Bot);
        fs::write(file.path(), "{ not json").unwrap();
        assert!(file.read().is_none());
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let file = TokenFile::new(&dir.path().join("nested"), IdentityKind::Caster);
        file.write(&pair("a1", "r1")).unwrap();
        assert_eq!(file.read(), Some(pair("a1", "r1")));
    }

    #[test]
    fn test_write_uses_four_space_indent() {
        let dir = TempDir::new().unwrap();
        let file = TokenFile::new(dir.path(), IdentityKind::Bot);
        file.write(&pair("a1", "r1")).unwrap();
        let content = fs::read_to_string(file.path()).unwrap();
        assert_eq!(
            content,
            "{\n    \"access_token\": \"a1\",\n    \"refresh_token\": \"r1\"\n}"
        );
    }

    #[test]
    fn test_merge_keeps_absent_fields() {
        let current = pair("old-access", "old-refresh");
        let update = TokenUpdate {
            access: Some("new-access".to_string()),
            refresh: None,
        };
        assert_eq!(update.merge(&current), pair("new-access", "old-refresh"));
        assert_eq!(TokenUpdate::default().merge(&current), current);
    }
}
