//! Reducer plugins.
//!
//! A plugin is a Lua module returning a table whose reducer export has the
//! shape `function(state, action) -> state`. The engine keeps one isolated
//! state per plugin and feeds it every dispatchable chat frame.
//!
//! ```lua
//! -- plugins/counter/index.lua
//! return {
//!     reducer = function(state, action)
//!         state = state or { count = 0 }
//!         if action and action.command == "PRIVMSG" then
//!             state.count = state.count + 1
//!         end
//!         return state
//!     end,
//! }
//! ```
//!
//! # Modules
//!
//! - [`codec`] - Lua ↔ JSON, including the `Map` encoding
//! - [`log`] - `log` table exposed to reducers
//! - `worker` - per-plugin thread, VM and action queue

pub mod codec;
pub mod log;
mod worker;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::config::PluginManifestEntry;
use crate::irc::ParsedMessage;
use worker::{Command, WorkerSpec};

/// Entry-point file stem inside a plugin directory.
pub const ENTRY_STEM: &str = "index";

/// Entry-point extensions, in search order.
pub const ENTRY_EXTENSIONS: &[&str] = &["lua", "luac"];

/// Plugin failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    /// Bad module, export shape, arity or initial state. Nothing registered.
    Load {
        /// Plugin name.
        name: String,
        /// What was wrong.
        reason: String,
    },
    /// The reducer raised or returned nil; the previous state is kept.
    Dispatch {
        /// Plugin name.
        name: String,
        /// Reducer error text.
        reason: String,
    },
    /// State could not be encoded or decoded.
    Serialize {
        /// Plugin name.
        name: String,
        /// Codec error text.
        reason: String,
    },
    /// No plugin with this name is loaded (or its worker is gone).
    NotLoaded(String),
    /// A plugin with this name is already loaded.
    AlreadyLoaded(String),
}

impl PluginError {
    pub(crate) fn load(name: &str, reason: impl Into<String>) -> Self {
        Self::Load {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn dispatch(name: &str, reason: impl Into<String>) -> Self {
        Self::Dispatch {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn serialize(name: &str, reason: impl Into<String>) -> Self {
        Self::Serialize {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for PluginError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Load { name, reason } => write!(f, "failed to load plugin {name}: {reason}"),
            Self::Dispatch { name, reason } => write!(f, "plugin {name} failed: {reason}"),
            Self::Serialize { name, reason } => {
                write!(f, "plugin {name} state codec failed: {reason}")
            }
            Self::NotLoaded(name) => write!(f, "plugin {name} is not loaded"),
            Self::AlreadyLoaded(name) => write!(f, "plugin {name} is already loaded"),
        }
    }
}

impl std::error::Error for PluginError {}

/// A loaded plugin and its state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginRecord {
    /// Registry name.
    pub name: String,
    /// Entry-point file.
    pub path: PathBuf,
    /// Reducer export name.
    pub reducer: String,
    /// Current state (never null).
    pub state: serde_json::Value,
}

/// A plugin found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginListing {
    /// Directory name.
    pub name: String,
    /// Entry-point file.
    pub path: PathBuf,
    /// Whether a plugin of this name is loaded.
    ///
    /// From [`PluginEngine::list`] this means loaded in that engine right
    /// now. `streambot plugins list` runs in its own process with no loaded
    /// plugins, so it sets this to "named in the manifest" instead (and
    /// therefore loaded at the next `start`).
    pub active: bool,
}

#[derive(Debug)]
struct PluginHandle {
    path: PathBuf,
    reducer: String,
    tx: mpsc::UnboundedSender<Command>,
    thread: std::thread::JoinHandle<()>,
}

/// In-flight dispatch of one action to every loaded plugin.
#[derive(Debug, Default)]
pub struct Dispatched {
    pending: Vec<(String, oneshot::Receiver<Result<(), PluginError>>)>,
}

impl Dispatched {
    /// Number of plugins the action was queued for.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` when no plugin received the action.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Wait for every plugin to process the action.
    pub async fn wait(self) -> Vec<(String, Result<(), PluginError>)> {
        let mut results = Vec::with_capacity(self.pending.len());
        for (name, rx) in self.pending {
            let result = rx
                .await
                .unwrap_or_else(|_| Err(PluginError::NotLoaded(name.clone())));
            results.push((name, result));
        }
        results
    }
}

/// Registry of loaded plugins. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct PluginEngine {
    plugins: Arc<RwLock<BTreeMap<String, PluginHandle>>>,
}

impl PluginEngine {
    /// Empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the plugin at `path` (entry file or plugin directory).
    ///
    /// The `reducer` export must be a two-parameter function whose result for
    /// `(nil, nil)` is not nil.
    pub async fn load(
        &self,
        name: &str,
        path: &Path,
        reducer: &str,
    ) -> Result<PluginRecord, PluginError> {
        if self.is_loaded(name) {
            return Err(PluginError::AlreadyLoaded(name.to_string()));
        }

        let entry = if path.is_dir() {
            entry_point(path).ok_or_else(|| {
                PluginError::load(name, format!("no index entry point in {}", path.display()))
            })?
        } else {
            path.to_path_buf()
        };

        let (tx, thread, state) = worker::spawn(WorkerSpec {
            name: name.to_string(),
            entry: entry.clone(),
            reducer: reducer.to_string(),
        })
        .await?;

        let mut plugins = self.plugins.write().expect("plugins lock poisoned");
        if plugins.contains_key(name) {
            // Lost a race with a concurrent load of the same name
            return Err(PluginError::AlreadyLoaded(name.to_string()));
        }
        plugins.insert(
            name.to_string(),
            PluginHandle {
                path: entry.clone(),
                reducer: reducer.to_string(),
                tx,
                thread,
            },
        );
        drop(plugins);

        ::log::info!("[plugin] Loaded {} from {}", name, entry.display());
        Ok(PluginRecord {
            name: name.to_string(),
            path: entry,
            reducer: reducer.to_string(),
            state,
        })
    }

    /// Load every manifest entry, logging failures.
    pub async fn load_manifest(&self, entries: &[PluginManifestEntry]) -> Vec<PluginRecord> {
        let mut loaded = Vec::new();
        for entry in entries {
            match self.load(&entry.name, &entry.path, &entry.reducer).await {
                Ok(record) => loaded.push(record),
                Err(e) => ::log::error!("[plugin] {e}"),
            }
        }
        loaded
    }

    /// Returns `true` if a plugin named `name` is loaded.
    #[must_use]
    pub fn is_loaded(&self, name: &str) -> bool {
        self.plugins
            .read()
            .expect("plugins lock poisoned")
            .contains_key(name)
    }

    /// Names of loaded plugins.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.plugins
            .read()
            .expect("plugins lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Scan `dir` for plugin directories with an `index.<ext>` entry point.
    pub fn list(&self, dir: &Path) -> std::io::Result<Vec<PluginListing>> {
        let mut listings = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(entry_path) = entry_point(&path) else {
                continue;
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            let active = self.is_loaded(&name);
            listings.push(PluginListing {
                name,
                path: entry_path,
                active,
            });
        }
        listings.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listings)
    }

    /// Queue a chat frame for every loaded plugin.
    ///
    /// Frames outside the dispatch allow-list are not delivered.
    pub fn dispatch(&self, message: &ParsedMessage) -> Dispatched {
        if !message.is_dispatchable() {
            return Dispatched::default();
        }
        match serde_json::to_value(message) {
            Ok(action) => self.dispatch_action(&action),
            Err(e) => {
                ::log::warn!("[plugin] Could not encode frame: {e}");
                Dispatched::default()
            }
        }
    }

    /// Queue an arbitrary action for every loaded plugin.
    ///
    /// Enqueueing is synchronous, so actions reach each plugin in call order.
    pub fn dispatch_action(&self, action: &serde_json::Value) -> Dispatched {
        let plugins = self.plugins.read().expect("plugins lock poisoned");
        let mut pending = Vec::with_capacity(plugins.len());
        for (name, handle) in plugins.iter() {
            let (reply, rx) = oneshot::channel();
            let command = Command::Dispatch {
                action: action.clone(),
                reply,
            };
            if handle.tx.send(command).is_err() {
                ::log::warn!("[plugin] {} worker is gone", name);
                continue;
            }
            pending.push((name.clone(), rx));
        }
        Dispatched { pending }
    }

    /// Dispatch to one plugin and wait for its reducer.
    pub async fn dispatch_to(
        &self,
        name: &str,
        action: &serde_json::Value,
    ) -> Result<(), PluginError> {
        let (reply, rx) = oneshot::channel();
        self.send(
            name,
            Command::Dispatch {
                action: action.clone(),
                reply,
            },
        )?;
        rx.await
            .unwrap_or_else(|_| Err(PluginError::NotLoaded(name.to_string())))
    }

    /// Current state of `name`.
    pub async fn state(&self, name: &str) -> Result<serde_json::Value, PluginError> {
        let (reply, rx) = oneshot::channel();
        self.send(name, Command::State { reply })?;
        rx.await
            .unwrap_or_else(|_| Err(PluginError::NotLoaded(name.to_string())))
    }

    /// Record (with current state) of `name`.
    pub async fn record(&self, name: &str) -> Result<PluginRecord, PluginError> {
        let (path, reducer) = {
            let plugins = self.plugins.read().expect("plugins lock poisoned");
            let handle = plugins
                .get(name)
                .ok_or_else(|| PluginError::NotLoaded(name.to_string()))?;
            (handle.path.clone(), handle.reducer.clone())
        };
        Ok(PluginRecord {
            name: name.to_string(),
            path,
            reducer,
            state: self.state(name).await?,
        })
    }

    /// JSON snapshot of `name`'s state.
    pub async fn serialize(&self, name: &str) -> Result<String, PluginError> {
        let state = self.state(name).await?;
        serde_json::to_string(&state).map_err(|e| PluginError::serialize(name, e.to_string()))
    }

    /// Replace `name`'s state with a snapshot from [`serialize`](Self::serialize).
    pub async fn deserialize(&self, name: &str, snapshot: &str) -> Result<(), PluginError> {
        let state: serde_json::Value = serde_json::from_str(snapshot)
            .map_err(|e| PluginError::serialize(name, e.to_string()))?;
        let (reply, rx) = oneshot::channel();
        self.send(name, Command::Restore { state, reply })?;
        rx.await
            .unwrap_or_else(|_| Err(PluginError::NotLoaded(name.to_string())))
    }

    /// Stop every worker and wait for the threads to exit.
    pub async fn shutdown(&self) {
        let plugins = std::mem::take(&mut *self.plugins.write().expect("plugins lock poisoned"));
        for (name, handle) in plugins {
            drop(handle.tx);
            let joined = tokio::task::spawn_blocking(move || handle.thread.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                ::log::warn!("[plugin] {} worker did not exit cleanly", name);
            }
        }
    }

    fn send(&self, name: &str, command: Command) -> Result<(), PluginError> {
        let plugins = self.plugins.read().expect("plugins lock poisoned");
        let handle = plugins
            .get(name)
            .ok_or_else(|| PluginError::NotLoaded(name.to_string()))?;
        handle
            .tx
            .send(command)
            .map_err(|_| PluginError::NotLoaded(name.to_string()))
    }
}

/// First `index.<ext>` file in `dir`, by extension order.
#[must_use]
pub fn entry_point(dir: &Path) -> Option<PathBuf> {
    ENTRY_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{ENTRY_STEM}.{ext}")))
        .find(|path| path.is_file())
}
