//! Primary/secondary execution split and the restart supervisor.
//!
//! Each generation runs two cooperating tasks joined by a [`bridge`]:
//!
//! ```text
//!                Supervisor (generation N)
//!                         │
//!   caster authenticated  ▼
//!   ┌─────────── primary ───────────┐   bridge   ┌───────── secondary ─────────┐
//!   │ EventFeedClient               │◄──────────►│ ChatClient ─► PluginEngine  │
//!   │ spawns secondary on welcome   │ IrcInput ◄ │ waits for bot authenticated │
//!   │ forwards outbound chat        │ ► ChatInput│                             │
//!   └───────────────────────────────┘            └─────────────────────────────┘
//! ```
//!
//! A configuration save stops both sockets and the bridge, bumps the
//! generation and starts a fresh primary with the new snapshot. Plugins are
//! owned by the supervisor and survive restarts.
//!
//! The [`Handle`] is the boundary used by an outer HTTP or CLI layer.

pub mod bridge;
pub mod primary;
pub mod secondary;

use std::sync::{Arc, RwLock};

use anyhow::Result;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::auth::{AuthError, CredentialStore, IdentityKind, TokenPair};
use crate::config::{Config, ConfigEvent};
use crate::eventsub::EventFeedMessage;
use crate::irc::{ChatTiming, ParsedMessage};
use crate::plugin::PluginEngine;

/// Capacity of the frame and event broadcast channels.
const BROADCAST_CAPACITY: usize = 256;

/// Which side of the split a task plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Event feed plus bridge owner.
    Primary,
    /// Chat client plus plugin dispatch.
    Secondary,
}

/// Role and restart generation of a running task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecutionContext {
    /// Side of the split.
    pub role: Role,
    /// Restart generation, starting at 1.
    pub generation: u64,
}

impl std::fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let role = match self.role {
            Role::Primary => "primary",
            Role::Secondary => "secondary",
        };
        write!(f, "{role}#{}", self.generation)
    }
}

/// Authentication and connection status of the current generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Status {
    /// Current generation.
    pub generation: u64,
    /// Bot identity emitted `authenticated`.
    pub bot_authenticated: bool,
    /// Broadcaster identity emitted `authenticated`.
    pub caster_authenticated: bool,
    /// Chat socket open.
    pub chat_connected: bool,
    /// Event-feed socket open.
    pub event_feed_connected: bool,
    /// Event-feed session id.
    pub event_feed_session: Option<String>,
}

/// Everything one generation's tasks share.
#[derive(Debug)]
pub struct Generation {
    /// Generation number.
    pub generation: u64,
    /// Configuration snapshot for this generation.
    pub config: Config,
    /// Bot credentials.
    pub bot: Arc<CredentialStore>,
    /// Broadcaster credentials.
    pub caster: Arc<CredentialStore>,
    /// Plugin registry (shared across generations).
    pub plugins: PluginEngine,
    /// Inbound chat frames for outside subscribers.
    pub frames: broadcast::Sender<ParsedMessage>,
    /// Event-feed messages for outside subscribers.
    pub events: broadcast::Sender<EventFeedMessage>,
    /// Status publisher.
    pub status: Arc<watch::Sender<Status>>,
    /// Chat client delays.
    pub chat_timing: ChatTiming,
    /// Cancelled when the generation ends.
    pub cancel: CancellationToken,
}

impl Generation {
    /// Context for `role` in this generation.
    #[must_use]
    pub fn context(&self, role: Role) -> ExecutionContext {
        ExecutionContext {
            role,
            generation: self.generation,
        }
    }

    /// Update the published status.
    pub fn update_status(&self, update: impl FnOnce(&mut Status)) {
        self.status.send_modify(update);
    }
}

enum SupervisorCommand {
    Reload(Box<Config>),
    Shutdown,
}

/// Control surface of a running supervisor. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Handle {
    commands: mpsc::UnboundedSender<SupervisorCommand>,
    chat: mpsc::UnboundedSender<String>,
    frames: broadcast::Sender<ParsedMessage>,
    events: broadcast::Sender<EventFeedMessage>,
    status: watch::Receiver<Status>,
    stores: Arc<RwLock<(Arc<CredentialStore>, Arc<CredentialStore>)>>,
    plugins: PluginEngine,
}

impl std::fmt::Debug for SupervisorCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reload(_) => f.write_str("Reload"),
            Self::Shutdown => f.write_str("Shutdown"),
        }
    }
}

impl Handle {
    /// Stream of inbound chat frames.
    #[must_use]
    pub fn subscribe_frames(&self) -> broadcast::Receiver<ParsedMessage> {
        self.frames.subscribe()
    }

    /// Stream of event-feed messages.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<EventFeedMessage> {
        self.events.subscribe()
    }

    /// Queue outbound chat text for the current generation.
    ///
    /// Sent only if the chat socket is open when it reaches the client.
    pub fn send_chat(&self, text: impl Into<String>) -> bool {
        self.chat.send(text.into()).is_ok()
    }

    /// Current status snapshot.
    #[must_use]
    pub fn status(&self) -> Status {
        self.status.borrow().clone()
    }

    /// Watch status changes.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<Status> {
        self.status.clone()
    }

    /// Credential store of `kind` in the current generation.
    #[must_use]
    pub fn credentials(&self, kind: IdentityKind) -> Arc<CredentialStore> {
        let stores = self.stores.read().expect("stores lock poisoned");
        match kind {
            IdentityKind::Bot => Arc::clone(&stores.0),
            IdentityKind::Caster => Arc::clone(&stores.1),
        }
    }

    /// Begin authorization for `kind`; returns the URL handed to the user.
    pub fn authorize(&self, kind: IdentityKind) -> Result<String, AuthError> {
        self.credentials(kind).authorize()
    }

    /// Complete authorization for `kind` from the redirect's `state`/`code`.
    pub async fn complete_authorization(
        &self,
        kind: IdentityKind,
        state: &str,
        code: &str,
    ) -> Result<TokenPair, AuthError> {
        self.credentials(kind).complete_authorization(state, code).await
    }

    /// Plugin registry.
    #[must_use]
    pub fn plugins(&self) -> &PluginEngine {
        &self.plugins
    }

    /// Persist `config` and restart with it.
    pub fn save_configuration(&self, config: &Config) -> Result<ConfigEvent> {
        let event = config.save()?;
        self.apply(event.clone());
        Ok(event)
    }

    /// Restart with the snapshot carried by `event`.
    pub fn apply(&self, event: ConfigEvent) {
        let ConfigEvent::Saved(config) = event;
        if self.commands.send(SupervisorCommand::Reload(config)).is_err() {
            log::warn!("[split] Supervisor gone, configuration change ignored");
        }
    }

    /// Stop the current generation and the supervisor.
    pub fn shutdown(&self) {
        let _ = self.commands.send(SupervisorCommand::Shutdown);
    }
}

/// Start the supervisor.
///
/// `listening` gates the credential lifecycles: nothing authenticates until
/// it turns `true`.
pub fn start(
    config: Config,
    plugins: PluginEngine,
    listening: watch::Receiver<bool>,
) -> (Handle, JoinHandle<()>) {
    start_with_timing(config, plugins, listening, ChatTiming::default())
}

/// [`start`] with explicit chat client delays.
pub fn start_with_timing(
    config: Config,
    plugins: PluginEngine,
    listening: watch::Receiver<bool>,
    chat_timing: ChatTiming,
) -> (Handle, JoinHandle<()>) {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (chat_tx, chat_rx) = mpsc::unbounded_channel();
    let (frames, _) = broadcast::channel(BROADCAST_CAPACITY);
    let (events, _) = broadcast::channel(BROADCAST_CAPACITY);
    let (status_tx, status_rx) = watch::channel(Status::default());
    let stores = Arc::new(RwLock::new((
        Arc::new(CredentialStore::from_config(&config, IdentityKind::Bot)),
        Arc::new(CredentialStore::from_config(&config, IdentityKind::Caster)),
    )));

    let handle = Handle {
        commands: commands_tx,
        chat: chat_tx,
        frames: frames.clone(),
        events: events.clone(),
        status: status_rx,
        stores: Arc::clone(&stores),
        plugins: plugins.clone(),
    };

    let supervisor = Supervisor {
        config,
        plugins,
        listening,
        chat_timing,
        commands: commands_rx,
        chat: Arc::new(Mutex::new(chat_rx)),
        frames,
        events,
        status: Arc::new(status_tx),
        stores,
    };

    (handle, tokio::spawn(supervisor.run()))
}

struct Supervisor {
    config: Config,
    plugins: PluginEngine,
    listening: watch::Receiver<bool>,
    chat_timing: ChatTiming,
    commands: mpsc::UnboundedReceiver<SupervisorCommand>,
    chat: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    frames: broadcast::Sender<ParsedMessage>,
    events: broadcast::Sender<EventFeedMessage>,
    status: Arc<watch::Sender<Status>>,
    stores: Arc<RwLock<(Arc<CredentialStore>, Arc<CredentialStore>)>>,
}

impl Supervisor {
    async fn run(mut self) {
        let mut generation = 0;

        loop {
            generation += 1;
            let current = self.begin(generation);
            log::info!("[split] Starting generation {}", generation);

            let lifecycles = [
                current.bot.start_on_listening(self.listening.clone()),
                current.caster.start_on_listening(self.listening.clone()),
            ];
            let watchers = [
                watch_authenticated(&current, IdentityKind::Bot),
                watch_authenticated(&current, IdentityKind::Caster),
            ];
            let primary = tokio::spawn(primary::run(Arc::clone(&current), Arc::clone(&self.chat)));

            let next = match self.commands.recv().await {
                Some(SupervisorCommand::Reload(config)) => Some(config),
                Some(SupervisorCommand::Shutdown) | None => None,
            };

            log::info!("[split] Stopping generation {}", generation);
            current.cancel.cancel();
            match primary.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::error!("[split] Primary failed: {e:#}"),
                Err(e) => log::error!("[split] Primary panicked: {e}"),
            }
            for task in lifecycles {
                task.abort();
            }
            for task in watchers {
                task.abort();
            }

            match next {
                Some(config) => self.config = *config,
                None => break,
            }
        }

        self.plugins.shutdown().await;
        log::info!("[split] Supervisor stopped");
    }

    fn begin(&self, generation: u64) -> Arc<Generation> {
        let bot = Arc::new(CredentialStore::from_config(&self.config, IdentityKind::Bot));
        let caster = Arc::new(CredentialStore::from_config(
            &self.config,
            IdentityKind::Caster,
        ));
        *self.stores.write().expect("stores lock poisoned") =
            (Arc::clone(&bot), Arc::clone(&caster));

        self.status.send_replace(Status {
            generation,
            ..Status::default()
        });

        Arc::new(Generation {
            generation,
            config: self.config.clone(),
            bot,
            caster,
            plugins: self.plugins.clone(),
            frames: self.frames.clone(),
            events: self.events.clone(),
            status: Arc::clone(&self.status),
            chat_timing: self.chat_timing.clone(),
            cancel: CancellationToken::new(),
        })
    }
}

/// Mirror an identity's `authenticated` notifications into [`Status`].
fn watch_authenticated(current: &Arc<Generation>, kind: IdentityKind) -> JoinHandle<()> {
    let current = Arc::clone(current);
    let mut rx = match kind {
        IdentityKind::Bot => current.bot.subscribe(),
        IdentityKind::Caster => current.caster.subscribe(),
    };
    tokio::spawn(async move {
        loop {
            let authenticated = rx.borrow_and_update().is_some();
            current.update_status(|status| match kind {
                IdentityKind::Bot => status.bot_authenticated = authenticated,
                IdentityKind::Caster => status.caster_authenticated = authenticated,
            });
            tokio::select! {
                changed = rx.changed() => if changed.is_err() { return },
                () = current.cancel.cancelled() => return,
            }
        }
    })
}

/// Wait for `store` to authenticate, or for the generation to end.
pub(crate) async fn authenticated(
    store: &CredentialStore,
    cancel: &CancellationToken,
) -> Option<TokenPair> {
    tokio::select! {
        tokens = store.wait_authenticated() => Some(tokens),
        () = cancel.cancelled() => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_context_display() {
        let context = ExecutionContext {
            role: Role::Secondary,
            generation: 3,
        };
        assert_eq!(context.to_string(), "secondary#3");
    }

    #[test]
    fn test_status_serializes_flat() {
        let status = Status {
            generation: 2,
            chat_connected: true,
            ..Status::default()
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["generation"], 2);
        assert_eq!(json["chat_connected"], true);
        assert_eq!(json["event_feed_session"], serde_json::Value::Null);
    }
}
