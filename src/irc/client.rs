//! Chat socket client.
//!
//! Owns at most one open socket to the chat service. [`ChatClient::connect`]
//! opens it; [`ChatClient::subscribe`] installs the frame sink and runs the
//! login handshake. A single background task reads frames, answers `PING`,
//! re-authenticates on login failure, and reconnects after a fixed delay
//! until [`ChatClient::close`] is called.
//!
//! A rejected login that ends in a pending authorization parks the client:
//! no handshake or reconnect is attempted with the rejected token until the
//! bot identity emits `authenticated` again.
//!
//! ```text
//! connect ──► settle ──► subscribe ──► PASS / NICK / CAP REQ ──► jitter ──► JOIN
//!                                         ▲
//!   close (not explicit) ── 5s ── reopen ─┘
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use unicode_normalization::UnicodeNormalization;

use super::message::{self, ParsedMessage, Target};
use crate::auth::{CredentialStore, Lifecycle};
use crate::config::Config;
use crate::ws::{self, WsReader, WsWriter};

/// Capabilities requested after login.
const CAPABILITIES: &str = "twitch.tv/tags twitch.tv/commands";

/// Handshake attempts before giving up on a socket that never opens.
const MAX_HANDSHAKE_ATTEMPTS: u32 = 10;

/// Invisible characters some chat clients append to bypass duplicate filters.
const ARTIFACT_CHARS: &[char] = &['\u{E0000}', '\u{200B}', '\u{2060}', '\u{FEFF}'];

const ZERO_WIDTH_JOINER: char = '\u{200D}';

/// Delays used by the client.
#[derive(Debug, Clone)]
pub struct ChatTiming {
    /// Pause after the socket opens, before the handshake.
    pub settle: Duration,
    /// Pause before reopening a dropped socket.
    pub reconnect: Duration,
    /// Jitter range (ms) between `CAP REQ` and `JOIN`.
    pub join_jitter_ms: (u64, u64),
    /// Backoff range (ms) between handshake attempts on a closed socket.
    pub retry_backoff_ms: (u64, u64),
}

impl Default for ChatTiming {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(1000),
            reconnect: Duration::from_secs(5),
            join_jitter_ms: (500, 700),
            retry_backoff_ms: (400, 900),
        }
    }
}

impl ChatTiming {
    /// Near-zero delays, for tests driving a local server.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            settle: Duration::ZERO,
            reconnect: Duration::from_millis(50),
            join_jitter_ms: (0, 1),
            retry_backoff_ms: (5, 10),
        }
    }
}

/// Chat client handle. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ChatClient {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    url: String,
    nick: String,
    channel: String,
    credentials: Arc<CredentialStore>,
    timing: ChatTiming,
    writer: tokio::sync::Mutex<Option<WsWriter>>,
    sink: Mutex<Option<mpsc::UnboundedSender<ParsedMessage>>>,
    closed: AtomicBool,
    /// Login was rejected and the bot is waiting for authorization.
    rejected: AtomicBool,
    shutdown: CancellationToken,
    connected: watch::Sender<bool>,
}

impl ChatClient {
    /// Client for the configured chat URL, bot and channel.
    #[must_use]
    pub fn new(config: &Config, credentials: Arc<CredentialStore>) -> Self {
        Self::with_timing(
            &config.irc_url,
            &config.bot.name,
            config.chat_channel(),
            credentials,
            ChatTiming::default(),
        )
    }

    /// Client with explicit endpoint, names and delays.
    #[must_use]
    pub fn with_timing(
        url: &str,
        nick: &str,
        channel: &str,
        credentials: Arc<CredentialStore>,
        timing: ChatTiming,
    ) -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                url: url.to_string(),
                nick: nick.to_string(),
                channel: channel.trim_start_matches('#').to_string(),
                credentials,
                timing,
                writer: tokio::sync::Mutex::new(None),
                sink: Mutex::new(None),
                closed: AtomicBool::new(false),
                rejected: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                connected,
            }),
        }
    }

    /// Open the socket and start the read loop.
    ///
    /// No protocol handshake is sent here; see [`subscribe`](Self::subscribe).
    pub async fn connect(&self) -> Result<()> {
        let reader = self.inner.open().await?;
        tokio::spawn(Arc::clone(&self.inner).run(reader));
        Ok(())
    }

    /// Install the frame sink and, if the socket is open, log in and join.
    ///
    /// Safe to call again; the handshake is idempotent.
    pub async fn subscribe(&self, sink: mpsc::UnboundedSender<ParsedMessage>) {
        *self.inner.sink.lock().expect("sink mutex poisoned") = Some(sink);
        self.inner.handshake().await;
    }

    /// Send a chat message.
    ///
    /// Returns `false` (and logs) when the socket is not open; nothing is
    /// queued for later delivery.
    pub async fn private(&self, text: &str, target: &Target) -> bool {
        let line = message::format(&self.inner.channel, target, text);
        let mut writer = self.inner.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            log::warn!("[irc] Not connected, dropping message: {}", text);
            return false;
        };
        match writer.send_text(&line).await {
            Ok(()) => true,
            Err(e) => {
                log::warn!("[irc] Failed to send message: {e}");
                false
            }
        }
    }

    /// Close the socket and suppress reconnection.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.shutdown.cancel();
        if let Some(mut writer) = self.inner.writer.lock().await.take() {
            if let Err(e) = writer.close_with(ws::NORMAL_CLOSE_CODE, "closing").await {
                log::debug!("[irc] Close failed: {e}");
            }
        }
        self.inner.connected.send_replace(false);
        log::info!("[irc] Closed");
    }

    /// Returns `true` after [`close`](Self::close).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Watch whether a socket is currently open.
    #[must_use]
    pub fn subscribe_connected(&self) -> watch::Receiver<bool> {
        self.inner.connected.subscribe()
    }
}

impl Inner {
    async fn open(&self) -> Result<WsReader> {
        let (writer, reader) = ws::connect(&self.url)
            .await
            .with_context(|| format!("Failed to open chat socket {}", self.url))?;
        *self.writer.lock().await = Some(writer);
        self.connected.send_replace(true);
        log::info!("[irc] Connected to {}", self.url);

        tokio::time::sleep(self.timing.settle).await;
        Ok(reader)
    }

    fn is_subscribed(&self) -> bool {
        self.sink.lock().expect("sink mutex poisoned").is_some()
    }

    /// PASS / NICK / CAP REQ, jitter, JOIN.
    ///
    /// Retries with randomized backoff while the socket is not open, and
    /// gives up once the client is closed.
    async fn handshake(&self) {
        for attempt in 1..=MAX_HANDSHAKE_ATTEMPTS {
            if self.closed.load(Ordering::SeqCst) {
                return;
            }

            match self.try_handshake().await {
                Ok(true) => return,
                Ok(false) => log::debug!("[irc] Socket not open (attempt {attempt})"),
                Err(e) => log::warn!("[irc] Handshake failed (attempt {attempt}): {e}"),
            }

            let (low, high) = self.timing.retry_backoff_ms;
            let wait = rand::rng().random_range(low..high.max(low + 1));
            tokio::select! {
                () = tokio::time::sleep(Duration::from_millis(wait)) => {}
                () = self.shutdown.cancelled() => return,
            }
        }
        log::error!("[irc] Giving up on handshake after {MAX_HANDSHAKE_ATTEMPTS} attempts");
    }

    async fn try_handshake(&self) -> Result<bool> {
        let token = self.credentials.tokens().access_token;
        {
            let mut writer = self.writer.lock().await;
            let Some(writer) = writer.as_mut() else {
                return Ok(false);
            };
            writer.send_text(&format!("PASS oauth:{token}")).await?;
            writer.send_text(&format!("NICK {}", self.nick)).await?;
            writer.send_text(&format!("CAP REQ :{CAPABILITIES}")).await?;
        }

        let (low, high) = self.timing.join_jitter_ms;
        let jitter = rand::rng().random_range(low..high.max(low + 1));
        tokio::time::sleep(Duration::from_millis(jitter)).await;

        let mut writer = self.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            return Ok(false);
        };
        writer.send_text(&format!("JOIN #{}", self.channel)).await?;
        log::info!("[irc] Joined #{} as {}", self.channel, self.nick);
        Ok(true)
    }

    /// Read loop with fixed-delay reconnect.
    async fn run(self: Arc<Self>, mut reader: WsReader) {
        loop {
            let closed = loop {
                let parked = self.rejected.load(Ordering::SeqCst);
                let payload = tokio::select! {
                    result = reader.recv_text() => result,
                    () = self.shutdown.cancelled() => return,
                    _ = self.credentials.wait_authenticated(), if parked => {
                        self.rejected.store(false, Ordering::SeqCst);
                        log::info!("[irc] Bot re-authorized, logging in again");
                        self.handshake().await;
                        continue;
                    }
                };
                match payload {
                    Ok(text) => {
                        for line in ws::lines(&text) {
                            self.handle_line(line).await;
                        }
                    }
                    Err(closed) => break closed,
                }
            };

            self.writer.lock().await.take();
            self.connected.send_replace(false);

            if self.closed.load(Ordering::SeqCst) {
                return;
            }
            if self.rejected.load(Ordering::SeqCst) {
                log::warn!("[irc] {}; waiting for bot authorization before reconnecting", closed);
                tokio::select! {
                    _ = self.credentials.wait_authenticated() => {}
                    () = self.shutdown.cancelled() => return,
                }
                self.rejected.store(false, Ordering::SeqCst);
            }
            log::warn!(
                "[irc] {}; reconnecting in {:?}",
                closed,
                self.timing.reconnect
            );

            reader = loop {
                tokio::select! {
                    () = tokio::time::sleep(self.timing.reconnect) => {}
                    () = self.shutdown.cancelled() => return,
                }
                match self.open().await {
                    Ok(reader) => break reader,
                    Err(e) => log::warn!("[irc] Reconnect failed: {e:#}"),
                }
            };

            if self.is_subscribed() {
                self.handshake().await;
            }
        }
    }

    async fn handle_line(&self, raw: &str) {
        let line = normalize(raw);

        if message::is_welcome(&line) {
            log::info!("[irc] {}", line);
            return;
        }

        if let Some(payload) = message::ping_payload(&line) {
            let pong = format!("PONG :{payload}");
            if let Some(writer) = self.writer.lock().await.as_mut() {
                match writer.send_text(&pong).await {
                    Ok(()) => log::debug!("[irc] {}", pong),
                    Err(e) => log::warn!("[irc] Failed to answer PING: {e}"),
                }
            }
            return;
        }

        if message::is_auth_failure(&line) {
            log::warn!("[irc] Login rejected: {}", line);
            if self.rejected.load(Ordering::SeqCst) {
                return;
            }
            match self.credentials.ensure_authenticated().await {
                Lifecycle::Authenticated(_) => self.handshake().await,
                Lifecycle::AwaitingAuthorization { .. } => {
                    self.rejected.store(true, Ordering::SeqCst);
                    log::warn!("[irc] Waiting for bot authorization before rejoining");
                }
                Lifecycle::Unauthenticated { reason } => {
                    // Unclassified failures are retried on the next reconnect
                    log::error!("[irc] Bot credentials unusable: {reason}");
                }
            }
            return;
        }

        match message::parse(&line) {
            Ok(Some(parsed)) => {
                let sink = self.sink.lock().expect("sink mutex poisoned").clone();
                if let Some(sink) = sink {
                    if sink.send(parsed).is_err() {
                        log::debug!("[irc] Frame sink dropped");
                    }
                }
            }
            Ok(None) => log::debug!("[irc] Ignored: {}", line),
            Err(e) => log::warn!("[irc] Dropping malformed line: {e}"),
        }
    }
}

/// NFC-normalize and strip invisible artifacts.
///
/// Zero-width joiners are kept inside emoji sequences and dropped where they
/// trail a word or sit at the end of the line.
fn normalize(line: &str) -> String {
    let composed: String = line
        .nfc()
        .filter(|c| !ARTIFACT_CHARS.contains(c))
        .collect();

    let mut out = String::with_capacity(composed.len());
    let mut chars = composed.chars().peekable();
    while let Some(c) = chars.next() {
        if c == ZERO_WIDTH_JOINER {
            let joins_symbols = out.chars().last().is_some_and(|p| !p.is_ascii())
                && chars.peek().is_some_and(|n| !n.is_ascii());
            if !joins_symbols {
                continue;
            }
        }
        out.push(c);
    }
    out.trim_end().to_string()
}
