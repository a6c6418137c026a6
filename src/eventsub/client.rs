//! Event-feed socket client.
//!
//! The server speaks first: no handshake is sent after opening. Frames are
//! decoded into [`EventFeedMessage`]s and handed to the subscribed sink.
//! Dropped or silent sockets are reopened with [`Backoff`]; an
//! authentication-failure frame ends the client with
//! [`EventFeedError::FatalAuthFrame`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::backoff::Backoff;
use super::message::EventFeedMessage;
use crate::config::Config;
use crate::irc::message::is_auth_failure;
use crate::ws::{self, Closed, WsReader, WsWriter};

/// Slack added to the keepalive interval before a socket counts as dead.
const KEEPALIVE_GRACE: Duration = Duration::from_secs(1);

/// Terminal failure of the event-feed client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFeedError {
    /// The server reported an authentication failure inside the session.
    FatalAuthFrame(String),
}

impl std::fmt::Display for EventFeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FatalAuthFrame(frame) => {
                write!(f, "event feed rejected credentials: {frame}")
            }
        }
    }
}

impl std::error::Error for EventFeedError {}

/// How a single socket's read loop ended.
enum ReadEnd {
    Shutdown,
    Stale,
    Closed(Closed),
    Reconnect(Option<String>),
}

/// Event-feed client handle. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventFeedClient {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    url: String,
    keepalive: Duration,
    backoff: Mutex<Backoff>,
    writer: tokio::sync::Mutex<Option<WsWriter>>,
    sink: Mutex<Option<mpsc::UnboundedSender<EventFeedMessage>>>,
    session: watch::Sender<Option<String>>,
    connected: watch::Sender<bool>,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

impl EventFeedClient {
    /// Client for the configured event-feed URL and keepalive.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let keepalive = Duration::from_secs(config.eventsub_keepalive_timeout);
        Self::with_backoff(
            &with_keepalive_param(&config.eventsub_url, config.eventsub_keepalive_timeout),
            keepalive,
            Backoff::default(),
        )
    }

    /// Client with explicit URL, keepalive and backoff.
    #[must_use]
    pub fn with_backoff(url: &str, keepalive: Duration, backoff: Backoff) -> Self {
        let (session, _) = watch::channel(None);
        let (connected, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                url: url.to_string(),
                keepalive,
                backoff: Mutex::new(backoff),
                writer: tokio::sync::Mutex::new(None),
                sink: Mutex::new(None),
                session,
                connected,
                closed: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Install the sink receiving decoded frames.
    pub fn subscribe(&self, sink: mpsc::UnboundedSender<EventFeedMessage>) {
        *self.inner.sink.lock().expect("sink mutex poisoned") = Some(sink);
    }

    /// Start the connection task.
    ///
    /// The task runs until [`close`](Self::close) (`Ok`) or until the server
    /// rejects the session's credentials (`Err`).
    pub fn connect(&self) -> JoinHandle<Result<(), EventFeedError>> {
        tokio::spawn(Arc::clone(&self.inner).run())
    }

    /// Close the socket and suppress reconnection.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.shutdown.cancel();
        self.inner.close_socket().await;
        log::info!("[eventsub] Closed");
    }

    /// Id of the current session, once welcomed.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.inner.session.borrow().clone()
    }

    /// Watch the current session id.
    #[must_use]
    pub fn subscribe_session(&self) -> watch::Receiver<Option<String>> {
        self.inner.session.subscribe()
    }

    /// Watch whether a socket is currently open.
    #[must_use]
    pub fn subscribe_connected(&self) -> watch::Receiver<bool> {
        self.inner.connected.subscribe()
    }

    /// Delay the next reconnect would wait.
    #[must_use]
    pub fn current_backoff(&self) -> Duration {
        self.inner.backoff.lock().expect("backoff mutex poisoned").current()
    }
}

impl Inner {
    async fn run(self: Arc<Self>) -> Result<(), EventFeedError> {
        let mut reconnect_url: Option<String> = None;

        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Ok(());
            }

            let url = reconnect_url.take().unwrap_or_else(|| self.url.clone());
            match ws::connect(&url).await {
                Ok((writer, reader)) => {
                    self.backoff.lock().expect("backoff mutex poisoned").on_open();
                    *self.writer.lock().await = Some(writer);
                    self.connected.send_replace(true);
                    log::info!("[eventsub] Connected to {}", url);

                    let end = self.read(reader).await;
                    self.close_socket().await;

                    match end {
                        Ok(ReadEnd::Shutdown) => return Ok(()),
                        Ok(ReadEnd::Stale) => {
                            log::warn!("[eventsub] No frames within keepalive window");
                        }
                        Ok(ReadEnd::Closed(closed)) => log::warn!("[eventsub] {}", closed),
                        Ok(ReadEnd::Reconnect(url)) => {
                            log::info!("[eventsub] Server requested reconnect");
                            reconnect_url = url;
                            continue;
                        }
                        Err(fatal) => {
                            self.closed.store(true, Ordering::SeqCst);
                            log::error!("[eventsub] {}", fatal);
                            return Err(fatal);
                        }
                    }
                }
                Err(e) => log::warn!("[eventsub] Connect failed: {e:#}"),
            }

            if self.closed.load(Ordering::SeqCst) {
                return Ok(());
            }

            let delay = self.backoff.lock().expect("backoff mutex poisoned").next_delay();
            log::info!("[eventsub] Reconnecting in {:?}", delay);
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.shutdown.cancelled() => return Ok(()),
            }
        }
    }

    async fn read(&self, mut reader: WsReader) -> Result<ReadEnd, EventFeedError> {
        let mut keepalive = self.keepalive;

        loop {
            let frame = tokio::select! {
                frame = tokio::time::timeout(keepalive + KEEPALIVE_GRACE, reader.recv_text()) => frame,
                () = self.shutdown.cancelled() => return Ok(ReadEnd::Shutdown),
            };

            let text = match frame {
                Err(_elapsed) => return Ok(ReadEnd::Stale),
                Ok(Err(closed)) => return Ok(ReadEnd::Closed(closed)),
                Ok(Ok(text)) => text,
            };

            if is_auth_failure(&text) {
                return Err(EventFeedError::FatalAuthFrame(text));
            }

            let message = match EventFeedMessage::decode(&text) {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(e) => {
                    log::warn!("[eventsub] Dropping malformed frame: {e}");
                    continue;
                }
            };

            let mut end = None;
            match &message {
                EventFeedMessage::SessionWelcome { session } => {
                    if let Some(secs) = session.keepalive_timeout_seconds {
                        keepalive = Duration::from_secs(secs);
                    }
                    log::info!("[eventsub] Session {} welcomed", session.id);
                    self.session.send_replace(Some(session.id.clone()));
                }
                EventFeedMessage::SessionKeepalive => log::trace!("[eventsub] keepalive"),
                EventFeedMessage::Notification { subscription, .. } => {
                    log::info!(
                        "[eventsub] Notification for {}",
                        subscription.get("type").and_then(|t| t.as_str()).unwrap_or("?")
                    );
                }
                EventFeedMessage::SessionReconnect { session } => {
                    end = Some(ReadEnd::Reconnect(session.reconnect_url.clone()));
                }
                EventFeedMessage::Revocation { subscription } => {
                    log::warn!("[eventsub] Subscription revoked: {}", subscription);
                }
            }

            let sink = self.sink.lock().expect("sink mutex poisoned").clone();
            if let Some(sink) = sink {
                if sink.send(message).is_err() {
                    log::debug!("[eventsub] Frame sink dropped");
                }
            }

            if let Some(end) = end {
                return Ok(end);
            }
        }
    }

    async fn close_socket(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.close_with(ws::NORMAL_CLOSE_CODE, "closing").await {
                log::debug!("[eventsub] Close failed: {e}");
            }
        }
        self.connected.send_replace(false);
    }
}

/// Append `keepalive_timeout_seconds` unless the URL already carries it.
fn with_keepalive_param(url: &str, secs: u64) -> String {
    if url.contains("keepalive_timeout_seconds=") {
        return url.to_string();
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}keepalive_timeout_seconds={secs}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_keepalive_param() {
        assert_eq!(
            with_keepalive_param("wss://eventsub.wss.twitch.tv/ws", 30),
            "wss://eventsub.wss.twitch.tv/ws?keepalive_timeout_seconds=30"
        );
        assert_eq!(
            with_keepalive_param("ws://localhost/ws?a=1", 10),
            "ws://localhost/ws?a=1&keepalive_timeout_seconds=10"
        );
        assert_eq!(
            with_keepalive_param("ws://localhost/ws?keepalive_timeout_seconds=5", 10),
            "ws://localhost/ws?keepalive_timeout_seconds=5"
        );
    }

    #[test]
    fn test_fatal_auth_frame_display() {
        let error = EventFeedError::FatalAuthFrame("Login authentication failed".to_string());
        assert!(error.to_string().contains("Login authentication failed"));
    }

    #[tokio::test]
    async fn test_close_before_connect_ends_task() {
        let client = EventFeedClient::with_backoff(
            "ws://127.0.0.1:1/ws",
            Duration::from_secs(1),
            Backoff::new(Duration::from_millis(10), Duration::from_millis(20)),
        );
        client.close().await;
        let result = client.connect().await.unwrap();
        assert_eq!(result, Ok(()));
    }
}
