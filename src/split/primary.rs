//! Primary role: event feed, bridge owner, secondary spawner.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::bridge::{bridge, BridgeEnd, BridgeMessage, ConfigurationAction, Control};
use super::{authenticated, secondary, Generation, Role};
use crate::eventsub::{EventFeedClient, EventFeedError, EventFeedMessage};

/// Secondary task plus its control channel.
struct Spawned {
    control: mpsc::UnboundedSender<Control>,
    task: JoinHandle<Result<()>>,
}

/// Run the primary role until the generation is cancelled.
///
/// Outbound chat text is read from `chat` for the whole generation and
/// forwarded to the secondary as [`BridgeMessage::ChatInput`].
pub async fn run(
    current: Arc<Generation>,
    chat: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
) -> Result<()> {
    let context = current.context(Role::Primary);
    log::info!("[split] {} waiting for broadcaster credentials", context);

    if authenticated(&current.caster, &current.cancel).await.is_none() {
        return Ok(());
    }

    let feed = EventFeedClient::new(&current.config);
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    feed.subscribe(events_tx);
    let mut feed_task = feed.connect();
    let mut feed_done = false;
    let mut feed_connected = feed.subscribe_connected();
    log::info!("[split] {} event feed started", context);

    let (mut own_end, secondary_end) = bridge();
    let mut secondary_end = Some(secondary_end);
    let mut spawned: Option<Spawned> = None;
    let mut chat = chat.lock().await;

    loop {
        tokio::select! {
            () = current.cancel.cancelled() => break,

            Some(message) = events_rx.recv() => {
                on_event(&current, &message);
                if matches!(message, EventFeedMessage::SessionWelcome { .. }) {
                    if let Some(end) = secondary_end.take() {
                        spawned = Some(spawn_secondary(&current, end));
                    }
                }
                let _ = current.events.send(message);
            }

            Some(message) = own_end.recv() => match message {
                BridgeMessage::IrcInput { message } => {
                    let _ = current.frames.send(message);
                }
                BridgeMessage::ChatInput { .. } => {
                    log::debug!("[split] {} ignoring ChatInput from secondary", context);
                }
            },

            Some(text) = chat.recv() => {
                if spawned.is_none() {
                    log::warn!("[split] {} no chat connection yet, dropping: {}", context, text);
                } else {
                    own_end.send(BridgeMessage::ChatInput { message: text });
                }
            }

            changed = feed_connected.changed() => {
                if changed.is_ok() {
                    let connected = *feed_connected.borrow_and_update();
                    current.update_status(|status| status.event_feed_connected = connected);
                }
            }

            result = &mut feed_task, if !feed_done => {
                feed_done = true;
                match result {
                    Ok(Ok(())) => log::info!("[split] {} event feed stopped", context),
                    Ok(Err(EventFeedError::FatalAuthFrame(frame))) => {
                        log::error!("[split] {} event feed rejected credentials: {}", context, frame);
                    }
                    Err(e) => log::error!("[split] {} event feed task failed: {}", context, e),
                }
                current.update_status(|status| {
                    status.event_feed_connected = false;
                    status.event_feed_session = None;
                });
            }
        }
    }

    drop(chat);
    if let Some(spawned) = spawned {
        let _ = spawned
            .control
            .send(Control::ConfigurationLoader(ConfigurationAction::Save));
        match spawned.task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::error!("[split] Secondary failed: {e:#}"),
            Err(e) => log::error!("[split] Secondary panicked: {e}"),
        }
    }
    feed.close().await;
    if !feed_done {
        let _ = feed_task.await;
    }
    log::info!("[split] {} stopped", context);
    Ok(())
}

fn on_event(current: &Generation, message: &EventFeedMessage) {
    if let EventFeedMessage::SessionWelcome { session } = message {
        let id = session.id.clone();
        current.update_status(|status| status.event_feed_session = Some(id));
    }
}

fn spawn_secondary(current: &Arc<Generation>, end: BridgeEnd) -> Spawned {
    log::info!(
        "[split] {} spawning {}",
        current.context(Role::Primary),
        current.context(Role::Secondary)
    );
    let (control, control_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(secondary::run(Arc::clone(current), end, control_rx));
    Spawned { control, task }
}
