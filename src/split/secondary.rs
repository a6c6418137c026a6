//! Secondary role: chat connection and plugin dispatch.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;

use super::bridge::{BridgeEnd, BridgeMessage, Control};
use super::{authenticated, Generation, Role};
use crate::irc::{ChatClient, ParsedMessage, Target};
use crate::plugin::Dispatched;

/// Run the secondary role.
///
/// Waits for the bot identity, connects the chat client, then shuttles
/// frames to the plugins and the bridge until a [`Control`] message arrives,
/// the bridge closes, or the generation is cancelled.
pub async fn run(
    current: Arc<Generation>,
    mut bridge: BridgeEnd,
    mut control: mpsc::UnboundedReceiver<Control>,
) -> Result<()> {
    let context = current.context(Role::Secondary);
    log::info!("[split] {} waiting for bot credentials", context);

    if authenticated(&current.bot, &current.cancel).await.is_none() {
        return Ok(());
    }

    let chat = ChatClient::with_timing(
        &current.config.irc_url,
        &current.config.bot.name,
        current.config.chat_channel(),
        Arc::clone(&current.bot),
        current.chat_timing.clone(),
    );

    loop {
        match chat.connect().await {
            Ok(()) => break,
            Err(e) => log::warn!("[split] {} chat connect failed: {e:#}", context),
        }
        tokio::select! {
            () = tokio::time::sleep(current.chat_timing.reconnect) => {}
            () = current.cancel.cancelled() => return Ok(()),
            _ = control.recv() => return Ok(()),
        }
    }

    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel();
    chat.subscribe(frames_tx).await;
    let mut connected = chat.subscribe_connected();
    current.update_status(|status| status.chat_connected = *connected.borrow_and_update());
    log::info!("[split] {} chat connected", context);

    loop {
        tokio::select! {
            () = current.cancel.cancelled() => break,

            request = control.recv() => {
                match request {
                    Some(Control::ConfigurationLoader(action)) => {
                        log::info!("[split] {} configuration {:?}, closing chat", context, action);
                    }
                    None => log::debug!("[split] {} control channel closed", context),
                }
                break;
            }

            message = bridge.recv() => match message {
                Some(BridgeMessage::ChatInput { message }) => {
                    chat.private(&message, &Target::Default).await;
                }
                Some(BridgeMessage::IrcInput { .. }) => {
                    log::debug!("[split] {} ignoring IrcInput from primary", context);
                }
                None => break,
            },

            Some(frame) = frames_rx.recv() => on_frame(&current, &bridge, frame),

            changed = connected.changed() => {
                if changed.is_ok() {
                    let open = *connected.borrow_and_update();
                    current.update_status(|status| status.chat_connected = open);
                }
            }
        }
    }

    chat.close().await;
    current.update_status(|status| status.chat_connected = false);
    log::info!("[split] {} stopped", context);
    Ok(())
}

/// Hand a frame to the plugins, then to the primary.
fn on_frame(current: &Generation, bridge: &BridgeEnd, frame: ParsedMessage) {
    let dispatched = current.plugins.dispatch(&frame);
    if !dispatched.is_empty() {
        tokio::spawn(report(dispatched));
    }
    if !bridge.send(BridgeMessage::IrcInput { message: frame }) {
        log::debug!("[split] Bridge closed, frame not forwarded");
    }
}

async fn report(dispatched: Dispatched) {
    for (name, result) in dispatched.wait().await {
        if let Err(e) = result {
            log::warn!("[split] Plugin {} failed: {}", name, e);
        }
    }
}
