//! Duplex channel between the primary and secondary roles.
//!
//! Messages travel as typed values; [`BridgeMessage::to_line`] and
//! [`BridgeMessage::from_line`] give the one-line JSON framing used when the
//! bridge crosses a process or socket boundary.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::irc::ParsedMessage;

/// Message carried across the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeMessage {
    /// One parsed inbound chat frame.
    IrcInput {
        /// The frame.
        message: ParsedMessage,
    },
    /// One outbound chat reply.
    ChatInput {
        /// Text to send.
        message: String,
    },
}

impl BridgeMessage {
    /// Frame as a single JSON line.
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decode a JSON line.
    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim_end())
    }
}

/// Action requested of the configuration loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigurationAction {
    /// Configuration was saved; restart the generation.
    Save,
}

/// Restart control posted to the secondary role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Control {
    /// `{"ConfigurationLoader": "save"}`.
    ConfigurationLoader(ConfigurationAction),
}

/// One end of the bridge.
#[derive(Debug)]
pub struct BridgeEnd {
    /// Outbound half.
    pub tx: mpsc::UnboundedSender<BridgeMessage>,
    /// Inbound half.
    pub rx: mpsc::UnboundedReceiver<BridgeMessage>,
}

impl BridgeEnd {
    /// Send to the other end; `false` once it is gone.
    pub fn send(&self, message: BridgeMessage) -> bool {
        self.tx.send(message).is_ok()
    }

    /// Receive from the other end; `None` once it is gone.
    pub async fn recv(&mut self) -> Option<BridgeMessage> {
        self.rx.recv().await
    }
}

/// Create a connected pair of bridge ends.
#[must_use]
pub fn bridge() -> (BridgeEnd, BridgeEnd) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    (
        BridgeEnd { tx: a_tx, rx: a_rx },
        BridgeEnd { tx: b_tx, rx: b_rx },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chat_input_wire_shape() {
        let message = BridgeMessage::ChatInput {
            message: "hello chat".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({"ChatInput": {"message": "hello chat"}})
        );
        assert_eq!(BridgeMessage::from_line(&message.to_line().unwrap()).unwrap(), message);
    }

    #[test]
    fn test_irc_input_carries_parsed_frame() {
        let frame = crate::irc::parse(":a!a@a.tmi.twitch.tv JOIN #chan").unwrap().unwrap();
        let line = BridgeMessage::IrcInput { message: frame.clone() }.to_line().unwrap();
        assert!(line.starts_with(r#"{"IrcInput":{"message":{"#));
        assert_eq!(
            BridgeMessage::from_line(&format!("{line}\n")).unwrap(),
            BridgeMessage::IrcInput { message: frame }
        );
    }

    #[test]
    fn test_control_wire_shape() {
        let control = Control::ConfigurationLoader(ConfigurationAction::Save);
        assert_eq!(
            serde_json::to_value(control).unwrap(),
            json!({"ConfigurationLoader": "save"})
        );
    }

    #[tokio::test]
    async fn test_bridge_is_duplex() {
        let (mut primary, mut secondary) = bridge();
        assert!(primary.send(BridgeMessage::ChatInput {
            message: "to secondary".to_string(),
        }));
        assert!(secondary.send(BridgeMessage::ChatInput {
            message: "to primary".to_string(),
        }));
        assert_eq!(
            secondary.recv().await,
            Some(BridgeMessage::ChatInput {
                message: "to secondary".to_string()
            })
        );
        assert_eq!(
            primary.recv().await,
            Some(BridgeMessage::ChatInput {
                message: "to primary".to_string()
            })
        );
    }
}
