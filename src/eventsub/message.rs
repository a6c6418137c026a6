//! Event-feed frames.
//!
//! Every frame is `{metadata, payload}`; `metadata.message_type` selects the
//! payload shape.

use serde::{Deserialize, Serialize};

/// Frame metadata common to all message types.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Unique id, used for de-duplication.
    #[serde(default)]
    pub message_id: String,
    /// `session_welcome`, `session_keepalive`, `notification`, ...
    pub message_type: String,
    /// RFC 3339 send time.
    #[serde(default)]
    pub message_timestamp: String,
    /// Subscription type for notifications and revocations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_type: Option<String>,
}

/// Session description carried by welcome and reconnect frames.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Session id; subscriptions are created against it.
    pub id: String,
    /// `connected`, `reconnecting`, ...
    #[serde(default)]
    pub status: String,
    /// Server-chosen keepalive interval.
    #[serde(default)]
    pub keepalive_timeout_seconds: Option<u64>,
    /// Where to reconnect (only set on `session_reconnect`).
    #[serde(default)]
    pub reconnect_url: Option<String>,
}

/// One decoded event-feed frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventFeedMessage {
    /// First frame of a session.
    SessionWelcome {
        /// The new session.
        session: Session,
    },
    /// Liveness only.
    SessionKeepalive,
    /// A subscribed event fired.
    Notification {
        /// Subscription the event belongs to.
        subscription: serde_json::Value,
        /// Event body.
        event: serde_json::Value,
    },
    /// The server asks the client to move to `session.reconnect_url`.
    SessionReconnect {
        /// Session carrying the reconnect URL.
        session: Session,
    },
    /// A subscription was revoked.
    Revocation {
        /// The revoked subscription.
        subscription: serde_json::Value,
    },
}

#[derive(Debug, Deserialize)]
struct Frame {
    metadata: Metadata,
    #[serde(default)]
    payload: Payload,
}

#[derive(Debug, Default, Deserialize)]
struct Payload {
    #[serde(default)]
    session: Option<Session>,
    #[serde(default)]
    subscription: Option<serde_json::Value>,
    #[serde(default)]
    event: Option<serde_json::Value>,
}

impl EventFeedMessage {
    /// Decode a frame.
    ///
    /// Unknown message types yield `Ok(None)`.
    pub fn decode(text: &str) -> serde_json::Result<Option<Self>> {
        let frame: Frame = serde_json::from_str(text)?;
        let payload = frame.payload;

        let message = match frame.metadata.message_type.as_str() {
            "session_welcome" => Self::SessionWelcome {
                session: payload.session.unwrap_or_default(),
            },
            "session_keepalive" => Self::SessionKeepalive,
            "notification" => Self::Notification {
                subscription: payload.subscription.unwrap_or_default(),
                event: payload.event.unwrap_or_default(),
            },
            "session_reconnect" => Self::SessionReconnect {
                session: payload.session.unwrap_or_default(),
            },
            "revocation" => Self::Revocation {
                subscription: payload.subscription.unwrap_or_default(),
            },
            other => {
                log::debug!("[eventsub] Unknown message type: {other}");
                return Ok(None);
            }
        };
        Ok(Some(message))
    }

    /// Wire name of the message type.
    #[must_use]
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::SessionWelcome { .. } => "session_welcome",
            Self::SessionKeepalive => "session_keepalive",
            Self::Notification { .. } => "notification",
            Self::SessionReconnect { .. } => "session_reconnect",
            Self::Revocation { .. } => "revocation",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_welcome() {
        let text = json!({
            "metadata": {
                "message_id": "96a3f3b5",
                "message_type": "session_welcome",
                "message_timestamp": "2023-07-19T14:56:51.634234626Z"
            },
            "payload": {
                "session": {
                    "id": "AQoQILE98gtqShGmLD7AM6yJThAB",
                    "status": "connected",
                    "connected_at": "2023-07-19T14:56:51.616329898Z",
                    "keepalive_timeout_seconds": 10,
                    "reconnect_url": null
                }
            }
        })
        .to_string();

        let message = EventFeedMessage::decode(&text).unwrap().unwrap();
        match message {
            EventFeedMessage::SessionWelcome { session } => {
                assert_eq!(session.id, "AQoQILE98gtqShGmLD7AM6yJThAB");
                assert_eq!(session.keepalive_timeout_seconds, Some(10));
                assert_eq!(session.reconnect_url, None);
            }
            other => panic!("expected welcome, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_keepalive_with_empty_payload() {
        let text = r#"{"metadata":{"message_type":"session_keepalive"},"payload":{}}"#;
        assert_eq!(
            EventFeedMessage::decode(text).unwrap(),
            Some(EventFeedMessage::SessionKeepalive)
        );
    }

    #[test]
    fn test_decode_notification() {
        let text = json!({
            "metadata": {
                "message_type": "notification",
                "subscription_type": "channel.channel_points_custom_reward_redemption.add"
            },
            "payload": {
                "subscription": {"id": "sub-1", "type": "channel.channel_points_custom_reward_redemption.add"},
                "event": {"user_login": "viewer", "reward": {"title": "Hydrate"}}
            }
        })
        .to_string();

        let message = EventFeedMessage::decode(&text).unwrap().unwrap();
        assert_eq!(message.message_type(), "notification");
        match message {
            EventFeedMessage::Notification { event, .. } => {
                assert_eq!(event["reward"]["title"], "Hydrate");
            }
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_unknown_type_is_none() {
        let text = r#"{"metadata":{"message_type":"something_new"},"payload":{}}"#;
        assert_eq!(EventFeedMessage::decode(text).unwrap(), None);
    }

    #[test]
    fn test_decode_garbage_is_error() {
        assert!(EventFeedMessage::decode("not json").is_err());
    }
}
