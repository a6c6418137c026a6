//! Shared fixtures for integration tests.

#![allow(dead_code, reason = "each test binary uses a subset")]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use streambot::auth::{CredentialStore, Identity, IdentityKind, ProviderConfig, TokenFile, TokenPair};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// How long tests wait for an expected frame.
pub const WAIT: Duration = Duration::from_secs(5);

/// Local WebSocket server handing out accepted connections.
pub struct WsServer {
    pub url: String,
    connections: mpsc::UnboundedReceiver<Peer>,
}

impl WsServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        let (tx, connections) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                    if tx.send(Peer { ws }).is_err() {
                        return;
                    }
                }
            }
        });
        Self { url, connections }
    }

    /// Next accepted connection.
    pub async fn accept(&mut self) -> Peer {
        tokio::time::timeout(WAIT, self.connections.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("server stopped")
    }

    /// Connection accepted within `within`, if any.
    pub async fn try_accept(&mut self, within: Duration) -> Option<Peer> {
        tokio::time::timeout(within, self.connections.recv()).await.ok().flatten()
    }
}

/// Server side of one connection.
pub struct Peer {
    ws: WebSocketStream<TcpStream>,
}

impl Peer {
    pub async fn send(&mut self, text: &str) {
        self.ws.send(Message::Text(text.to_string())).await.unwrap();
    }

    /// Next message of any kind, `None` once the stream ends.
    pub async fn next(&mut self) -> Option<Message> {
        tokio::time::timeout(WAIT, self.ws.next())
            .await
            .expect("timed out waiting for a frame")
            .and_then(Result::ok)
    }

    /// Next text frame; panics on anything else.
    pub async fn text(&mut self) -> String {
        match self.next().await {
            Some(Message::Text(text)) => text,
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}

/// Store for `kind` that already holds `access`.
pub fn authenticated_store(data_dir: &Path, kind: IdentityKind, access: &str) -> Arc<CredentialStore> {
    authenticated_store_at("http://127.0.0.1:1", data_dir, kind, access)
}

/// Like [`authenticated_store`], talking to the provider at `base_url`.
pub fn authenticated_store_at(
    base_url: &str,
    data_dir: &Path,
    kind: IdentityKind,
    access: &str,
) -> Arc<CredentialStore> {
    let identity = Identity {
        kind,
        id: "1234".to_string(),
        display_name: "botty".to_string(),
        scope: "chat:read chat:edit".to_string(),
    };
    let provider = ProviderConfig {
        base_url: base_url.to_string(),
        client_id: "client".to_string(),
        client_secret: "secret".to_string(),
        redirect_uri: "http://localhost:3000/redirect".to_string(),
        headless: true,
    };
    let store = CredentialStore::new(identity, provider, TokenFile::new(data_dir, kind));
    store
        .accept(&TokenPair {
            access_token: access.to_string(),
            refresh_token: "refresh".to_string(),
        })
        .unwrap();
    Arc::new(store)
}

/// Welcome frame for session `id`.
pub fn welcome(id: &str) -> String {
    serde_json::json!({
        "metadata": {
            "message_id": "m-1",
            "message_type": "session_welcome",
            "message_timestamp": "2024-01-01T00:00:00Z"
        },
        "payload": {
            "session": {
                "id": id,
                "status": "connected",
                "keepalive_timeout_seconds": 10,
                "reconnect_url": null
            }
        }
    })
    .to_string()
}
