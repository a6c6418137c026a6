//! Chat client against a local WebSocket server.

mod common;

use std::time::Duration;

use common::{authenticated_store, authenticated_store_at, WsServer, WAIT};
use streambot::auth::IdentityKind;
use streambot::irc::{ChatClient, ChatTiming, ParsedCommand, Target};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn joined() -> (
    TempDir,
    WsServer,
    common::Peer,
    ChatClient,
    mpsc::UnboundedReceiver<streambot::ParsedMessage>,
) {
    let dir = TempDir::new().unwrap();
    let mut server = WsServer::start().await;
    let store = authenticated_store(dir.path(), IdentityKind::Bot, "tok123");
    let client = ChatClient::with_timing(&server.url, "botty", "#chan", store, ChatTiming::immediate());

    client.connect().await.unwrap();
    let mut peer = server.accept().await;

    let (tx, rx) = mpsc::unbounded_channel();
    client.subscribe(tx).await;

    assert_eq!(peer.text().await, "PASS oauth:tok123");
    assert_eq!(peer.text().await, "NICK botty");
    assert_eq!(peer.text().await, "CAP REQ :twitch.tv/tags twitch.tv/commands");
    assert_eq!(peer.text().await, "JOIN #chan");

    (dir, server, peer, client, rx)
}

#[tokio::test]
async fn test_handshake_order() {
    let (_dir, _server, _peer, client, _rx) = joined().await;
    assert!(*client.subscribe_connected().borrow());
    client.close().await;
}

#[tokio::test]
async fn test_ping_answered_and_not_forwarded() {
    let (_dir, _server, mut peer, client, mut rx) = joined().await;

    peer.send("PING :tmi.twitch.tv").await;
    assert_eq!(peer.text().await, "PONG :tmi.twitch.tv");

    peer.send(":viewer!viewer@viewer.tmi.twitch.tv PRIVMSG #chan :after ping").await;
    let frame = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(
        frame.command,
        ParsedCommand::Privmsg {
            channel: "#chan".to_string(),
            text: "after ping".to_string(),
        }
    );
    client.close().await;
}

#[tokio::test]
async fn test_privmsg_forwarded_with_tags_and_normalized_text() {
    let (_dir, _server, mut peer, client, mut rx) = joined().await;

    peer.send(
        "@badge-info=;color=#FF0000;display-name=Viewer :viewer!viewer@viewer.tmi.twitch.tv PRIVMSG #chan :cafe\u{0301} \u{E0000}\r\n",
    )
    .await;

    let frame = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(frame.identifier.name.as_deref(), Some("viewer"));
    assert_eq!(
        frame.command,
        ParsedCommand::Privmsg {
            channel: "#chan".to_string(),
            text: "café".to_string(),
        }
    );
    assert_eq!(frame.decoded_tags().get("display-name"), Some("Viewer"));
    client.close().await;
}

#[tokio::test]
async fn test_numerics_and_welcome_not_forwarded() {
    let (_dir, _server, mut peer, client, mut rx) = joined().await;

    peer.send(":tmi.twitch.tv 001 botty :Welcome, GLHF!").await;
    peer.send(":tmi.twitch.tv 353 botty = #chan :botty").await;
    peer.send(":botty!botty@botty.tmi.twitch.tv JOIN #chan").await;

    let frame = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(frame.command.name(), "JOIN");
    client.close().await;
}

#[tokio::test]
async fn test_private_sends_to_default_channel_then_close() {
    let (_dir, _server, mut peer, client, _rx) = joined().await;

    assert!(client.private("hello chat", &Target::Default).await);
    assert_eq!(peer.text().await, "PRIVMSG #chan :hello chat");

    client.close().await;
    match peer.next().await {
        Some(Message::Close(Some(frame))) => assert_eq!(u16::from(frame.code), 1000),
        other => panic!("expected close frame, got {other:?}"),
    }
    assert!(client.is_closed());
    assert!(!client.private("too late", &Target::Default).await);
}

#[tokio::test]
async fn test_reconnects_after_server_drop() {
    let (_dir, mut server, peer, client, _rx) = joined().await;

    drop(peer);
    let mut peer = server.accept().await;
    assert_eq!(peer.text().await, "PASS oauth:tok123");
    assert_eq!(peer.text().await, "NICK botty");
    client.close().await;
}

const LOGIN_FAILED: &str = ":tmi.twitch.tv NOTICE * :Login authentication failed";

async fn expect_login(peer: &mut common::Peer, token: &str) {
    assert_eq!(peer.text().await, format!("PASS oauth:{token}"));
    assert_eq!(peer.text().await, "NICK botty");
    assert_eq!(peer.text().await, "CAP REQ :twitch.tv/tags twitch.tv/commands");
    assert_eq!(peer.text().await, "JOIN #chan");
}

async fn mount_invalid_access_token(provider: &MockServer, times: u64) {
    Mock::given(method("GET"))
        .and(path("/validate"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(serde_json::json!({"status": 401, "message": "invalid access token"})),
        )
        .expect(times)
        .mount(provider)
        .await;
}

#[tokio::test]
async fn test_login_failure_refreshes_and_logs_in_again() {
    let provider = MockServer::start().await;
    mount_invalid_access_token(&provider, 1).await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(query_param("grant_type", "refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "tok456",
            "refresh_token": "refresh-2"
        })))
        .expect(1)
        .mount(&provider)
        .await;

    let dir = TempDir::new().unwrap();
    let mut server = WsServer::start().await;
    let store = authenticated_store_at(&provider.uri(), dir.path(), IdentityKind::Bot, "tok123");
    let client = ChatClient::with_timing(&server.url, "botty", "#chan", store, ChatTiming::immediate());
    client.connect().await.unwrap();
    let mut peer = server.accept().await;
    let (tx, _rx) = mpsc::unbounded_channel();
    client.subscribe(tx).await;
    expect_login(&mut peer, "tok123").await;

    peer.send(LOGIN_FAILED).await;
    expect_login(&mut peer, "tok456").await;

    let on_disk: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("bot.json")).unwrap()).unwrap();
    assert_eq!(
        on_disk,
        serde_json::json!({"access_token": "tok456", "refresh_token": "refresh-2"})
    );
    client.close().await;
}

#[tokio::test]
async fn test_login_failure_with_dead_refresh_waits_for_authorization() {
    let provider = MockServer::start().await;
    mount_invalid_access_token(&provider, 1).await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(query_param("grant_type", "refresh_token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(
            serde_json::json!({"status": 400, "message": "Invalid refresh token"}),
        ))
        .expect(1)
        .mount(&provider)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=the-code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "tok789",
            "refresh_token": "refresh-3"
        })))
        .expect(1)
        .mount(&provider)
        .await;

    let dir = TempDir::new().unwrap();
    let mut server = WsServer::start().await;
    let store = authenticated_store_at(&provider.uri(), dir.path(), IdentityKind::Bot, "tok123");
    let client = ChatClient::with_timing(
        &server.url,
        "botty",
        "#chan",
        store.clone(),
        ChatTiming::immediate(),
    );
    client.connect().await.unwrap();
    let mut peer = server.accept().await;
    let (tx, _rx) = mpsc::unbounded_channel();
    client.subscribe(tx).await;
    expect_login(&mut peer, "tok123").await;

    // Server rejects the login and hangs up
    peer.send(LOGIN_FAILED).await;
    drop(peer);

    // Parked: no reconnect replaying the rejected token, one link issued
    assert!(server.try_accept(Duration::from_millis(400)).await.is_none());
    assert!(!store.is_authenticated());
    let url = store.pending_authorization().expect("authorization link issued");
    assert!(server.try_accept(Duration::from_millis(200)).await.is_none());
    assert_eq!(store.pending_authorization(), Some(url.clone()));

    let state = reqwest::Url::parse(&url)
        .unwrap()
        .query_pairs()
        .find(|(key, _)| key == "state")
        .map(|(_, value)| value.into_owned())
        .unwrap();
    store.complete_authorization(&state, "the-code").await.unwrap();

    let mut peer = server.accept().await;
    expect_login(&mut peer, "tok789").await;
    client.close().await;
}
