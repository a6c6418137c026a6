//! Shared WebSocket transport.
//!
//! Thin wrapper around `tokio-tungstenite` providing type-isolated
//! reader/writer halves. The chat client and the event-feed client both
//! go through this module rather than `tokio-tungstenite` directly.
//!
//! [`connect`] handles URL→request building and TLS negotiation and returns
//! a ([`WsWriter`], [`WsReader`]) pair ready for use in `tokio::select!` loops.

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::CloseFrame;

/// Concrete WebSocket stream type (avoids repeating the generic everywhere).
type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Close code sent by an explicit `close()`: normal closure, as opposed to
/// the "no status" code a dropped socket reports.
pub const NORMAL_CLOSE_CODE: u16 = 1000;

/// Close code reported when the stream ends without a close frame.
pub const ABNORMAL_CLOSE_CODE: u16 = 1006;

/// Close code for a close frame that carried no status.
const NO_STATUS_CODE: u16 = 1005;

/// Write half of a WebSocket connection.
#[derive(Debug)]
pub struct WsWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

impl WsWriter {
    /// Send a UTF-8 text frame.
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Text(text.to_string()))
            .await
            .context("WebSocket send_text failed")
    }

    /// Send a close frame carrying `code` and `reason`, then close the sink.
    pub async fn close_with(&mut self, code: u16, reason: &str) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        self.sink
            .send(tungstenite::Message::Close(Some(frame)))
            .await
            .context("WebSocket send_close failed")?;
        self.sink.close().await.context("WebSocket close failed")
    }
}

/// Read half of a WebSocket connection.
#[derive(Debug)]
pub struct WsReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

impl WsReader {
    /// Receive the next text payload.
    ///
    /// Binary frames are decoded lossily; control frames are skipped
    /// (tungstenite answers pings itself). Returns `Err` with the close
    /// code once the connection is gone.
    pub async fn recv_text(&mut self) -> std::result::Result<String, Closed> {
        loop {
            let message = match self.stream.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Err(Closed::abnormal(e.to_string())),
                None => return Err(Closed::abnormal("stream ended")),
            };
            match message {
                tungstenite::Message::Text(text) => return Ok(text.to_string()),
                tungstenite::Message::Binary(data) => {
                    return Ok(String::from_utf8_lossy(&data).into_owned());
                }
                tungstenite::Message::Close(frame) => {
                    let (code, reason) = frame
                        .map(|cf| (cf.code.into(), cf.reason.to_string()))
                        .unwrap_or((NO_STATUS_CODE, String::new()));
                    return Err(Closed { code, reason });
                }
                tungstenite::Message::Ping(_)
                | tungstenite::Message::Pong(_)
                | tungstenite::Message::Frame(_) => {}
            }
        }
    }
}

/// Terminal state of a read half.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Closed {
    /// WebSocket close code.
    pub code: u16,
    /// Close reason or transport error text.
    pub reason: String,
}

impl Closed {
    fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: ABNORMAL_CLOSE_CODE,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for Closed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "connection closed ({}): {}", self.code, self.reason)
    }
}

/// Connect to a WebSocket URL.
///
/// Returns split (writer, reader) halves for independent use in
/// `tokio::select!` loops.
///
/// # Errors
///
/// Returns an error if the URL is invalid or the WebSocket handshake fails.
pub async fn connect(url: &str) -> Result<(WsWriter, WsReader)> {
    use tungstenite::client::IntoClientRequest;

    let request = url
        .into_client_request()
        .with_context(|| format!("invalid WebSocket URL: {url}"))?;

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .with_context(|| format!("WebSocket connect to {url} failed"))?;

    let (sink, stream) = ws_stream.split();

    Ok((WsWriter { sink }, WsReader { stream }))
}

/// Split a text payload into protocol lines, dropping empty ones.
///
/// The chat service batches several `\r\n`-terminated lines in one frame.
pub fn lines(payload: &str) -> impl Iterator<Item = &str> {
    payload
        .split('\n')
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.is_empty())
}
