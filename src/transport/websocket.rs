//! WebSocket transport.
//!
//! Thin wrapper around `tokio-tungstenite`. Each [`WsConnector::connect`]
//! spawns one tokio task that owns the WebSocket: it performs the handshake,
//! forwards frames to the socket's event queue as
//! `(generation, TransportEvent)` pairs, answers pings, and writes frames
//! queued through [`WsTransport::send_text`].
//!
//! # Threading Model
//!
//! ```text
//! Socket ── WsTransport::send_text ──► mpsc ──► connection task ──► WebSocket
//!   ▲                                                │
//!   └──── handle_event ◄── mpsc<(Generation, TransportEvent)> ◄──┘
//! ```
//!
//! The task always finishes by emitting exactly one
//! [`TransportEvent::Close`], whether the peer closed, the read failed, or
//! the socket asked for a close. Frames `send_text` accepted but the task
//! never wrote are handed back in a [`TransportEvent::Unsent`] just before
//! that close.

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;

use super::{Connector, Generation, Transport, TransportError, TransportEvent};

/// Close code reported when the connection ends without a close frame.
const ABNORMAL_CLOSE: u16 = 1006;

/// Concrete WebSocket stream type.
type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

type WsSink = futures_util::stream::SplitSink<WsStream, tungstenite::Message>;
type WsSource = futures_util::stream::SplitStream<WsStream>;

/// Sender half of the socket's transport event queue.
pub type EventSender = mpsc::UnboundedSender<(Generation, TransportEvent)>;

/// Receiver half of the socket's transport event queue.
pub type EventReceiver = mpsc::UnboundedReceiver<(Generation, TransportEvent)>;

/// Command from the socket to a connection task.
#[derive(Debug)]
enum WsOutgoing {
    /// Send a UTF-8 text frame.
    Text(String),
    /// Initiate a graceful close.
    Close,
}

/// Connector that opens WebSocket transports to a fixed URL.
#[derive(Debug)]
pub struct WsConnector {
    url: String,
    events_tx: EventSender,
}

impl WsConnector {
    /// Create a connector and the event queue its transports report into.
    pub fn new(url: impl Into<String>) -> (Self, EventReceiver) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                url: url.into(),
                events_tx,
            },
            events_rx,
        )
    }

    /// The endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for WsConnector {
    type Transport = WsTransport;

    fn connect(&mut self, generation: Generation) -> Result<WsTransport, TransportError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TransportError::ConnectFailed(format!("no tokio runtime: {e}")))?;

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        log::info!("[WebSocket] Connecting to {} (generation {})", self.url, generation);
        runtime.spawn(run_connection(
            self.url.clone(),
            generation,
            outgoing_rx,
            self.events_tx.clone(),
        ));

        Ok(WsTransport { outgoing_tx })
    }
}

/// Handle to one connection task.
#[derive(Debug)]
pub struct WsTransport {
    outgoing_tx: mpsc::UnboundedSender<WsOutgoing>,
}

impl Transport for WsTransport {
    fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.outgoing_tx
            .send(WsOutgoing::Text(text))
            .map_err(|_unsent| TransportError::Closed)
    }

    fn close(&mut self) {
        let _ = self.outgoing_tx.send(WsOutgoing::Close);
    }
}

/// Perform the WebSocket handshake.
///
/// # Errors
///
/// Returns an error if the URL is invalid or the handshake fails.
async fn handshake(url: &str) -> Result<(WsSink, WsSource)> {
    use tungstenite::client::IntoClientRequest;

    let request = url
        .into_client_request()
        .with_context(|| format!("invalid WebSocket URL: {url}"))?;

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .context("WebSocket connect failed")?;

    Ok(ws_stream.split())
}

/// Drive one WebSocket connection until it closes.
async fn run_connection(
    url: String,
    generation: Generation,
    mut outgoing_rx: mpsc::UnboundedReceiver<WsOutgoing>,
    events_tx: EventSender,
) {
    let emit = |event: TransportEvent| {
        let _ = events_tx.send((generation, event));
    };

    let (mut sink, mut stream) = match handshake(&url).await {
        Ok(pair) => pair,
        Err(e) => {
            log::warn!("[WebSocket] Connection failed: {e:#}");
            emit(TransportEvent::Error(format!("{e:#}")));
            let unsent = drain_unsent(None, &mut outgoing_rx);
            finish(&emit, unsent, ABNORMAL_CLOSE, "connect failed".to_string());
            return;
        }
    };

    log::info!("[WebSocket] Connected (generation {})", generation);
    emit(TransportEvent::Open);

    // Frame that failed to write, if the connection ended on a send.
    let mut failed: Option<String> = None;

    let (code, reason) = loop {
        tokio::select! {
            biased;

            msg = stream.next() => {
                match msg {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        emit(TransportEvent::Message(text.to_string()));
                    }
                    Some(Ok(tungstenite::Message::Binary(data))) => {
                        // Phoenix JSON serializer only sends text; accept UTF-8 binary anyway.
                        match String::from_utf8(data.to_vec()) {
                            Ok(text) => emit(TransportEvent::Message(text)),
                            Err(_) => log::debug!("[WebSocket] Dropping non-UTF-8 binary frame"),
                        }
                    }
                    Some(Ok(tungstenite::Message::Ping(data))) => {
                        let _ = sink.send(tungstenite::Message::Pong(data)).await;
                    }
                    Some(Ok(tungstenite::Message::Close(close_frame))) => {
                        let (code, reason) = close_frame
                            .map(|cf| (cf.code.into(), cf.reason.to_string()))
                            .unwrap_or((1005, String::new()));
                        log::info!("[WebSocket] Closed by server ({code})");
                        break (code, reason);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::warn!("[WebSocket] Read error: {e}");
                        emit(TransportEvent::Error(format!("WebSocket read error: {e}")));
                        break (ABNORMAL_CLOSE, e.to_string());
                    }
                    None => {
                        log::info!("[WebSocket] Stream ended");
                        break (ABNORMAL_CLOSE, "stream ended".to_string());
                    }
                }
            }

            cmd = outgoing_rx.recv() => {
                match cmd {
                    Some(WsOutgoing::Text(text)) => {
                        if let Err(e) = sink.send(tungstenite::Message::Text(text.clone())).await {
                            log::warn!("[WebSocket] Send failed: {e}");
                            emit(TransportEvent::Error(format!("WebSocket send failed: {e}")));
                            failed = Some(text);
                            break (ABNORMAL_CLOSE, e.to_string());
                        }
                    }
                    Some(WsOutgoing::Close) | None => {
                        let _ = sink.send(tungstenite::Message::Close(None)).await;
                        let _ = sink.close().await;
                        emit(TransportEvent::Close {
                            code: 1000,
                            reason: "client closed".to_string(),
                        });
                        return;
                    }
                }
            }
        }
    };

    finish(&emit, drain_unsent(failed, &mut outgoing_rx), code, reason);
}

/// Report unwritten frames, then the close.
fn finish(emit: &impl Fn(TransportEvent), unsent: Vec<String>, code: u16, reason: String) {
    if !unsent.is_empty() {
        log::warn!("[WebSocket] {} frame(s) not written before close", unsent.len());
        emit(TransportEvent::Unsent(unsent));
    }
    emit(TransportEvent::Close { code, reason });
}

/// Stop accepting frames and collect the ones still queued, oldest first.
///
/// After this, [`WsTransport::send_text`] fails with
/// [`TransportError::Closed`].
fn drain_unsent(
    failed: Option<String>,
    outgoing_rx: &mut mpsc::UnboundedReceiver<WsOutgoing>,
) -> Vec<String> {
    outgoing_rx.close();
    let mut unsent: Vec<String> = failed.into_iter().collect();
    while let Ok(cmd) = outgoing_rx.try_recv() {
        if let WsOutgoing::Text(text) = cmd {
            unsent.push(text);
        }
    }
    unsent
}

/// Convert an HTTP(S) URL to WS(S) scheme.
///
/// Passes `ws://` and `wss://` through unchanged.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    if url.starts_with("wss://") || url.starts_with("ws://") {
        url.to_string()
    } else {
        url.replace("https://", "wss://")
            .replace("http://", "ws://")
    }
}
