//! Persistent WebSocket link to the realtime endpoint.
//!
//! One link-loop task owns the socket and interleaves both directions:
//! inbound frames are decoded once and forwarded in arrival order over the
//! event channel, outbound events are drained from a bounded command queue.
//! Callers never touch the socket; `send` is non-blocking and `close` is
//! idempotent with a bounded close handshake.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use futures_util::stream::{SplitSink, SplitStream};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use crate::config::Config;
use crate::error::ConnectError;
use crate::protocol::{ClientEvent, ServerEvent, decode_server_event};

/// How long the link loop will wait on the close handshake before giving up.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

const OUTBOUND_QUEUE: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Closed,
}

/// Atomic cell for `ConnectionState`, shared between the handle and the
/// link loop.
struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn set(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }

    fn get(&self) -> ConnectionState {
        match self.0.load(Ordering::Acquire) {
            0 => ConnectionState::Disconnected,
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

pub struct Transport {
    state: Arc<StateCell>,
    cmd_tx: mpsc::Sender<ClientEvent>,
    shutdown_tx: watch::Sender<bool>,
    link: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    sends_dropped: AtomicU64,
}

impl Transport {
    /// Establish the secure channel and start the link loop. Decoded inbound
    /// events are delivered, in arrival order, on `events`.
    pub async fn connect(
        config: &Config,
        events: mpsc::Sender<ServerEvent>,
    ) -> Result<Self, ConnectError> {
        let state = Arc::new(StateCell::new(ConnectionState::Disconnected));
        state.set(ConnectionState::Connecting);

        let url = Url::parse(&config.ws_url)?;
        let host = url.host_str().unwrap_or_default();

        let request = tokio_tungstenite::tungstenite::http::Request::builder()
            .method("GET")
            .uri(config.ws_url.as_str())
            .header("Host", host)
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tokio_tungstenite::tungstenite::handshake::client::generate_key(),
            )
            .header("Authorization", format!("Bearer {}", config.api_key))
            .header("OpenAI-Beta", "realtime=v1")
            .body(())?;

        log::info!("Connecting to {}", config.ws_url);
        let (ws_stream, _) = connect_async(request).await?;
        state.set(ConnectionState::Connected);
        log::info!("Connected");

        let (cmd_tx, cmd_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let link = {
            let state = state.clone();
            tokio::spawn(link_loop(ws_stream, cmd_rx, events, state, shutdown_rx))
        };

        Ok(Self {
            state,
            cmd_tx,
            shutdown_tx,
            link: tokio::sync::Mutex::new(Some(link)),
            sends_dropped: AtomicU64::new(0),
        })
    }

    /// Enqueue an outbound event. Returns immediately; when the connection
    /// is not up (or the queue is full) the event is dropped with a warning.
    pub fn send(&self, event: ClientEvent) {
        if self.state.get() != ConnectionState::Connected {
            self.sends_dropped.fetch_add(1, Ordering::Relaxed);
            log::warn!("Dropping outbound event, connection not up");
            return;
        }
        if self.cmd_tx.try_send(event).is_err() {
            self.sends_dropped.fetch_add(1, Ordering::Relaxed);
            log::warn!("Dropping outbound event, queue full or link gone");
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn sends_dropped(&self) -> u64 {
        self.sends_dropped.load(Ordering::Relaxed)
    }

    /// Shut the link down and wait for the loop to finish. Safe to call
    /// more than once and from any task.
    pub async fn close(&self) {
        match self.state.get() {
            ConnectionState::Closing | ConnectionState::Closed => return,
            _ => {}
        }
        self.state.set(ConnectionState::Closing);
        let _ = self.shutdown_tx.send(true);
        if let Some(link) = self.link.lock().await.take() {
            let _ = link.await;
        }
        self.state.set(ConnectionState::Closed);
    }
}

async fn link_loop(
    ws_stream: WsStream,
    mut cmd_rx: mpsc::Receiver<ClientEvent>,
    events: mpsc::Sender<ServerEvent>,
    state: Arc<StateCell>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                log::info!("Link shutdown requested");
                break;
            }

            msg = read.next() => {
                if !handle_inbound(msg, &events).await {
                    break;
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(event) => {
                        if !write_outbound(&mut write, event).await {
                            break;
                        }
                    }
                    // All senders dropped: the session is tearing down.
                    None => break,
                }
            }
        }
    }

    state.set(ConnectionState::Closing);
    finish(write, read).await;
    state.set(ConnectionState::Closed);
    log::info!("Link loop exited");
}

/// Process one inbound frame. Returns false when the loop should stop.
async fn handle_inbound(
    msg: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
    events: &mpsc::Sender<ServerEvent>,
) -> bool {
    match msg {
        Some(Ok(Message::Text(text))) => {
            match decode_server_event(&text) {
                Ok(event) => {
                    if events.send(event).await.is_err() {
                        log::warn!("Event consumer gone, closing link");
                        return false;
                    }
                }
                // One bad message is not fatal to the link.
                Err(e) => log::warn!("Dropping undecodable message: {}", e),
            }
            true
        }
        Some(Ok(Message::Close(frame))) => {
            log::info!("Server closed connection: {:?}", frame);
            false
        }
        // Ping/pong are answered by tungstenite; binary frames are not part
        // of this protocol.
        Some(Ok(_)) => true,
        Some(Err(e)) => {
            log::error!("Link read error: {}", e);
            false
        }
        None => {
            log::info!("Link stream ended");
            false
        }
    }
}

/// Serialize and write one outbound event. Returns false on a dead socket.
async fn write_outbound(write: &mut SplitSink<WsStream, Message>, event: ClientEvent) -> bool {
    match event.to_json() {
        Ok(json) => {
            if let Err(e) = write.send(Message::Text(json.into())).await {
                log::error!("Link write error: {}", e);
                return false;
            }
            true
        }
        Err(e) => {
            log::error!("Failed to serialize outbound event: {}", e);
            true
        }
    }
}

/// Best-effort close handshake, bounded so shutdown can never hang on a
/// broken connection.
async fn finish(write: SplitSink<WsStream, Message>, read: SplitStream<WsStream>) {
    if let Ok(mut ws) = write.reunite(read) {
        let _ = tokio::time::timeout(CLOSE_TIMEOUT, ws.close(None)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_cell_round_trips_every_state() {
        let states = [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Closing,
            ConnectionState::Closed,
        ];
        let cell = StateCell::new(ConnectionState::Disconnected);
        for s in states {
            cell.set(s);
            assert_eq!(cell.get(), s);
        }
    }
}
