//! Reconnecting WebSocket client used by bot adapters.
//!
//! The client keeps one connection to the core alive. Each connection runs a
//! receive task and a send task; when either ends the other is aborted, the
//! handler is told the connection is gone, and after a constant delay the
//! client dials again. Reconnection is a plain loop, so a flapping link never
//! grows the stack.
//!
//! Frames queued through [`WsClient::sender`] survive reconnects: the send
//! queue belongs to the client, not to a single connection.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use gscore_core::{
    BoxedConnectionHandler, ConnectionHandle, ConnectionInfo, TransportError, TransportResult,
};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async_with_config};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Settings for [`WsClient`].
#[derive(Debug, Clone)]
pub struct WsClientConfig {
    /// Full endpoint, e.g. `ws://127.0.0.1:8765/ws/console`.
    pub url: String,
    /// Fixed wait between a lost connection and the next attempt.
    pub reconnect_delay: Duration,
    /// Upper bound on a single connection attempt.
    pub open_timeout: Duration,
    /// Largest accepted frame and message, in bytes.
    pub max_frame_size: usize,
    /// Outgoing frames buffered while disconnected.
    pub send_buffer: usize,
}

impl Default for WsClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8765/ws/Bot".to_string(),
            reconnect_delay: Duration::from_secs(5),
            open_timeout: Duration::from_secs(10),
            max_frame_size: 2_usize.pow(30),
            send_buffer: 256,
        }
    }
}

impl WsClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig::default()
            .max_frame_size(Some(self.max_frame_size))
            .max_message_size(Some(self.max_frame_size))
    }
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ended {
    Receive,
    Send,
    CloseRequested,
    Shutdown,
}

/// A WebSocket client that reconnects with a constant backoff.
pub struct WsClient {
    config: WsClientConfig,
    bot_id: String,
    handler: BoxedConnectionHandler,
    handle: ConnectionHandle,
    outgoing: Arc<Mutex<mpsc::Receiver<Vec<u8>>>>,
    close_rx: watch::Receiver<Option<u16>>,
}

impl WsClient {
    /// Creates a client; `bot_id` is the identity reported to the handler.
    pub fn new(
        config: WsClientConfig,
        bot_id: impl Into<String>,
        handler: BoxedConnectionHandler,
    ) -> Self {
        let bot_id = bot_id.into();
        let (handle, outgoing, close_rx) =
            ConnectionHandle::channel(bot_id.clone(), config.send_buffer.max(1));
        Self {
            config,
            bot_id,
            handler,
            handle,
            outgoing: Arc::new(Mutex::new(outgoing)),
            close_rx,
        }
    }

    /// Handle for queueing frames to the server. Closing it stops the client.
    pub fn sender(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Runs until `shutdown` is cancelled or the sender is closed.
    pub async fn run(self, shutdown: CancellationToken) -> TransportResult<()> {
        let mut attempt: u64 = 0;
        loop {
            if shutdown.is_cancelled() || self.close_requested() {
                break;
            }
            attempt += 1;

            match self.connect().await {
                Ok(stream) => {
                    let ended = self.drive(stream, &shutdown).await;
                    if matches!(ended, Ended::Shutdown | Ended::CloseRequested) {
                        break;
                    }
                    warn!(
                        bot_id = %self.bot_id,
                        ended = ?ended,
                        delay = ?self.config.reconnect_delay,
                        "Connection lost, reconnecting"
                    );
                    attempt = 0;
                }
                Err(e) => {
                    warn!(
                        bot_id = %self.bot_id,
                        attempt,
                        error = %e,
                        delay = ?self.config.reconnect_delay,
                        "Connection failed, retrying"
                    );
                    self.handler.on_error(&self.bot_id, &e.to_string()).await;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                _ = shutdown.cancelled() => break,
            }
        }

        info!(bot_id = %self.bot_id, "WebSocket client stopped");
        Ok(())
    }

    fn close_requested(&self) -> bool {
        self.close_rx.borrow().is_some()
    }

    async fn connect(&self) -> TransportResult<WsStream> {
        info!(bot_id = %self.bot_id, url = %self.config.url, "Connecting to core");
        let attempt = connect_async_with_config(
            self.config.url.as_str(),
            Some(self.config.websocket_config()),
            false,
        );
        let (stream, _response) = tokio::time::timeout(self.config.open_timeout, attempt)
            .await
            .map_err(|_| TransportError::ConnectionFailed {
                url: self.config.url.clone(),
                reason: "open timed out".to_string(),
            })?
            .map_err(|e| TransportError::ConnectionFailed {
                url: self.config.url.clone(),
                reason: e.to_string(),
            })?;
        Ok(stream)
    }

    /// Runs one connection until it ends.
    async fn drive(&self, stream: WsStream, shutdown: &CancellationToken) -> Ended {
        let info = ConnectionInfo::new("websocket").with_metadata("url", &self.config.url);
        let generation = self
            .handler
            .on_connect(&self.bot_id, info, Arc::new(self.handle.clone()))
            .await;
        info!(bot_id = %self.bot_id, generation, "Connected to core");

        let (sink, source) = stream.split();
        let mut send_task = tokio::spawn(send_loop(
            sink,
            self.outgoing.clone(),
            self.close_rx.clone(),
            self.bot_id.clone(),
        ));
        let mut recv_task = tokio::spawn(recv_loop(
            source,
            self.handler.clone(),
            self.bot_id.clone(),
        ));

        let ended = tokio::select! {
            _ = shutdown.cancelled() => Ended::Shutdown,
            result = &mut send_task => match result {
                Ok(true) => Ended::CloseRequested,
                _ => Ended::Send,
            },
            _ = &mut recv_task => Ended::Receive,
        };
        send_task.abort();
        recv_task.abort();

        self.handler.on_disconnect(&self.bot_id, generation).await;
        ended
    }
}

/// Forwards queued frames. Returns `true` if it stopped because a close was
/// requested.
async fn send_loop(
    mut sink: WsSink,
    outgoing: Arc<Mutex<mpsc::Receiver<Vec<u8>>>>,
    mut close_rx: watch::Receiver<Option<u16>>,
    bot_id: String,
) -> bool {
    let mut outgoing = outgoing.lock().await;
    loop {
        tokio::select! {
            data = outgoing.recv() => {
                let Some(data) = data else { return true };
                let text = String::from_utf8_lossy(&data).into_owned();
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    warn!(bot_id = %bot_id, error = %e, "Failed to send frame");
                    return false;
                }
            }
            changed = close_rx.changed() => {
                let code = if changed.is_ok() { *close_rx.borrow() } else { None };
                if let Some(code) = code {
                    debug!(bot_id = %bot_id, code, "Closing connection");
                    let frame = CloseFrame { code: code.into(), reason: String::new().into() };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                }
                return true;
            }
        }
    }
}

async fn recv_loop(mut source: WsSource, handler: BoxedConnectionHandler, bot_id: String) {
    while let Some(frame) = source.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                trace!(bot_id = %bot_id, len = text.len(), "Received text frame");
                handler.on_message(&bot_id, text.as_bytes()).await;
            }
            Ok(Message::Binary(data)) => {
                trace!(bot_id = %bot_id, len = data.len(), "Received binary frame");
                handler.on_message(&bot_id, &data).await;
            }
            Ok(Message::Close(frame)) => {
                info!(bot_id = %bot_id, frame = ?frame, "Server closed connection");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(bot_id = %bot_id, error = %e, "WebSocket error");
                handler.on_error(&bot_id, &e.to_string()).await;
                return;
            }
        }
    }
    info!(bot_id = %bot_id, "WebSocket stream ended");
}
