//! WebSocket server accepting bot adapter connections.
//!
//! Adapters connect to `{path}/{bot_id}` (by default `/ws/{bot_id}`). Every
//! accepted socket gets a receive loop and a send task; when either side
//! finishes the other is stopped and the [`ConnectionHandler`] is told which
//! connection generation went away.
//!
//! ```rust,ignore
//! let server = WsServer::new(WsServerConfig::default(), handler);
//! let listener = server.listen().await?;
//! // ...
//! listener.shutdown().await;
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{
        ConnectInfo, Path, State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket},
    },
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use gscore_core::{
    BoxedConnectionHandler, ConnectionHandle, ConnectionInfo, TransportError, TransportResult,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Settings for [`WsServer`].
#[derive(Debug, Clone)]
pub struct WsServerConfig {
    pub host: String,
    pub port: u16,
    /// Route prefix; the bot id is appended as the last path segment.
    pub path: String,
    /// Outgoing frames buffered per connection.
    pub send_buffer: usize,
}

impl Default for WsServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8765,
            path: "/ws".to_string(),
            send_buffer: 256,
        }
    }
}

impl WsServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Full route, e.g. `/ws/{bot_id}`.
    pub fn route(&self) -> String {
        let base = self.path.trim_end_matches('/');
        if base.starts_with('/') {
            format!("{base}/{{bot_id}}")
        } else {
            format!("/{base}/{{bot_id}}")
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

struct ServerState {
    handler: BoxedConnectionHandler,
    send_buffer: usize,
}

/// WebSocket endpoint for bot adapters.
pub struct WsServer {
    config: WsServerConfig,
    handler: BoxedConnectionHandler,
}

impl WsServer {
    pub fn new(config: WsServerConfig, handler: BoxedConnectionHandler) -> Self {
        Self { config, handler }
    }

    /// Builds the axum router serving the adapter route.
    pub fn router(&self) -> Router {
        let state = Arc::new(ServerState {
            handler: self.handler.clone(),
            send_buffer: self.config.send_buffer.max(1),
        });
        Router::new()
            .route(&self.config.route(), get(ws_handler))
            .with_state(state)
    }

    /// Binds the listener and serves in the background.
    pub async fn listen(&self) -> TransportResult<ListenerHandle> {
        let addr = self.config.bind_addr();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed {
                url: addr.clone(),
                reason: e.to_string(),
            })?;
        let local_addr = listener.local_addr()?;
        let router = self.router();
        let cancel = CancellationToken::new();

        info!(addr = %local_addr, route = %self.config.route(), "WebSocket server listening");

        let shutdown = cancel.clone();
        let task = tokio::spawn(async move {
            let server = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { shutdown.cancelled().await });

            if let Err(e) = server.await {
                error!(error = %e, "WebSocket server error");
            }
            info!("WebSocket server stopped");
        });

        Ok(ListenerHandle {
            local_addr,
            cancel,
            task,
        })
    }
}

/// A running server. Dropping the handle leaves the server running.
pub struct ListenerHandle {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// The address actually bound, including an OS-assigned port.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting connections and waits for the server task.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(bot_id): Path<String>,
    State(state): State<Arc<ServerState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> impl IntoResponse {
    info!(bot_id = %bot_id, remote_addr = %addr, "New WebSocket connection request");

    let mut metadata = HashMap::new();
    for (name, value) in headers.iter() {
        if let Ok(value) = value.to_str() {
            metadata.insert(name.as_str().to_lowercase(), value.to_string());
        }
    }

    ws.on_upgrade(move |socket| handle_socket(socket, bot_id, addr, state, metadata))
}

async fn handle_socket(
    socket: WebSocket,
    bot_id: String,
    addr: SocketAddr,
    state: Arc<ServerState>,
    headers: HashMap<String, String>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let mut info = ConnectionInfo::new("websocket").with_remote_addr(addr.to_string());
    for (key, value) in headers {
        info = info.with_metadata(key, value);
    }

    let (handle, mut outgoing, mut close_rx) = ConnectionHandle::channel(&bot_id, state.send_buffer);
    let generation = state
        .handler
        .on_connect(&bot_id, info, Arc::new(handle))
        .await;
    info!(bot_id = %bot_id, generation, remote_addr = %addr, "WebSocket connection established");

    let send_bot_id = bot_id.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                data = outgoing.recv() => {
                    let Some(data) = data else { break };
                    let text = String::from_utf8_lossy(&data).into_owned();
                    if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                        warn!(bot_id = %send_bot_id, error = %e, "Failed to send frame, connection closed");
                        break;
                    }
                }
                changed = close_rx.changed() => {
                    let code = if changed.is_ok() { *close_rx.borrow() } else { None };
                    if let Some(code) = code {
                        debug!(bot_id = %send_bot_id, code, "Closing connection");
                        let frame = CloseFrame { code, reason: String::new().into() };
                        let _ = ws_tx.send(Message::Close(Some(frame))).await;
                    }
                    break;
                }
            }
        }
    });

    let handler = state.handler.clone();
    loop {
        tokio::select! {
            _ = &mut send_task => {
                debug!(bot_id = %bot_id, "Send task finished");
                break;
            }
            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    trace!(bot_id = %bot_id, len = text.len(), "Received text frame");
                    handler.on_message(&bot_id, text.as_bytes()).await;
                }
                Some(Ok(Message::Binary(data))) => {
                    trace!(bot_id = %bot_id, len = data.len(), "Received binary frame");
                    handler.on_message(&bot_id, &data).await;
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    info!(bot_id = %bot_id, "WebSocket connection closed by client");
                    break;
                }
                Some(Err(e)) => {
                    warn!(bot_id = %bot_id, error = %e, "WebSocket error");
                    handler.on_error(&bot_id, &e.to_string()).await;
                    break;
                }
            }
        }
    }

    send_task.abort();
    handler.on_disconnect(&bot_id, generation).await;
    info!(bot_id = %bot_id, generation, "WebSocket connection closed");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use gscore_core::{BoxedTransport, CLOSE_GOING_AWAY, ConnectionHandler};
    use parking_lot::Mutex;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message as ClientMessage;

    use super::*;

    #[derive(Debug, PartialEq)]
    enum Seen {
        Connect(String),
        Message(String, String),
        Disconnect(String, u64),
    }

    struct Recorder {
        events: mpsc::UnboundedSender<Seen>,
        transport: Mutex<Option<BoxedTransport>>,
    }

    #[async_trait]
    impl ConnectionHandler for Recorder {
        async fn on_connect(
            &self,
            bot_id: &str,
            _info: ConnectionInfo,
            transport: BoxedTransport,
        ) -> u64 {
            *self.transport.lock() = Some(transport);
            let _ = self.events.send(Seen::Connect(bot_id.to_string()));
            7
        }

        async fn on_message(&self, bot_id: &str, data: &[u8]) {
            let text = String::from_utf8_lossy(data).into_owned();
            let _ = self.events.send(Seen::Message(bot_id.to_string(), text));
        }

        async fn on_disconnect(&self, bot_id: &str, generation: u64) {
            let _ = self.events.send(Seen::Disconnect(bot_id.to_string(), generation));
        }

        async fn on_error(&self, _bot_id: &str, _error: &str) {}
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Seen>) -> Seen {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[test]
    fn route_includes_bot_id() {
        assert_eq!(WsServerConfig::default().route(), "/ws/{bot_id}");
        let config = WsServerConfig::default().with_path("gscore/");
        assert_eq!(config.route(), "/gscore/{bot_id}");
    }

    #[tokio::test]
    async fn loopback_round_trip() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let recorder = Arc::new(Recorder {
            events: tx,
            transport: Mutex::new(None),
        });
        let server = WsServer::new(WsServerConfig::new("127.0.0.1", 0), recorder.clone());
        let listener = server.listen().await.unwrap();
        let url = format!("ws://{}/ws/onebot", listener.local_addr());

        let (mut client, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        let wait = Duration::from_secs(5);

        assert_eq!(next(&mut rx).await, Seen::Connect("onebot".into()));

        client
            .send(ClientMessage::Text(r#"{"user_id":"1"}"#.into()))
            .await
            .unwrap();
        assert_eq!(
            next(&mut rx).await,
            Seen::Message("onebot".into(), r#"{"user_id":"1"}"#.into())
        );

        let transport = recorder.transport.lock().clone().unwrap();
        transport.send(b"reply".to_vec()).await.unwrap();
        let frame = tokio::time::timeout(wait, client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(frame.into_text().unwrap().as_str(), "reply");

        transport.close(CLOSE_GOING_AWAY).await;
        assert_eq!(next(&mut rx).await, Seen::Disconnect("onebot".into(), 7));

        listener.shutdown().await;
    }
}
