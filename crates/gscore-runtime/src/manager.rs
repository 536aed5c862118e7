//! The live connection table.
//!
//! [`ConnectionManager`] maps each bot id to at most one live transport. A
//! newer connection for the same bot replaces the entry; every connection
//! carries a generation number so a late close from the replaced socket can
//! be told apart from a close of the current one.
//!
//! The table sits behind one `parking_lot::RwLock` and no lock is held across
//! an `.await`: lookups clone the transport handle out, then send.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use futures::future::join_all;
use gscore_core::{
    BoxedTransport, CLOSE_GOING_AWAY, ConnectionInfo, MessageSend, Transport, TransportError,
    TransportResult,
};
use gscore_framework::Outbound;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::hooks::{self, ConnectHook};

/// Snapshot of one registered connection.
#[derive(Debug, Clone)]
pub struct ConnectedBot {
    pub bot_id: String,
    pub generation: u64,
    pub info: ConnectionInfo,
    pub connected_at: Instant,
}

struct BotEntry {
    transport: BoxedTransport,
    bot: ConnectedBot,
}

/// Per-bot result of a [`ConnectionManager::broadcast`].
#[derive(Debug, Default)]
pub struct BroadcastReport {
    pub delivered: Vec<String>,
    pub failed: Vec<(String, TransportError)>,
}

impl BroadcastReport {
    /// Returns `true` if every bot received the message.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Registry of live bot connections.
pub struct ConnectionManager {
    bots: RwLock<HashMap<String, BotEntry>>,
    generation: AtomicU64,
    connect_hooks: RwLock<Vec<ConnectHook>>,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            bots: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            connect_hooks: RwLock::new(Vec::new()),
        }
    }

    /// Registers a hook fired each time a bot connects.
    pub fn on_connect<F, Fut>(&self, hook: F)
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.connect_hooks.write().push(hooks::connect_hook(hook));
    }

    /// Registers `transport` as the live connection for `bot_id`.
    ///
    /// Returns the generation of the new connection. A previous connection
    /// for the same bot only loses its table entry; its socket stays open
    /// until the peer closes it. Connect hooks are started in the background.
    pub async fn connect(
        &self,
        bot_id: &str,
        info: ConnectionInfo,
        transport: BoxedTransport,
    ) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let entry = BotEntry {
            transport,
            bot: ConnectedBot {
                bot_id: bot_id.to_string(),
                generation,
                info,
                connected_at: Instant::now(),
            },
        };
        let replaced = self.bots.write().insert(bot_id.to_string(), entry);

        if let Some(old) = replaced {
            info!(
                bot_id = %bot_id,
                old_generation = old.bot.generation,
                generation,
                "Replacing existing connection"
            );
        }
        info!(bot_id = %bot_id, generation, "Bot connected");

        self.fire_connect_hooks(bot_id);
        generation
    }

    fn fire_connect_hooks(&self, bot_id: &str) {
        let hooks: Vec<_> = self
            .connect_hooks
            .read()
            .iter()
            .map(|hook| hook(bot_id.to_string()))
            .collect();
        if hooks.is_empty() {
            return;
        }
        tokio::spawn(hooks::run_all("bot_connect", hooks));
    }

    /// Closes and removes the connection for `bot_id`.
    ///
    /// Returns `false` if the bot was not connected.
    pub async fn disconnect(&self, bot_id: &str) -> bool {
        let removed = self.bots.write().remove(bot_id);
        match removed {
            Some(entry) => {
                entry.transport.close(CLOSE_GOING_AWAY).await;
                warn!(bot_id = %bot_id, generation = entry.bot.generation, "Bot disconnected");
                true
            }
            None => false,
        }
    }

    /// Like [`disconnect`](Self::disconnect), but only if the registered
    /// connection is still `generation`.
    pub async fn disconnect_if_current(&self, bot_id: &str, generation: u64) -> bool {
        let removed = {
            let mut bots = self.bots.write();
            let current = bots.get(bot_id).map(|e| e.bot.generation);
            match current {
                Some(current) if current == generation => bots.remove(bot_id),
                Some(current) => {
                    debug!(
                        bot_id = %bot_id,
                        generation,
                        current,
                        "Ignoring close of a replaced connection"
                    );
                    None
                }
                None => None,
            }
        };

        match removed {
            Some(entry) => {
                entry.transport.close(CLOSE_GOING_AWAY).await;
                warn!(bot_id = %bot_id, generation, "Bot disconnected");
                true
            }
            None => false,
        }
    }

    /// Closes every connection, e.g. on shutdown.
    pub async fn close_all(&self, code: u16) {
        let entries: Vec<_> = self.bots.write().drain().collect();
        for (bot_id, entry) in entries {
            entry.transport.close(code).await;
            info!(bot_id = %bot_id, code, "Connection closed");
        }
    }

    /// Sends a message to one bot.
    pub async fn send(&self, bot_id: &str, message: &MessageSend) -> TransportResult<()> {
        self.send_raw(bot_id, message.encode().into_bytes()).await
    }

    /// Sends an encoded frame to one bot.
    ///
    /// A send that finds the connection closed evicts it.
    pub async fn send_raw(&self, bot_id: &str, data: Vec<u8>) -> TransportResult<()> {
        let (transport, generation) = self
            .bots
            .read()
            .get(bot_id)
            .map(|e| (e.transport.clone(), e.bot.generation))
            .ok_or_else(|| TransportError::not_connected(bot_id))?;

        match transport.send(data).await {
            Err(e) if e.is_closed() => {
                self.disconnect_if_current(bot_id, generation).await;
                Err(e)
            }
            result => result,
        }
    }

    /// Sends a message to every connected bot.
    ///
    /// Each bot is attempted independently; failures are collected, not
    /// propagated.
    pub async fn broadcast(&self, message: &MessageSend) -> BroadcastReport {
        let data = message.encode().into_bytes();
        let bot_ids = self.bot_ids();

        let results = join_all(bot_ids.into_iter().map(|bot_id| {
            let data = data.clone();
            async move {
                let result = self.send_raw(&bot_id, data).await;
                (bot_id, result)
            }
        }))
        .await;

        let mut report = BroadcastReport::default();
        for (bot_id, result) in results {
            match result {
                Ok(()) => report.delivered.push(bot_id),
                Err(e) => {
                    warn!(bot_id = %bot_id, error = %e, "Broadcast delivery failed");
                    report.failed.push((bot_id, e));
                }
            }
        }
        report
    }

    pub fn is_connected(&self, bot_id: &str) -> bool {
        self.bots.read().contains_key(bot_id)
    }

    pub fn bot(&self, bot_id: &str) -> Option<ConnectedBot> {
        self.bots.read().get(bot_id).map(|e| e.bot.clone())
    }

    /// Connected bot ids, sorted.
    pub fn bot_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.bots.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.bots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("bots", &self.bot_ids())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Outbound for ConnectionManager {
    async fn send(&self, ws_id: &str, message: MessageSend) -> TransportResult<()> {
        ConnectionManager::send(self, ws_id, &message).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::Duration;

    use gscore_core::Segment;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    use super::*;

    /// Transport that records frames and close codes.
    #[derive(Default)]
    pub(crate) struct MockTransport {
        pub frames: Mutex<Vec<Vec<u8>>>,
        pub closed: Mutex<Option<u16>>,
        pub fail_with: Option<TransportError>,
    }

    impl MockTransport {
        pub(crate) fn failing(error: TransportError) -> Self {
            Self {
                fail_with: Some(error),
                ..Default::default()
            }
        }

        pub(crate) fn texts(&self) -> Vec<String> {
            self.frames
                .lock()
                .iter()
                .map(|f| String::from_utf8_lossy(f).into_owned())
                .collect()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&self, data: Vec<u8>) -> TransportResult<()> {
            if let Some(e) = &self.fail_with {
                return Err(e.clone());
            }
            self.frames.lock().push(data);
            Ok(())
        }

        async fn close(&self, code: u16) {
            *self.closed.lock() = Some(code);
        }
    }

    fn message(text: &str) -> MessageSend {
        MessageSend {
            bot_id: "onebot".into(),
            content: Some(vec![Segment::text(text)]),
            ..Default::default()
        }
    }

    async fn failing_hook(_bot_id: String) -> anyhow::Result<()> {
        anyhow::bail!("hook failed")
    }

    fn info() -> ConnectionInfo {
        ConnectionInfo::new("websocket")
    }

    #[tokio::test]
    async fn newest_connection_wins() {
        let manager = ConnectionManager::new();
        let first = Arc::new(MockTransport::default());
        let second = Arc::new(MockTransport::default());

        let g1 = manager.connect("nb2", info(), first.clone()).await;
        let g2 = manager.connect("nb2", info(), second.clone()).await;
        assert!(g2 > g1);
        assert_eq!(*first.closed.lock(), None);

        manager.send("nb2", &message("hi")).await.unwrap();
        assert!(first.frames.lock().is_empty());
        assert_eq!(second.frames.lock().len(), 1);

        // The replaced socket closing late must not evict the new one.
        assert!(!manager.disconnect_if_current("nb2", g1).await);
        assert!(manager.is_connected("nb2"));
        assert_eq!(manager.bot("nb2").unwrap().generation, g2);
    }

    #[tokio::test]
    async fn send_after_disconnect_is_not_connected() {
        let manager = ConnectionManager::new();
        let transport = Arc::new(MockTransport::default());
        manager.connect("nb2", info(), transport.clone()).await;

        assert!(manager.disconnect("nb2").await);
        assert_eq!(*transport.closed.lock(), Some(CLOSE_GOING_AWAY));
        assert!(!manager.disconnect("nb2").await);

        let err = manager.send("nb2", &message("late")).await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected { .. }));
    }

    #[tokio::test]
    async fn closed_transport_is_evicted_on_send() {
        let manager = ConnectionManager::new();
        let transport = Arc::new(MockTransport::failing(TransportError::closed("gone")));
        manager.connect("nb2", info(), transport).await;

        assert!(manager.send("nb2", &message("x")).await.is_err());
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn broadcast_isolates_failures() {
        let manager = ConnectionManager::new();
        let a = Arc::new(MockTransport::default());
        let b = Arc::new(MockTransport::failing(TransportError::SendFailed(
            "buffer full".into(),
        )));
        let c = Arc::new(MockTransport::default());
        manager.connect("a", info(), a.clone()).await;
        manager.connect("b", info(), b).await;
        manager.connect("c", info(), c.clone()).await;

        let report = manager.broadcast(&message("notice")).await;
        assert!(!report.is_complete());
        assert_eq!(report.delivered, vec!["a".to_string(), "c".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "b");
        assert_eq!(a.texts().len(), 1);
        assert_eq!(c.texts().len(), 1);
        assert!(manager.is_connected("b"));
    }

    #[tokio::test]
    async fn connect_hooks_fire_and_failures_stay_local() {
        let manager = ConnectionManager::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.on_connect(failing_hook);
        manager.on_connect(move |bot_id| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(bot_id);
                anyhow::Ok(())
            }
        });

        let generation = manager
            .connect("nb2", info(), Arc::new(MockTransport::default()))
            .await;
        assert_eq!(generation, 1);
        let fired = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert_eq!(fired.as_deref(), Some("nb2"));
        assert!(manager.is_connected("nb2"));
    }

    #[tokio::test]
    async fn serves_as_outbound() {
        let manager = Arc::new(ConnectionManager::new());
        let transport = Arc::new(MockTransport::default());
        manager.connect("nb2", info(), transport.clone()).await;

        let outbound: gscore_framework::BoxedOutbound = manager.clone();
        outbound.send("nb2", message("pong")).await.unwrap();
        let frame = MessageSend::decode(&transport.frames.lock()[0]).unwrap();
        assert_eq!(frame.plain_text(), "pong");
    }
}
