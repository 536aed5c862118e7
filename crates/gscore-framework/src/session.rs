//! Advisory per-conversation session bookkeeping.
//!
//! Every handler invocation holds a [`SessionPermit`] for its session id.
//! Permits are reference counted per key, so overlapping invocations for the
//! same conversation never erase each other's entry, and the entry disappears
//! when the last permit drops, whether the handler returned, failed, panicked
//! or was cancelled.
//!
//! The guard does not reject reentry. It only records who is in flight and
//! hosts reply waiters for multi-step conversations:
//!
//! - a *session* waiter receives the next message from the same user in the
//!   same conversation;
//! - a *multiply* waiter receives the next message from anyone in the same
//!   group (or the same user, for direct chats).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use gscore_core::Event;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::trace;

use crate::error::SessionError;

struct Waiter {
    token: u64,
    multiply: bool,
    tx: oneshot::Sender<Event>,
}

struct SessionEntry {
    inflight: usize,
    multiply_key: Option<String>,
    waiter: Option<Waiter>,
}

#[derive(Default)]
struct SessionTable {
    sessions: HashMap<String, SessionEntry>,
    /// multiply key -> session id owning a multiply waiter.
    multiply: HashMap<String, String>,
}

impl SessionTable {
    fn take_waiter(&mut self, session_id: &str) -> Option<Waiter> {
        let entry = self.sessions.get_mut(session_id)?;
        let waiter = entry.waiter.take()?;
        if waiter.multiply
            && let Some(key) = &entry.multiply_key
            && self.multiply.get(key).is_some_and(|owner| owner == session_id)
        {
            self.multiply.remove(key);
        }
        Some(waiter)
    }

    fn take_multiply_waiter(&mut self, session_id: &str) -> Option<Waiter> {
        let is_multiply = self
            .sessions
            .get(session_id)
            .and_then(|e| e.waiter.as_ref())
            .is_some_and(|w| w.multiply);
        if is_multiply {
            self.take_waiter(session_id)
        } else {
            None
        }
    }
}

/// Shared session table. Cloning yields another handle to the same table.
#[derive(Clone, Default)]
pub struct SessionGuard {
    table: Arc<Mutex<SessionTable>>,
    tokens: Arc<AtomicU64>,
}

impl SessionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one invocation for `session_id`.
    ///
    /// The returned permit releases the record when dropped.
    pub fn admit(&self, session_id: &str, multiply_key: Option<&str>) -> SessionPermit {
        let mut table = self.table.lock();
        let entry = table
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionEntry {
                inflight: 0,
                multiply_key: None,
                waiter: None,
            });
        entry.inflight += 1;
        if entry.multiply_key.is_none() {
            entry.multiply_key = multiply_key.map(str::to_string);
        }
        trace!(session = %session_id, inflight = entry.inflight, "Session admitted");

        SessionPermit {
            guard: self.clone(),
            session_id: session_id.to_string(),
        }
    }

    fn release(&self, session_id: &str) {
        let mut table = self.table.lock();
        let Some(entry) = table.sessions.get_mut(session_id) else {
            return;
        };
        entry.inflight = entry.inflight.saturating_sub(1);
        if entry.inflight > 0 {
            return;
        }

        if let Some(entry) = table.sessions.remove(session_id)
            && let Some(key) = entry.multiply_key
            && table.multiply.get(&key).is_some_and(|owner| owner == session_id)
        {
            table.multiply.remove(&key);
        }
        trace!(session = %session_id, "Session released");
    }

    /// Returns `true` while at least one invocation holds `session_id`.
    pub fn is_active(&self, session_id: &str) -> bool {
        self.table.lock().sessions.contains_key(session_id)
    }

    /// Number of invocations currently holding `session_id`.
    pub fn in_flight(&self, session_id: &str) -> usize {
        self.table
            .lock()
            .sessions
            .get(session_id)
            .map_or(0, |e| e.inflight)
    }

    /// Number of active sessions.
    pub fn len(&self) -> usize {
        self.table.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offers an inbound event to a waiting handler.
    ///
    /// Returns `None` if a waiter took the event, or gives it back otherwise.
    pub fn offer(&self, event: Event) -> Option<Event> {
        let session_id = event.session_id();
        let multiply_key = event.multiply_key();

        let waiter = {
            let mut table = self.table.lock();
            let mut waiter = table.take_waiter(&session_id);
            if waiter.is_none()
                && let Some(owner) = table.multiply.get(&multiply_key).cloned()
            {
                waiter = table.take_multiply_waiter(&owner);
            }
            waiter
        };

        match waiter {
            Some(waiter) => match waiter.tx.send(event) {
                Ok(()) => {
                    trace!(session = %session_id, "Event delivered to waiter");
                    None
                }
                Err(event) => Some(event),
            },
            None => Some(event),
        }
    }

    /// Registers a reply waiter on an active session.
    ///
    /// A new waiter replaces any earlier one for the same session.
    pub fn wait(&self, session_id: &str, multiply: bool) -> Result<PendingReply, SessionError> {
        let token = self.tokens.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        let mut table = self.table.lock();
        let table = &mut *table;
        let entry = table
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::Inactive(session_id.to_string()))?;
        if multiply {
            let key = entry
                .multiply_key
                .clone()
                .ok_or_else(|| SessionError::Inactive(session_id.to_string()))?;
            table.multiply.insert(key, session_id.to_string());
        }
        entry.waiter = Some(Waiter { token, multiply, tx });

        Ok(PendingReply {
            guard: self.clone(),
            session_id: session_id.to_string(),
            token,
            rx: Some(rx),
        })
    }

    fn clear_waiter(&self, session_id: &str, token: u64) {
        let mut table = self.table.lock();
        let owned = table
            .sessions
            .get(session_id)
            .and_then(|e| e.waiter.as_ref())
            .is_some_and(|w| w.token == token);
        if owned {
            table.take_waiter(session_id);
        }
    }
}

impl std::fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGuard")
            .field("sessions", &self.len())
            .finish()
    }
}

/// Held for the duration of one handler invocation.
#[must_use = "the session is released as soon as the permit is dropped"]
pub struct SessionPermit {
    guard: SessionGuard,
    session_id: String,
}

impl SessionPermit {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for SessionPermit {
    fn drop(&mut self) {
        self.guard.release(&self.session_id);
    }
}

/// A registered reply waiter. Dropping it unregisters the waiter.
pub struct PendingReply {
    guard: SessionGuard,
    session_id: String,
    token: u64,
    rx: Option<oneshot::Receiver<Event>>,
}

impl PendingReply {
    /// Waits up to `timeout` for the reply.
    pub async fn recv(mut self, timeout: Duration) -> Result<Event, SessionError> {
        let Some(rx) = self.rx.take() else {
            return Err(SessionError::Inactive(self.session_id.clone()));
        };
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(event)) => Ok(event),
            Ok(Err(_)) => Err(SessionError::Inactive(self.session_id.clone())),
            Err(_) => Err(SessionError::Timeout),
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.guard.clear_waiter(&self.session_id, self.token);
    }
}
