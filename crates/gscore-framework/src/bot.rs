//! The reply handle passed to every handler.
//!
//! A [`Bot`] is bound to the event that triggered the handler: [`Bot::send`]
//! answers in the originating conversation, [`Bot::target_send`] addresses
//! any conversation the same adapter can reach, and the `receive_*` helpers
//! wait for follow-up messages.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gscore_core::{Event, MessageSend, Segment, TransportResult, UserType};
use tracing::debug;

use crate::error::SessionError;
use crate::session::SessionGuard;

// ============================================================================
// Outbound
// ============================================================================

/// Where outgoing messages go. Implemented by the connection manager.
#[async_trait]
pub trait Outbound: Send + Sync {
    /// Sends one message through the connection registered as `ws_id`.
    async fn send(&self, ws_id: &str, message: MessageSend) -> TransportResult<()>;
}

/// Shared outbound sink.
pub type BoxedOutbound = Arc<dyn Outbound>;

// ============================================================================
// Content
// ============================================================================

/// Values that can be sent as message content.
pub trait IntoSegments {
    fn into_segments(self) -> Vec<Segment>;
}

impl IntoSegments for &str {
    fn into_segments(self) -> Vec<Segment> {
        vec![Segment::text(self)]
    }
}

impl IntoSegments for String {
    fn into_segments(self) -> Vec<Segment> {
        vec![Segment::text(self)]
    }
}

impl IntoSegments for Segment {
    fn into_segments(self) -> Vec<Segment> {
        vec![self]
    }
}

impl IntoSegments for Vec<Segment> {
    fn into_segments(self) -> Vec<Segment> {
        self
    }
}

// ============================================================================
// Bot
// ============================================================================

/// Reply handle bound to one triggering event.
#[derive(Clone)]
pub struct Bot {
    outbound: BoxedOutbound,
    sessions: SessionGuard,
    ws_id: String,
    bot_id: String,
    bot_self_id: String,
    msg_id: String,
    user_type: UserType,
    target_id: String,
    session_id: String,
}

impl Bot {
    /// Creates a handle answering `event`.
    pub fn new(outbound: BoxedOutbound, sessions: SessionGuard, event: &Event) -> Self {
        Self {
            outbound,
            sessions,
            ws_id: if event.ws_id.is_empty() {
                event.bot_id.clone()
            } else {
                event.ws_id.clone()
            },
            bot_id: event.bot_id.clone(),
            bot_self_id: event.bot_self_id.clone(),
            msg_id: event.msg_id.clone(),
            user_type: event.user_type,
            target_id: event.target_id(),
            session_id: event.session_id(),
        }
    }

    pub fn bot_id(&self) -> &str {
        &self.bot_id
    }

    /// Connection replies are sent through.
    pub fn ws_id(&self) -> &str {
        &self.ws_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Replies in the conversation the event came from.
    pub async fn send(&self, content: impl IntoSegments) -> TransportResult<()> {
        let target = self.target_id.clone();
        self.target_send(content, self.user_type, target).await
    }

    /// Sends to an explicit conversation through the same adapter.
    pub async fn target_send(
        &self,
        content: impl IntoSegments,
        target_type: UserType,
        target_id: impl Into<String>,
    ) -> TransportResult<()> {
        let content = content.into_segments();
        if content.is_empty() {
            debug!(bot_id = %self.bot_id, "Skipping empty message");
            return Ok(());
        }

        let message = MessageSend {
            bot_id: self.bot_id.clone(),
            bot_self_id: self.bot_self_id.clone(),
            msg_id: self.msg_id.clone(),
            target_type: Some(target_type),
            target_id: Some(target_id.into()),
            content: Some(content),
        };
        self.outbound.send(&self.ws_id, message).await
    }

    /// Waits for the next message from the same user in this conversation.
    ///
    /// The reply is consumed: it is not matched against triggers.
    pub async fn receive_resp(&self, timeout: Duration) -> Result<Event, SessionError> {
        self.sessions
            .wait(&self.session_id, false)?
            .recv(timeout)
            .await
    }

    /// Waits for the next message from anyone in this conversation.
    pub async fn receive_mutiply_resp(&self, timeout: Duration) -> Result<Event, SessionError> {
        self.sessions
            .wait(&self.session_id, true)?
            .recv(timeout)
            .await
    }

    /// Sends `content`, then waits for the same user's reply.
    pub async fn prompt(
        &self,
        content: impl IntoSegments,
        timeout: Duration,
    ) -> anyhow::Result<Event> {
        let pending = self.sessions.wait(&self.session_id, false)?;
        self.send(content).await?;
        Ok(pending.recv(timeout).await?)
    }
}

impl std::fmt::Debug for Bot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bot")
            .field("bot_id", &self.bot_id)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}
