//! # gscore Core
//!
//! The wire model and transport seam shared by every gscore crate.
//!
//! - **Wire model**: [`MessageReceive`] / [`MessageSend`] records made of
//!   [`Segment`]s, exchanged as one JSON object per frame.
//! - **Events**: [`Event`], a decoded inbound message with derived text,
//!   mention, attachment and session-key fields.
//! - **Transport seam**: the [`Transport`] and [`ConnectionHandler`] traits
//!   that decouple the dispatch engine from concrete sockets.
//!
//! ```text
//! ┌───────────┐  MessageReceive  ┌────────────┐     ┌─────────┐
//! │  Adapter  │─────────────────▶│   gscore   │────▶│ Handler │
//! │ (client)  │◀─────────────────│ (server)   │◀────│         │
//! └───────────┘   MessageSend    └────────────┘     └─────────┘
//! ```

pub mod error;
pub mod event;
pub mod message;
pub mod transport;

pub use error::{DecodeError, DecodeResult, TransportError, TransportResult};
pub use event::{Event, Scope};
pub use message::{MessageReceive, MessageSend, Segment, UserType};
pub use transport::{
    BoxedConnectionHandler, BoxedTransport, CLOSE_GOING_AWAY, CLOSE_NORMAL, ConnectionHandle,
    ConnectionHandler, ConnectionInfo, Transport,
};
