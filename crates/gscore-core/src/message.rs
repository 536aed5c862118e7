//! Wire model exchanged between bot adapters and the core.
//!
//! Every WebSocket frame carries exactly one JSON record:
//!
//! - [`MessageReceive`] flows from an adapter into the core.
//! - [`MessageSend`] flows from the core back to an adapter.
//!
//! Both carry their payload as a list of [`Segment`]s, a `{type, data}` pair
//! whose `data` shape depends on the segment type.
//!
//! # Example
//!
//! ```rust,ignore
//! use gscore_core::{MessageReceive, Segment, UserType};
//!
//! let frame = MessageReceive {
//!     bot_id: "onebot".into(),
//!     user_type: UserType::Group,
//!     group_id: Some("8888".into()),
//!     user_id: "99999".into(),
//!     content: vec![Segment::text("help")],
//!     ..Default::default()
//! };
//! let bytes = frame.encode();
//! ```

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DecodeResult;

// ============================================================================
// Segment
// ============================================================================

/// A single unit of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Segment type (`text`, `image`, `at`, `reply`, `file`, `node`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Type-specific payload.
    #[serde(default)]
    pub data: Value,
}

impl Segment {
    /// Creates a segment of an arbitrary type.
    pub fn new(kind: impl Into<String>, data: impl Into<Value>) -> Self {
        Self {
            kind: kind.into(),
            data: data.into(),
        }
    }

    /// Plain text.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new("text", text.into())
    }

    /// An image, given as a URL, a `base64://` payload or a file reference.
    pub fn image(image: impl Into<String>) -> Self {
        Self::new("image", image.into())
    }

    /// A mention of the given user id.
    pub fn at(user_id: impl Into<String>) -> Self {
        Self::new("at", user_id.into())
    }

    /// A reply to an earlier message id.
    pub fn reply(msg_id: impl Into<String>) -> Self {
        Self::new("reply", msg_id.into())
    }

    /// A voice record.
    pub fn record(record: impl Into<String>) -> Self {
        Self::new("record", record.into())
    }

    /// Markdown text, for platforms that render it.
    pub fn markdown(markdown: impl Into<String>) -> Self {
        Self::new("markdown", markdown.into())
    }

    /// A file attachment. Encoded on the wire as `"<name>|<payload>"`.
    pub fn file(name: impl AsRef<str>, payload: impl AsRef<str>) -> Self {
        Self::new("file", format!("{}|{}", name.as_ref(), payload.as_ref()))
    }

    /// A forward node wrapping other segments.
    pub fn node(segments: Vec<Segment>) -> Self {
        let data = serde_json::to_value(segments).unwrap_or(Value::Array(Vec::new()));
        Self::new("node", data)
    }

    /// Returns `true` if this segment has the given type.
    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }

    /// Returns the payload as a string, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        self.data.as_str()
    }

    /// Returns the text content if this is a text segment.
    pub fn as_text(&self) -> Option<&str> {
        if self.is("text") { self.as_str() } else { None }
    }

    /// Splits a `file` segment into `(name, payload)`.
    pub fn as_file(&self) -> Option<(&str, &str)> {
        if !self.is("file") {
            return None;
        }
        self.as_str()?.split_once('|')
    }
}

impl Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind.as_str(), self.data.as_str()) {
            ("text", Some(text)) => write!(f, "{text}"),
            ("at", Some(id)) => write!(f, "@{id}"),
            ("reply", Some(id)) => write!(f, "[reply:{id}]"),
            ("file", Some(raw)) => {
                let name = raw.split_once('|').map_or(raw, |(name, _)| name);
                write!(f, "[file:{name}]")
            }
            (kind, _) => write!(f, "[{kind}]"),
        }
    }
}

// ============================================================================
// User Type
// ============================================================================

/// The kind of conversation a message was sent in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    /// A group chat.
    #[default]
    Group,
    /// A one-to-one chat.
    Direct,
    /// A guild channel.
    Channel,
    /// A sub-channel inside a guild channel.
    SubChannel,
}

impl UserType {
    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Group => "group",
            Self::Direct => "direct",
            Self::Channel => "channel",
            Self::SubChannel => "sub_channel",
        }
    }
}

impl Display for UserType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Inbound / Outbound Records
// ============================================================================

fn default_bot_id() -> String {
    "Bot".to_string()
}

fn default_user_pm() -> u8 {
    3
}

/// A message received from a bot adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageReceive {
    /// Adapter / platform identity (e.g. `onebot`, `console`).
    #[serde(default = "default_bot_id")]
    pub bot_id: String,
    /// The bot account id on the platform.
    #[serde(default)]
    pub bot_self_id: String,
    /// Platform message id.
    #[serde(default)]
    pub msg_id: String,
    /// Conversation kind.
    #[serde(default)]
    pub user_type: UserType,
    /// Group id for group-like conversations.
    #[serde(default)]
    pub group_id: Option<String>,
    /// Sender id.
    #[serde(default)]
    pub user_id: String,
    /// Sender permission level (0 = master ... 6 = anyone).
    #[serde(default = "default_user_pm")]
    pub user_pm: u8,
    /// Message content.
    #[serde(default)]
    pub content: Vec<Segment>,
}

impl Default for MessageReceive {
    fn default() -> Self {
        Self {
            bot_id: default_bot_id(),
            bot_self_id: String::new(),
            msg_id: String::new(),
            user_type: UserType::default(),
            group_id: None,
            user_id: String::new(),
            user_pm: default_user_pm(),
            content: Vec::new(),
        }
    }
}

impl MessageReceive {
    /// Decodes one inbound frame.
    pub fn decode(data: &[u8]) -> DecodeResult<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Encodes this record as a JSON frame.
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// A message sent back to a bot adapter.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MessageSend {
    /// Adapter / platform identity the message is routed to.
    #[serde(default = "default_bot_id")]
    pub bot_id: String,
    /// The bot account that should send it.
    #[serde(default)]
    pub bot_self_id: String,
    /// The message being replied to, if any.
    #[serde(default)]
    pub msg_id: String,
    /// Target conversation kind.
    #[serde(default)]
    pub target_type: Option<UserType>,
    /// Target conversation id (group id, or user id for direct chats).
    #[serde(default)]
    pub target_id: Option<String>,
    /// Content to send.
    #[serde(default)]
    pub content: Option<Vec<Segment>>,
}

impl MessageSend {
    /// Decodes one outbound frame (used by adapter-side clients).
    pub fn decode(data: &[u8]) -> DecodeResult<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Encodes this record as a JSON string.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Concatenated text of all text segments.
    pub fn plain_text(&self) -> String {
        self.content
            .iter()
            .flatten()
            .filter_map(Segment::as_text)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_applies_wire_defaults() {
        let frame = br#"{"user_id":"1","content":[{"type":"text","data":"hi"}]}"#;
        let msg = MessageReceive::decode(frame).unwrap();

        assert_eq!(msg.bot_id, "Bot");
        assert_eq!(msg.user_type, UserType::Group);
        assert_eq!(msg.user_pm, 3);
        assert_eq!(msg.content[0].as_text(), Some("hi"));
    }

    #[test]
    fn decode_rejects_unknown_user_type() {
        let frame = br#"{"user_type":"guild"}"#;
        assert!(MessageReceive::decode(frame).is_err());
    }

    #[test]
    fn sub_channel_uses_snake_case() {
        let frame = br#"{"user_type":"sub_channel"}"#;
        let msg = MessageReceive::decode(frame).unwrap();
        assert_eq!(msg.user_type, UserType::SubChannel);
    }

    #[test]
    fn file_segment_splits_name_and_payload() {
        let seg = Segment::file("team.json", "eyJ9");
        assert_eq!(seg.as_file(), Some(("team.json", "eyJ9")));
        assert_eq!(seg.to_string(), "[file:team.json]");
        assert_eq!(Segment::text("x").as_file(), None);
    }

    #[test]
    fn send_plain_text_skips_non_text() {
        let send = MessageSend {
            content: Some(vec![
                Segment::text("a"),
                Segment::image("base64://..."),
                Segment::text("b"),
            ]),
            ..Default::default()
        };
        assert_eq!(send.plain_text(), "ab");
        assert!(send.encode().contains("\"type\":\"image\""));
    }
}
