//! Decoded inbound events.
//!
//! An [`Event`] is a [`MessageReceive`] with the fields triggers care about
//! already derived: the plain text, whether the bot was mentioned, attached
//! files and images, and the session keys used by the session guard.
//!
//! When a trigger matches, the dispatcher hands the handler its own copy of
//! the event annotated with the match (`command`, the remaining `text`, and
//! regex captures), so handlers never see each other's annotations.

use std::collections::HashMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::message::{MessageReceive, Segment, UserType};

// ============================================================================
// Scope
// ============================================================================

/// Which conversation kinds a service module applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Scope {
    /// Group-like conversations (groups, channels, sub-channels).
    Group,
    /// One-to-one conversations.
    Direct,
    /// Every conversation.
    #[default]
    All,
}

impl Scope {
    /// Returns `true` if a module with this scope applies to an event whose
    /// own scope is `event_scope`.
    pub fn admits(self, event_scope: Scope) -> bool {
        matches!(self, Scope::All) || self == event_scope
    }
}

impl From<UserType> for Scope {
    fn from(user_type: UserType) -> Self {
        match user_type {
            UserType::Direct => Scope::Direct,
            UserType::Group | UserType::Channel | UserType::SubChannel => Scope::Group,
        }
    }
}

impl Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Group => f.write_str("GROUP"),
            Scope::Direct => f.write_str("DIRECT"),
            Scope::All => f.write_str("ALL"),
        }
    }
}

// ============================================================================
// Event
// ============================================================================

/// A decoded inbound message with sender, conversation and content metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub bot_id: String,
    pub bot_self_id: String,
    pub msg_id: String,
    pub user_type: UserType,
    pub group_id: Option<String>,
    pub user_id: String,
    /// Sender permission level; lower is more privileged.
    pub user_pm: u8,
    pub content: Vec<Segment>,
    /// Connection the event arrived on; replies are routed back through it.
    pub ws_id: String,

    /// Full text of the message, trimmed.
    pub raw_text: String,
    /// Text left after the matched trigger key was stripped.
    pub text: String,
    /// The trigger key that matched, empty before dispatch.
    pub command: String,
    /// Positional regex captures (group 0 excluded); missing groups are empty.
    pub regex_group: Vec<String>,
    /// Named regex captures.
    pub regex_dict: HashMap<String, String>,

    /// Whether the message mentions the bot.
    pub is_tome: bool,
    pub image_list: Vec<String>,
    pub at_list: Vec<String>,
    pub reply: Option<String>,
    pub file_name: Option<String>,
    /// Extension of the attached file, lowercased, without the dot.
    pub file_type: Option<String>,
    pub file: Option<String>,
}

impl From<MessageReceive> for Event {
    fn from(msg: MessageReceive) -> Self {
        let mut event = Event {
            bot_id: msg.bot_id,
            bot_self_id: msg.bot_self_id,
            msg_id: msg.msg_id,
            user_type: msg.user_type,
            group_id: msg.group_id.filter(|g| !g.is_empty()),
            user_id: msg.user_id,
            user_pm: msg.user_pm,
            ..Default::default()
        };

        let mut text = String::new();
        for seg in &msg.content {
            match seg.kind.as_str() {
                "text" => {
                    if let Some(t) = seg.as_str() {
                        text.push_str(t);
                    }
                }
                "at" => {
                    if let Some(id) = seg.as_str() {
                        if !event.bot_self_id.is_empty() && id == event.bot_self_id {
                            event.is_tome = true;
                        } else {
                            event.at_list.push(id.to_string());
                        }
                    }
                }
                "image" => {
                    if let Some(img) = seg.as_str() {
                        event.image_list.push(img.to_string());
                    }
                }
                "reply" => {
                    if event.reply.is_none() {
                        event.reply = seg.as_str().map(str::to_string);
                    }
                }
                "file" => {
                    if event.file.is_none()
                        && let Some((name, payload)) = seg.as_file()
                    {
                        event.file_type = name
                            .rsplit_once('.')
                            .map(|(_, ext)| ext.to_ascii_lowercase());
                        event.file_name = Some(name.to_string());
                        event.file = Some(payload.to_string());
                    }
                }
                _ => {}
            }
        }

        event.raw_text = text.trim().to_string();
        event.text = event.raw_text.clone();
        event.content = msg.content;
        event
    }
}

impl Event {
    /// The conversation scope of this event (never [`Scope::All`]).
    pub fn scope(&self) -> Scope {
        Scope::from(self.user_type)
    }

    /// Key identifying one user's conversation with one bot.
    pub fn session_id(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.bot_id,
            self.user_type,
            self.group_id.as_deref().unwrap_or(""),
            self.user_id
        )
    }

    /// Key shared by everyone in the same conversation.
    ///
    /// This is the group id, or the user id for direct chats.
    pub fn multiply_key(&self) -> String {
        let target = match (&self.group_id, self.user_type) {
            (Some(group), ut) if ut != UserType::Direct => group.as_str(),
            _ => self.user_id.as_str(),
        };
        format!("{}:{}", self.bot_id, target)
    }

    /// The id replies should be addressed to.
    pub fn target_id(&self) -> String {
        match (&self.group_id, self.user_type) {
            (Some(group), ut) if ut != UserType::Direct => group.clone(),
            _ => self.user_id.clone(),
        }
    }

    /// Conversation ids checked against allow/deny lists.
    pub fn conversation_ids(&self) -> impl Iterator<Item = &str> {
        self.group_id
            .as_deref()
            .into_iter()
            .chain(std::iter::once(self.user_id.as_str()))
            .filter(|id| !id.is_empty())
    }

    /// The first attached image, if any.
    pub fn image(&self) -> Option<&str> {
        self.image_list.first().map(String::as_str)
    }

    /// The first mentioned user other than the bot, if any.
    pub fn at(&self) -> Option<&str> {
        self.at_list.first().map(String::as_str)
    }
}
