//! Triggers: a match rule bound to a handler.
//!
//! Every trigger has a [`TriggerType`] and a key. The type decides how the
//! key is compared against the event text:
//!
//! | type        | matches when                                             |
//! |-------------|----------------------------------------------------------|
//! | `fullmatch` | text equals the key                                      |
//! | `command`   | key (a pattern) matches at the start, then space or end  |
//! | `prefix`    | text starts with the key                                 |
//! | `keyword`   | text contains the key                                    |
//! | `suffix`    | text ends with the key                                   |
//! | `regex`     | key (a pattern) matches anywhere                         |
//! | `file`      | the attached file's extension equals the key             |
//! | `message`   | always                                                   |
//!
//! The declaration order of [`TriggerType`] is also the order in which types
//! are evaluated inside one service module.

use std::collections::HashMap;
use std::fmt::{self, Display};

use gscore_core::Event;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, RegistryResult};
use crate::handler::BoxedHandler;

// ============================================================================
// Trigger Type
// ============================================================================

/// How a trigger key is compared against an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Fullmatch,
    Command,
    Prefix,
    Keyword,
    Suffix,
    Regex,
    File,
    Message,
}

impl TriggerType {
    /// All types in evaluation order.
    pub const ALL: [TriggerType; 8] = [
        TriggerType::Fullmatch,
        TriggerType::Command,
        TriggerType::Prefix,
        TriggerType::Keyword,
        TriggerType::Suffix,
        TriggerType::Regex,
        TriggerType::File,
        TriggerType::Message,
    ];

    /// Returns the lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fullmatch => "fullmatch",
            Self::Command => "command",
            Self::Prefix => "prefix",
            Self::Keyword => "keyword",
            Self::Suffix => "suffix",
            Self::Regex => "regex",
            Self::File => "file",
            Self::Message => "message",
        }
    }

    fn uses_pattern(&self) -> bool {
        matches!(self, Self::Command | Self::Regex)
    }
}

impl Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Trigger Match
// ============================================================================

/// What a trigger extracted from a matching event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerMatch {
    /// The key that matched.
    pub command: String,
    /// Text left after the key was stripped.
    pub text: String,
    /// Positional captures, group 0 excluded.
    pub groups: Vec<String>,
    /// Named captures.
    pub named: HashMap<String, String>,
}

impl TriggerMatch {
    fn plain(command: &str, text: &str) -> Self {
        Self {
            command: command.to_string(),
            text: text.trim().to_string(),
            ..Default::default()
        }
    }

    fn captured(command: &str, text: &str, pattern: &Regex, caps: &regex::Captures<'_>) -> Self {
        let groups = caps
            .iter()
            .skip(1)
            .map(|m| m.map_or_else(String::new, |m| m.as_str().to_string()))
            .collect();
        let named = pattern
            .capture_names()
            .flatten()
            .filter_map(|name| caps.name(name).map(|m| (name.to_string(), m.as_str().to_string())))
            .collect();
        Self {
            command: command.to_string(),
            text: text.trim().to_string(),
            groups,
            named,
        }
    }

    /// Writes the match into an event copy.
    pub fn apply(self, event: &mut Event) {
        event.command = self.command;
        event.text = self.text;
        event.regex_group = self.groups;
        event.regex_dict = self.named;
    }
}

// ============================================================================
// Trigger
// ============================================================================

/// A registered match rule and its handler.
pub struct Trigger {
    kind: TriggerType,
    key: String,
    handler: BoxedHandler,
    block: bool,
    to_me: bool,
    pattern: Option<Regex>,
}

impl Trigger {
    /// Builds a trigger, compiling the key for `command` and `regex` types.
    pub fn new(
        kind: TriggerType,
        key: impl Into<String>,
        handler: BoxedHandler,
        block: bool,
        to_me: bool,
    ) -> RegistryResult<Self> {
        let key = key.into();
        let pattern = if kind.uses_pattern() {
            let source = match kind {
                TriggerType::Command => format!(r"^(?:{key})(?:\s+|$)"),
                _ => key.clone(),
            };
            let compiled = Regex::new(&source).map_err(|e| RegistryError::InvalidPattern {
                pattern: key.clone(),
                reason: e.to_string(),
            })?;
            Some(compiled)
        } else {
            None
        };

        Ok(Self {
            kind,
            key,
            handler,
            block,
            to_me,
            pattern,
        })
    }

    pub fn kind(&self) -> TriggerType {
        self.kind
    }

    /// The effective key, plugin prefix included.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether a match stops all further evaluation.
    pub fn is_blocking(&self) -> bool {
        self.block
    }

    /// Whether the event must mention the bot.
    pub fn requires_mention(&self) -> bool {
        self.to_me
    }

    pub fn handler(&self) -> &BoxedHandler {
        &self.handler
    }

    /// Checks the event, returning the match annotations on success.
    pub fn check(&self, event: &Event) -> Option<TriggerMatch> {
        if self.to_me && !event.is_tome {
            return None;
        }

        let text = event.raw_text.as_str();
        let key = self.key.as_str();
        match self.kind {
            TriggerType::Fullmatch => (text == key).then(|| TriggerMatch::plain(key, "")),
            TriggerType::Prefix => text
                .strip_prefix(key)
                .map(|rest| TriggerMatch::plain(key, rest)),
            TriggerType::Suffix => text
                .strip_suffix(key)
                .map(|rest| TriggerMatch::plain(key, rest)),
            TriggerType::Keyword => text.contains(key).then(|| TriggerMatch::plain(key, text)),
            TriggerType::Command => {
                let pattern = self.pattern.as_ref()?;
                let caps = pattern.captures(text)?;
                let end = caps.get(0).map_or(0, |m| m.end());
                Some(TriggerMatch::captured(key, &text[end..], pattern, &caps))
            }
            TriggerType::Regex => {
                let pattern = self.pattern.as_ref()?;
                let caps = pattern.captures(text)?;
                Some(TriggerMatch::captured(key, text, pattern, &caps))
            }
            TriggerType::File => {
                let wanted = key.trim_start_matches('.');
                let actual = event.file_type.as_deref()?;
                actual
                    .eq_ignore_ascii_case(wanted)
                    .then(|| TriggerMatch::plain(key, text))
            }
            TriggerType::Message => Some(TriggerMatch::plain("", text)),
        }
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trigger")
            .field("kind", &self.kind)
            .field("key", &self.key)
            .field("block", &self.block)
            .field("to_me", &self.to_me)
            .finish_non_exhaustive()
    }
}
