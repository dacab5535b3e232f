//! Message record types
//!
//! [`DiscordMessage`] is the uniform representation of one chat message or
//! reaction event, used for both inbound and outbound directions. Outbound
//! records are interpreted through [`OutboundAction`], an explicit tagged
//! dispatch over which optional fields are populated.

use serde::{Deserialize, Serialize};

use crate::error::{DiscordError, Result};

/// Whether a record originated in a guild channel or a direct message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Guild text channel
    #[default]
    Public,
    /// Direct-message conversation
    #[serde(rename = "message")]
    Dm,
}

/// One chat message or reaction event.
///
/// Value type: constructed by the adapter on each inbound event, or by user
/// logic for each outbound action, and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscordMessage {
    /// Sender display name (inbound only)
    #[serde(default)]
    pub user: String,
    /// Sender id (inbound only)
    #[serde(default)]
    pub user_id: String,
    /// Display names of users mentioned in the message
    #[serde(default)]
    pub tags: Vec<String>,
    /// Channel name or id. Outbound, a numeric string is used as the
    /// channel id directly; anything else is resolved by name at publish
    /// time.
    #[serde(default)]
    pub channel: String,
    /// Channel id (inbound; populated by the adapter)
    #[serde(default)]
    pub channel_id: String,
    /// Guild channel or direct message
    #[serde(default)]
    pub channel_kind: ChannelKind,
    /// Text body; required for sends, absent for reaction-only records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    /// Emoji identifier; Unicode emoji verbatim, or `name:id` for custom
    /// emoji. Presence signals a reaction action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reaction: Option<String>,
    /// Thread id, if the message lives in a thread. Outbound, the thread
    /// wins over `channel` as the send target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<String>,
}

/// The action an outbound record asks for.
///
/// Dispatch is explicit rather than inferred call-by-call: `msg` alone means
/// send, `reaction` alone means react, both together mean send first and
/// then react to the message the send created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundAction {
    Send { text: String },
    React { emoji: String },
    SendAndReact { text: String, emoji: String },
}

impl OutboundAction {
    /// Classify an outbound record by its populated fields.
    ///
    /// A record with neither field set is an error, not a silent no-op.
    pub fn from_record(record: &DiscordMessage) -> Result<Self> {
        match (&record.msg, &record.reaction) {
            (Some(text), None) => Ok(Self::Send { text: text.clone() }),
            (None, Some(emoji)) => Ok(Self::React {
                emoji: emoji.clone(),
            }),
            (Some(text), Some(emoji)) => Ok(Self::SendAndReact {
                text: text.clone(),
                emoji: emoji.clone(),
            }),
            (None, None) => Err(DiscordError::EmptyRecord),
        }
    }
}

/// Mention markup for a user id.
pub fn mention_user(id: &str) -> String {
    format!("<@{id}>")
}

/// Mention markup for a channel id.
pub fn mention_channel(id: &str) -> String {
    format!("<#{id}>")
}

/// Mention markup for a role id.
pub fn mention_role(id: &str) -> String {
    format!("<@&{id}>")
}

/// The `@everyone` mention.
pub fn mention_everyone() -> &'static str {
    "@everyone"
}

/// The `@here` mention.
pub fn mention_here() -> &'static str {
    "@here"
}
