use serde::{Deserialize, Serialize};

/// Relation descriptor attached to a message (`m.relates_to`).
///
/// Only the fields this bot cares about: the relation kind (edits arrive as
/// `m.replace`) and the referenced event, which is the thread root for
/// thread/reply members.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Relation {
    #[serde(rename = "rel_type", skip_serializing_if = "Option::is_none")]
    pub rel_type: Option<String>,
    #[serde(rename = "event_id", skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

/// Relation kind used by edits.
pub const REL_TYPE_REPLACE: &str = "m.replace";
/// Relation kind used by threads.
pub const REL_TYPE_THREAD: &str = "m.thread";
/// Message type for plain text.
pub const MSGTYPE_TEXT: &str = "m.text";

/// Normalized inbound message from the chat transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub event_id: String,
    pub sender: String,
    pub room_id: String,
    /// Text body; empty for non-text events.
    pub body: String,
    /// Matrix message type (`m.text`, `m.image`, ...).
    pub msgtype: String,
    /// Origin timestamp in milliseconds.
    pub origin_server_ts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relates_to: Option<Relation>,
}

impl IncomingMessage {
    /// True when the event is an edit of an earlier message.
    pub fn is_edit(&self) -> bool {
        self.relates_to
            .as_ref()
            .and_then(|r| r.rel_type.as_deref())
            .map(|t| t == REL_TYPE_REPLACE)
            .unwrap_or(false)
    }

    /// True when the message belongs to a thread or is a reply.
    pub fn is_related(&self) -> bool {
        self.relates_to.is_some()
    }

    /// The thread-root event id: the relation target when this message is a
    /// thread/reply member, otherwise the message's own id.
    pub fn root_event_id(&self) -> &str {
        match self.relates_to.as_ref().and_then(|r| r.event_id.as_deref()) {
            Some(root) => root,
            None => &self.event_id,
        }
    }
}

/// Per-conversation override flags stored alongside the thread id.
///
/// Keys mirror the process-wide env names so operators can edit stored state
/// directly. Absent keys fall back to process defaults; unrecognized keys
/// round-trip untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationConfig {
    #[serde(rename = "MATRIX_PREFIX", skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(rename = "MATRIX_PREFIX_REPLY", skip_serializing_if = "Option::is_none")]
    pub prefix_reply: Option<bool>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Conversation state persisted under the conversation key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredConversation {
    #[serde(rename = "threadId")]
    pub thread_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ConversationConfig>,
}

impl StoredConversation {
    pub fn config(&self) -> ConversationConfig {
        self.config.clone().unwrap_or_default()
    }
}

/// The bot's own identity, cached at startup for prefix matching.
#[derive(Debug, Clone)]
pub struct BotProfile {
    /// Full Matrix user id (`@bot:example.org`).
    pub user_id: String,
    /// Local part of the user id (`bot`).
    pub localpart: String,
    /// Display name; falls back to the localpart when the profile has none.
    pub display_name: String,
}

impl BotProfile {
    pub fn new(user_id: String, display_name: Option<String>) -> Self {
        let localpart = localpart(&user_id).to_string();
        let display_name = display_name.unwrap_or_else(|| localpart.clone());
        Self {
            user_id,
            localpart,
            display_name,
        }
    }
}

/// Extract the local part from a full user id (`@alice:example.org` -> `alice`).
/// Returns the input unchanged when it is not in user-id form.
pub fn localpart(user_id: &str) -> &str {
    if !user_id.contains('@') || !user_id.contains(':') {
        return user_id;
    }
    let without_server = user_id.split(':').next().unwrap_or(user_id);
    without_server.strip_prefix('@').unwrap_or(without_server)
}
