//! Context Resolver: decides, per inbound message, whether a reply is owed
//! and under which conversation key.
//!
//! Resolution has two phases because the per-conversation config lives under
//! the conversation key: gating and key derivation are config-free
//! ([`ContextResolver::should_ignore`], [`ContextResolver::conversation_key`]),
//! while addressing ([`ContextResolver::resolve`]) takes the config the
//! caller loaded for that key.

use crate::channels::types::{ConversationConfig, IncomingMessage, MSGTYPE_TEXT};
use crate::channels::ChatTransport;
use crate::config::ContextMode;
use chrono::Utc;
use std::sync::Arc;

/// Messages older than this are never answered (catch-up traffic after a
/// reconnect would otherwise trigger a burst of replies).
pub const STALENESS_MS: i64 = 10_000;

/// Why a message was dropped before addressing was even considered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    OwnMessage,
    SenderDenied,
    SenderNotAllowed,
    RoomDenied,
    RoomNotAllowed,
    Stale,
    Edit,
    NonText,
}

/// Outcome of full resolution for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Failed a gating rule; no conversation key was derived.
    Ignored(IgnoreReason),
    /// Survived gating but was not directed at the bot.
    NotDirected,
    /// A reply is owed under `key` with the prefix-stripped `body`.
    Accepted { key: String, body: String },
}

/// Gating and addressing settings, split from the process [`crate::config::Config`]
/// so tests can construct a resolver without transport credentials.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub context_mode: ContextMode,
    pub default_prefix: Option<String>,
    pub default_prefix_reply: bool,
    /// When true, direct rooms also require the prefix.
    pub prefix_dm: bool,
    pub sender_blacklist: Vec<String>,
    pub sender_whitelist: Vec<String>,
    pub room_blacklist: Vec<String>,
    pub room_whitelist: Vec<String>,
    pub ignore_media: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            context_mode: ContextMode::Thread,
            default_prefix: None,
            default_prefix_reply: false,
            prefix_dm: false,
            sender_blacklist: Vec::new(),
            sender_whitelist: Vec::new(),
            room_blacklist: Vec::new(),
            room_whitelist: Vec::new(),
            ignore_media: true,
        }
    }
}

impl ResolverConfig {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            context_mode: config.context_mode,
            default_prefix: config.default_prefix.clone(),
            default_prefix_reply: config.default_prefix_reply,
            prefix_dm: config.prefix_dm,
            sender_blacklist: config.sender_blacklist.clone(),
            sender_whitelist: config.sender_whitelist.clone(),
            room_blacklist: config.room_blacklist.clone(),
            room_whitelist: config.room_whitelist.clone(),
            ignore_media: config.ignore_media,
        }
    }
}

pub struct ContextResolver {
    config: ResolverConfig,
    profile: crate::channels::BotProfile,
    transport: Arc<dyn ChatTransport>,
}

impl ContextResolver {
    pub fn new(
        config: ResolverConfig,
        profile: crate::channels::BotProfile,
        transport: Arc<dyn ChatTransport>,
    ) -> Self {
        Self {
            config,
            profile,
            transport,
        }
    }

    /// Gating rules, evaluated in order with the first match rejecting the
    /// message. Runs before any key derivation.
    pub fn should_ignore(&self, message: &IncomingMessage, room_id: &str) -> Option<IgnoreReason> {
        self.should_ignore_at(message, room_id, Utc::now().timestamp_millis())
    }

    fn should_ignore_at(
        &self,
        message: &IncomingMessage,
        room_id: &str,
        now_ms: i64,
    ) -> Option<IgnoreReason> {
        if message.sender == self.profile.user_id {
            return Some(IgnoreReason::OwnMessage);
        }
        if self
            .config
            .sender_blacklist
            .iter()
            .any(|b| message.sender.ends_with(b))
        {
            return Some(IgnoreReason::SenderDenied);
        }
        if !self.config.sender_whitelist.is_empty()
            && !self
                .config
                .sender_whitelist
                .iter()
                .any(|w| message.sender.ends_with(w))
        {
            return Some(IgnoreReason::SenderNotAllowed);
        }
        if self
            .config
            .room_blacklist
            .iter()
            .any(|b| room_id.ends_with(b))
        {
            return Some(IgnoreReason::RoomDenied);
        }
        if !self.config.room_whitelist.is_empty()
            && !self
                .config
                .room_whitelist
                .iter()
                .any(|w| room_id.ends_with(w))
        {
            return Some(IgnoreReason::RoomNotAllowed);
        }
        if now_ms - message.origin_server_ts > STALENESS_MS {
            return Some(IgnoreReason::Stale);
        }
        if message.is_edit() {
            return Some(IgnoreReason::Edit);
        }
        if self.config.ignore_media && message.msgtype != MSGTYPE_TEXT {
            return Some(IgnoreReason::NonText);
        }
        None
    }

    /// Conversation key for a message: a pure function of (room id,
    /// thread-root id, context mode).
    pub fn conversation_key(&self, message: &IncomingMessage, room_id: &str) -> String {
        let root = message.root_event_id();
        match self.config.context_mode {
            ContextMode::Room => room_id.to_string(),
            ContextMode::Thread => root.to_string(),
            ContextMode::Both => {
                if root != message.event_id {
                    root.to_string()
                } else {
                    room_id.to_string()
                }
            }
        }
    }

    /// The prefixes that count as addressing the bot, in match order.
    fn prefixes(&self, conversation: &ConversationConfig) -> Vec<String> {
        let mut prefixes = Vec::with_capacity(4);
        if let Some(p) = self.effective_prefix(conversation) {
            prefixes.push(p);
        }
        prefixes.push(format!("{}:", self.profile.localpart));
        prefixes.push(format!("{}:", self.profile.display_name));
        prefixes.push(format!("{}:", self.profile.user_id));
        prefixes
    }

    fn effective_prefix(&self, conversation: &ConversationConfig) -> Option<String> {
        conversation
            .prefix
            .clone()
            .or_else(|| self.config.default_prefix.clone())
            .filter(|p| !p.is_empty())
    }

    fn prefix_reply_required(&self, conversation: &ConversationConfig) -> bool {
        conversation
            .prefix_reply
            .unwrap_or(self.config.default_prefix_reply)
    }

    fn matched_prefix<'a>(&self, prefixes: &'a [String], body: &str) -> Option<&'a String> {
        prefixes.iter().find(|p| body.starts_with(p.as_str()))
    }

    /// Whether the message is directed at the bot, and if so whether a
    /// prefix match was mandatory (which controls stripping).
    async fn directedness(
        &self,
        conversation: &ConversationConfig,
        room_id: &str,
        message: &IncomingMessage,
    ) -> Result<Option<bool>, String> {
        let is_related = message.is_related();
        let is_dm = self.transport.is_direct_room(room_id).await;
        let prefix = self.effective_prefix(conversation);
        let prefix_reply = self.prefix_reply_required(conversation);

        let mut prefix_required =
            (prefix.is_some() && !is_related) || (prefix_reply && is_related);
        let dm_exempt = !self.config.prefix_dm && is_dm;
        if dm_exempt {
            prefix_required = false;
        }

        let prefixes = self.prefixes(conversation);

        if is_related && !prefix_reply {
            let root_id = message
                .relates_to
                .as_ref()
                .and_then(|r| r.event_id.as_deref());
            match root_id {
                Some(root_id) => {
                    // A reply only counts as directed when the thread it
                    // belongs to was opened by addressing the bot.
                    let root_body = self.transport.event_body(room_id, root_id).await?;
                    let root_directed = root_body
                        .map(|body| self.matched_prefix(&prefixes, &body).is_some())
                        .unwrap_or(false);
                    if prefix.is_some() && !root_directed && !dm_exempt {
                        return Ok(None);
                    }
                }
                // Bare reply with no resolvable root reference.
                None => return Ok(None),
            }
        }

        let prefix_used = self.matched_prefix(&prefixes, &message.body).is_some();
        if prefix_required && !prefix_used {
            return Ok(None);
        }
        Ok(Some(prefix_required))
    }

    /// Remove the matched addressing prefix and leading whitespace. Only
    /// strips when a prefix match was mandatory for this message.
    pub fn strip_prefix(
        &self,
        conversation: &ConversationConfig,
        body: &str,
        prefix_required: bool,
    ) -> String {
        let prefixes = self.prefixes(conversation);
        let trim_len = if prefix_required {
            self.matched_prefix(&prefixes, body)
                .map(|p| p.len())
                .unwrap_or(0)
        } else {
            0
        };
        body[trim_len..].trim_start().to_string()
    }

    /// Full resolution: gate, key, addressing, prefix strip.
    ///
    /// `conversation` is the per-conversation config the caller loaded for
    /// this message's key; an accepted result with an empty body is a
    /// malformed-input condition for the caller, not a silent drop.
    pub async fn resolve(
        &self,
        message: &IncomingMessage,
        room_id: &str,
        conversation: &ConversationConfig,
    ) -> Result<Resolution, String> {
        if let Some(reason) = self.should_ignore(message, room_id) {
            return Ok(Resolution::Ignored(reason));
        }
        let key = self.conversation_key(message, room_id);
        match self.directedness(conversation, room_id, message).await? {
            Some(prefix_required) => {
                let body = self.strip_prefix(conversation, &message.body, prefix_required);
                Ok(Resolution::Accepted { key, body })
            }
            None => Ok(Resolution::NotDirected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::test_support::MockTransport;
    use crate::channels::types::{BotProfile, Relation, REL_TYPE_THREAD};

    const ROOM: &str = "!room:example.org";

    fn profile() -> BotProfile {
        BotProfile::new("@helper:example.org".into(), Some("Helper".into()))
    }

    fn message(body: &str) -> IncomingMessage {
        IncomingMessage {
            event_id: "$e1".into(),
            sender: "@ann:example.org".into(),
            room_id: ROOM.into(),
            body: body.into(),
            msgtype: MSGTYPE_TEXT.into(),
            origin_server_ts: Utc::now().timestamp_millis(),
            relates_to: None,
        }
    }

    fn threaded(body: &str, root: &str) -> IncomingMessage {
        let mut msg = message(body);
        msg.relates_to = Some(Relation {
            rel_type: Some(REL_TYPE_THREAD.into()),
            event_id: Some(root.into()),
        });
        msg
    }

    fn resolver(config: ResolverConfig, transport: MockTransport) -> ContextResolver {
        ContextResolver::new(config, profile(), Arc::new(transport))
    }

    fn prefixed_config() -> ResolverConfig {
        ResolverConfig {
            default_prefix: Some("bot:".into()),
            ..Default::default()
        }
    }

    #[test]
    fn ignores_own_messages() {
        let r = resolver(ResolverConfig::default(), MockTransport::new());
        let mut msg = message("hello");
        msg.sender = "@helper:example.org".into();
        assert_eq!(r.should_ignore(&msg, ROOM), Some(IgnoreReason::OwnMessage));
    }

    #[test]
    fn sender_deny_and_allow_lists_match_suffixes() {
        let config = ResolverConfig {
            sender_blacklist: vec![":spam.example.org".into()],
            ..Default::default()
        };
        let r = resolver(config, MockTransport::new());
        let mut msg = message("hello");
        msg.sender = "@troll:spam.example.org".into();
        assert_eq!(r.should_ignore(&msg, ROOM), Some(IgnoreReason::SenderDenied));

        let config = ResolverConfig {
            sender_whitelist: vec![":corp.example.org".into()],
            ..Default::default()
        };
        let r = resolver(config, MockTransport::new());
        assert_eq!(
            r.should_ignore(&message("hello"), ROOM),
            Some(IgnoreReason::SenderNotAllowed)
        );
    }

    #[test]
    fn room_lists_match_suffixes() {
        let config = ResolverConfig {
            room_blacklist: vec![":blocked.example.org".into()],
            ..Default::default()
        };
        let r = resolver(config, MockTransport::new());
        assert_eq!(
            r.should_ignore(&message("hello"), "!x:blocked.example.org"),
            Some(IgnoreReason::RoomDenied)
        );

        let config = ResolverConfig {
            room_whitelist: vec![":allowed.example.org".into()],
            ..Default::default()
        };
        let r = resolver(config, MockTransport::new());
        assert_eq!(
            r.should_ignore(&message("hello"), ROOM),
            Some(IgnoreReason::RoomNotAllowed)
        );
    }

    #[test]
    fn ignores_stale_edits_and_media() {
        let r = resolver(ResolverConfig::default(), MockTransport::new());

        let mut msg = message("hello");
        msg.origin_server_ts = Utc::now().timestamp_millis() - STALENESS_MS - 1;
        assert_eq!(r.should_ignore(&msg, ROOM), Some(IgnoreReason::Stale));

        let mut msg = message("hello *fixed*");
        msg.relates_to = Some(Relation {
            rel_type: Some("m.replace".into()),
            event_id: Some("$orig".into()),
        });
        assert_eq!(r.should_ignore(&msg, ROOM), Some(IgnoreReason::Edit));

        let mut msg = message("");
        msg.msgtype = "m.image".into();
        assert_eq!(r.should_ignore(&msg, ROOM), Some(IgnoreReason::NonText));
    }

    #[test]
    fn key_derivation_is_deterministic_per_mode() {
        let make = |mode| {
            resolver(
                ResolverConfig {
                    context_mode: mode,
                    ..Default::default()
                },
                MockTransport::new(),
            )
        };

        let root_msg = message("hello");
        let thread_msg = threaded("hello", "$root");

        let r = make(ContextMode::Room);
        assert_eq!(r.conversation_key(&root_msg, ROOM), ROOM);
        assert_eq!(r.conversation_key(&thread_msg, ROOM), ROOM);

        let r = make(ContextMode::Thread);
        assert_eq!(r.conversation_key(&root_msg, ROOM), "$e1");
        assert_eq!(r.conversation_key(&thread_msg, ROOM), "$root");

        let r = make(ContextMode::Both);
        assert_eq!(r.conversation_key(&root_msg, ROOM), ROOM);
        assert_eq!(r.conversation_key(&thread_msg, ROOM), "$root");

        // Same inputs, same key.
        let r = make(ContextMode::Both);
        assert_eq!(
            r.conversation_key(&thread_msg, ROOM),
            r.conversation_key(&thread_msg, ROOM)
        );
    }

    #[tokio::test]
    async fn prefixed_root_message_is_accepted_and_stripped() {
        let r = resolver(prefixed_config(), MockTransport::new());
        let resolution = r
            .resolve(&message("bot:   hello"), ROOM, &ConversationConfig::default())
            .await
            .unwrap();
        assert_eq!(
            resolution,
            Resolution::Accepted {
                key: "$e1".into(),
                body: "hello".into()
            }
        );
    }

    #[tokio::test]
    async fn unprefixed_root_message_is_not_directed() {
        let r = resolver(prefixed_config(), MockTransport::new());
        let resolution = r
            .resolve(&message("hello"), ROOM, &ConversationConfig::default())
            .await
            .unwrap();
        assert_eq!(resolution, Resolution::NotDirected);
    }

    #[tokio::test]
    async fn display_name_and_user_id_prefixes_count() {
        let r = resolver(prefixed_config(), MockTransport::new());
        for body in ["helper: hi", "Helper: hi", "@helper:example.org: hi"] {
            let resolution = r
                .resolve(&message(body), ROOM, &ConversationConfig::default())
                .await
                .unwrap();
            match resolution {
                Resolution::Accepted { body, .. } => assert_eq!(body, "hi"),
                other => panic!("expected accept for {:?}, got {:?}", body, other),
            }
        }
    }

    #[tokio::test]
    async fn reply_to_directed_root_is_accepted_without_prefix() {
        let transport = MockTransport::new().with_event_body("$root", "bot: opening question");
        let r = resolver(prefixed_config(), transport);
        let resolution = r
            .resolve(
                &threaded("a follow-up", "$root"),
                ROOM,
                &ConversationConfig::default(),
            )
            .await
            .unwrap();
        assert_eq!(
            resolution,
            Resolution::Accepted {
                key: "$root".into(),
                body: "a follow-up".into()
            }
        );
    }

    #[tokio::test]
    async fn reply_to_undirected_root_is_rejected() {
        // Reply-prefixing is globally disabled, yet the reply must still be
        // rejected because the thread root never addressed the bot.
        let transport = MockTransport::new().with_event_body("$root", "just people talking");
        let r = resolver(prefixed_config(), transport);
        let resolution = r
            .resolve(
                &threaded("a follow-up", "$root"),
                ROOM,
                &ConversationConfig::default(),
            )
            .await
            .unwrap();
        assert_eq!(resolution, Resolution::NotDirected);
    }

    #[tokio::test]
    async fn bare_reply_without_root_reference_is_rejected() {
        let r = resolver(prefixed_config(), MockTransport::new());
        let mut msg = message("a follow-up");
        msg.relates_to = Some(Relation {
            rel_type: Some(REL_TYPE_THREAD.into()),
            event_id: None,
        });
        let resolution = r
            .resolve(&msg, ROOM, &ConversationConfig::default())
            .await
            .unwrap();
        assert_eq!(resolution, Resolution::NotDirected);
    }

    #[tokio::test]
    async fn dm_is_exempt_from_prefix_by_default() {
        let transport = MockTransport::new().with_direct_room(ROOM);
        let r = resolver(prefixed_config(), transport);
        let resolution = r
            .resolve(&message("hello"), ROOM, &ConversationConfig::default())
            .await
            .unwrap();
        assert_eq!(
            resolution,
            Resolution::Accepted {
                key: "$e1".into(),
                body: "hello".into()
            }
        );
    }

    #[tokio::test]
    async fn dm_requires_prefix_when_exemption_disabled() {
        let transport = MockTransport::new().with_direct_room(ROOM);
        let config = ResolverConfig {
            prefix_dm: true,
            ..prefixed_config()
        };
        let r = resolver(config, transport);
        let resolution = r
            .resolve(&message("hello"), ROOM, &ConversationConfig::default())
            .await
            .unwrap();
        assert_eq!(resolution, Resolution::NotDirected);
    }

    #[tokio::test]
    async fn conversation_config_overrides_default_prefix() {
        let r = resolver(prefixed_config(), MockTransport::new());
        let conversation = ConversationConfig {
            prefix: Some("assistant!".into()),
            ..Default::default()
        };
        let resolution = r
            .resolve(&message("assistant! hello"), ROOM, &conversation)
            .await
            .unwrap();
        match resolution {
            Resolution::Accepted { body, .. } => assert_eq!(body, "hello"),
            other => panic!("expected accept, got {:?}", other),
        }

        // The process-wide prefix no longer matches once overridden.
        let resolution = r
            .resolve(&message("bot: hello"), ROOM, &conversation)
            .await
            .unwrap();
        assert_eq!(resolution, Resolution::NotDirected);
    }

    #[tokio::test]
    async fn gating_rejections_never_reach_key_derivation() {
        let r = resolver(prefixed_config(), MockTransport::new());
        let mut msg = message("bot: hello");
        msg.sender = "@helper:example.org".into();
        let resolution = r
            .resolve(&msg, ROOM, &ConversationConfig::default())
            .await
            .unwrap();
        assert_eq!(resolution, Resolution::Ignored(IgnoreReason::OwnMessage));
    }

    #[tokio::test]
    async fn prefix_only_message_strips_to_empty_body() {
        let r = resolver(prefixed_config(), MockTransport::new());
        let resolution = r
            .resolve(&message("bot:"), ROOM, &ConversationConfig::default())
            .await
            .unwrap();
        assert_eq!(
            resolution,
            Resolution::Accepted {
                key: "$e1".into(),
                body: String::new()
            }
        );
    }
}
