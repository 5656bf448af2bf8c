pub mod handler;
pub mod matrix;
pub mod types;

pub use handler::MessageHandler;
pub use matrix::MatrixTransport;
pub use types::{BotProfile, ConversationConfig, IncomingMessage, Relation, StoredConversation};

use async_trait::async_trait;

/// Chat transport collaborator: the slice of the protocol this bot consumes.
/// Connection management, sync and event parsing live in the implementation
/// ([`MatrixTransport`]); tests use a scripted stand-in.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Fetch the text body of an event, `None` when the event has no body
    /// (redacted, non-text).
    async fn event_body(&self, room_id: &str, event_id: &str) -> Result<Option<String>, String>;

    /// Whether the room is a direct one-to-one chat with the bot.
    async fn is_direct_room(&self, room_id: &str) -> bool;

    async fn send_read_receipt(&self, room_id: &str, event_id: &str) -> Result<(), String>;

    async fn set_typing(&self, room_id: &str, typing: bool, timeout_ms: u64) -> Result<(), String>;

    /// Send a plain text message into a room.
    async fn send_text(&self, room_id: &str, text: &str) -> Result<(), String>;

    /// Send a reply associated with a thread root. Whether the reply is
    /// threaded and/or rendered rich is transport configuration.
    async fn send_reply(&self, room_id: &str, root_event_id: &str, text: &str)
        -> Result<(), String>;
}

#[cfg(test)]
pub mod test_support {
    use super::ChatTransport;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    /// Scripted transport for resolver/handler tests: canned event bodies and
    /// DM rooms in, recorded outbound calls out.
    #[derive(Default)]
    pub struct MockTransport {
        pub event_bodies: Mutex<HashMap<String, String>>,
        pub direct_rooms: Mutex<HashSet<String>>,
        pub sent_texts: Mutex<Vec<(String, String)>>,
        pub sent_replies: Mutex<Vec<(String, String, String)>>,
        pub receipts: Mutex<Vec<String>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_event_body(self, event_id: &str, body: &str) -> Self {
            self.event_bodies
                .lock()
                .unwrap()
                .insert(event_id.to_string(), body.to_string());
            self
        }

        pub fn with_direct_room(self, room_id: &str) -> Self {
            self.direct_rooms.lock().unwrap().insert(room_id.to_string());
            self
        }
    }

    #[async_trait]
    impl ChatTransport for MockTransport {
        async fn event_body(
            &self,
            _room_id: &str,
            event_id: &str,
        ) -> Result<Option<String>, String> {
            Ok(self.event_bodies.lock().unwrap().get(event_id).cloned())
        }

        async fn is_direct_room(&self, room_id: &str) -> bool {
            self.direct_rooms.lock().unwrap().contains(room_id)
        }

        async fn send_read_receipt(&self, _room_id: &str, event_id: &str) -> Result<(), String> {
            self.receipts.lock().unwrap().push(event_id.to_string());
            Ok(())
        }

        async fn set_typing(
            &self,
            _room_id: &str,
            _typing: bool,
            _timeout_ms: u64,
        ) -> Result<(), String> {
            Ok(())
        }

        async fn send_text(&self, room_id: &str, text: &str) -> Result<(), String> {
            self.sent_texts
                .lock()
                .unwrap()
                .push((room_id.to_string(), text.to_string()));
            Ok(())
        }

        async fn send_reply(
            &self,
            room_id: &str,
            root_event_id: &str,
            text: &str,
        ) -> Result<(), String> {
            self.sent_replies.lock().unwrap().push((
                room_id.to_string(),
                root_event_id.to_string(),
                text.to_string(),
            ));
            Ok(())
        }
    }
}
