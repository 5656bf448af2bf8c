//! Message handler: the per-message pipeline from a normalized inbound event
//! to a persisted conversation and an outbound reply.

use crate::channels::types::{localpart, StoredConversation};
use crate::channels::{ChatTransport, IncomingMessage};
use crate::config::ContextMode;
use crate::context::{ContextResolver, Resolution};
use crate::identity::IdentityClient;
use crate::kv_store::{KvStore, CONVERSATION_KEY_PREFIX};
use crate::orchestrator::{OrchestratorError, RunMeta, RunOrchestrator};
use crate::tools::ToolRegistry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;

/// Internal failure from one message's pipeline; the sender only ever sees
/// the generic operator message built from the coarse code.
struct HandlerFailure {
    message: String,
    code: Option<u16>,
}

impl From<String> for HandlerFailure {
    fn from(message: String) -> Self {
        HandlerFailure {
            message,
            code: None,
        }
    }
}

impl From<OrchestratorError> for HandlerFailure {
    fn from(e: OrchestratorError) -> Self {
        HandlerFailure {
            code: e.status_code(),
            message: e.to_string(),
        }
    }
}

pub struct MessageHandler {
    resolver: ContextResolver,
    orchestrator: RunOrchestrator,
    registry: Arc<ToolRegistry>,
    store: Arc<dyn KvStore>,
    identity: IdentityClient,
    transport: Arc<dyn ChatTransport>,
    context_mode: ContextMode,
    /// Typing-notification lifetime, matched to the run deadline.
    typing_timeout_ms: u64,
    /// Per-conversation-key locks. Handler tasks run in parallel across
    /// keys, but the load-orchestrate-persist sequence for one key must be
    /// serialized or concurrent messages each start their own remote thread.
    key_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl MessageHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        resolver: ContextResolver,
        orchestrator: RunOrchestrator,
        registry: Arc<ToolRegistry>,
        store: Arc<dyn KvStore>,
        identity: IdentityClient,
        transport: Arc<dyn ChatTransport>,
        context_mode: ContextMode,
        typing_timeout_ms: u64,
    ) -> Self {
        Self {
            resolver,
            orchestrator,
            registry,
            store,
            identity,
            transport,
            context_mode,
            typing_timeout_ms,
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    fn conversation_lock(&self, key: &str) -> Arc<AsyncMutex<()>> {
        self.key_locks
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    /// Entry point for one inbound message. Failures never propagate to the
    /// sync loop; the room gets a generic operator message instead.
    pub async fn on_message(&self, message: IncomingMessage) {
        let room_id = message.room_id.clone();
        let event_id = message.event_id.clone();
        if let Err(failure) = self.handle(message).await {
            log::error!(
                "[HANDLER] Failed to handle event {} in {}: {}",
                event_id,
                room_id,
                failure.message
            );
            let code = failure
                .code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "Unknown".to_string());
            self.send_error(
                &room_id,
                &event_id,
                &format!(
                    "The bot has encountered an error, please contact your administrator (Error code {}).",
                    code
                ),
            )
            .await;
        }
    }

    async fn handle(&self, message: IncomingMessage) -> Result<(), HandlerFailure> {
        if let Some(reason) = self.resolver.should_ignore(&message, &message.room_id) {
            log::debug!(
                "[HANDLER] Ignoring event {} in {}: {:?}",
                message.event_id,
                message.room_id,
                reason
            );
            return Ok(());
        }

        let key = self.resolver.conversation_key(&message, &message.room_id);
        // At most one round-trip may be live per key: the second of two
        // near-simultaneous messages must see the first one's persisted
        // thread instead of racing the read-modify-write.
        let key_lock = self.conversation_lock(&key);
        let _guard = key_lock.lock().await;

        let stored = self.load_conversation(&key, &message.room_id).await?;
        let conversation = stored
            .as_ref()
            .map(|s| s.config())
            .unwrap_or_default();

        let body = match self
            .resolver
            .resolve(&message, &message.room_id, &conversation)
            .await?
        {
            Resolution::Ignored(_) | Resolution::NotDirected => return Ok(()),
            Resolution::Accepted { body, .. } => body,
        };

        log::info!(
            "[HANDLER] Handling event {} in {} under key {}",
            message.event_id,
            message.room_id,
            key
        );
        if let Err(e) = self
            .transport
            .send_read_receipt(&message.room_id, &message.event_id)
            .await
        {
            log::warn!("[HANDLER] Failed to send read receipt: {}", e);
        }
        if let Err(e) = self
            .transport
            .set_typing(&message.room_id, true, self.typing_timeout_ms)
            .await
        {
            log::warn!("[HANDLER] Failed to start typing: {}", e);
        }

        if body.is_empty() {
            self.send_error(
                &message.room_id,
                &message.event_id,
                &format!("Error with body: {}", message.body),
            )
            .await;
            return Ok(());
        }

        // Sender identity feeds usage logs and the ticket reporter footer;
        // a directory outage must not silence the bot.
        let meta = match self.identity.lookup(localpart(&message.sender)).await {
            Ok(identity) => {
                log::info!(
                    "[HANDLER] Message from {} ({})",
                    identity.name,
                    identity.gid_uuid
                );
                Some(RunMeta {
                    name: identity.name,
                    gid_uuid: identity.gid_uuid,
                })
            }
            Err(e) => {
                log::warn!(
                    "[HANDLER] Identity lookup failed for {}: {}",
                    message.sender,
                    e
                );
                None
            }
        };

        let prior_thread = stored.as_ref().map(|s| s.thread_id.clone());
        let result = self
            .orchestrator
            .run(prior_thread, &body, &self.registry, meta.as_ref())
            .await?;

        self.persist_conversation(&key, &message, &stored, &result.thread_id)
            .await?;

        if let Err(e) = self
            .transport
            .set_typing(&message.room_id, false, 500)
            .await
        {
            log::warn!("[HANDLER] Failed to stop typing: {}", e);
        }
        self.transport
            .send_reply(&message.room_id, message.root_event_id(), &result.reply)
            .await?;
        Ok(())
    }

    /// Load conversation state under the derived key, falling back to the
    /// room-level entry so threads can continue a room conversation.
    async fn load_conversation(
        &self,
        key: &str,
        room_id: &str,
    ) -> Result<Option<StoredConversation>, HandlerFailure> {
        let mut raw = self
            .store
            .read(&format!("{}{}", CONVERSATION_KEY_PREFIX, key))
            .await?;
        if raw.is_none() && key != room_id {
            raw = self
                .store
                .read(&format!("{}{}", CONVERSATION_KEY_PREFIX, room_id))
                .await?;
        }

        match raw {
            Some(raw) => match serde_json::from_str::<StoredConversation>(&raw) {
                Ok(stored) => Ok(Some(stored)),
                // Unreadable state starts a fresh conversation instead of
                // wedging the key.
                Err(e) => {
                    log::warn!(
                        "[HANDLER] Discarding unreadable conversation state under {}: {}",
                        key,
                        e
                    );
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn persist_conversation(
        &self,
        key: &str,
        message: &IncomingMessage,
        prior: &Option<StoredConversation>,
        thread_id: &str,
    ) -> Result<(), HandlerFailure> {
        let state = StoredConversation {
            thread_id: thread_id.to_string(),
            config: prior.as_ref().and_then(|s| s.config.clone()),
        };
        let serialized = serde_json::to_string(&state)
            .map_err(|e| format!("Failed to serialize conversation state: {}", e))?;

        self.store
            .write(&format!("{}{}", CONVERSATION_KEY_PREFIX, key), &serialized)
            .await?;

        // Room-keyed conversations in mixed mode also get an entry under the
        // message's own event id, so a thread opened on this message later
        // picks up the same assistant thread.
        if self.context_mode == ContextMode::Both && key == message.room_id {
            self.store
                .write(
                    &format!("{}{}", CONVERSATION_KEY_PREFIX, message.event_id),
                    &serialized,
                )
                .await?;
        }
        Ok(())
    }

    async fn send_error(&self, room_id: &str, event_id: &str, text: &str) {
        if let Err(e) = self.transport.set_typing(room_id, false, 500).await {
            log::warn!("[HANDLER] Failed to stop typing: {}", e);
        }
        if let Err(e) = self.transport.send_text(room_id, text).await {
            log::error!("[HANDLER] Failed to send error message to {}: {}", room_id, e);
        }
        if let Err(e) = self.transport.send_read_receipt(room_id, event_id).await {
            log::warn!("[HANDLER] Failed to send read receipt: {}", e);
        }
    }
}
