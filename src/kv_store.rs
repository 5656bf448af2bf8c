//! Key/value persistence for conversation state and identity caching.
//!
//! The bot only ever needs `read(key)` / `write(key, value)` over namespaced
//! string keys. Production deployments point REDIS_URL at a sidecar; when it
//! is unset an in-process map is used (state then lives as long as the
//! process).

use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Mutex;

/// Storage-key namespace for conversation state.
pub const CONVERSATION_KEY_PREFIX: &str = "gpt-";
/// Storage-key namespace for cached identities.
pub const IDENTITY_KEY_PREFIX: &str = "user-";

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Get a value by key. `Ok(None)` when the key is absent.
    async fn read(&self, key: &str) -> Result<Option<String>, String>;

    /// Set a key to a value, overwriting any previous value.
    async fn write(&self, key: &str, value: &str) -> Result<(), String>;
}

/// Redis-backed store.
pub struct RedisKvStore {
    client: redis::Client,
}

impl RedisKvStore {
    pub fn new(url: &str) -> Result<Self, String> {
        let client = redis::Client::open(url)
            .map_err(|e| format!("Failed to create Redis client: {}", e))?;
        Ok(RedisKvStore { client })
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection, String> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| format!("Redis connection error: {}", e))
    }

    /// Check if Redis is reachable.
    pub async fn ping(&self) -> bool {
        match self.conn().await {
            Ok(mut conn) => redis::cmd("PING")
                .query_async::<String>(&mut conn)
                .await
                .is_ok(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn read(&self, key: &str) -> Result<Option<String>, String> {
        let mut conn = self.conn().await?;
        let val: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| format!("Redis GET error: {}", e))?;
        Ok(val)
    }

    async fn write(&self, key: &str, value: &str) -> Result<(), String> {
        let mut conn = self.conn().await?;
        conn.set::<_, _, ()>(key, value)
            .await
            .map_err(|e| format!("Redis SET error: {}", e))
    }
}

/// In-process store, used when no REDIS_URL is configured and in tests.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn read(&self, key: &str) -> Result<Option<String>, String> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn write(&self, key: &str, value: &str) -> Result<(), String> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
