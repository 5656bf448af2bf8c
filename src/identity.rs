//! Directory lookups for message senders, cached in the KV store so each
//! identity is fetched from the directory API at most once.

use crate::kv_store::{KvStore, IDENTITY_KEY_PREFIX};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Directory record for one sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub gid_uuid: String,
    #[serde(alias = "gid_name")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_photo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
}

pub struct IdentityClient {
    client: reqwest::Client,
    base_url: String,
    store: Arc<dyn KvStore>,
}

impl IdentityClient {
    pub fn new(base_url: &str, store: Arc<dyn KvStore>) -> Self {
        IdentityClient {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            store,
        }
    }

    /// Resolve an identity, cache first. Fresh lookups are written back to
    /// the store; a write failure only costs the next lookup a round-trip.
    pub async fn lookup(&self, gid_uuid: &str) -> Result<Identity, String> {
        let cache_key = format!("{}{}", IDENTITY_KEY_PREFIX, gid_uuid);
        if let Some(cached) = self.store.read(&cache_key).await? {
            match serde_json::from_str::<Identity>(&cached) {
                Ok(identity) => {
                    log::debug!("[IDENTITY] Cache hit for {}", gid_uuid);
                    return Ok(identity);
                }
                Err(e) => {
                    log::warn!("[IDENTITY] Discarding unreadable cache entry for {}: {}", gid_uuid, e);
                }
            }
        }

        let url = format!(
            "{}/v1/directory/{}",
            self.base_url,
            urlencoding::encode(gid_uuid)
        );
        log::info!("[IDENTITY] Fetching identity for {}", gid_uuid);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("Directory request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!(
                "Directory lookup for {} returned status {}",
                gid_uuid, status
            ));
        }

        let identity: Identity = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse directory response: {}", e))?;

        match serde_json::to_string(&identity) {
            Ok(serialized) => {
                if let Err(e) = self.store.write(&cache_key, &serialized).await {
                    log::warn!("[IDENTITY] Failed to cache identity for {}: {}", gid_uuid, e);
                }
            }
            Err(e) => log::warn!("[IDENTITY] Failed to serialize identity for {}: {}", gid_uuid, e),
        }

        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv_store::MemoryKvStore;

    #[tokio::test]
    async fn cached_identity_is_returned_without_a_network_call() {
        let store = Arc::new(MemoryKvStore::new());
        store
            .write(
                "user-8e7a1c2d",
                r#"{"gid_uuid":"8e7a1c2d","name":"ann","display_name":"Ann Example"}"#,
            )
            .await
            .unwrap();

        // Unroutable base URL: a cache miss would fail loudly.
        let client = IdentityClient::new("http://127.0.0.1:1", store);
        let identity = client.lookup("8e7a1c2d").await.unwrap();

        assert_eq!(identity.name, "ann");
        assert_eq!(identity.display_name.as_deref(), Some("Ann Example"));
    }

    #[tokio::test]
    async fn unreadable_cache_entry_falls_through_to_fetch() {
        let store = Arc::new(MemoryKvStore::new());
        store.write("user-bad", "{truncated").await.unwrap();

        let client = IdentityClient::new("http://127.0.0.1:1", store);
        assert!(client.lookup("bad").await.is_err());
    }
}
