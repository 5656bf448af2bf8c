//! Matrix transport: client-server API over plain REST with a long-poll
//! sync loop. One handler task is spawned per inbound room message.

use crate::channels::handler::MessageHandler;
use crate::channels::types::{BotProfile, IncomingMessage, Relation};
use crate::channels::ChatTransport;
use async_trait::async_trait;
use pulldown_cmark::{html, Options, Parser};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::oneshot;

/// Long-poll window for /sync.
const SYNC_TIMEOUT_MS: u64 = 30_000;
/// Backoff after a failed sync before retrying.
const SYNC_RETRY_DELAY: Duration = Duration::from_secs(5);

const WELCOME_MESSAGE: &str =
    "Hello! I'm an AI assistant. Send me a message (with my prefix, if one is configured) and I'll reply in a thread.";

pub struct MatrixTransport {
    client: Client,
    base_url: String,
    access_token: String,
    profile: BotProfile,
    /// Rooms flagged direct via `m.direct` account data, refreshed from sync.
    direct_rooms: RwLock<HashSet<String>>,
    reply_in_thread: bool,
    rich_text: bool,
}

#[derive(Debug, Deserialize)]
struct WhoamiResponse {
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct DisplayNameResponse {
    #[serde(default)]
    displayname: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SyncResponse {
    pub next_batch: String,
    #[serde(default)]
    rooms: SyncRooms,
    #[serde(default)]
    account_data: EventContainer,
}

#[derive(Debug, Default, Deserialize)]
struct SyncRooms {
    #[serde(default)]
    join: HashMap<String, JoinedRoom>,
    #[serde(default)]
    invite: HashMap<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
struct JoinedRoom {
    #[serde(default)]
    timeline: EventContainer,
}

#[derive(Debug, Default, Deserialize)]
struct EventContainer {
    #[serde(default)]
    events: Vec<RoomEvent>,
}

#[derive(Debug, Deserialize)]
struct RoomEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    event_id: String,
    #[serde(default)]
    sender: String,
    #[serde(default)]
    origin_server_ts: i64,
    #[serde(default)]
    content: Value,
}

impl MatrixTransport {
    /// Connect and resolve the bot's own identity. Fails when the access
    /// token is not accepted by the homeserver.
    pub async fn connect(
        homeserver_url: &str,
        access_token: &str,
        reply_in_thread: bool,
        rich_text: bool,
    ) -> Result<Self, String> {
        let transport = MatrixTransport {
            client: Client::new(),
            base_url: format!("{}/_matrix/client/v3", homeserver_url.trim_end_matches('/')),
            access_token: access_token.to_string(),
            profile: BotProfile::new(String::new(), None),
            direct_rooms: RwLock::new(HashSet::new()),
            reply_in_thread,
            rich_text,
        };

        let whoami: WhoamiResponse = transport
            .send(Method::GET, "/account/whoami", None)
            .await?
            .json()
            .await
            .map_err(|e| format!("Failed to parse whoami response: {}", e))?;

        let display_name = transport.fetch_display_name(&whoami.user_id).await;
        let profile = BotProfile::new(whoami.user_id, display_name);
        log::info!(
            "[MATRIX] Connected as {} ({})",
            profile.user_id,
            profile.display_name
        );

        let transport = MatrixTransport { profile, ..transport };
        transport.refresh_direct_rooms().await;
        Ok(transport)
    }

    pub fn profile(&self) -> &BotProfile {
        &self.profile
    }

    async fn fetch_display_name(&self, user_id: &str) -> Option<String> {
        let path = format!("/profile/{}/displayname", urlencoding::encode(user_id));
        match self.send(Method::GET, &path, None).await {
            Ok(response) => response
                .json::<DisplayNameResponse>()
                .await
                .ok()
                .and_then(|r| r.displayname),
            Err(e) => {
                log::warn!("[MATRIX] Failed to fetch display name: {}", e);
                None
            }
        }
    }

    /// Pull the full `m.direct` account-data map; incremental updates arrive
    /// through sync afterwards.
    async fn refresh_direct_rooms(&self) {
        let path = format!(
            "/user/{}/account_data/m.direct",
            urlencoding::encode(&self.profile.user_id)
        );
        match self.request_value(Method::GET, &path, None).await {
            Ok(Some(content)) => self.apply_direct_map(&content),
            Ok(None) => {}
            Err(e) => log::warn!("[MATRIX] Failed to fetch m.direct account data: {}", e),
        }
    }

    fn apply_direct_map(&self, content: &Value) {
        let mut rooms = HashSet::new();
        if let Some(map) = content.as_object() {
            for room_ids in map.values() {
                if let Some(ids) = room_ids.as_array() {
                    rooms.extend(ids.iter().filter_map(|v| v.as_str().map(String::from)));
                }
            }
        }
        log::debug!("[MATRIX] {} direct room(s) known", rooms.len());
        *self.direct_rooms.write().unwrap() = rooms;
    }

    /// One long-poll sync round.
    pub async fn sync(&self, since: Option<&str>, timeout_ms: u64) -> Result<SyncResponse, String> {
        let mut query = vec![("timeout", timeout_ms.to_string())];
        if let Some(since) = since {
            query.push(("since", since.to_string()));
        }

        let response = self
            .client
            .get(format!("{}/sync", self.base_url))
            .bearer_auth(&self.access_token)
            .query(&query)
            .timeout(Duration::from_millis(timeout_ms + 30_000))
            .send()
            .await
            .map_err(|e| format!("Sync request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("Sync returned status {}", status));
        }
        response
            .json::<SyncResponse>()
            .await
            .map_err(|e| format!("Failed to parse sync response: {}", e))
    }

    pub async fn join_room(&self, room_id: &str) -> Result<(), String> {
        let path = format!("/join/{}", urlencoding::encode(room_id));
        self.send(Method::POST, &path, Some(json!({}))).await?;
        log::info!("[MATRIX] Joined room {}", room_id);
        Ok(())
    }

    async fn send_content(&self, room_id: &str, content: Value) -> Result<(), String> {
        let path = format!(
            "/rooms/{}/send/m.room.message/{}",
            urlencoding::encode(room_id),
            uuid::Uuid::new_v4()
        );
        self.send(Method::PUT, &path, Some(content)).await?;
        Ok(())
    }

    /// Fire a request and surface non-success statuses as errors.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<reqwest::Response, String> {
        let mut request = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.access_token);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| format!("Matrix API request failed: {}", e))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(format!("Matrix API returned status {}: {}", status, text));
        }
        Ok(response)
    }

    /// Like [`send`](Self::send) but treats 404 as an absent value.
    async fn request_value(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Option<Value>, String> {
        let mut request = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.access_token);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| format!("Matrix API request failed: {}", e))?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json::<Value>()
                .await
                .map(Some)
                .map_err(|e| format!("Failed to parse Matrix response: {}", e)),
            status => {
                let text = response.text().await.unwrap_or_default();
                Err(format!("Matrix API returned status {}: {}", status, text))
            }
        }
    }

    fn render_markdown(text: &str) -> String {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TABLES);
        let mut rendered = String::new();
        html::push_html(&mut rendered, Parser::new_ext(text, options));
        rendered.trim_end().to_string()
    }

    /// Reply event content. Threaded replies carry the `m.in_reply_to`
    /// fallback so clients without thread support still show the
    /// association.
    fn reply_content(
        rich_text: bool,
        reply_in_thread: bool,
        root_event_id: &str,
        text: &str,
    ) -> Value {
        let mut content = json!({ "msgtype": "m.text", "body": text });
        if rich_text {
            content["format"] = json!("org.matrix.custom.html");
            content["formatted_body"] = json!(Self::render_markdown(text));
        }
        if reply_in_thread {
            content["m.relates_to"] = json!({
                "rel_type": "m.thread",
                "event_id": root_event_id,
                "is_falling_back": true,
                "m.in_reply_to": { "event_id": root_event_id },
            });
        }
        content
    }

    fn incoming_message(room_id: &str, event: RoomEvent) -> IncomingMessage {
        let relates_to = event
            .content
            .get("m.relates_to")
            .and_then(|v| serde_json::from_value::<Relation>(v.clone()).ok());
        IncomingMessage {
            event_id: event.event_id,
            sender: event.sender,
            room_id: room_id.to_string(),
            body: event
                .content
                .get("body")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            msgtype: event
                .content
                .get("msgtype")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            origin_server_ts: event.origin_server_ts,
            relates_to,
        }
    }
}

#[async_trait]
impl ChatTransport for MatrixTransport {
    async fn event_body(&self, room_id: &str, event_id: &str) -> Result<Option<String>, String> {
        let path = format!(
            "/rooms/{}/event/{}",
            urlencoding::encode(room_id),
            urlencoding::encode(event_id)
        );
        let event = self.request_value(Method::GET, &path, None).await?;
        Ok(event.and_then(|e| {
            e.get("content")
                .and_then(|c| c.get("body"))
                .and_then(|b| b.as_str())
                .map(String::from)
        }))
    }

    async fn is_direct_room(&self, room_id: &str) -> bool {
        self.direct_rooms.read().unwrap().contains(room_id)
    }

    async fn send_read_receipt(&self, room_id: &str, event_id: &str) -> Result<(), String> {
        let path = format!(
            "/rooms/{}/receipt/m.read/{}",
            urlencoding::encode(room_id),
            urlencoding::encode(event_id)
        );
        self.send(Method::POST, &path, Some(json!({}))).await?;
        Ok(())
    }

    async fn set_typing(&self, room_id: &str, typing: bool, timeout_ms: u64) -> Result<(), String> {
        let path = format!(
            "/rooms/{}/typing/{}",
            urlencoding::encode(room_id),
            urlencoding::encode(&self.profile.user_id)
        );
        let body = if typing {
            json!({ "typing": true, "timeout": timeout_ms })
        } else {
            json!({ "typing": false })
        };
        self.send(Method::PUT, &path, Some(body)).await?;
        Ok(())
    }

    async fn send_text(&self, room_id: &str, text: &str) -> Result<(), String> {
        self.send_content(room_id, json!({ "msgtype": "m.text", "body": text }))
            .await
    }

    async fn send_reply(
        &self,
        room_id: &str,
        root_event_id: &str,
        text: &str,
    ) -> Result<(), String> {
        let content =
            Self::reply_content(self.rich_text, self.reply_in_thread, root_event_id, text);
        self.send_content(room_id, content).await
    }
}

/// Listener behavior toggles, split from the process config.
#[derive(Debug, Clone, Copy)]
pub struct ListenerOptions {
    pub autojoin: bool,
    pub welcome: bool,
}

/// Run the sync loop until shutdown is signalled. The initial sync only
/// establishes a batch token; backlog events are never replayed.
pub async fn start_matrix_listener(
    transport: Arc<MatrixTransport>,
    handler: Arc<MessageHandler>,
    options: ListenerOptions,
    mut shutdown: oneshot::Receiver<()>,
) -> Result<(), String> {
    let initial = transport.sync(None, 0).await?;
    let mut since = initial.next_batch;
    log::info!("[MATRIX] Listening for messages");

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                log::info!("[MATRIX] Shutting down listener");
                return Ok(());
            }
            result = transport.sync(Some(&since), SYNC_TIMEOUT_MS) => match result {
                Ok(response) => {
                    since = response.next_batch.clone();
                    dispatch_sync(&transport, &handler, options, response).await;
                }
                Err(e) => {
                    log::error!("[MATRIX] Sync failed: {}", e);
                    tokio::time::sleep(SYNC_RETRY_DELAY).await;
                }
            }
        }
    }
}

async fn dispatch_sync(
    transport: &Arc<MatrixTransport>,
    handler: &Arc<MessageHandler>,
    options: ListenerOptions,
    response: SyncResponse,
) {
    for event in response.account_data.events {
        if event.event_type == "m.direct" {
            transport.apply_direct_map(&event.content);
        }
    }

    for room_id in response.rooms.invite.keys() {
        if !options.autojoin {
            log::info!("[MATRIX] Ignoring invite to {} (autojoin disabled)", room_id);
            continue;
        }
        match transport.join_room(room_id).await {
            Ok(()) => {
                if options.welcome {
                    if let Err(e) = transport.send_text(room_id, WELCOME_MESSAGE).await {
                        log::warn!("[MATRIX] Failed to send welcome to {}: {}", room_id, e);
                    }
                }
            }
            Err(e) => log::error!("[MATRIX] Failed to join {}: {}", room_id, e),
        }
    }

    for (room_id, room) in response.rooms.join {
        for event in room.timeline.events {
            if event.event_type != "m.room.message" {
                continue;
            }
            let message = MatrixTransport::incoming_message(&room_id, event);
            let handler = handler.clone();
            tokio::spawn(async move {
                handler.on_message(message).await;
            });
        }
    }
}
