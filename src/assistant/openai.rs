//! OpenAI Assistants API (v2) client: threads, runs, messages and
//! tool-output submission over plain REST.

use crate::assistant::{
    AssistantError, AssistantService, PendingToolCall, RunSnapshot, RunStatus, ToolOutput,
};
use async_trait::async_trait;
use reqwest::{header, Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Cap a string at `max_chars` characters, appending an ellipsis when cut.
/// Counts characters, not bytes, so multi-byte error bodies never split.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((boundary, _)) => format!("{}...", &text[..boundary]),
        None => text.to_string(),
    }
}

#[derive(Clone)]
pub struct OpenAIAssistantClient {
    client: Client,
    auth_headers: header::HeaderMap,
    base_url: String,
    assistant_id: String,
}

#[derive(Debug, Deserialize)]
struct ObjectWithId {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RunObject {
    status: String,
    #[serde(default)]
    required_action: Option<RequiredAction>,
}

#[derive(Debug, Deserialize)]
struct RequiredAction {
    #[serde(default)]
    submit_tool_outputs: Option<SubmitToolOutputsAction>,
}

#[derive(Debug, Deserialize)]
struct SubmitToolOutputsAction {
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    data: Vec<MessageObject>,
}

#[derive(Debug, Deserialize)]
struct MessageObject {
    #[serde(default)]
    content: Vec<MessageContent>,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: Option<MessageText>,
}

#[derive(Debug, Deserialize)]
struct MessageText {
    value: String,
}

#[derive(Debug, Serialize)]
struct WireToolOutput<'a> {
    tool_call_id: &'a str,
    output: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

impl OpenAIAssistantClient {
    pub fn new(api_key: &str, base_url: &str, assistant_id: &str) -> Result<Self, String> {
        let mut auth_headers = header::HeaderMap::new();
        auth_headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        // The Assistants API is versioned behind a beta header.
        auth_headers.insert(
            "OpenAI-Beta",
            header::HeaderValue::from_static("assistants=v2"),
        );
        let auth_value = header::HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|e| format!("Invalid API key format: {}", e))?;
        auth_headers.insert(header::AUTHORIZATION, auth_value);

        Ok(Self {
            client: Client::new(),
            auth_headers,
            base_url: base_url.trim_end_matches('/').to_string(),
            assistant_id: assistant_id.to_string(),
        })
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T, AssistantError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .client
            .request(method, &url)
            .headers(self.auth_headers.clone());
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AssistantError::new(format!("Assistant API request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<ApiErrorResponse>(&error_text) {
                Ok(parsed) => format!("Assistant API error: {}", parsed.error.message),
                Err(_) => format!(
                    "Assistant API returned status {}: {}",
                    status,
                    truncate_chars(&error_text, 200)
                ),
            };
            return Err(AssistantError::with_status(message, status.as_u16()));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AssistantError::new(format!("Failed to parse assistant response: {}", e)))
    }
}

#[async_trait]
impl AssistantService for OpenAIAssistantClient {
    async fn create_thread(&self) -> Result<String, AssistantError> {
        log::debug!("[ASSISTANT] Creating a new thread");
        let thread: ObjectWithId = self
            .request(Method::POST, "/threads", Some(json!({})))
            .await?;
        Ok(thread.id)
    }

    async fn add_message(&self, thread_id: &str, content: &str) -> Result<(), AssistantError> {
        log::debug!("[ASSISTANT] Adding message to thread {}", thread_id);
        let _: ObjectWithId = self
            .request(
                Method::POST,
                &format!("/threads/{}/messages", thread_id),
                Some(json!({ "role": "user", "content": content })),
            )
            .await?;
        Ok(())
    }

    async fn create_run(&self, thread_id: &str) -> Result<String, AssistantError> {
        log::debug!("[ASSISTANT] Starting run for thread {}", thread_id);
        let run: ObjectWithId = self
            .request(
                Method::POST,
                &format!("/threads/{}/runs", thread_id),
                Some(json!({ "assistant_id": self.assistant_id })),
            )
            .await?;
        Ok(run.id)
    }

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<RunSnapshot, AssistantError> {
        let run: RunObject = self
            .request(
                Method::GET,
                &format!("/threads/{}/runs/{}", thread_id, run_id),
                None,
            )
            .await?;

        let pending_tool_calls = run
            .required_action
            .and_then(|a| a.submit_tool_outputs)
            .map(|s| {
                s.tool_calls
                    .into_iter()
                    .map(|tc| PendingToolCall {
                        id: tc.id,
                        name: tc.function.name,
                        arguments: tc.function.arguments,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(RunSnapshot {
            status: RunStatus::from_str(&run.status),
            pending_tool_calls,
        })
    }

    async fn latest_message(&self, thread_id: &str) -> Result<Option<String>, AssistantError> {
        let list: MessageList = self
            .request(
                Method::GET,
                &format!("/threads/{}/messages?limit=1", thread_id),
                None,
            )
            .await?;

        let content = list.data.into_iter().next().and_then(|msg| {
            msg.content.into_iter().next().map(|item| {
                if item.content_type == "text" {
                    item.text.map(|t| t.value).unwrap_or_default()
                } else {
                    "Message content not supported.".to_string()
                }
            })
        });
        Ok(content)
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> Result<(), AssistantError> {
        log::info!(
            "[ASSISTANT] Submitting {} tool output(s) for run {}",
            outputs.len(),
            run_id
        );
        let wire: Vec<WireToolOutput> = outputs
            .iter()
            .map(|o| WireToolOutput {
                tool_call_id: &o.tool_call_id,
                output: &o.output,
            })
            .collect();

        let _: serde_json::Value = self
            .request(
                Method::POST,
                &format!("/threads/{}/runs/{}/submit_tool_outputs", thread_id, run_id),
                Some(json!({ "tool_outputs": wire })),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_is_char_boundary_safe() {
        // Multi-byte characters straddling the cap must not split.
        let body = "é".repeat(300);
        let truncated = truncate_chars(&body, 200);
        assert_eq!(truncated.chars().count(), 203);
        assert!(truncated.ends_with("..."));

        assert_eq!(truncate_chars("short", 200), "short");
        let exact = "x".repeat(200);
        assert_eq!(truncate_chars(&exact, 200), exact);
    }
}
