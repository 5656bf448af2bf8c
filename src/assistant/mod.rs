pub mod openai;

pub use openai::OpenAIAssistantClient;

use async_trait::async_trait;
use std::fmt;

/// Remote run states this bot reacts to. Anything unrecognized is carried
/// through as `Other` and treated like queued/in-progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Completed,
    Failed,
    Cancelled,
    Expired,
    Other(String),
}

impl RunStatus {
    pub fn from_str(s: &str) -> RunStatus {
        match s {
            "queued" => RunStatus::Queued,
            "in_progress" => RunStatus::InProgress,
            "requires_action" => RunStatus::RequiresAction,
            "completed" => RunStatus::Completed,
            "failed" => RunStatus::Failed,
            "cancelled" => RunStatus::Cancelled,
            "expired" => RunStatus::Expired,
            other => RunStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::RequiresAction => "requires_action",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Expired => "expired",
            RunStatus::Other(s) => s,
        }
    }

    /// Run ended without a reply.
    pub fn is_terminal_failure(&self) -> bool {
        matches!(
            self,
            RunStatus::Failed | RunStatus::Cancelled | RunStatus::Expired
        )
    }
}

/// One tool call pending in a requires-action occurrence.
#[derive(Debug, Clone)]
pub struct PendingToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON argument payload, parsed by the orchestrator.
    pub arguments: String,
}

/// Output for one tool call, submitted back as part of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

/// Point-in-time view of a remote run.
#[derive(Debug, Clone)]
pub struct RunSnapshot {
    pub status: RunStatus,
    /// Pending tool calls; only populated while status is requires_action.
    pub pending_tool_calls: Vec<PendingToolCall>,
}

impl RunSnapshot {
    pub fn new(status: RunStatus) -> Self {
        RunSnapshot {
            status,
            pending_tool_calls: Vec::new(),
        }
    }
}

/// Error from the remote assistant service.
#[derive(Debug, Clone)]
pub struct AssistantError {
    pub message: String,
    /// HTTP status code when the API answered with one.
    pub status: Option<u16>,
}

impl AssistantError {
    pub fn new(message: impl Into<String>) -> Self {
        AssistantError {
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(message: impl Into<String>, status: u16) -> Self {
        AssistantError {
            message: message.into(),
            status: Some(status),
        }
    }
}

impl fmt::Display for AssistantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(code) => write!(f, "{} (HTTP {})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for AssistantError {}

/// Remote assistant service: threads, runs and tool-output submission.
/// The production implementation is [`OpenAIAssistantClient`]; tests script
/// a mock.
#[async_trait]
pub trait AssistantService: Send + Sync {
    /// Create a new conversation thread, returning its id.
    async fn create_thread(&self) -> Result<String, AssistantError>;

    /// Append a user message to a thread.
    async fn add_message(&self, thread_id: &str, content: &str) -> Result<(), AssistantError>;

    /// Start a run of the configured assistant against a thread, returning
    /// the run id.
    async fn create_run(&self, thread_id: &str) -> Result<String, AssistantError>;

    /// Fetch the current status of a run, with pending tool calls when the
    /// run requires action.
    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<RunSnapshot, AssistantError>;

    /// Fetch the most recent message's text content in a thread; `None` when
    /// the message has no content items.
    async fn latest_message(&self, thread_id: &str) -> Result<Option<String>, AssistantError>;

    /// Submit the full output batch for a requires-action occurrence.
    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> Result<(), AssistantError>;
}
