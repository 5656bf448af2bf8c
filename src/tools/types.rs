use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Error returned by a tool executor.
#[derive(Debug, Clone)]
pub struct ToolError {
    pub message: String,
    /// HTTP status when the failure came from a remote call.
    pub status: Option<u16>,
}

impl ToolError {
    pub fn new(message: impl Into<String>) -> Self {
        ToolError {
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(message: impl Into<String>, status: u16) -> Self {
        ToolError {
            message: message.into(),
            status: Some(status),
        }
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(code) => write!(f, "{} (HTTP {})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ToolError {}

/// Name of the built-in ticket creation tool, as registered with the
/// remote assistant.
pub const CREATE_ZENDESK_TICKET: &str = "create_zendesk_ticket";

/// Hard cap on a ticket comment after the reporter footer is appended.
pub const TICKET_COMMENT_MAX_CHARS: usize = 8000;

/// Arguments for `create_zendesk_ticket`. All fields are optional on the
/// wire; the assistant fills in what it extracted from the conversation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZendeskTicketArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default)]
    pub comment: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub ticket_type: Option<String>,
}

impl ZendeskTicketArgs {
    /// Append the fixed-format reporter footer, truncating the original
    /// comment so the combined text never exceeds the hard cap. The footer
    /// itself is always present in full.
    pub fn append_reporter_footer(&mut self, reporter_name: &str, gid_uuid: &str) {
        let footer = format!(
            "\n\n---\nReported via chat by:\nName: {}\nGID UUID: {}",
            reporter_name, gid_uuid
        );
        let footer_len = footer.chars().count();
        let budget = TICKET_COMMENT_MAX_CHARS.saturating_sub(footer_len);
        if self.comment.chars().count() > budget {
            self.comment = self.comment.chars().take(budget).collect();
        }
        self.comment.push_str(&footer);
    }
}

/// A tool call's parsed arguments, tagged by tool name. Known tools get a
/// typed schema; anything else carries its raw parameters through untouched.
#[derive(Debug, Clone)]
pub enum ToolInvocation {
    CreateZendeskTicket(ZendeskTicketArgs),
    Other { name: String, params: Value },
}

impl ToolInvocation {
    /// Parse a tool call's raw argument payload. A payload that is not valid
    /// JSON degrades to an empty object rather than failing the call.
    pub fn parse(name: &str, raw_arguments: &str) -> Self {
        let params: Value =
            serde_json::from_str(raw_arguments).unwrap_or_else(|_| Value::Object(Default::default()));
        match name {
            CREATE_ZENDESK_TICKET => {
                let args: ZendeskTicketArgs =
                    serde_json::from_value(params).unwrap_or_default();
                ToolInvocation::CreateZendeskTicket(args)
            }
            _ => ToolInvocation::Other {
                name: name.to_string(),
                params,
            },
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ToolInvocation::CreateZendeskTicket(_) => CREATE_ZENDESK_TICKET,
            ToolInvocation::Other { name, .. } => name,
        }
    }

    /// The parameters to hand to the executor.
    pub fn into_params(self) -> Value {
        match self {
            ToolInvocation::CreateZendeskTicket(args) => {
                serde_json::to_value(args).unwrap_or_else(|_| Value::Object(Default::default()))
            }
            ToolInvocation::Other { params, .. } => params,
        }
    }
}
