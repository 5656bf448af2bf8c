use crate::config::ZendeskConfig;
use crate::tools::registry::Tool;
use crate::tools::types::{ToolError, ZendeskTicketArgs, CREATE_ZENDESK_TICKET};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;
use serde_json::{json, Value};

/// Creates a support ticket through the Zendesk REST API.
pub struct ZendeskTicketTool {
    client: reqwest::Client,
    config: ZendeskConfig,
}

#[derive(Debug, Deserialize)]
struct TicketResponse {
    #[serde(default)]
    ticket: Option<TicketBody>,
}

#[derive(Debug, Deserialize)]
struct TicketBody {
    id: Option<i64>,
    status: Option<String>,
    url: Option<String>,
}

impl ZendeskTicketTool {
    pub fn new(config: ZendeskConfig) -> Self {
        ZendeskTicketTool {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "https://{}.zendesk.com/api/v2/tickets.json",
            self.config.subdomain
        )
    }

    fn auth_header(&self) -> String {
        let credentials = format!("{}/token:{}", self.config.email, self.config.api_token);
        format!("Basic {}", BASE64.encode(credentials))
    }
}

#[async_trait]
impl Tool for ZendeskTicketTool {
    fn name(&self) -> &str {
        CREATE_ZENDESK_TICKET
    }

    async fn execute(&self, params: Value) -> Result<String, ToolError> {
        let args: ZendeskTicketArgs = serde_json::from_value(params).unwrap_or_default();

        let body = json!({
            "ticket": {
                "subject": args.subject,
                "priority": args.priority,
                "type": args.ticket_type,
                "requester": { "name": args.name, "email": args.email },
                "comment": { "body": args.comment },
            }
        });

        log::info!(
            "[ZENDESK] Creating ticket (subject: {:?})",
            args.subject.as_deref().unwrap_or("(none)")
        );

        let response = self
            .client
            .post(self.endpoint())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::AUTHORIZATION, self.auth_header())
            .json(&body)
            .send()
            .await
            .map_err(|e| ToolError::new(format!("Zendesk request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ToolError::with_status(
                format!("Zendesk create ticket failed: {}", text),
                status.as_u16(),
            ));
        }

        let parsed: TicketResponse = response
            .json()
            .await
            .map_err(|e| ToolError::new(format!("Failed to parse Zendesk response: {}", e)))?;

        let ticket = parsed.ticket.unwrap_or(TicketBody {
            id: None,
            status: None,
            url: None,
        });

        let output = json!({
            "ticketId": ticket.id,
            "status": ticket.status,
            "url": ticket.url,
        });

        log::info!("[ZENDESK] Ticket created: {:?}", ticket.id);
        Ok(output.to_string())
    }
}
