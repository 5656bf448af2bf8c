pub mod builtin;
pub mod registry;
pub mod types;

pub use registry::{Tool, ToolRegistry};
pub use types::{ToolError, ToolInvocation, ZendeskTicketArgs};

use crate::config::Config;
use std::sync::Arc;

/// Build the registry of tools the assistant may call. Tools whose
/// credentials are not configured are simply absent; the orchestrator turns
/// calls to missing tools into error-shaped outputs.
pub fn create_default_registry(config: &Config) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    match &config.zendesk {
        Some(zendesk) => {
            registry.register(Arc::new(builtin::ZendeskTicketTool::new(zendesk.clone())));
        }
        None => {
            log::warn!("[TOOLS] Zendesk credentials not configured; create_zendesk_ticket disabled");
        }
    }

    log::info!("[TOOLS] Registered tools: {:?}", registry.names());
    registry
}
