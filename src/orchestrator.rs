//! Run Orchestrator: drives one remote assistant run to completion.
//!
//! Each round-trip owns a single polling task; the fingerprint set and the
//! in-flight submission flag are local to that task, so ticks are serialized
//! by construction and the overall deadline simply drops the loop future.

use crate::assistant::{
    AssistantError, AssistantService, PendingToolCall, RunStatus, ToolOutput,
};
use crate::tools::{ToolInvocation, ToolRegistry};
use serde_json::json;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Caller metadata attached to ticket-creating tool calls.
#[derive(Debug, Clone)]
pub struct RunMeta {
    pub name: String,
    pub gid_uuid: String,
}

/// Outcome of a completed round-trip: the assistant's reply plus the thread
/// id to persist as the conversation's state.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub reply: String,
    pub thread_id: String,
}

#[derive(Debug)]
pub enum OrchestratorError {
    /// The overall deadline expired while polling.
    Timeout { after: Duration },
    /// The run ended failed/cancelled/expired.
    Terminal { status: String },
    /// The run completed but the latest message carried no content.
    NoContent,
    /// A remote call failed.
    Api(AssistantError),
}

impl OrchestratorError {
    /// Coarse status code for operator-facing reporting.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            OrchestratorError::Api(e) => e.status,
            _ => None,
        }
    }
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorError::Timeout { after } => {
                write!(f, "Response timed out after {}s", after.as_secs())
            }
            OrchestratorError::Terminal { status } => {
                write!(f, "Run ended with status: {}", status)
            }
            OrchestratorError::NoContent => write!(f, "No message content available"),
            OrchestratorError::Api(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for OrchestratorError {}

impl From<AssistantError> for OrchestratorError {
    fn from(e: AssistantError) -> Self {
        OrchestratorError::Api(e)
    }
}

/// Identifier for one requires-action occurrence: the tool-call ids in the
/// order received. A repeat observation of the same occurrence across poll
/// ticks produces the same fingerprint.
fn action_fingerprint(calls: &[PendingToolCall]) -> String {
    calls.iter().map(|c| c.id.as_str()).collect()
}

pub struct RunOrchestrator {
    assistant: Arc<dyn AssistantService>,
    poll_interval: Duration,
    run_timeout: Duration,
}

impl RunOrchestrator {
    pub fn new(
        assistant: Arc<dyn AssistantService>,
        poll_interval: Duration,
        run_timeout: Duration,
    ) -> Self {
        Self {
            assistant,
            poll_interval,
            run_timeout,
        }
    }

    /// Execute one assistant round-trip: acquire a thread (create on first
    /// contact, reuse otherwise), append the user message, start a run and
    /// poll it to a terminal state, servicing tool calls along the way.
    pub async fn run(
        &self,
        prior_thread: Option<String>,
        user_message: &str,
        registry: &ToolRegistry,
        meta: Option<&RunMeta>,
    ) -> Result<RunResult, OrchestratorError> {
        let thread_id = match prior_thread {
            Some(id) => id,
            None => self.assistant.create_thread().await?,
        };

        self.assistant.add_message(&thread_id, user_message).await?;
        let run_id = self.assistant.create_run(&thread_id).await?;
        log::info!("[ORCHESTRATOR] Polling run {} on thread {}", run_id, thread_id);

        // On expiry the loop future is dropped: no further ticks fire and the
        // caller sees the timeout exactly once.
        match tokio::time::timeout(
            self.run_timeout,
            self.poll_to_completion(&thread_id, &run_id, registry, meta),
        )
        .await
        {
            Ok(result) => result.map(|reply| RunResult { reply, thread_id }),
            Err(_) => {
                log::error!(
                    "[ORCHESTRATOR] Polling timed out after {}s for run {}",
                    self.run_timeout.as_secs(),
                    run_id
                );
                Err(OrchestratorError::Timeout {
                    after: self.run_timeout,
                })
            }
        }
    }

    async fn poll_to_completion(
        &self,
        thread_id: &str,
        run_id: &str,
        registry: &ToolRegistry,
        meta: Option<&RunMeta>,
    ) -> Result<String, OrchestratorError> {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // Fingerprints of occurrences whose outputs were already submitted.
        let mut handled: HashSet<String> = HashSet::new();
        // No second submission may start while one is outstanding. Ticks in
        // this loop are serialized, so the flag only trips if servicing is
        // ever moved off the loop task.
        let mut submission_in_flight = false;

        loop {
            ticker.tick().await;
            let snapshot = self.assistant.get_run(thread_id, run_id).await?;

            match snapshot.status {
                RunStatus::Queued | RunStatus::InProgress | RunStatus::Other(_) => continue,
                RunStatus::RequiresAction => {
                    let calls = snapshot.pending_tool_calls;
                    if calls.is_empty() {
                        // Transient remote state; the batch shows up on a
                        // later tick.
                        continue;
                    }
                    let fingerprint = action_fingerprint(&calls);
                    if handled.contains(&fingerprint) {
                        log::debug!(
                            "[ORCHESTRATOR] Occurrence {} already handled, waiting for run to advance",
                            fingerprint
                        );
                        continue;
                    }
                    if submission_in_flight {
                        continue;
                    }

                    submission_in_flight = true;
                    let submitted = self
                        .service_action(thread_id, run_id, &calls, registry, meta)
                        .await;
                    submission_in_flight = false;
                    if submitted? {
                        handled.insert(fingerprint);
                    }
                }
                RunStatus::Completed => {
                    log::info!("[ORCHESTRATOR] Run {} completed", run_id);
                    return match self.assistant.latest_message(thread_id).await? {
                        Some(content) => Ok(content),
                        None => Err(OrchestratorError::NoContent),
                    };
                }
                status => {
                    log::error!(
                        "[ORCHESTRATOR] Run {} ended with status: {}",
                        run_id,
                        status.as_str()
                    );
                    return Err(OrchestratorError::Terminal {
                        status: status.as_str().to_string(),
                    });
                }
            }
        }
    }

    /// Execute every tool call in the batch and submit the outputs, unless
    /// the run has already moved past requires_action (a race with the
    /// remote side), in which case the batch is discarded. Returns whether a
    /// submission happened.
    async fn service_action(
        &self,
        thread_id: &str,
        run_id: &str,
        calls: &[PendingToolCall],
        registry: &ToolRegistry,
        meta: Option<&RunMeta>,
    ) -> Result<bool, OrchestratorError> {
        let mut outputs = Vec::with_capacity(calls.len());
        for call in calls {
            let output = self.execute_call(call, registry, meta).await;
            outputs.push(ToolOutput {
                tool_call_id: call.id.clone(),
                output,
            });
        }

        // Tool execution took time; the run may no longer be waiting.
        let recheck = self.assistant.get_run(thread_id, run_id).await?;
        if recheck.status != RunStatus::RequiresAction {
            log::warn!(
                "[ORCHESTRATOR] Run {} left requires_action ({}) before submission, discarding batch",
                run_id,
                recheck.status.as_str()
            );
            return Ok(false);
        }

        self.assistant
            .submit_tool_outputs(thread_id, run_id, outputs)
            .await?;
        Ok(true)
    }

    /// One tool call in, one output out. Missing tools and executor failures
    /// become error-shaped outputs; they never abort the run.
    async fn execute_call(
        &self,
        call: &PendingToolCall,
        registry: &ToolRegistry,
        meta: Option<&RunMeta>,
    ) -> String {
        let mut invocation = ToolInvocation::parse(&call.name, &call.arguments);
        if let (ToolInvocation::CreateZendeskTicket(args), Some(meta)) = (&mut invocation, meta) {
            args.append_reporter_footer(&meta.name, &meta.gid_uuid);
        }

        let name = invocation.name().to_string();
        let tool = match registry.get(&name) {
            Some(tool) => tool,
            None => {
                log::warn!("[ORCHESTRATOR] Tool '{}' not found in registry", name);
                return json!({ "error": format!("Tool '{}' not found", name) }).to_string();
            }
        };

        log::info!("[ORCHESTRATOR] Executing tool '{}' for call {}", name, call.id);
        match tool.execute(invocation.into_params()).await {
            Ok(output) => output,
            Err(e) => {
                log::error!("[ORCHESTRATOR] Tool '{}' failed: {}", name, e);
                json!({ "error": e.to_string() }).to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_concatenates_ids_in_order() {
        let calls = vec![
            PendingToolCall {
                id: "call_a".into(),
                name: "x".into(),
                arguments: "{}".into(),
            },
            PendingToolCall {
                id: "call_b".into(),
                name: "y".into(),
                arguments: "{}".into(),
            },
        ];
        assert_eq!(action_fingerprint(&calls), "call_acall_b");

        let reversed: Vec<_> = calls.into_iter().rev().collect();
        assert_eq!(action_fingerprint(&reversed), "call_bcall_a");
    }

    #[test]
    fn error_display_carries_coarse_detail() {
        let e = OrchestratorError::Terminal {
            status: "failed".into(),
        };
        assert_eq!(e.to_string(), "Run ended with status: failed");
        assert_eq!(e.status_code(), None);

        let e = OrchestratorError::Api(AssistantError::with_status("boom", 429));
        assert_eq!(e.status_code(), Some(429));
    }
}
