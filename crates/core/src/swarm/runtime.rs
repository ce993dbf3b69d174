//! # Conversation Runtime
//!
//! Runs the active agent's tool-use loop and performs handoffs when a
//! capability returns a target agent.
//!
//! ```text
//! resolve instructions → model call (deadline) → no tools? done
//!                                              → run tools in order → merge context → maybe switch agent → repeat
//! ```
//!
//! Running out of turns is a silent truncation: the accumulated messages are
//! returned as-is and [`SwarmResponse::outcome`] reports
//! [`RunOutcome::BudgetExhausted`].

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;

use super::agent::{AgentDefinition, Capability, ContextVariables, FunctionResult};
use super::events::{emit, EventSender, SwarmEvent, SwarmEventKind};
use crate::provider::{ChatMessage, ChatRequest, ModelProvider, ToolInvocation};

/// Default per-call model deadline
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Default turn budget for one conversation turn
pub const DEFAULT_MAX_TURNS: usize = 20;

/// Appended when the model does not answer before the deadline
pub const TIMEOUT_FALLBACK: &str =
    "Sorry, I took too long to respond. Please try again or simplify your request.";

/// Appended when the model call itself fails
pub const PROVIDER_FAILURE_FALLBACK: &str =
    "Sorry, I couldn't reach the language model. Please try again in a moment.";

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// The model answered without requesting tools
    Completed,
    /// The turn budget ran out
    BudgetExhausted,
    /// A model call exceeded its deadline
    TimedOut,
    /// A model call returned an error
    ProviderFailed,
}

/// Result of [`Swarm::run`]
#[derive(Debug, Clone)]
pub struct SwarmResponse {
    /// Messages produced during this run only
    pub messages: Vec<ChatMessage>,
    /// Agent active when the run ended
    pub agent: Arc<AgentDefinition>,
    pub context_variables: ContextVariables,
    /// Model calls made
    pub turns: usize,
    pub outcome: RunOutcome,
}

impl SwarmResponse {
    /// Content of the last assistant message, if any
    pub fn last_reply(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == crate::provider::MessageRole::Assistant && !m.content.is_empty())
            .map(|m| m.content.as_str())
    }
}

/// The conversation runtime
pub struct Swarm {
    provider: Arc<dyn ModelProvider>,
    default_model: Option<String>,
    call_timeout: Duration,
    events: EventSender,
}

impl Swarm {
    pub fn new(provider: Arc<dyn ModelProvider>) -> Self {
        Self {
            provider,
            default_model: None,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            events: None,
        }
    }

    /// Model used by agents without their own override
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_events(mut self, tx: tokio::sync::mpsc::Sender<SwarmEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Run one conversation turn starting at `agent`.
    ///
    /// `messages` is the prior history; only the new messages are returned.
    #[tracing::instrument(skip_all, fields(agent = %agent.name, max_turns = max_turns))]
    pub async fn run(
        &self,
        agent: Arc<AgentDefinition>,
        messages: Vec<ChatMessage>,
        context_variables: ContextVariables,
        max_turns: usize,
    ) -> SwarmResponse {
        let mut active = agent;
        let mut context = context_variables;
        let mut history = messages;
        let start = history.len();
        let mut turns = 0;
        let mut outcome = RunOutcome::BudgetExhausted;

        while turns < max_turns {
            turns += 1;

            let mut request_messages =
                vec![ChatMessage::system(active.instructions.resolve(&context))];
            request_messages.extend(history.iter().cloned());
            let request = ChatRequest::new(request_messages)
                .with_tools(active.tool_schemas())
                .with_model(active.model.clone().or_else(|| self.default_model.clone()));

            let response =
                match tokio::time::timeout(self.call_timeout, self.provider.chat(request)).await {
                    Ok(Ok(response)) => response,
                    Ok(Err(e)) => {
                        tracing::warn!(agent = %active.name, error = %e, "model call failed");
                        history.push(
                            ChatMessage::assistant(PROVIDER_FAILURE_FALLBACK).with_name(&active.name),
                        );
                        outcome = RunOutcome::ProviderFailed;
                        break;
                    }
                    Err(_) => {
                        tracing::warn!(
                            agent = %active.name,
                            timeout_secs = self.call_timeout.as_secs(),
                            "model call timed out"
                        );
                        history.push(ChatMessage::assistant(TIMEOUT_FALLBACK).with_name(&active.name));
                        outcome = RunOutcome::TimedOut;
                        break;
                    }
                };

            if !response.has_tool_calls() {
                history.push(
                    ChatMessage::assistant(response.content.unwrap_or_default())
                        .with_name(&active.name),
                );
                outcome = RunOutcome::Completed;
                break;
            }

            history.push(
                ChatMessage::assistant_with_tools(
                    response.content.unwrap_or_default(),
                    response.tool_calls.clone(),
                )
                .with_name(&active.name),
            );

            // Tools resolve against the agent that issued them; a handoff
            // applies from the next model call on.
            let mut next_agent = None;
            for call in &response.tool_calls {
                let result = invoke_capability(&active.capabilities, call, &context).await;
                history.push(ChatMessage::tool_result(call, result.value));
                context.extend(result.context_variables);
                if let Some(target) = result.agent {
                    next_agent = Some(target);
                }
            }

            if let Some(target) = next_agent {
                tracing::info!(from = %active.name, to = %target.name, "handoff");
                emit(
                    &self.events,
                    SwarmEvent::new(SwarmEventKind::Handoff, &active.name)
                        .with_data(json!({ "to": target.name })),
                )
                .await;
                active = target;
            }
        }

        if outcome == RunOutcome::BudgetExhausted {
            tracing::debug!(agent = %active.name, turns, "turn budget exhausted");
        }

        SwarmResponse {
            messages: history.split_off(start),
            agent: active,
            context_variables: context,
            turns,
            outcome,
        }
    }
}

/// Look up and invoke one capability. Unknown names and handler errors are
/// reported as the tool output; nothing escapes as an error.
pub(crate) async fn invoke_capability(
    capabilities: &[Capability],
    call: &ToolInvocation,
    context: &ContextVariables,
) -> FunctionResult {
    let Some(capability) = capabilities.iter().find(|c| c.name == call.name) else {
        tracing::warn!(name = %call.name, "unknown capability requested");
        return FunctionResult::new(format!("Error: function '{}' not found", call.name));
    };

    tracing::debug!(name = %call.name, "invoking capability");
    match capability.invoke(call.arguments.clone(), context).await {
        Ok(output) => output.into(),
        Err(e) => {
            tracing::warn!(name = %call.name, error = %e, "capability failed");
            FunctionResult::new(format!("Error: {:#}", e))
        }
    }
}
