//! # Agent Executor
//!
//! Runs one task under one role, in one of two modes:
//!
//! - **Tool loop**: the role's tools, a system prompt built from the role
//!   prompt plus the session briefing, and a bounded model/tool loop with no
//!   handoffs.
//! - **Delegate**: the whole task goes to the external code generator.
//!
//! Either way the output is written to the artifact store under
//! `(role, task_id)` and returned as a [`TaskExecutionResult`]. Failures are
//! reported through the result's status and never returned as errors.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::dispatcher::TaskRunner;
use crate::artifacts::{ArtifactStore, NO_PRIOR_FINDINGS};
use crate::provider::{ChatMessage, ChatRequest, ModelProvider};
use crate::roles::RoleSpec;
use crate::swarm::agent::ContextVariables;
use crate::swarm::runtime::invoke_capability;
use crate::tools::{CodeGenError, CodeGenerator, ToolCatalog};

/// Output when a tool-loop role runs out of iterations or says nothing
pub const NO_CONCLUSIVE_RESPONSE: &str = "(Agent completed without producing a conclusive response)";

const CLOSING_INSTRUCTIONS: &str = "Complete the assigned task. Be thorough but concise. \
When done, provide a clear summary of your findings or actions.";

/// Final state of one task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Ok,
    Error,
    Timeout,
}

impl TaskStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, TaskStatus::Ok)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Ok => "ok",
            TaskStatus::Error => "error",
            TaskStatus::Timeout => "timeout",
        }
    }
}

/// Outcome of one task, produced exactly once per dispatched task id
#[derive(Debug, Clone, Serialize)]
pub struct TaskExecutionResult {
    pub role: String,
    pub task_id: String,
    pub task: String,
    pub output: String,
    pub status: TaskStatus,
    pub duration: Duration,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TaskExecutionResult {
    /// Error result for a task that never reached an executor
    pub fn rejected(role: &str, task_id: &str, task: &str, output: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            role: role.to_string(),
            task_id: task_id.to_string(),
            task: task.to_string(),
            output: output.into(),
            status: TaskStatus::Error,
            duration: Duration::ZERO,
            started_at: now,
            finished_at: now,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration.as_secs_f64()
    }
}

/// Why a task failed inside the executor
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("model call timed out after {}s", .0.as_secs())]
    ModelTimeout(Duration),
    #[error("model call failed: {0}")]
    Provider(String),
    #[error(transparent)]
    CodeGen(#[from] CodeGenError),
}

impl ExecutionError {
    fn status(&self) -> TaskStatus {
        match self {
            ExecutionError::ModelTimeout(_) | ExecutionError::CodeGen(CodeGenError::Timeout(_)) => {
                TaskStatus::Timeout
            }
            _ => TaskStatus::Error,
        }
    }
}

/// Executor settings
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Model for roles without an override; `None` uses the provider default
    pub default_model: Option<String>,
    pub call_timeout: Duration,
    pub delegate_timeout: Duration,
    /// Working directory handed to the code generator
    pub working_dir: PathBuf,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_model: None,
            call_timeout: Duration::from_secs(120),
            delegate_timeout: Duration::from_secs(600),
            working_dir: PathBuf::from("."),
            max_tokens: 8192,
            temperature: 0.1,
        }
    }
}

/// Runs tasks for the dispatcher
pub struct AgentExecutor {
    provider: Arc<dyn ModelProvider>,
    code_generator: Arc<dyn CodeGenerator>,
    tools: ToolCatalog,
    config: ExecutorConfig,
}

impl AgentExecutor {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        code_generator: Arc<dyn CodeGenerator>,
        tools: ToolCatalog,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            provider,
            code_generator,
            tools,
            config,
        }
    }

    /// Run `task` under `role`, record the output, and report how it went
    #[tracing::instrument(skip(self, role, task, store), fields(role = %role.name, delegate = role.delegate))]
    pub async fn run(
        &self,
        role: &RoleSpec,
        task_id: &str,
        task: &str,
        store: &ArtifactStore,
    ) -> TaskExecutionResult {
        let started_at = Utc::now();
        let clock = Instant::now();

        let outcome = if role.delegate {
            self.run_delegate(role, task, store).await
        } else {
            self.run_tool_loop(role, task, store).await
        };

        let (output, status) = match outcome {
            Ok(output) => (output, TaskStatus::Ok),
            Err(e) => {
                tracing::warn!(task_id, error = %e, "task failed");
                let status = e.status();
                (format!("Error: {}", e), status)
            }
        };
        let duration = clock.elapsed();

        if let Err(e) = store.write(&role.name, task_id, &output).await {
            tracing::warn!(task_id, error = %e, "failed to persist artifact");
        }

        tracing::info!(task_id, status = status.as_str(), secs = duration.as_secs_f64(), "task finished");
        TaskExecutionResult {
            role: role.name.clone(),
            task_id: task_id.to_string(),
            task: task.to_string(),
            output,
            status,
            duration,
            started_at,
            finished_at: Utc::now(),
        }
    }

    fn model_for(&self, role: &RoleSpec) -> Option<String> {
        role.model.clone().or_else(|| self.config.default_model.clone())
    }

    async fn run_delegate(
        &self,
        role: &RoleSpec,
        task: &str,
        store: &ArtifactStore,
    ) -> Result<String, ExecutionError> {
        let prompt = compose_delegate_prompt(role, &store.briefing().await, task);
        tracing::info!(preview = %task.chars().take(80).collect::<String>(), "delegating to code generator");
        let output = self
            .code_generator
            .execute(&prompt, &self.config.working_dir, self.config.delegate_timeout)
            .await?;
        Ok(output.render())
    }

    async fn run_tool_loop(
        &self,
        role: &RoleSpec,
        task: &str,
        store: &ArtifactStore,
    ) -> Result<String, ExecutionError> {
        let capabilities = self.tools.resolve(&role.tools);
        let schemas = capabilities.iter().map(|c| c.schema()).collect::<Vec<_>>();
        let system = compose_system_prompt(role, &store.briefing().await, Utc::now());
        let mut messages = vec![ChatMessage::system(system), ChatMessage::user(task)];
        // Roles never change agents, so the context only flows between tools
        let mut context = ContextVariables::new();

        for iteration in 0..role.max_iterations {
            let request = ChatRequest::new(messages.clone())
                .with_tools(schemas.clone())
                .with_model(self.model_for(role))
                .with_max_tokens(self.config.max_tokens)
                .with_temperature(self.config.temperature);

            let response = tokio::time::timeout(self.config.call_timeout, self.provider.chat(request))
                .await
                .map_err(|_| ExecutionError::ModelTimeout(self.config.call_timeout))?
                .map_err(|e| ExecutionError::Provider(format!("{:#}", e)))?;

            if !response.has_tool_calls() {
                let text = response.text_or_empty();
                return Ok(if text.is_empty() {
                    NO_CONCLUSIVE_RESPONSE.to_string()
                } else {
                    text.to_string()
                });
            }

            tracing::debug!(iteration, calls = response.tool_calls.len(), "tool round");
            messages.push(ChatMessage::assistant_with_tools(
                response.content.clone().unwrap_or_default(),
                response.tool_calls.clone(),
            ));
            for call in &response.tool_calls {
                let result = invoke_capability(&capabilities, call, &context).await;
                if result.is_handoff() {
                    tracing::debug!(tool = %call.name, "ignoring handoff inside task");
                }
                messages.push(ChatMessage::tool_result(call, result.value));
                context.extend(result.context_variables);
            }
        }

        tracing::warn!(max_iterations = role.max_iterations, "iteration budget exhausted");
        Ok(NO_CONCLUSIVE_RESPONSE.to_string())
    }
}

#[async_trait]
impl TaskRunner for AgentExecutor {
    async fn run_task(
        &self,
        role: &RoleSpec,
        task_id: &str,
        task: &str,
        store: &ArtifactStore,
    ) -> anyhow::Result<TaskExecutionResult> {
        Ok(self.run(role, task_id, task, store).await)
    }
}

fn has_findings(briefing: &str) -> bool {
    !briefing.is_empty() && briefing != NO_PRIOR_FINDINGS
}

/// System prompt for tool-loop roles
pub fn compose_system_prompt(role: &RoleSpec, briefing: &str, now: DateTime<Utc>) -> String {
    let mut parts = vec![format!(
        "# Role: {}\n\nCurrent time: {}\n",
        role.display_name,
        now.format("%Y-%m-%d %H:%M UTC")
    )];
    if !role.system_prompt.is_empty() {
        parts.push(role.system_prompt.clone());
    }
    if has_findings(briefing) {
        parts.push(briefing.to_string());
    }
    parts.push(CLOSING_INSTRUCTIONS.to_string());
    parts.join("\n\n")
}

/// Single prompt for the external code generator
pub fn compose_delegate_prompt(role: &RoleSpec, briefing: &str, task: &str) -> String {
    let mut parts = Vec::new();
    if !role.system_prompt.is_empty() {
        parts.push(role.system_prompt.clone());
    }
    if has_findings(briefing) {
        parts.push(format!("\n{}\n", briefing));
    }
    parts.push(format!("\n## Task\n{}", task));
    parts.join("\n")
}
