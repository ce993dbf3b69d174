//! # Result Merger
//!
//! Folds per-task results into one report. A single result is returned
//! verbatim; anything more goes through one synthesis call. The merger never
//! fails: a failed or empty synthesis yields [`MERGE_FAILURE`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::executor::TaskExecutionResult;
use super::planner::TaskGraph;
use crate::provider::{ChatMessage, ChatRequest, ModelProvider};

/// Returned when synthesis fails or comes back empty
pub const MERGE_FAILURE: &str = "(Failed to synthesize results)";

/// Returned when no task produced a result at all
pub const NOTHING_RAN: &str = "No tasks could be run for this request.";

const MERGER_SYSTEM: &str = "You are a results synthesizer. Produce a clear, unified report.";

pub struct ResultMerger {
    provider: Arc<dyn ModelProvider>,
    model: Option<String>,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
}

impl ResultMerger {
    pub fn new(provider: Arc<dyn ModelProvider>) -> Self {
        Self {
            provider,
            model: None,
            max_tokens: 8192,
            temperature: 0.1,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[tracing::instrument(skip_all, fields(results = results.len()))]
    pub async fn merge(
        &self,
        request: &str,
        graph: &TaskGraph,
        results: &BTreeMap<String, TaskExecutionResult>,
    ) -> String {
        let unresolved: Vec<&str> = graph
            .keys()
            .filter(|id| !results.contains_key(*id))
            .map(String::as_str)
            .collect();

        if let (1, Some(only)) = (results.len(), results.values().next()) {
            if !unresolved.is_empty() {
                tracing::warn!(unresolved = ?unresolved, "returning the only result; other tasks never ran");
            }
            return only.output.clone();
        }
        if results.is_empty() {
            return if unresolved.is_empty() {
                NOTHING_RAN.to_string()
            } else {
                format!("{} Unresolved tasks: {}", NOTHING_RAN, unresolved.join(", "))
            };
        }

        let chat = ChatRequest::new(vec![
            ChatMessage::system(MERGER_SYSTEM),
            ChatMessage::user(build_merge_prompt(request, results, &unresolved)),
        ])
        .with_model(self.model.clone())
        .with_max_tokens(self.max_tokens)
        .with_temperature(self.temperature);

        match tokio::time::timeout(self.timeout, self.provider.chat(chat)).await {
            Ok(Ok(response)) if !response.text_or_empty().is_empty() => {
                response.text_or_empty().to_string()
            }
            Ok(Ok(_)) => {
                tracing::warn!("merge returned empty content");
                MERGE_FAILURE.to_string()
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "merge call failed");
                MERGE_FAILURE.to_string()
            }
            Err(_) => {
                tracing::error!(timeout_secs = self.timeout.as_secs(), "merge call timed out");
                MERGE_FAILURE.to_string()
            }
        }
    }
}

/// Synthesis prompt listing every result, plus tasks that never ran
pub fn build_merge_prompt(
    request: &str,
    results: &BTreeMap<String, TaskExecutionResult>,
    unresolved: &[&str],
) -> String {
    let sections: Vec<String> = results
        .iter()
        .map(|(id, r)| {
            let status = if r.status.is_ok() {
                "ok".to_string()
            } else {
                format!("FAILED ({})", r.status.as_str())
            };
            format!(
                "### Task {} [{}] - {} ({:.1}s)\n**Assignment:** {}\n\n**Output:**\n{}\n",
                id,
                r.role,
                status,
                r.duration_secs(),
                r.task,
                r.output
            )
        })
        .collect();

    let mut prompt = format!(
        "You are synthesizing results from multiple AI agents into a final response for the user.\n\n\
## Original User Request\n{}\n\n## Agent Results\n{}",
        request,
        sections.join("---\n")
    );
    if !unresolved.is_empty() {
        prompt.push_str(&format!(
            "\n## Tasks Not Run\nThese tasks were blocked by unmet dependencies: {}\n",
            unresolved.join(", ")
        ));
    }
    prompt.push_str(
        "\n## Instructions\n\
1. Combine the agent outputs into a coherent, unified response\n\
2. Highlight key findings, actions taken, and any issues\n\
3. Be concise and remove redundancy across agents\n\
4. If any agent failed or a task did not run, say so and explain the impact\n\
5. Format the response in clear markdown",
    );
    prompt
}
