//! # Task Planner
//!
//! One model call turns a free-form request into a [`TaskGraph`], using the
//! role catalog as the vocabulary. Parsing is deliberately forgiving; an
//! empty graph means the request could not be decomposed.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::provider::{ChatMessage, ChatRequest, ModelProvider};
use crate::roles::RoleCatalog;

const PLANNER_SYSTEM: &str = "You are a task planning assistant. Output valid JSON only.";

/// One node of the task graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub role: String,
    pub task: String,
    #[serde(default, alias = "dependencies")]
    pub depends: Vec<String>,
}

impl TaskSpec {
    pub fn new(role: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            task: task.into(),
            depends: Vec::new(),
        }
    }

    pub fn with_depends<I, S>(mut self, depends: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends = depends.into_iter().map(Into::into).collect();
        self
    }
}

/// Task id → spec. Ordered so waves and reports are deterministic.
pub type TaskGraph = BTreeMap<String, TaskSpec>;

pub struct TaskPlanner {
    provider: Arc<dyn ModelProvider>,
    model: Option<String>,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
}

impl TaskPlanner {
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

    /// Decompose `request`. Model failures and unusable output both yield an
    /// empty graph.
    #[tracing::instrument(skip_all, fields(preview = %request.chars().take(50).collect::<String>()))]
    pub async fn plan(&self, request: &str, catalog: &RoleCatalog) -> TaskGraph {
        let chat = ChatRequest::new(vec![
            ChatMessage::system(PLANNER_SYSTEM),
            ChatMessage::user(build_prompt(request, catalog)),
        ])
        .with_model(self.model.clone())
        .with_max_tokens(self.max_tokens)
        .with_temperature(self.temperature);

        let content = match tokio::time::timeout(self.timeout, self.provider.chat(chat)).await {
            Ok(Ok(response)) => response.content.unwrap_or_default(),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "planner call failed");
                return TaskGraph::new();
            }
            Err(_) => {
                tracing::error!(timeout_secs = self.timeout.as_secs(), "planner call timed out");
                return TaskGraph::new();
            }
        };

        let graph = parse_task_graph(&content);
        if graph.is_empty() {
            tracing::warn!(raw = %content.chars().take(200).collect::<String>(), "planner produced no usable tasks");
        } else {
            tracing::info!(tasks = graph.len(), "task graph ready");
        }
        graph
    }
}

/// Planner prompt listing the available roles and the decomposition rules
pub fn build_prompt(request: &str, catalog: &RoleCatalog) -> String {
    format!(
        r#"You are a task planner for a team of AI agents. Break the user's request into a task graph.

## Available Agent Roles
{roles}

## Rules
1. Each task must specify a `role` (one of the available roles above)
2. Tasks can depend on other tasks via `depends` (list of task IDs)
3. Tasks without dependencies run in parallel
4. Keep it minimal: do not create unnecessary tasks
5. Use the role whose description best matches each piece of work
6. If the request is simple enough for a single agent, create exactly ONE task

## Output Format
Return ONLY valid JSON (no markdown fences, no explanation):
{{
  "t1": {{"role": "researcher", "task": "description of what to do", "depends": []}},
  "t2": {{"role": "coder", "task": "description of what to do", "depends": ["t1"]}}
}}

## User Request
{request}"#,
        roles = catalog.describe(),
        request = request,
    )
}

/// Parse model output into a task graph.
///
/// Code fences are stripped, prose around a single JSON object is ignored,
/// entries without a `role` and `task` string are dropped and a missing
/// `depends` defaults to empty. Anything that is not an object yields an
/// empty graph.
pub fn parse_task_graph(content: &str) -> TaskGraph {
    let text = strip_fences(content);
    let value = serde_json::from_str::<Value>(text)
        .ok()
        .or_else(|| extract_object(text).and_then(|s| serde_json::from_str(s).ok()));

    let Some(Value::Object(entries)) = value else {
        return TaskGraph::new();
    };

    entries
        .into_iter()
        .filter_map(|(id, entry)| {
            let role = entry.get("role")?.as_str()?.trim().to_string();
            let task = entry.get("task")?.as_str()?.trim().to_string();
            if role.is_empty() || task.is_empty() {
                return None;
            }
            let depends = entry
                .get("depends")
                .or_else(|| entry.get("dependencies"))
                .map(dependency_list)
                .unwrap_or_default();
            Some((id, TaskSpec { role, task, depends }))
        })
        .collect()
}

fn strip_fences(content: &str) -> &str {
    let mut text = content.trim();
    if text.starts_with("```") {
        text = text.split_once('\n').map(|(_, rest)| rest).unwrap_or("");
    }
    if let Some(stripped) = text.trim_end().strip_suffix("```") {
        text = stripped;
    }
    text.trim()
}

fn extract_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn dependency_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Value::String(s) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::{ScriptedProvider, Step};

    #[test]
    fn test_not_json_yields_empty_graph() {
        assert!(parse_task_graph("not json at all").is_empty());
        assert!(parse_task_graph("").is_empty());
        assert!(parse_task_graph(r#"["t1", "t2"]"#).is_empty());
    }

    #[test]
    fn test_fenced_output() {
        let raw = "```json\n{\"t1\": {\"role\": \"researcher\", \"task\": \"look\"}}\n```";
        let graph = parse_task_graph(raw);
        assert_eq!(graph["t1"], TaskSpec::new("researcher", "look"));
    }

    #[test]
    fn test_drops_incomplete_entries_and_defaults_depends() {
        let raw = r#"{
            "t1": {"role": "researcher", "task": "gather facts"},
            "t2": {"role": "coder", "task": "implement", "depends": ["t1"]},
            "t3": {"task": "no role"},
            "t4": {"role": "qa"},
            "t5": "not an object",
            "t6": {"role": "writer", "task": "docs", "dependencies": "t2"}
        }"#;
        let graph = parse_task_graph(raw);

        assert_eq!(graph.keys().collect::<Vec<_>>(), vec!["t1", "t2", "t6"]);
        assert!(graph["t1"].depends.is_empty());
        assert_eq!(graph["t2"].depends, vec!["t1"]);
        assert_eq!(graph["t6"].depends, vec!["t2"]);
    }

    #[test]
    fn test_prose_around_object() {
        let raw = "Here is the plan:\n{\"t1\": {\"role\": \"qa\", \"task\": \"review\", \"depends\": []}}\nGood luck!";
        assert_eq!(parse_task_graph(raw).len(), 1);
    }

    #[test]
    fn test_prompt_lists_roles_and_request() {
        let prompt = build_prompt("Build a CLI", &RoleCatalog::builtin());
        assert!(prompt.contains("- **coder**"));
        assert!(prompt.contains("- **writer**"));
        assert!(prompt.ends_with("## User Request\nBuild a CLI"));
    }

    #[tokio::test]
    async fn test_plan_uses_disabled_tools_mode() {
        let provider = Arc::new(ScriptedProvider::texts(&[
            r#"{"t1": {"role": "researcher", "task": "dig", "depends": []}}"#,
        ]));
        let planner = TaskPlanner::new(provider.clone()).with_model(Some("planner-model".into()));

        let graph = planner.plan("investigate", &RoleCatalog::builtin()).await;

        assert_eq!(graph.len(), 1);
        let request = &provider.requests()[0];
        assert!(request.tools.is_none());
        assert_eq!(request.model.as_deref(), Some("planner-model"));
        assert_eq!(request.temperature, Some(0.1));
        assert_eq!(request.max_tokens, Some(8192));
    }

    #[tokio::test]
    async fn test_plan_provider_failure_is_empty() {
        let provider = Arc::new(ScriptedProvider::new(vec![Step::Fail("down".into())]));
        let graph = TaskPlanner::new(provider)
            .plan("anything", &RoleCatalog::builtin())
            .await;
        assert!(graph.is_empty());
    }
}
