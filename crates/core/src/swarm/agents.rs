//! # Built-in Conversation Agents
//!
//! `triage` fronts every conversation and hands coding work to `coder` and
//! research to `searcher`; both hand control back when done. Handoff targets
//! are built when the handoff fires, so the three definitions can refer to
//! each other without a cycle at construction time.
//!
//! With an [`Orchestrator`] attached, triage also gets a `swarm` capability
//! that sends multi-role work through plan → dispatch → merge.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use super::agent::{
    AgentDefinition, Capability, CapabilityOutput, ContextVariables, FunctionResult, Instructions,
};
use crate::artifacts::sanitize_session_id;
use crate::orchestrator::Orchestrator;
use crate::tools::codegen::{truncate_output, DISPLAY_LIMIT};
use crate::tools::CodeGenerator;

pub const TRIAGE: &str = "triage";
pub const CODER: &str = "coder";
pub const SEARCHER: &str = "searcher";

pub const RUN_CODE_TASK: &str = "run_code_task";
pub const SWARM: &str = "swarm";

/// Arguments shared by every handoff capability
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct HandoffArgs {
    /// Description of the work being handed over, or a summary of the work done
    #[serde(default)]
    pub task: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CodeTaskArgs {
    /// Detailed description of the change: files involved, the problem, the expected result
    pub task: String,
    /// Project directory, relative to the workspace or absolute. Defaults to the workspace.
    #[serde(default)]
    pub working_dir: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SwarmTaskArgs {
    /// The task to delegate to the agent swarm. Be specific and detailed.
    pub task: String,
}

/// Builds the triage, coder and searcher agents
#[derive(Clone)]
pub struct AgentFactory {
    code_generator: Arc<dyn CodeGenerator>,
    workspace: PathBuf,
    code_timeout: Duration,
    triage_tools: Vec<Capability>,
    search_tools: Vec<Capability>,
    base_prompt: Option<String>,
    orchestrator: Option<Arc<Orchestrator>>,
}

impl AgentFactory {
    pub fn new(code_generator: Arc<dyn CodeGenerator>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            code_generator,
            workspace: workspace.into(),
            code_timeout: Duration::from_secs(600),
            triage_tools: Vec::new(),
            search_tools: Vec::new(),
            base_prompt: None,
            orchestrator: None,
        }
    }

    pub fn with_code_timeout(mut self, timeout: Duration) -> Self {
        self.code_timeout = timeout;
        self
    }

    /// Tools triage may use directly for simple requests
    pub fn with_triage_tools(mut self, tools: impl IntoIterator<Item = Capability>) -> Self {
        self.triage_tools.extend(tools);
        self
    }

    pub fn with_search_tools(mut self, tools: impl IntoIterator<Item = Capability>) -> Self {
        self.search_tools.extend(tools);
        self
    }

    /// Text placed ahead of the triage instructions
    pub fn with_base_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.base_prompt = Some(prompt.into());
        self
    }

    /// Give triage the `swarm` capability backed by `orchestrator`
    pub fn with_orchestrator(mut self, orchestrator: Arc<Orchestrator>) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    /// Agent registered under `name`, for resuming a persisted conversation
    pub fn by_name(&self, name: &str) -> Option<Arc<AgentDefinition>> {
        match name {
            TRIAGE => Some(self.triage()),
            CODER => Some(self.coder()),
            SEARCHER => Some(self.searcher()),
            _ => None,
        }
    }

    pub fn triage(&self) -> Arc<AgentDefinition> {
        let base = self.base_prompt.clone();
        let to_coder = self.clone();
        let to_searcher = self.clone();
        AgentDefinition::new(TRIAGE)
            .with_instructions(Instructions::templated(move |ctx| {
                triage_instructions(ctx, base.as_deref())
            }))
            .with_capabilities(self.triage_tools.clone())
            .with_capabilities(self.swarm_capability())
            .with_capability(handoff(
                "handoff_to_coder",
                "Hand the conversation to the coder agent. Use for code changes, bug fixes and new features.",
                |task| announce("Transferring to the coder agent.", task),
                move || to_coder.coder(),
            ))
            .with_capability(handoff(
                "handoff_to_searcher",
                "Hand the conversation to the searcher agent. Use for web searches and research.",
                |task| announce("Transferring to the searcher agent.", task),
                move || to_searcher.searcher(),
            ))
            .into_shared()
    }

    pub fn coder(&self) -> Arc<AgentDefinition> {
        AgentDefinition::new(CODER)
            .with_instructions(CODER_INSTRUCTIONS)
            .with_capability(self.code_task_capability())
            .with_capability(self.back_to_triage())
            .into_shared()
    }

    pub fn searcher(&self) -> Arc<AgentDefinition> {
        AgentDefinition::new(SEARCHER)
            .with_instructions(SEARCHER_INSTRUCTIONS)
            .with_capabilities(self.search_tools.clone())
            .with_capability(self.back_to_triage())
            .into_shared()
    }

    fn back_to_triage(&self) -> Capability {
        let factory = self.clone();
        handoff(
            "handoff_to_triage",
            "Return control to the triage agent once the current task is finished.",
            |task| announce("Task complete, returning to triage.", task),
            move || factory.triage(),
        )
    }

    fn swarm_capability(&self) -> Option<Capability> {
        let orchestrator = Arc::clone(self.orchestrator.as_ref()?);
        Some(Capability::typed(
            SWARM,
            "Delegate a complex task to the agent swarm. Specialists (researcher, coder, qa, writer) \
             collaborate on it. Use for work that benefits from several specialists, e.g. \
             'research X then implement Y then test it'.",
            move |args: SwarmTaskArgs, ctx: ContextVariables| {
                let orchestrator = Arc::clone(&orchestrator);
                let session_id = swarm_session_id(&ctx);
                async move {
                    tracing::info!(session_id = %session_id, "delegating to the orchestrator");
                    let text = match orchestrator.handle(&args.task, Some(&session_id)).await {
                        Ok(report) => report,
                        Err(e) => format!("Error: {}", e),
                    };
                    Ok(CapabilityOutput::Text(text))
                }
            },
        ))
    }

    fn code_task_capability(&self) -> Capability {
        let generator = Arc::clone(&self.code_generator);
        let workspace = self.workspace.clone();
        let timeout = self.code_timeout;
        Capability::typed(
            RUN_CODE_TASK,
            "Run a coding task with the external code generator inside a project directory.",
            move |args: CodeTaskArgs, _ctx: ContextVariables| {
                let generator = Arc::clone(&generator);
                let CodeTaskArgs { task, working_dir } = args;
                let dir = match working_dir {
                    Some(dir) if !dir.trim().is_empty() => workspace.join(dir.trim()),
                    _ => workspace.clone(),
                };
                async move {
                    tracing::info!(dir = %dir.display(), "coder running code task");
                    let text = match generator.execute(&task, &dir, timeout).await {
                        Ok(output) => output.render(),
                        Err(e) => format!("Error: {}", e),
                    };
                    Ok(CapabilityOutput::Text(truncate_output(&text, DISPLAY_LIMIT)))
                }
            },
        )
    }
}

fn announce(prefix: &str, task: Option<&str>) -> String {
    match task.map(str::trim).filter(|t| !t.is_empty()) {
        Some(task) => format!("{} Task: {}", prefix, task),
        None => prefix.to_string(),
    }
}

fn handoff<M, T>(name: &str, description: &str, message: M, target: T) -> Capability
where
    M: Fn(Option<&str>) -> String + Send + Sync + 'static,
    T: Fn() -> Arc<AgentDefinition> + Send + Sync + 'static,
{
    Capability::typed(name, description, move |args: HandoffArgs, _ctx: ContextVariables| {
        let result = FunctionResult::new(message(args.task.as_deref())).with_agent(target());
        async move { Ok(CapabilityOutput::Result(result)) }
    })
}

/// `<channel>_<chat_id>`, safe to use as a directory name
fn swarm_session_id(ctx: &ContextVariables) -> String {
    let channel = ctx.get("channel").and_then(Value::as_str).unwrap_or("cli");
    let chat_id = ctx.get("chat_id").and_then(Value::as_str).unwrap_or("direct");
    sanitize_session_id(&format!("{}_{}", channel, chat_id))
}

fn context_str<'a>(ctx: &'a ContextVariables, key: &str) -> &'a str {
    ctx.get(key).and_then(Value::as_str).unwrap_or("unknown")
}

fn triage_instructions(ctx: &ContextVariables, base: Option<&str>) -> String {
    let body = format!(
        r#"# Triage Agent

You are the coordinator. Every user message reaches you first.

## Responsibilities
1. Understand what the user wants
2. Handle simple requests (conversation, status questions, reading files) yourself
3. Hand coding work (bug fixes, new code, refactoring) to the coder with handoff_to_coder
4. Hand searches and research to the searcher with handoff_to_searcher
5. If a swarm tool is available, use it for requests that need several specialists in sequence

## Current Context
- Source: {channel}:{chat_id}

## Notes
- Do simple things yourself and delegate anything substantial
- When the user names a project directory together with a coding task, always hand off to the coder"#,
        channel = context_str(ctx, "channel"),
        chat_id = context_str(ctx, "chat_id"),
    );
    match base.filter(|b| !b.trim().is_empty()) {
        Some(base) => format!("{}\n\n---\n\n{}", base.trim_end(), body),
        None => body,
    }
}

const CODER_INSTRUCTIONS: &str = r#"# Coder Agent

You are the coding specialist.

## Responsibilities
1. Use run_code_task to carry out coding work. The code generator explores the project, edits files and runs git on its own.
2. When the task is done, call handoff_to_triage with a short summary.

## run_code_task
- task: a detailed description including affected files, the problem and the expected result
- working_dir: the project directory

If the code generator reports an error, analyze it and retry when that makes sense."#;

const SEARCHER_INSTRUCTIONS: &str = r#"# Searcher Agent

You are the research specialist.

## Responsibilities
1. Use the search tools to find information
2. Fetch pages for detail where needed
3. Summarize the results, keeping only what matters
4. When done, call handoff_to_triage"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::{call, ScriptedProvider, Step};
    use crate::provider::{ChatMessage, ChatResponse};
    use crate::swarm::runtime::{RunOutcome, Swarm, DEFAULT_MAX_TURNS};
    use crate::tools::codegen::testing::FakeCodeGenerator;
    use serde_json::json;

    use crate::artifacts::ArtifactStore;
    use crate::orchestrator::{
        ResultMerger, TaskExecutionResult, TaskPlanner, TaskRunner, TaskStatus, WaveDispatcher,
    };
    use crate::roles::{RoleCatalog, RoleSpec};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingRunner {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TaskRunner for CountingRunner {
        async fn run_task(
            &self,
            role: &RoleSpec,
            task_id: &str,
            task: &str,
            store: &ArtifactStore,
        ) -> anyhow::Result<TaskExecutionResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let output = format!("{} finished {}", role.name, task_id);
            store.write(&role.name, task_id, &output).await?;
            let mut result = TaskExecutionResult::rejected(&role.name, task_id, task, output);
            result.status = TaskStatus::Ok;
            Ok(result)
        }
    }

    fn factory(generator: Arc<FakeCodeGenerator>) -> AgentFactory {
        AgentFactory::new(generator, "/tmp")
    }

    #[test]
    fn test_triage_instructions_use_context() {
        let triage = factory(Arc::new(FakeCodeGenerator::replying("", "", 0))).triage();
        let mut ctx = ContextVariables::new();
        ctx.insert("channel".into(), json!("telegram"));
        ctx.insert("chat_id".into(), json!("42"));

        assert!(triage.instructions.resolve(&ctx).contains("Source: telegram:42"));
        assert!(triage
            .instructions
            .resolve(&ContextVariables::new())
            .contains("Source: unknown:unknown"));
    }

    #[test]
    fn test_base_prompt_comes_first() {
        let triage = factory(Arc::new(FakeCodeGenerator::replying("", "", 0)))
            .with_base_prompt("You are hive.")
            .triage();
        let text = triage.instructions.resolve(&ContextVariables::new());
        assert!(text.starts_with("You are hive.\n\n---\n\n# Triage Agent"));
    }

    #[test]
    fn test_by_name() {
        let f = factory(Arc::new(FakeCodeGenerator::replying("", "", 0)));
        for name in [TRIAGE, CODER, SEARCHER] {
            assert_eq!(f.by_name(name).unwrap().name, name);
        }
        assert!(f.by_name("janitor").is_none());
    }

    #[tokio::test]
    async fn test_handoff_carries_task() {
        let triage = factory(Arc::new(FakeCodeGenerator::replying("", "", 0))).triage();
        let capability = triage.capability("handoff_to_coder").unwrap();

        let output = capability
            .invoke(json!({"task": "fix the parser"}), &ContextVariables::new())
            .await
            .unwrap();
        let result = FunctionResult::from(output);

        assert_eq!(result.agent.as_ref().unwrap().name, CODER);
        assert!(result.value.ends_with("Task: fix the parser"));

        let schema = capability.schema();
        assert!(schema.parameters["properties"].get("task").is_some());
    }

    #[tokio::test]
    async fn test_code_task_output_is_truncated() {
        let long = "x".repeat(DISPLAY_LIMIT + 10);
        let generator = Arc::new(FakeCodeGenerator::replying(&long, "", 0));
        let coder = factory(generator.clone()).coder();

        let output = coder
            .capability(RUN_CODE_TASK)
            .unwrap()
            .invoke(json!({"task": "refactor"}), &ContextVariables::new())
            .await
            .unwrap();
        let text = FunctionResult::from(output).value;

        assert!(text.ends_with(&format!("(truncated, {} characters total)", DISPLAY_LIMIT + 10)));
        assert_eq!(generator.prompts.lock().unwrap()[0], "refactor");
    }

    #[tokio::test]
    async fn test_round_trip_through_coder() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Step::Respond(ChatResponse::tools(vec![call(
                "c1",
                "handoff_to_coder",
                json!({"task": "add a flag"}),
            )])),
            Step::Respond(ChatResponse::tools(vec![call(
                "c2",
                RUN_CODE_TASK,
                json!({"task": "add a --verbose flag"}),
            )])),
            Step::Respond(ChatResponse::tools(vec![call(
                "c3",
                "handoff_to_triage",
                json!({"task": "flag added"}),
            )])),
            Step::Respond(ChatResponse::text("Done: the --verbose flag is in.")),
        ]));
        let generator = Arc::new(FakeCodeGenerator::replying(r#"{"result": "edited main.rs"}"#, "", 0));
        let swarm = Swarm::new(provider.clone());

        let response = swarm
            .run(
                factory(generator).triage(),
                vec![ChatMessage::user("please add a verbose flag")],
                ContextVariables::new(),
                DEFAULT_MAX_TURNS,
            )
            .await;

        assert_eq!(response.outcome, RunOutcome::Completed);
        assert_eq!(response.agent.name, TRIAGE);
        assert_eq!(response.last_reply(), Some("Done: the --verbose flag is in."));
        let requests = provider.requests();
        assert!(requests[1].messages[0].content.starts_with("# Coder Agent"));
        assert_eq!(requests[2].messages.last().unwrap().content, "edited main.rs");
        assert!(requests[3].messages[0].content.starts_with("# Triage Agent"));
    }

    #[test]
    fn test_swarm_capability_only_with_orchestrator() {
        let f = factory(Arc::new(FakeCodeGenerator::replying("", "", 0)));
        assert!(f.triage().capability(SWARM).is_none());
    }

    #[test]
    fn test_swarm_session_id_from_context() {
        let mut ctx = ContextVariables::new();
        assert_eq!(swarm_session_id(&ctx), "cli_direct");

        ctx.insert("channel".into(), json!("telegram"));
        ctx.insert("chat_id".into(), json!("-100:42"));
        assert_eq!(swarm_session_id(&ctx), "telegram_-100_42");
    }

    #[tokio::test]
    async fn test_triage_delegates_to_orchestrator() {
        // one provider serves the conversation and the planner
        let provider = Arc::new(ScriptedProvider::new(vec![
            Step::Respond(ChatResponse::tools(vec![call(
                "c1",
                SWARM,
                json!({"task": "research rust async runtimes"}),
            )])),
            Step::Respond(ChatResponse::text(
                r#"{"t1": {"role": "researcher", "task": "survey runtimes", "depends": []}}"#,
            )),
            Step::Respond(ChatResponse::text("Here is the survey.")),
        ]));
        let runner = Arc::new(CountingRunner::default());
        let catalog = Arc::new(RoleCatalog::builtin());
        let orchestrator = Orchestrator::new(
            TaskPlanner::new(provider.clone()),
            WaveDispatcher::new(runner.clone(), Arc::clone(&catalog)),
            ResultMerger::new(provider.clone()),
            catalog,
        );
        let triage = factory(Arc::new(FakeCodeGenerator::replying("", "", 0)))
            .with_orchestrator(Arc::new(orchestrator))
            .triage();

        let mut ctx = ContextVariables::new();
        ctx.insert("channel".into(), json!("cli"));
        ctx.insert("chat_id".into(), json!("local"));
        let response = Swarm::new(provider.clone())
            .run(
                triage,
                vec![ChatMessage::user("research rust async runtimes")],
                ctx,
                DEFAULT_MAX_TURNS,
            )
            .await;

        assert_eq!(response.outcome, RunOutcome::Completed);
        assert_eq!(response.last_reply(), Some("Here is the survey."));
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
        // conversation, planner, conversation; the single task skips the merger
        assert_eq!(provider.call_count(), 3);
        let requests = provider.requests();
        assert_eq!(
            requests[2].messages.last().unwrap().content,
            "researcher finished t1"
        );
    }
}
