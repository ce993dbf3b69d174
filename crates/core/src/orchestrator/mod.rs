//! # Orchestrator
//!
//! Plan, dispatch, merge.
//!
//! ```text
//! request → TaskPlanner → TaskGraph → WaveDispatcher ⟶ AgentExecutor (per task)
//!                                           │
//!                                    ArtifactStore (briefings)
//!                                           │
//!                                     ResultMerger → report
//! ```

pub mod dispatcher;
pub mod executor;
pub mod merger;
pub mod pipeline;
pub mod planner;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use serde_json::json;

use crate::artifacts::{new_session_id, ArtifactStore};
use crate::config::HiveConfig;
use crate::provider::ModelProvider;
use crate::roles::RoleCatalog;
use crate::swarm::events::{emit, EventSender, SwarmEvent, SwarmEventKind};
use crate::tools::{CodeGenerator, ToolCatalog};

pub use dispatcher::{DispatchReport, TaskRunner, WaveDispatcher};
pub use executor::{AgentExecutor, ExecutionError, ExecutorConfig, TaskExecutionResult, TaskStatus};
pub use merger::{ResultMerger, MERGE_FAILURE};
pub use pipeline::{Pipeline, PipelineStage};
pub use planner::{parse_task_graph, TaskGraph, TaskPlanner, TaskSpec};

/// Reply when the planner produced no tasks
pub const COULD_NOT_DECOMPOSE: &str =
    "I couldn't break this request into actionable tasks. Please try rephrasing.";

const AGENT: &str = "orchestrator";

/// Everything one orchestrated request produced
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: String,
    pub report: String,
    pub graph: TaskGraph,
    pub dispatch: DispatchReport,
    pub stage: PipelineStage,
    /// Why the session stopped early, if it did
    pub failure: Option<String>,
}

pub struct Orchestrator {
    planner: TaskPlanner,
    dispatcher: WaveDispatcher,
    merger: ResultMerger,
    catalog: Arc<RoleCatalog>,
    events: EventSender,
    sessions_dir: Option<PathBuf>,
}

impl Orchestrator {
    pub fn new(
        planner: TaskPlanner,
        dispatcher: WaveDispatcher,
        merger: ResultMerger,
        catalog: Arc<RoleCatalog>,
    ) -> Self {
        Self {
            planner,
            dispatcher,
            merger,
            catalog,
            events: None,
            sessions_dir: None,
        }
    }

    /// Wire planner, executor, dispatcher and merger from configuration
    pub fn from_config(
        config: &HiveConfig,
        provider: Arc<dyn ModelProvider>,
        code_generator: Arc<dyn CodeGenerator>,
        tools: ToolCatalog,
        catalog: Arc<RoleCatalog>,
    ) -> Self {
        let planner_model = config.planner_model.clone().or_else(|| config.model.clone());
        let planner = TaskPlanner::new(Arc::clone(&provider))
            .with_model(planner_model.clone())
            .with_max_tokens(config.max_tokens)
            .with_timeout(config.model_timeout());
        let merger = ResultMerger::new(Arc::clone(&provider))
            .with_model(planner_model)
            .with_max_tokens(config.max_tokens)
            .with_timeout(config.model_timeout());
        let executor = AgentExecutor::new(
            provider,
            code_generator,
            tools,
            ExecutorConfig {
                default_model: config.model.clone(),
                call_timeout: config.model_timeout(),
                delegate_timeout: config.delegate_timeout(),
                working_dir: config.workspace_dir(),
                max_tokens: config.max_tokens,
                temperature: config.temperature,
            },
        );
        let dispatcher = WaveDispatcher::new(Arc::new(executor), Arc::clone(&catalog));

        let orchestrator = Self::new(planner, dispatcher, merger, catalog);
        match config.sessions_dir() {
            Some(dir) => orchestrator.with_sessions_dir(dir),
            None => orchestrator,
        }
    }

    /// Persist session artifacts under `dir/<session_id>/`
    pub fn with_sessions_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.sessions_dir = Some(dir.into());
        self
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.dispatcher = self.dispatcher.with_events(events.clone());
        self.events = events;
        self
    }

    pub fn catalog(&self) -> &RoleCatalog {
        &self.catalog
    }

    /// Handle one request end to end. Only store setup can fail; planning,
    /// task and merge failures all end up in the report text.
    #[tracing::instrument(skip_all, fields(session_id = tracing::field::Empty))]
    pub async fn run(&self, request: &str, session_id: Option<&str>) -> Result<SessionReport> {
        let session_id = session_id.map(str::to_string).unwrap_or_else(new_session_id);
        tracing::Span::current().record("session_id", session_id.as_str());

        let store = Arc::new(match &self.sessions_dir {
            Some(dir) => ArtifactStore::open(dir, &session_id).await?,
            None => ArtifactStore::in_memory(&session_id),
        });
        let session_id = store.session_id().to_string();
        let mut pipeline = Pipeline::new();

        emit(
            &self.events,
            SwarmEvent::new(SwarmEventKind::SessionStarted, AGENT)
                .with_data(json!({ "session_id": session_id, "request": request })),
        )
        .await;

        let graph = self.planner.plan(request, &self.catalog).await;
        if graph.is_empty() {
            pipeline.fail("planner produced no tasks");
            emit(&self.events, SwarmEvent::new(SwarmEventKind::PlanningFailed, AGENT)).await;
            return Ok(SessionReport {
                session_id,
                report: COULD_NOT_DECOMPOSE.to_string(),
                graph,
                dispatch: DispatchReport::default(),
                stage: pipeline.stage,
                failure: pipeline.failure,
            });
        }

        if let Err(e) = store.write_task_graph(&graph).await {
            tracing::warn!(error = %e, "failed to persist task graph");
        }
        emit(
            &self.events,
            SwarmEvent::new(SwarmEventKind::PlanReady, AGENT).with_data(json!({ "graph": graph })),
        )
        .await;
        pipeline.advance();

        let dispatch = self.dispatcher.dispatch(&graph, Arc::clone(&store)).await;
        pipeline.advance();

        emit(&self.events, SwarmEvent::new(SwarmEventKind::MergeStarted, AGENT)).await;
        let report = self.merger.merge(request, &graph, &dispatch.results).await;
        if let Err(e) = store.write_final_report(&report).await {
            tracing::warn!(error = %e, "failed to persist final report");
        }
        pipeline.advance();

        tracing::info!(
            tasks = graph.len(),
            failed = dispatch.failed_count(),
            blocked = dispatch.blocked.len(),
            "session complete"
        );
        emit(
            &self.events,
            SwarmEvent::new(SwarmEventKind::SessionCompleted, AGENT).with_data(json!({
                "session_id": session_id,
                "failed": dispatch.failed_count(),
                "blocked": dispatch.blocked.len(),
            })),
        )
        .await;

        Ok(SessionReport {
            session_id,
            report,
            graph,
            dispatch,
            stage: pipeline.stage,
            failure: pipeline.failure,
        })
    }

    /// Report text only
    pub async fn handle(&self, request: &str, session_id: Option<&str>) -> Result<String> {
        Ok(self.run(request, session_id).await?.report)
    }
}
