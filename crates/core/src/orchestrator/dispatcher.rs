//! # Wave Dispatcher
//!
//! Executes a task graph wave by wave. Each wave is every pending task whose
//! dependencies have all completed; its tasks run concurrently and the whole
//! wave settles before readiness is recomputed, so tasks in one wave never
//! see each other's output.
//!
//! When nothing is ready but tasks remain, the graph is cyclic or depends on
//! ids that do not exist. Dispatch stops there and the partial results are
//! returned together with the blocked ids and their unmet dependencies.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;

use super::executor::{TaskExecutionResult, TaskStatus};
use super::planner::TaskGraph;
use crate::artifacts::ArtifactStore;
use crate::roles::{RoleCatalog, RoleSpec};
use crate::swarm::events::{emit, EventSender, SwarmEvent, SwarmEventKind};

const AGENT: &str = "dispatcher";

/// Executes a single task. Returning `Err` is treated like any other task
/// failure: it becomes an error result for that task only.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run_task(
        &self,
        role: &RoleSpec,
        task_id: &str,
        task: &str,
        store: &ArtifactStore,
    ) -> anyhow::Result<TaskExecutionResult>;
}

/// Everything a dispatch produced
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    /// One result per task that ran or was rejected
    pub results: BTreeMap<String, TaskExecutionResult>,
    /// Task ids per executed wave, in order
    pub waves: Vec<Vec<String>>,
    /// Unresolved task ids mapped to the dependencies they were waiting on
    pub blocked: BTreeMap<String, Vec<String>>,
}

impl DispatchReport {
    pub fn is_deadlocked(&self) -> bool {
        !self.blocked.is_empty()
    }

    pub fn failed_count(&self) -> usize {
        self.results.values().filter(|r| !r.status.is_ok()).count()
    }
}

pub struct WaveDispatcher {
    runner: Arc<dyn TaskRunner>,
    catalog: Arc<RoleCatalog>,
    events: EventSender,
}

impl WaveDispatcher {
    pub fn new(runner: Arc<dyn TaskRunner>, catalog: Arc<RoleCatalog>) -> Self {
        Self {
            runner,
            catalog,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = events;
        self
    }

    #[tracing::instrument(skip_all, fields(session_id = %store.session_id(), tasks = graph.len()))]
    pub async fn dispatch(&self, graph: &TaskGraph, store: Arc<ArtifactStore>) -> DispatchReport {
        let mut report = DispatchReport::default();
        let mut pending: BTreeSet<String> = graph.keys().cloned().collect();

        while !pending.is_empty() {
            let ready: Vec<String> = pending
                .iter()
                .filter(|id| {
                    graph[id.as_str()]
                        .depends
                        .iter()
                        .all(|dep| report.results.contains_key(dep))
                })
                .cloned()
                .collect();

            if ready.is_empty() {
                report.blocked = pending
                    .iter()
                    .map(|id| {
                        let unmet = graph[id.as_str()]
                            .depends
                            .iter()
                            .filter(|dep| !report.results.contains_key(*dep))
                            .cloned()
                            .collect();
                        (id.clone(), unmet)
                    })
                    .collect();
                tracing::error!(blocked = ?report.blocked, "deadlock in task graph");
                emit(
                    &self.events,
                    SwarmEvent::new(SwarmEventKind::Deadlock, AGENT)
                        .with_data(json!({ "blocked": report.blocked })),
                )
                .await;
                break;
            }

            for id in &ready {
                pending.remove(id);
            }
            tracing::info!(wave = report.waves.len() + 1, tasks = ?ready, "launching wave");
            emit(
                &self.events,
                SwarmEvent::new(SwarmEventKind::WaveStarted, AGENT)
                    .with_data(json!({ "wave": report.waves.len() + 1, "tasks": ready })),
            )
            .await;

            // FAN-OUT
            let mut handles = Vec::new();
            for id in &ready {
                let spec = &graph[id.as_str()];
                let Some(role) = self.catalog.get(&spec.role) else {
                    tracing::warn!(task_id = %id, role = %spec.role, "unknown role, skipping");
                    let result = TaskExecutionResult::rejected(
                        &spec.role,
                        id,
                        &spec.task,
                        format!("Error: Unknown role '{}'", spec.role),
                    );
                    self.emit_result(&result).await;
                    report.results.insert(id.clone(), result);
                    continue;
                };

                emit(
                    &self.events,
                    SwarmEvent::new(SwarmEventKind::TaskStarted, &role.name).with_task(id),
                )
                .await;

                let runner = Arc::clone(&self.runner);
                let store = Arc::clone(&store);
                let role = role.clone();
                let task_id = id.clone();
                let task = spec.task.clone();
                let started_at = Utc::now();
                let handle = tokio::spawn(async move {
                    runner.run_task(&role, &task_id, &task, &store).await
                });
                handles.push((id.clone(), started_at, handle));
            }

            // FAN-IN: the whole wave settles before readiness is recomputed
            for (id, started_at, handle) in handles {
                let spec = &graph[id.as_str()];
                let result = match handle.await {
                    Ok(Ok(result)) => result,
                    Ok(Err(e)) => {
                        tracing::error!(task_id = %id, error = %e, "task runner failed");
                        failed_result(&spec.role, &id, &spec.task, format!("Error: {:#}", e), started_at)
                    }
                    Err(e) => {
                        tracing::error!(task_id = %id, error = %e, "task aborted");
                        failed_result(&spec.role, &id, &spec.task, format!("Error: task aborted: {}", e), started_at)
                    }
                };
                self.emit_result(&result).await;
                report.results.insert(id, result);
            }

            report.waves.push(ready);
        }

        tracing::info!(
            waves = report.waves.len(),
            completed = report.results.len(),
            failed = report.failed_count(),
            blocked = report.blocked.len(),
            "dispatch finished"
        );
        report
    }

    async fn emit_result(&self, result: &TaskExecutionResult) {
        let kind = if result.status == TaskStatus::Ok {
            SwarmEventKind::TaskCompleted
        } else {
            SwarmEventKind::TaskFailed
        };
        emit(
            &self.events,
            SwarmEvent::new(kind, &result.role)
                .with_task(&result.task_id)
                .with_data(json!({
                    "status": result.status,
                    "duration_secs": result.duration_secs(),
                })),
        )
        .await;
    }
}

fn failed_result(
    role: &str,
    task_id: &str,
    task: &str,
    output: String,
    started_at: chrono::DateTime<Utc>,
) -> TaskExecutionResult {
    let mut result = TaskExecutionResult::rejected(role, task_id, task, output);
    result.started_at = started_at;
    result.duration = (result.finished_at - started_at).to_std().unwrap_or_default();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::planner::TaskSpec;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum Mark {
        Start(String),
        End(String),
    }

    #[derive(Default)]
    struct RecordingRunner {
        log: Mutex<Vec<Mark>>,
        delays_ms: HashMap<String, u64>,
        fail: Vec<String>,
        panic: Vec<String>,
    }

    impl RecordingRunner {
        fn position(&self, mark: &Mark) -> usize {
            self.log.lock().unwrap().iter().position(|m| m == mark).unwrap()
        }

        fn starts(&self, id: &str) -> usize {
            self.log
                .lock()
                .unwrap()
                .iter()
                .filter(|m| **m == Mark::Start(id.to_string()))
                .count()
        }
    }

    #[async_trait]
    impl TaskRunner for RecordingRunner {
        async fn run_task(
            &self,
            role: &RoleSpec,
            task_id: &str,
            task: &str,
            store: &ArtifactStore,
        ) -> anyhow::Result<TaskExecutionResult> {
            self.log.lock().unwrap().push(Mark::Start(task_id.to_string()));
            let delay = self.delays_ms.get(task_id).copied().unwrap_or(1);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            if self.panic.iter().any(|p| p == task_id) {
                panic!("runner blew up");
            }
            self.log.lock().unwrap().push(Mark::End(task_id.to_string()));
            if self.fail.iter().any(|f| f == task_id) {
                anyhow::bail!("executor exploded on {}", task_id);
            }
            let mut result = TaskExecutionResult::rejected(&role.name, task_id, task, format!("output of {}", task_id));
            result.status = TaskStatus::Ok;
            store.write(&role.name, task_id, &result.output).await?;
            Ok(result)
        }
    }

    fn catalog() -> Arc<RoleCatalog> {
        Arc::new(
            RoleCatalog::from_roles(["researcher", "coder", "a", "b"].map(|n| RoleSpec::new(n, n)))
                .unwrap(),
        )
    }

    fn graph(entries: &[(&str, &str, &[&str])]) -> TaskGraph {
        entries
            .iter()
            .map(|(id, role, deps)| {
                (
                    id.to_string(),
                    TaskSpec::new(*role, format!("do {}", id)).with_depends(deps.iter().copied()),
                )
            })
            .collect()
    }

    async fn run(runner: Arc<RecordingRunner>, graph: &TaskGraph) -> DispatchReport {
        WaveDispatcher::new(runner, catalog())
            .dispatch(graph, Arc::new(ArtifactStore::in_memory("test")))
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_step_chain_runs_in_two_waves() {
        let runner = Arc::new(RecordingRunner::default());
        let g = graph(&[("t1", "researcher", &[]), ("t2", "coder", &["t1"])]);

        let report = run(runner.clone(), &g).await;

        assert_eq!(report.waves, vec![vec!["t1".to_string()], vec!["t2".to_string()]]);
        assert!(runner.position(&Mark::Start("t2".into())) > runner.position(&Mark::End("t1".into())));
        assert!(report.results["t2"].started_at >= report.results["t1"].finished_at);
        assert!(!report.is_deadlocked());
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_task_runs_exactly_once_after_its_dependencies() {
        let runner = Arc::new(RecordingRunner {
            delays_ms: HashMap::from([("left".to_string(), 50), ("right".to_string(), 5)]),
            ..Default::default()
        });
        let g = graph(&[
            ("root", "researcher", &[]),
            ("left", "a", &["root"]),
            ("right", "b", &["root"]),
            ("join", "coder", &["left", "right"]),
            ("tail", "coder", &["right"]),
        ]);

        let report = run(runner.clone(), &g).await;

        let ids: Vec<_> = report.results.keys().cloned().collect();
        let expected: Vec<_> = g.keys().cloned().collect();
        assert_eq!(ids, expected);
        for id in g.keys() {
            assert_eq!(runner.starts(id), 1, "{} should start exactly once", id);
            for dep in &g[id].depends {
                assert!(
                    runner.position(&Mark::Start(id.clone())) > runner.position(&Mark::End(dep.clone())),
                    "{} started before {} finished",
                    id,
                    dep
                );
            }
        }

        // tail only needs right, but still waits for the slow left to settle
        assert!(runner.position(&Mark::Start("tail".into())) > runner.position(&Mark::End("left".into())));
        assert_eq!(report.waves.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_role_is_rejected_without_running() {
        let runner = Arc::new(RecordingRunner::default());
        let g = graph(&[("t1", "ghost", &[]), ("t2", "a", &[])]);

        let report = run(runner.clone(), &g).await;

        let ghost = &report.results["t1"];
        assert_eq!(ghost.status, TaskStatus::Error);
        assert!(ghost.output.contains("ghost"));
        assert_eq!(runner.starts("t1"), 0);
        assert_eq!(report.results["t2"].status, TaskStatus::Ok);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_halts_with_blocked_ids() {
        let runner = Arc::new(RecordingRunner::default());
        let g = graph(&[("t1", "a", &["t2"]), ("t2", "b", &["t1"])]);
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);

        let report = WaveDispatcher::new(runner.clone(), catalog())
            .with_events(Some(tx))
            .dispatch(&g, Arc::new(ArtifactStore::in_memory("test")))
            .await;

        assert!(report.results.is_empty());
        assert!(report.waves.is_empty());
        assert_eq!(report.blocked["t1"], vec!["t2".to_string()]);
        assert_eq!(report.blocked["t2"], vec!["t1".to_string()]);
        assert_eq!(rx.recv().await.unwrap().kind, SwarmEventKind::Deadlock);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_dependency_keeps_partial_results() {
        let runner = Arc::new(RecordingRunner::default());
        let g = graph(&[("t1", "a", &[]), ("t2", "b", &["t1", "t9"])]);

        let report = run(runner, &g).await;

        assert_eq!(report.results.len(), 1);
        assert_eq!(report.blocked["t2"], vec!["t9".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_runner_failure_is_contained() {
        let runner = Arc::new(RecordingRunner {
            fail: vec!["bad".to_string()],
            panic: vec!["worse".to_string()],
            ..Default::default()
        });
        let g = graph(&[
            ("bad", "a", &[]),
            ("worse", "a", &[]),
            ("good", "b", &[]),
            ("after", "coder", &["bad", "worse"]),
        ]);

        let report = run(runner, &g).await;

        assert_eq!(report.results.len(), 4);
        assert_eq!(report.results["bad"].status, TaskStatus::Error);
        assert!(report.results["bad"].output.contains("executor exploded"));
        assert_eq!(report.results["worse"].status, TaskStatus::Error);
        assert_eq!(report.results["good"].status, TaskStatus::Ok);
        assert_eq!(report.results["after"].status, TaskStatus::Ok);
        assert_eq!(report.failed_count(), 2);
    }
}
