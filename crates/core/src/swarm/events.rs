//! # Swarm Events
//!
//! Progress events emitted by the orchestrator, dispatcher and conversation
//! runtime. Consumers receive them over an optional `mpsc` channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Kind of swarm event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SwarmEventKind {
    /// Orchestration session started
    SessionStarted,
    /// Planner produced a task graph
    PlanReady,
    /// Planner produced nothing usable
    PlanningFailed,
    /// A dispatch wave is about to launch (data lists the task ids)
    WaveStarted,
    /// A task was handed to the executor
    TaskStarted,
    /// Task finished with status ok
    TaskCompleted,
    /// Task finished with status error or timeout
    TaskFailed,
    /// No task is ready while some remain pending
    Deadlock,
    /// Result merge started
    MergeStarted,
    /// Final report produced
    SessionCompleted,
    /// Conversation control moved to another agent
    Handoff,
}

/// An event in the swarm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmEvent {
    /// Unique event ID
    pub id: String,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
    /// Kind of event
    pub kind: SwarmEventKind,
    /// Agent or role that produced this event
    pub agent: String,
    /// Associated data (JSON)
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    /// Related task id if applicable
    #[serde(default)]
    pub task_id: Option<String>,
}

impl SwarmEvent {
    /// Create a new event
    pub fn new(kind: SwarmEventKind, agent: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
            agent: agent.to_string(),
            data: None,
            task_id: None,
        }
    }

    /// Add data to the event
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Add task ID to the event
    pub fn with_task(mut self, task_id: &str) -> Self {
        self.task_id = Some(task_id.to_string());
        self
    }
}

/// Optional event sink shared by the orchestration components
pub type EventSender = Option<mpsc::Sender<SwarmEvent>>;

/// Send an event if a listener is attached. A closed channel drops the event.
pub(crate) async fn emit(tx: &EventSender, event: SwarmEvent) {
    if let Some(tx) = tx {
        if let Err(e) = tx.send(event).await {
            tracing::trace!(kind = ?e.0.kind, "event listener gone, dropping event");
        }
    }
}
