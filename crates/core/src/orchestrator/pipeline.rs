//! # Pipeline Stages
//!
//! Where an orchestrated session currently stands.

use serde::{Deserialize, Serialize};

/// Stage of one orchestrated request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Decomposing the request into a task graph
    Planning,
    /// Running the graph wave by wave
    Dispatching,
    /// Folding results into the final report
    Merging,
    Complete,
    Failed,
}

/// The pipeline state machine
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub stage: PipelineStage,
    /// Why the pipeline failed, if it did
    pub failure: Option<String>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            stage: PipelineStage::Planning,
            failure: None,
        }
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance to the next stage. Terminal stages stay put.
    pub fn advance(&mut self) {
        self.stage = match self.stage {
            PipelineStage::Planning => PipelineStage::Dispatching,
            PipelineStage::Dispatching => PipelineStage::Merging,
            PipelineStage::Merging => PipelineStage::Complete,
            PipelineStage::Complete => PipelineStage::Complete,
            PipelineStage::Failed => PipelineStage::Failed,
        };
        tracing::debug!(stage = ?self.stage, "pipeline advanced");
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!(from = ?self.stage, reason = %reason, "pipeline failed");
        self.stage = PipelineStage::Failed;
        self.failure = Some(reason);
    }
}
