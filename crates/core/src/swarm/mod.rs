//! # Swarm Conversations
//!
//! A lightweight conversation runtime where agents call capabilities and
//! pass control to one another through handoffs.
//!
//! ## Flow
//!
//! ```text
//! user → triage ⟶ coder (run_code_task) ⟶ triage
//!            └──⟶ searcher ⟶ triage
//! ```

pub mod agent;
pub mod agents;
pub mod events;
pub mod runtime;

pub use agent::{
    AgentDefinition, Capability, CapabilityHandler, CapabilityOutput, ContextVariables,
    FunctionResult, Instructions,
};
pub use agents::{AgentFactory, CODER, SEARCHER, SWARM, TRIAGE};
pub use events::{EventSender, SwarmEvent, SwarmEventKind};
pub use runtime::{RunOutcome, Swarm, SwarmResponse, DEFAULT_MAX_TURNS};
