//! # Hive Core
//!
//! Multi-agent orchestration: a conversation runtime with handoffs and a
//! plan → dispatch → merge pipeline for multi-role requests.
//!
//! ## Architecture
//!
//! - `swarm/` - Conversation runtime, capabilities and the built-in agents
//! - `orchestrator/` - Task planner, wave dispatcher, agent executor, result merger
//! - `roles/` - Role catalog (built-in or loaded from YAML)
//! - `artifacts` - Per-session artifact store and briefings
//! - `tools/` - File tools and the external code generator
//! - `provider/` - Chat model abstraction and the HTTP client
//! - `config` / `models` - Runtime configuration and provider selection
//!
//! ## Usage
//!
//! ```rust,ignore
//! use hive_core::config::HiveConfig;
//! use hive_core::orchestrator::Orchestrator;
//!
//! let orchestrator = Orchestrator::from_config(&config, provider, codegen, tools, catalog);
//! let report = orchestrator.handle("Research X, then implement Y", None).await?;
//! ```

pub mod artifacts;
pub mod config;
pub mod models;
pub mod orchestrator;
pub mod provider;
pub mod roles;
pub mod swarm;
pub mod tools;
