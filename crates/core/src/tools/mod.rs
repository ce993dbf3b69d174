//! # Tools
//!
//! Capabilities that roles can be granted by name, plus the external code
//! generator used by delegate-mode roles.
//!
//! ## Modules
//!
//! - `file` - Sandboxed workspace file access
//! - `codegen` - External coding process with a hard deadline

pub mod codegen;
pub mod file;

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::swarm::agent::Capability;

pub use codegen::{
    CliCodeGenerator, CodeGenCommand, CodeGenError, CodeGenOutput, CodeGenerator,
};
pub use file::file_tools;

/// Shared name → capability registry that role tool lists resolve against
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: BTreeMap<String, Capability>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog holding the built-in file tools for `workspace`
    pub fn with_file_tools(workspace: impl Into<PathBuf>) -> Self {
        let mut catalog = Self::new();
        for tool in file_tools(workspace) {
            catalog.register(tool);
        }
        catalog
    }

    /// Add or replace a capability
    pub fn register(&mut self, capability: Capability) {
        self.tools.insert(capability.name.clone(), capability);
    }

    pub fn get(&self, name: &str) -> Option<&Capability> {
        self.tools.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Capabilities for a role's tool list, in the role's order. Unknown
    /// names are skipped with a warning.
    pub fn resolve(&self, names: &[String]) -> Vec<Capability> {
        names
            .iter()
            .filter_map(|name| {
                let found = self.tools.get(name).cloned();
                if found.is_none() {
                    tracing::warn!(tool = %name, "role references unknown tool");
                }
                found
            })
            .collect()
    }
}
