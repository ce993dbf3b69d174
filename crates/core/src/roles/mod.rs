//! # Role Catalog
//!
//! Static role records: what a role may call, how many iterations it gets,
//! and whether it runs the in-process tool loop or delegates to the external
//! code generator.
//!
//! Roles come from the bundled defaults or from a directory of YAML files,
//! each pointing at a companion markdown prompt:
//!
//! ```yaml
//! name: researcher
//! display_name: Research Specialist
//! max_iterations: 15
//! tools:
//!   - file_read
//!   - list_dir
//! prompt: researcher.md
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default iteration budget for tool-loop roles
pub const DEFAULT_MAX_ITERATIONS: usize = 20;

pub const RESEARCHER_PROMPT: &str = include_str!("defaults/researcher.md");
pub const CODER_PROMPT: &str = include_str!("defaults/coder.md");
pub const QA_PROMPT: &str = include_str!("defaults/qa.md");
pub const WRITER_PROMPT: &str = include_str!("defaults/writer.md");

/// Errors loading a role catalog. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("roles directory not found: {0:?}")]
    MissingDirectory(PathBuf),
    #[error("invalid roles pattern: {0}")]
    Pattern(#[from] glob::PatternError),
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse role file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("duplicate role name '{0}'")]
    Duplicate(String),
}

/// One role definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleSpec {
    pub name: String,
    pub display_name: String,
    /// `None` inherits the run default
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Capability names resolved against the tool catalog
    #[serde(default)]
    pub tools: Vec<String>,
    /// Informational only; the planner decides actual sequencing
    #[serde(default)]
    pub can_delegate_to: Vec<String>,
    #[serde(default, rename = "prompt", skip_serializing_if = "Option::is_none")]
    pub prompt_file: Option<String>,
    /// Run through the external code generator instead of the tool loop
    #[serde(default, alias = "use_claude_code")]
    pub delegate: bool,
    #[serde(skip)]
    pub system_prompt: String,
}

fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}

impl RoleSpec {
    pub fn new(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            model: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tools: Vec::new(),
            can_delegate_to: Vec::new(),
            prompt_file: None,
            delegate: false,
            system_prompt: String::new(),
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn delegated(mut self) -> Self {
        self.delegate = true;
        self
    }
}

/// Shape of a role YAML file. Missing names fall back to the file stem.
#[derive(Debug, Deserialize)]
struct RoleFile {
    name: Option<String>,
    display_name: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default = "default_max_iterations")]
    max_iterations: usize,
    #[serde(default)]
    tools: Vec<String>,
    #[serde(default)]
    can_delegate_to: Vec<String>,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default, alias = "use_claude_code")]
    delegate: bool,
}

/// Read-only set of roles keyed by name
#[derive(Debug, Clone, Default)]
pub struct RoleCatalog {
    roles: BTreeMap<String, RoleSpec>,
}

impl RoleCatalog {
    /// Build from explicit records. Duplicate names are rejected.
    pub fn from_roles(roles: impl IntoIterator<Item = RoleSpec>) -> Result<Self, CatalogError> {
        let mut map = BTreeMap::new();
        for role in roles {
            if map.contains_key(&role.name) {
                return Err(CatalogError::Duplicate(role.name));
            }
            map.insert(role.name.clone(), role);
        }
        Ok(Self { roles: map })
    }

    /// The four bundled roles
    pub fn builtin() -> Self {
        let read_tools = ["file_read", "list_dir"];
        let roles = [
            RoleSpec::new("researcher", "Research Specialist")
                .with_tools(read_tools)
                .with_max_iterations(15)
                .with_prompt(RESEARCHER_PROMPT),
            RoleSpec::new("coder", "Implementation Specialist")
                .delegated()
                .with_prompt(CODER_PROMPT),
            RoleSpec::new("qa", "Quality Reviewer")
                .with_tools(read_tools)
                .with_prompt(QA_PROMPT),
            RoleSpec::new("writer", "Technical Writer")
                .with_tools(["file_read", "file_write", "list_dir"])
                .with_prompt(WRITER_PROMPT),
        ];
        Self {
            roles: roles.into_iter().map(|r| (r.name.clone(), r)).collect(),
        }
    }

    /// Load every `*.yaml` file in `dir`.
    ///
    /// A malformed file or duplicate name fails the whole load. A missing
    /// prompt file only logs a warning and leaves the prompt empty.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(CatalogError::MissingDirectory(dir.to_path_buf()));
        }

        let pattern = dir.join("*.yaml");
        let mut paths = Vec::new();
        for entry in glob::glob(&pattern.to_string_lossy())? {
            let path = entry.map_err(|e| CatalogError::Io {
                path: e.path().to_path_buf(),
                source: e.into_error(),
            })?;
            paths.push(path);
        }
        paths.sort();

        let mut roles = Vec::with_capacity(paths.len());
        for path in paths {
            let role = load_role_file(dir, &path)?;
            tracing::debug!(role = %role.name, path = ?path, "loaded role");
            roles.push(role);
        }

        tracing::info!(count = roles.len(), dir = ?dir, "role catalog loaded");
        Self::from_roles(roles)
    }

    pub fn get(&self, name: &str) -> Option<&RoleSpec> {
        self.roles.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.roles.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.roles.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoleSpec> {
        self.roles.values()
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    /// Markdown list of roles for the planner prompt
    pub fn describe(&self) -> String {
        self.roles
            .values()
            .map(|r| {
                let mut line = format!("- **{}**: {}", r.name, r.display_name);
                if r.delegate {
                    line.push_str(" (implements changes through the external code generator)");
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn load_role_file(dir: &Path, path: &Path) -> Result<RoleSpec, CatalogError> {
    let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let file: RoleFile = serde_yaml::from_str(&text).map_err(|source| CatalogError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut role = RoleSpec {
        name: file.name.unwrap_or_else(|| stem.clone()),
        display_name: file.display_name.unwrap_or(stem),
        model: file.model,
        max_iterations: file.max_iterations,
        tools: file.tools,
        can_delegate_to: file.can_delegate_to,
        prompt_file: file.prompt,
        delegate: file.delegate,
        system_prompt: String::new(),
    };

    if let Some(prompt_file) = &role.prompt_file {
        let prompt_path = dir.join(prompt_file);
        match std::fs::read_to_string(&prompt_path) {
            Ok(prompt) => role.system_prompt = prompt,
            Err(e) => {
                tracing::warn!(role = %role.name, path = ?prompt_path, error = %e, "prompt file not found")
            }
        }
    }

    Ok(role)
}
