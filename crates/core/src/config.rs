//! # Runtime Configuration
//!
//! `HiveConfig` lives as JSON at `<runtime>/config.json`. The runtime
//! directory is `.hive` under the current directory unless
//! `HIVE_RUNTIME_PATH` points elsewhere. Every field has a default, so a
//! missing or partial file is fine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::models::{LlmProvider, ModelConfig};
use crate::swarm::runtime::DEFAULT_MAX_TURNS;
use crate::tools::CodeGenCommand;

pub const CONFIG_FILE: &str = "config.json";
const SESSIONS_DIR: &str = "sessions";

/// Runtime directory (`.hive`), honoring `HIVE_RUNTIME_PATH`
pub fn runtime_path() -> PathBuf {
    if let Ok(path) = std::env::var("HIVE_RUNTIME_PATH") {
        return PathBuf::from(path);
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".hive")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HiveConfig {
    pub provider: LlmProvider,
    /// Model for every call without a more specific override
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// Model used by the planner and merger, if different
    pub planner_model: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Per model call
    pub model_timeout_secs: u64,
    /// Per code-generator run
    pub delegate_timeout_secs: u64,
    /// Conversation turn budget
    pub max_turns: usize,
    /// Directory of role YAML files; built-in roles when unset
    pub roles_dir: Option<PathBuf>,
    /// Directory tools and the code generator operate in; defaults to cwd
    pub workspace: Option<PathBuf>,
    /// Keep session artifacts under `<runtime>/sessions`
    pub persist_sessions: bool,
    pub code_generator: CodeGenCommand,
}

impl Default for HiveConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            model: None,
            base_url: None,
            planner_model: None,
            max_tokens: 8192,
            temperature: 0.1,
            model_timeout_secs: 120,
            delegate_timeout_secs: 600,
            max_turns: DEFAULT_MAX_TURNS,
            roles_dir: None,
            workspace: None,
            persist_sessions: true,
            code_generator: CodeGenCommand::default(),
        }
    }
}

impl HiveConfig {
    /// Load from `path`; a missing file yields defaults
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if fs::metadata(path).await.is_err() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config: {:?}", path))?;
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse config: {:?}", path))
    }

    /// Load `<runtime>/config.json`
    pub async fn load_default() -> Result<Self> {
        Self::load(runtime_path().join(CONFIG_FILE)).await
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write config: {:?}", path))
    }

    /// Apply `HIVE_PROVIDER`, `HIVE_MODEL` and `HIVE_BASE_URL` from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup("HIVE_PROVIDER") {
            match LlmProvider::parse(&name) {
                Some(provider) => self.provider = provider,
                None => tracing::warn!(provider = %name, "ignoring unknown HIVE_PROVIDER"),
            }
        }
        if let Some(model) = lookup("HIVE_MODEL").filter(|m| !m.is_empty()) {
            self.model = Some(model);
        }
        if let Some(url) = lookup("HIVE_BASE_URL").filter(|u| !u.is_empty()) {
            self.base_url = Some(url);
        }
    }

    /// Provider settings for the HTTP client
    pub fn model_config(&self) -> ModelConfig {
        let model = self
            .model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string());
        let config = ModelConfig::with_provider(self.provider, model);
        match &self.base_url {
            Some(url) => config.with_base_url(url.clone()),
            None => config,
        }
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    pub fn delegate_timeout(&self) -> Duration {
        Duration::from_secs(self.delegate_timeout_secs)
    }

    pub fn workspace_dir(&self) -> PathBuf {
        self.workspace
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    /// Where session artifacts go, or `None` to keep them in memory
    pub fn sessions_dir(&self) -> Option<PathBuf> {
        self.persist_sessions.then(|| runtime_path().join(SESSIONS_DIR))
    }
}
