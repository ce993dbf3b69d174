//! # Artifact Store
//!
//! Per-session text blobs keyed by `(role, key)`. Later roles read them back
//! through [`ArtifactStore::briefing`].
//!
//! A store is either purely in memory or backed by a session directory:
//!
//! ```text
//! <base>/<session_id>/
//!   researcher.t1.md
//!   coder.%E6%AD%A5%E9%AA%A41.md
//!   qa.t1%2Ea.md
//!   _task_graph.json
//!   _final_report.md
//! ```
//!
//! File names percent-encode role and key, with `.` also escaped, so every
//! `(role, key)` pair gets its own file and reopening recovers it exactly.
//!
//! There is one writer per `(role, key)` per session. Two writers racing on
//! the same key leave whichever landed last.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::fs;
use tokio::sync::RwLock;

/// Briefing text when nothing has been written yet
pub const NO_PRIOR_FINDINGS: &str = "(No prior findings yet.)";

const BRIEFING_HEADER: &str = "# Prior findings from other agents\n";
const TASK_GRAPH_FILE: &str = "_task_graph.json";
const FINAL_REPORT_FILE: &str = "_final_report.md";

/// Replace anything outside `[A-Za-z0-9_-]` with `_`
pub fn sanitize_session_id(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "default".to_string()
    } else {
        cleaned
    }
}

/// `<role>.<key>` with both parts percent-encoded; `.` only appears as the separator
fn file_stem(role: &str, key: &str) -> String {
    format!("{}.{}", encode_part(role), encode_part(key))
}

fn encode_part(part: &str) -> String {
    urlencoding::encode(part).replace('.', "%2E")
}

fn decode_stem(stem: &str) -> Option<(String, String)> {
    let (role, key) = stem.split_once('.')?;
    let role = urlencoding::decode(role).ok()?.into_owned();
    let key = urlencoding::decode(key).ok()?.into_owned();
    Some((role, key))
}

/// Fresh short session id
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// Session-scoped artifact store
#[derive(Debug)]
pub struct ArtifactStore {
    session_id: String,
    root: Option<PathBuf>,
    artifacts: RwLock<BTreeMap<(String, String), String>>,
}

impl ArtifactStore {
    /// Store with no disk backing
    pub fn in_memory(session_id: &str) -> Self {
        Self {
            session_id: sanitize_session_id(session_id),
            root: None,
            artifacts: RwLock::new(BTreeMap::new()),
        }
    }

    /// Open (or create) `<base>/<session_id>` and load any artifacts already there
    pub async fn open(base: impl AsRef<Path>, session_id: &str) -> Result<Self> {
        let session_id = sanitize_session_id(session_id);
        let root = base.as_ref().join(&session_id);
        fs::create_dir_all(&root)
            .await
            .with_context(|| format!("Failed to create session directory: {:?}", root))?;

        let mut artifacts = BTreeMap::new();
        let mut entries = fs::read_dir(&root)
            .await
            .with_context(|| format!("Failed to read session directory: {:?}", root))?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if stem.starts_with('_') {
                continue;
            }
            let Some(slot) = decode_stem(stem) else {
                tracing::warn!(path = %path.display(), "skipping unrecognized artifact file");
                continue;
            };
            let text = fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read artifact: {:?}", path))?;
            artifacts.insert(slot, text);
        }

        tracing::debug!(session_id = %session_id, loaded = artifacts.len(), "opened artifact store");
        Ok(Self {
            session_id,
            root: Some(root),
            artifacts: RwLock::new(artifacts),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Session directory, when disk-backed
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Store `text` under `(role, key)`. The in-memory copy is updated even
    /// when the disk write fails.
    pub async fn write(&self, role: &str, key: &str, text: &str) -> Result<()> {
        self.artifacts
            .write()
            .await
            .insert((role.to_string(), key.to_string()), text.to_string());

        if let Some(root) = &self.root {
            let path = root.join(format!("{}.md", file_stem(role, key)));
            fs::write(&path, text)
                .await
                .with_context(|| format!("Failed to write artifact: {:?}", path))?;
        }
        Ok(())
    }

    pub async fn read(&self, role: &str, key: &str) -> Option<String> {
        self.artifacts
            .read()
            .await
            .get(&(role.to_string(), key.to_string()))
            .cloned()
    }

    /// All artifacts as `(role, key, text)` in briefing order
    pub async fn read_all(&self) -> Vec<(String, String, String)> {
        self.artifacts
            .read()
            .await
            .iter()
            .map(|((role, key), text)| (role.clone(), key.clone(), text.clone()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.artifacts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.artifacts.read().await.is_empty()
    }

    /// Digest of everything written so far, for injection into later prompts
    pub async fn briefing(&self) -> String {
        let artifacts = self.artifacts.read().await;
        if artifacts.is_empty() {
            return NO_PRIOR_FINDINGS.to_string();
        }
        let sections: Vec<String> = artifacts
            .iter()
            .map(|((role, key), text)| format!("## {}.{}\n{}\n", role, key, text))
            .collect();
        format!("{}\n{}", BRIEFING_HEADER, sections.join("\n"))
    }

    /// Persist the task graph next to the artifacts. No-op in memory.
    pub async fn write_task_graph<T: Serialize>(&self, graph: &T) -> Result<()> {
        let Some(root) = &self.root else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(graph).context("Failed to serialize task graph")?;
        let path = root.join(TASK_GRAPH_FILE);
        fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write task graph: {:?}", path))
    }

    /// Persist the merged report. No-op in memory.
    pub async fn write_final_report(&self, report: &str) -> Result<()> {
        let Some(root) = &self.root else {
            return Ok(());
        };
        let path = root.join(FINAL_REPORT_FILE);
        fs::write(&path, report)
            .await
            .with_context(|| format!("Failed to write final report: {:?}", path))
    }

    /// Drop every artifact and remove the session directory
    pub async fn cleanup(&self) -> Result<()> {
        self.artifacts.write().await.clear();
        if let Some(root) = &self.root {
            if fs::metadata(root).await.is_ok() {
                fs::remove_dir_all(root)
                    .await
                    .with_context(|| format!("Failed to remove session directory: {:?}", root))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_session_id() {
        assert_eq!(sanitize_session_id("telegram:123/abc"), "telegram_123_abc");
        assert_eq!(sanitize_session_id("ok-id_1"), "ok-id_1");
        assert_eq!(sanitize_session_id(""), "default");
        assert_eq!(new_session_id().len(), 12);
    }

    #[tokio::test]
    async fn test_briefing_sentinel_when_empty() {
        let store = ArtifactStore::in_memory("s1");
        assert_eq!(store.briefing().await, NO_PRIOR_FINDINGS);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_briefing_is_ordered_and_tagged() {
        let store = ArtifactStore::in_memory("s1");
        store.write("writer", "t3", "draft").await.unwrap();
        store.write("coder", "t2", "patch").await.unwrap();
        store.write("researcher", "t1", "facts").await.unwrap();

        let briefing = store.briefing().await;
        assert!(briefing.starts_with(BRIEFING_HEADER));
        let coder = briefing.find("## coder.t2").unwrap();
        let researcher = briefing.find("## researcher.t1").unwrap();
        let writer = briefing.find("## writer.t3").unwrap();
        assert!(coder < researcher && researcher < writer);
        assert!(briefing.contains("## researcher.t1\nfacts\n"));
    }

    #[tokio::test]
    async fn test_overwrite_keeps_last() {
        let store = ArtifactStore::in_memory("s1");
        store.write("qa", "t1", "first").await.unwrap();
        store.write("qa", "t1", "second").await.unwrap();

        assert_eq!(store.read("qa", "t1").await.as_deref(), Some("second"));
        assert_eq!(store.len().await, 1);
        assert_eq!(store.read("qa", "missing").await, None);
    }

    #[tokio::test]
    async fn test_keys_that_look_alike_stay_apart() {
        let store = ArtifactStore::in_memory("s1");
        store.write("researcher", "任务1", "first task output").await.unwrap();
        store.write("researcher", "步骤1", "second task output").await.unwrap();
        store.write("qa", "t1.a", "dotted").await.unwrap();
        store.write("qa", "t1_a", "underscored").await.unwrap();

        assert_eq!(store.len().await, 4);
        assert_eq!(
            store.read("researcher", "任务1").await.as_deref(),
            Some("first task output")
        );
        assert_eq!(store.read("qa", "t1.a").await.as_deref(), Some("dotted"));
        assert_eq!(store.read("qa", "t1_a").await.as_deref(), Some("underscored"));
    }

    #[tokio::test]
    async fn test_lookalike_keys_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = ArtifactStore::open(dir.path(), "s1").await.unwrap();
            store.write("researcher", "任务1", "first").await.unwrap();
            store.write("researcher", "步骤1", "second").await.unwrap();
            store.write("qa", "t1.a", "dotted").await.unwrap();
            store.write("qa", "t1_a", "underscored").await.unwrap();
        }
        assert!(dir.path().join("s1").join("qa.t1%2Ea.md").exists());

        let reopened = ArtifactStore::open(dir.path(), "s1").await.unwrap();
        assert_eq!(reopened.len().await, 4);
        assert_eq!(reopened.read("researcher", "任务1").await.as_deref(), Some("first"));
        assert_eq!(reopened.read("researcher", "步骤1").await.as_deref(), Some("second"));
        assert_eq!(reopened.read("qa", "t1.a").await.as_deref(), Some("dotted"));
        assert_eq!(reopened.read("qa", "t1_a").await.as_deref(), Some("underscored"));
    }

    #[tokio::test]
    async fn test_disk_backed_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = tokio_test::assert_ok!(ArtifactStore::open(dir.path(), "chat:42").await);
            store.write("researcher", "t1", "facts").await.unwrap();
            store.write_task_graph(&serde_json::json!({"t1": {}})).await.unwrap();
            store.write_final_report("report").await.unwrap();
        }

        let root = dir.path().join("chat_42");
        assert!(root.join("researcher.t1.md").exists());
        assert!(root.join(TASK_GRAPH_FILE).exists());

        let reopened = ArtifactStore::open(dir.path(), "chat:42").await.unwrap();
        assert_eq!(reopened.len().await, 1);
        assert_eq!(
            reopened.read_all().await,
            vec![("researcher".to_string(), "t1".to_string(), "facts".to_string())]
        );

        reopened.cleanup().await.unwrap();
        assert!(!root.exists());
        assert!(reopened.is_empty().await);
    }
}
