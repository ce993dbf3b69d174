//! # File Tools
//!
//! `file_read`, `file_write` and `list_dir`, sandboxed to a workspace root.
//! Paths are relative to the root; absolute paths and `..` are rejected.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use tokio::fs;

use crate::swarm::agent::{Capability, CapabilityOutput};

/// Arguments for reading a file
#[derive(Deserialize, JsonSchema)]
pub struct ReadFileArgs {
    /// Relative path to the file within the workspace
    pub path: String,
}

/// Arguments for writing a file
#[derive(Deserialize, JsonSchema)]
pub struct WriteFileArgs {
    /// Relative path to the file within the workspace
    pub path: String,
    /// Content to write to the file
    pub content: String,
}

/// Arguments for listing directory contents
#[derive(Deserialize, JsonSchema)]
pub struct ListDirArgs {
    /// Relative path to the directory (empty for root)
    pub path: Option<String>,
}

/// Resolve `relative` under `root`, refusing anything that could escape it
fn sandboxed(root: &Path, relative: &str) -> Result<PathBuf> {
    let rel = Path::new(relative);
    for component in rel.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => bail!("Path escapes workspace sandbox: {}", relative),
        }
    }
    Ok(root.join(rel))
}

async fn read_file(root: &Path, args: ReadFileArgs) -> Result<CapabilityOutput> {
    let path = sandboxed(root, &args.path)?;
    let content = fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read '{}'", args.path))?;
    Ok(CapabilityOutput::Value(json!({
        "path": args.path,
        "content": content,
        "lines": content.lines().count()
    })))
}

async fn write_file(root: &Path, args: WriteFileArgs) -> Result<CapabilityOutput> {
    let path = sandboxed(root, &args.path)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .context("Failed to create directories")?;
    }
    fs::write(&path, &args.content)
        .await
        .with_context(|| format!("Failed to write '{}'", args.path))?;
    tracing::debug!(path = %args.path, bytes = args.content.len(), "file written");
    Ok(CapabilityOutput::Value(json!({
        "path": args.path,
        "bytes_written": args.content.len()
    })))
}

async fn list_dir(root: &Path, args: ListDirArgs) -> Result<CapabilityOutput> {
    let rel = args.path.unwrap_or_default();
    let dir = if rel.is_empty() {
        root.to_path_buf()
    } else {
        sandboxed(root, &rel)?
    };

    let mut entries = fs::read_dir(&dir)
        .await
        .with_context(|| format!("Failed to list directory '{}'", rel))?;
    let mut files = Vec::new();
    let mut dirs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
            dirs.push(name);
        } else {
            files.push(name);
        }
    }
    files.sort();
    dirs.sort();

    Ok(CapabilityOutput::Value(json!({
        "path": if rel.is_empty() { ".".to_string() } else { rel },
        "files": files,
        "directories": dirs
    })))
}

/// The three file capabilities rooted at `workspace`
pub fn file_tools(workspace: impl Into<PathBuf>) -> Vec<Capability> {
    let root: Arc<PathBuf> = Arc::new(workspace.into());

    let r = Arc::clone(&root);
    let read = Capability::typed(
        "file_read",
        "Read a file's contents from the workspace. Returns the content and line count.",
        move |args: ReadFileArgs, _ctx| {
            let root = Arc::clone(&r);
            async move { read_file(&root, args).await }
        },
    );

    let w = Arc::clone(&root);
    let write = Capability::typed(
        "file_write",
        "Write content to a file in the workspace. Creates parent directories if needed.",
        move |args: WriteFileArgs, _ctx| {
            let root = Arc::clone(&w);
            async move { write_file(&root, args).await }
        },
    );

    let l = Arc::clone(&root);
    let list = Capability::typed(
        "list_dir",
        "List files and subdirectories in a workspace directory.",
        move |args: ListDirArgs, _ctx| {
            let root = Arc::clone(&l);
            async move { list_dir(&root, args).await }
        },
    );

    vec![read, write, list]
}
