//! Markdown documentation used to augment agent system prompts.
//!
//! Layout under the docs root:
//!
//! ```text
//! <root>/project-<id>/*.md
//! <root>/project-<id>/task-<id>/*.md
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::models::{Project, Task};

#[async_trait]
pub trait DocsProvider: Send + Sync {
    /// Concatenated project-level documentation, empty if there is none.
    async fn project_docs(&self, project: &Project) -> Result<String>;
    /// Concatenated task-level documentation, empty if there is none.
    async fn task_docs(&self, project: &Project, task: &Task) -> Result<String>;

    /// Build the system-prompt augmentation for a task.
    ///
    /// Returns `None` when neither level has any content. Read failures are
    /// logged and treated as empty so a bad docs directory never blocks a run.
    async fn context_prompt(&self, project: &Project, task: &Task) -> Option<String> {
        let project_docs = self.project_docs(project).await.unwrap_or_else(|e| {
            warn!("Failed to read docs for project {}: {:#}", project.id, e);
            String::new()
        });
        let task_docs = self.task_docs(project, task).await.unwrap_or_else(|e| {
            warn!("Failed to read docs for task {}: {:#}", task.id, e);
            String::new()
        });
        build_context_prompt(&project_docs, &task_docs)
    }
}

pub fn build_context_prompt(project_docs: &str, task_docs: &str) -> Option<String> {
    let mut sections = Vec::new();
    if !project_docs.trim().is_empty() {
        sections.push(format!("## Project Documentation\n\n{}", project_docs.trim()));
    }
    if !task_docs.trim().is_empty() {
        sections.push(format!("## Task Documentation\n\n{}", task_docs.trim()));
    }
    if sections.is_empty() {
        None
    } else {
        Some(sections.join("\n\n"))
    }
}

/// File-backed docs store.
pub struct MarkdownDocs {
    root: PathBuf,
}

impl MarkdownDocs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn read_dir_markdown(dir: &Path) -> Result<String> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(String::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to list {}", dir.display()));
            }
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("md") {
                files.push(path);
            }
        }
        files.sort();

        let mut parts = Vec::with_capacity(files.len());
        for path in &files {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            if !content.trim().is_empty() {
                parts.push(content.trim().to_string());
            }
        }

        debug!("Loaded {} doc files from {}", parts.len(), dir.display());
        Ok(parts.join("\n\n"))
    }
}

#[async_trait]
impl DocsProvider for MarkdownDocs {
    async fn project_docs(&self, project: &Project) -> Result<String> {
        Self::read_dir_markdown(&self.root.join(format!("project-{}", project.id))).await
    }

    async fn task_docs(&self, project: &Project, task: &Task) -> Result<String> {
        let dir = self
            .root
            .join(format!("project-{}", project.id))
            .join(format!("task-{}", task.id));
        Self::read_dir_markdown(&dir).await
    }
}
