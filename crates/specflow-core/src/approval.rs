//! Approval queue for agent-proposed file edits.
//!
//! Nothing queued here touches the filesystem until the entry has been
//! approved and [`ApprovalQueue::apply_approved`] is called.

use crate::error::{Result, SpecflowError};
use crate::paths;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// FileEdit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditOperation {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEdit {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub operation: EditOperation,
}

impl FileEdit {
    pub fn create(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: Some(content.into()),
            operation: EditOperation::Create,
        }
    }

    pub fn update(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: Some(content.into()),
            operation: EditOperation::Update,
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: None,
            operation: EditOperation::Delete,
        }
    }

    pub fn validate(&self) -> Result<()> {
        // The root is irrelevant here; only the shape of the path is checked.
        paths::resolve_within(std::path::Path::new(""), &self.path)?;
        match self.operation {
            EditOperation::Create | EditOperation::Update if self.content.is_none() => {
                Err(SpecflowError::validation(format!(
                    "edit '{}': {:?} requires content",
                    self.path, self.operation
                )))
            }
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// FilesystemSink
// ---------------------------------------------------------------------------

/// Where approved edits land.
#[async_trait]
pub trait FilesystemSink: Send + Sync {
    async fn write_file(&self, path: &str, content: &str) -> Result<()>;
    async fn delete(&self, path: &str) -> Result<()>;
}

/// [`FilesystemSink`] rooted at a workspace directory.
#[derive(Debug, Clone)]
pub struct WorkspaceFs {
    root: PathBuf,
}

impl WorkspaceFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl FilesystemSink for WorkspaceFs {
    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        let target = paths::resolve_within(&self.root, path)?;
        let data = content.to_owned();
        tokio::task::spawn_blocking(move || crate::io::atomic_write(&target, data.as_bytes()))
            .await
            .map_err(|e| SpecflowError::Execution(format!("write task failed: {e}")))?
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let target = paths::resolve_within(&self.root, path)?;
        crate::io::remove_if_exists(&target).map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// PendingChange
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingChange {
    pub id: Uuid,
    pub edits: Vec<FileEdit>,
    pub approved: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<String>,
}

// ---------------------------------------------------------------------------
// ApplyReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditFailure {
    pub change_id: Uuid,
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplyReport {
    /// Changes fully applied and removed from the queue.
    pub applied: Vec<Uuid>,
    /// Edits written or deleted, across all changes.
    pub edits_applied: usize,
    pub failures: Vec<EditFailure>,
}

impl ApplyReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

// ---------------------------------------------------------------------------
// ApprovalQueue
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct ApprovalQueue {
    entries: Mutex<Vec<PendingChange>>,
}

impl ApprovalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<PendingChange>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate and enqueue a batch of edits. Nothing is stored on error.
    pub fn queue(&self, edits: Vec<FileEdit>, spec: Option<String>) -> Result<Uuid> {
        if edits.is_empty() {
            return Err(SpecflowError::validation("change: no edits"));
        }
        for edit in &edits {
            edit.validate()?;
        }
        let change = PendingChange {
            id: Uuid::new_v4(),
            edits,
            approved: false,
            created_at: Utc::now(),
            spec,
        };
        let id = change.id;
        tracing::info!(change_id = %id, edits = change.edits.len(), "queued change for approval");
        self.lock().push(change);
        Ok(id)
    }

    pub fn approve(&self, id: Uuid) -> bool {
        let mut entries = self.lock();
        match entries.iter_mut().find(|c| c.id == id) {
            Some(change) => {
                change.approved = true;
                tracing::info!(change_id = %id, "change approved");
                true
            }
            None => false,
        }
    }

    pub fn reject(&self, id: Uuid) -> bool {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|c| c.id != id);
        let removed = entries.len() != before;
        if removed {
            tracing::info!(change_id = %id, "change rejected");
        }
        removed
    }

    pub fn get(&self, id: Uuid) -> Option<PendingChange> {
        self.lock().iter().find(|c| c.id == id).cloned()
    }

    pub fn list_pending(&self) -> Vec<PendingChange> {
        self.lock().iter().filter(|c| !c.approved).cloned().collect()
    }

    pub fn list_approved(&self) -> Vec<PendingChange> {
        self.lock().iter().filter(|c| c.approved).cloned().collect()
    }

    /// Apply every approved change in queue order through `sink`.
    ///
    /// A change whose edits all succeed is removed. A change with any failed
    /// edit stays queued (still approved) and the failure is reported.
    pub async fn apply_approved(&self, sink: &dyn FilesystemSink) -> ApplyReport {
        let approved = self.list_approved();
        let mut report = ApplyReport::default();

        for change in approved {
            let mut clean = true;
            for edit in &change.edits {
                let result = match (edit.operation, edit.content.as_deref()) {
                    (EditOperation::Delete, _) => sink.delete(&edit.path).await,
                    (_, Some(content)) => sink.write_file(&edit.path, content).await,
                    (op, None) => Err(SpecflowError::validation(format!(
                        "edit '{}': {op:?} requires content",
                        edit.path
                    ))),
                };
                match result {
                    Ok(()) => report.edits_applied += 1,
                    Err(e) => {
                        clean = false;
                        tracing::warn!(
                            change_id = %change.id,
                            path = %edit.path,
                            error = %e,
                            "edit failed"
                        );
                        report.failures.push(EditFailure {
                            change_id: change.id,
                            path: edit.path.clone(),
                            error: e.to_string(),
                        });
                    }
                }
            }
            if clean {
                self.lock().retain(|c| c.id != change.id);
                report.applied.push(change.id);
            }
        }
        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct FailingSink;

    #[async_trait]
    impl FilesystemSink for FailingSink {
        async fn write_file(&self, path: &str, _content: &str) -> Result<()> {
            if path.starts_with("bad") {
                Err(SpecflowError::Execution("disk full".to_string()))
            } else {
                Ok(())
            }
        }

        async fn delete(&self, _path: &str) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn queue_rejects_empty_and_invalid_edits() {
        let queue = ApprovalQueue::new();
        assert!(queue.queue(Vec::new(), None).is_err());
        assert!(queue
            .queue(vec![FileEdit::create("../escape.rs", "x")], None)
            .is_err());
        let missing_content = FileEdit {
            path: "a.rs".to_string(),
            content: None,
            operation: EditOperation::Update,
        };
        assert!(queue.queue(vec![missing_content], None).is_err());
        assert!(queue.list_pending().is_empty());
    }

    #[tokio::test]
    async fn nothing_written_before_approval() {
        let dir = TempDir::new().unwrap();
        let fs = WorkspaceFs::new(dir.path());
        let queue = ApprovalQueue::new();
        let id = queue
            .queue(vec![FileEdit::create("src/new.rs", "fn main() {}")], None)
            .unwrap();

        let report = queue.apply_approved(&fs).await;
        assert!(report.applied.is_empty());
        assert!(!dir.path().join("src/new.rs").exists());
        assert_eq!(queue.list_pending().len(), 1);

        assert!(queue.approve(id));
        let report = queue.apply_approved(&fs).await;
        assert_eq!(report.applied, vec![id]);
        assert_eq!(report.edits_applied, 1);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("src/new.rs")).unwrap(),
            "fn main() {}"
        );
        assert!(queue.get(id).is_none());
        assert!(queue.list_pending().is_empty());
    }

    #[tokio::test]
    async fn delete_edit_removes_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("old.txt"), "x").unwrap();
        let queue = ApprovalQueue::new();
        let id = queue.queue(vec![FileEdit::delete("old.txt")], None).unwrap();
        queue.approve(id);
        let report = queue.apply_approved(&WorkspaceFs::new(dir.path())).await;
        assert!(report.is_clean());
        assert!(!dir.path().join("old.txt").exists());
    }

    #[test]
    fn reject_removes_entry() {
        let queue = ApprovalQueue::new();
        let id = queue
            .queue(vec![FileEdit::update("a.md", "text")], Some("auth".to_string()))
            .unwrap();
        assert_eq!(queue.get(id).unwrap().spec.as_deref(), Some("auth"));
        assert!(queue.reject(id));
        assert!(!queue.reject(id));
        assert!(!queue.approve(id));
    }

    #[tokio::test]
    async fn failed_edit_keeps_change_for_retry() {
        let queue = ApprovalQueue::new();
        let ok = queue.queue(vec![FileEdit::create("good.rs", "a")], None).unwrap();
        let bad = queue
            .queue(
                vec![FileEdit::create("bad.rs", "b"), FileEdit::create("also.rs", "c")],
                None,
            )
            .unwrap();
        queue.approve(ok);
        queue.approve(bad);

        let report = queue.apply_approved(&FailingSink).await;
        assert_eq!(report.applied, vec![ok]);
        assert_eq!(report.edits_applied, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].change_id, bad);
        assert_eq!(report.failures[0].path, "bad.rs");

        let remaining = queue.list_approved();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, bad);
    }

    #[tokio::test]
    async fn workspace_fs_refuses_escape() {
        let dir = TempDir::new().unwrap();
        let fs = WorkspaceFs::new(dir.path());
        assert!(fs.write_file("../outside.txt", "x").await.is_err());
        assert!(fs.delete("/etc/hosts").await.is_err());
    }
}
