//! Capability traits the engine is written against.
//!
//! The task store is the single source of truth. Implementations must make
//! every `compare_and_swap` and `insert_if_absent` a single durable write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::media::model::{BlobMetadata, BlobRef};
use crate::tasks::model::{IdempotencyKey, Submission, Task, TaskStatus, TaskTemplate};
use crate::users::model::User;

/// Selection of tasks. Stores require at least an assignee or a mentor.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub assignee_id: Option<String>,
    pub mentor_id: Option<String>,
    pub template_id: Option<String>,
    pub status: Option<TaskStatus>,
}

impl TaskFilter {
    pub fn assignee(user_id: &str) -> Self {
        Self {
            assignee_id: Some(user_id.to_string()),
            ..Default::default()
        }
    }

    pub fn mentor(mentor_id: &str) -> Self {
        Self {
            mentor_id: Some(mentor_id.to_string()),
            ..Default::default()
        }
    }

    pub fn with_template(mut self, template_id: &str) -> Self {
        self.template_id = Some(template_id.to_string());
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.assignee_id.as_deref().map_or(true, |id| task.assignee_id == id)
            && self.mentor_id.as_deref().map_or(true, |id| task.mentor_id == id)
            && self.template_id.as_deref().map_or(true, |id| task.template_id == id)
            && self.status.map_or(true, |s| task.status() == s)
    }
}

/// What happens to the submission a transition displaces.
#[derive(Debug, Clone, PartialEq)]
pub enum Superseded {
    /// Keep the record for audit, stamped with the time it was replaced.
    Retain {
        submission_id: String,
        at: DateTime<Utc>,
    },
    /// Drop the record.
    Discard { submission_id: String },
}

/// Everything one compare-and-swap writes together.
#[derive(Debug, Clone)]
pub struct TaskWrite {
    /// Next task value; its `version` is `expected_version + 1`.
    pub task: Task,
    pub new_submission: Option<Submission>,
    pub superseded: Option<Superseded>,
}

impl TaskWrite {
    pub fn task_only(task: Task) -> Self {
        Self {
            task,
            new_submission: None,
            superseded: None,
        }
    }
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn get(&self, task_id: &str) -> Result<Option<Task>>;

    async fn query(&self, filter: &TaskFilter) -> Result<Vec<Task>>;

    /// Apply `write` only if the stored version still equals
    /// `expected_version`, otherwise fail with `ConcurrentModification`.
    async fn compare_and_swap(
        &self,
        task_id: &str,
        expected_version: u64,
        write: TaskWrite,
    ) -> Result<Task>;

    /// Create `task` unless `key` was already claimed. Returns whether it was
    /// created.
    async fn insert_if_absent(&self, key: &IdempotencyKey, task: &Task) -> Result<bool>;

    /// Remove a task (and its submission records) if unchanged since read.
    /// A scheduled task's idempotency marker stays so a re-run of its period
    /// cannot resurrect it; a direct one is released.
    async fn delete(&self, task_id: &str, expected_version: u64) -> Result<()>;

    async fn submissions_for(&self, task_id: &str) -> Result<Vec<Submission>>;

    async fn get_template(&self, template_id: &str) -> Result<Option<TaskTemplate>>;

    async fn list_templates(&self, mentor_id: Option<&str>) -> Result<Vec<TaskTemplate>>;

    async fn put_template(&self, template: &TaskTemplate) -> Result<()>;
}

/// Opaque file storage for submission evidence.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fails with `StorageFailure`.
    async fn store(&self, bytes: Vec<u8>, metadata: &BlobMetadata) -> Result<BlobRef>;

    /// Best-effort removal of a blob no task references any more.
    async fn release(&self, blob: &BlobRef) -> Result<()>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>>;

    /// Users whose mentor is `mentor_id`.
    async fn list_interns(&self, mentor_id: &str) -> Result<Vec<User>>;
}
