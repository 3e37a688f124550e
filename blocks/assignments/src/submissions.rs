//! Submission pipeline: evidence upload, then one atomic task transition.
//!
//! Failure boundaries:
//! 1. precondition failures (`NotFound`, `Forbidden`, `AlreadyCompleted`)
//!    happen before anything is written;
//! 2. a blob failure (`StorageFailure`) leaves the task store untouched;
//! 3. the task transition and the submission record are written by one
//!    compare-and-swap, so the task is never `Completed` without its reference;
//! 4. an uploaded blob is only released once the store confirms that neither
//!    the task nor its history points at it.

use chrono::Utc;
use lms_atoms::media::{BlobMetadata, BlobRef};
use lms_atoms::tasks::lifecycle::{self, Transition};
use lms_atoms::tasks::{self as task_service, Submission, Task, TaskStatus};
use lms_atoms::{BlobStore, Result, Superseded, TaskError, TaskStore, TaskWrite};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Compare-and-swap attempts before `ConcurrentModification` surfaces.
    pub max_cas_attempts: u32,
    /// Blob writes attempted before `StorageFailure` surfaces.
    pub max_blob_attempts: u32,
    /// Accept a new submission for a completed task, replacing the old one.
    pub allow_resubmission: bool,
    /// Keep replaced submissions for audit instead of dropping them.
    pub retain_superseded: bool,
    pub max_file_bytes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_cas_attempts: 3,
            max_blob_attempts: 2,
            allow_resubmission: false,
            retain_superseded: true,
            max_file_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Decoded evidence file.
#[derive(Debug, Clone)]
pub struct EvidenceFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl EvidenceFile {
    pub fn validate(&self, max_bytes: usize) -> Result<()> {
        if self.file_name.trim().is_empty() {
            return Err(TaskError::Validation("file name must not be empty".to_string()));
        }
        if self.bytes.is_empty() {
            return Err(TaskError::Validation("evidence file is empty".to_string()));
        }
        if self.bytes.len() > max_bytes {
            return Err(TaskError::Validation(format!(
                "evidence file is {} bytes, limit is {}",
                self.bytes.len(),
                max_bytes
            )));
        }
        Ok(())
    }
}

pub struct SubmissionPipeline<'a> {
    tasks: &'a dyn TaskStore,
    blobs: &'a dyn BlobStore,
    config: &'a PipelineConfig,
}

impl<'a> SubmissionPipeline<'a> {
    pub fn new(tasks: &'a dyn TaskStore, blobs: &'a dyn BlobStore, config: &'a PipelineConfig) -> Self {
        Self {
            tasks,
            blobs,
            config,
        }
    }

    pub async fn submit(&self, task_id: &str, user_id: &str, file: EvidenceFile) -> Result<Task> {
        file.validate(self.config.max_file_bytes)?;

        let task = task_service::get_task(self.tasks, task_id).await?;
        self.check_preconditions(&task, user_id)?;

        let metadata = BlobMetadata {
            task_id: task_id.to_string(),
            user_id: user_id.to_string(),
            file_name: file.file_name,
            content_type: file.content_type,
        };
        let blob = self.store_blob(file.bytes, &metadata).await?;

        let submission = Submission::new(task_id, user_id, blob, Utc::now());
        let mut discarded = None;
        let result = task_service::write_with_retry(
            self.tasks,
            task_id,
            self.config.max_cas_attempts,
            |current| {
                let write = self.plan_write(current, user_id, &submission)?;
                if let Some(write) = &write {
                    discarded = match write.superseded {
                        Some(Superseded::Discard { .. }) => {
                            current.submission().map(|s| s.blob.clone())
                        }
                        _ => None,
                    };
                }
                Ok(write)
            },
        )
        .await;

        let task = match result {
            Ok(task) => task,
            Err(e) => self.settle_failure(task_id, &submission, e).await?,
        };
        tracing::info!(
            task_id,
            user_id,
            submission_id = %submission.submission_id,
            version = task.version,
            "Submission accepted"
        );
        if let Some(blob) = discarded {
            self.release_blob(&blob, "Could not release discarded evidence").await;
        }
        Ok(task)
    }

    fn check_preconditions(&self, task: &Task, user_id: &str) -> Result<()> {
        if task.assignee_id != user_id {
            return Err(TaskError::Forbidden(format!(
                "task {} is not assigned to user {}",
                task.task_id, user_id
            )));
        }
        if task.status() == TaskStatus::Completed && !self.config.allow_resubmission {
            return Err(TaskError::AlreadyCompleted(task.task_id.clone()));
        }
        Ok(())
    }

    /// Decide the write against the freshest copy of the task. Runs again after
    /// every lost race, so a competing submission that won is seen here.
    /// `None` means an earlier attempt already landed this submission.
    fn plan_write(&self, current: &Task, user_id: &str, submission: &Submission) -> Result<Option<TaskWrite>> {
        if references(current, submission) {
            return Ok(None);
        }
        self.check_preconditions(current, user_id)?;

        let now = Utc::now();
        let previous = current.submission().map(|s| s.submission_id.clone());
        let transition = match previous {
            Some(_) => Transition::Resubmit(submission.to_ref()),
            None => Transition::Complete(submission.to_ref()),
        };
        let next = lifecycle::apply(current, transition, now)?;

        let superseded = previous.map(|submission_id| {
            if self.config.retain_superseded {
                Superseded::Retain {
                    submission_id,
                    at: now,
                }
            } else {
                Superseded::Discard { submission_id }
            }
        });

        Ok(Some(TaskWrite {
            task: next,
            new_submission: Some(submission.clone()),
            superseded,
        }))
    }

    /// The write loop failed, but a store error does not prove the write was
    /// not applied. Re-read before deciding the blob is an orphan.
    async fn settle_failure(&self, task_id: &str, submission: &Submission, error: TaskError) -> Result<Task> {
        let current = match self.tasks.get(task_id).await {
            Ok(current) => current,
            Err(e) => {
                tracing::warn!(task_id, error = %e, "Cannot confirm submission outcome, keeping evidence");
                return Err(error);
            }
        };
        if let Some(task) = current.filter(|t| references(t, submission)) {
            tracing::info!(task_id, error = %error, "Submission landed despite store error");
            return Ok(task);
        }

        match self.tasks.submissions_for(task_id).await {
            Ok(history) if history.iter().any(|s| s.submission_id == submission.submission_id) => {
                tracing::warn!(task_id, error = %error, "Submission landed and was replaced, keeping evidence");
            }
            Ok(_) => {
                tracing::warn!(task_id, error = %error, "Submission rejected after upload");
                self.release_blob(&submission.blob, "Could not release orphaned evidence").await;
            }
            Err(e) => {
                tracing::warn!(task_id, error = %e, "Cannot confirm submission outcome, keeping evidence");
            }
        }
        Err(error)
    }

    async fn store_blob(&self, bytes: Vec<u8>, metadata: &BlobMetadata) -> Result<BlobRef> {
        let max_attempts = self.config.max_blob_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.blobs.store(bytes.clone(), metadata).await {
                Ok(blob) => return Ok(blob),
                Err(e @ TaskError::StorageFailure(_)) if attempt < max_attempts => {
                    tracing::warn!(task_id = %metadata.task_id, attempt, error = %e, "Evidence upload failed, retrying");
                }
                Err(e) => {
                    tracing::error!(task_id = %metadata.task_id, attempt, error = %e, "Evidence upload failed");
                    return Err(e);
                }
            }
        }
    }

    /// Best-effort; a failed release leaves an orphan behind.
    async fn release_blob(&self, blob: &BlobRef, failure: &str) {
        if let Err(e) = self.blobs.release(blob).await {
            tracing::warn!(blob_key = %blob.key, error = %e, "{}", failure);
        }
    }
}

fn references(task: &Task, submission: &Submission) -> bool {
    task.submission()
        .map_or(false, |active| active.submission_id == submission.submission_id)
}
