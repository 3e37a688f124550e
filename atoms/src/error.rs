use serde::Serialize;
use thiserror::Error;

/// One user that could not be assigned during a distribution run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssignmentFailure {
    pub user_id: String,
    pub kind: &'static str,
    pub reason: String,
}

/// A mentor whose interns could not be listed, so none of them were planned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MentorFailure {
    pub mentor_id: String,
    pub kind: &'static str,
    pub reason: String,
}

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Task {0} is already completed")]
    AlreadyCompleted(String),

    #[error("Task {0} was modified concurrently, retry later")]
    ConcurrentModification(String),

    #[error("Blob storage failure: {0}")]
    StorageFailure(String),

    #[error(
        "Assignment batch partially failed: {} of {} users failed, {} mentors unreached",
        .failures.len(),
        .failures.len() + .committed,
        .unreached.len()
    )]
    PartialBatchFailure {
        failures: Vec<AssignmentFailure>,
        unreached: Vec<MentorFailure>,
        committed: usize,
    },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Cannot {transition} a task that is {from}")]
    InvalidTransition {
        from: &'static str,
        transition: &'static str,
    },

    #[error("Task store error: {0}")]
    Store(String),
}

impl TaskError {
    /// Stable machine-readable kind, sent to clients alongside the message.
    pub fn kind(&self) -> &'static str {
        match self {
            TaskError::NotFound(_) => "NotFound",
            TaskError::Forbidden(_) => "Forbidden",
            TaskError::AlreadyCompleted(_) => "AlreadyCompleted",
            TaskError::ConcurrentModification(_) => "ConcurrentModification",
            TaskError::StorageFailure(_) => "StorageFailure",
            TaskError::PartialBatchFailure { .. } => "PartialBatchFailure",
            TaskError::Validation(_) => "Validation",
            TaskError::InvalidTransition { .. } => "InvalidTransition",
            TaskError::Store(_) => "StoreFailure",
        }
    }

    /// Transient failures are retried locally a bounded number of times.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TaskError::ConcurrentModification(_) | TaskError::StorageFailure(_) | TaskError::Store(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TaskError>;
