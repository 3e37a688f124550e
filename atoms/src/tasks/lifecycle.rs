//! Task state machine.
//!
//! ```text
//! Pending ──MarkIncomplete──▶ Incomplete ──ResetPending──▶ Pending
//! Pending | Incomplete ──Complete──▶ Completed ──Reopen──▶ Incomplete
//! Completed ──Resubmit──▶ Completed   (only when resubmission is enabled)
//! ```

use chrono::{DateTime, Utc};

use super::model::{SubmissionRef, Task, TaskState, TaskStatus, UpdateTaskPayload};
use crate::error::TaskError;

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    MarkIncomplete,
    ResetPending,
    Complete(SubmissionRef),
    Resubmit(SubmissionRef),
    Reopen,
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Transition::MarkIncomplete => "mark incomplete",
            Transition::ResetPending => "reset to pending",
            Transition::Complete(_) => "complete",
            Transition::Resubmit(_) => "resubmit",
            Transition::Reopen => "reopen",
        }
    }
}

/// Compute the task that results from `transition`. The input is untouched;
/// the result carries the next version and transition time.
pub fn apply(task: &Task, transition: Transition, now: DateTime<Utc>) -> Result<Task, TaskError> {
    let next_state = match (&task.state, transition) {
        (TaskState::Pending, Transition::MarkIncomplete) => TaskState::Incomplete,
        (TaskState::Incomplete, Transition::ResetPending) => TaskState::Pending,
        (TaskState::Pending | TaskState::Incomplete, Transition::Complete(sub)) => {
            TaskState::Completed(sub)
        }
        (TaskState::Completed(_), Transition::Complete(_)) => {
            return Err(TaskError::AlreadyCompleted(task.task_id.clone()));
        }
        (TaskState::Completed(_), Transition::Resubmit(sub)) => TaskState::Completed(sub),
        (TaskState::Completed(_), Transition::Reopen) => TaskState::Incomplete,
        (state, transition) => {
            return Err(TaskError::InvalidTransition {
                from: state.status().as_str(),
                transition: transition.name(),
            });
        }
    };

    let mut next = task.clone();
    next.state = next_state;
    next.version = task.version + 1;
    next.transitioned_at = now;
    Ok(next)
}

/// Mentor edit of title/description. Status and submission are not touched.
pub fn edit(task: &Task, payload: &UpdateTaskPayload) -> Task {
    let mut next = task.clone();
    if let Some(title) = &payload.title {
        next.title = title.trim().to_string();
    }
    if let Some(description) = &payload.description {
        next.description = description.clone();
    }
    next.version = task.version + 1;
    next
}

/// Completed iff a submission reference is present.
pub fn holds_invariant(task: &Task) -> bool {
    (task.status() == TaskStatus::Completed) == task.submission().is_some()
}
