use chrono::Utc;
use std::collections::HashSet;

use super::lifecycle::{self, Transition};
use super::model::{Task, UpdateTaskPayload};
use crate::error::{Result, TaskError};
use crate::media::model::BlobRef;
use crate::store::{BlobStore, Superseded, TaskFilter, TaskStore, TaskWrite};

/// Who asks for a mentor-side transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    Mentor(String),
    /// Automation acting on the program's behalf (e.g. a sweep of overdue tasks).
    System,
}

impl Actor {
    fn authorize(&self, task: &Task) -> Result<()> {
        match self {
            Actor::System => Ok(()),
            Actor::Mentor(id) if *id == task.mentor_id => Ok(()),
            Actor::Mentor(id) => Err(TaskError::Forbidden(format!(
                "user {} is not the mentor of task {}",
                id, task.task_id
            ))),
        }
    }
}

/// Read-plan-write loop around `compare_and_swap`.
///
/// `plan` sees the freshest task on every attempt, so preconditions are
/// re-evaluated after a lost race. It returns `None` when `current` already
/// reflects the write, which happens when a store reports an error for a
/// write it did apply. Only transient errors are retried.
pub async fn write_with_retry<F>(
    store: &dyn TaskStore,
    task_id: &str,
    max_attempts: u32,
    mut plan: F,
) -> Result<Task>
where
    F: FnMut(&Task) -> Result<Option<TaskWrite>> + Send,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let current = store
            .get(task_id)
            .await?
            .ok_or_else(|| TaskError::NotFound(format!("Task {}", task_id)))?;
        let write = match plan(&current)? {
            Some(write) => write,
            None => {
                tracing::info!(task_id, attempt, version = current.version, "Task write already applied");
                return Ok(current);
            }
        };

        match store.compare_and_swap(task_id, current.version, write).await {
            Ok(task) => {
                debug_assert!(lifecycle::holds_invariant(&task));
                return Ok(task);
            }
            Err(e) if e.is_transient() && attempt < max_attempts => {
                tracing::warn!(task_id, attempt, error = %e, "Task write lost a race, retrying");
            }
            Err(e) => return Err(e),
        }
    }
}

/// Tasks assigned to a user, newest first.
pub async fn tasks_for_user(store: &dyn TaskStore, user_id: &str) -> Result<Vec<Task>> {
    store.query(&TaskFilter::assignee(user_id)).await
}

/// Tasks a mentor owns across all of their interns, newest first.
pub async fn tasks_for_mentor(store: &dyn TaskStore, mentor_id: &str) -> Result<Vec<Task>> {
    store.query(&TaskFilter::mentor(mentor_id)).await
}

pub async fn get_task(store: &dyn TaskStore, task_id: &str) -> Result<Task> {
    store
        .get(task_id)
        .await?
        .ok_or_else(|| TaskError::NotFound(format!("Task {}", task_id)))
}

/// Pending → Incomplete.
pub async fn mark_incomplete(
    store: &dyn TaskStore,
    task_id: &str,
    actor: &Actor,
    max_attempts: u32,
) -> Result<Task> {
    let task = write_with_retry(store, task_id, max_attempts, |task| {
        actor.authorize(task)?;
        let next = lifecycle::apply(task, Transition::MarkIncomplete, Utc::now())?;
        Ok(Some(TaskWrite::task_only(next)))
    })
    .await?;
    tracing::info!(task_id, ?actor, "Task marked incomplete");
    Ok(task)
}

/// Incomplete → Pending.
pub async fn reset_pending(
    store: &dyn TaskStore,
    task_id: &str,
    actor: &Actor,
    max_attempts: u32,
) -> Result<Task> {
    let task = write_with_retry(store, task_id, max_attempts, |task| {
        actor.authorize(task)?;
        let next = lifecycle::apply(task, Transition::ResetPending, Utc::now())?;
        Ok(Some(TaskWrite::task_only(next)))
    })
    .await?;
    tracing::info!(task_id, ?actor, "Task reset to pending");
    Ok(task)
}

/// Mentor override: Completed → Incomplete. The active submission is
/// superseded (kept for audit or dropped) in the same write; a dropped
/// submission's blob is released afterwards.
pub async fn reopen(
    store: &dyn TaskStore,
    blobs: &dyn BlobStore,
    task_id: &str,
    mentor_id: &str,
    retain_superseded: bool,
    max_attempts: u32,
) -> Result<Task> {
    let actor = Actor::Mentor(mentor_id.to_string());
    let mut discarded = None;
    let task = write_with_retry(store, task_id, max_attempts, |task| {
        actor.authorize(task)?;
        let now = Utc::now();
        let next = lifecycle::apply(task, Transition::Reopen, now)?;
        discarded = None;
        let superseded = match task.submission() {
            Some(sub) if retain_superseded => Some(Superseded::Retain {
                submission_id: sub.submission_id.clone(),
                at: now,
            }),
            Some(sub) => {
                discarded = Some(sub.blob.clone());
                Some(Superseded::Discard {
                    submission_id: sub.submission_id.clone(),
                })
            }
            None => None,
        };
        Ok(Some(TaskWrite {
            task: next,
            new_submission: None,
            superseded,
        }))
    })
    .await?;

    if let Some(blob) = discarded {
        release_blob(blobs, task_id, &blob).await;
    }
    tracing::info!(task_id, mentor_id, "Task reopened");
    Ok(task)
}

/// Mentor edit of title/description.
pub async fn edit_task(
    store: &dyn TaskStore,
    task_id: &str,
    mentor_id: &str,
    payload: UpdateTaskPayload,
    max_attempts: u32,
) -> Result<Task> {
    payload.validate()?;
    let actor = Actor::Mentor(mentor_id.to_string());
    write_with_retry(store, task_id, max_attempts, |task| {
        actor.authorize(task)?;
        Ok(Some(TaskWrite::task_only(lifecycle::edit(task, &payload))))
    })
    .await
}

/// Mentor delete. Every evidence blob in the task's history is released
/// best-effort; a failed release only leaves an orphan behind.
pub async fn delete_task(
    store: &dyn TaskStore,
    blobs: &dyn BlobStore,
    task_id: &str,
    mentor_id: &str,
    max_attempts: u32,
) -> Result<()> {
    let actor = Actor::Mentor(mentor_id.to_string());
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;
    let (removed, history) = loop {
        attempt += 1;
        let task = get_task(store, task_id).await?;
        actor.authorize(&task)?;
        // History only changes with the version, so a successful delete
        // proves this read was complete.
        let history = store.submissions_for(task_id).await?;
        match store.delete(task_id, task.version).await {
            Ok(()) => break (task, history),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                tracing::warn!(task_id, attempt, error = %e, "Task delete lost a race, retrying");
            }
            Err(e) => return Err(e),
        }
    };

    let mut released = HashSet::new();
    let active = removed.submission().map(|s| &s.blob);
    for blob in active.into_iter().chain(history.iter().map(|s| &s.blob)) {
        if released.insert(blob.key.as_str()) {
            release_blob(blobs, task_id, blob).await;
        }
    }
    tracing::info!(task_id, mentor_id, blobs = released.len(), "Task deleted");
    Ok(())
}

async fn release_blob(blobs: &dyn BlobStore, task_id: &str, blob: &BlobRef) {
    if let Err(e) = blobs.release(blob).await {
        tracing::warn!(task_id, blob_key = %blob.key, error = %e, "Could not release evidence");
    }
}
