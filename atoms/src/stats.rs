//! Progress counts, always derived from the task store on read.

use serde::Serialize;
use std::collections::HashMap;

use crate::error::{Result, TaskError};
use crate::store::{TaskFilter, TaskStore, UserDirectory};
use crate::tasks::model::{Task, TaskStatus};
use crate::users::model::{User, UserRole};

/// Three disjoint buckets; `pending + incomplete + completed == total`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub total: usize,
    pub pending: usize,
    pub incomplete: usize,
    pub completed: usize,
}

impl TaskStats {
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let mut stats = TaskStats::default();
        for task in tasks {
            stats.record(task.status());
        }
        stats
    }

    fn record(&mut self, status: TaskStatus) {
        self.total += 1;
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::Incomplete => self.incomplete += 1,
            TaskStatus::Completed => self.completed += 1,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.pending + self.incomplete + self.completed == self.total
    }
}

pub async fn stats_for_user(store: &dyn TaskStore, user_id: &str) -> Result<TaskStats> {
    let tasks = store.query(&TaskFilter::assignee(user_id)).await?;
    Ok(TaskStats::from_tasks(&tasks))
}

/// Dashboard payload for one user. `tasks_done` is the completed subset of
/// `tasks_assigned`, recomputed on every read.
#[derive(Debug, Clone, Serialize)]
pub struct UserProgress {
    pub user: User,
    pub role: UserRole,
    pub stats: TaskStats,
    pub tasks_assigned: Vec<Task>,
    pub tasks_done: Vec<Task>,
}

impl UserProgress {
    pub fn new(user: User, tasks: Vec<Task>) -> Self {
        let stats = TaskStats::from_tasks(&tasks);
        let tasks_done = tasks
            .iter()
            .filter(|t| t.status() == TaskStatus::Completed)
            .cloned()
            .collect();
        Self {
            role: user.role(),
            user,
            stats,
            tasks_assigned: tasks,
            tasks_done,
        }
    }
}

pub async fn progress_for_user(
    store: &dyn TaskStore,
    users: &dyn UserDirectory,
    user_id: &str,
) -> Result<UserProgress> {
    let filter = TaskFilter::assignee(user_id);
    let (user, tasks) = tokio::join!(users.get_user(user_id), store.query(&filter));
    let user = user?.ok_or_else(|| TaskError::NotFound(format!("User {}", user_id)))?;
    Ok(UserProgress::new(user, tasks?))
}

#[derive(Debug, Clone, Serialize)]
pub struct InternSummary {
    pub user: User,
    pub stats: TaskStats,
}

/// A mentor's view over all of their interns.
#[derive(Debug, Clone, Serialize)]
pub struct MentorOverview {
    pub mentor: User,
    pub totals: TaskStats,
    pub interns: Vec<InternSummary>,
}

pub async fn mentor_overview(
    store: &dyn TaskStore,
    users: &dyn UserDirectory,
    mentor_id: &str,
) -> Result<MentorOverview> {
    let mentor = users
        .get_user(mentor_id)
        .await?
        .ok_or_else(|| TaskError::NotFound(format!("User {}", mentor_id)))?;
    if mentor.role() != UserRole::Mentor {
        return Err(TaskError::Validation(format!("user {} is not a mentor", mentor_id)));
    }

    let filter = TaskFilter::mentor(mentor_id);
    let (interns, tasks) = tokio::join!(users.list_interns(mentor_id), store.query(&filter));
    let interns = interns?;
    let tasks = tasks?;

    let mut by_assignee: HashMap<&str, TaskStats> = HashMap::new();
    for task in &tasks {
        by_assignee
            .entry(task.assignee_id.as_str())
            .or_default()
            .record(task.status());
    }

    let summaries = interns
        .into_iter()
        .map(|user| InternSummary {
            stats: by_assignee
                .get(user.user_id.as_str())
                .copied()
                .unwrap_or_default(),
            user,
        })
        .collect();

    Ok(MentorOverview {
        mentor,
        totals: TaskStats::from_tasks(&tasks),
        interns: summaries,
    })
}
