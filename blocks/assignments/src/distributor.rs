//! Assignment distributor.
//!
//! Direct and scheduled runs differ only in how the batch is planned. Every
//! planned entry is committed through `insert_if_absent` on its idempotency
//! key, so a repeated run (or two racing runs) creates each task at most once.
//! Per-user failures are collected into the report and never undo the users
//! that were committed. A mentor whose interns cannot be listed is reported
//! separately, since none of its users were ever planned.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use lms_atoms::tasks::{AssignTasksPayload, IdempotencyKey, Task, TaskTemplate};
use lms_atoms::users::User;
use lms_atoms::{
    AssignmentFailure, MentorFailure, Result, TaskError, TaskFilter, TaskStore, UserDirectory,
};
use serde::Serialize;

use crate::period::validate_period_id;

/// One (template, user) pair owed in this run.
#[derive(Debug, Clone)]
pub struct BatchEntry {
    pub key: IdempotencyKey,
    pub task: Task,
}

/// Planned work of one distribution run. Users that could not even be
/// planned are carried as failures.
#[derive(Debug, Default)]
pub struct AssignmentBatch {
    pub run: String,
    pub entries: Vec<BatchEntry>,
    pub skipped: Vec<String>,
    pub failures: Vec<AssignmentFailure>,
    pub unreached: Vec<MentorFailure>,
}

impl AssignmentBatch {
    fn new(run: impl Into<String>) -> Self {
        Self {
            run: run.into(),
            ..Default::default()
        }
    }

    fn fail(&mut self, user_id: &str, error: &TaskError) {
        self.failures.push(failure(user_id.to_string(), error));
    }
}

/// Outcome of a distribution run.
#[derive(Debug, Serialize)]
pub struct AssignmentReport {
    pub run: String,
    pub created: Vec<Task>,
    /// Users whose key was already claimed or who hold an active task.
    pub skipped: Vec<String>,
    pub failures: Vec<AssignmentFailure>,
    /// Mentors whose interns could not be listed this run.
    pub unreached: Vec<MentorFailure>,
}

impl AssignmentReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.unreached.is_empty()
    }

    /// Surface per-user and per-mentor failures as `PartialBatchFailure`.
    pub fn into_result(self) -> Result<Self> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(TaskError::PartialBatchFailure {
                committed: self.created.len(),
                failures: self.failures,
                unreached: self.unreached,
            })
        }
    }
}

enum Committed {
    Created(Task),
    Skipped(String),
    Failed(AssignmentFailure),
}

pub struct Distributor<'a> {
    tasks: &'a dyn TaskStore,
    users: &'a dyn UserDirectory,
    /// Attempts per store call that fails transiently.
    max_attempts: u32,
    concurrency: usize,
}

impl<'a> Distributor<'a> {
    pub fn new(tasks: &'a dyn TaskStore, users: &'a dyn UserDirectory) -> Self {
        Self {
            tasks,
            users,
            max_attempts: 3,
            concurrency: 8,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Mentor assigns one of their templates to a set of their interns.
    pub async fn assign_direct(
        &self,
        mentor_id: &str,
        payload: AssignTasksPayload,
    ) -> Result<AssignmentReport> {
        payload.validate()?;
        let template = self
            .tasks
            .get_template(&payload.template_id)
            .await?
            .ok_or_else(|| TaskError::NotFound(format!("Template {}", payload.template_id)))?;
        if template.mentor_id != mentor_id {
            return Err(TaskError::Forbidden(format!(
                "template {} belongs to another mentor",
                template.template_id
            )));
        }

        let now = Utc::now();
        let mut batch = AssignmentBatch::new("direct");
        let mut seen = HashSet::new();
        for user_id in payload.user_ids.iter().map(|id| id.trim()) {
            if !seen.insert(user_id.to_string()) {
                continue;
            }
            match self.plan_direct(&template, user_id, now).await {
                Ok(Some(entry)) => batch.entries.push(entry),
                Ok(None) => batch.skipped.push(user_id.to_string()),
                Err(e) => batch.fail(user_id, &e),
            }
        }

        tracing::info!(
            mentor_id,
            template_id = %template.template_id,
            planned = batch.entries.len(),
            skipped = batch.skipped.len(),
            rejected = batch.failures.len(),
            "Direct assignment planned"
        );
        Ok(self.commit(batch).await)
    }

    async fn plan_direct(
        &self,
        template: &TaskTemplate,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<BatchEntry>> {
        let user = self
            .users
            .get_user(user_id)
            .await?
            .ok_or_else(|| TaskError::NotFound(format!("User {}", user_id)))?;
        if !user.is_intern_of(&template.mentor_id) {
            return Err(TaskError::Forbidden(format!(
                "user {} is not an intern of mentor {}",
                user_id, template.mentor_id
            )));
        }

        let held = self
            .tasks
            .query(&TaskFilter::assignee(user_id).with_template(&template.template_id))
            .await?;
        if held.iter().any(|t| t.is_active(now)) {
            return Ok(None);
        }

        let generation = held
            .iter()
            .filter_map(Task::direct_generation)
            .max()
            .map_or(0, |g| g + 1);
        let key = IdempotencyKey::direct(&template.template_id, user_id, generation);
        let task = template.instantiate(user_id, Some(key.period_id.clone()), now);
        Ok(Some(BatchEntry { key, task }))
    }

    /// Scheduled entry point. Safe to call any number of times per period.
    pub async fn run_scheduled(&self, period_id: &str) -> Result<AssignmentReport> {
        validate_period_id(period_id)?;
        let templates: Vec<TaskTemplate> = self
            .tasks
            .list_templates(None)
            .await?
            .into_iter()
            .filter(|t| t.recurring)
            .collect();

        let now = Utc::now();
        let mut batch = AssignmentBatch::new(period_id);
        let mut interns_by_mentor: HashMap<String, Vec<User>> = HashMap::new();
        for template in &templates {
            if !interns_by_mentor.contains_key(&template.mentor_id) {
                let interns = match self.list_interns(&template.mentor_id).await {
                    Ok(interns) => interns,
                    Err(e) => {
                        tracing::error!(
                            mentor_id = %template.mentor_id,
                            error = %e,
                            "Could not list interns for scheduled run"
                        );
                        batch.unreached.push(MentorFailure {
                            mentor_id: template.mentor_id.clone(),
                            kind: e.kind(),
                            reason: e.to_string(),
                        });
                        Vec::new()
                    }
                };
                interns_by_mentor.insert(template.mentor_id.clone(), interns);
            }
            for intern in interns_by_mentor.get(&template.mentor_id).into_iter().flatten() {
                let key = IdempotencyKey::new(&template.template_id, &intern.user_id, period_id);
                let task = template.instantiate(&intern.user_id, Some(period_id.to_string()), now);
                batch.entries.push(BatchEntry { key, task });
            }
        }

        tracing::info!(
            period_id,
            templates = templates.len(),
            planned = batch.entries.len(),
            "Scheduled distribution planned"
        );
        Ok(self.commit(batch).await)
    }

    async fn list_interns(&self, mentor_id: &str) -> Result<Vec<User>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.users.list_interns(mentor_id).await {
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    tracing::warn!(mentor_id, attempt, error = %e, "Listing interns failed, retrying");
                }
                result => return result,
            }
        }
    }

    async fn commit(&self, batch: AssignmentBatch) -> AssignmentReport {
        let AssignmentBatch {
            run,
            entries,
            mut skipped,
            mut failures,
            unreached,
        } = batch;

        let outcomes: Vec<Committed> = stream::iter(entries)
            .map(|entry| self.commit_entry(entry))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut created = Vec::new();
        for outcome in outcomes {
            match outcome {
                Committed::Created(task) => created.push(task),
                Committed::Skipped(user_id) => skipped.push(user_id),
                Committed::Failed(failure) => failures.push(failure),
            }
        }
        created.sort_by(|a, b| a.assignee_id.cmp(&b.assignee_id));

        if failures.is_empty() && unreached.is_empty() {
            tracing::info!(run = %run, created = created.len(), skipped = skipped.len(), "Distribution committed");
        } else {
            tracing::warn!(
                run = %run,
                created = created.len(),
                skipped = skipped.len(),
                failed = failures.len(),
                unreached = unreached.len(),
                "Distribution partially failed"
            );
        }

        AssignmentReport {
            run,
            created,
            skipped,
            failures,
            unreached,
        }
    }

    async fn commit_entry(&self, entry: BatchEntry) -> Committed {
        let user_id = entry.key.user_id.clone();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.tasks.insert_if_absent(&entry.key, &entry.task).await {
                Ok(true) => return Committed::Created(entry.task),
                Ok(false) if attempt == 1 => return Committed::Skipped(user_id),
                // The key is claimed, but an earlier attempt that reported an
                // error may have been the one to claim it. Task ids are unique
                // per entry, so our task existing means we created it.
                Ok(false) => {
                    return match self.tasks.get(&entry.task.task_id).await {
                        Ok(Some(task)) => Committed::Created(task),
                        Ok(None) => Committed::Skipped(user_id),
                        Err(e) => Committed::Failed(failure(user_id, &e)),
                    }
                }
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    tracing::warn!(user_id = %user_id, attempt, error = %e, "Assignment insert failed, retrying");
                }
                Err(e) => return Committed::Failed(failure(user_id, &e)),
            }
        }
    }
}

fn failure(user_id: String, error: &TaskError) -> AssignmentFailure {
    AssignmentFailure {
        user_id,
        kind: error.kind(),
        reason: error.to_string(),
    }
}
