use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TaskError;
use crate::media::model::BlobRef;

/// Tri-state progress of a task as reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Never acted on.
    Pending,
    /// Explicitly marked not done.
    Incomplete,
    /// A submission was accepted.
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Incomplete => "incomplete",
            TaskStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "incomplete" => Some(TaskStatus::Incomplete),
            "completed" => Some(TaskStatus::Completed),
            _ => None,
        }
    }
}

/// Pointer from a task to its active submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRef {
    pub submission_id: String,
    pub blob: BlobRef,
}

/// Lifecycle state. `Completed` owns the submission reference, so a completed
/// task without a submission cannot be represented.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "submission", rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Incomplete,
    Completed(SubmissionRef),
}

impl TaskState {
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskState::Pending => TaskStatus::Pending,
            TaskState::Incomplete => TaskStatus::Incomplete,
            TaskState::Completed(_) => TaskStatus::Completed,
        }
    }

    pub fn submission(&self) -> Option<&SubmissionRef> {
        match self {
            TaskState::Completed(sub) => Some(sub),
            _ => None,
        }
    }
}

/// Task domain model - one assignee's copy of a template
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Task {
    pub task_id: String,
    pub template_id: String,
    pub title: String,
    pub description: String,
    pub assignee_id: String,
    pub mentor_id: String,

    #[serde(flatten)]
    pub state: TaskState,

    /// Distribution run that produced this task: a schedule period such as
    /// `2026-W42`, or `direct#<n>` for the n-th direct assignment.
    pub period_id: Option<String>,
    pub due_at: Option<DateTime<Utc>>,

    /// Optimistic concurrency token, bumped on every write.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub transitioned_at: DateTime<Utc>,
}

impl Task {
    pub fn status(&self) -> TaskStatus {
        self.state.status()
    }

    pub fn submission(&self) -> Option<&SubmissionRef> {
        self.state.submission()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.due_at.map(|due| due < now).unwrap_or(false)
    }

    /// Key this task was created under, if it came from the distributor.
    pub fn assignment_key(&self) -> Option<IdempotencyKey> {
        self.period_id
            .as_deref()
            .map(|period| IdempotencyKey::new(&self.template_id, &self.assignee_id, period))
    }

    /// Generation number of a direct assignment (`direct#<n>`).
    pub fn direct_generation(&self) -> Option<usize> {
        self.period_id
            .as_deref()?
            .strip_prefix("direct#")?
            .parse()
            .ok()
    }

    /// Still owed by the assignee: not completed and not past due.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status() != TaskStatus::Completed && !self.is_expired(now)
    }
}

/// Reusable definition from which per-user tasks are created.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TaskTemplate {
    pub template_id: String,
    pub mentor_id: String,
    pub title: String,
    pub description: String,
    /// Included in scheduled distribution runs.
    pub recurring: bool,
    pub due_in_days: Option<u32>,
    pub created_at: DateTime<Utc>,
}

impl TaskTemplate {
    /// Instantiate a pending task for one assignee.
    pub fn instantiate(
        &self,
        assignee_id: &str,
        period_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Task {
        Task {
            task_id: uuid::Uuid::new_v4().to_string(),
            template_id: self.template_id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            assignee_id: assignee_id.to_string(),
            mentor_id: self.mentor_id.clone(),
            state: TaskState::Pending,
            period_id,
            due_at: self
                .due_in_days
                .map(|days| now + Duration::days(i64::from(days))),
            version: 0,
            created_at: now,
            transitioned_at: now,
        }
    }
}

/// Evidence of completion. Immutable except for the superseded marker.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Submission {
    pub submission_id: String,
    pub task_id: String,
    pub user_id: String,
    pub blob: BlobRef,
    pub submitted_at: DateTime<Utc>,
    pub superseded_at: Option<DateTime<Utc>>,
}

impl Submission {
    pub fn new(task_id: &str, user_id: &str, blob: BlobRef, now: DateTime<Utc>) -> Self {
        Self {
            submission_id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.to_string(),
            user_id: user_id.to_string(),
            blob,
            submitted_at: now,
            superseded_at: None,
        }
    }

    pub fn to_ref(&self) -> SubmissionRef {
        SubmissionRef {
            submission_id: self.submission_id.clone(),
            blob: self.blob.clone(),
        }
    }
}

/// Stable tuple identifying one logical assignment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct IdempotencyKey {
    pub template_id: String,
    pub user_id: String,
    pub period_id: String,
}

impl IdempotencyKey {
    pub fn new(template_id: &str, user_id: &str, period_id: &str) -> Self {
        Self {
            template_id: template_id.to_string(),
            user_id: user_id.to_string(),
            period_id: period_id.to_string(),
        }
    }

    /// Key for the `n`-th direct assignment of a template to a user.
    pub fn direct(template_id: &str, user_id: &str, generation: usize) -> Self {
        Self::new(template_id, user_id, &format!("direct#{}", generation))
    }

    /// Direct-assignment keys are released when their task is deleted so the
    /// template can be assigned again; scheduled keys stay claimed.
    pub fn is_direct(&self) -> bool {
        self.period_id.starts_with("direct#")
    }

    pub fn as_item_key(&self) -> String {
        format!(
            "ASSIGNMENT#{}#{}#{}",
            self.template_id, self.user_id, self.period_id
        )
    }
}

fn require_text(field: &str, value: &str, max_len: usize) -> Result<(), TaskError> {
    if value.trim().is_empty() {
        return Err(TaskError::Validation(format!("{} must not be empty", field)));
    }
    if value.chars().count() > max_len {
        return Err(TaskError::Validation(format!(
            "{} must be at most {} characters",
            field, max_len
        )));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateTemplatePayload {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub recurring: bool,
    pub due_in_days: Option<u32>,
}

impl CreateTemplatePayload {
    pub fn validate(&self) -> Result<(), TaskError> {
        require_text("title", &self.title, 200)?;
        if self.description.chars().count() > 5000 {
            return Err(TaskError::Validation(
                "description must be at most 5000 characters".to_string(),
            ));
        }
        if self.due_in_days == Some(0) {
            return Err(TaskError::Validation(
                "due_in_days must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn into_template(self, mentor_id: &str, now: DateTime<Utc>) -> TaskTemplate {
        TaskTemplate {
            template_id: uuid::Uuid::new_v4().to_string(),
            mentor_id: mentor_id.to_string(),
            title: self.title.trim().to_string(),
            description: self.description,
            recurring: self.recurring,
            due_in_days: self.due_in_days,
            created_at: now,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssignTasksPayload {
    pub template_id: String,
    pub user_ids: Vec<String>,
}

impl AssignTasksPayload {
    pub fn validate(&self) -> Result<(), TaskError> {
        require_text("template_id", &self.template_id, 64)?;
        if self.user_ids.is_empty() {
            return Err(TaskError::Validation(
                "user_ids must name at least one user".to_string(),
            ));
        }
        for user_id in &self.user_ids {
            require_text("user_ids[]", user_id, 64)?;
        }
        Ok(())
    }
}

/// Mentor edit of the descriptive fields. Status is never edited directly.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateTaskPayload {
    pub title: Option<String>,
    pub description: Option<String>,
}

impl UpdateTaskPayload {
    pub fn validate(&self) -> Result<(), TaskError> {
        if self.title.is_none() && self.description.is_none() {
            return Err(TaskError::Validation(
                "nothing to update: provide title or description".to_string(),
            ));
        }
        if let Some(title) = &self.title {
            require_text("title", title, 200)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(due_in_days: Option<u32>) -> TaskTemplate {
        TaskTemplate {
            template_id: "tpl-1".into(),
            mentor_id: "mentor-1".into(),
            title: "Write a parser".into(),
            description: "Use nom".into(),
            recurring: false,
            due_in_days,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_instantiate_is_pending() {
        let now = Utc::now();
        let task = template(Some(7)).instantiate("intern-1", None, now);
        assert_eq!(task.status(), TaskStatus::Pending);
        assert!(task.submission().is_none());
        assert_eq!(task.mentor_id, "mentor-1");
        assert_eq!(task.due_at, Some(now + Duration::days(7)));
        assert!(task.is_active(now));
        assert!(!task.is_active(now + Duration::days(8)));
        assert!(task.assignment_key().is_none());
    }

    #[test]
    fn test_direct_generation() {
        let task = template(None).instantiate("intern-1", Some("direct#3".into()), Utc::now());
        assert_eq!(task.direct_generation(), Some(3));
        assert_eq!(
            task.assignment_key(),
            Some(IdempotencyKey::direct("tpl-1", "intern-1", 3))
        );
        let scheduled = template(None).instantiate("intern-1", Some("2026-W42".into()), Utc::now());
        assert_eq!(scheduled.direct_generation(), None);
    }

    #[test]
    fn test_status_serializes_as_three_states() {
        let task = template(None).instantiate("intern-1", Some("2026-W42".into()), Utc::now());
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["status"], "pending");
        assert!(json.get("submission").is_none());
        assert_eq!(TaskStatus::parse("incomplete"), Some(TaskStatus::Incomplete));
        assert_eq!(TaskStatus::parse("true"), None);
    }

    #[test]
    fn test_payloads_reject_unknown_fields() {
        let body = br#"{"template_id":"t","user_ids":["a"],"status":true}"#;
        assert!(serde_json::from_slice::<AssignTasksPayload>(body).is_err());
    }

    #[test]
    fn test_assign_payload_validation() {
        let empty = AssignTasksPayload {
            template_id: "tpl".into(),
            user_ids: vec![],
        };
        assert!(matches!(empty.validate(), Err(TaskError::Validation(_))));

        let blank = AssignTasksPayload {
            template_id: "tpl".into(),
            user_ids: vec!["  ".into()],
        };
        assert!(matches!(blank.validate(), Err(TaskError::Validation(_))));
    }

    #[test]
    fn test_update_payload_requires_a_field() {
        let payload = UpdateTaskPayload {
            title: None,
            description: None,
        };
        assert!(payload.validate().is_err());
    }

    #[test]
    fn test_idempotency_item_key() {
        let key = IdempotencyKey::new("tpl", "u1", "2026-W42");
        assert_eq!(key.as_item_key(), "ASSIGNMENT#tpl#u1#2026-W42");
        let direct = IdempotencyKey::direct("tpl", "u1", 2);
        assert_eq!(direct.period_id, "direct#2");
        assert!(direct.is_direct());
        assert!(!key.is_direct());
    }
}
