use base64::{engine::general_purpose::STANDARD, Engine as _};
use lms_atoms::tasks::{Submission, Task};
use lms_atoms::users::User;
use lms_atoms::{Result, TaskError};
use serde::{Deserialize, Serialize};

use crate::submissions::EvidenceFile;

fn default_content_type() -> String {
    "application/octet-stream".to_string()
}

// ========== SUBMISSION ==========
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmitTaskRequest {
    pub task_id: String,
    pub user_id: String,
    pub file_name: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    /// File contents, standard base64.
    pub file_base64: String,
}

impl SubmitTaskRequest {
    pub fn into_evidence(self) -> Result<(String, String, EvidenceFile)> {
        if self.task_id.trim().is_empty() || self.user_id.trim().is_empty() {
            return Err(TaskError::Validation("task_id and user_id are required".to_string()));
        }
        let bytes = STANDARD
            .decode(self.file_base64.trim())
            .map_err(|e| TaskError::Validation(format!("file_base64 is not valid base64: {}", e)))?;
        Ok((
            self.task_id,
            self.user_id,
            EvidenceFile {
                file_name: self.file_name,
                content_type: self.content_type,
                bytes,
            },
        ))
    }
}

// ========== TASK DETAIL ==========
/// A task with its people resolved. Either side is `None` when the user
/// record no longer exists.
#[derive(Debug, Serialize)]
pub struct TaskWithPeople {
    #[serde(flatten)]
    pub task: Task,
    pub assignee: Option<User>,
    pub mentor: Option<User>,
    /// Active and superseded submissions, oldest first.
    pub submissions: Vec<Submission>,
}

// ========== CRON ==========
#[derive(Debug, Serialize)]
pub struct DistributionSummary {
    pub period_id: String,
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
    pub unreached_mentors: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_request_decodes_file() {
        let req: SubmitTaskRequest = serde_json::from_str(
            r#"{"task_id":"t1","user_id":"a1","file_name":"proof.txt","file_base64":"aGVsbG8="}"#,
        )
        .unwrap();
        let (task_id, user_id, file) = req.into_evidence().unwrap();
        assert_eq!(task_id, "t1");
        assert_eq!(user_id, "a1");
        assert_eq!(file.bytes, b"hello");
        assert_eq!(file.content_type, "application/octet-stream");
    }

    #[test]
    fn test_submit_request_rejects_bad_base64() {
        let req: SubmitTaskRequest = serde_json::from_str(
            r#"{"task_id":"t1","user_id":"a1","file_name":"p","file_base64":"***"}"#,
        )
        .unwrap();
        assert!(matches!(req.into_evidence(), Err(TaskError::Validation(_))));
    }

    #[test]
    fn test_submit_request_rejects_status_field() {
        let parsed = serde_json::from_str::<SubmitTaskRequest>(
            r#"{"task_id":"t1","user_id":"a1","file_name":"p","file_base64":"","status":"completed"}"#,
        );
        assert!(parsed.is_err());
    }
}
