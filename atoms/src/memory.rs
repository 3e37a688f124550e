//! In-process stores with the same contracts as the DynamoDB and S3 adapters.
//! Used by tests and by local runs without AWS credentials.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::RwLock;

use crate::error::{Result, TaskError};
use crate::media::model::{content_sha256, BlobMetadata, BlobRef};
use crate::store::{BlobStore, Superseded, TaskFilter, TaskStore, TaskWrite, UserDirectory};
use crate::tasks::model::{IdempotencyKey, Submission, Task, TaskTemplate};
use crate::users::model::User;

#[derive(Default)]
struct TaskTables {
    tasks: HashMap<String, Task>,
    submissions: HashMap<String, Vec<Submission>>,
    assignments: HashMap<IdempotencyKey, String>,
    templates: HashMap<String, TaskTemplate>,
}

#[derive(Default)]
pub struct InMemoryTaskStore {
    tables: RwLock<TaskTables>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn task_count(&self) -> usize {
        self.tables.read().await.tasks.len()
    }

    pub async fn all_tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tables.read().await.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        tasks
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn get(&self, task_id: &str) -> Result<Option<Task>> {
        Ok(self.tables.read().await.tasks.get(task_id).cloned())
    }

    async fn query(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        if filter.assignee_id.is_none() && filter.mentor_id.is_none() {
            return Err(TaskError::Validation(
                "task query needs an assignee or a mentor".to_string(),
            ));
        }
        let tables = self.tables.read().await;
        let mut tasks: Vec<Task> = tables
            .tasks
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    async fn compare_and_swap(
        &self,
        task_id: &str,
        expected_version: u64,
        write: TaskWrite,
    ) -> Result<Task> {
        let mut tables = self.tables.write().await;
        let current = tables
            .tasks
            .get(task_id)
            .ok_or_else(|| TaskError::ConcurrentModification(task_id.to_string()))?;
        if current.version != expected_version || write.task.version != expected_version + 1 {
            return Err(TaskError::ConcurrentModification(task_id.to_string()));
        }

        let history = tables.submissions.entry(task_id.to_string()).or_default();
        match &write.superseded {
            Some(Superseded::Retain { submission_id, at }) => {
                if let Some(old) = history.iter_mut().find(|s| &s.submission_id == submission_id) {
                    old.superseded_at = Some(*at);
                }
            }
            Some(Superseded::Discard { submission_id }) => {
                history.retain(|s| &s.submission_id != submission_id);
            }
            None => {}
        }
        if let Some(sub) = write.new_submission {
            history.push(sub);
        }

        tables.tasks.insert(task_id.to_string(), write.task.clone());
        Ok(write.task)
    }

    async fn insert_if_absent(&self, key: &IdempotencyKey, task: &Task) -> Result<bool> {
        let mut tables = self.tables.write().await;
        if tables.assignments.contains_key(key) || tables.tasks.contains_key(&task.task_id) {
            return Ok(false);
        }
        tables.assignments.insert(key.clone(), task.task_id.clone());
        tables.tasks.insert(task.task_id.clone(), task.clone());
        Ok(true)
    }

    async fn delete(&self, task_id: &str, expected_version: u64) -> Result<()> {
        let mut tables = self.tables.write().await;
        match tables.tasks.get(task_id) {
            Some(task) if task.version == expected_version => {
                let direct_key = task.assignment_key().filter(|k| k.is_direct());
                tables.tasks.remove(task_id);
                tables.submissions.remove(task_id);
                if let Some(key) = direct_key {
                    tables.assignments.remove(&key);
                }
                Ok(())
            }
            _ => Err(TaskError::ConcurrentModification(task_id.to_string())),
        }
    }

    async fn submissions_for(&self, task_id: &str) -> Result<Vec<Submission>> {
        Ok(self
            .tables
            .read()
            .await
            .submissions
            .get(task_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_template(&self, template_id: &str) -> Result<Option<TaskTemplate>> {
        Ok(self.tables.read().await.templates.get(template_id).cloned())
    }

    async fn list_templates(&self, mentor_id: Option<&str>) -> Result<Vec<TaskTemplate>> {
        let tables = self.tables.read().await;
        let mut templates: Vec<TaskTemplate> = tables
            .templates
            .values()
            .filter(|t| mentor_id.map_or(true, |m| t.mentor_id == m))
            .cloned()
            .collect();
        templates.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(templates)
    }

    async fn put_template(&self, template: &TaskTemplate) -> Result<()> {
        self.tables
            .write()
            .await
            .templates
            .insert(template.template_id.clone(), template.clone());
        Ok(())
    }
}

/// Blob store keeping bytes in memory. `fail_next` injects storage failures.
#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
    failures_left: AtomicU32,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls to `store` fail with `StorageFailure`.
    pub fn fail_next(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.blobs.read().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn store(&self, bytes: Vec<u8>, metadata: &BlobMetadata) -> Result<BlobRef> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TaskError::StorageFailure(format!(
                "injected failure storing evidence for task {}",
                metadata.task_id
            )));
        }

        let key = metadata.object_key();
        let blob = BlobRef {
            url: format!("memory://{}", key),
            key: key.clone(),
            size_bytes: bytes.len() as u64,
            sha256: content_sha256(&bytes),
            content_type: metadata.content_type.clone(),
        };
        self.blobs.write().await.insert(key, bytes);
        Ok(blob)
    }

    async fn release(&self, blob: &BlobRef) -> Result<()> {
        self.blobs.write().await.remove(&blob.key);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<String, User>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, user: User) {
        self.users.write().await.insert(user.user_id.clone(), user);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        Ok(self.users.read().await.get(user_id).cloned())
    }

    async fn list_interns(&self, mentor_id: &str) -> Result<Vec<User>> {
        let mut interns: Vec<User> = self
            .users
            .read()
            .await
            .values()
            .filter(|u| u.is_intern_of(mentor_id))
            .cloned()
            .collect();
        interns.sort_by(|a, b| a.full_name.cmp(&b.full_name));
        Ok(interns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::lifecycle::{self, Transition};
    use chrono::Utc;

    fn template() -> TaskTemplate {
        TaskTemplate {
            template_id: "tpl".into(),
            mentor_id: "m1".into(),
            title: "Kata".into(),
            description: String::new(),
            recurring: true,
            due_in_days: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_if_absent_claims_key_once() {
        let store = InMemoryTaskStore::new();
        let key = IdempotencyKey::new("tpl", "a1", "2026-W42");
        let first = template().instantiate("a1", Some("2026-W42".into()), Utc::now());
        let second = template().instantiate("a1", Some("2026-W42".into()), Utc::now());

        assert!(store.insert_if_absent(&key, &first).await.unwrap());
        assert!(!store.insert_if_absent(&key, &second).await.unwrap());
        assert_eq!(store.task_count().await, 1);
    }

    #[tokio::test]
    async fn test_cas_rejects_stale_version() {
        let store = InMemoryTaskStore::new();
        let task = template().instantiate("a1", None, Utc::now());
        store
            .insert_if_absent(&IdempotencyKey::direct("tpl", "a1", 0), &task)
            .await
            .unwrap();

        let next = lifecycle::apply(&task, Transition::MarkIncomplete, Utc::now()).unwrap();
        store
            .compare_and_swap(&task.task_id, 0, TaskWrite::task_only(next.clone()))
            .await
            .unwrap();

        // Same expected version again: lost race.
        let err = store
            .compare_and_swap(&task.task_id, 0, TaskWrite::task_only(next))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::ConcurrentModification(_)));
    }

    #[tokio::test]
    async fn test_query_requires_owner() {
        let store = InMemoryTaskStore::new();
        let err = store.query(&TaskFilter::default()).await.unwrap_err();
        assert!(matches!(err, TaskError::Validation(_)));
    }

    #[tokio::test]
    async fn test_blob_failure_injection() {
        let blobs = InMemoryBlobStore::new();
        let meta = BlobMetadata {
            task_id: "t1".into(),
            user_id: "a1".into(),
            file_name: "proof.txt".into(),
            content_type: "text/plain".into(),
        };
        blobs.fail_next(1);
        assert!(matches!(
            blobs.store(b"x".to_vec(), &meta).await,
            Err(TaskError::StorageFailure(_))
        ));
        let blob = blobs.store(b"x".to_vec(), &meta).await.unwrap();
        assert!(blobs.contains(&blob.key).await);
        blobs.release(&blob).await.unwrap();
        assert!(blobs.is_empty().await);
    }
}
