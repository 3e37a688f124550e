#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use assignments_block::{Engine, EngineConfig, EvidenceFile};
use async_trait::async_trait;
use chrono::Utc;
use lms_atoms::memory::{InMemoryBlobStore, InMemoryTaskStore, InMemoryUserDirectory};
use lms_atoms::tasks::{IdempotencyKey, Submission, Task, TaskTemplate};
use lms_atoms::users::User;
use lms_atoms::{Result, TaskError, TaskFilter, TaskStore, TaskWrite, UserDirectory};

pub struct Harness {
    pub tasks: Arc<InMemoryTaskStore>,
    pub users: Arc<InMemoryUserDirectory>,
    pub blobs: Arc<InMemoryBlobStore>,
    /// Failures injected between the engine and the memory stores.
    pub faults: Arc<Faults>,
    pub engine: Engine,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let tasks = Arc::new(InMemoryTaskStore::new());
        let users = Arc::new(InMemoryUserDirectory::new());
        let blobs = Arc::new(InMemoryBlobStore::new());
        let faults = Arc::new(Faults::default());
        let engine = Engine::new(
            Arc::new(FaultyTaskStore {
                inner: tasks.clone(),
                faults: faults.clone(),
            }),
            Arc::new(FaultyUserDirectory {
                inner: users.clone(),
                faults: faults.clone(),
            }),
            blobs.clone(),
            config,
        );
        Self {
            tasks,
            users,
            blobs,
            faults,
            engine,
        }
    }

    pub async fn mentor(&self, user_id: &str) {
        self.users.insert(user(user_id, None)).await;
    }

    pub async fn intern(&self, user_id: &str, mentor_id: &str) {
        self.users.insert(user(user_id, Some(mentor_id))).await;
    }

    pub async fn template(&self, template_id: &str, mentor_id: &str, recurring: bool) -> TaskTemplate {
        let template = TaskTemplate {
            template_id: template_id.to_string(),
            mentor_id: mentor_id.to_string(),
            title: format!("Template {}", template_id),
            description: String::new(),
            recurring,
            due_in_days: None,
            created_at: Utc::now(),
        };
        self.tasks.put_template(&template).await.unwrap();
        template
    }
}

pub fn user(user_id: &str, mentor_id: Option<&str>) -> User {
    User {
        user_id: user_id.to_string(),
        full_name: format!("User {}", user_id),
        domain: "backend".to_string(),
        mentor_id: mentor_id.map(str::to_string),
        created_at: Utc::now(),
    }
}

pub fn evidence(contents: &str) -> EvidenceFile {
    EvidenceFile {
        file_name: "proof.txt".to_string(),
        content_type: "text/plain".to_string(),
        bytes: contents.as_bytes().to_vec(),
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[derive(Default)]
pub struct Faults {
    /// Writes that land but are then reported as a store timeout.
    pub writes_lost_ack: AtomicU32,
    /// Inserts that land but are then reported as a store timeout.
    pub inserts_lost_ack: AtomicU32,
    /// Every compare-and-swap loses its race.
    pub always_conflict: AtomicBool,
    pub cas_calls: AtomicU32,
    /// Mentors whose intern listing keeps failing.
    pub unreachable_mentors: Mutex<HashSet<String>>,
    pub list_calls: AtomicU32,
}

impl Faults {
    pub fn lose_write_acks(&self, n: u32) {
        self.writes_lost_ack.store(n, Ordering::SeqCst);
    }

    pub fn lose_insert_acks(&self, n: u32) {
        self.inserts_lost_ack.store(n, Ordering::SeqCst);
    }

    pub fn conflict_always(&self) {
        self.always_conflict.store(true, Ordering::SeqCst);
    }

    pub fn unreachable(&self, mentor_id: &str) {
        if let Ok(mut mentors) = self.unreachable_mentors.lock() {
            mentors.insert(mentor_id.to_string());
        }
    }

    pub fn cas_calls(&self) -> u32 {
        self.cas_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> u32 {
        self.list_calls.load(Ordering::SeqCst)
    }
}

pub struct FaultyTaskStore {
    inner: Arc<InMemoryTaskStore>,
    faults: Arc<Faults>,
}

#[async_trait]
impl TaskStore for FaultyTaskStore {
    async fn get(&self, task_id: &str) -> Result<Option<Task>> {
        self.inner.get(task_id).await
    }

    async fn query(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        self.inner.query(filter).await
    }

    async fn compare_and_swap(&self, task_id: &str, expected_version: u64, write: TaskWrite) -> Result<Task> {
        self.faults.cas_calls.fetch_add(1, Ordering::SeqCst);
        if self.faults.always_conflict.load(Ordering::SeqCst) {
            return Err(TaskError::ConcurrentModification(task_id.to_string()));
        }
        let written = self.inner.compare_and_swap(task_id, expected_version, write).await?;
        if take_one(&self.faults.writes_lost_ack) {
            return Err(TaskError::Store("timeout".to_string()));
        }
        Ok(written)
    }

    async fn insert_if_absent(&self, key: &IdempotencyKey, task: &Task) -> Result<bool> {
        let inserted = self.inner.insert_if_absent(key, task).await?;
        if inserted && take_one(&self.faults.inserts_lost_ack) {
            return Err(TaskError::Store("timeout".to_string()));
        }
        Ok(inserted)
    }

    async fn delete(&self, task_id: &str, expected_version: u64) -> Result<()> {
        self.inner.delete(task_id, expected_version).await
    }

    async fn submissions_for(&self, task_id: &str) -> Result<Vec<Submission>> {
        self.inner.submissions_for(task_id).await
    }

    async fn get_template(&self, template_id: &str) -> Result<Option<TaskTemplate>> {
        self.inner.get_template(template_id).await
    }

    async fn list_templates(&self, mentor_id: Option<&str>) -> Result<Vec<TaskTemplate>> {
        self.inner.list_templates(mentor_id).await
    }

    async fn put_template(&self, template: &TaskTemplate) -> Result<()> {
        self.inner.put_template(template).await
    }
}

pub struct FaultyUserDirectory {
    inner: Arc<InMemoryUserDirectory>,
    faults: Arc<Faults>,
}

#[async_trait]
impl UserDirectory for FaultyUserDirectory {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        self.inner.get_user(user_id).await
    }

    async fn list_interns(&self, mentor_id: &str) -> Result<Vec<User>> {
        self.faults.list_calls.fetch_add(1, Ordering::SeqCst);
        let unreachable = self
            .faults
            .unreachable_mentors
            .lock()
            .map(|mentors| mentors.contains(mentor_id))
            .unwrap_or(false);
        if unreachable {
            return Err(TaskError::Store(format!("directory timeout for {}", mentor_id)));
        }
        self.inner.list_interns(mentor_id).await
    }
}
