// Re-export model types and service functions
pub mod lifecycle;
pub mod model;
pub mod service;
pub mod store;

pub use lifecycle::Transition;
pub use model::{
    AssignTasksPayload, CreateTemplatePayload, IdempotencyKey, Submission, SubmissionRef, Task,
    TaskState, TaskStatus, TaskTemplate, UpdateTaskPayload,
};
pub use service::*;
pub use store::DynamoTaskStore;
