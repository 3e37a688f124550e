//! Domain atoms of the mentorship task engine: models, the task state
//! machine, store capabilities and their DynamoDB/S3/in-memory adapters.

pub mod dynamo;
pub mod error;
pub mod media;
pub mod memory;
pub mod stats;
pub mod store;
pub mod tasks;
pub mod users;

pub use error::{AssignmentFailure, MentorFailure, Result, TaskError};
pub use store::{BlobStore, Superseded, TaskFilter, TaskStore, TaskWrite, UserDirectory};
