//! Assignment block: composes the atoms into the submission pipeline, the
//! distributor, and the HTTP-facing task handlers.

use std::sync::Arc;

use lms_atoms::{BlobStore, TaskStore, UserDirectory};

pub mod distributor;
pub mod period;
pub mod respond;
pub mod submissions;
pub mod tasks;
pub mod types;

pub use distributor::{AssignmentBatch, AssignmentReport, Distributor};
pub use submissions::{EvidenceFile, PipelineConfig, SubmissionPipeline};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub pipeline: PipelineConfig,
    /// Attempts for mentor-side task writes that lose an optimistic race.
    pub max_write_attempts: u32,
    /// Attempts for each store call of a distribution run (intern listing,
    /// assignment inserts).
    pub max_insert_attempts: u32,
    /// Assignment inserts in flight at once during a run.
    pub distribution_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            max_write_attempts: 3,
            max_insert_attempts: 3,
            distribution_concurrency: 8,
        }
    }
}

/// Stores plus settings; everything a request needs.
#[derive(Clone)]
pub struct Engine {
    pub tasks: Arc<dyn TaskStore>,
    pub users: Arc<dyn UserDirectory>,
    pub blobs: Arc<dyn BlobStore>,
    pub config: EngineConfig,
}

impl Engine {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        users: Arc<dyn UserDirectory>,
        blobs: Arc<dyn BlobStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            tasks,
            users,
            blobs,
            config,
        }
    }

    pub fn pipeline(&self) -> SubmissionPipeline<'_> {
        SubmissionPipeline::new(self.tasks.as_ref(), self.blobs.as_ref(), &self.config.pipeline)
    }

    pub fn distributor(&self) -> Distributor<'_> {
        Distributor::new(self.tasks.as_ref(), self.users.as_ref())
            .with_max_attempts(self.config.max_insert_attempts)
            .with_concurrency(self.config.distribution_concurrency)
    }
}
