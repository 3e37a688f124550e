//! Process-wide state shared by the lambdas: configuration, AWS clients and
//! the engine wired to them.

pub mod config;
pub mod cors;

use std::sync::Arc;

use assignments_block::Engine;
use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_s3::Client as S3Client;
use lms_atoms::media::S3BlobStore;
use lms_atoms::tasks::DynamoTaskStore;
use lms_atoms::users::DynamoUserDirectory;

pub use config::{Config, ConfigError};

pub struct AppState {
    pub config: Config,
    pub engine: Engine,
}

impl AppState {
    /// Build clients from the Lambda environment.
    pub async fn from_env() -> Result<Self, ConfigError> {
        let config = Config::from_env()?;
        let aws = aws_config::load_from_env().await;
        let dynamo_client = DynamoClient::new(&aws);
        let s3_client = S3Client::new(&aws);
        Ok(Self::new(config, dynamo_client, s3_client))
    }

    pub fn new(config: Config, dynamo_client: DynamoClient, s3_client: S3Client) -> Self {
        let tasks = Arc::new(DynamoTaskStore::new(dynamo_client.clone(), &config.table_name));
        let users = Arc::new(DynamoUserDirectory::new(dynamo_client, &config.table_name));
        let blobs = Arc::new(S3BlobStore::new(
            s3_client,
            &config.bucket_name,
            &config.public_blob_base_url,
        ));
        let engine = Engine::new(tasks, users, blobs, config.engine.clone());

        tracing::info!(
            table = %config.table_name,
            bucket = %config.bucket_name,
            allow_resubmission = config.engine.pipeline.allow_resubmission,
            "Engine initialised"
        );

        Self { config, engine }
    }
}
