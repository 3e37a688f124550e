use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;

use super::model::{content_sha256, BlobMetadata, BlobRef};
use crate::error::{Result, TaskError};
use crate::store::BlobStore;

/// Evidence bucket. Objects are never overwritten; every upload gets a fresh key.
#[derive(Clone)]
pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
    public_base_url: String,
}

impl S3BlobStore {
    pub fn new(client: S3Client, bucket: impl Into<String>, public_base_url: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn store(&self, bytes: Vec<u8>, metadata: &BlobMetadata) -> Result<BlobRef> {
        let key = metadata.object_key();
        let sha256 = content_sha256(&bytes);
        let size_bytes = bytes.len() as u64;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(&metadata.content_type)
            .metadata("task_id", &metadata.task_id)
            .metadata("user_id", &metadata.user_id)
            .metadata("sha256", &sha256)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| TaskError::StorageFailure(format!("S3 put_object error: {}", e)))?;

        tracing::info!(bucket = %self.bucket, key = %key, size_bytes, "Evidence stored");

        Ok(BlobRef {
            url: format!("{}/{}", self.public_base_url, key),
            key,
            size_bytes,
            sha256,
            content_type: metadata.content_type.clone(),
        })
    }

    async fn release(&self, blob: &BlobRef) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&blob.key)
            .send()
            .await
            .map_err(|e| TaskError::StorageFailure(format!("S3 delete_object error: {}", e)))?;
        tracing::info!(bucket = %self.bucket, key = %blob.key, "Evidence released");
        Ok(())
    }
}
