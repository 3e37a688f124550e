// Evidence files: model + S3 adapter
pub mod model;
pub mod store;

pub use model::{content_sha256, BlobMetadata, BlobRef};
pub use store::S3BlobStore;
