use serde::{Deserialize, Serialize};

/// Stable reference to stored evidence, returned by the blob store.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BlobRef {
    pub key: String,
    pub url: String,
    pub size_bytes: u64,
    pub sha256: String,
    pub content_type: String,
}

/// What the caller knows about a file before it is stored.
#[derive(Debug, Clone)]
pub struct BlobMetadata {
    pub task_id: String,
    pub user_id: String,
    pub file_name: String,
    pub content_type: String,
}

impl BlobMetadata {
    /// Object key under which the evidence is written. The random segment keeps
    /// retried uploads from overwriting an earlier attempt.
    pub fn object_key(&self) -> String {
        format!(
            "submissions/{}/{}/{}-{}",
            self.task_id,
            self.user_id,
            uuid::Uuid::new_v4(),
            sanitize_file_name(&self.file_name)
        )
    }
}

fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "evidence".to_string()
    } else {
        cleaned
    }
}

/// Hex-encoded SHA-256 of the evidence bytes.
pub fn content_sha256(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}
