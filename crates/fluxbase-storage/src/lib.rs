//! # fluxbase-storage
//!
//! The object storage collaborator contract and its local filesystem
//! implementation. The core talks to storage only through
//! [`StorageBackend`]; an S3-compatible backend slots in behind the
//! same trait, switched by configuration.

pub mod local;
pub mod signed;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fluxbase_core::Error;
use serde::{Deserialize, Serialize};

pub use local::LocalBackend;
pub use signed::UrlSigner;

/// Metadata for one stored object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub path: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn put(&self, bucket: &str, path: &str, data: Vec<u8>) -> Result<ObjectMeta, Error>;

    async fn get(&self, bucket: &str, path: &str) -> Result<(Vec<u8>, ObjectMeta), Error>;

    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<ObjectMeta>, Error>;

    async fn delete(&self, bucket: &str, path: &str) -> Result<(), Error>;

    /// Remove a bucket's objects entirely. Only called after the bucket
    /// row is gone, so a crash leaves orphaned files rather than
    /// dangling metadata.
    async fn delete_bucket(&self, bucket: &str) -> Result<(), Error>;
}
