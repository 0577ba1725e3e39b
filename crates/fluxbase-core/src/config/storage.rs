//! Object storage configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    Local,
    S3,
}

impl FromStr for StorageBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(StorageBackendKind::Local),
            "s3" => Ok(StorageBackendKind::S3),
            other => Err(format!("unknown storage backend: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackendKind,

    /// Root directory for the local backend.
    #[serde(default = "default_local_root")]
    pub local_root: PathBuf,

    /// Default TTL for signed URLs, seconds.
    #[serde(default = "default_signed_url_ttl_secs")]
    pub signed_url_ttl_secs: u64,
}

fn default_backend() -> StorageBackendKind {
    StorageBackendKind::Local
}

fn default_local_root() -> PathBuf {
    PathBuf::from("data/storage")
}

fn default_signed_url_ttl_secs() -> u64 {
    3600
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            local_root: default_local_root(),
            signed_url_ttl_secs: default_signed_url_ttl_secs(),
        }
    }
}
