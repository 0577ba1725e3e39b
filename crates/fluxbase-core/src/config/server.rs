//! HTTP server configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address, e.g. "0.0.0.0:8080".
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Maximum request body size, bytes.
    #[serde(default = "default_body_limit")]
    pub body_limit: usize,

    /// Wall-clock deadline for a request, seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Deadline for RPC calls, which may legitimately run long.
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,

    /// Hard cap on `limit`; larger requests are clamped.
    #[serde(default = "default_max_rows")]
    pub max_rows: u64,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_body_limit() -> usize {
    2 * 1024 * 1024
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_rpc_timeout_secs() -> u64 {
    300
}

fn default_max_rows() -> u64 {
    1000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            body_limit: default_body_limit(),
            request_timeout_secs: default_request_timeout_secs(),
            rpc_timeout_secs: default_rpc_timeout_secs(),
            max_rows: default_max_rows(),
        }
    }
}
