//! Security configuration: setup token and the service-role key.

use serde::{Deserialize, Serialize};

/// Shipped default; boot refuses to start until it is replaced.
pub const INSECURE_DEFAULT_SETUP_TOKEN: &str = "setup-token-change-me";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// One-time setup token for administrative bootstrap endpoints.
    #[serde(default = "default_setup_token")]
    pub setup_token: String,

    /// The opaque service-role key. When set, its SHA-256 hash is compared
    /// against presented keys; when unset, service-key auth is disabled.
    #[serde(default)]
    pub service_key: Option<String>,
}

fn default_setup_token() -> String {
    INSECURE_DEFAULT_SETUP_TOKEN.to_string()
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            setup_token: default_setup_token(),
            service_key: None,
        }
    }
}
