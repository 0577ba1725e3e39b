//! Authentication configuration: token TTLs, password policy, denylist
//! behavior, OAuth providers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Shipped default; boot refuses to start until it is replaced.
pub const INSECURE_DEFAULT_JWT_SECRET: &str = "insecure-default-change-me";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC-SHA256 signing secret. At least 32 characters; the shipped
    /// default is rejected at boot.
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,

    #[serde(default = "default_issuer")]
    pub jwt_issuer: String,

    /// Access token TTL, seconds.
    #[serde(default = "default_jwt_expiry_secs")]
    pub jwt_expiry_secs: u64,

    /// Refresh token TTL, seconds.
    #[serde(default = "default_refresh_expiry_secs")]
    pub refresh_expiry_secs: u64,

    /// Magic-link token TTL, seconds.
    #[serde(default = "default_magiclink_ttl_secs")]
    pub magiclink_ttl_secs: u64,

    /// Password-reset token TTL, seconds.
    #[serde(default = "default_password_reset_ttl_secs")]
    pub password_reset_ttl_secs: u64,

    #[serde(default = "default_password_min_length")]
    pub password_min_length: usize,

    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,

    /// When the denylist backing store errors, admit the token instead of
    /// rejecting. Default is strict (reject).
    #[serde(default)]
    pub denylist_fail_open: bool,

    /// In-process denylist cache TTL, seconds. Kept short so revocations
    /// propagate quickly.
    #[serde(default = "default_denylist_cache_ttl_secs")]
    pub denylist_cache_ttl_secs: u64,

    /// Denylist sweep interval, seconds.
    #[serde(default = "default_denylist_sweep_secs")]
    pub denylist_sweep_secs: u64,

    /// OAuth providers keyed by name (`github`, `google`, ...).
    #[serde(default)]
    pub oauth: HashMap<String, OAuthProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthProviderConfig {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    pub authorize_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

fn default_jwt_secret() -> String {
    INSECURE_DEFAULT_JWT_SECRET.to_string()
}

fn default_issuer() -> String {
    "fluxbase".to_string()
}

fn default_jwt_expiry_secs() -> u64 {
    900 // 15 minutes
}

fn default_refresh_expiry_secs() -> u64 {
    7 * 24 * 3600
}

fn default_magiclink_ttl_secs() -> u64 {
    900
}

fn default_password_reset_ttl_secs() -> u64 {
    3600
}

fn default_password_min_length() -> usize {
    12
}

fn default_bcrypt_cost() -> u32 {
    12
}

fn default_denylist_cache_ttl_secs() -> u64 {
    15
}

fn default_denylist_sweep_secs() -> u64 {
    300
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            jwt_issuer: default_issuer(),
            jwt_expiry_secs: default_jwt_expiry_secs(),
            refresh_expiry_secs: default_refresh_expiry_secs(),
            magiclink_ttl_secs: default_magiclink_ttl_secs(),
            password_reset_ttl_secs: default_password_reset_ttl_secs(),
            password_min_length: default_password_min_length(),
            bcrypt_cost: default_bcrypt_cost(),
            denylist_fail_open: false,
            denylist_cache_ttl_secs: default_denylist_cache_ttl_secs(),
            denylist_sweep_secs: default_denylist_sweep_secs(),
            oauth: HashMap::new(),
        }
    }
}
