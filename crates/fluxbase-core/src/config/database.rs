//! Database connection configuration: the runtime (low-privilege) and
//! admin (DDL/introspection) roles share a host but never a pool.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Login role for the runtime pool. Must not have BYPASSRLS.
    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_database")]
    pub database: String,

    /// libpq-style ssl mode: disable | allow | prefer | require |
    /// verify-ca | verify-full.
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,

    /// Login role for the admin pool (migrations, catalog introspection,
    /// internal tables). Never bound to request-derived input.
    #[serde(default = "default_admin_user")]
    pub admin_user: String,

    #[serde(default)]
    pub admin_password: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_admin_max_connections")]
    pub admin_max_connections: u32,

    /// Per-statement timeout installed with `SET LOCAL` in every request
    /// transaction, milliseconds.
    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,

    /// Schema cache TTL, seconds.
    #[serde(default = "default_schema_cache_ttl_secs")]
    pub schema_cache_ttl_secs: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_user() -> String {
    "fluxbase_runtime".to_string()
}

fn default_database() -> String {
    "fluxbase".to_string()
}

fn default_ssl_mode() -> String {
    "prefer".to_string()
}

fn default_admin_user() -> String {
    "fluxbase_admin".to_string()
}

fn default_max_connections() -> u32 {
    20
}

fn default_admin_max_connections() -> u32 {
    4
}

fn default_statement_timeout_ms() -> u64 {
    25_000
}

fn default_schema_cache_ttl_secs() -> u64 {
    300
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: default_user(),
            password: String::new(),
            database: default_database(),
            ssl_mode: default_ssl_mode(),
            admin_user: default_admin_user(),
            admin_password: String::new(),
            max_connections: default_max_connections(),
            admin_max_connections: default_admin_max_connections(),
            statement_timeout_ms: default_statement_timeout_ms(),
            schema_cache_ttl_secs: default_schema_cache_ttl_secs(),
        }
    }
}
