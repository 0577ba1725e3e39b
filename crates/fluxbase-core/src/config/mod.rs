//! Configuration for the Fluxbase server.
//!
//! Configuration is hierarchical: a TOML file (`fluxbase.toml`, overridable
//! via `FLUXBASE_CONFIG`) provides the base, then environment variables
//! override individual keys using `SECTION_KEY` names (`DATABASE_HOST`,
//! `AUTH_JWT_SECRET`, ...). Boot-time validation refuses to start on the
//! shipped secret defaults.

pub mod auth;
pub mod database;
pub mod realtime;
pub mod security;
pub mod server;
pub mod storage;

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::{env, fs};

pub use auth::{AuthConfig, OAuthProviderConfig};
pub use database::DatabaseConfig;
pub use realtime::RealtimeConfig;
pub use security::SecurityConfig;
pub use server::ServerConfig;
pub use storage::{StorageBackendKind, StorageConfig};

/// Complete Fluxbase configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Load the config file (if present), apply environment overrides,
    /// and validate. This is the only path the binary uses.
    pub fn load() -> Result<Self, Error> {
        let mut cfg = match read_config_file()? {
            Some(cfg) => cfg,
            None => AppConfig::default(),
        };
        let vars: HashMap<String, String> = env::vars().collect();
        cfg.apply_env_overrides(&vars)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply `SECTION_KEY` environment overrides. Unknown variables are
    /// ignored; malformed values for known keys are errors.
    pub fn apply_env_overrides(&mut self, vars: &HashMap<String, String>) -> Result<(), Error> {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, Error>
        where
            T::Err: std::fmt::Display,
        {
            value
                .parse()
                .map_err(|e| Error::BadRequest(format!("invalid value for {key}: {e}")))
        }

        for (key, value) in vars {
            match key.as_str() {
                "DATABASE_HOST" => self.database.host = value.clone(),
                "DATABASE_PORT" => self.database.port = parse(key, value)?,
                "DATABASE_USER" => self.database.user = value.clone(),
                "DATABASE_PASSWORD" => self.database.password = value.clone(),
                "DATABASE_DATABASE" => self.database.database = value.clone(),
                "DATABASE_SSL_MODE" => self.database.ssl_mode = value.clone(),
                "DATABASE_ADMIN_USER" => self.database.admin_user = value.clone(),
                "DATABASE_ADMIN_PASSWORD" => self.database.admin_password = value.clone(),
                "DATABASE_MAX_CONNECTIONS" => {
                    self.database.max_connections = parse(key, value)?;
                }
                "AUTH_JWT_SECRET" => self.auth.jwt_secret = value.clone(),
                "AUTH_JWT_EXPIRY" => self.auth.jwt_expiry_secs = parse(key, value)?,
                "AUTH_REFRESH_EXPIRY" => self.auth.refresh_expiry_secs = parse(key, value)?,
                "AUTH_PASSWORD_MIN_LENGTH" => {
                    self.auth.password_min_length = parse(key, value)?;
                }
                "AUTH_BCRYPT_COST" => self.auth.bcrypt_cost = parse(key, value)?,
                "SERVER_BIND" => self.server.bind = value.clone(),
                "SERVER_BODY_LIMIT" => self.server.body_limit = parse(key, value)?,
                "SECURITY_SETUP_TOKEN" => self.security.setup_token = value.clone(),
                "SECURITY_SERVICE_KEY" => self.security.service_key = Some(value.clone()),
                "REALTIME_ENABLED" => self.realtime.enabled = parse(key, value)?,
                "REALTIME_HEARTBEAT_INTERVAL" => {
                    self.realtime.heartbeat_interval_secs = parse(key, value)?;
                }
                "REALTIME_MAX_CONNECTIONS" => {
                    self.realtime.max_connections = parse(key, value)?;
                }
                "STORAGE_BACKEND" => {
                    self.storage.backend = parse(key, value)?;
                }
                "STORAGE_LOCAL_ROOT" => self.storage.local_root = PathBuf::from(value),
                _ => {}
            }
        }
        Ok(())
    }

    /// Boot-time validation. Configuration problems are the one fatal
    /// path in the process; everything after boot returns error kinds.
    pub fn validate(&self) -> Result<(), Error> {
        let mut problems = Vec::new();

        if self.auth.jwt_secret.len() < 32 {
            problems.push("AUTH_JWT_SECRET must be at least 32 characters".to_string());
        }
        if self.auth.jwt_secret == auth::INSECURE_DEFAULT_JWT_SECRET {
            problems.push("AUTH_JWT_SECRET is still the shipped default".to_string());
        }
        if self.security.setup_token == security::INSECURE_DEFAULT_SETUP_TOKEN {
            problems.push("SECURITY_SETUP_TOKEN is still the shipped default".to_string());
        }
        if !(4..=31).contains(&self.auth.bcrypt_cost) {
            problems.push(format!(
                "AUTH_BCRYPT_COST must be between 4 and 31, got {}",
                self.auth.bcrypt_cost
            ));
        }
        if self.auth.password_min_length < 8 {
            problems.push("AUTH_PASSWORD_MIN_LENGTH must be at least 8".to_string());
        }
        if !matches!(
            self.database.ssl_mode.as_str(),
            "disable" | "allow" | "prefer" | "require" | "verify-ca" | "verify-full"
        ) {
            problems.push(format!(
                "DATABASE_SSL_MODE must be a libpq ssl mode, got {}",
                self.database.ssl_mode
            ));
        }
        if self.server.body_limit == 0 {
            problems.push("SERVER_BODY_LIMIT must be non-zero".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::BadRequest(format!(
                "configuration invalid: {}",
                problems.join("; ")
            )))
        }
    }
}

fn read_config_file() -> Result<Option<AppConfig>, Error> {
    let path = match env::var("FLUXBASE_CONFIG") {
        Ok(p) => PathBuf::from(p),
        Err(_) => PathBuf::from("fluxbase.toml"),
    };
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(&path)
        .map_err(|e| Error::BadRequest(format!("cannot read {}: {e}", path.display())))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| Error::BadRequest(format!("cannot parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.auth.jwt_secret = "0123456789abcdef0123456789abcdef".into();
        cfg.security.setup_token = "not-the-default".into();
        cfg
    }

    #[test]
    fn default_secrets_refuse_boot() {
        let cfg = AppConfig::default();
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("AUTH_JWT_SECRET"));
        assert!(err.contains("SECURITY_SETUP_TOKEN"));
    }

    #[test]
    fn valid_config_passes() {
        valid_config().validate().unwrap();
    }

    #[test]
    fn short_jwt_secret_is_rejected() {
        let mut cfg = valid_config();
        cfg.auth.jwt_secret = "short".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_overrides_take_effect() {
        let mut cfg = valid_config();
        let vars = HashMap::from([
            ("DATABASE_HOST".to_string(), "db.internal".to_string()),
            ("DATABASE_PORT".to_string(), "6432".to_string()),
            ("AUTH_JWT_EXPIRY".to_string(), "600".to_string()),
            ("REALTIME_ENABLED".to_string(), "false".to_string()),
            ("UNRELATED_VAR".to_string(), "ignored".to_string()),
        ]);
        cfg.apply_env_overrides(&vars).unwrap();
        assert_eq!(cfg.database.host, "db.internal");
        assert_eq!(cfg.database.port, 6432);
        assert_eq!(cfg.auth.jwt_expiry_secs, 600);
        assert!(!cfg.realtime.enabled);
    }

    #[test]
    fn malformed_env_value_is_an_error() {
        let mut cfg = valid_config();
        let vars = HashMap::from([("DATABASE_PORT".to_string(), "not-a-port".to_string())]);
        assert!(cfg.apply_env_overrides(&vars).is_err());
    }
}
