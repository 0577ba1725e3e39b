//! Pool construction from configuration.

use fluxbase_core::Error;
use fluxbase_core::config::DatabaseConfig;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::PgPool;
use std::time::Duration;

/// The two pools the server ever opens.
#[derive(Clone)]
pub struct Pools {
    pub runtime: PgPool,
    pub admin: PgPool,
}

fn ssl_mode(mode: &str) -> Result<PgSslMode, Error> {
    Ok(match mode {
        "disable" => PgSslMode::Disable,
        "allow" => PgSslMode::Allow,
        "prefer" => PgSslMode::Prefer,
        "require" => PgSslMode::Require,
        "verify-ca" => PgSslMode::VerifyCa,
        "verify-full" => PgSslMode::VerifyFull,
        other => return Err(Error::BadRequest(format!("invalid ssl mode: {other}"))),
    })
}

pub async fn connect(cfg: &DatabaseConfig) -> Result<Pools, Error> {
    let base = PgConnectOptions::new()
        .host(&cfg.host)
        .port(cfg.port)
        .database(&cfg.database)
        .ssl_mode(ssl_mode(&cfg.ssl_mode)?);

    let runtime_opts = base
        .clone()
        .username(&cfg.user)
        .password(&cfg.password)
        .application_name("fluxbase-runtime");
    let admin_opts = base
        .username(&cfg.admin_user)
        .password(&cfg.admin_password)
        .application_name("fluxbase-admin");

    let runtime = PgPoolOptions::new()
        .max_connections(cfg.max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(runtime_opts)
        .await
        .map_err(|e| Error::ServiceUnavailable(format!("runtime pool: {e}")))?;

    let admin = PgPoolOptions::new()
        .max_connections(cfg.admin_max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(admin_opts)
        .await
        .map_err(|e| Error::ServiceUnavailable(format!("admin pool: {e}")))?;

    tracing::info!(
        host = %cfg.host,
        database = %cfg.database,
        runtime_max = cfg.max_connections,
        admin_max = cfg.admin_max_connections,
        "database pools ready"
    );

    Ok(Pools { runtime, admin })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssl_mode_parsing() {
        assert!(ssl_mode("prefer").is_ok());
        assert!(ssl_mode("verify-full").is_ok());
        assert!(ssl_mode("yolo").is_err());
    }
}
