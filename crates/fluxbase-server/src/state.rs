//! Shared application state and boot/shutdown order.
//!
//! Init order: config -> pools -> schema cache -> denylist -> realtime.
//! The HTTP listener starts after `AppState::init` returns; shutdown
//! reverses the order with per-stage timeouts.

use fluxbase_auth::{
    ApiKeyStore, CredentialValidator, PasswordPolicy, PgDenylistStore, ServiceKeyVerifier,
    TokenDenylist, TokenIssuer,
};
use fluxbase_core::collab::{EmailSender, FunctionRuntime, LogEmailSender, NoFunctionRuntime};
use fluxbase_core::config::StorageBackendKind;
use fluxbase_core::{AppConfig, Error};
use fluxbase_db::{DbExecutor, Pools};
use fluxbase_realtime::{
    DbVisibilityProber, FeedWorker, FixedWindowRateLimiter, NotifyFeedSource, RegistryLimits,
    SubscriptionRegistry,
};
use fluxbase_schema::SchemaCache;
use fluxbase_storage::{LocalBackend, StorageBackend, UrlSigner};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct AppState {
    pub cfg: AppConfig,
    pub executor: Arc<DbExecutor>,
    pub schema_cache: Arc<SchemaCache>,
    pub validator: Arc<CredentialValidator>,
    pub passwords: PasswordPolicy,
    pub registry: Arc<SubscriptionRegistry>,
    pub rate_limiter: Arc<FixedWindowRateLimiter>,
    pub storage: Arc<dyn StorageBackend>,
    pub signer: UrlSigner,
    pub email: Arc<dyn EmailSender>,
    /// Edge-function runtime; the shipped default has no functions
    /// deployed.
    pub functions: Arc<dyn FunctionRuntime>,
    /// Outbound HTTP, used only for OAuth code exchange.
    pub http: reqwest::Client,
}

/// Handles for the long-lived workers, joined (with timeouts) at
/// shutdown in reverse boot order.
pub struct Background {
    pub shutdown_tx: watch::Sender<bool>,
    pub feed_worker: Option<JoinHandle<()>>,
    pub denylist_sweeper: JoinHandle<()>,
    pub schema_refresher: JoinHandle<()>,
}

impl AppState {
    pub async fn init(cfg: AppConfig) -> Result<(Arc<Self>, Background), Error> {
        // Pools.
        let pools: Pools = fluxbase_db::connect(&cfg.database).await?;

        // Internal schema, roles, and the change trigger.
        sqlx::migrate!("./migrations")
            .run(&pools.admin)
            .await
            .map_err(|e| Error::ServiceUnavailable(format!("migrations: {e}")))?;

        // The runtime login role switches into the request roles, so it
        // needs membership. Role names are fixed; the login role name is
        // config, quoted.
        let grant = format!(
            "grant anon, authenticated, service_role to \"{}\"",
            cfg.database.user.replace('"', "\"\"")
        );
        sqlx::query(&grant)
            .execute(&pools.admin)
            .await
            .map_err(|e| Error::ServiceUnavailable(format!("role grant: {e}")))?;

        let executor = Arc::new(DbExecutor::new(
            pools.clone(),
            cfg.database.statement_timeout_ms,
        ));

        // Schema cache, warmed before the listeners come up.
        let schema_cache = Arc::new(SchemaCache::new(
            pools.admin.clone(),
            Duration::from_secs(cfg.database.schema_cache_ttl_secs),
        ));
        schema_cache.refresh_if_needed().await?;

        // Credential stack.
        let issuer = Arc::new(TokenIssuer::new(
            &cfg.auth.jwt_secret,
            cfg.auth.jwt_issuer.clone(),
            cfg.auth.jwt_expiry_secs,
            cfg.auth.refresh_expiry_secs,
        ));
        let denylist = Arc::new(TokenDenylist::new(
            Arc::new(PgDenylistStore::new(pools.admin.clone())),
            Duration::from_secs(cfg.auth.denylist_cache_ttl_secs),
            cfg.auth.denylist_fail_open,
        ));
        let validator = Arc::new(CredentialValidator::new(
            issuer,
            Arc::clone(&denylist),
            ServiceKeyVerifier::from_key(cfg.security.service_key.as_deref()),
            Some(ApiKeyStore::new(pools.admin.clone())),
        ));
        let denylist_sweeper =
            denylist.spawn_sweeper(Duration::from_secs(cfg.auth.denylist_sweep_secs));

        // Realtime.
        let prober = Arc::new(DbVisibilityProber::new(
            Arc::clone(&executor),
            Arc::clone(&schema_cache),
            Duration::from_millis(cfg.realtime.probe_timeout_ms),
        ));
        let registry = Arc::new(SubscriptionRegistry::new(
            RegistryLimits {
                max_connections: cfg.realtime.max_connections,
                max_connections_per_user: cfg.realtime.max_connections_per_user,
                max_subscriptions_per_connection: cfg.realtime.max_subscriptions_per_connection,
            },
            prober,
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let feed_worker = if cfg.realtime.enabled {
            let source = Arc::new(NotifyFeedSource::new(
                pools.admin.clone(),
                cfg.realtime.channel.clone(),
            ));
            Some(FeedWorker::new(source, Arc::clone(&registry), shutdown_rx.clone()).spawn())
        } else {
            None
        };

        // Keep the schema cache warm in the background so request paths
        // rarely pay for a rebuild.
        let schema_refresher = {
            let cache = Arc::clone(&schema_cache);
            let mut shutdown = shutdown_rx;
            let ttl = Duration::from_secs(cfg.database.schema_cache_ttl_secs);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(ttl);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = cache.refresh_if_needed().await {
                                tracing::warn!(error = %e, "schema refresh failed");
                            }
                        }
                        _ = shutdown.changed() => return,
                    }
                }
            })
        };

        let storage: Arc<dyn StorageBackend> = match cfg.storage.backend {
            StorageBackendKind::Local => Arc::new(LocalBackend::new(cfg.storage.local_root.clone())),
            StorageBackendKind::S3 => {
                return Err(Error::BadRequest(
                    "the s3 storage backend is provided by an external module; \
                     configure storage.backend = \"local\""
                        .into(),
                ));
            }
        };
        let signer = UrlSigner::new(&cfg.auth.jwt_secret);

        let state = Arc::new(AppState {
            executor,
            schema_cache,
            validator,
            passwords: PasswordPolicy::new(cfg.auth.bcrypt_cost, cfg.auth.password_min_length),
            registry,
            rate_limiter: Arc::new(FixedWindowRateLimiter::new(
                cfg.realtime.max_messages_per_minute,
            )),
            storage,
            signer,
            email: Arc::new(LogEmailSender::default()),
            functions: Arc::new(NoFunctionRuntime),
            http: reqwest::Client::new(),
            cfg,
        });

        Ok((
            state,
            Background {
                shutdown_tx,
                feed_worker,
                denylist_sweeper,
                schema_refresher,
            },
        ))
    }

    /// Wall-clock deadline for a request; RPC gets the long one.
    pub fn request_deadline(&self, rpc: bool) -> Duration {
        if rpc {
            Duration::from_secs(self.cfg.server.rpc_timeout_secs)
        } else {
            Duration::from_secs(self.cfg.server.request_timeout_secs)
        }
    }
}

impl Background {
    /// Reverse-order shutdown with a per-stage timeout. Dropping the
    /// worker handles aborts anything that does not stop in time.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let stage = Duration::from_secs(5);
        if let Some(feed) = self.feed_worker {
            if tokio::time::timeout(stage, feed).await.is_err() {
                tracing::warn!("feed worker did not stop in time");
            }
        }
        self.denylist_sweeper.abort();
        self.schema_refresher.abort();
        tracing::info!("background workers stopped");
    }
}

/// Split a `{table}` path segment into (schema, table); a bare name
/// lives in `public`.
pub fn split_table_name(raw: &str) -> (String, String) {
    match raw.split_once('.') {
        Some((schema, table)) => (schema.to_string(), table.to_string()),
        None => ("public".to_string(), raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_default_to_public() {
        assert_eq!(
            split_table_name("todos"),
            ("public".to_string(), "todos".to_string())
        );
        assert_eq!(
            split_table_name("app.todos"),
            ("app".to_string(), "todos".to_string())
        );
    }
}
