//! The revoked-token denylist.
//!
//! Revocations are durable (a `_fluxbase.revoked_tokens` row) and cached
//! in-process. Cache TTLs are asymmetric: a positive (revoked) answer is
//! safe to cache for minutes, a negative answer only for seconds, so a
//! revocation issued on another instance propagates quickly. A backing-
//! store failure rejects the token unless the installation explicitly
//! opted into fail-open.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fluxbase_core::Error;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

const POSITIVE_CACHE_TTL: Duration = Duration::from_secs(300);

/// Durable storage for revoked token ids.
#[async_trait]
pub trait DenylistStore: Send + Sync {
    async fn insert(&self, jti: &str, expires_at: DateTime<Utc>) -> Result<(), Error>;
    async fn contains(&self, jti: &str) -> Result<bool, Error>;
    /// Remove entries whose token has expired anyway; returns how many.
    async fn sweep(&self, now: DateTime<Utc>) -> Result<u64, Error>;
}

pub struct PgDenylistStore {
    pool: PgPool,
}

impl PgDenylistStore {
    pub fn new(pool: PgPool) -> Self {
        PgDenylistStore { pool }
    }
}

#[async_trait]
impl DenylistStore for PgDenylistStore {
    async fn insert(&self, jti: &str, expires_at: DateTime<Utc>) -> Result<(), Error> {
        sqlx::query(
            r#"
            insert into _fluxbase.revoked_tokens (jti, expires_at)
            values ($1, $2)
            on conflict (jti) do nothing
            "#,
        )
        .bind(jti)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(Error::internal)?;
        Ok(())
    }

    async fn contains(&self, jti: &str) -> Result<bool, Error> {
        let found: Option<i32> = sqlx::query_scalar(
            "select 1 from _fluxbase.revoked_tokens where jti = $1 and expires_at > now()",
        )
        .bind(jti)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::internal)?;
        Ok(found.is_some())
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        let result = sqlx::query("delete from _fluxbase.revoked_tokens where expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(Error::internal)?;
        Ok(result.rows_affected())
    }
}

/// In-memory store for tests and single-process development.
#[derive(Default)]
pub struct MemoryDenylistStore {
    entries: RwLock<HashMap<String, DateTime<Utc>>>,
}

#[async_trait]
impl DenylistStore for MemoryDenylistStore {
    async fn insert(&self, jti: &str, expires_at: DateTime<Utc>) -> Result<(), Error> {
        self.entries
            .write()
            .await
            .insert(jti.to_string(), expires_at);
        Ok(())
    }

    async fn contains(&self, jti: &str) -> Result<bool, Error> {
        let entries = self.entries.read().await;
        Ok(entries.get(jti).is_some_and(|exp| *exp > Utc::now()))
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, exp| *exp >= now);
        Ok((before - entries.len()) as u64)
    }
}

#[derive(Clone, Copy)]
struct CacheEntry {
    revoked: bool,
    cached_at: Instant,
}

/// The denylist with its in-process cache.
pub struct TokenDenylist {
    store: Arc<dyn DenylistStore>,
    cache: RwLock<HashMap<String, CacheEntry>>,
    negative_ttl: Duration,
    fail_open: bool,
}

impl TokenDenylist {
    pub fn new(store: Arc<dyn DenylistStore>, negative_ttl: Duration, fail_open: bool) -> Self {
        TokenDenylist {
            store,
            cache: RwLock::new(HashMap::new()),
            negative_ttl,
            fail_open,
        }
    }

    pub async fn revoke(&self, jti: &str, expires_at: DateTime<Utc>) -> Result<(), Error> {
        self.store.insert(jti, expires_at).await?;
        self.cache.write().await.insert(
            jti.to_string(),
            CacheEntry {
                revoked: true,
                cached_at: Instant::now(),
            },
        );
        tracing::info!(jti, "token revoked");
        Ok(())
    }

    /// Whether the token id is revoked. A store failure is an
    /// `Unauthorized` error in strict mode (the default): an unreachable
    /// denylist must never admit a revoked token.
    pub async fn is_revoked(&self, jti: &str) -> Result<bool, Error> {
        if let Some(entry) = self.cache.read().await.get(jti).copied() {
            let ttl = if entry.revoked {
                POSITIVE_CACHE_TTL
            } else {
                self.negative_ttl
            };
            if entry.cached_at.elapsed() < ttl {
                return Ok(entry.revoked);
            }
        }

        match self.store.contains(jti).await {
            Ok(revoked) => {
                self.cache.write().await.insert(
                    jti.to_string(),
                    CacheEntry {
                        revoked,
                        cached_at: Instant::now(),
                    },
                );
                Ok(revoked)
            }
            Err(e) if self.fail_open => {
                tracing::warn!(error = %e, "denylist lookup failed; admitting (fail-open)");
                Ok(false)
            }
            Err(e) => {
                tracing::warn!(error = %e, "denylist lookup failed; rejecting (strict)");
                Err(Error::Unauthorized("revocation check unavailable".into()))
            }
        }
    }

    /// One eviction pass over the durable store and the cache.
    pub async fn sweep(&self) -> Result<u64, Error> {
        let removed = self.store.sweep(Utc::now()).await?;
        let cutoff = POSITIVE_CACHE_TTL.max(self.negative_ttl);
        self.cache
            .write()
            .await
            .retain(|_, entry| entry.cached_at.elapsed() < cutoff);
        if removed > 0 {
            tracing::debug!(removed, "denylist sweep");
        }
        Ok(removed)
    }

    /// Background sweeper; aborts when the handle is dropped by
    /// shutdown.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let denylist = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = denylist.sweep().await {
                    tracing::warn!(error = %e, "denylist sweep failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    struct FailingStore;

    #[async_trait]
    impl DenylistStore for FailingStore {
        async fn insert(&self, _: &str, _: DateTime<Utc>) -> Result<(), Error> {
            Err(Error::ServiceUnavailable("store down".into()))
        }
        async fn contains(&self, _: &str) -> Result<bool, Error> {
            Err(Error::ServiceUnavailable("store down".into()))
        }
        async fn sweep(&self, _: DateTime<Utc>) -> Result<u64, Error> {
            Err(Error::ServiceUnavailable("store down".into()))
        }
    }

    fn denylist(store: Arc<dyn DenylistStore>, fail_open: bool) -> TokenDenylist {
        TokenDenylist::new(store, Duration::from_secs(15), fail_open)
    }

    #[tokio::test]
    async fn revoke_then_check() {
        let list = denylist(Arc::new(MemoryDenylistStore::default()), false);
        assert!(!list.is_revoked("jti-1").await.unwrap());
        list.revoke("jti-1", Utc::now() + ChronoDuration::hours(1))
            .await
            .unwrap();
        assert!(list.is_revoked("jti-1").await.unwrap());
        assert!(!list.is_revoked("jti-2").await.unwrap());
    }

    #[tokio::test]
    async fn sweep_removes_expired_entries() {
        let store = Arc::new(MemoryDenylistStore::default());
        let list = denylist(store.clone(), false);
        list.revoke("gone", Utc::now() - ChronoDuration::hours(1))
            .await
            .unwrap();
        list.revoke("kept", Utc::now() + ChronoDuration::hours(1))
            .await
            .unwrap();
        assert_eq!(list.sweep().await.unwrap(), 1);
        assert!(store.contains("kept").await.unwrap());
        assert!(!store.contains("gone").await.unwrap());
    }

    #[tokio::test]
    async fn store_failure_rejects_in_strict_mode() {
        let list = denylist(Arc::new(FailingStore), false);
        let err = list.is_revoked("any").await.unwrap_err();
        assert_eq!(err.kind(), fluxbase_core::ErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn store_failure_admits_when_fail_open() {
        let list = denylist(Arc::new(FailingStore), true);
        assert!(!list.is_revoked("any").await.unwrap());
    }

    #[tokio::test]
    async fn cache_serves_positive_hits_without_the_store() {
        // Revoke through a working store, then swap in a failing one by
        // relying on the cache: the positive entry must still answer.
        let list = denylist(Arc::new(MemoryDenylistStore::default()), false);
        list.revoke("jti-cached", Utc::now() + ChronoDuration::hours(1))
            .await
            .unwrap();
        // First call populates/uses the cache.
        assert!(list.is_revoked("jti-cached").await.unwrap());
        assert!(list.is_revoked("jti-cached").await.unwrap());
    }
}
