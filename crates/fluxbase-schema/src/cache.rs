//! The schema cache: immutable snapshots, atomic swap, single-flight
//! refresh.

use crate::descriptor::{FunctionDescriptor, TableDescriptor};
use crate::introspect;
use chrono::{DateTime, Utc};
use fluxbase_core::Error;
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// One fully populated schema generation. Readers clone the `Arc` and
/// keep using the generation they saw even while a refresh swaps in the
/// next one.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub generation: u64,
    pub refreshed_at: DateTime<Utc>,
    tables: BTreeMap<String, Arc<TableDescriptor>>,
    functions: BTreeMap<String, Arc<FunctionDescriptor>>,
}

impl Snapshot {
    /// An empty generation 0 snapshot; `needs_refresh` is always true
    /// for it, so the first read triggers a rebuild.
    fn empty() -> Self {
        Snapshot {
            generation: 0,
            refreshed_at: DateTime::<Utc>::MIN_UTC,
            tables: BTreeMap::new(),
            functions: BTreeMap::new(),
        }
    }

    /// Build a snapshot directly from descriptors. Used by the cache
    /// after introspection and by tests that need a schema without a
    /// database.
    pub fn from_parts(
        generation: u64,
        tables: Vec<TableDescriptor>,
        functions: Vec<FunctionDescriptor>,
    ) -> Self {
        Snapshot {
            generation,
            refreshed_at: Utc::now(),
            tables: tables
                .into_iter()
                .map(|t| (format!("{}.{}", t.schema, t.name), Arc::new(t)))
                .collect(),
            functions: functions
                .into_iter()
                .map(|f| (format!("{}.{}", f.schema, f.name), Arc::new(f)))
                .collect(),
        }
    }

    pub fn table(&self, schema: &str, name: &str) -> Option<Arc<TableDescriptor>> {
        self.tables.get(&format!("{schema}.{name}")).cloned()
    }

    pub fn function(&self, schema: &str, name: &str) -> Option<Arc<FunctionDescriptor>> {
        self.functions.get(&format!("{schema}.{name}")).cloned()
    }

    pub fn tables(&self) -> impl Iterator<Item = &Arc<TableDescriptor>> {
        self.tables.values()
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }
}

/// Process-wide schema cache.
pub struct SchemaCache {
    pool: PgPool,
    ttl: Duration,
    current: RwLock<Arc<Snapshot>>,
    stale: AtomicBool,
    /// Held for the duration of one rebuild; concurrent callers queue on
    /// it and then observe the already-swapped snapshot.
    refresh_gate: Mutex<()>,
}

impl SchemaCache {
    pub fn new(pool: PgPool, ttl: Duration) -> Self {
        SchemaCache {
            pool,
            ttl,
            current: RwLock::new(Arc::new(Snapshot::empty())),
            stale: AtomicBool::new(true),
            refresh_gate: Mutex::new(()),
        }
    }

    /// Mark the cache stale; the next read rebuilds. Called after
    /// migrations or extension toggles.
    pub fn invalidate(&self) {
        self.stale.store(true, Ordering::SeqCst);
        tracing::debug!("schema cache invalidated");
    }

    async fn needs_refresh(&self) -> bool {
        if self.stale.load(Ordering::SeqCst) {
            return true;
        }
        let snapshot = self.current.read().await.clone();
        if snapshot.generation == 0 {
            return true;
        }
        let age = Utc::now().signed_duration_since(snapshot.refreshed_at);
        age.to_std().map(|a| a >= self.ttl).unwrap_or(true)
    }

    /// Single-flight refresh: only one rebuild runs at a time; concurrent
    /// callers await the shared result.
    pub async fn refresh_if_needed(&self) -> Result<(), Error> {
        if !self.needs_refresh().await {
            return Ok(());
        }
        let _gate = self.refresh_gate.lock().await;
        // A queued caller may find the work already done.
        if !self.needs_refresh().await {
            return Ok(());
        }
        self.rebuild().await
    }

    async fn rebuild(&self) -> Result<(), Error> {
        let (tables, functions) = introspect::introspect(&self.pool).await?;
        let next_generation = {
            let current = self.current.read().await;
            current.generation + 1
        };
        let snapshot = Arc::new(Snapshot::from_parts(next_generation, tables, functions));
        tracing::info!(
            generation = snapshot.generation,
            tables = snapshot.table_count(),
            "schema cache refreshed"
        );
        *self.current.write().await = snapshot;
        self.stale.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// The current snapshot, refreshing first if needed.
    pub async fn snapshot(&self) -> Result<Arc<Snapshot>, Error> {
        self.refresh_if_needed().await?;
        Ok(self.current.read().await.clone())
    }

    pub async fn get_table(&self, schema: &str, name: &str) -> Result<Arc<TableDescriptor>, Error> {
        let snapshot = self.snapshot().await?;
        snapshot
            .table(schema, name)
            .ok_or_else(|| Error::NotFound(format!("no such table: {schema}.{name}")))
    }

    pub async fn get_function(
        &self,
        schema: &str,
        name: &str,
    ) -> Result<Arc<FunctionDescriptor>, Error> {
        let snapshot = self.snapshot().await?;
        snapshot
            .function(schema, name)
            .ok_or_else(|| Error::NotFound(format!("no such function: {schema}.{name}")))
    }

    /// Generation plus all table descriptors, for admin/introspection
    /// endpoints.
    pub async fn list_tables(&self) -> Result<(u64, Vec<Arc<TableDescriptor>>), Error> {
        let snapshot = self.snapshot().await?;
        Ok((
            snapshot.generation,
            snapshot.tables().cloned().collect::<Vec<_>>(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Column, SqlType};

    fn users_table() -> TableDescriptor {
        TableDescriptor {
            schema: "public".into(),
            name: "users".into(),
            columns: vec![Column {
                name: "id".into(),
                sql_type: SqlType::Int8,
                nullable: false,
                has_default: true,
                identity_generated: true,
            }],
            primary_key: vec!["id".into()],
            unique_constraints: vec![],
            foreign_keys: vec![],
            rls_enabled: true,
            is_view: false,
        }
    }

    #[test]
    fn snapshot_lookup_by_qualified_name() {
        let snapshot = Snapshot::from_parts(1, vec![users_table()], vec![]);
        assert!(snapshot.table("public", "users").is_some());
        assert!(snapshot.table("public", "missing").is_none());
        assert_eq!(snapshot.generation, 1);
    }

    #[test]
    fn empty_snapshot_is_generation_zero() {
        let snapshot = Snapshot::empty();
        assert_eq!(snapshot.generation, 0);
        assert_eq!(snapshot.table_count(), 0);
    }
}
