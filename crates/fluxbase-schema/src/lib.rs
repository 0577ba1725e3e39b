//! # fluxbase-schema
//!
//! Catalog introspection and the in-memory schema cache.
//!
//! The introspector reads `information_schema` and `pg_catalog` into typed
//! table/function descriptors; the cache keeps an immutable snapshot per
//! generation and swaps it atomically on refresh, so readers always see a
//! fully populated generation.

pub mod cache;
pub mod descriptor;
pub mod introspect;

pub use cache::{SchemaCache, Snapshot};
pub use descriptor::{
    Column, FkAction, ForeignKey, FunctionArg, FunctionDescriptor, SqlType, TableDescriptor,
};
