//! # fluxbase-db
//!
//! The connection manager and role binder. Two independent pools:
//!
//! - the **runtime pool** connects as a low-privilege role; every
//!   checkout begins a transaction, installs the request identity as
//!   transaction-local state (`SET LOCAL role`, `app.user_id`,
//!   `app.claims`), runs the request, and commits or rolls back;
//! - the **admin pool** connects as the superuser-equivalent role and
//!   serves DDL, catalog introspection, and the internal `_fluxbase`
//!   tables. It is never bound to request-derived input.
//!
//! Database errors are translated to the shared error kinds at this
//! edge and nowhere else.

pub mod bindings;
pub mod executor;
pub mod pool;
pub mod translate;

pub use executor::{BoundTransaction, DbExecutor};
pub use pool::{Pools, connect};
pub use translate::translate_db_error;
