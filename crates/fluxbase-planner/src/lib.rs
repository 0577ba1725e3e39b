//! # fluxbase-planner
//!
//! Turns a parsed filter AST plus the current schema generation into a
//! single parameterized SQL statement. Two invariants hold everywhere:
//!
//! - every identifier in the rendered SQL was validated against the
//!   schema snapshot and is quoted; no identifier originates from
//!   unvalidated input;
//! - every literal becomes a positional parameter; the planner never
//!   concatenates values into SQL.
//!
//! Selects and mutations are wrapped in `json_agg` envelopes so the
//! executor always decodes a single JSON value.

pub mod aggregate;
pub mod bind;
pub mod mutate;
pub mod predicate;
pub mod quote;
pub mod rpc;
pub mod select;


use fluxbase_core::Error;
use fluxbase_schema::{Snapshot, TableDescriptor};
use std::sync::Arc;

pub use aggregate::AggFn;
pub use bind::BindValue;

/// A rendered statement: SQL text plus its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub binds: Vec<BindValue>,
}

/// Plans statements against one schema generation.
pub struct Planner<'a> {
    snapshot: &'a Snapshot,
    /// Hard cap applied to client-provided limits.
    max_rows: u64,
}

impl<'a> Planner<'a> {
    pub fn new(snapshot: &'a Snapshot, max_rows: u64) -> Self {
        Planner { snapshot, max_rows }
    }

    pub fn snapshot(&self) -> &Snapshot {
        self.snapshot
    }

    pub(crate) fn max_rows(&self) -> u64 {
        self.max_rows
    }

    /// Resolve a table or fail with `NotFound`. All planner entry points
    /// go through here, so no statement can reference a table outside
    /// the current generation.
    pub(crate) fn table(&self, schema: &str, name: &str) -> Result<Arc<TableDescriptor>, Error> {
        self.snapshot
            .table(schema, name)
            .ok_or_else(|| Error::NotFound(format!("no such table: {schema}.{name}")))
    }
}

/// Accumulates SQL text and positional binds.
pub(crate) struct SqlWriter {
    sql: String,
    binds: Vec<BindValue>,
}

impl SqlWriter {
    pub(crate) fn new() -> Self {
        SqlWriter {
            sql: String::new(),
            binds: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, fragment: &str) {
        self.sql.push_str(fragment);
    }

    /// Register a bind and return its `$n` placeholder.
    pub(crate) fn bind(&mut self, value: BindValue) -> String {
        self.binds.push(value);
        format!("${}", self.binds.len())
    }

    /// Register a bind and push its placeholder, with any SQL-side cast
    /// the bind requires.
    pub(crate) fn push_bind(&mut self, value: BindValue) {
        let cast = value.cast_suffix();
        let placeholder = self.bind(value);
        self.sql.push_str(&placeholder);
        if let Some(cast) = cast {
            self.sql.push_str("::");
            self.sql.push_str(&cast);
        }
    }

    pub(crate) fn finish(self) -> Statement {
        Statement {
            sql: self.sql,
            binds: self.binds,
        }
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use fluxbase_schema::{
        Column, FkAction, ForeignKey, FunctionArg, FunctionDescriptor, Snapshot, SqlType,
        TableDescriptor,
    };

    fn col(name: &str, sql_type: SqlType) -> Column {
        Column {
            name: name.into(),
            sql_type,
            nullable: true,
            has_default: false,
            identity_generated: false,
        }
    }

    /// posts -> users (author_id), comments -> posts (post_id).
    pub(crate) fn fixture_snapshot() -> Snapshot {
        let users = TableDescriptor {
            schema: "public".into(),
            name: "users".into(),
            columns: vec![
                col("id", SqlType::Int8),
                col("name", SqlType::Text),
                col("email", SqlType::Text),
                col("age", SqlType::Int4),
                col("active", SqlType::Bool),
                col("created_at", SqlType::Timestamptz),
                col("settings", SqlType::Jsonb),
            ],
            primary_key: vec!["id".into()],
            unique_constraints: vec![vec!["email".into()]],
            foreign_keys: vec![],
            rls_enabled: true,
            is_view: false,
        };
        let posts = TableDescriptor {
            schema: "public".into(),
            name: "posts".into(),
            columns: vec![
                col("id", SqlType::Int8),
                col("author_id", SqlType::Int8),
                col("title", SqlType::Text),
                col("status", SqlType::Text),
                col("views", SqlType::Int4),
                col("price", SqlType::Numeric),
            ],
            primary_key: vec!["id".into()],
            unique_constraints: vec![],
            foreign_keys: vec![ForeignKey {
                constraint_name: "posts_author_id_fkey".into(),
                columns: vec!["author_id".into()],
                referenced_schema: "public".into(),
                referenced_table: "users".into(),
                referenced_columns: vec!["id".into()],
                on_delete: FkAction::Cascade,
            }],
            rls_enabled: true,
            is_view: false,
        };
        let comments = TableDescriptor {
            schema: "public".into(),
            name: "comments".into(),
            columns: vec![
                col("id", SqlType::Int8),
                col("post_id", SqlType::Int8),
                col("body", SqlType::Text),
            ],
            primary_key: vec!["id".into()],
            unique_constraints: vec![],
            foreign_keys: vec![ForeignKey {
                constraint_name: "comments_post_id_fkey".into(),
                columns: vec!["post_id".into()],
                referenced_schema: "public".into(),
                referenced_table: "posts".into(),
                referenced_columns: vec!["id".into()],
                on_delete: FkAction::Cascade,
            }],
            rls_enabled: true,
            is_view: false,
        };
        let add_totals = FunctionDescriptor {
            schema: "public".into(),
            name: "add_totals".into(),
            args: vec![
                FunctionArg {
                    name: "account".into(),
                    sql_type: SqlType::Int8,
                    has_default: false,
                },
                FunctionArg {
                    name: "amount".into(),
                    sql_type: SqlType::Numeric,
                    has_default: true,
                },
            ],
            returns_set: true,
        };
        Snapshot::from_parts(1, vec![users, posts, comments], vec![add_totals])
    }
}
