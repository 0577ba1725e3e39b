//! INSERT/UPDATE/DELETE planning, including batch insert and upsert.
//!
//! Mutations return the affected rows through a `RETURNING *` envelope
//! unless the client opted out with `returning=minimal`. Updates and
//! deletes require a filter; an unfiltered mutation over a whole table
//! is rejected rather than silently executed.

use crate::bind::coerce_json;
use crate::predicate::render_predicate;
use crate::quote::{quote_ident, quote_qualified};
use crate::{Planner, SqlWriter, Statement};
use fluxbase_core::Error;
use fluxbase_filter::ParsedQuery;
use fluxbase_schema::TableDescriptor;
use serde_json::{Map, Value};

impl Planner<'_> {
    /// Plan an INSERT of one or more rows, optionally as an upsert.
    pub fn insert(
        &self,
        schema: &str,
        name: &str,
        rows: &[Map<String, Value>],
        query: &ParsedQuery,
    ) -> Result<Statement, Error> {
        let table = self.table(schema, name)?;
        if rows.is_empty() {
            return Err(Error::BadRequest("insert requires at least one row".into()));
        }

        // All rows must address the same column set so one VALUES list
        // covers them.
        let columns: Vec<String> = rows[0].keys().cloned().collect();
        if columns.is_empty() {
            return Err(Error::BadRequest("insert row has no columns".into()));
        }
        for row in rows {
            if row.len() != columns.len() || !columns.iter().all(|c| row.contains_key(c)) {
                return Err(Error::BadRequest(
                    "all rows in a batch insert must have the same columns".into(),
                ));
            }
        }
        for column in &columns {
            if !table.has_column(column) {
                return Err(Error::BadRequest(format!(
                    "unknown column {column} on {}",
                    table.qualified_name()
                )));
            }
        }

        let mut w = SqlWriter::new();
        let enveloped = !query.returning_minimal;
        if enveloped {
            w.push("WITH _rows AS (");
        }

        w.push("INSERT INTO ");
        w.push(&quote_qualified(&table.schema, &table.name));
        w.push(" (");
        w.push(
            &columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", "),
        );
        w.push(") VALUES ");

        for (row_idx, row) in rows.iter().enumerate() {
            if row_idx > 0 {
                w.push(", ");
            }
            w.push("(");
            for (col_idx, column) in columns.iter().enumerate() {
                if col_idx > 0 {
                    w.push(", ");
                }
                let col = table.column(column).expect("validated above");
                w.push_bind(coerce_json(&col.sql_type, &row[column])?);
            }
            w.push(")");
        }

        if query.upsert {
            self.render_on_conflict(&mut w, &table, &columns, query)?;
        }

        if enveloped {
            w.push(" RETURNING *) ");
            w.push("SELECT coalesce(json_agg(row_to_json(_rows)), '[]'::json) FROM _rows");
        }

        Ok(w.finish())
    }

    /// Plan an UPDATE of the filtered row set.
    pub fn update(
        &self,
        schema: &str,
        name: &str,
        patch: &Map<String, Value>,
        query: &ParsedQuery,
    ) -> Result<Statement, Error> {
        let table = self.table(schema, name)?;
        if patch.is_empty() {
            return Err(Error::BadRequest("update requires at least one column".into()));
        }
        let filter = query
            .combined_filter()
            .ok_or_else(|| Error::BadRequest("update requires a filter".into()))?;

        let table_expr = quote_qualified(&table.schema, &table.name);
        let mut w = SqlWriter::new();
        let enveloped = !query.returning_minimal;
        if enveloped {
            w.push("WITH _rows AS (");
        }

        w.push("UPDATE ");
        w.push(&table_expr);
        w.push(" SET ");
        for (i, (column, value)) in patch.iter().enumerate() {
            let col = table.column(column).ok_or_else(|| {
                Error::BadRequest(format!(
                    "unknown column {column} on {}",
                    table.qualified_name()
                ))
            })?;
            if i > 0 {
                w.push(", ");
            }
            w.push(&quote_ident(column));
            w.push(" = ");
            w.push_bind(coerce_json(&col.sql_type, value)?);
        }
        w.push(" WHERE ");
        render_predicate(&mut w, &table, &table_expr, &filter)?;

        if enveloped {
            w.push(" RETURNING *) ");
            w.push("SELECT coalesce(json_agg(row_to_json(_rows)), '[]'::json) FROM _rows");
        }

        Ok(w.finish())
    }

    /// Plan a DELETE of the filtered row set.
    pub fn delete(
        &self,
        schema: &str,
        name: &str,
        query: &ParsedQuery,
    ) -> Result<Statement, Error> {
        let table = self.table(schema, name)?;
        let filter = query
            .combined_filter()
            .ok_or_else(|| Error::BadRequest("delete requires a filter".into()))?;

        let table_expr = quote_qualified(&table.schema, &table.name);
        let mut w = SqlWriter::new();
        let enveloped = !query.returning_minimal;
        if enveloped {
            w.push("WITH _rows AS (");
        }

        w.push("DELETE FROM ");
        w.push(&table_expr);
        w.push(" WHERE ");
        render_predicate(&mut w, &table, &table_expr, &filter)?;

        if enveloped {
            w.push(" RETURNING *) ");
            w.push("SELECT coalesce(json_agg(row_to_json(_rows)), '[]'::json) FROM _rows");
        }

        Ok(w.finish())
    }

    /// `ON CONFLICT (<target>) DO UPDATE SET ...`; the target must be
    /// the primary key or a declared unique constraint.
    fn render_on_conflict(
        &self,
        w: &mut SqlWriter,
        table: &TableDescriptor,
        inserted_columns: &[String],
        query: &ParsedQuery,
    ) -> Result<(), Error> {
        let target: Vec<String> = match &query.on_conflict {
            Some(cols) => cols.clone(),
            None => table.primary_key.clone(),
        };
        if target.is_empty() {
            return Err(Error::BadRequest(format!(
                "{} has no primary key; specify on_conflict for upsert",
                table.qualified_name()
            )));
        }
        for column in &target {
            if !table.has_column(column) {
                return Err(Error::BadRequest(format!(
                    "unknown on_conflict column {column} on {}",
                    table.qualified_name()
                )));
            }
        }

        let matches_set = |set: &[String]| {
            set.len() == target.len() && target.iter().all(|c| set.contains(c))
        };
        let is_unique_target = matches_set(&table.primary_key)
            || table.unique_constraints.iter().any(|u| matches_set(u));
        if !is_unique_target {
            return Err(Error::BadRequest(format!(
                "on_conflict target ({}) is not a unique constraint of {}",
                target.join(", "),
                table.qualified_name()
            )));
        }

        w.push(" ON CONFLICT (");
        w.push(
            &target
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", "),
        );
        w.push(")");

        let updatable: Vec<&String> = inserted_columns
            .iter()
            .filter(|c| !target.contains(c))
            .collect();
        if updatable.is_empty() {
            w.push(" DO NOTHING");
        } else {
            w.push(" DO UPDATE SET ");
            for (i, column) in updatable.iter().enumerate() {
                if i > 0 {
                    w.push(", ");
                }
                w.push(&format!(
                    "{} = EXCLUDED.{}",
                    quote_ident(column),
                    quote_ident(column)
                ));
            }
        }
        Ok(())
    }
}
