//! Aggregate planning: `count|sum|avg|min|max` with optional grouping.
//!
//! Result columns are named `<agg>_<col>` (bare `count` for count), and
//! grouped output is ordered by the grouping columns so rows are stable.

use crate::predicate::render_predicate;
use crate::quote::{quote_ident, quote_qualified};
use crate::{Planner, SqlWriter, Statement};
use fluxbase_core::Error;
use fluxbase_filter::ParsedQuery;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFn {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggFn {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggFn::Count => "count",
            AggFn::Sum => "sum",
            AggFn::Avg => "avg",
            AggFn::Min => "min",
            AggFn::Max => "max",
        }
    }
}

impl FromStr for AggFn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "count" => Ok(AggFn::Count),
            "sum" => Ok(AggFn::Sum),
            "avg" => Ok(AggFn::Avg),
            "min" => Ok(AggFn::Min),
            "max" => Ok(AggFn::Max),
            other => Err(Error::BadRequest(format!("unknown aggregate: {other}"))),
        }
    }
}

impl Planner<'_> {
    pub fn aggregate(
        &self,
        schema: &str,
        name: &str,
        func: AggFn,
        column: Option<&str>,
        group_by: &[String],
        query: &ParsedQuery,
    ) -> Result<Statement, Error> {
        let table = self.table(schema, name)?;
        let table_expr = quote_qualified(&table.schema, &table.name);

        // The aggregated expression and its pinned output name.
        let (agg_expr, agg_alias) = match (func, column) {
            (AggFn::Count, None) => ("count(*)".to_string(), "count".to_string()),
            (AggFn::Count, Some(col_name)) => {
                let col = require_column(&table, col_name)?;
                (
                    format!("count({table_expr}.{})", quote_ident(&col.name)),
                    "count".to_string(),
                )
            }
            (_, None) => {
                return Err(Error::BadRequest(format!(
                    "{} requires a column",
                    func.as_str()
                )));
            }
            (_, Some(col_name)) => {
                let col = require_column(&table, col_name)?;
                match func {
                    AggFn::Sum | AggFn::Avg if !col.sql_type.is_numeric() => {
                        return Err(Error::BadRequest(format!(
                            "{} requires a numeric column, {col_name} is not",
                            func.as_str()
                        )));
                    }
                    AggFn::Min | AggFn::Max if !col.sql_type.is_orderable() => {
                        return Err(Error::BadRequest(format!(
                            "{} requires an orderable column, {col_name} is not",
                            func.as_str()
                        )));
                    }
                    _ => {}
                }
                (
                    format!(
                        "{}({table_expr}.{})",
                        func.as_str(),
                        quote_ident(&col.name)
                    ),
                    format!("{}_{}", func.as_str(), col.name),
                )
            }
        };

        let mut group_exprs = Vec::with_capacity(group_by.len());
        for group_col in group_by {
            let col = require_column(&table, group_col)?;
            group_exprs.push(format!("{table_expr}.{}", quote_ident(&col.name)));
        }

        let mut w = SqlWriter::new();
        w.push("SELECT coalesce(json_agg(row_to_json(_rows)), '[]'::json) FROM (SELECT ");
        for expr in &group_exprs {
            w.push(expr);
            w.push(", ");
        }
        w.push(&agg_expr);
        w.push(" AS ");
        w.push(&quote_ident(&agg_alias));
        w.push(" FROM ");
        w.push(&table_expr);

        if let Some(filter) = query.combined_filter() {
            w.push(" WHERE ");
            render_predicate(&mut w, &table, &table_expr, &filter)?;
        }

        if !group_exprs.is_empty() {
            w.push(" GROUP BY ");
            w.push(&group_exprs.join(", "));
            w.push(" ORDER BY ");
            w.push(&group_exprs.join(", "));
        }

        w.push(") _rows");
        Ok(w.finish())
    }
}

fn require_column<'t>(
    table: &'t fluxbase_schema::TableDescriptor,
    name: &str,
) -> Result<&'t fluxbase_schema::Column, Error> {
    table.column(name).ok_or_else(|| {
        Error::BadRequest(format!(
            "unknown column {name} on {}",
            table.qualified_name()
        ))
    })
}
