//! WHERE-clause rendering from the filter AST.
//!
//! Column references are validated against the table descriptor and
//! operators are checked for type compatibility before anything is
//! rendered.

use crate::SqlWriter;
use crate::bind::coerce_literal;
use crate::quote::quote_ident;
use fluxbase_core::Error;
use fluxbase_filter::{FilterValue, Op, Predicate};
use fluxbase_schema::{Column, TableDescriptor};

/// Render one predicate tree as a parenthesized SQL expression.
pub(crate) fn render_predicate(
    w: &mut SqlWriter,
    table: &TableDescriptor,
    table_expr: &str,
    predicate: &Predicate,
) -> Result<(), Error> {
    match predicate {
        Predicate::Cmp {
            column,
            op,
            value,
            negated,
        } => {
            let col = table.column(column).ok_or_else(|| {
                Error::BadRequest(format!(
                    "unknown column {column} on {}",
                    table.qualified_name()
                ))
            })?;
            if *negated {
                w.push("NOT (");
            }
            render_comparison(w, col, table_expr, *op, value)?;
            if *negated {
                w.push(")");
            }
            Ok(())
        }
        Predicate::And(children) => render_logical(w, table, table_expr, children, " AND "),
        Predicate::Or(children) => render_logical(w, table, table_expr, children, " OR "),
    }
}

fn render_logical(
    w: &mut SqlWriter,
    table: &TableDescriptor,
    table_expr: &str,
    children: &[Predicate],
    joiner: &str,
) -> Result<(), Error> {
    w.push("(");
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            w.push(joiner);
        }
        render_predicate(w, table, table_expr, child)?;
    }
    w.push(")");
    Ok(())
}

fn render_comparison(
    w: &mut SqlWriter,
    col: &Column,
    table_expr: &str,
    op: Op,
    value: &FilterValue,
) -> Result<(), Error> {
    let column_expr = format!("{table_expr}.{}", quote_ident(&col.name));
    let type_error = |detail: &str| {
        Error::BadRequest(format!(
            "operator {} is not valid for column {} ({detail})",
            op.as_str(),
            col.name
        ))
    };

    match op {
        Op::Eq | Op::Neq => {
            let raw = scalar_literal(value)
                .ok_or_else(|| type_error("scalar value required; use is.null for nulls"))?;
            let bound = coerce_literal(&col.sql_type, &raw)?;
            w.push(&column_expr);
            w.push(if op == Op::Eq { " = " } else { " <> " });
            w.push_bind(bound);
        }
        Op::Gt | Op::Gte | Op::Lt | Op::Lte => {
            if !col.sql_type.is_orderable() {
                return Err(type_error("column type is not orderable"));
            }
            let raw = scalar_literal(value).ok_or_else(|| type_error("scalar value required"))?;
            let bound = coerce_literal(&col.sql_type, &raw)?;
            w.push(&column_expr);
            w.push(match op {
                Op::Gt => " > ",
                Op::Gte => " >= ",
                Op::Lt => " < ",
                _ => " <= ",
            });
            w.push_bind(bound);
        }
        Op::Like | Op::Ilike => {
            if !col.sql_type.is_textual() {
                return Err(type_error("pattern match requires a text column"));
            }
            let FilterValue::Literal(pattern) = value else {
                return Err(type_error("pattern required"));
            };
            // `*` is the wire wildcard; SQL uses `%`.
            let pattern = pattern.replace('*', "%");
            w.push(&column_expr);
            w.push(if op == Op::Like { " LIKE " } else { " ILIKE " });
            w.push_bind(coerce_literal(&col.sql_type, &pattern)?);
        }
        Op::In => {
            let FilterValue::List(items) = value else {
                return Err(type_error("parenthesised list required"));
            };
            if items.is_empty() {
                // `in ()` matches nothing.
                w.push("false");
                return Ok(());
            }
            w.push(&column_expr);
            w.push(" IN (");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    w.push(", ");
                }
                w.push_bind(coerce_literal(&col.sql_type, item)?);
            }
            w.push(")");
        }
        Op::Is => match value {
            FilterValue::Null => {
                w.push(&column_expr);
                w.push(" IS NULL");
            }
            FilterValue::Bool(b) => {
                if !col.sql_type.is_boolean() {
                    return Err(type_error("is true/false requires a boolean column"));
                }
                w.push(&column_expr);
                w.push(if *b { " IS TRUE" } else { " IS FALSE" });
            }
            _ => return Err(type_error("is accepts only null/true/false")),
        },
    }
    Ok(())
}

/// The textual form of a scalar filter value, if it has one.
fn scalar_literal(value: &FilterValue) -> Option<String> {
    match value {
        FilterValue::Literal(s) => Some(s.clone()),
        FilterValue::Bool(b) => Some(b.to_string()),
        FilterValue::Null | FilterValue::List(_) => None,
    }
}
