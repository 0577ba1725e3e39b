//! SELECT planning: projection, embedded relations, ordering, pagination.

use crate::bind::{BindValue, coerce_json};
use crate::predicate::render_predicate;
use crate::quote::{quote_ident, quote_qualified};
use crate::{Planner, SqlWriter, Statement};
use fluxbase_core::Error;
use fluxbase_filter::{NullsOrder, ParsedQuery, SelectItem};
use fluxbase_schema::{ForeignKey, TableDescriptor};
use serde_json::Value;

/// Which side of a foreign key the embedded relation sits on.
enum EmbedShape<'a> {
    /// FK on the base table points at the relation: embed one object.
    ToOne(&'a ForeignKey),
    /// FK on the relation points at the base table: embed an array.
    ToMany(ForeignKey),
}

impl Planner<'_> {
    /// Plan a SELECT wrapped in a `json_agg` envelope; the executor
    /// decodes exactly one JSON array.
    pub fn select(
        &self,
        schema: &str,
        name: &str,
        query: &ParsedQuery,
    ) -> Result<Statement, Error> {
        let table = self.table(schema, name)?;
        let mut w = SqlWriter::new();

        w.push("SELECT coalesce(json_agg(row_to_json(_rows)), '[]'::json) FROM (");
        self.render_inner_select(&mut w, &table, query)?;
        w.push(") _rows");

        Ok(w.finish())
    }

    /// Plan `SELECT count(*)` over the same filtered set, for
    /// `Content-Range` responses.
    pub fn count(&self, schema: &str, name: &str, query: &ParsedQuery) -> Result<Statement, Error> {
        let table = self.table(schema, name)?;
        let table_expr = quote_qualified(&table.schema, &table.name);
        let mut w = SqlWriter::new();

        w.push("SELECT count(*) FROM ");
        w.push(&table_expr);
        if let Some(filter) = query.combined_filter() {
            w.push(" WHERE ");
            render_predicate(&mut w, &table, &table_expr, &filter)?;
        }

        Ok(w.finish())
    }

    /// Plan the realtime visibility probe: one row by primary key under
    /// the subscriber's bound role.
    pub fn visibility_probe(
        &self,
        schema: &str,
        name: &str,
        primary_key: &[(String, Value)],
    ) -> Result<Statement, Error> {
        let table = self.table(schema, name)?;
        if primary_key.is_empty() {
            return Err(Error::BadRequest(format!(
                "no primary key values for {schema}.{name}"
            )));
        }
        let table_expr = quote_qualified(&table.schema, &table.name);
        let mut w = SqlWriter::new();

        w.push("SELECT 1 FROM ");
        w.push(&table_expr);
        w.push(" WHERE ");
        for (i, (column, value)) in primary_key.iter().enumerate() {
            let col = table.column(column).ok_or_else(|| {
                Error::BadRequest(format!("unknown primary key column {column}"))
            })?;
            if i > 0 {
                w.push(" AND ");
            }
            w.push(&format!("{table_expr}.{}", quote_ident(&col.name)));
            w.push(" = ");
            w.push_bind(coerce_json(&col.sql_type, value)?);
        }
        w.push(" LIMIT 1");

        Ok(w.finish())
    }

    fn render_inner_select(
        &self,
        w: &mut SqlWriter,
        table: &TableDescriptor,
        query: &ParsedQuery,
    ) -> Result<(), Error> {
        let table_expr = quote_qualified(&table.schema, &table.name);

        let select_list = self.render_projection(table, &table_expr, &query.select)?;
        w.push("SELECT ");
        w.push(&select_list.join(", "));
        w.push(" FROM ");
        w.push(&table_expr);

        if let Some(filter) = query.combined_filter() {
            w.push(" WHERE ");
            render_predicate(w, table, &table_expr, &filter)?;
        }

        self.render_order(w, table, &table_expr, query)?;
        self.render_pagination(w, query);
        Ok(())
    }

    /// Build the select list, resolving embedded relations through
    /// foreign keys.
    fn render_projection(
        &self,
        table: &TableDescriptor,
        table_expr: &str,
        items: &[SelectItem],
    ) -> Result<Vec<String>, Error> {
        if items.is_empty() {
            return Ok(vec![format!("{table_expr}.*")]);
        }
        let mut list = Vec::with_capacity(items.len());
        for item in items {
            match item {
                SelectItem::Column(name) if name == "*" => {
                    list.push(format!("{table_expr}.*"));
                }
                SelectItem::Column(name) => {
                    let col = table.column(name).ok_or_else(|| {
                        Error::BadRequest(format!(
                            "unknown column {name} on {}",
                            table.qualified_name()
                        ))
                    })?;
                    list.push(format!("{table_expr}.{}", quote_ident(&col.name)));
                }
                SelectItem::Embed(embed) => {
                    let related = self.table(&table.schema, &embed.relation)?;
                    let shape = resolve_embed(table, &related, embed.fk_hint.as_deref())?;
                    let related_expr = quote_qualified(&related.schema, &related.name);
                    let inner_list =
                        self.render_projection(&related, &related_expr, &embed.items)?;

                    let join_condition = match &shape {
                        EmbedShape::ToOne(fk) => embed_condition(
                            &related_expr,
                            &fk.referenced_columns,
                            table_expr,
                            &fk.columns,
                        ),
                        EmbedShape::ToMany(fk) => embed_condition(
                            &related_expr,
                            &fk.columns,
                            table_expr,
                            &fk.referenced_columns,
                        ),
                    };

                    let inner = format!(
                        "SELECT {} FROM {} WHERE {}",
                        inner_list.join(", "),
                        related_expr,
                        join_condition
                    );
                    let alias = quote_ident(&embed.relation);
                    let rendered = match shape {
                        EmbedShape::ToOne(_) => {
                            format!("(SELECT row_to_json(_e) FROM ({inner}) _e) AS {alias}")
                        }
                        EmbedShape::ToMany(_) => format!(
                            "(SELECT coalesce(json_agg(row_to_json(_e)), '[]'::json) \
                             FROM ({inner}) _e) AS {alias}"
                        ),
                    };
                    list.push(rendered);
                }
            }
        }
        Ok(list)
    }

    fn render_order(
        &self,
        w: &mut SqlWriter,
        table: &TableDescriptor,
        table_expr: &str,
        query: &ParsedQuery,
    ) -> Result<(), Error> {
        let paginating = query.limit.is_some() || query.offset.is_some();
        if query.order.is_empty() && !paginating {
            return Ok(());
        }

        let mut terms = Vec::new();
        for term in &query.order {
            let col = table.column(&term.column).ok_or_else(|| {
                Error::BadRequest(format!(
                    "unknown order column {} on {}",
                    term.column,
                    table.qualified_name()
                ))
            })?;
            let mut rendered = format!("{table_expr}.{}", quote_ident(&col.name));
            rendered.push_str(if term.descending { " DESC" } else { " ASC" });
            match term.nulls {
                Some(NullsOrder::First) => rendered.push_str(" NULLS FIRST"),
                Some(NullsOrder::Last) => rendered.push_str(" NULLS LAST"),
                None => {}
            }
            terms.push(rendered);
        }

        // Primary-key tie-break keeps pagination deterministic.
        for pk_col in &table.primary_key {
            if !query.order.iter().any(|t| &t.column == pk_col) {
                terms.push(format!("{table_expr}.{} ASC", quote_ident(pk_col)));
            }
        }

        if !terms.is_empty() {
            w.push(" ORDER BY ");
            w.push(&terms.join(", "));
        }
        Ok(())
    }

    fn render_pagination(&self, w: &mut SqlWriter, query: &ParsedQuery) {
        if let Some(limit) = query.limit {
            let capped = limit.min(self.max_rows());
            w.push(" LIMIT ");
            w.push_bind(BindValue::Int(capped as i64));
        }
        if let Some(offset) = query.offset {
            w.push(" OFFSET ");
            w.push_bind(BindValue::Int(offset as i64));
        }
    }
}

/// `related.a = base.x AND related.b = base.y`.
fn embed_condition(
    related_expr: &str,
    related_cols: &[String],
    base_expr: &str,
    base_cols: &[String],
) -> String {
    related_cols
        .iter()
        .zip(base_cols)
        .map(|(rc, bc)| {
            format!(
                "{related_expr}.{} = {base_expr}.{}",
                quote_ident(rc),
                quote_ident(bc)
            )
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Resolve the foreign key connecting base and related. Exactly one
/// candidate must remain after applying the optional hint.
fn resolve_embed<'a>(
    base: &'a TableDescriptor,
    related: &TableDescriptor,
    hint: Option<&str>,
) -> Result<EmbedShape<'a>, Error> {
    let mut to_one: Vec<&ForeignKey> = base
        .foreign_keys_to(&related.schema, &related.name)
        .into_iter()
        .collect();
    let mut to_many: Vec<ForeignKey> = related
        .foreign_keys_to(&base.schema, &base.name)
        .into_iter()
        .cloned()
        .collect();

    if let Some(hint) = hint {
        to_one.retain(|fk| fk.constraint_name == hint);
        to_many.retain(|fk| fk.constraint_name == hint);
    }

    match (to_one.len(), to_many.len()) {
        (1, 0) => Ok(EmbedShape::ToOne(to_one[0])),
        (0, 1) => Ok(EmbedShape::ToMany(to_many.remove(0))),
        (0, 0) => Err(Error::BadRequest(format!(
            "no relationship between {} and {}",
            base.qualified_name(),
            related.qualified_name()
        ))),
        _ => Err(Error::BadRequest(format!(
            "ambiguous relationship between {} and {}; disambiguate with \
             {}!<constraint_name>(...)",
            base.qualified_name(),
            related.qualified_name(),
            related.name
        ))),
    }
}
