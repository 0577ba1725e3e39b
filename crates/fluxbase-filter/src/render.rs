//! Canonical rendering of a parsed query back to its wire form.
//!
//! `parse(render(parse(s)))` yields an AST equivalent to `parse(s)`;
//! the grammar round-trip tests pin this property.

use crate::ast::{
    EmbedSelect, FilterValue, NullsOrder, ParsedQuery, Predicate, SelectItem,
};

/// Render to ordered query-string pairs (unencoded).
pub fn render_query(query: &ParsedQuery) -> Vec<(String, String)> {
    let mut pairs = Vec::new();

    if !query.select.is_empty() {
        pairs.push(("select".to_string(), render_select(&query.select)));
    }
    for predicate in &query.filters {
        pairs.push(render_top_predicate(predicate));
    }
    if !query.order.is_empty() {
        let terms: Vec<String> = query
            .order
            .iter()
            .map(|t| {
                let mut s = t.column.clone();
                if t.descending {
                    s.push_str(".desc");
                }
                match t.nulls {
                    Some(NullsOrder::First) => s.push_str(".nullsfirst"),
                    Some(NullsOrder::Last) => s.push_str(".nullslast"),
                    None => {}
                }
                s
            })
            .collect();
        pairs.push(("order".to_string(), terms.join(",")));
    }
    if let Some(limit) = query.limit {
        pairs.push(("limit".to_string(), limit.to_string()));
    }
    if let Some(offset) = query.offset {
        pairs.push(("offset".to_string(), offset.to_string()));
    }
    if query.single {
        pairs.push(("single".to_string(), "true".to_string()));
    }
    if query.count_exact {
        pairs.push(("count".to_string(), "exact".to_string()));
    }
    if query.returning_minimal {
        pairs.push(("returning".to_string(), "minimal".to_string()));
    }
    if query.upsert {
        pairs.push(("upsert".to_string(), "true".to_string()));
    }
    if let Some(on_conflict) = &query.on_conflict {
        pairs.push(("on_conflict".to_string(), on_conflict.join(",")));
    }

    pairs
}

fn render_top_predicate(predicate: &Predicate) -> (String, String) {
    match predicate {
        Predicate::Cmp {
            column,
            op,
            value,
            negated,
        } => {
            let mut rhs = String::new();
            if *negated {
                rhs.push_str("not.");
            }
            rhs.push_str(op.as_str());
            rhs.push('.');
            rhs.push_str(&render_value(value));
            (column.clone(), rhs)
        }
        Predicate::And(children) => ("and".to_string(), render_children(children)),
        Predicate::Or(children) => ("or".to_string(), render_children(children)),
    }
}

fn render_children(children: &[Predicate]) -> String {
    let parts: Vec<String> = children.iter().map(render_nested_predicate).collect();
    format!("({})", parts.join(","))
}

fn render_nested_predicate(predicate: &Predicate) -> String {
    match predicate {
        Predicate::Cmp {
            column,
            op,
            value,
            negated,
        } => {
            let neg = if *negated { "not." } else { "" };
            format!("{column}.{neg}{}.{}", op.as_str(), render_value(value))
        }
        Predicate::And(children) => format!("and{}", render_children(children)),
        Predicate::Or(children) => format!("or{}", render_children(children)),
    }
}

fn render_value(value: &FilterValue) -> String {
    match value {
        FilterValue::Literal(s) => quote_if_needed(s),
        FilterValue::List(items) => {
            let rendered: Vec<String> = items.iter().map(|s| quote_if_needed(s)).collect();
            format!("({})", rendered.join(","))
        }
        FilterValue::Null => "null".to_string(),
        FilterValue::Bool(true) => "true".to_string(),
        FilterValue::Bool(false) => "false".to_string(),
    }
}

/// Literals that would be re-tokenized (separators, keywords) get quoted.
fn quote_if_needed(s: &str) -> String {
    let needs_quoting = s.is_empty()
        || matches!(s, "null" | "true" | "false")
        || s.contains([',', '(', ')', '"', '.']);
    if !needs_quoting {
        return s.to_string();
    }
    let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

fn render_select(items: &[SelectItem]) -> String {
    let parts: Vec<String> = items.iter().map(render_select_item).collect();
    parts.join(",")
}

fn render_select_item(item: &SelectItem) -> String {
    match item {
        SelectItem::Column(c) => c.clone(),
        SelectItem::Embed(EmbedSelect {
            relation,
            fk_hint,
            items,
        }) => {
            let hint = fk_hint
                .as_ref()
                .map(|h| format!("!{h}"))
                .unwrap_or_default();
            format!("{relation}{hint}({})", render_select(items))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_query;
    use pretty_assertions::assert_eq;

    fn round_trip(raw: &[(&str, &str)]) {
        let pairs: Vec<(String, String)> = raw
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let parsed = parse_query(&pairs).unwrap();
        let rendered = render_query(&parsed);
        let reparsed = parse_query(&rendered).unwrap();

        assert_eq!(parsed.filters.len(), reparsed.filters.len());
        for (a, b) in parsed.filters.iter().zip(reparsed.filters.iter()) {
            assert!(a.equivalent(b), "{a:?} != {b:?}");
        }
        assert_eq!(parsed.select, reparsed.select);
        assert_eq!(parsed.order, reparsed.order);
        assert_eq!(parsed.limit, reparsed.limit);
        assert_eq!(parsed.offset, reparsed.offset);
        assert_eq!(parsed.single, reparsed.single);
    }

    #[test]
    fn round_trips_simple_filters() {
        round_trip(&[("id", "eq.123")]);
        round_trip(&[("status", "not.eq.done")]);
        round_trip(&[("name", "ilike.*smith*")]);
        round_trip(&[("deleted_at", "is.null")]);
        round_trip(&[("id", "in.(1,2,3)")]);
    }

    #[test]
    fn round_trips_logical_trees() {
        round_trip(&[("or", "(status.eq.draft,status.eq.published)")]);
        round_trip(&[("and", "(a.gte.1,or(b.eq.2,c.is.null))")]);
        round_trip(&[
            ("or", "(status.eq.draft,status.eq.published)"),
            ("author_id", "eq.1"),
        ]);
    }

    #[test]
    fn round_trips_values_needing_quotes() {
        round_trip(&[("name", r#"eq."draft,published""#)]);
        round_trip(&[("version", r#"eq."1.2.3""#)]);
        round_trip(&[("label", r#"in.("a,b","c\"d")"#)]);
        round_trip(&[("literal", r#"eq."null""#)]);
    }

    #[test]
    fn round_trips_projection_and_ordering() {
        round_trip(&[
            ("select", "id,name,author(id,name)"),
            ("order", "age.desc.nullslast,name"),
            ("limit", "10"),
            ("offset", "20"),
        ]);
    }
}
