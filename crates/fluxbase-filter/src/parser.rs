//! The filter grammar parser.
//!
//! Input is the ordered list of decoded query-string pairs; output is a
//! [`ParsedQuery`]. Reserved keys (`select`, `order`, `limit`, `offset`,
//! `single`, `count`, `returning`, `upsert`, `on_conflict`, `and`, `or`)
//! have their own productions; every other key is a column filter.

use crate::ast::{
    EmbedSelect, FilterValue, NullsOrder, Op, OrderTerm, ParsedQuery, Predicate, SelectItem,
};
use fluxbase_core::Error;

/// Postgres caps identifiers at 63 bytes; anything longer was never a
/// real column.
const MAX_IDENT_LEN: usize = 63;

pub fn parse_query(pairs: &[(String, String)]) -> Result<ParsedQuery, Error> {
    let mut query = ParsedQuery::default();

    for (key, value) in pairs {
        match key.as_str() {
            "select" => query.select = parse_select(value)?,
            "order" => query.order = parse_order(value)?,
            "limit" => {
                query.limit = Some(value.parse().map_err(|_| {
                    Error::BadRequest(format!("invalid limit: {value}"))
                })?);
            }
            "offset" => {
                query.offset = Some(value.parse().map_err(|_| {
                    Error::BadRequest(format!("invalid offset: {value}"))
                })?);
            }
            "single" => query.single = parse_bool(key, value)?,
            "count" => match value.as_str() {
                "exact" => query.count_exact = true,
                "none" => query.count_exact = false,
                other => {
                    return Err(Error::BadRequest(format!("invalid count mode: {other}")));
                }
            },
            "returning" => match value.as_str() {
                "minimal" => query.returning_minimal = true,
                "representation" => query.returning_minimal = false,
                other => {
                    return Err(Error::BadRequest(format!("invalid returning mode: {other}")));
                }
            },
            "upsert" => query.upsert = parse_bool(key, value)?,
            "on_conflict" => {
                let columns = value
                    .split(',')
                    .map(|c| validated_ident(c.trim()))
                    .collect::<Result<Vec<_>, _>>()?;
                if columns.is_empty() {
                    return Err(Error::BadRequest("empty on_conflict target".into()));
                }
                query.on_conflict = Some(columns);
            }
            "and" => query.filters.push(parse_logical(value, true)?),
            "or" => query.filters.push(parse_logical(value, false)?),
            _ => {
                let column = validated_ident(key)?;
                let (op, filter_value, negated) = parse_op_value(value)?;
                query.filters.push(Predicate::Cmp {
                    column,
                    op,
                    value: filter_value,
                    negated,
                });
            }
        }
    }

    Ok(query)
}

/// Parse a standalone filter expression of the form `column=op.value`,
/// `and=(...)`, or `or=(...)`. Used for realtime subscription filters.
pub fn parse_filter_expr(expr: &str) -> Result<Predicate, Error> {
    let (key, value) = expr
        .split_once('=')
        .ok_or_else(|| Error::BadRequest(format!("invalid filter expression: {expr}")))?;
    match key {
        "and" => parse_logical(value, true),
        "or" => parse_logical(value, false),
        _ => {
            let column = validated_ident(key)?;
            let (op, filter_value, negated) = parse_op_value(value)?;
            Ok(Predicate::Cmp {
                column,
                op,
                value: filter_value,
                negated,
            })
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, Error> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(Error::BadRequest(format!("invalid {key}: {other}"))),
    }
}

fn validated_ident(s: &str) -> Result<String, Error> {
    let mut chars = s.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if !valid || s.len() > MAX_IDENT_LEN {
        return Err(Error::BadRequest(format!("invalid identifier: {s}")));
    }
    Ok(s.to_string())
}

/// Parse `op.value` with an optional `not.` prefix.
fn parse_op_value(raw: &str) -> Result<(Op, FilterValue, bool), Error> {
    let (negated, rest) = match raw.strip_prefix("not.") {
        Some(rest) => (true, rest),
        None => (false, raw),
    };

    let (op_str, value_raw) = rest
        .split_once('.')
        .ok_or_else(|| Error::BadRequest(format!("filter missing value: {raw}")))?;

    let op = Op::parse(op_str)
        .ok_or_else(|| Error::BadRequest(format!("unknown operator: {op_str}")))?;

    let value = match op {
        Op::In => {
            let inner = value_raw
                .strip_prefix('(')
                .and_then(|v| v.strip_suffix(')'))
                .ok_or_else(|| {
                    Error::BadRequest(format!("`in` requires a parenthesised list: {value_raw}"))
                })?;
            FilterValue::List(split_top_level(inner)?.iter().map(|s| unquote(s)).collect())
        }
        Op::Is => match value_raw {
            "null" => FilterValue::Null,
            "true" => FilterValue::Bool(true),
            "false" => FilterValue::Bool(false),
            other => {
                return Err(Error::BadRequest(format!(
                    "`is` accepts only null/true/false, got: {other}"
                )));
            }
        },
        _ => parse_scalar_value(value_raw),
    };

    Ok((op, value, negated))
}

fn parse_scalar_value(raw: &str) -> FilterValue {
    match raw {
        "null" => FilterValue::Null,
        "true" => FilterValue::Bool(true),
        "false" => FilterValue::Bool(false),
        _ => FilterValue::Literal(unquote(raw)),
    }
}

/// Strip one layer of double quotes, honoring backslash escapes.
fn unquote(s: &str) -> String {
    let inner = match s.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        Some(inner) => inner,
        None => return s.to_string(),
    };
    let mut out = String::with_capacity(inner.len());
    let mut escaped = false;
    for c in inner.chars() {
        if escaped {
            out.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else {
            out.push(c);
        }
    }
    out
}

/// `and=(...)` / `or=(...)`.
fn parse_logical(value: &str, conjunction: bool) -> Result<Predicate, Error> {
    let inner = value
        .strip_prefix('(')
        .and_then(|v| v.strip_suffix(')'))
        .ok_or_else(|| {
            Error::BadRequest(format!("logical filter requires parentheses: {value}"))
        })?;
    let children = split_top_level(inner)?
        .iter()
        .map(|part| parse_nested_filter(part))
        .collect::<Result<Vec<_>, _>>()?;
    if children.is_empty() {
        return Err(Error::BadRequest("empty logical filter".into()));
    }
    Ok(if conjunction {
        Predicate::And(children)
    } else {
        Predicate::Or(children)
    })
}

/// A filter inside a logical list uses dots throughout:
/// `status.eq.draft`, `price.not.gt.5`, `and(a.eq.1,b.eq.2)`.
fn parse_nested_filter(part: &str) -> Result<Predicate, Error> {
    for (prefix, conjunction) in [("and(", true), ("or(", false)] {
        if let Some(rest) = part.strip_prefix(prefix) {
            let inner = rest
                .strip_suffix(')')
                .ok_or_else(|| Error::BadRequest(format!("unbalanced parentheses: {part}")))?;
            let children = split_top_level(inner)?
                .iter()
                .map(|p| parse_nested_filter(p))
                .collect::<Result<Vec<_>, _>>()?;
            if children.is_empty() {
                return Err(Error::BadRequest("empty logical filter".into()));
            }
            return Ok(if conjunction {
                Predicate::And(children)
            } else {
                Predicate::Or(children)
            });
        }
    }

    let (column, rest) = part
        .split_once('.')
        .ok_or_else(|| Error::BadRequest(format!("invalid filter: {part}")))?;
    let column = validated_ident(column)?;
    let (op, value, negated) = parse_op_value(rest)?;
    Ok(Predicate::Cmp {
        column,
        op,
        value,
        negated,
    })
}

/// Split on commas at parenthesis depth zero, honoring double-quoted
/// segments.
fn split_top_level(s: &str) -> Result<Vec<String>, Error> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut escaped = false;

    for c in s.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => {
                current.push(c);
                escaped = true;
            }
            '"' => {
                current.push(c);
                in_quotes = !in_quotes;
            }
            '(' if !in_quotes => {
                depth += 1;
                current.push(c);
            }
            ')' if !in_quotes => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| Error::BadRequest(format!("unbalanced parentheses: {s}")))?;
                current.push(c);
            }
            ',' if !in_quotes && depth == 0 => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }

    if depth != 0 || in_quotes {
        return Err(Error::BadRequest(format!("unterminated filter: {s}")));
    }
    if !current.is_empty() {
        parts.push(current);
    }
    Ok(parts)
}

/// `select=id,name,author(id,name)` with optional FK hints
/// (`comments!comments_post_id_fkey(body)`).
fn parse_select(value: &str) -> Result<Vec<SelectItem>, Error> {
    if value.is_empty() {
        return Err(Error::BadRequest("empty select".into()));
    }
    split_top_level(value)?
        .iter()
        .map(|item| parse_select_item(item))
        .collect()
}

fn parse_select_item(item: &str) -> Result<SelectItem, Error> {
    match item.find('(') {
        None => {
            if item == "*" {
                return Ok(SelectItem::Column("*".to_string()));
            }
            Ok(SelectItem::Column(validated_ident(item)?))
        }
        Some(open) => {
            let head = &item[..open];
            let inner = item[open + 1..]
                .strip_suffix(')')
                .ok_or_else(|| Error::BadRequest(format!("unbalanced parentheses: {item}")))?;
            let (relation, fk_hint) = match head.split_once('!') {
                Some((rel, hint)) => (validated_ident(rel)?, Some(validated_ident(hint)?)),
                None => (validated_ident(head)?, None),
            };
            let items = if inner.is_empty() {
                Vec::new()
            } else {
                parse_select(inner)?
            };
            Ok(SelectItem::Embed(EmbedSelect {
                relation,
                fk_hint,
                items,
            }))
        }
    }
}

/// `order=age.desc.nullslast,name`; direction defaults to ascending.
fn parse_order(value: &str) -> Result<Vec<OrderTerm>, Error> {
    value
        .split(',')
        .map(|term| {
            let mut parts = term.split('.');
            let column = validated_ident(
                parts
                    .next()
                    .ok_or_else(|| Error::BadRequest("empty order term".into()))?,
            )?;
            let mut descending = false;
            let mut nulls = None;
            for part in parts {
                match part {
                    "asc" => descending = false,
                    "desc" => descending = true,
                    "nullsfirst" => nulls = Some(NullsOrder::First),
                    "nullslast" => nulls = Some(NullsOrder::Last),
                    other => {
                        return Err(Error::BadRequest(format!("invalid order modifier: {other}")));
                    }
                }
            }
            Ok(OrderTerm {
                column,
                descending,
                nulls,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parses_simple_comparison() {
        let q = parse_query(&pairs(&[("id", "eq.123")])).unwrap();
        assert_eq!(
            q.filters,
            vec![Predicate::cmp("id", Op::Eq, FilterValue::Literal("123".into()))]
        );
    }

    #[test]
    fn parses_negated_comparison() {
        let q = parse_query(&pairs(&[("status", "not.eq.done")])).unwrap();
        match &q.filters[0] {
            Predicate::Cmp { negated, op, .. } => {
                assert!(*negated);
                assert_eq!(*op, Op::Eq);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_in_list() {
        let q = parse_query(&pairs(&[("id", "in.(1,2,3)")])).unwrap();
        assert_eq!(
            q.filters[0],
            Predicate::cmp(
                "id",
                Op::In,
                FilterValue::List(vec!["1".into(), "2".into(), "3".into()])
            )
        );
    }

    #[test]
    fn in_requires_parenthesised_list() {
        assert!(parse_query(&pairs(&[("id", "in.1,2")])).is_err());
    }

    #[test]
    fn quoted_list_items_keep_commas() {
        let q = parse_query(&pairs(&[("name", r#"in.("a,b",c)"#)])).unwrap();
        assert_eq!(
            q.filters[0],
            Predicate::cmp(
                "name",
                Op::In,
                FilterValue::List(vec!["a,b".into(), "c".into()])
            )
        );
    }

    #[test]
    fn is_accepts_only_null_and_booleans() {
        let q = parse_query(&pairs(&[("deleted_at", "is.null")])).unwrap();
        assert_eq!(
            q.filters[0],
            Predicate::cmp("deleted_at", Op::Is, FilterValue::Null)
        );
        assert!(parse_query(&pairs(&[("deleted_at", "is.maybe")])).is_err());
    }

    #[test]
    fn parses_or_with_nested_and() {
        let q = parse_query(&pairs(&[(
            "or",
            "(status.eq.draft,and(status.eq.published,views.gt.100))",
        )]))
        .unwrap();
        let expected = Predicate::Or(vec![
            Predicate::cmp("status", Op::Eq, FilterValue::Literal("draft".into())),
            Predicate::And(vec![
                Predicate::cmp("status", Op::Eq, FilterValue::Literal("published".into())),
                Predicate::cmp("views", Op::Gt, FilterValue::Literal("100".into())),
            ]),
        ]);
        assert_eq!(q.filters, vec![expected]);
    }

    #[test]
    fn spec_scenario_filter() {
        // or=(status.eq.draft,status.eq.published)&author_id=eq.1
        let q = parse_query(&pairs(&[
            ("or", "(status.eq.draft,status.eq.published)"),
            ("author_id", "eq.1"),
        ]))
        .unwrap();
        assert_eq!(q.filters.len(), 2);
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let err = parse_query(&pairs(&[("id", "similar.5")])).unwrap_err();
        assert!(err.to_string().contains("unknown operator"));
    }

    #[test]
    fn adversarial_identifiers_are_rejected() {
        for bad in [
            "users; DROP TABLE x",
            "users\"--",
            "a.b",
            "1col",
            "col name",
            "",
        ] {
            assert!(
                parse_query(&pairs(&[(bad, "eq.1")])).is_err(),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn parses_select_with_embeds_and_hint() {
        let q = parse_query(&pairs(&[(
            "select",
            "id,name,author(id,name),comments!comments_post_id_fkey(body)",
        )]))
        .unwrap();
        assert_eq!(q.select.len(), 4);
        match &q.select[3] {
            SelectItem::Embed(embed) => {
                assert_eq!(embed.relation, "comments");
                assert_eq!(embed.fk_hint.as_deref(), Some("comments_post_id_fkey"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_order_with_nulls_placement() {
        let q = parse_query(&pairs(&[("order", "age.desc.nullslast,name")])).unwrap();
        assert_eq!(
            q.order,
            vec![
                OrderTerm {
                    column: "age".into(),
                    descending: true,
                    nulls: Some(NullsOrder::Last),
                },
                OrderTerm {
                    column: "name".into(),
                    descending: false,
                    nulls: None,
                },
            ]
        );
    }

    #[test]
    fn parses_pagination_and_modes() {
        let q = parse_query(&pairs(&[
            ("limit", "10"),
            ("offset", "20"),
            ("single", "true"),
            ("count", "exact"),
            ("returning", "minimal"),
            ("upsert", "true"),
            ("on_conflict", "email"),
        ]))
        .unwrap();
        assert_eq!(q.limit, Some(10));
        assert_eq!(q.offset, Some(20));
        assert!(q.single && q.count_exact && q.returning_minimal && q.upsert);
        assert_eq!(q.on_conflict, Some(vec!["email".to_string()]));
    }

    #[test]
    fn filter_expr_parses_for_subscriptions() {
        let p = parse_filter_expr("status=eq.active").unwrap();
        assert_eq!(
            p,
            Predicate::cmp("status", Op::Eq, FilterValue::Literal("active".into()))
        );
        assert!(parse_filter_expr("garbage").is_err());
    }

    #[test]
    fn unbalanced_parens_are_rejected() {
        assert!(parse_query(&pairs(&[("or", "(a.eq.1")])).is_err());
        assert!(parse_query(&pairs(&[("id", "in.(1,2")])).is_err());
    }
}
