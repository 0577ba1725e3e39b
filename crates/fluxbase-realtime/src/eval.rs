//! In-process evaluation of subscription row filters.
//!
//! Subscription filters reuse the URL filter grammar; here the predicate
//! is evaluated directly against the change event's row JSON, mirroring
//! the SQL semantics closely enough for channel filtering.

use fluxbase_filter::{FilterValue, Op, Predicate};
use serde_json::{Map, Value};

pub fn matches_row(predicate: &Predicate, row: &Map<String, Value>) -> bool {
    match predicate {
        Predicate::And(children) => children.iter().all(|p| matches_row(p, row)),
        Predicate::Or(children) => children.iter().any(|p| matches_row(p, row)),
        Predicate::Cmp {
            column,
            op,
            value,
            negated,
        } => {
            let actual = row.get(column).unwrap_or(&Value::Null);
            let matched = compare(actual, *op, value);
            matched != *negated
        }
    }
}

fn compare(actual: &Value, op: Op, expected: &FilterValue) -> bool {
    match op {
        Op::Is => match expected {
            FilterValue::Null => actual.is_null(),
            FilterValue::Bool(b) => actual.as_bool() == Some(*b),
            _ => false,
        },
        Op::In => match expected {
            FilterValue::List(items) => items.iter().any(|item| literal_eq(actual, item)),
            _ => false,
        },
        Op::Eq | Op::Neq => {
            let eq = match expected {
                FilterValue::Literal(s) => literal_eq(actual, s),
                FilterValue::Bool(b) => actual.as_bool() == Some(*b),
                FilterValue::Null => actual.is_null(),
                FilterValue::List(_) => false,
            };
            if op == Op::Eq { eq } else { !eq }
        }
        Op::Gt | Op::Gte | Op::Lt | Op::Lte => ordered_compare(actual, op, expected),
        Op::Like | Op::Ilike => {
            let (FilterValue::Literal(pattern), Some(text)) = (expected, actual.as_str()) else {
                return false;
            };
            let pattern = pattern.replace('*', "%");
            if op == Op::Ilike {
                wildcard_match(&pattern.to_lowercase(), &text.to_lowercase())
            } else {
                wildcard_match(&pattern, text)
            }
        }
    }
}

fn literal_eq(actual: &Value, expected: &str) -> bool {
    match actual {
        Value::String(s) => s == expected,
        Value::Number(n) => match expected.parse::<f64>() {
            Ok(e) => n.as_f64().is_some_and(|a| a == e),
            Err(_) => false,
        },
        Value::Bool(b) => expected.parse::<bool>().map(|e| e == *b).unwrap_or(false),
        _ => false,
    }
}

fn ordered_compare(actual: &Value, op: Op, expected: &FilterValue) -> bool {
    let FilterValue::Literal(expected) = expected else {
        return false;
    };
    let ordering = match actual {
        Value::Number(n) => {
            let (Some(a), Ok(e)) = (n.as_f64(), expected.parse::<f64>()) else {
                return false;
            };
            a.partial_cmp(&e)
        }
        Value::String(s) => Some(s.as_str().cmp(expected.as_str())),
        _ => None,
    };
    let Some(ordering) = ordering else {
        return false;
    };
    match op {
        Op::Gt => ordering.is_gt(),
        Op::Gte => ordering.is_ge(),
        Op::Lt => ordering.is_lt(),
        Op::Lte => ordering.is_le(),
        _ => false,
    }
}

/// SQL LIKE with `%` wildcards (and `_` for a single character).
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    // Classic two-pointer LIKE matcher with backtracking on `%`.
    let (mut pi, mut ti) = (0usize, 0usize);
    let (mut star, mut star_ti) = (None::<usize>, 0usize);
    while ti < t.len() {
        if pi < p.len() && (p[pi] == t[ti] || p[pi] == '_') {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '%' {
            star = Some(pi);
            star_ti = ti;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            star_ti += 1;
            ti = star_ti;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '%' {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluxbase_filter::parse_filter_expr;
    use serde_json::json;

    fn row(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn eq_and_neq_on_mixed_types() {
        let r = row(json!({"status": "active", "count": 3, "done": true}));
        assert!(matches_row(&parse_filter_expr("status=eq.active").unwrap(), &r));
        assert!(!matches_row(&parse_filter_expr("status=eq.idle").unwrap(), &r));
        assert!(matches_row(&parse_filter_expr("count=eq.3").unwrap(), &r));
        assert!(matches_row(&parse_filter_expr("done=eq.true").unwrap(), &r));
        assert!(matches_row(&parse_filter_expr("status=not.eq.idle").unwrap(), &r));
    }

    #[test]
    fn ordering_operators() {
        let r = row(json!({"views": 10}));
        assert!(matches_row(&parse_filter_expr("views=gt.5").unwrap(), &r));
        assert!(matches_row(&parse_filter_expr("views=lte.10").unwrap(), &r));
        assert!(!matches_row(&parse_filter_expr("views=lt.10").unwrap(), &r));
    }

    #[test]
    fn like_patterns() {
        let r = row(json!({"name": "Jane Smith"}));
        assert!(matches_row(&parse_filter_expr("name=like.*Smith").unwrap(), &r));
        assert!(matches_row(&parse_filter_expr("name=ilike.*smith*").unwrap(), &r));
        assert!(!matches_row(&parse_filter_expr("name=like.*smith").unwrap(), &r));
    }

    #[test]
    fn is_null_and_in_list() {
        let r = row(json!({"deleted_at": null, "status": "draft"}));
        assert!(matches_row(&parse_filter_expr("deleted_at=is.null").unwrap(), &r));
        assert!(matches_row(
            &parse_filter_expr("status=in.(draft,published)").unwrap(),
            &r
        ));
        assert!(!matches_row(&parse_filter_expr("status=in.(archived)").unwrap(), &r));
    }

    #[test]
    fn logical_trees() {
        let r = row(json!({"status": "published", "views": 200}));
        let p = parse_filter_expr("or=(status.eq.draft,and(status.eq.published,views.gt.100))")
            .unwrap();
        assert!(matches_row(&p, &r));
    }

    #[test]
    fn missing_column_only_matches_is_null() {
        let r = row(json!({"present": 1}));
        assert!(matches_row(&parse_filter_expr("absent=is.null").unwrap(), &r));
        assert!(!matches_row(&parse_filter_expr("absent=eq.1").unwrap(), &r));
    }
}
