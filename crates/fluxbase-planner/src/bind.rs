//! Typed bind values and coercion from wire input.
//!
//! Filter literals arrive as strings and body values as JSON; both are
//! coerced to the column's SQL type here so the driver sends correctly
//! typed parameters. Types the driver has no native encoding for
//! (numeric, date, bare timestamp) travel as text with a SQL-side cast.

use chrono::{DateTime, Utc};
use fluxbase_core::Error;
use fluxbase_schema::SqlType;
use serde_json::Value;
use uuid::Uuid;

use crate::quote::quote_ident;

/// One positional parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Uuid(Uuid),
    Timestamptz(DateTime<Utc>),
    Json(Value),
    /// Text payload that needs a SQL-side cast to `cast_to`.
    Casted { text: String, cast_to: String },
    /// A typed NULL.
    Null(SqlType),
}

impl BindValue {
    /// Cast appended after the placeholder, when the value travels as
    /// text. Typed NULLs for text-bound types carry the same cast so
    /// the parameter's declared type never fights the column's.
    pub fn cast_suffix(&self) -> Option<String> {
        match self {
            BindValue::Casted { cast_to, .. } => Some(cast_to.clone()),
            BindValue::Null(sql_type) => text_cast_target(sql_type),
            _ => None,
        }
    }
}

/// Cast target for types bound as text, `None` for natively bound ones.
fn text_cast_target(sql_type: &SqlType) -> Option<String> {
    match sql_type {
        SqlType::Numeric => Some("numeric".to_string()),
        SqlType::Date => Some("date".to_string()),
        SqlType::Time => Some("time".to_string()),
        SqlType::Timestamp => Some("timestamp".to_string()),
        SqlType::Bytea => Some("bytea".to_string()),
        SqlType::Other(name) => Some(quote_ident(name)),
        _ => None,
    }
}

/// Coerce a filter literal to the column type.
pub fn coerce_literal(sql_type: &SqlType, raw: &str) -> Result<BindValue, Error> {
    let fail = || {
        Error::BadRequest(format!(
            "value {raw:?} is not valid for a {sql_type:?} column"
        ))
    };

    Ok(match sql_type {
        SqlType::Bool => BindValue::Bool(match raw {
            "true" | "t" => true,
            "false" | "f" => false,
            _ => return Err(fail()),
        }),
        SqlType::Int2 | SqlType::Int4 | SqlType::Int8 => {
            BindValue::Int(raw.parse().map_err(|_| fail())?)
        }
        SqlType::Float4 | SqlType::Float8 => BindValue::Float(raw.parse().map_err(|_| fail())?),
        SqlType::Uuid => BindValue::Uuid(raw.parse().map_err(|_| fail())?),
        SqlType::Timestamptz => BindValue::Timestamptz(
            DateTime::parse_from_rfc3339(raw)
                .map_err(|_| fail())?
                .with_timezone(&Utc),
        ),
        SqlType::Text | SqlType::Varchar | SqlType::Char => BindValue::Text(raw.to_string()),
        SqlType::Json | SqlType::Jsonb => {
            BindValue::Json(serde_json::from_str(raw).map_err(|_| fail())?)
        }
        other => match text_cast_target(other) {
            Some(cast_to) => BindValue::Casted {
                text: raw.to_string(),
                cast_to,
            },
            None => BindValue::Text(raw.to_string()),
        },
    })
}

/// Coerce a JSON body value to the column type.
pub fn coerce_json(sql_type: &SqlType, value: &Value) -> Result<BindValue, Error> {
    if value.is_null() {
        return Ok(BindValue::Null(sql_type.clone()));
    }

    let fail = || {
        Error::BadRequest(format!(
            "value {value} is not valid for a {sql_type:?} column"
        ))
    };

    Ok(match sql_type {
        SqlType::Json | SqlType::Jsonb => BindValue::Json(value.clone()),
        SqlType::Bool => BindValue::Bool(value.as_bool().ok_or_else(fail)?),
        SqlType::Int2 | SqlType::Int4 | SqlType::Int8 => {
            BindValue::Int(value.as_i64().ok_or_else(fail)?)
        }
        SqlType::Float4 | SqlType::Float8 => BindValue::Float(value.as_f64().ok_or_else(fail)?),
        SqlType::Numeric => {
            let text = match value {
                Value::Number(n) => n.to_string(),
                Value::String(s) => s.clone(),
                _ => return Err(fail()),
            };
            BindValue::Casted {
                text,
                cast_to: "numeric".to_string(),
            }
        }
        _ => match value {
            Value::String(s) => coerce_literal(sql_type, s)?,
            _ => return Err(fail()),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_coercion_by_type() {
        assert_eq!(
            coerce_literal(&SqlType::Int8, "42").unwrap(),
            BindValue::Int(42)
        );
        assert_eq!(
            coerce_literal(&SqlType::Bool, "true").unwrap(),
            BindValue::Bool(true)
        );
        assert!(matches!(
            coerce_literal(&SqlType::Numeric, "1.50").unwrap(),
            BindValue::Casted { .. }
        ));
        assert!(coerce_literal(&SqlType::Int8, "abc").is_err());
        assert!(coerce_literal(&SqlType::Uuid, "not-a-uuid").is_err());
    }

    #[test]
    fn timestamptz_parses_rfc3339() {
        let bound = coerce_literal(&SqlType::Timestamptz, "2026-01-02T03:04:05Z").unwrap();
        assert!(matches!(bound, BindValue::Timestamptz(_)));
        assert!(coerce_literal(&SqlType::Timestamptz, "yesterday").is_err());
    }

    #[test]
    fn json_body_coercion() {
        use serde_json::json;
        assert_eq!(
            coerce_json(&SqlType::Int8, &json!(7)).unwrap(),
            BindValue::Int(7)
        );
        assert_eq!(
            coerce_json(&SqlType::Text, &json!("hi")).unwrap(),
            BindValue::Text("hi".into())
        );
        assert_eq!(
            coerce_json(&SqlType::Jsonb, &json!({"a": 1})).unwrap(),
            BindValue::Json(json!({"a": 1}))
        );
        assert_eq!(
            coerce_json(&SqlType::Int8, &Value::Null).unwrap(),
            BindValue::Null(SqlType::Int8)
        );
        assert!(coerce_json(&SqlType::Int8, &json!("not a number")).is_err());
    }
}
