//! Applying planner bind values to a driver query.

use chrono::{DateTime, Utc};
use fluxbase_planner::{BindValue, Statement};
use fluxbase_schema::SqlType;
use serde_json::Value;
use sqlx::Postgres;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use uuid::Uuid;

/// Build a driver query with every planner bind attached in order.
pub fn bind_statement(stmt: &Statement) -> Query<'_, Postgres, PgArguments> {
    let mut query = sqlx::query(&stmt.sql);
    for bind in &stmt.binds {
        query = apply(query, bind);
    }
    query
}

fn apply<'q>(
    query: Query<'q, Postgres, PgArguments>,
    bind: &'q BindValue,
) -> Query<'q, Postgres, PgArguments> {
    match bind {
        BindValue::Bool(b) => query.bind(*b),
        BindValue::Int(i) => query.bind(*i),
        BindValue::Float(f) => query.bind(*f),
        BindValue::Text(s) => query.bind(s.as_str()),
        BindValue::Uuid(u) => query.bind(*u),
        BindValue::Timestamptz(t) => query.bind(*t),
        BindValue::Json(v) => query.bind(v),
        BindValue::Casted { text, .. } => query.bind(text.as_str()),
        BindValue::Null(sql_type) => bind_null(query, sql_type),
    }
}

/// NULLs stay typed so the parameter's declared type matches the
/// column (text-bound types carry a SQL-side cast from the planner).
fn bind_null<'q>(
    query: Query<'q, Postgres, PgArguments>,
    sql_type: &SqlType,
) -> Query<'q, Postgres, PgArguments> {
    match sql_type {
        SqlType::Bool => query.bind(Option::<bool>::None),
        SqlType::Int2 | SqlType::Int4 | SqlType::Int8 => query.bind(Option::<i64>::None),
        SqlType::Float4 | SqlType::Float8 => query.bind(Option::<f64>::None),
        SqlType::Uuid => query.bind(Option::<Uuid>::None),
        SqlType::Timestamptz => query.bind(Option::<DateTime<Utc>>::None),
        SqlType::Json | SqlType::Jsonb => query.bind(Option::<Value>::None),
        _ => query.bind(Option::<String>::None),
    }
}
