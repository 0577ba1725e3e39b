//! The REST dispatcher for `/tables/{table}`.
//!
//! RLS rejections never surface as raw errors here: invisible rows make
//! selects return empty arrays and mutations report zero affected rows
//! (404 only for `single=true` requests).

use crate::error::ApiResult;
use crate::state::{AppState, split_table_name};
use axum::extract::{Path, RawQuery, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use fluxbase_core::{Error, Identity};
use fluxbase_filter::{ParsedQuery, parse_query};
use fluxbase_planner::{Planner, Statement};
use serde_json::{Map, Value, json};
use std::sync::Arc;

pub fn parse_raw_query(raw: Option<&str>) -> Vec<(String, String)> {
    match raw {
        Some(raw) => form_urlencoded::parse(raw.as_bytes())
            .into_owned()
            .collect(),
        None => Vec::new(),
    }
}

/// Run statements inside one bound transaction under the request
/// deadline. The future is dropped on timeout, which rolls the
/// transaction back.
pub async fn run_fetch(
    state: &AppState,
    identity: &Identity,
    stmt: &Statement,
    count_stmt: Option<&Statement>,
    rpc: bool,
) -> Result<(Value, Option<i64>), Error> {
    let work = async {
        let mut tx = state.executor.begin(identity).await?;
        let value = tx.fetch_json(stmt).await?;
        let total = match count_stmt {
            Some(count_stmt) => Some(tx.fetch_count(count_stmt).await?),
            None => None,
        };
        tx.commit().await?;
        Ok::<_, Error>((value, total))
    };
    match tokio::time::timeout(state.request_deadline(rpc), work).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout),
    }
}

async fn run_execute(
    state: &AppState,
    identity: &Identity,
    stmt: &Statement,
) -> Result<u64, Error> {
    let work = async {
        let mut tx = state.executor.begin(identity).await?;
        let affected = tx.execute(stmt).await?;
        tx.commit().await?;
        Ok::<_, Error>(affected)
    };
    match tokio::time::timeout(state.request_deadline(false), work).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout),
    }
}

/// `Content-Range: <start>-<end>/<total>` when the client asked for the
/// exact count.
fn content_range(offset: u64, returned: usize, total: i64) -> String {
    if returned == 0 {
        format!("*/{total}")
    } else {
        format!("{}-{}/{total}", offset, offset + returned as u64 - 1)
    }
}

fn respond_rows(
    value: Value,
    total: Option<i64>,
    query: &ParsedQuery,
    created: bool,
) -> ApiResult<Response> {
    let rows = match value {
        Value::Array(rows) => rows,
        other => vec![other],
    };
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    let body = if query.single {
        match rows.into_iter().next() {
            Some(row) => row,
            None => return Err(Error::NotFound("no rows matched".into()).into()),
        }
    } else {
        Value::Array(rows)
    };

    let mut response = (status, Json(&body)).into_response();
    if let Some(total) = total {
        let returned = body.as_array().map(Vec::len).unwrap_or(1);
        let range = content_range(query.offset.unwrap_or(0), returned, total);
        response.headers_mut().insert(
            header::CONTENT_RANGE,
            range.parse().expect("content-range is ascii"),
        );
    }
    Ok(response)
}

pub async fn select_rows(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
    RawQuery(raw): RawQuery,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Response> {
    let pairs = parse_raw_query(raw.as_deref());
    let query = parse_query(&pairs)?;
    let (schema, name) = split_table_name(&table);

    let snapshot = state.schema_cache.snapshot().await?;
    let planner = Planner::new(&snapshot, state.cfg.server.max_rows);
    let stmt = planner.select(&schema, &name, &query)?;
    let count_stmt = if query.count_exact {
        Some(planner.count(&schema, &name, &query)?)
    } else {
        None
    };

    let (value, total) = run_fetch(&state, &identity, &stmt, count_stmt.as_ref(), false).await?;
    respond_rows(value, total, &query, false)
}

fn body_object(body: Value) -> Result<Map<String, Value>, Error> {
    match body {
        Value::Object(map) => Ok(map),
        Value::Array(_) => Err(Error::BadRequest(
            "expected a JSON object; use the /batch route for arrays".into(),
        )),
        _ => Err(Error::BadRequest("expected a JSON object".into())),
    }
}

fn body_array(body: Value) -> Result<Vec<Map<String, Value>>, Error> {
    let items = match body {
        Value::Array(items) => items,
        _ => return Err(Error::BadRequest("expected a JSON array of objects".into())),
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::Object(map) => Ok(map),
            _ => Err(Error::BadRequest("batch items must be objects".into())),
        })
        .collect()
}

async fn insert_rows(
    state: Arc<AppState>,
    table: String,
    raw: Option<String>,
    identity: Identity,
    rows: Vec<Map<String, Value>>,
    single_object: bool,
) -> ApiResult<Response> {
    let pairs = parse_raw_query(raw.as_deref());
    let mut query = parse_query(&pairs)?;
    query.single = single_object && !query.returning_minimal;
    let (schema, name) = split_table_name(&table);

    let snapshot = state.schema_cache.snapshot().await?;
    let planner = Planner::new(&snapshot, state.cfg.server.max_rows);
    let stmt = planner.insert(&schema, &name, &rows, &query)?;

    if query.returning_minimal {
        let affected = run_execute(&state, &identity, &stmt).await?;
        return Ok((StatusCode::CREATED, Json(json!({ "count": affected }))).into_response());
    }
    let (value, _) = run_fetch(&state, &identity, &stmt, None, false).await?;
    respond_rows(value, None, &query, true)
}

pub async fn insert_row(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
    RawQuery(raw): RawQuery,
    Extension(identity): Extension<Identity>,
    Json(body): Json<Value>,
) -> ApiResult<Response> {
    let row = body_object(body)?;
    insert_rows(state, table, raw, identity, vec![row], true).await
}

pub async fn insert_batch(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
    RawQuery(raw): RawQuery,
    Extension(identity): Extension<Identity>,
    Json(body): Json<Value>,
) -> ApiResult<Response> {
    let rows = body_array(body)?;
    insert_rows(state, table, raw, identity, rows, false).await
}

pub async fn update_rows(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
    RawQuery(raw): RawQuery,
    Extension(identity): Extension<Identity>,
    Json(body): Json<Value>,
) -> ApiResult<Response> {
    let patch = body_object(body)?;
    let pairs = parse_raw_query(raw.as_deref());
    let query = parse_query(&pairs)?;
    let (schema, name) = split_table_name(&table);

    let snapshot = state.schema_cache.snapshot().await?;
    let planner = Planner::new(&snapshot, state.cfg.server.max_rows);
    let stmt = planner.update(&schema, &name, &patch, &query)?;

    if query.returning_minimal {
        let affected = run_execute(&state, &identity, &stmt).await?;
        return Ok(Json(json!({ "count": affected })).into_response());
    }
    let (value, _) = run_fetch(&state, &identity, &stmt, None, false).await?;
    respond_rows(value, None, &query, false)
}

pub async fn delete_rows(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
    RawQuery(raw): RawQuery,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Response> {
    let pairs = parse_raw_query(raw.as_deref());
    let query = parse_query(&pairs)?;
    let (schema, name) = split_table_name(&table);

    let snapshot = state.schema_cache.snapshot().await?;
    let planner = Planner::new(&snapshot, state.cfg.server.max_rows);
    let stmt = planner.delete(&schema, &name, &query)?;

    if query.returning_minimal {
        let affected = run_execute(&state, &identity, &stmt).await?;
        return Ok(Json(json!({ "count": affected })).into_response());
    }
    let (value, _) = run_fetch(&state, &identity, &stmt, None, false).await?;
    respond_rows(value, None, &query, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_range_forms() {
        assert_eq!(content_range(0, 10, 57), "0-9/57");
        assert_eq!(content_range(20, 5, 57), "20-24/57");
        assert_eq!(content_range(100, 0, 57), "*/57");
    }

    #[test]
    fn raw_query_parsing_decodes_percent_escapes() {
        let pairs = parse_raw_query(Some("id=eq.123&select=id%2Cname"));
        assert_eq!(
            pairs,
            vec![
                ("id".to_string(), "eq.123".to_string()),
                ("select".to_string(), "id,name".to_string()),
            ]
        );
        assert!(parse_raw_query(None).is_empty());
    }

    #[test]
    fn body_shape_validation() {
        assert!(body_object(json!({"a": 1})).is_ok());
        assert!(body_object(json!([1])).is_err());
        assert!(body_array(json!([{"a": 1}])).is_ok());
        assert!(body_array(json!({"a": 1})).is_err());
        assert!(body_array(json!([1])).is_err());
    }
}
