//! `GET /aggregate/{table}/{func}`: count/sum/avg/min/max with
//! optional grouping, filtered by the usual grammar.

use crate::error::ApiResult;
use crate::routes::tables::{parse_raw_query, run_fetch};
use crate::state::{AppState, split_table_name};
use axum::extract::{Path, RawQuery, State};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use fluxbase_core::{Error, Identity};
use fluxbase_filter::parse_query;
use fluxbase_planner::{AggFn, Planner};
use std::sync::Arc;

pub async fn aggregate_rows(
    State(state): State<Arc<AppState>>,
    Path((table, func)): Path<(String, String)>,
    RawQuery(raw): RawQuery,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Response> {
    let func: AggFn = func.parse()?;

    // `column` and `group_by` are aggregate parameters, not filters.
    let mut column = None;
    let mut group_by: Vec<String> = Vec::new();
    let mut filter_pairs = Vec::new();
    for (key, value) in parse_raw_query(raw.as_deref()) {
        match key.as_str() {
            "column" => column = Some(value),
            "group_by" => {
                group_by = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            _ => filter_pairs.push((key, value)),
        }
    }
    let query = parse_query(&filter_pairs)?;
    if query.single {
        return Err(Error::BadRequest("single does not apply to aggregates".into()).into());
    }
    let (schema, name) = split_table_name(&table);

    let snapshot = state.schema_cache.snapshot().await?;
    let planner = Planner::new(&snapshot, state.cfg.server.max_rows);
    let stmt = planner.aggregate(&schema, &name, func, column.as_deref(), &group_by, &query)?;

    let (value, _) = run_fetch(&state, &identity, &stmt, None, false).await?;
    Ok(Json(value).into_response())
}
