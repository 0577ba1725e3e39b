//! `POST /rpc/{func}`: catalog-resolved function calls. RPC gets the
//! long request deadline.

use crate::error::ApiResult;
use crate::routes::tables::run_fetch;
use crate::state::{AppState, split_table_name};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use fluxbase_core::{Error, Identity};
use fluxbase_planner::Planner;
use serde_json::{Map, Value};
use std::sync::Arc;

pub async fn call_function(
    State(state): State<Arc<AppState>>,
    Path(func): Path<String>,
    Extension(identity): Extension<Identity>,
    body: Option<Json<Value>>,
) -> ApiResult<Response> {
    let args: Map<String, Value> = match body {
        None => Map::new(),
        Some(Json(Value::Null)) => Map::new(),
        Some(Json(Value::Object(map))) => map,
        Some(_) => {
            return Err(Error::BadRequest("rpc arguments must be a JSON object".into()).into());
        }
    };
    let (schema, name) = split_table_name(&func);

    let snapshot = state.schema_cache.snapshot().await?;
    let planner = Planner::new(&snapshot, state.cfg.server.max_rows);
    let stmt = planner.rpc(&schema, &name, &args)?;

    let (value, _) = run_fetch(&state, &identity, &stmt, None, true).await?;
    Ok(Json(value).into_response())
}
