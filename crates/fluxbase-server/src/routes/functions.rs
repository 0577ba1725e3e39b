//! `POST /functions/{func}`: invoke a deployed edge function through
//! the runtime collaborator. The core never executes user code itself;
//! it forwards the request body and relays the response. Function calls
//! share the long RPC deadline.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::{Extension, Json};
use fluxbase_core::{Error, Identity};
use serde_json::Value;
use std::sync::Arc;

pub async fn invoke_function(
    State(state): State<Arc<AppState>>,
    Path(func): Path<String>,
    Extension(_identity): Extension<Identity>,
    body: Option<Json<Value>>,
) -> ApiResult<Json<Value>> {
    let request = match body {
        Some(Json(value)) => value,
        None => Value::Null,
    };
    let invocation = state.functions.invoke(&func, request);
    match tokio::time::timeout(state.request_deadline(true), invocation).await {
        Ok(response) => Ok(Json(response?)),
        Err(_) => Err(Error::Timeout.into()),
    }
}
