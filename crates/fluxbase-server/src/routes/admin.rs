//! Administrative endpoints. Guarded by the service role or the
//! installation's setup token; never by request-derived claims.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::{Extension, Json};
use fluxbase_auth::{constant_time_eq, sha256_hex};
use fluxbase_core::{Error, Identity};
use serde_json::{Value, json};
use std::sync::Arc;

fn require_admin(state: &AppState, identity: &Identity, headers: &HeaderMap) -> Result<(), Error> {
    if identity.is_service_role() {
        return Ok(());
    }
    let presented = headers
        .get("x-setup-token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let setup_token_matches = !presented.is_empty()
        && constant_time_eq(
            sha256_hex(presented).as_bytes(),
            sha256_hex(&state.cfg.security.setup_token).as_bytes(),
        );
    if setup_token_matches {
        return Ok(());
    }
    Err(Error::Forbidden("admin access requires the service role".into()))
}

/// `POST /admin/schema/reload`: invalidate and rebuild the schema
/// cache. Called after out-of-band migrations or extension toggles.
pub async fn reload_schema(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &identity, &headers)?;
    state.schema_cache.invalidate();
    let (generation, tables) = state.schema_cache.list_tables().await?;
    Ok(Json(json!({
        "generation": generation,
        "tables": tables.len(),
    })))
}
