//! The storage surface: bucket management, file up/download, signed
//! URLs. Bucket metadata lives in `_fluxbase.buckets`; objects go to
//! the configured backend.
//!
//! Policy: bucket management is service-role only; writes need an
//! authenticated (or service) identity; reads are open on public
//! buckets and authenticated elsewhere. Signed downloads carry their
//! own proof and skip auth entirely.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use fluxbase_core::{Error, Identity, Role};
use serde::Deserialize;
use serde_json::{Value, json};
use sqlx::Row;
use std::sync::Arc;

fn require_service(identity: &Identity) -> Result<(), Error> {
    if identity.is_service_role() {
        Ok(())
    } else {
        Err(Error::Forbidden("bucket management requires the service role".into()))
    }
}

fn require_writer(identity: &Identity) -> Result<(), Error> {
    match identity.role {
        Role::Authenticated | Role::ServiceRole => Ok(()),
        Role::Anon => Err(Error::Forbidden("storage writes require authentication".into())),
    }
}

struct Bucket {
    public: bool,
}

async fn fetch_bucket(state: &AppState, name: &str) -> Result<Bucket, Error> {
    let row = sqlx::query("select public from _fluxbase.buckets where name = $1")
        .bind(name)
        .fetch_optional(state.executor.admin_pool())
        .await
        .map_err(fluxbase_db::translate_db_error)?
        .ok_or_else(|| Error::NotFound(format!("no such bucket: {name}")))?;
    Ok(Bucket {
        public: row.get("public"),
    })
}

fn require_reader(bucket: &Bucket, identity: &Identity) -> Result<(), Error> {
    if bucket.public {
        return Ok(());
    }
    match identity.role {
        Role::Authenticated | Role::ServiceRole => Ok(()),
        Role::Anon => Err(Error::Forbidden("bucket is not public".into())),
    }
}

// ---------------------------------------------------------------------------
// Buckets
// ---------------------------------------------------------------------------

pub async fn list_buckets(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Json<Value>> {
    require_service(&identity)?;
    let rows = sqlx::query(
        "select name, public, created_at from _fluxbase.buckets order by name",
    )
    .fetch_all(state.executor.admin_pool())
    .await
    .map_err(fluxbase_db::translate_db_error)?;
    let buckets: Vec<Value> = rows
        .into_iter()
        .map(|row| {
            json!({
                "name": row.get::<String, _>("name"),
                "public": row.get::<bool, _>("public"),
                "created_at": row.get::<chrono::DateTime<chrono::Utc>, _>("created_at").to_rfc3339(),
            })
        })
        .collect();
    Ok(Json(json!({ "buckets": buckets })))
}

#[derive(Deserialize)]
pub struct CreateBucketBody {
    name: String,
    #[serde(default)]
    public: bool,
}

pub async fn create_bucket(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<CreateBucketBody>,
) -> ApiResult<Response> {
    require_service(&identity)?;
    let valid_name = !body.name.is_empty()
        && body.name.len() <= 64
        && body
            .name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
    if !valid_name {
        return Err(Error::BadRequest(format!("invalid bucket name: {}", body.name)).into());
    }

    sqlx::query("insert into _fluxbase.buckets (name, public) values ($1, $2)")
        .bind(&body.name)
        .bind(body.public)
        .execute(state.executor.admin_pool())
        .await
        .map_err(fluxbase_db::translate_db_error)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "name": body.name, "public": body.public })),
    )
        .into_response())
}

pub async fn delete_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Json<Value>> {
    require_service(&identity)?;
    let deleted = sqlx::query("delete from _fluxbase.buckets where name = $1")
        .bind(&bucket)
        .execute(state.executor.admin_pool())
        .await
        .map_err(fluxbase_db::translate_db_error)?;
    if deleted.rows_affected() == 0 {
        return Err(Error::NotFound(format!("no such bucket: {bucket}")).into());
    }
    state.storage.delete_bucket(&bucket).await?;
    Ok(Json(json!({})))
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct UploadParams {
    path: String,
}

pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
    Query(params): Query<UploadParams>,
    Extension(identity): Extension<Identity>,
    body: Bytes,
) -> ApiResult<Response> {
    require_writer(&identity)?;
    fetch_bucket(&state, &bucket).await?;
    let meta = state
        .storage
        .put(&bucket, &params.path, body.to_vec())
        .await?;
    Ok((StatusCode::CREATED, Json(json!(meta))).into_response())
}

pub async fn download_file(
    State(state): State<Arc<AppState>>,
    Path((bucket, path)): Path<(String, String)>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Response> {
    let record = fetch_bucket(&state, &bucket).await?;
    require_reader(&record, &identity)?;
    serve_object(&state, &bucket, &path).await
}

pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    Path((bucket, path)): Path<(String, String)>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Json<Value>> {
    require_writer(&identity)?;
    fetch_bucket(&state, &bucket).await?;
    state.storage.delete(&bucket, &path).await?;
    Ok(Json(json!({})))
}

async fn serve_object(state: &AppState, bucket: &str, path: &str) -> ApiResult<Response> {
    let (data, meta) = state.storage.get(bucket, path).await?;
    let content_type = meta
        .content_type
        .unwrap_or_else(|| "application/octet-stream".to_string());
    Ok((
        [(header::CONTENT_TYPE, content_type)],
        data,
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Signed URLs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct SignedUrlBody {
    path: String,
    expires_in: Option<u64>,
}

pub async fn create_signed_url(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<SignedUrlBody>,
) -> ApiResult<Json<Value>> {
    require_writer(&identity)?;
    fetch_bucket(&state, &bucket).await?;

    let ttl = body
        .expires_in
        .unwrap_or(state.cfg.storage.signed_url_ttl_secs);
    let signed = state.signer.sign(&bucket, &body.path, ttl);
    let query: String = form_urlencoded::Serializer::new(String::new())
        .append_pair("expires", &signed.expires_at.timestamp().to_string())
        .append_pair("token", &signed.token)
        .finish();
    Ok(Json(json!({
        "url": format!("/storage/signed/{bucket}/{}?{query}", body.path),
        "expires_at": signed.expires_at.to_rfc3339(),
    })))
}

#[derive(Deserialize)]
pub struct SignedParams {
    expires: i64,
    token: String,
}

pub async fn download_signed(
    State(state): State<Arc<AppState>>,
    Path((bucket, path)): Path<(String, String)>,
    Query(params): Query<SignedParams>,
) -> ApiResult<Response> {
    state
        .signer
        .verify(&bucket, &path, params.expires, &params.token)?;
    serve_object(&state, &bucket, &path).await
}
