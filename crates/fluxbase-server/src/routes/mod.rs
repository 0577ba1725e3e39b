//! Route assembly.

pub mod admin;
pub mod aggregate;
pub mod auth;
pub mod functions;
pub mod health;
pub mod rpc;
pub mod storage;
pub mod tables;

use crate::extract;
use crate::state::AppState;
use crate::ws;
use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        // Data surface
        .route(
            "/tables/{table}",
            get(tables::select_rows)
                .post(tables::insert_row)
                .patch(tables::update_rows)
                .delete(tables::delete_rows),
        )
        .route(
            "/tables/{table}/batch",
            post(tables::insert_batch)
                .patch(tables::update_rows)
                .delete(tables::delete_rows),
        )
        .route("/aggregate/{table}/{func}", get(aggregate::aggregate_rows))
        .route("/rpc/{func}", post(rpc::call_function))
        .route("/functions/{func}", post(functions::invoke_function))
        // Auth surface
        .route("/auth/signup", post(auth::signup))
        .route("/auth/signin", post(auth::signin))
        .route("/auth/signin/anonymous", post(auth::signin_anonymous))
        .route("/auth/signout", post(auth::signout))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/user", get(auth::get_user).patch(auth::update_user))
        .route("/auth/magiclink", post(auth::magiclink_request))
        .route("/auth/magiclink/verify", post(auth::magiclink_verify))
        .route("/auth/password/reset", post(auth::password_reset_request))
        .route("/auth/password/reset/verify", post(auth::password_reset_verify))
        .route("/auth/password/reset/confirm", post(auth::password_reset_confirm))
        .route("/auth/oauth/providers", get(auth::oauth_providers))
        .route("/auth/oauth/{provider}/authorize", get(auth::oauth_authorize))
        .route("/auth/oauth/callback", post(auth::oauth_callback))
        // Storage surface
        .route(
            "/storage/buckets",
            get(storage::list_buckets).post(storage::create_bucket),
        )
        .route("/storage/buckets/{bucket}", delete(storage::delete_bucket))
        .route("/storage/buckets/{bucket}/files", post(storage::upload_file))
        .route(
            "/storage/buckets/{bucket}/files/{*path}",
            get(storage::download_file).delete(storage::delete_file),
        )
        .route(
            "/storage/buckets/{bucket}/signed-url",
            post(storage::create_signed_url),
        )
        // Admin surface
        .route("/admin/schema/reload", post(admin::reload_schema))
        // Realtime
        .route("/realtime", get(ws::upgrade))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            extract::authenticate,
        ));

    // Signed downloads carry their own proof; /health carries none.
    Router::new()
        .route("/health", get(health::health))
        .route(
            "/storage/signed/{bucket}/{*path}",
            get(storage::download_signed),
        )
        .merge(api)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(
            state.cfg.server.body_limit,
        ))
        .with_state(state)
}
