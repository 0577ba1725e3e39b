//! The auth surface: signup/signin/signout, refresh with rotation,
//! user profile, magic links, password reset, and OAuth.
//!
//! Auth tables live in `_fluxbase` and are only reachable through the
//! admin pool; nothing here goes through the planner or RLS.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::{Extension, Json};
use chrono::{DateTime, Duration, Utc};
use fluxbase_auth::{TokenPair, TokenType, generate_key, sha256_hex};
use fluxbase_core::collab::EmailMessage;
use fluxbase_core::{CredentialSource, Error, Identity, Role};
use serde::Deserialize;
use serde_json::{Value, json};
use sqlx::Row;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
struct UserRecord {
    id: Uuid,
    email: Option<String>,
    password_hash: Option<String>,
    email_confirmed: bool,
    is_anonymous: bool,
    metadata: Value,
    created_at: DateTime<Utc>,
}

fn user_json(user: &UserRecord) -> Value {
    json!({
        "id": user.id.to_string(),
        "email": user.email,
        "email_confirmed": user.email_confirmed,
        "is_anonymous": user.is_anonymous,
        "metadata": user.metadata,
        "created_at": user.created_at.to_rfc3339(),
    })
}

fn token_response(pair: &TokenPair, user: &UserRecord) -> Value {
    json!({
        "access_token": pair.access.token,
        "refresh_token": pair.refresh.token,
        "token_type": "bearer",
        "expires_in": pair.expires_in,
        "user": user_json(user),
    })
}

fn validate_email(email: &str) -> Result<(), Error> {
    let valid = email.len() >= 3
        && email.len() <= 320
        && email.contains('@')
        && !email.starts_with('@')
        && !email.ends_with('@');
    if !valid {
        return Err(Error::BadRequest(format!("invalid email address: {email}")));
    }
    Ok(())
}

/// bcrypt is CPU-bound; keep it off the async workers.
async fn hash_password(state: &AppState, password: String) -> Result<String, Error> {
    let policy = state.passwords.clone();
    tokio::task::spawn_blocking(move || policy.hash(&password))
        .await
        .map_err(Error::internal)?
}

async fn verify_password(
    state: &AppState,
    password: String,
    hash: Option<String>,
) -> Result<bool, Error> {
    let policy = state.passwords.clone();
    tokio::task::spawn_blocking(move || policy.verify(&password, hash.as_deref()))
        .await
        .map_err(Error::internal)?
}

/// Create a session row and issue its token pair. The session id is
/// minted first so it can ride inside both tokens.
async fn open_session(state: &AppState, user: &UserRecord) -> Result<TokenPair, Error> {
    let session_id = Uuid::new_v4();
    let pair = state.validator.issuer().issue_pair(
        user.id,
        user.email.as_deref(),
        Role::Authenticated,
        session_id,
    )?;
    sqlx::query(
        r#"
        insert into _fluxbase.sessions (id, user_id, refresh_jti, expires_at)
        values ($1, $2, $3, $4)
        "#,
    )
    .bind(session_id)
    .bind(user.id)
    .bind(&pair.refresh.claims.jti)
    .bind(pair.refresh.claims.expires_at())
    .execute(state.executor.admin_pool())
    .await
    .map_err(fluxbase_db::translate_db_error)?;
    Ok(pair)
}

async fn fetch_user(state: &AppState, user_id: Uuid) -> Result<UserRecord, Error> {
    sqlx::query_as::<_, UserRecord>(
        "select id, email, password_hash, email_confirmed, is_anonymous, metadata, created_at \
         from _fluxbase.users where id = $1",
    )
    .bind(user_id)
    .fetch_optional(state.executor.admin_pool())
    .await
    .map_err(fluxbase_db::translate_db_error)?
    .ok_or_else(|| Error::NotFound("no such user".into()))
}

async fn fetch_user_by_email(
    state: &AppState,
    email: &str,
) -> Result<Option<UserRecord>, Error> {
    sqlx::query_as::<_, UserRecord>(
        "select id, email, password_hash, email_confirmed, is_anonymous, metadata, created_at \
         from _fluxbase.users where email = $1",
    )
    .bind(email)
    .fetch_optional(state.executor.admin_pool())
    .await
    .map_err(fluxbase_db::translate_db_error)
}

/// The identity must come from a bearer token (not a key) for the
/// account endpoints.
fn require_token_user(identity: &Identity) -> Result<Uuid, Error> {
    match (identity.source, identity.user_id) {
        (CredentialSource::Token, Some(user_id)) => Ok(user_id),
        _ => Err(Error::Unauthorized("a bearer token is required".into())),
    }
}

// ---------------------------------------------------------------------------
// Signup / signin / signout / refresh
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct SignupBody {
    email: String,
    password: String,
}

pub async fn signup(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SignupBody>,
) -> ApiResult<Response> {
    validate_email(&body.email)?;
    state.passwords.check_strength(&body.password)?;
    let password_hash = hash_password(&state, body.password).await?;

    let user = sqlx::query_as::<_, UserRecord>(
        r#"
        insert into _fluxbase.users (email, password_hash)
        values ($1, $2)
        returning id, email, password_hash, email_confirmed, is_anonymous, metadata, created_at
        "#,
    )
    .bind(&body.email)
    .bind(&password_hash)
    .fetch_one(state.executor.admin_pool())
    .await
    .map_err(fluxbase_db::translate_db_error)?;

    let pair = open_session(&state, &user).await?;
    tracing::info!(user_id = %user.id, "user signed up");
    Ok((axum::http::StatusCode::CREATED, Json(token_response(&pair, &user))).into_response())
}

#[derive(Deserialize)]
pub struct SigninBody {
    email: String,
    password: String,
}

pub async fn signin(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SigninBody>,
) -> ApiResult<Json<Value>> {
    let user = fetch_user_by_email(&state, &body.email).await?;
    let (hash, user) = match user {
        Some(user) => (user.password_hash.clone(), Some(user)),
        None => (None, None),
    };
    // Verify even when the user is missing so the two failure paths
    // cost the same.
    let verified = verify_password(&state, body.password, hash).await?;
    let user = match (verified, user) {
        (true, Some(user)) => user,
        _ => return Err(Error::Unauthorized("invalid email or password".into()).into()),
    };

    let pair = open_session(&state, &user).await?;
    Ok(Json(token_response(&pair, &user)))
}

pub async fn signin_anonymous(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    let user = sqlx::query_as::<_, UserRecord>(
        r#"
        insert into _fluxbase.users (is_anonymous)
        values (true)
        returning id, email, password_hash, email_confirmed, is_anonymous, metadata, created_at
        "#,
    )
    .fetch_one(state.executor.admin_pool())
    .await
    .map_err(fluxbase_db::translate_db_error)?;

    let pair = open_session(&state, &user).await?;
    Ok((axum::http::StatusCode::CREATED, Json(token_response(&pair, &user))).into_response())
}

pub async fn signout(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Json<Value>> {
    require_token_user(&identity)?;
    let jti = identity
        .jti
        .clone()
        .ok_or_else(|| Error::Unauthorized("a bearer token is required".into()))?;
    let expires_at = identity.expires_at.unwrap_or_else(Utc::now);
    state.validator.denylist().revoke(&jti, expires_at).await?;

    // Retire the whole session: its refresh token must stop working
    // too.
    if let Some(session_id) = identity.claims.session_id {
        let row = sqlx::query(
            r#"
            update _fluxbase.sessions
            set revoked = true
            where id = $1 and not revoked
            returning refresh_jti, expires_at
            "#,
        )
        .bind(session_id)
        .fetch_optional(state.executor.admin_pool())
        .await
        .map_err(fluxbase_db::translate_db_error)?;
        if let Some(row) = row {
            let refresh_jti: String = row.get("refresh_jti");
            let refresh_exp: DateTime<Utc> = row.get("expires_at");
            state
                .validator
                .denylist()
                .revoke(&refresh_jti, refresh_exp)
                .await?;
        }
    }

    Ok(Json(json!({})))
}

#[derive(Deserialize)]
pub struct RefreshBody {
    refresh_token: String,
}

pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RefreshBody>,
) -> ApiResult<Json<Value>> {
    let claims = state
        .validator
        .issuer()
        .verify_typed(&body.refresh_token, TokenType::Refresh)?;
    if state.validator.denylist().is_revoked(&claims.jti).await? {
        return Err(Error::Unauthorized("refresh token revoked".into()).into());
    }
    let session_id: Uuid = claims
        .session_id
        .parse()
        .map_err(|_| Error::Unauthorized("malformed session_id claim".into()))?;

    let session = sqlx::query(
        "select user_id, refresh_jti, revoked, expires_at from _fluxbase.sessions where id = $1",
    )
    .bind(session_id)
    .fetch_optional(state.executor.admin_pool())
    .await
    .map_err(fluxbase_db::translate_db_error)?
    .ok_or_else(|| Error::Unauthorized("unknown session".into()))?;

    let revoked: bool = session.get("revoked");
    let expires_at: DateTime<Utc> = session.get("expires_at");
    let current_jti: String = session.get("refresh_jti");
    if revoked || expires_at <= Utc::now() {
        return Err(Error::Unauthorized("session expired".into()).into());
    }
    if current_jti != claims.jti {
        // A rotated-out refresh token came back: assume theft and kill
        // the session.
        sqlx::query("update _fluxbase.sessions set revoked = true where id = $1")
            .bind(session_id)
            .execute(state.executor.admin_pool())
            .await
            .map_err(fluxbase_db::translate_db_error)?;
        return Err(Error::Unauthorized("refresh token reuse detected".into()).into());
    }

    let user = fetch_user(&state, session.get("user_id")).await?;
    let pair = state.validator.issuer().issue_pair(
        user.id,
        user.email.as_deref(),
        Role::Authenticated,
        session_id,
    )?;

    sqlx::query(
        "update _fluxbase.sessions set refresh_jti = $1, expires_at = $2 where id = $3",
    )
    .bind(&pair.refresh.claims.jti)
    .bind(pair.refresh.claims.expires_at())
    .bind(session_id)
    .execute(state.executor.admin_pool())
    .await
    .map_err(fluxbase_db::translate_db_error)?;

    // The rotated-out token is dead from this point on.
    state
        .validator
        .denylist()
        .revoke(&claims.jti, claims.expires_at())
        .await?;

    Ok(Json(token_response(&pair, &user)))
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Json<Value>> {
    let user_id = require_token_user(&identity)?;
    let user = fetch_user(&state, user_id).await?;
    Ok(Json(user_json(&user)))
}

#[derive(Deserialize)]
pub struct UpdateUserBody {
    email: Option<String>,
    password: Option<String>,
    metadata: Option<Value>,
}

pub async fn update_user(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<UpdateUserBody>,
) -> ApiResult<Json<Value>> {
    let user_id = require_token_user(&identity)?;
    let current = fetch_user(&state, user_id).await?;

    let (email, email_confirmed) = match &body.email {
        Some(email) => {
            validate_email(email)?;
            // A changed address needs confirming again.
            let unchanged = current.email.as_deref() == Some(email);
            (
                Some(email.clone()),
                if unchanged { current.email_confirmed } else { false },
            )
        }
        None => (current.email.clone(), current.email_confirmed),
    };
    let password_hash = match body.password {
        Some(password) => Some(hash_password(&state, password).await?),
        None => current.password_hash.clone(),
    };
    let metadata = body.metadata.unwrap_or_else(|| current.metadata.clone());

    let user = sqlx::query_as::<_, UserRecord>(
        r#"
        update _fluxbase.users
        set email = $1, email_confirmed = $2, password_hash = $3, metadata = $4,
            updated_at = now()
        where id = $5
        returning id, email, password_hash, email_confirmed, is_anonymous, metadata, created_at
        "#,
    )
    .bind(&email)
    .bind(email_confirmed)
    .bind(&password_hash)
    .bind(&metadata)
    .bind(user_id)
    .fetch_one(state.executor.admin_pool())
    .await
    .map_err(fluxbase_db::translate_db_error)?;

    Ok(Json(user_json(&user)))
}

// ---------------------------------------------------------------------------
// One-time tokens: magic links and password resets
// ---------------------------------------------------------------------------

async fn issue_one_time_token(
    state: &AppState,
    purpose: &str,
    user_id: Option<Uuid>,
    email: Option<&str>,
    ttl_secs: u64,
) -> Result<String, Error> {
    let token = generate_key("flx");
    sqlx::query(
        r#"
        insert into _fluxbase.one_time_tokens (purpose, token_hash, user_id, email, expires_at)
        values ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(purpose)
    .bind(sha256_hex(&token))
    .bind(user_id)
    .bind(email)
    .bind(Utc::now() + Duration::seconds(ttl_secs as i64))
    .execute(state.executor.admin_pool())
    .await
    .map_err(fluxbase_db::translate_db_error)?;
    Ok(token)
}

/// Atomically consume a live token; returns its user id column.
async fn consume_one_time_token(
    state: &AppState,
    purpose: &str,
    token: &str,
) -> Result<Option<Uuid>, Error> {
    let row = sqlx::query(
        r#"
        update _fluxbase.one_time_tokens
        set consumed = true
        where token_hash = $1
          and purpose = $2
          and not consumed
          and expires_at > now()
        returning user_id
        "#,
    )
    .bind(sha256_hex(token))
    .bind(purpose)
    .fetch_optional(state.executor.admin_pool())
    .await
    .map_err(fluxbase_db::translate_db_error)?;
    match row {
        Some(row) => Ok(row.get("user_id")),
        None => Err(Error::Unauthorized("invalid or expired token".into())),
    }
}

#[derive(Deserialize)]
pub struct EmailBody {
    email: String,
}

pub async fn magiclink_request(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EmailBody>,
) -> ApiResult<Json<Value>> {
    validate_email(&body.email)?;
    // Respond identically whether or not the account exists.
    if let Some(user) = fetch_user_by_email(&state, &body.email).await? {
        let token = issue_one_time_token(
            &state,
            "magiclink",
            Some(user.id),
            user.email.as_deref(),
            state.cfg.auth.magiclink_ttl_secs,
        )
        .await?;
        state
            .email
            .send(EmailMessage {
                to: body.email.clone(),
                subject: "Your sign-in link".into(),
                body_template: "magiclink".into(),
                template_vars: json!({ "token": token.clone() }),
                token,
            })
            .await?;
    } else {
        tracing::debug!("magic link requested for unknown address");
    }
    Ok(Json(json!({})))
}

#[derive(Deserialize)]
pub struct TokenBody {
    token: String,
}

pub async fn magiclink_verify(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TokenBody>,
) -> ApiResult<Json<Value>> {
    let user_id = consume_one_time_token(&state, "magiclink", &body.token)
        .await?
        .ok_or_else(|| Error::Unauthorized("invalid or expired token".into()))?;

    // Arriving through the link proves control of the mailbox.
    sqlx::query("update _fluxbase.users set email_confirmed = true where id = $1")
        .bind(user_id)
        .execute(state.executor.admin_pool())
        .await
        .map_err(fluxbase_db::translate_db_error)?;

    let user = fetch_user(&state, user_id).await?;
    let pair = open_session(&state, &user).await?;
    Ok(Json(token_response(&pair, &user)))
}

pub async fn password_reset_request(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EmailBody>,
) -> ApiResult<Json<Value>> {
    validate_email(&body.email)?;
    if let Some(user) = fetch_user_by_email(&state, &body.email).await? {
        let token = issue_one_time_token(
            &state,
            "password_reset",
            Some(user.id),
            user.email.as_deref(),
            state.cfg.auth.password_reset_ttl_secs,
        )
        .await?;
        state
            .email
            .send(EmailMessage {
                to: body.email.clone(),
                subject: "Reset your password".into(),
                body_template: "password_reset".into(),
                template_vars: json!({ "token": token.clone() }),
                token,
            })
            .await?;
    } else {
        tracing::debug!("password reset requested for unknown address");
    }
    Ok(Json(json!({})))
}

pub async fn password_reset_verify(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TokenBody>,
) -> ApiResult<Json<Value>> {
    let valid: Option<i32> = sqlx::query_scalar(
        r#"
        select 1 from _fluxbase.one_time_tokens
        where token_hash = $1
          and purpose = 'password_reset'
          and not consumed
          and expires_at > now()
        "#,
    )
    .bind(sha256_hex(&body.token))
    .fetch_optional(state.executor.admin_pool())
    .await
    .map_err(fluxbase_db::translate_db_error)?;
    Ok(Json(json!({ "valid": valid.is_some() })))
}

#[derive(Deserialize)]
pub struct ResetConfirmBody {
    token: String,
    password: String,
}

pub async fn password_reset_confirm(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ResetConfirmBody>,
) -> ApiResult<Json<Value>> {
    state.passwords.check_strength(&body.password)?;
    let user_id = consume_one_time_token(&state, "password_reset", &body.token)
        .await?
        .ok_or_else(|| Error::Unauthorized("invalid or expired token".into()))?;

    let password_hash = hash_password(&state, body.password).await?;
    sqlx::query(
        "update _fluxbase.users set password_hash = $1, updated_at = now() where id = $2",
    )
    .bind(&password_hash)
    .bind(user_id)
    .execute(state.executor.admin_pool())
    .await
    .map_err(fluxbase_db::translate_db_error)?;

    // Every open session dies with the old password.
    sqlx::query("update _fluxbase.sessions set revoked = true where user_id = $1")
        .bind(user_id)
        .execute(state.executor.admin_pool())
        .await
        .map_err(fluxbase_db::translate_db_error)?;

    Ok(Json(json!({})))
}

// ---------------------------------------------------------------------------
// OAuth
// ---------------------------------------------------------------------------

pub async fn oauth_providers(State(state): State<Arc<AppState>>) -> Json<Value> {
    let providers: Vec<Value> = state
        .cfg
        .auth
        .oauth
        .keys()
        .map(|name| json!({ "name": name }))
        .collect();
    Json(json!({ "providers": providers }))
}

pub async fn oauth_authorize(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
) -> ApiResult<Redirect> {
    let config = state
        .cfg
        .auth
        .oauth
        .get(&provider)
        .ok_or_else(|| Error::NotFound(format!("unknown oauth provider: {provider}")))?;

    let csrf_state =
        issue_one_time_token(&state, "oauth_state", None, None, 600).await?;
    let query: String = form_urlencoded::Serializer::new(String::new())
        .append_pair("response_type", "code")
        .append_pair("client_id", &config.client_id)
        .append_pair("redirect_uri", &config.redirect_uri)
        .append_pair("scope", &config.scopes.join(" "))
        .append_pair("state", &csrf_state)
        .finish();
    Ok(Redirect::temporary(&format!(
        "{}?{}",
        config.authorize_url, query
    )))
}

#[derive(Deserialize)]
pub struct OAuthCallbackBody {
    provider: String,
    code: String,
    state: String,
}

pub async fn oauth_callback(
    State(state): State<Arc<AppState>>,
    Json(body): Json<OAuthCallbackBody>,
) -> ApiResult<Json<Value>> {
    let config = state
        .cfg
        .auth
        .oauth
        .get(&body.provider)
        .cloned()
        .ok_or_else(|| Error::NotFound(format!("unknown oauth provider: {}", body.provider)))?;

    consume_one_time_token(&state, "oauth_state", &body.state).await?;

    // Exchange the code for the provider's access token.
    let token_res: Value = state
        .http
        .post(&config.token_url)
        .header("accept", "application/json")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", body.code.as_str()),
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.as_str()),
            ("redirect_uri", config.redirect_uri.as_str()),
        ])
        .send()
        .await
        .map_err(|e| Error::ServiceUnavailable(format!("oauth token exchange: {e}")))?
        .json()
        .await
        .map_err(|e| Error::ServiceUnavailable(format!("oauth token exchange: {e}")))?;
    let access_token = token_res
        .get("access_token")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Unauthorized("oauth code exchange failed".into()))?;

    let userinfo: Value = state
        .http
        .get(&config.userinfo_url)
        .bearer_auth(access_token)
        .header("accept", "application/json")
        .send()
        .await
        .map_err(|e| Error::ServiceUnavailable(format!("oauth userinfo: {e}")))?
        .json()
        .await
        .map_err(|e| Error::ServiceUnavailable(format!("oauth userinfo: {e}")))?;
    let email = userinfo
        .get("email")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Unauthorized("oauth provider did not supply an email".into()))?;

    let user = sqlx::query_as::<_, UserRecord>(
        r#"
        insert into _fluxbase.users (email, email_confirmed)
        values ($1, true)
        on conflict (email) do update set email_confirmed = true, updated_at = now()
        returning id, email, password_hash, email_confirmed, is_anonymous, metadata, created_at
        "#,
    )
    .bind(email)
    .fetch_one(state.executor.admin_pool())
    .await
    .map_err(fluxbase_db::translate_db_error)?;

    let pair = open_session(&state, &user).await?;
    Ok(Json(token_response(&pair, &user)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_validation() {
        validate_email("u@e.com").unwrap();
        for bad in ["", "u", "@e.com", "u@"] {
            assert!(validate_email(bad).is_err(), "{bad:?} should be invalid");
        }
    }
}
