//! Credential extraction and the authentication middleware.
//!
//! Every route except `/health` passes through [`authenticate`]; the
//! resulting identity rides in request extensions. Absence of any
//! credential is the anonymous identity, not an error; RLS decides
//! what anonymous may see.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, Method, header};
use axum::middleware::Next;
use axum::response::Response;
use fluxbase_auth::{Operation, ProvidedCredentials};
use std::sync::Arc;

/// Pull credentials out of the auth headers. `extra_bearer` lets the
/// WebSocket upgrade pass a token carried in the query string.
pub fn extract_credentials(headers: &HeaderMap, extra_bearer: Option<&str>) -> ProvidedCredentials {
    let mut credentials = ProvidedCredentials::default();

    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(rest) = value.strip_prefix("Bearer ") {
            let rest = rest.trim();
            if !rest.is_empty() {
                credentials.bearer = Some(rest.to_string());
            }
        } else if let Some(rest) = value.strip_prefix("ServiceKey ") {
            let rest = rest.trim();
            if !rest.is_empty() {
                credentials.service_key = Some(rest.to_string());
            }
        }
    }

    if let Some(value) = headers.get("x-service-key").and_then(|v| v.to_str().ok()) {
        let value = value.trim();
        if !value.is_empty() {
            credentials.service_key = Some(value.to_string());
        }
    }

    if let Some(value) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        let value = value.trim();
        if !value.is_empty() {
            credentials.api_key = Some(value.to_string());
        }
    }

    if credentials.bearer.is_none() {
        if let Some(token) = extra_bearer {
            if !token.is_empty() {
                credentials.bearer = Some(token.to_string());
            }
        }
    }

    credentials
}

fn operation_for(method: &Method) -> Operation {
    if matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS) {
        Operation::Read
    } else {
        Operation::Write
    }
}

pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let credentials = extract_credentials(req.headers(), None);
    let operation = operation_for(req.method());
    let identity = state.validator.authenticate(&credentials, operation).await?;
    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn bearer_and_service_key_forms() {
        let creds = extract_credentials(&headers(&[("authorization", "Bearer abc")]), None);
        assert_eq!(creds.bearer.as_deref(), Some("abc"));

        let creds = extract_credentials(&headers(&[("authorization", "ServiceKey svc")]), None);
        assert_eq!(creds.service_key.as_deref(), Some("svc"));

        let creds = extract_credentials(
            &headers(&[("x-service-key", "svc2"), ("x-api-key", "key3")]),
            None,
        );
        assert_eq!(creds.service_key.as_deref(), Some("svc2"));
        assert_eq!(creds.api_key.as_deref(), Some("key3"));
    }

    #[test]
    fn query_token_fills_missing_bearer() {
        let creds = extract_credentials(&HeaderMap::new(), Some("ws-token"));
        assert_eq!(creds.bearer.as_deref(), Some("ws-token"));

        let creds = extract_credentials(
            &headers(&[("authorization", "Bearer header-token")]),
            Some("ws-token"),
        );
        assert_eq!(creds.bearer.as_deref(), Some("header-token"));
    }

    #[test]
    fn read_write_classification() {
        assert_eq!(operation_for(&Method::GET), Operation::Read);
        assert_eq!(operation_for(&Method::POST), Operation::Write);
        assert_eq!(operation_for(&Method::DELETE), Operation::Write);
    }
}
