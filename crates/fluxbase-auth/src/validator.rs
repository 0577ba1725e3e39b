//! The credential validator: turns whatever the request presented into
//! a bound identity.
//!
//! Precedence is fixed: service-role key, then JWT bearer, then client
//! API key. A presented-but-invalid credential fails the request; it
//! never falls through to a weaker one. No credential at all maps to
//! the `anon` role, which is subject to the same RLS evaluation as
//! everything else.

use crate::denylist::TokenDenylist;
use crate::jwt::{TokenIssuer, TokenType};
use crate::keys::{ApiKeyStore, ServiceKeyVerifier};
use fluxbase_core::{Error, Identity};
use std::sync::Arc;

/// The operation class a request is asking for, checked against API key
/// scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
}

impl Operation {
    pub fn scope(&self) -> &'static str {
        match self {
            Operation::Read => "read",
            Operation::Write => "write",
        }
    }
}

/// Credentials extracted from a request, already stripped of their
/// header framing.
#[derive(Debug, Clone, Default)]
pub struct ProvidedCredentials {
    /// `Authorization: ServiceKey <key>` or `X-Service-Key`.
    pub service_key: Option<String>,
    /// `Authorization: Bearer <jwt>` (or the WebSocket query string).
    pub bearer: Option<String>,
    /// `X-API-Key`.
    pub api_key: Option<String>,
}

pub struct CredentialValidator {
    issuer: Arc<TokenIssuer>,
    denylist: Arc<TokenDenylist>,
    service_keys: ServiceKeyVerifier,
    api_keys: Option<ApiKeyStore>,
}

impl CredentialValidator {
    pub fn new(
        issuer: Arc<TokenIssuer>,
        denylist: Arc<TokenDenylist>,
        service_keys: ServiceKeyVerifier,
        api_keys: Option<ApiKeyStore>,
    ) -> Self {
        CredentialValidator {
            issuer,
            denylist,
            service_keys,
            api_keys,
        }
    }

    pub fn issuer(&self) -> &Arc<TokenIssuer> {
        &self.issuer
    }

    pub fn denylist(&self) -> &Arc<TokenDenylist> {
        &self.denylist
    }

    pub async fn authenticate(
        &self,
        credentials: &ProvidedCredentials,
        operation: Operation,
    ) -> Result<Identity, Error> {
        if let Some(key) = &credentials.service_key {
            if self.service_keys.verify(key) {
                return Ok(Identity::service());
            }
            return Err(Error::Unauthorized("invalid service key".into()));
        }

        if let Some(token) = &credentials.bearer {
            return self.authenticate_bearer(token).await;
        }

        if let Some(key) = &credentials.api_key {
            let store = self
                .api_keys
                .as_ref()
                .ok_or_else(|| Error::Unauthorized("API keys are not enabled".into()))?;
            return store.verify(key, operation.scope()).await;
        }

        Ok(Identity::anonymous())
    }

    /// Verify a bearer token all the way to an identity: signature,
    /// standard claims, token type, then the denylist.
    pub async fn authenticate_bearer(&self, token: &str) -> Result<Identity, Error> {
        let claims = self.issuer.verify_typed(token, TokenType::Access)?;
        if self.denylist.is_revoked(&claims.jti).await? {
            return Err(Error::Unauthorized("token revoked".into()));
        }
        claims.to_identity()
    }

    /// Re-check an already-established identity, used by the realtime
    /// heartbeat to cancel subscriptions after revocation or expiry.
    pub async fn revalidate(&self, identity: &Identity) -> Result<(), Error> {
        if identity.is_expired_at(chrono::Utc::now()) {
            return Err(Error::Unauthorized("token expired".into()));
        }
        if let Some(jti) = &identity.jti {
            if self.denylist.is_revoked(jti).await? {
                return Err(Error::Unauthorized("token revoked".into()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::denylist::MemoryDenylistStore;
    use chrono::Utc;
    use fluxbase_core::{CredentialSource, Role};
    use std::time::Duration;
    use uuid::Uuid;

    fn validator(service_key: Option<&str>) -> CredentialValidator {
        let issuer = Arc::new(TokenIssuer::new(
            "0123456789abcdef0123456789abcdef",
            "fluxbase".into(),
            900,
            7 * 24 * 3600,
        ));
        let denylist = Arc::new(TokenDenylist::new(
            Arc::new(MemoryDenylistStore::default()),
            Duration::from_secs(15),
            false,
        ));
        CredentialValidator::new(
            issuer,
            denylist,
            ServiceKeyVerifier::from_key(service_key),
            None,
        )
    }

    #[tokio::test]
    async fn no_credential_is_anonymous() {
        let v = validator(None);
        let identity = v
            .authenticate(&ProvidedCredentials::default(), Operation::Read)
            .await
            .unwrap();
        assert_eq!(identity.role, Role::Anon);
        assert_eq!(identity.source, CredentialSource::Anonymous);
    }

    #[tokio::test]
    async fn service_key_has_highest_precedence() {
        let v = validator(Some("svc_key"));
        let pair = v
            .issuer()
            .issue_pair(Uuid::new_v4(), None, Role::Authenticated, Uuid::new_v4())
            .unwrap();
        let creds = ProvidedCredentials {
            service_key: Some("svc_key".into()),
            bearer: Some(pair.access.token),
            api_key: None,
        };
        let identity = v.authenticate(&creds, Operation::Write).await.unwrap();
        assert_eq!(identity.role, Role::ServiceRole);
        assert_eq!(identity.source, CredentialSource::ServiceKey);
    }

    #[tokio::test]
    async fn invalid_service_key_does_not_fall_through() {
        let v = validator(Some("svc_key"));
        let pair = v
            .issuer()
            .issue_pair(Uuid::new_v4(), None, Role::Authenticated, Uuid::new_v4())
            .unwrap();
        let creds = ProvidedCredentials {
            service_key: Some("wrong".into()),
            bearer: Some(pair.access.token),
            api_key: None,
        };
        assert!(v.authenticate(&creds, Operation::Read).await.is_err());
    }

    #[tokio::test]
    async fn bearer_token_builds_the_identity() {
        let v = validator(None);
        let user = Uuid::new_v4();
        let pair = v
            .issuer()
            .issue_pair(user, Some("u@e.com"), Role::Authenticated, Uuid::new_v4())
            .unwrap();
        let creds = ProvidedCredentials {
            bearer: Some(pair.access.token),
            ..Default::default()
        };
        let identity = v.authenticate(&creds, Operation::Read).await.unwrap();
        assert_eq!(identity.user_id, Some(user));
        assert_eq!(identity.role, Role::Authenticated);
    }

    #[tokio::test]
    async fn revoked_jti_is_rejected() {
        let v = validator(None);
        let pair = v
            .issuer()
            .issue_pair(Uuid::new_v4(), None, Role::Authenticated, Uuid::new_v4())
            .unwrap();
        v.denylist()
            .revoke(&pair.access.claims.jti, pair.access.claims.expires_at())
            .await
            .unwrap();
        let creds = ProvidedCredentials {
            bearer: Some(pair.access.token),
            ..Default::default()
        };
        let err = v.authenticate(&creds, Operation::Read).await.unwrap_err();
        assert!(err.to_string().contains("revoked"));
    }

    #[tokio::test]
    async fn revalidate_catches_later_revocation() {
        let v = validator(None);
        let pair = v
            .issuer()
            .issue_pair(Uuid::new_v4(), None, Role::Authenticated, Uuid::new_v4())
            .unwrap();
        let identity = v
            .authenticate_bearer(&pair.access.token)
            .await
            .unwrap();
        v.revalidate(&identity).await.unwrap();
        v.denylist()
            .revoke(&pair.access.claims.jti, Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap();
        assert!(v.revalidate(&identity).await.is_err());
    }
}
