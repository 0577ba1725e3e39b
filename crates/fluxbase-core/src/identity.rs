//! Request identity: the role, user id, and claim set bound to a request.

use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

/// Database roles Fluxbase creates and binds requests to.
///
/// `ServiceRole` bypasses row-level security; `Anon` and `Authenticated`
/// do not. This is a closed set: the role name sent to `SET LOCAL role`
/// can only ever be one of these strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Anon,
    Authenticated,
    ServiceRole,
}

impl Role {
    /// The database role name installed with `SET LOCAL role`.
    pub fn as_db_role(&self) -> &'static str {
        match self {
            Role::Anon => "anon",
            Role::Authenticated => "authenticated",
            Role::ServiceRole => "service_role",
        }
    }

    pub fn parse(s: &str) -> Result<Self, Error> {
        match s {
            "anon" => Ok(Role::Anon),
            "authenticated" => Ok(Role::Authenticated),
            "service_role" => Ok(Role::ServiceRole),
            other => Err(Error::Unauthorized(format!("unknown role claim: {other}"))),
        }
    }

    pub fn bypasses_rls(&self) -> bool {
        matches!(self, Role::ServiceRole)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_db_role())
    }
}

/// Where the credential came from, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    ServiceKey,
    Token,
    ClientKey,
    Anonymous,
}

/// Verified claims attached to an identity.
///
/// Known claims are typed; anything else the token carried is kept in
/// `extra` opaquely and is never consulted for authorization decisions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClaimSet {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The identity constructed per request by the credential validator and
/// installed by the role binder. Discarded when the request transaction
/// ends.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: Option<Uuid>,
    pub role: Role,
    pub claims: ClaimSet,
    /// Token id, present only for JWT-sourced identities.
    pub jti: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub source: CredentialSource,
}

impl Identity {
    /// The identity bound when no credential is presented. Anonymous
    /// requests are subject to the same RLS evaluation as any other.
    pub fn anonymous() -> Self {
        Identity {
            user_id: None,
            role: Role::Anon,
            claims: ClaimSet::default(),
            jti: None,
            expires_at: None,
            source: CredentialSource::Anonymous,
        }
    }

    /// The identity bound for a verified service key.
    pub fn service() -> Self {
        Identity {
            user_id: None,
            role: Role::ServiceRole,
            claims: ClaimSet::default(),
            jti: None,
            expires_at: None,
            source: CredentialSource::ServiceKey,
        }
    }

    pub fn is_service_role(&self) -> bool {
        self.role.bypasses_rls()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    /// The value installed as `app.user_id`; empty string when anonymous.
    pub fn user_id_setting(&self) -> String {
        self.user_id.map(|u| u.to_string()).unwrap_or_default()
    }

    /// JSON rendering of the claim set, installed as `app.claims`.
    pub fn claims_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("role".into(), json!(self.role.as_db_role()));
        if let Some(user_id) = self.user_id {
            obj.insert("sub".into(), json!(user_id.to_string()));
        }
        if let Some(email) = &self.claims.email {
            obj.insert("email".into(), json!(email));
        }
        if let Some(session_id) = self.claims.session_id {
            obj.insert("session_id".into(), json!(session_id.to_string()));
        }
        for (k, v) in &self.claims.extra {
            obj.entry(k.clone()).or_insert_with(|| v.clone());
        }
        Value::Object(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_has_anon_role_and_no_user() {
        let id = Identity::anonymous();
        assert_eq!(id.role, Role::Anon);
        assert!(id.user_id.is_none());
        assert_eq!(id.user_id_setting(), "");
    }

    #[test]
    fn role_parse_round_trips() {
        for role in [Role::Anon, Role::Authenticated, Role::ServiceRole] {
            assert_eq!(Role::parse(role.as_db_role()).unwrap(), role);
        }
        assert!(Role::parse("superuser").is_err());
    }

    #[test]
    fn claims_json_keeps_unknown_claims_opaque() {
        let mut id = Identity::anonymous();
        id.claims
            .extra
            .insert("custom".into(), json!({"nested": true}));
        let rendered = id.claims_json();
        assert_eq!(rendered["custom"]["nested"], json!(true));
        assert_eq!(rendered["role"], json!("anon"));
    }
}
