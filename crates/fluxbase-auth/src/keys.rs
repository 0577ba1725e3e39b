//! Opaque keys: the service-role key and client API keys.
//!
//! Keys are never stored or compared in the clear; both paths hash the
//! presented key with SHA-256 and compare in constant time.

use fluxbase_core::{ClaimSet, CredentialSource, Error, Identity, Role};
use rand::Rng;
use rand::distr::Alphanumeric;
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};

/// Hex SHA-256 of a key, the stored representation.
pub fn sha256_hex(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Generate a new opaque key with the given prefix.
pub fn generate_key(prefix: &str) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(40)
        .map(char::from)
        .collect();
    format!("{prefix}_{suffix}")
}

/// Equality without an early exit; compare hashes, not raw secrets, so
/// the length check leaks nothing either.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Verifies the installation's service-role key.
pub struct ServiceKeyVerifier {
    key_hash: Option<String>,
}

impl ServiceKeyVerifier {
    /// `None` disables service-key authentication entirely.
    pub fn from_key(key: Option<&str>) -> Self {
        ServiceKeyVerifier {
            key_hash: key.map(sha256_hex),
        }
    }

    pub fn verify(&self, presented: &str) -> bool {
        match &self.key_hash {
            Some(expected) => {
                constant_time_eq(sha256_hex(presented).as_bytes(), expected.as_bytes())
            }
            None => false,
        }
    }
}

/// Client API keys, backed by `_fluxbase.api_keys`.
pub struct ApiKeyStore {
    pool: PgPool,
}

impl ApiKeyStore {
    pub fn new(pool: PgPool) -> Self {
        ApiKeyStore { pool }
    }

    /// Verify an active, unexpired, unrevoked key whose scopes include
    /// the requested operation, and build its identity.
    pub async fn verify(&self, key: &str, required_scope: &str) -> Result<Identity, Error> {
        let key_hash = sha256_hex(key);
        let row = sqlx::query(
            r#"
            select role, scopes
            from _fluxbase.api_keys
            where key_hash = $1
              and not revoked
              and (expires_at is null or expires_at > now())
            "#,
        )
        .bind(&key_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::internal)?;

        let row = row.ok_or_else(|| Error::Unauthorized("unknown or revoked API key".into()))?;
        let scopes: Vec<String> = row.get("scopes");
        if !scopes.iter().any(|s| s == required_scope) {
            return Err(Error::Forbidden(format!(
                "API key lacks the {required_scope} scope"
            )));
        }

        let role: String = row.get("role");
        Ok(Identity {
            user_id: None,
            role: Role::parse(&role)?,
            claims: ClaimSet::default(),
            jti: None,
            expires_at: None,
            source: CredentialSource::ClientKey,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_is_stable() {
        assert_eq!(
            sha256_hex("fluxbase"),
            sha256_hex("fluxbase"),
        );
        assert_ne!(sha256_hex("a"), sha256_hex("b"));
        assert_eq!(sha256_hex("x").len(), 64);
    }

    #[test]
    fn service_key_verification() {
        let verifier = ServiceKeyVerifier::from_key(Some("svc_secret_key"));
        assert!(verifier.verify("svc_secret_key"));
        assert!(!verifier.verify("svc_wrong_key"));

        let disabled = ServiceKeyVerifier::from_key(None);
        assert!(!disabled.verify("svc_secret_key"));
    }

    #[test]
    fn generated_keys_carry_the_prefix() {
        let key = generate_key("fbk");
        assert!(key.starts_with("fbk_"));
        assert!(key.len() > 20);
        assert_ne!(generate_key("fbk"), generate_key("fbk"));
    }
}
