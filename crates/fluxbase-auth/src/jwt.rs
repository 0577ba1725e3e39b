//! JWT issue and verification, pinned to HMAC-SHA256.
//!
//! The algorithm declared in a presented token's header must be HS256;
//! any other value is rejected before signature verification is even
//! attempted, which closes the algorithm-confusion hole.

use chrono::{DateTime, Duration, Utc};
use fluxbase_core::{ClaimSet, CredentialSource, Error, Identity, Role};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header, encode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

const ALGORITHM: Algorithm = Algorithm::HS256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// The full claim set carried by every Fluxbase token. All fields are
/// mandatory on verification; unknown claims are preserved in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: Option<String>,
    pub role: String,
    pub session_id: String,
    pub token_type: TokenType,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub nbf: i64,
    pub jti: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Claims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// The identity this claim set maps to.
    pub fn to_identity(&self) -> Result<Identity, Error> {
        let user_id: Uuid = self
            .sub
            .parse()
            .map_err(|_| Error::Unauthorized("malformed sub claim".into()))?;
        let session_id: Uuid = self
            .session_id
            .parse()
            .map_err(|_| Error::Unauthorized("malformed session_id claim".into()))?;
        Ok(Identity {
            user_id: Some(user_id),
            role: Role::parse(&self.role)?,
            claims: ClaimSet {
                email: self.email.clone(),
                session_id: Some(session_id),
                extra: self.extra.clone(),
            },
            jti: Some(self.jti.clone()),
            expires_at: Some(self.expires_at()),
            source: CredentialSource::Token,
        })
    }
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: Claims,
}

/// An access/refresh pair as returned by the auth endpoints.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access: IssuedToken,
    pub refresh: IssuedToken,
    /// Access-token lifetime in seconds, echoed to clients.
    pub expires_in: u64,
}

pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &str, issuer: String, access_ttl_secs: u64, refresh_ttl_secs: u64) -> Self {
        TokenIssuer {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer,
            access_ttl: Duration::seconds(access_ttl_secs as i64),
            refresh_ttl: Duration::seconds(refresh_ttl_secs as i64),
        }
    }

    pub fn access_ttl_secs(&self) -> u64 {
        self.access_ttl.num_seconds().max(0) as u64
    }

    fn issue(
        &self,
        user_id: Uuid,
        email: Option<&str>,
        role: Role,
        session_id: Uuid,
        token_type: TokenType,
    ) -> Result<IssuedToken, Error> {
        let now = Utc::now();
        let ttl = match token_type {
            TokenType::Access => self.access_ttl,
            TokenType::Refresh => self.refresh_ttl,
        };
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.map(str::to_string),
            role: role.as_db_role().to_string(),
            session_id: session_id.to_string(),
            token_type,
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            nbf: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            extra: Map::new(),
        };
        let token = encode(&Header::new(ALGORITHM), &claims, &self.encoding)
            .map_err(Error::internal)?;
        Ok(IssuedToken { token, claims })
    }

    /// Issue an access/refresh pair for one session.
    pub fn issue_pair(
        &self,
        user_id: Uuid,
        email: Option<&str>,
        role: Role,
        session_id: Uuid,
    ) -> Result<TokenPair, Error> {
        let access = self.issue(user_id, email, role, session_id, TokenType::Access)?;
        let refresh = self.issue(user_id, email, role, session_id, TokenType::Refresh)?;
        Ok(TokenPair {
            access,
            refresh,
            expires_in: self.access_ttl_secs(),
        })
    }

    /// Verify signature and standard claims, returning the claim set.
    /// Denylist consultation happens in the credential validator, after
    /// this succeeds.
    pub fn verify(&self, token: &str) -> Result<Claims, Error> {
        let header = decode_header(token)
            .map_err(|e| Error::Unauthorized(format!("malformed token header: {e}")))?;
        if header.alg != ALGORITHM {
            return Err(Error::Unauthorized(format!(
                "unexpected signing algorithm {:?}",
                header.alg
            )));
        }

        let mut validation = Validation::new(ALGORITHM);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "sub"]);
        validation.validate_nbf = true;

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    Error::Unauthorized("token expired".into())
                }
                jsonwebtoken::errors::ErrorKind::ImmatureSignature => {
                    Error::Unauthorized("token not yet valid".into())
                }
                _ => Error::Unauthorized(format!("invalid token: {e}")),
            }
        })?;
        Ok(data.claims)
    }

    /// Verify a token and require a specific type (`access` for API
    /// requests, `refresh` for the refresh endpoint).
    pub fn verify_typed(&self, token: &str, expected: TokenType) -> Result<Claims, Error> {
        let claims = self.verify(token)?;
        if claims.token_type != expected {
            return Err(Error::Unauthorized("wrong token type".into()));
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(
            "0123456789abcdef0123456789abcdef",
            "fluxbase".into(),
            900,
            7 * 24 * 3600,
        )
    }

    #[test]
    fn issues_and_verifies_a_pair() {
        let issuer = issuer();
        let user = Uuid::new_v4();
        let session = Uuid::new_v4();
        let pair = issuer
            .issue_pair(user, Some("u@e.com"), Role::Authenticated, session)
            .unwrap();
        assert_eq!(pair.expires_in, 900);

        let claims = issuer.verify_typed(&pair.access.token, TokenType::Access).unwrap();
        assert_eq!(claims.sub, user.to_string());
        assert_eq!(claims.role, "authenticated");
        assert_eq!(claims.email.as_deref(), Some("u@e.com"));

        let identity = claims.to_identity().unwrap();
        assert_eq!(identity.user_id, Some(user));
        assert_eq!(identity.role, Role::Authenticated);
        assert_eq!(identity.jti.as_deref(), Some(claims.jti.as_str()));
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let issuer = issuer();
        let pair = issuer
            .issue_pair(Uuid::new_v4(), None, Role::Authenticated, Uuid::new_v4())
            .unwrap();
        assert!(issuer.verify_typed(&pair.refresh.token, TokenType::Access).is_err());
        assert!(issuer.verify_typed(&pair.refresh.token, TokenType::Refresh).is_ok());
    }

    fn claims_expiring_at(exp: i64) -> Claims {
        let now = Utc::now().timestamp();
        Claims {
            sub: Uuid::new_v4().to_string(),
            email: None,
            role: "authenticated".into(),
            session_id: Uuid::new_v4().to_string(),
            token_type: TokenType::Access,
            iss: "fluxbase".into(),
            iat: now - 7200,
            exp,
            nbf: now - 7200,
            jti: Uuid::new_v4().to_string(),
            extra: Map::new(),
        }
    }

    #[test]
    fn expired_token_is_rejected() {
        let secret = "0123456789abcdef0123456789abcdef";
        let expired = claims_expiring_at(Utc::now().timestamp() - 3600);
        let token = encode(
            &Header::new(Algorithm::HS256),
            &expired,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap();
        let err = issuer().verify(&token).unwrap_err();
        assert!(err.to_string().contains("expired"));

        // The same claims with a future expiry verify fine.
        let live = claims_expiring_at(Utc::now().timestamp() + 3600);
        let token = encode(
            &Header::new(Algorithm::HS256),
            &live,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap();
        issuer().verify(&token).unwrap();
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let issuer = issuer();
        let pair = issuer
            .issue_pair(Uuid::new_v4(), None, Role::Authenticated, Uuid::new_v4())
            .unwrap();
        let mut tampered = pair.access.token.clone();
        tampered.pop();
        tampered.push(if pair.access.token.ends_with('A') { 'B' } else { 'A' });
        assert!(issuer.verify(&tampered).is_err());
    }

    #[test]
    fn flipping_the_role_claim_breaks_the_signature() {
        let issuer = issuer();
        let pair = issuer
            .issue_pair(Uuid::new_v4(), None, Role::Authenticated, Uuid::new_v4())
            .unwrap();
        let parts: Vec<&str> = pair.access.token.split('.').collect();
        let payload = {
            use base64::Engine;
            let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
            let decoded = engine.decode(parts[1]).unwrap();
            let json = String::from_utf8(decoded)
                .unwrap()
                .replace("authenticated", "service_role");
            engine.encode(json)
        };
        let forged = format!("{}.{}.{}", parts[0], payload, parts[2]);
        assert!(issuer.verify(&forged).is_err());
    }

    #[test]
    fn foreign_algorithm_header_is_rejected() {
        // A token legitimately signed with HS384 and the same secret
        // must still be refused: the declared algorithm is pinned.
        let secret = "0123456789abcdef0123456789abcdef";
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            email: None,
            role: "authenticated".into(),
            session_id: Uuid::new_v4().to_string(),
            token_type: TokenType::Access,
            iss: "fluxbase".into(),
            iat: Utc::now().timestamp(),
            exp: (Utc::now() + Duration::hours(1)).timestamp(),
            nbf: Utc::now().timestamp(),
            jti: Uuid::new_v4().to_string(),
            extra: Map::new(),
        };
        let token = encode(
            &Header::new(Algorithm::HS384),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap();
        let err = issuer().verify(&token).unwrap_err();
        assert!(err.to_string().contains("algorithm"));
    }
}
