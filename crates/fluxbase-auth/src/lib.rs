//! # fluxbase-auth
//!
//! Credential validation and the token lifecycle:
//!
//! - JWT issue/verify, pinned to HMAC-SHA256 with a fixed claim set
//! - service-role keys (hashed, constant-time compared)
//! - client API keys (database-backed, scoped)
//! - bcrypt password hashing and policy
//! - the revoked-token denylist with its in-process cache and sweeper
//!
//! Precedence when authenticating a request: service key, then JWT
//! bearer, then API key, then anonymous.

pub mod denylist;
pub mod jwt;
pub mod keys;
pub mod password;
pub mod validator;

pub use denylist::{DenylistStore, MemoryDenylistStore, PgDenylistStore, TokenDenylist};
pub use jwt::{Claims, IssuedToken, TokenIssuer, TokenPair, TokenType};
pub use keys::{ApiKeyStore, ServiceKeyVerifier, constant_time_eq, generate_key, sha256_hex};
pub use password::PasswordPolicy;
pub use validator::{CredentialValidator, Operation, ProvidedCredentials};
