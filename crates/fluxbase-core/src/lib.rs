//! # fluxbase-core
//!
//! Shared types for the Fluxbase request dispatch and data access core:
//!
//! - configuration loading and boot-time validation
//! - the wire-visible error kinds and their codes
//! - request identity (role, user id, claim set)
//! - realtime channels, change events, and WebSocket frames
//! - contracts for out-of-core collaborators (email, edge functions)

pub mod change;
pub mod channel;
pub mod collab;
pub mod config;
pub mod error;
pub mod identity;
pub mod protocol;

pub use change::{ChangeEvent, ChangeOp, Lsn};
pub use channel::Channel;
pub use config::AppConfig;
pub use error::{Error, ErrorKind};
pub use identity::{ClaimSet, CredentialSource, Identity, Role};
