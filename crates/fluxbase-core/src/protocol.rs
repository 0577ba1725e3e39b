//! WebSocket wire frames.
//!
//! Frames are JSON objects with a `type` discriminator. Client frames are
//! `subscribe | unsubscribe | broadcast | ping`; server frames are
//! `ack | broadcast | pong | error`. Change events are delivered as
//! `broadcast` frames whose payload carries the operation type and rows.

use crate::change::{ChangeEvent, ChangeOp};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Wire codes for `error` frames.
pub mod codes {
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const FORBIDDEN: &str = "FORBIDDEN";
    pub const INVALID_CHANNEL: &str = "INVALID_CHANNEL";
    pub const SUBSCRIPTION_FAILED: &str = "SUBSCRIPTION_FAILED";
    pub const RATE_LIMITED: &str = "RATE_LIMITED";
}

/// Frames sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    Subscribe {
        channel: String,
        /// Optional row filter in the URL filter grammar, e.g.
        /// `status=eq.active`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<String>,
    },
    Unsubscribe {
        channel: String,
    },
    Broadcast {
        channel: String,
        payload: Value,
    },
    Ping,
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    Ack {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
    },
    Broadcast {
        channel: String,
        payload: Value,
    },
    Pong,
    Error {
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
    },
}

impl ServerFrame {
    pub fn ack(channel: impl Into<String>) -> Self {
        ServerFrame::Ack {
            channel: Some(channel.into()),
        }
    }

    pub fn error(code: &str, message: impl Into<String>, channel: Option<String>) -> Self {
        ServerFrame::Error {
            code: code.to_string(),
            message: message.into(),
            channel,
        }
    }

    /// A change event rendered as a broadcast frame on its table channel.
    pub fn change(channel: impl Into<String>, event: &ChangeEvent) -> Self {
        let record = match event.op {
            ChangeOp::Insert | ChangeOp::Update => event.new_row.clone(),
            ChangeOp::Delete => None,
        };
        let old_record = match event.op {
            ChangeOp::Update | ChangeOp::Delete => event.old_row.clone(),
            ChangeOp::Insert => None,
        };
        ServerFrame::Broadcast {
            channel: channel.into(),
            payload: json!({
                "type": event.op.to_string(),
                "schema": event.schema,
                "table": event.table,
                "record": record,
                "old_record": old_record,
                "commit_lsn": event.commit_lsn.to_string(),
            }),
        }
    }
}
