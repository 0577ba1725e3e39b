//! The change-feed source contract and the NOTIFY-backed implementation.
//!
//! The source may be a logical replication slot or a `LISTEN` channel
//! fed by row triggers; the contract is identical. The shipped
//! implementation listens on a NOTIFY channel whose payloads are built
//! by the `_fluxbase.notify_row_change()` trigger.

use async_trait::async_trait;
use fluxbase_core::change::{ChangeEvent, ChangeOp, Lsn};
use fluxbase_core::Error;
use serde_json::Value;
use sqlx::PgPool;
use sqlx::postgres::PgListener;

/// A (re)connectable stream of committed row changes.
#[async_trait]
pub trait ChangeFeedSource: Send + Sync {
    /// Open a live stream. `from_lsn` positions the stream just after
    /// the given point when the source supports rewind; sources that
    /// cannot rewind ignore it and the worker signals a resync instead.
    async fn connect(&self, from_lsn: Option<Lsn>) -> Result<Box<dyn FeedStream>, Error>;

    /// Whether `connect(Some(lsn))` actually replays missed changes.
    fn supports_rewind(&self) -> bool;
}

#[async_trait]
pub trait FeedStream: Send {
    async fn next(&mut self) -> Result<ChangeEvent, Error>;
}

/// `LISTEN`-based source on the configured channel.
pub struct NotifyFeedSource {
    pool: PgPool,
    channel: String,
}

impl NotifyFeedSource {
    pub fn new(pool: PgPool, channel: impl Into<String>) -> Self {
        NotifyFeedSource {
            pool,
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl ChangeFeedSource for NotifyFeedSource {
    async fn connect(&self, _from_lsn: Option<Lsn>) -> Result<Box<dyn FeedStream>, Error> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(|e| Error::ServiceUnavailable(format!("change feed connect: {e}")))?;
        listener
            .listen(&self.channel)
            .await
            .map_err(|e| Error::ServiceUnavailable(format!("change feed listen: {e}")))?;
        tracing::info!(channel = %self.channel, "change feed listening");
        Ok(Box::new(NotifyStream { listener }))
    }

    fn supports_rewind(&self) -> bool {
        // NOTIFY has no retention; anything missed while disconnected
        // is gone.
        false
    }
}

struct NotifyStream {
    listener: PgListener,
}

#[async_trait]
impl FeedStream for NotifyStream {
    async fn next(&mut self) -> Result<ChangeEvent, Error> {
        loop {
            let notification = self
                .listener
                .recv()
                .await
                .map_err(|e| Error::ServiceUnavailable(format!("change feed recv: {e}")))?;
            match parse_change_payload(notification.payload()) {
                Ok(event) => return Ok(event),
                Err(e) => {
                    // A malformed payload is a trigger bug, not a feed
                    // outage; skip it rather than tearing the stream down.
                    tracing::warn!(error = %e, payload = notification.payload(),
                        "discarding malformed change payload");
                }
            }
        }
    }
}

/// Parse one trigger payload into a change event.
///
/// Payload shape:
/// `{"schema","table","op","record","old_record","pk","lsn","full_row"}`.
pub fn parse_change_payload(payload: &str) -> Result<ChangeEvent, Error> {
    let value: Value = serde_json::from_str(payload)
        .map_err(|e| Error::BadRequest(format!("change payload is not JSON: {e}")))?;

    let field_str = |name: &str| -> Result<String, Error> {
        value
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::BadRequest(format!("change payload missing {name}")))
    };

    let op = match field_str("op")?.as_str() {
        "INSERT" => ChangeOp::Insert,
        "UPDATE" => ChangeOp::Update,
        "DELETE" => ChangeOp::Delete,
        other => {
            return Err(Error::BadRequest(format!("unknown change op: {other}")));
        }
    };

    let commit_lsn: Lsn = field_str("lsn")?
        .parse()
        .map_err(|e| Error::BadRequest(format!("change payload lsn: {e}")))?;

    let object = |name: &str| -> Option<serde_json::Map<String, Value>> {
        value.get(name).and_then(Value::as_object).cloned()
    };

    let primary_key: Vec<(String, Value)> = object("pk")
        .map(|pk| pk.into_iter().collect())
        .unwrap_or_default();
    let full_row = value.get("full_row").and_then(Value::as_bool).unwrap_or(true);

    Ok(ChangeEvent {
        schema: field_str("schema")?,
        table: field_str("table")?,
        op,
        new_row: object("record"),
        old_row: object("old_record"),
        primary_key,
        primary_key_only: !full_row,
        commit_lsn,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_an_insert_payload() {
        let payload = json!({
            "schema": "public",
            "table": "todos",
            "op": "INSERT",
            "record": {"id": 1, "title": "write tests"},
            "pk": {"id": 1},
            "lsn": "0/16B3748",
            "full_row": true
        })
        .to_string();
        let event = parse_change_payload(&payload).unwrap();
        assert_eq!(event.op, ChangeOp::Insert);
        assert_eq!(event.schema, "public");
        assert_eq!(event.new_row.as_ref().unwrap()["title"], "write tests");
        assert_eq!(event.primary_key, vec![("id".to_string(), json!(1))]);
        assert!(!event.primary_key_only);
    }

    #[test]
    fn delete_without_full_row_is_pk_only() {
        let payload = json!({
            "schema": "public",
            "table": "todos",
            "op": "DELETE",
            "pk": {"id": 7},
            "lsn": "0/1000",
            "full_row": false
        })
        .to_string();
        let event = parse_change_payload(&payload).unwrap();
        assert!(event.primary_key_only);
        assert!(event.old_row.is_none());
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        assert!(parse_change_payload("not json").is_err());
        assert!(parse_change_payload(r#"{"schema":"public"}"#).is_err());
        let bad_op = json!({
            "schema": "public", "table": "t", "op": "TRUNCATE", "lsn": "0/1"
        })
        .to_string();
        assert!(parse_change_payload(&bad_op).is_err());
    }
}
