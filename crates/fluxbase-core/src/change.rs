//! Committed row changes as emitted by the database change feed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// A Postgres log sequence number, kept as the raw 64-bit position so
/// events can be ordered and deduplicated cheaply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Lsn(pub u64);

impl Lsn {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Lsn {
    /// Renders in the textual `X/Y` form Postgres uses.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 & 0xFFFF_FFFF)
    }
}

impl FromStr for Lsn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hi, lo) = s
            .split_once('/')
            .ok_or_else(|| format!("invalid lsn: {s}"))?;
        let hi = u64::from_str_radix(hi, 16).map_err(|e| format!("invalid lsn {s}: {e}"))?;
        let lo = u64::from_str_radix(lo, 16).map_err(|e| format!("invalid lsn {s}: {e}"))?;
        Ok(Lsn((hi << 32) | lo))
    }
}

impl Serialize for Lsn {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Lsn {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeOp::Insert => "INSERT",
            ChangeOp::Update => "UPDATE",
            ChangeOp::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

/// A single committed row mutation.
///
/// Rows are full or primary-key-only depending on the table's replica
/// identity; `primary_key_only` events carry no row to filter and are
/// discarded by the subscription registry without delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub schema: String,
    pub table: String,
    pub op: ChangeOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_row: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_row: Option<Map<String, Value>>,
    /// Primary-key column names and values for the affected row.
    #[serde(default)]
    pub primary_key: Vec<(String, Value)>,
    #[serde(default)]
    pub primary_key_only: bool,
    pub commit_lsn: Lsn,
}

impl ChangeEvent {
    /// The row a subscriber's filter should be evaluated against:
    /// the new row for inserts/updates, the old row for deletes.
    pub fn filter_row(&self) -> Option<&Map<String, Value>> {
        match self.op {
            ChangeOp::Insert | ChangeOp::Update => self.new_row.as_ref(),
            ChangeOp::Delete => self.old_row.as_ref(),
        }
    }

    /// Key used for consecutive-duplicate suppression in the feed.
    pub fn dedup_key(&self) -> (Lsn, &str, &str, ChangeOp, String) {
        let pk = self
            .primary_key
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        (self.commit_lsn, &self.schema, &self.table, self.op, pk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lsn_parses_pg_textual_form() {
        let lsn: Lsn = "16/B374D848".parse().unwrap();
        assert_eq!(lsn.as_u64(), (0x16 << 32) | 0xB374D848);
        assert_eq!(lsn.to_string(), "16/B374D848");
    }

    #[test]
    fn lsn_ordering_follows_wal_position() {
        let a: Lsn = "0/1000".parse().unwrap();
        let b: Lsn = "0/2000".parse().unwrap();
        let c: Lsn = "1/0".parse().unwrap();
        assert!(a < b && b < c);
    }

    #[test]
    fn filter_row_tracks_operation() {
        let mut event = ChangeEvent {
            schema: "public".into(),
            table: "todos".into(),
            op: ChangeOp::Delete,
            new_row: None,
            old_row: Some(Map::from_iter([("id".to_string(), json!(1))])),
            primary_key: vec![("id".into(), json!(1))],
            primary_key_only: false,
            commit_lsn: Lsn(1),
        };
        assert!(event.filter_row().is_some());
        event.op = ChangeOp::Insert;
        assert!(event.filter_row().is_none());
    }
}
