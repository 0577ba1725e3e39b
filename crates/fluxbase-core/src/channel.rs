//! Subscription channels: `table:<schema>.<name>`, `broadcast:<topic>`,
//! `presence:<room>`.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Channel {
    Table { schema: String, table: String },
    Broadcast { topic: String },
    Presence { room: String },
}

impl Channel {
    pub fn table(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Channel::Table {
            schema: schema.into(),
            table: table.into(),
        }
    }

    pub fn is_table(&self) -> bool {
        matches!(self, Channel::Table { .. })
    }

    /// Channel for a change event on `schema.table`.
    pub fn for_change(schema: &str, table: &str) -> Self {
        Channel::table(schema, table)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Table { schema, table } => write!(f, "table:{schema}.{table}"),
            Channel::Broadcast { topic } => write!(f, "broadcast:{topic}"),
            Channel::Presence { room } => write!(f, "presence:{room}"),
        }
    }
}

impl FromStr for Channel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, rest) = s
            .split_once(':')
            .ok_or_else(|| Error::BadRequest(format!("invalid channel: {s}")))?;
        if rest.is_empty() {
            return Err(Error::BadRequest(format!("invalid channel: {s}")));
        }
        match kind {
            "table" => {
                let (schema, table) = rest
                    .split_once('.')
                    .ok_or_else(|| Error::BadRequest(format!("invalid table channel: {s}")))?;
                if schema.is_empty() || table.is_empty() {
                    return Err(Error::BadRequest(format!("invalid table channel: {s}")));
                }
                Ok(Channel::Table {
                    schema: schema.to_string(),
                    table: table.to_string(),
                })
            }
            "broadcast" => Ok(Channel::Broadcast {
                topic: rest.to_string(),
            }),
            "presence" => Ok(Channel::Presence {
                room: rest.to_string(),
            }),
            _ => Err(Error::BadRequest(format!("invalid channel: {s}"))),
        }
    }
}

impl TryFrom<String> for Channel {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Error> {
        s.parse()
    }
}

impl From<Channel> for String {
    fn from(c: Channel) -> String {
        c.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_channel_forms() {
        assert_eq!(
            "table:public.todos".parse::<Channel>().unwrap(),
            Channel::table("public", "todos")
        );
        assert_eq!(
            "broadcast:news".parse::<Channel>().unwrap(),
            Channel::Broadcast {
                topic: "news".into()
            }
        );
        assert_eq!(
            "presence:lobby".parse::<Channel>().unwrap(),
            Channel::Presence {
                room: "lobby".into()
            }
        );
    }

    #[test]
    fn rejects_malformed_channels() {
        for bad in ["todos", "table:todos", "table:.", "queue:x", "broadcast:"] {
            assert!(bad.parse::<Channel>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn display_round_trips() {
        for s in ["table:public.todos", "broadcast:news", "presence:lobby"] {
            assert_eq!(s.parse::<Channel>().unwrap().to_string(), s);
        }
    }
}
