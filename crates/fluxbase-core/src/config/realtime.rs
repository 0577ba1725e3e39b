//! Realtime configuration: feed channel, heartbeats, connection limits.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// NOTIFY channel the change-feed trigger publishes on.
    #[serde(default = "default_channel")]
    pub channel: String,

    /// Expected client ping cadence, seconds.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Server-side read deadline after last activity, seconds.
    #[serde(default = "default_read_deadline_secs")]
    pub read_deadline_secs: u64,

    /// Total concurrent WebSocket connections the server accepts.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Concurrent connections per user.
    #[serde(default = "default_max_connections_per_user")]
    pub max_connections_per_user: u32,

    /// Subscriptions per connection.
    #[serde(default = "default_max_subscriptions")]
    pub max_subscriptions_per_connection: u32,

    /// Inbound frames per connection per minute.
    #[serde(default = "default_max_messages_per_minute")]
    pub max_messages_per_minute: u32,

    /// Outbound frame buffer per connection; oldest broadcast frames are
    /// dropped when a slow peer fills it.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,

    /// Visibility probe timeout, milliseconds.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_channel() -> String {
    "fluxbase_changes".to_string()
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_read_deadline_secs() -> u64 {
    120
}

fn default_max_connections() -> u32 {
    10_000
}

fn default_max_connections_per_user() -> u32 {
    10
}

fn default_max_subscriptions() -> u32 {
    100
}

fn default_max_messages_per_minute() -> u32 {
    100
}

fn default_outbound_buffer() -> usize {
    256
}

fn default_probe_timeout_ms() -> u64 {
    2_000
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channel: default_channel(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            read_deadline_secs: default_read_deadline_secs(),
            max_connections: default_max_connections(),
            max_connections_per_user: default_max_connections_per_user(),
            max_subscriptions_per_connection: default_max_subscriptions(),
            max_messages_per_minute: default_max_messages_per_minute(),
            outbound_buffer: default_outbound_buffer(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}
