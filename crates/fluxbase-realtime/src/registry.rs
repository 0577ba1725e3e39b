//! The subscription registry: per-connection channel sets, identity
//! snapshots, row filters, and fan-out.
//!
//! A subscription captures the connection's identity at subscribe time;
//! the heartbeat revalidates identities and cancels subscriptions whose
//! token has expired or been revoked. Change events are matched against
//! table channels, filtered, probed for row visibility under the
//! subscriber's role, and delivered through the connection's outbound
//! buffer.

use crate::eval::matches_row;
use crate::outbound::Outbound;
use crate::probe::VisibilityProber;
use fluxbase_core::change::ChangeEvent;
use fluxbase_core::protocol::{ServerFrame, codes};
use fluxbase_core::{Channel, Error, Identity};
use fluxbase_filter::{Predicate, parse_filter_expr};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RegistryLimits {
    pub max_connections: u32,
    pub max_connections_per_user: u32,
    pub max_subscriptions_per_connection: u32,
}

impl Default for RegistryLimits {
    fn default() -> Self {
        RegistryLimits {
            max_connections: 10_000,
            max_connections_per_user: 10,
            max_subscriptions_per_connection: 100,
        }
    }
}

struct Subscription {
    /// Identity snapshot captured at subscribe time.
    identity: Identity,
    filter: Option<Predicate>,
}

struct ConnectionState {
    identity: Identity,
    outbound: Outbound,
    subscriptions: HashMap<Channel, Subscription>,
}

pub struct SubscriptionRegistry {
    connections: RwLock<HashMap<Uuid, ConnectionState>>,
    limits: RegistryLimits,
    prober: Arc<dyn VisibilityProber>,
}

impl SubscriptionRegistry {
    pub fn new(limits: RegistryLimits, prober: Arc<dyn VisibilityProber>) -> Self {
        SubscriptionRegistry {
            connections: RwLock::new(HashMap::new()),
            limits,
            prober,
        }
    }

    /// Admit a new connection, enforcing the global and per-user caps.
    pub async fn register(
        &self,
        connection_id: Uuid,
        identity: Identity,
        outbound: Outbound,
    ) -> Result<(), Error> {
        let mut connections = self.connections.write().await;
        if connections.len() as u32 >= self.limits.max_connections {
            return Err(Error::ResourceExhausted(
                "realtime connection limit reached".into(),
            ));
        }
        if let Some(user_id) = identity.user_id {
            let user_connections = connections
                .values()
                .filter(|c| c.identity.user_id == Some(user_id))
                .count() as u32;
            if user_connections >= self.limits.max_connections_per_user {
                return Err(Error::RateLimited);
            }
        }
        connections.insert(
            connection_id,
            ConnectionState {
                identity,
                outbound,
                subscriptions: HashMap::new(),
            },
        );
        Ok(())
    }

    /// Remove a connection, broadcasting presence leaves for any rooms
    /// it was in.
    pub async fn unregister(&self, connection_id: Uuid) {
        let removed = self.connections.write().await.remove(&connection_id);
        if let Some(state) = removed {
            state.outbound.close();
            for channel in state.subscriptions.keys() {
                if let Channel::Presence { room } = channel {
                    self.broadcast_presence(room, "leave", &state.identity).await;
                }
            }
        }
    }

    pub async fn subscribe(
        &self,
        connection_id: Uuid,
        channel: Channel,
        filter_expr: Option<&str>,
    ) -> Result<(), Error> {
        let filter = filter_expr.map(parse_filter_expr).transpose()?;

        let (identity, is_presence_join) = {
            let mut connections = self.connections.write().await;
            let state = connections
                .get_mut(&connection_id)
                .ok_or_else(|| Error::internal(anyhow::anyhow!("unknown connection")))?;
            if state.subscriptions.len() as u32 >= self.limits.max_subscriptions_per_connection {
                return Err(Error::RateLimited);
            }
            let identity = state.identity.clone();
            let is_new = state
                .subscriptions
                .insert(
                    channel.clone(),
                    Subscription {
                        identity: identity.clone(),
                        filter,
                    },
                )
                .is_none();
            (identity, is_new && matches!(channel, Channel::Presence { .. }))
        };

        if is_presence_join {
            if let Channel::Presence { room } = &channel {
                self.broadcast_presence(room, "join", &identity).await;
            }
        }
        Ok(())
    }

    pub async fn unsubscribe(&self, connection_id: Uuid, channel: &Channel) -> Result<(), Error> {
        let removed = {
            let mut connections = self.connections.write().await;
            let state = connections
                .get_mut(&connection_id)
                .ok_or_else(|| Error::internal(anyhow::anyhow!("unknown connection")))?;
            state.subscriptions.remove(channel)
        };
        if let (Some(sub), Channel::Presence { room }) = (&removed, channel) {
            self.broadcast_presence(room, "leave", &sub.identity).await;
        }
        match removed {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(format!("not subscribed to {channel}"))),
        }
    }

    /// Explicit presence operations; equivalent to (un)subscribing to
    /// the room's presence channel.
    pub async fn presence_join(
        &self,
        connection_id: Uuid,
        room: &str,
    ) -> Result<(), Error> {
        self.subscribe(
            connection_id,
            Channel::Presence {
                room: room.to_string(),
            },
            None,
        )
        .await
    }

    pub async fn presence_leave(&self, connection_id: Uuid, room: &str) -> Result<(), Error> {
        self.unsubscribe(
            connection_id,
            &Channel::Presence {
                room: room.to_string(),
            },
        )
        .await
    }

    /// Publish to every subscriber of a channel. No database read.
    pub async fn broadcast(&self, channel: &Channel, payload: Value) {
        let frame = ServerFrame::Broadcast {
            channel: channel.to_string(),
            payload,
        };
        let connections = self.connections.read().await;
        for state in connections.values() {
            if state.subscriptions.contains_key(channel) {
                state.outbound.send(frame.clone());
            }
        }
    }

    async fn broadcast_presence(&self, room: &str, event: &str, identity: &Identity) {
        let channel = Channel::Presence {
            room: room.to_string(),
        };
        self.broadcast(
            &channel,
            json!({
                "event": event,
                "user_id": identity.user_id.map(|u| u.to_string()),
            }),
        )
        .await;
    }

    /// Deliver one commit's events. Events in the batch share a commit
    /// and are delivered per subscriber in row-emit order; visibility
    /// probes are deduplicated per (identity, row) across the batch.
    pub async fn dispatch_commit(&self, events: &[ChangeEvent]) {
        let mut probe_cache: HashMap<(String, String), bool> = HashMap::new();

        for event in events {
            if event.primary_key_only {
                // Nothing to filter on; replica identity did not give us
                // a row.
                tracing::debug!(table = %event.table, "discarding primary-key-only event");
                continue;
            }
            let channel = Channel::for_change(&event.schema, &event.table);

            // Snapshot matching subscribers, then probe without holding
            // the registry lock.
            let targets: Vec<(Identity, Option<Predicate>, Outbound)> = {
                let connections = self.connections.read().await;
                connections
                    .values()
                    .filter_map(|state| {
                        state.subscriptions.get(&channel).map(|sub| {
                            (
                                sub.identity.clone(),
                                sub.filter.clone(),
                                state.outbound.clone(),
                            )
                        })
                    })
                    .collect()
            };

            for (identity, filter, outbound) in targets {
                if let Some(filter) = &filter {
                    let row_matches = event
                        .filter_row()
                        .map(|row| matches_row(filter, row))
                        .unwrap_or(false);
                    if !row_matches {
                        continue;
                    }
                }

                let cache_key = (identity_key(&identity), row_key(event));
                let visible = match probe_cache.get(&cache_key) {
                    Some(cached) => *cached,
                    None => {
                        let visible = self.prober.visible(&identity, event).await;
                        probe_cache.insert(cache_key, visible);
                        visible
                    }
                };
                if visible {
                    outbound.send(ServerFrame::change(channel.to_string(), event));
                }
            }
        }
    }

    /// Cancel every table-channel subscription with
    /// `SUBSCRIPTION_FAILED`. Issued on a change-feed resync, after
    /// which clients re-subscribe and are accepted immediately.
    pub async fn fail_table_subscriptions(&self, reason: &str) {
        let mut connections = self.connections.write().await;
        for state in connections.values_mut() {
            let failed: Vec<Channel> = state
                .subscriptions
                .keys()
                .filter(|c| c.is_table())
                .cloned()
                .collect();
            for channel in failed {
                state.subscriptions.remove(&channel);
                state.outbound.send(ServerFrame::error(
                    codes::SUBSCRIPTION_FAILED,
                    reason,
                    Some(channel.to_string()),
                ));
            }
        }
        tracing::warn!(reason, "cancelled all table subscriptions");
    }

    /// Cancel everything a single connection has, with one error frame
    /// per subscription. Used when its identity expires or is revoked.
    pub async fn cancel_subscriptions(&self, connection_id: Uuid, code: &str, reason: &str) {
        let mut connections = self.connections.write().await;
        if let Some(state) = connections.get_mut(&connection_id) {
            for (channel, _) in state.subscriptions.drain() {
                state.outbound.send(ServerFrame::error(
                    code,
                    reason,
                    Some(channel.to_string()),
                ));
            }
        }
    }

    /// Connection ids and identities, for the heartbeat's revalidation
    /// sweep.
    pub async fn connections_snapshot(&self) -> Vec<(Uuid, Identity)> {
        self.connections
            .read()
            .await
            .iter()
            .map(|(id, state)| (*id, state.identity.clone()))
            .collect()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn subscription_count(&self, connection_id: Uuid) -> usize {
        self.connections
            .read()
            .await
            .get(&connection_id)
            .map(|s| s.subscriptions.len())
            .unwrap_or(0)
    }
}

fn identity_key(identity: &Identity) -> String {
    format!(
        "{}:{}",
        identity.role,
        identity
            .user_id
            .map(|u| u.to_string())
            .unwrap_or_default()
    )
}

fn row_key(event: &ChangeEvent) -> String {
    let pk = event
        .primary_key
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",");
    format!("{}.{}:{pk}", event.schema, event.table)
}
