use crate::feed::{ChangeFeedSource, FeedStream};
use crate::listener::FeedWorker;
use crate::outbound::{OutboundReceiver, channel};
use crate::probe::{AllowAllProber, VisibilityProber};
use crate::registry::{RegistryLimits, SubscriptionRegistry};
use async_trait::async_trait;
use fluxbase_core::change::{ChangeEvent, ChangeOp, Lsn};
use fluxbase_core::protocol::{ServerFrame, codes};
use fluxbase_core::{Channel, ClaimSet, CredentialSource, Error, Identity, Role};
use serde_json::{Map, Value, json};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

fn authenticated(user_id: Uuid) -> Identity {
    Identity {
        user_id: Some(user_id),
        role: Role::Authenticated,
        claims: ClaimSet::default(),
        jti: Some(Uuid::new_v4().to_string()),
        expires_at: None,
        source: CredentialSource::Token,
    }
}

fn row(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

fn insert_event(id: i64, lsn: u64) -> ChangeEvent {
    ChangeEvent {
        schema: "public".into(),
        table: "todos".into(),
        op: ChangeOp::Insert,
        new_row: Some(row(json!({"id": id, "title": format!("todo {id}")}))),
        old_row: None,
        primary_key: vec![("id".into(), json!(id))],
        primary_key_only: false,
        commit_lsn: Lsn(lsn),
    }
}

fn delete_event(id: i64, lsn: u64) -> ChangeEvent {
    ChangeEvent {
        schema: "public".into(),
        table: "todos".into(),
        op: ChangeOp::Delete,
        new_row: None,
        old_row: Some(row(json!({"id": id, "title": format!("todo {id}")}))),
        primary_key: vec![("id".into(), json!(id))],
        primary_key_only: false,
        commit_lsn: Lsn(lsn),
    }
}

fn registry(prober: Arc<dyn VisibilityProber>) -> SubscriptionRegistry {
    SubscriptionRegistry::new(RegistryLimits::default(), prober)
}

async fn connect(
    registry: &SubscriptionRegistry,
    identity: Identity,
) -> (Uuid, OutboundReceiver) {
    let (outbound, rx) = channel(64);
    let id = Uuid::new_v4();
    registry.register(id, identity, outbound).await.unwrap();
    (id, rx)
}

async fn next_frame(rx: &mut OutboundReceiver) -> ServerFrame {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("outbound closed")
}

#[tokio::test]
async fn insert_and_delete_events_reach_the_subscriber() {
    let registry = registry(Arc::new(AllowAllProber));
    let (conn, mut rx) = connect(&registry, authenticated(Uuid::new_v4())).await;
    registry
        .subscribe(conn, "table:public.todos".parse().unwrap(), None)
        .await
        .unwrap();

    registry.dispatch_commit(&[insert_event(1, 10)]).await;
    match next_frame(&mut rx).await {
        ServerFrame::Broadcast { channel, payload } => {
            assert_eq!(channel, "table:public.todos");
            assert_eq!(payload["type"], "INSERT");
            assert_eq!(payload["record"]["id"], 1);
            assert!(payload["old_record"].is_null());
        }
        other => panic!("unexpected frame: {other:?}"),
    }

    registry.dispatch_commit(&[delete_event(1, 11)]).await;
    match next_frame(&mut rx).await {
        ServerFrame::Broadcast { payload, .. } => {
            assert_eq!(payload["type"], "DELETE");
            assert_eq!(payload["old_record"]["id"], 1);
            assert!(payload["record"].is_null());
        }
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[tokio::test]
async fn commit_batch_is_delivered_in_row_emit_order() {
    let registry = registry(Arc::new(AllowAllProber));
    let (conn, mut rx) = connect(&registry, authenticated(Uuid::new_v4())).await;
    registry
        .subscribe(conn, "table:public.todos".parse().unwrap(), None)
        .await
        .unwrap();

    let mut update = insert_event(1, 20);
    update.op = ChangeOp::Update;
    registry
        .dispatch_commit(&[insert_event(1, 20), insert_event(2, 20), update])
        .await;

    let types: Vec<(String, i64)> = [
        next_frame(&mut rx).await,
        next_frame(&mut rx).await,
        next_frame(&mut rx).await,
    ]
    .into_iter()
    .map(|frame| match frame {
        ServerFrame::Broadcast { payload, .. } => (
            payload["type"].as_str().unwrap().to_string(),
            payload["record"]["id"].as_i64().unwrap(),
        ),
        other => panic!("unexpected frame: {other:?}"),
    })
    .collect();
    assert_eq!(
        types,
        vec![
            ("INSERT".to_string(), 1),
            ("INSERT".to_string(), 2),
            ("UPDATE".to_string(), 1),
        ]
    );
}

#[tokio::test]
async fn primary_key_only_events_are_discarded() {
    let registry = registry(Arc::new(AllowAllProber));
    let (conn, mut rx) = connect(&registry, authenticated(Uuid::new_v4())).await;
    registry
        .subscribe(conn, "table:public.todos".parse().unwrap(), None)
        .await
        .unwrap();

    let mut pk_only = delete_event(9, 30);
    pk_only.old_row = None;
    pk_only.primary_key_only = true;
    registry.dispatch_commit(&[pk_only, insert_event(1, 31)]).await;

    // Only the insert arrives.
    match next_frame(&mut rx).await {
        ServerFrame::Broadcast { payload, .. } => assert_eq!(payload["type"], "INSERT"),
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[tokio::test]
async fn subscription_filter_drops_non_matching_rows() {
    let registry = registry(Arc::new(AllowAllProber));
    let (conn, mut rx) = connect(&registry, authenticated(Uuid::new_v4())).await;
    registry
        .subscribe(
            conn,
            "table:public.todos".parse().unwrap(),
            Some("id=gt.5"),
        )
        .await
        .unwrap();

    registry
        .dispatch_commit(&[insert_event(1, 40), insert_event(6, 41)])
        .await;
    match next_frame(&mut rx).await {
        ServerFrame::Broadcast { payload, .. } => assert_eq!(payload["record"]["id"], 6),
        other => panic!("unexpected frame: {other:?}"),
    }
}

struct OwnerOnlyProber;

#[async_trait]
impl VisibilityProber for OwnerOnlyProber {
    async fn visible(&self, identity: &Identity, event: &ChangeEvent) -> bool {
        // Stand-in for an RLS policy on app.user_id: the row's owner
        // column must match the subscriber.
        let owner = event
            .filter_row()
            .and_then(|r| r.get("owner"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        identity.user_id.map(|u| u.to_string()) == Some(owner)
    }
}

#[tokio::test]
async fn visibility_probe_separates_subscribers() {
    let registry = registry(Arc::new(OwnerOnlyProber));
    let owner = Uuid::new_v4();
    let (conn_a, mut rx_a) = connect(&registry, authenticated(owner)).await;
    let (conn_b, mut rx_b) = connect(&registry, authenticated(Uuid::new_v4())).await;
    for conn in [conn_a, conn_b] {
        registry
            .subscribe(conn, "table:public.todos".parse().unwrap(), None)
            .await
            .unwrap();
    }

    let mut event = insert_event(1, 50);
    event
        .new_row
        .as_mut()
        .unwrap()
        .insert("owner".into(), json!(owner.to_string()));
    registry.dispatch_commit(&[event]).await;

    match next_frame(&mut rx_a).await {
        ServerFrame::Broadcast { payload, .. } => assert_eq!(payload["type"], "INSERT"),
        other => panic!("unexpected frame: {other:?}"),
    }
    // The non-owner gets nothing.
    assert!(
        tokio::time::timeout(Duration::from_millis(100), rx_b.recv())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn subscription_limit_returns_rate_limited() {
    let limits = RegistryLimits {
        max_subscriptions_per_connection: 2,
        ..Default::default()
    };
    let registry = SubscriptionRegistry::new(limits, Arc::new(AllowAllProber));
    let (conn, _rx) = connect(&registry, authenticated(Uuid::new_v4())).await;

    registry
        .subscribe(conn, "broadcast:a".parse().unwrap(), None)
        .await
        .unwrap();
    registry
        .subscribe(conn, "broadcast:b".parse().unwrap(), None)
        .await
        .unwrap();
    let err = registry
        .subscribe(conn, "broadcast:c".parse().unwrap(), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::RATE_LIMITED);
}

#[tokio::test]
async fn per_user_connection_cap_is_enforced() {
    let limits = RegistryLimits {
        max_connections_per_user: 2,
        ..Default::default()
    };
    let registry = SubscriptionRegistry::new(limits, Arc::new(AllowAllProber));
    let user = Uuid::new_v4();

    let (_c1, _rx1) = connect(&registry, authenticated(user)).await;
    let (_c2, _rx2) = connect(&registry, authenticated(user)).await;

    let (outbound, _rx3) = channel(8);
    let err = registry
        .register(Uuid::new_v4(), authenticated(user), outbound)
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::RATE_LIMITED);

    // A different user still gets in.
    let (outbound, _rx4) = channel(8);
    registry
        .register(Uuid::new_v4(), authenticated(Uuid::new_v4()), outbound)
        .await
        .unwrap();
}

#[tokio::test]
async fn resync_fails_table_subscriptions_and_allows_resubscribe() {
    let registry = registry(Arc::new(AllowAllProber));
    let (conn, mut rx) = connect(&registry, authenticated(Uuid::new_v4())).await;
    let table_channel: Channel = "table:public.todos".parse().unwrap();
    registry
        .subscribe(conn, table_channel.clone(), None)
        .await
        .unwrap();
    registry
        .subscribe(conn, "broadcast:news".parse().unwrap(), None)
        .await
        .unwrap();

    registry.fail_table_subscriptions("change feed resynchronized").await;

    match next_frame(&mut rx).await {
        ServerFrame::Error { code, channel, .. } => {
            assert_eq!(code, codes::SUBSCRIPTION_FAILED);
            assert_eq!(channel.as_deref(), Some("table:public.todos"));
        }
        other => panic!("unexpected frame: {other:?}"),
    }
    // The broadcast subscription survives; only the table one fell.
    assert_eq!(registry.subscription_count(conn).await, 1);

    // Re-subscription is accepted immediately.
    registry.subscribe(conn, table_channel, None).await.unwrap();
    assert_eq!(registry.subscription_count(conn).await, 2);
}

#[tokio::test]
async fn broadcast_reaches_only_topic_subscribers() {
    let registry = registry(Arc::new(AllowAllProber));
    let (conn_a, mut rx_a) = connect(&registry, authenticated(Uuid::new_v4())).await;
    let (_conn_b, mut rx_b) = connect(&registry, authenticated(Uuid::new_v4())).await;
    registry
        .subscribe(conn_a, "broadcast:news".parse().unwrap(), None)
        .await
        .unwrap();

    registry
        .broadcast(&"broadcast:news".parse().unwrap(), json!({"headline": "hi"}))
        .await;

    match next_frame(&mut rx_a).await {
        ServerFrame::Broadcast { channel, payload } => {
            assert_eq!(channel, "broadcast:news");
            assert_eq!(payload["headline"], "hi");
        }
        other => panic!("unexpected frame: {other:?}"),
    }
    assert!(
        tokio::time::timeout(Duration::from_millis(100), rx_b.recv())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn presence_join_and_leave_are_broadcast() {
    let registry = registry(Arc::new(AllowAllProber));
    let user_a = Uuid::new_v4();
    let user_b = Uuid::new_v4();
    let (conn_a, mut rx_a) = connect(&registry, authenticated(user_a)).await;
    let (conn_b, _rx_b) = connect(&registry, authenticated(user_b)).await;

    registry.presence_join(conn_a, "lobby").await.unwrap();
    registry.presence_join(conn_b, "lobby").await.unwrap();
    match next_frame(&mut rx_a).await {
        ServerFrame::Broadcast { channel, payload } => {
            assert_eq!(channel, "presence:lobby");
            assert_eq!(payload["event"], "join");
            assert_eq!(payload["user_id"], user_b.to_string());
        }
        other => panic!("unexpected frame: {other:?}"),
    }

    registry.presence_leave(conn_b, "lobby").await.unwrap();
    match next_frame(&mut rx_a).await {
        ServerFrame::Broadcast { payload, .. } => {
            assert_eq!(payload["event"], "leave");
            assert_eq!(payload["user_id"], user_b.to_string());
        }
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[tokio::test]
async fn cancelled_subscriptions_emit_error_frames() {
    let registry = registry(Arc::new(AllowAllProber));
    let (conn, mut rx) = connect(&registry, authenticated(Uuid::new_v4())).await;
    registry
        .subscribe(conn, "table:public.todos".parse().unwrap(), None)
        .await
        .unwrap();

    registry
        .cancel_subscriptions(conn, codes::UNAUTHORIZED, "token revoked")
        .await;
    match next_frame(&mut rx).await {
        ServerFrame::Error { code, .. } => assert_eq!(code, codes::UNAUTHORIZED),
        other => panic!("unexpected frame: {other:?}"),
    }
    assert_eq!(registry.subscription_count(conn).await, 0);
}

// ---------------------------------------------------------------------------
// Feed worker
// ---------------------------------------------------------------------------

type Script = Vec<Result<ChangeEvent, Error>>;

struct ScriptedSource {
    scripts: Mutex<VecDeque<Script>>,
}

impl ScriptedSource {
    fn new(scripts: Vec<Script>) -> Self {
        ScriptedSource {
            scripts: Mutex::new(scripts.into()),
        }
    }
}

#[async_trait]
impl ChangeFeedSource for ScriptedSource {
    async fn connect(&self, _from_lsn: Option<Lsn>) -> Result<Box<dyn FeedStream>, Error> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        Ok(Box::new(ScriptedStream {
            items: script.into(),
        }))
    }

    fn supports_rewind(&self) -> bool {
        false
    }
}

struct ScriptedStream {
    items: VecDeque<Result<ChangeEvent, Error>>,
}

#[async_trait]
impl FeedStream for ScriptedStream {
    async fn next(&mut self) -> Result<ChangeEvent, Error> {
        match self.items.pop_front() {
            Some(item) => item,
            // Stay open but idle once the script is exhausted.
            None => futures::future::pending().await,
        }
    }
}

#[tokio::test(start_paused = true)]
async fn worker_dispatches_commits_and_signals_resync_on_reconnect() {
    let registry = Arc::new(SubscriptionRegistry::new(
        RegistryLimits::default(),
        Arc::new(AllowAllProber),
    ));
    let (conn, mut rx) = connect(&registry, authenticated(Uuid::new_v4())).await;
    registry
        .subscribe(conn, "table:public.todos".parse().unwrap(), None)
        .await
        .unwrap();

    // First connection delivers one commit then drops; the second stays
    // idle. NOTIFY cannot rewind, so the reconnect must trigger a
    // resync.
    let source = Arc::new(ScriptedSource::new(vec![
        vec![
            Ok(insert_event(1, 100)),
            Ok(insert_event(2, 100)),
            Err(Error::ServiceUnavailable("connection lost".into())),
        ],
        vec![],
    ]));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = FeedWorker::new(source, Arc::clone(&registry), shutdown_rx);
    let handle = worker.spawn();

    // Both inserts of the commit arrive, in order.
    for expected in [1, 2] {
        match next_frame(&mut rx).await {
            ServerFrame::Broadcast { payload, .. } => {
                assert_eq!(payload["record"]["id"], expected);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    // After the reconnect the table subscription is failed.
    match next_frame(&mut rx).await {
        ServerFrame::Error { code, .. } => assert_eq!(code, codes::SUBSCRIPTION_FAILED),
        other => panic!("unexpected frame: {other:?}"),
    }

    handle.abort();
}

#[tokio::test(start_paused = true)]
async fn worker_suppresses_consecutive_duplicates() {
    let registry = Arc::new(SubscriptionRegistry::new(
        RegistryLimits::default(),
        Arc::new(AllowAllProber),
    ));
    let (conn, mut rx) = connect(&registry, authenticated(Uuid::new_v4())).await;
    registry
        .subscribe(conn, "table:public.todos".parse().unwrap(), None)
        .await
        .unwrap();

    let source = Arc::new(ScriptedSource::new(vec![vec![
        Ok(insert_event(1, 200)),
        Ok(insert_event(1, 200)),
        Ok(insert_event(2, 201)),
    ]]));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = FeedWorker::new(source, Arc::clone(&registry), shutdown_rx).spawn();

    let mut seen = Vec::new();
    for _ in 0..2 {
        match next_frame(&mut rx).await {
            ServerFrame::Broadcast { payload, .. } => {
                seen.push(payload["record"]["id"].as_i64().unwrap());
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }
    assert_eq!(seen, vec![1, 2]);
    assert!(
        tokio::time::timeout(Duration::from_millis(100), rx.recv())
            .await
            .is_err()
    );

    handle.abort();
}
