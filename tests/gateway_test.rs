//! Connection gateway behavior over in-memory backends

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use livestream_service::counter::{MemoryCounter, ViewerCounterStore};
use livestream_service::models::{NewStream, StreamStatus};
use livestream_service::services::StaticUserDirectory;
use livestream_service::store::{MemoryStreamStore, SharedStreamStore, StreamStore};
use livestream_service::websocket::{
    ConnectReject, ConnectionGateway, EventBroadcaster, NullPubSub, StreamTopicRegistry,
};

struct Harness {
    store: Arc<MemoryStreamStore>,
    users: Arc<StaticUserDirectory>,
    registry: StreamTopicRegistry,
    gateway: ConnectionGateway,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStreamStore::new());
    let shared: SharedStreamStore = store.clone();
    let users = Arc::new(StaticUserDirectory::new());
    let registry = StreamTopicRegistry::new();
    let broadcaster = EventBroadcaster::new(registry.clone(), Arc::new(NullPubSub));
    let counters = ViewerCounterStore::new(Arc::new(MemoryCounter::new()), shared.clone());
    let gateway = ConnectionGateway::new(
        shared,
        users.clone(),
        counters,
        broadcaster,
        registry.clone(),
    );

    Harness {
        store,
        users,
        registry,
        gateway,
    }
}

async fn live_stream(h: &Harness) -> Uuid {
    let stream = h
        .store
        .create_stream(
            NewStream {
                owner_id: Uuid::new_v4(),
                title: "gateway test".into(),
                scheduled_at: None,
            },
            Utc::now(),
        )
        .await
        .unwrap();
    h.store
        .mark_live(stream.id, Utc::now())
        .await
        .unwrap()
        .unwrap();
    stream.id
}

fn known_user(h: &Harness) -> Uuid {
    let user = Uuid::new_v4();
    h.users.add(user);
    user
}

#[actix_rt::test]
async fn unknown_stream_is_rejected() {
    let h = harness();
    let err = h.gateway.connect(Uuid::new_v4(), None).await.unwrap_err();
    assert_eq!(err, ConnectReject::StreamNotFound);
}

#[actix_rt::test]
async fn scheduled_and_ended_streams_reject_viewers() {
    let h = harness();
    let scheduled = h
        .store
        .create_stream(
            NewStream {
                owner_id: Uuid::new_v4(),
                title: "not yet".into(),
                scheduled_at: Some(Utc::now() + chrono::Duration::hours(1)),
            },
            Utc::now(),
        )
        .await
        .unwrap();

    let err = h.gateway.connect(scheduled.id, None).await.unwrap_err();
    assert_eq!(
        err,
        ConnectReject::StreamNotJoinable(StreamStatus::Scheduled)
    );

    let ended = live_stream(&h).await;
    h.store.mark_ending(ended, Utc::now()).await.unwrap();
    h.store.mark_ended(ended, Utc::now(), 0).await.unwrap();

    let err = h.gateway.connect(ended, None).await.unwrap_err();
    assert_eq!(err, ConnectReject::StreamNotJoinable(StreamStatus::Ended));
}

#[actix_rt::test]
async fn unknown_user_is_rejected() {
    let h = harness();
    let stream_id = live_stream(&h).await;
    let stranger = Uuid::new_v4();

    let err = h
        .gateway
        .connect(stream_id, Some(stranger))
        .await
        .unwrap_err();
    assert_eq!(err, ConnectReject::UnknownUser(stranger));
    assert_eq!(h.registry.subscriber_count(stream_id).await, 0);
}

#[actix_rt::test]
async fn connect_counts_subscribes_and_broadcasts() {
    let h = harness();
    let stream_id = live_stream(&h).await;
    let user = known_user(&h);

    let (ctx, mut rx) = h.gateway.connect(stream_id, Some(user)).await.unwrap();
    assert_eq!(ctx.stream_id, stream_id);
    assert_eq!(h.registry.subscriber_count(stream_id).await, 1);

    // The connecting client hears its own count update.
    let event = rx.try_recv().expect("count broadcast");
    let json: serde_json::Value = serde_json::from_str(&event).unwrap();
    assert_eq!(json["event"], "viewer_count_updated");
    assert_eq!(json["data"]["current_viewers"], 1);
    assert_eq!(json["data"]["peak_viewers"], 1);

    let stream = h.store.get_stream(stream_id).await.unwrap().unwrap();
    assert_eq!(stream.total_viewers, 1);
    assert_eq!(stream.peak_viewers, 1);
    assert_eq!(h.store.count_watching(stream_id).await.unwrap(), 1);
}

#[actix_rt::test]
async fn connect_then_disconnect_closes_exactly_one_session() {
    let h = harness();
    let stream_id = live_stream(&h).await;
    let user = known_user(&h);

    let (ctx, _rx) = h.gateway.connect(stream_id, Some(user)).await.unwrap();
    h.gateway.disconnect(&ctx).await;

    assert_eq!(h.registry.subscriber_count(stream_id).await, 0);
    assert_eq!(h.store.count_watching(stream_id).await.unwrap(), 0);

    let sessions = h.store.sessions_for(stream_id).await;
    assert_eq!(sessions.len(), 1);
    let session = &sessions[0];
    assert!(!session.is_currently_watching);
    assert!(session.left_at.is_some());
    // immediate disconnect: duration is the elapsed wall time, here ~0
    assert!((0..=1).contains(&session.watch_duration));

    // Invariant survives: counts on the row never regress past each other.
    let stream = h.store.get_stream(stream_id).await.unwrap().unwrap();
    assert!(stream.viewers_count <= stream.peak_viewers);
    assert!(stream.peak_viewers <= stream.total_viewers);
}

#[actix_rt::test]
async fn reconnecting_does_not_double_count_total_viewers() {
    let h = harness();
    let stream_id = live_stream(&h).await;
    let user = known_user(&h);

    let (ctx, _rx) = h.gateway.connect(stream_id, Some(user)).await.unwrap();
    h.gateway.disconnect(&ctx).await;
    let (_ctx, _rx) = h.gateway.connect(stream_id, Some(user)).await.unwrap();

    let stream = h.store.get_stream(stream_id).await.unwrap().unwrap();
    // Two sessions, both counted as joins.
    assert_eq!(stream.total_viewers, 2);
    assert_eq!(h.store.count_distinct_viewers(stream_id).await.unwrap(), 1);
}

#[actix_rt::test]
async fn ping_gets_a_pong_and_nothing_is_broadcast() {
    let h = harness();
    let stream_id = live_stream(&h).await;

    let (ctx, mut rx) = h.gateway.connect(stream_id, None).await.unwrap();
    while rx.try_recv().is_ok() {} // drain the connect broadcast

    let reply = h
        .gateway
        .handle_message(&ctx, r#"{"event":"ping"}"#)
        .await
        .expect("pong reply");
    let json = serde_json::to_value(&reply).unwrap();
    assert_eq!(json["event"], "pong");
    assert!(json["data"]["timestamp"].is_i64());

    assert!(rx.try_recv().is_err());
}

#[actix_rt::test]
async fn valid_reaction_is_counted_and_broadcast() {
    let h = harness();
    let stream_id = live_stream(&h).await;
    let user = known_user(&h);

    let (ctx, mut rx) = h.gateway.connect(stream_id, Some(user)).await.unwrap();
    while rx.try_recv().is_ok() {}

    let reply = h
        .gateway
        .handle_message(&ctx, r#"{"event":"reaction","data":{"reaction_type":"clap"}}"#)
        .await;
    assert!(reply.is_none());

    let event = rx.try_recv().expect("reaction broadcast");
    let json: serde_json::Value = serde_json::from_str(&event).unwrap();
    assert_eq!(json["event"], "reaction");
    assert_eq!(json["data"]["reaction_type"], "clap");
    assert_eq!(json["data"]["user_id"], user.to_string());

    let stream = h.store.get_stream(stream_id).await.unwrap().unwrap();
    assert_eq!(stream.reaction_counts.get("clap"), Some(&1));
}

#[actix_rt::test]
async fn unlisted_reaction_kind_is_dropped_silently() {
    let h = harness();
    let stream_id = live_stream(&h).await;

    let (ctx, mut rx) = h.gateway.connect(stream_id, None).await.unwrap();
    while rx.try_recv().is_ok() {}

    let reply = h
        .gateway
        .handle_message(&ctx, r#"{"event":"reaction","data":{"reaction_type":"skull"}}"#)
        .await;
    assert!(reply.is_none());
    assert!(rx.try_recv().is_err());

    let stream = h.store.get_stream(stream_id).await.unwrap().unwrap();
    assert!(stream.reaction_counts.is_empty());
}

#[actix_rt::test]
async fn malformed_messages_are_ignored() {
    let h = harness();
    let stream_id = live_stream(&h).await;

    let (ctx, mut rx) = h.gateway.connect(stream_id, None).await.unwrap();
    while rx.try_recv().is_ok() {}

    assert!(h.gateway.handle_message(&ctx, "not json").await.is_none());
    assert!(h
        .gateway
        .handle_message(&ctx, r#"{"event":"takeover"}"#)
        .await
        .is_none());
    assert!(rx.try_recv().is_err());
}
