//! Full lifecycle over in-memory backends: scheduled stream, pre-live
//! promotion with notifications, operator start, viewers connecting over
//! the gateway, reconciliation, operator end, and finalization.

use chrono::{Duration as TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use livestream_service::config::Config;
use livestream_service::counter::MemoryCounter;
use livestream_service::jobs::{FinalizeJob, PreLiveJob, ScheduledJob, ViewerCountJob};
use livestream_service::models::StreamStatus;
use livestream_service::services::{AnalyticsSnapshotter, StaticUserDirectory};
use livestream_service::state::AppState;
use livestream_service::store::{MemoryStreamStore, SharedStreamStore, StreamStore};
use livestream_service::websocket::NullPubSub;

fn test_config() -> Arc<Config> {
    Arc::new(Config {
        host: "127.0.0.1".into(),
        port: 0,
        database_url: String::new(),
        redis_url: None,
        pre_live_window_secs: 30 * 60,
        pre_live_interval_secs: 60,
        viewer_count_interval_secs: 5,
        finalize_interval_secs: 10,
        ending_grace_secs: 5,
    })
}

struct World {
    store: Arc<MemoryStreamStore>,
    users: Arc<StaticUserDirectory>,
    state: AppState,
}

fn world() -> World {
    let store = Arc::new(MemoryStreamStore::new());
    let shared: SharedStreamStore = store.clone();
    let users = Arc::new(StaticUserDirectory::new());
    let state = AppState::assemble(
        test_config(),
        shared,
        users.clone(),
        Arc::new(MemoryCounter::new()),
        Arc::new(NullPubSub),
    );

    World {
        store,
        users,
        state,
    }
}

fn assert_count_invariant(stream: &livestream_service::models::Stream) {
    assert!(
        stream.viewers_count <= stream.peak_viewers,
        "viewers_count {} > peak_viewers {}",
        stream.viewers_count,
        stream.peak_viewers
    );
    assert!(
        stream.peak_viewers <= stream.total_viewers,
        "peak_viewers {} > total_viewers {}",
        stream.peak_viewers,
        stream.total_viewers
    );
}

#[actix_rt::test]
async fn scheduled_stream_runs_the_whole_lifecycle() {
    let w = world();
    let store = &w.store;
    let shared: SharedStreamStore = store.clone();

    let owner = Uuid::new_v4();
    w.users.add(owner);
    let viewers: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
    for v in &viewers {
        w.users.add(*v);
    }

    // Two fans opted into live alerts for this broadcaster.
    let fans = [Uuid::new_v4(), Uuid::new_v4()];
    for fan in fans {
        store.subscribe_live_alerts(fan, owner).await;
    }

    // Scheduled ten minutes out: inside the pre-live window.
    let stream = w
        .state
        .streams
        .create(
            owner,
            "launch party".into(),
            Some(Utc::now() + TimeDelta::minutes(10)),
        )
        .await
        .unwrap();
    assert_eq!(stream.status, StreamStatus::Scheduled);

    // Pre-live promotion enqueues one notification per fan, once.
    let pre_live_job = PreLiveJob::new(
        shared.clone(),
        w.state.broadcaster.clone(),
        Duration::from_secs(60),
        Duration::from_secs(30 * 60),
    );
    pre_live_job.tick().await.unwrap();
    pre_live_job.tick().await.unwrap();

    let promoted = store.get_stream(stream.id).await.unwrap().unwrap();
    assert_eq!(promoted.status, StreamStatus::PreLive);
    assert_eq!(store.list_notifications(stream.id).await.unwrap().len(), 2);

    // Operator starts the stream.
    let live = w.state.streams.start(stream.id, owner).await.unwrap();
    assert_eq!(live.status, StreamStatus::Live);
    assert!(live.started_at.is_some());

    // Three viewers connect through the gateway.
    let mut contexts = Vec::new();
    for v in &viewers {
        let (ctx, _rx) = w.state.gateway.connect(stream.id, Some(*v)).await.unwrap();
        contexts.push(ctx);
    }

    let after_joins = store.get_stream(stream.id).await.unwrap().unwrap();
    assert_eq!(after_joins.total_viewers, 3);
    assert_eq!(after_joins.peak_viewers, 3);
    assert_eq!(w.state.counters.current(stream.id).await, 3);
    assert_count_invariant(&after_joins);

    // One viewer drops; the peak holds.
    w.state.gateway.disconnect(&contexts[2]).await;
    assert_eq!(w.state.counters.current(stream.id).await, 2);

    // Reconciliation persists the durable recount and samples analytics.
    let snapshotter = AnalyticsSnapshotter::new(shared.clone());
    let viewer_count_job = ViewerCountJob::new(
        shared.clone(),
        w.state.counters.clone(),
        snapshotter.clone(),
        w.state.broadcaster.clone(),
        Duration::from_secs(5),
    );
    viewer_count_job.tick().await.unwrap();

    let reconciled = store.get_stream(stream.id).await.unwrap().unwrap();
    assert_eq!(reconciled.viewers_count, 2);
    assert_eq!(reconciled.peak_viewers, 3);
    assert_count_invariant(&reconciled);
    assert_eq!(store.list_snapshots(stream.id).await.unwrap().len(), 1);

    // Operator ends the stream; it parks in the grace window.
    let ending = w.state.streams.end(stream.id, owner).await.unwrap();
    assert_eq!(ending.status, StreamStatus::Ending);

    let finalize_job = FinalizeJob::new(
        shared.clone(),
        w.state.counters.clone(),
        snapshotter,
        w.state.broadcaster.clone(),
        Duration::from_secs(10),
        Duration::from_secs(5),
    );

    // Too fresh: the grace window holds it in `ending`.
    finalize_job.tick().await.unwrap();
    let held = store.get_stream(stream.id).await.unwrap().unwrap();
    assert_eq!(held.status, StreamStatus::Ending);

    // Aged past the grace window: finalized on the next tick.
    store
        .backdate_updated_at(stream.id, Utc::now() - TimeDelta::seconds(6))
        .await;
    finalize_job.tick().await.unwrap();

    let ended = store.get_stream(stream.id).await.unwrap().unwrap();
    assert_eq!(ended.status, StreamStatus::Ended);
    assert!(ended.ended_at.is_some());
    assert!((0..=2).contains(&ended.duration));
    assert_eq!(ended.unique_viewers, 3);
    assert_eq!(store.count_watching(stream.id).await.unwrap(), 0);
    assert_count_invariant(&ended);

    // Exactly one final summary snapshot, after the periodic sample.
    let snapshots = store.list_snapshots(stream.id).await.unwrap();
    assert_eq!(snapshots.len(), 2);
    let final_snapshot = &snapshots[1];
    assert_eq!(final_snapshot.viewers_count, 0);
    let data = final_snapshot.data.as_ref().expect("final payload");
    assert_eq!(data["type"], "final");
    assert_eq!(data["unique_viewers"], 3);
    assert_eq!(data["total_viewers"], 3);
    assert_eq!(data["peak_viewers"], 3);

    // Finalizing again is a no-op on an already-ended stream.
    finalize_job.tick().await.unwrap();
    assert_eq!(store.list_snapshots(stream.id).await.unwrap().len(), 2);
}

#[actix_rt::test]
async fn rest_surface_shares_the_gateway_paths() {
    let w = world();
    let owner = Uuid::new_v4();
    let viewer = Uuid::new_v4();
    w.users.add(owner);
    w.users.add(viewer);

    // No scheduled_at: created pre_live, then started.
    let stream = w
        .state
        .streams
        .create(owner, "impromptu".into(), None)
        .await
        .unwrap();
    assert_eq!(stream.status, StreamStatus::PreLive);
    w.state.streams.start(stream.id, owner).await.unwrap();

    let counts = w.state.streams.join(stream.id, viewer).await.unwrap();
    assert_eq!(counts.current_viewers, 1);
    assert_eq!(counts.peak_viewers, 1);

    w.state
        .streams
        .comment(stream.id, viewer, "first!".into())
        .await
        .unwrap();
    w.state
        .streams
        .gift(stream.id, viewer, "rose".into(), 50)
        .await
        .unwrap();
    w.state.streams.like(stream.id, viewer).await.unwrap();
    w.state
        .streams
        .reaction(stream.id, viewer, "heart")
        .await
        .unwrap();

    // Unlisted kinds are a synchronous rejection on the REST path.
    assert!(w
        .state
        .streams
        .reaction(stream.id, viewer, "skull")
        .await
        .is_err());

    let row = w.store.get_stream(stream.id).await.unwrap().unwrap();
    assert_eq!(row.comments_count, 1);
    assert_eq!(row.gifts_count, 1);
    assert_eq!(row.gifts_value, 50);
    assert_eq!(row.likes_count, 1);
    assert_eq!(row.reaction_counts.get("heart"), Some(&1));
    assert!(row.reaction_counts.get("skull").is_none());

    let counts = w.state.streams.leave(stream.id, viewer).await.unwrap();
    assert_eq!(counts.current_viewers, 0);
    assert_eq!(counts.peak_viewers, 1);

    // One closed session with the duration computed.
    let sessions = w.store.sessions_for(stream.id).await;
    assert_eq!(sessions.len(), 1);
    assert!(!sessions[0].is_currently_watching);

    // Engagement against a stream that is no longer joinable is refused.
    w.state.streams.end(stream.id, owner).await.unwrap();
    assert!(w
        .state
        .streams
        .comment(stream.id, viewer, "too late".into())
        .await
        .is_err());
}
