//! Pre-live promotion job
//!
//! Every tick moves `scheduled` streams whose start falls inside the
//! pre-live window into `pre_live`, announces the change, and enqueues one
//! notification row per opted-in subscriber of the broadcaster. The bulk
//! insert deduplicates on (stream, user, type), so a repeated tick enqueues
//! nothing new.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{Duration as TimeDelta, Utc};
use std::time::Duration;
use tracing::{info, warn};

use super::ScheduledJob;
use crate::models::{Stream, StreamStatus, NOTIFY_STREAM_STARTING};
use crate::store::SharedStreamStore;
use crate::websocket::EventBroadcaster;

pub struct PreLiveJob {
    store: SharedStreamStore,
    broadcaster: EventBroadcaster,
    interval: Duration,
    window: TimeDelta,
}

impl PreLiveJob {
    pub fn new(
        store: SharedStreamStore,
        broadcaster: EventBroadcaster,
        interval: Duration,
        window: Duration,
    ) -> Self {
        Self {
            store,
            broadcaster,
            interval,
            window: TimeDelta::from_std(window).unwrap_or_else(|_| TimeDelta::minutes(30)),
        }
    }

    async fn promote(&self, stream: &Stream) -> anyhow::Result<()> {
        let now = Utc::now();

        // Status-guarded: a concurrent tick that already promoted this
        // stream makes this a no-op and we fire no effects.
        let Some(updated) = self
            .store
            .mark_pre_live(stream.id, now)
            .await
            .context("mark pre_live")?
        else {
            return Ok(());
        };

        self.broadcaster
            .status_changed(updated.id, StreamStatus::Scheduled, StreamStatus::PreLive)
            .await;

        let subscribers = self
            .store
            .live_alert_subscribers(updated.owner_id)
            .await
            .context("fetch live-alert subscribers")?;
        let enqueued = self
            .store
            .insert_notifications(updated.id, &subscribers, NOTIFY_STREAM_STARTING, now)
            .await
            .context("enqueue notifications")?;

        info!(
            stream_id = %updated.id,
            subscribers = subscribers.len(),
            enqueued,
            "stream entered pre_live"
        );
        Ok(())
    }
}

#[async_trait]
impl ScheduledJob for PreLiveJob {
    fn name(&self) -> &'static str {
        "pre_live"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&self) -> anyhow::Result<()> {
        let now = Utc::now();
        let upcoming = self
            .store
            .list_scheduled_between(now, now + self.window)
            .await
            .context("list scheduled streams")?;

        for stream in upcoming {
            if let Err(e) = self.promote(&stream).await {
                warn!(stream_id = %stream.id, error = %e, "pre-live promotion failed, skipping stream");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewStream;
    use crate::store::{MemoryStreamStore, StreamStore};
    use crate::websocket::{NullPubSub, StreamTopicRegistry};
    use std::sync::Arc;
    use uuid::Uuid;

    fn broadcaster() -> EventBroadcaster {
        EventBroadcaster::new(StreamTopicRegistry::new(), Arc::new(NullPubSub))
    }

    async fn scheduled_stream(store: &MemoryStreamStore, minutes_out: i64) -> Stream {
        store
            .create_stream(
                NewStream {
                    owner_id: Uuid::new_v4(),
                    title: "scheduled".into(),
                    scheduled_at: Some(Utc::now() + TimeDelta::minutes(minutes_out)),
                },
                Utc::now(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn promotes_streams_inside_the_window() {
        let store = Arc::new(MemoryStreamStore::new());
        let soon = scheduled_stream(&store, 10).await;
        let distant = scheduled_stream(&store, 90).await;

        let job = PreLiveJob::new(
            store.clone(),
            broadcaster(),
            Duration::from_secs(60),
            Duration::from_secs(30 * 60),
        );
        job.tick().await.unwrap();

        let soon = store.get_stream(soon.id).await.unwrap().unwrap();
        assert_eq!(soon.status, StreamStatus::PreLive);
        assert!(soon.pre_live_started_at.is_some());

        let distant = store.get_stream(distant.id).await.unwrap().unwrap();
        assert_eq!(distant.status, StreamStatus::Scheduled);
    }

    #[tokio::test]
    async fn second_tick_is_idempotent() {
        let store = Arc::new(MemoryStreamStore::new());
        let owner = Uuid::new_v4();
        let stream = store
            .create_stream(
                NewStream {
                    owner_id: owner,
                    title: "alerts".into(),
                    scheduled_at: Some(Utc::now() + TimeDelta::minutes(5)),
                },
                Utc::now(),
            )
            .await
            .unwrap();

        let fan_a = Uuid::new_v4();
        let fan_b = Uuid::new_v4();
        store.subscribe_live_alerts(fan_a, owner).await;
        store.subscribe_live_alerts(fan_b, owner).await;

        let job = PreLiveJob::new(
            store.clone(),
            broadcaster(),
            Duration::from_secs(60),
            Duration::from_secs(30 * 60),
        );

        job.tick().await.unwrap();
        assert_eq!(store.list_notifications(stream.id).await.unwrap().len(), 2);

        // Re-running changes nothing: no new status effects, no new rows.
        job.tick().await.unwrap();
        let after = store.get_stream(stream.id).await.unwrap().unwrap();
        assert_eq!(after.status, StreamStatus::PreLive);
        assert_eq!(store.list_notifications(stream.id).await.unwrap().len(), 2);
    }
}
