//! Ending-finalization job
//!
//! `ending` is a short grace window that lets final client acks flush.
//! Once a stream has sat in it long enough, this job computes the final
//! duration, flips the status to `ended` behind the status guard, closes
//! every still-open viewer session, writes the final analytics summary, and
//! announces the end. The guarded flip is what makes the final summary run
//! exactly once even if two ticks race.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{Duration as TimeDelta, Utc};
use std::time::Duration;
use tracing::{info, warn};

use super::ScheduledJob;
use crate::counter::ViewerCounterStore;
use crate::models::{Stream, StreamStatus};
use crate::services::AnalyticsSnapshotter;
use crate::store::SharedStreamStore;
use crate::websocket::EventBroadcaster;

pub struct FinalizeJob {
    store: SharedStreamStore,
    counters: ViewerCounterStore,
    snapshotter: AnalyticsSnapshotter,
    broadcaster: EventBroadcaster,
    interval: Duration,
    grace: TimeDelta,
}

impl FinalizeJob {
    pub fn new(
        store: SharedStreamStore,
        counters: ViewerCounterStore,
        snapshotter: AnalyticsSnapshotter,
        broadcaster: EventBroadcaster,
        interval: Duration,
        grace: Duration,
    ) -> Self {
        Self {
            store,
            counters,
            snapshotter,
            broadcaster,
            interval,
            grace: TimeDelta::from_std(grace).unwrap_or_else(|_| TimeDelta::seconds(5)),
        }
    }

    async fn finalize(&self, stream: &Stream) -> anyhow::Result<()> {
        let now = Utc::now();
        let duration = stream
            .started_at
            .map(|started| (now - started).num_seconds().max(0))
            .unwrap_or(0);

        let Some(ended) = self
            .store
            .mark_ended(stream.id, now, duration)
            .await
            .context("mark ended")?
        else {
            // Another tick finalized it first.
            return Ok(());
        };

        let closed = self
            .store
            .close_all_viewers(ended.id, now)
            .await
            .context("force-close open sessions")?;

        self.snapshotter
            .final_summary(&ended)
            .await
            .context("write final summary")?;

        self.counters.clear(ended.id).await;

        // Re-read so the ended broadcast carries the unique-viewer total the
        // summary just persisted.
        let announced = self
            .store
            .get_stream(ended.id)
            .await
            .ok()
            .flatten()
            .unwrap_or(ended);
        self.broadcaster.stream_ended(&announced).await;

        info!(
            stream_id = %announced.id,
            duration,
            sessions_closed = closed,
            unique_viewers = announced.unique_viewers,
            "stream finalized"
        );
        Ok(())
    }
}

#[async_trait]
impl ScheduledJob for FinalizeJob {
    fn name(&self) -> &'static str {
        "finalize"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&self) -> anyhow::Result<()> {
        let now = Utc::now();
        let ending = self
            .store
            .list_by_status(StreamStatus::Ending)
            .await
            .context("list ending streams")?;

        for stream in ending {
            if now - stream.updated_at < self.grace {
                continue;
            }
            if let Err(e) = self.finalize(&stream).await {
                warn!(stream_id = %stream.id, error = %e, "finalization failed, skipping stream");
            }
        }
        Ok(())
    }
}
