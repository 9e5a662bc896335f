//! Viewer-count reconciliation job
//!
//! Every few seconds, for each live stream: recount open sessions from the
//! durable viewer table, persist the count (raising the peak alongside),
//! append an analytics sample, and broadcast the reconciled count. This is
//! what heals any drift the best-effort per-connection updates leave
//! behind.

use anyhow::Context;
use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

use super::ScheduledJob;
use crate::counter::ViewerCounterStore;
use crate::models::{Stream, StreamStatus};
use crate::services::AnalyticsSnapshotter;
use crate::store::SharedStreamStore;
use crate::websocket::EventBroadcaster;

pub struct ViewerCountJob {
    store: SharedStreamStore,
    counters: ViewerCounterStore,
    snapshotter: AnalyticsSnapshotter,
    broadcaster: EventBroadcaster,
    interval: Duration,
}

impl ViewerCountJob {
    pub fn new(
        store: SharedStreamStore,
        counters: ViewerCounterStore,
        snapshotter: AnalyticsSnapshotter,
        broadcaster: EventBroadcaster,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            counters,
            snapshotter,
            broadcaster,
            interval,
        }
    }

    async fn sample(&self, stream: &Stream) -> anyhow::Result<()> {
        let count = self
            .store
            .count_watching(stream.id)
            .await
            .context("recount open sessions")?;

        // Ratchet the peak first so the persisted row already reflects it.
        self.counters.update_peak(stream.id, count).await;

        let Some(updated) = self
            .store
            .reconcile_viewer_counts(stream.id, count)
            .await
            .context("persist reconciled count")?
        else {
            // Stream row vanished between listing and update; nothing to do.
            return Ok(());
        };

        self.snapshotter
            .snapshot(&updated)
            .await
            .context("append analytics sample")?;

        self.broadcaster
            .viewer_count_updated(updated.id, updated.viewers_count, updated.peak_viewers)
            .await;
        Ok(())
    }
}

#[async_trait]
impl ScheduledJob for ViewerCountJob {
    fn name(&self) -> &'static str {
        "viewer_count"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&self) -> anyhow::Result<()> {
        let live = self
            .store
            .list_by_status(StreamStatus::Live)
            .await
            .context("list live streams")?;

        for stream in live {
            if let Err(e) = self.sample(&stream).await {
                warn!(stream_id = %stream.id, error = %e, "viewer-count sample failed, skipping stream");
            }
        }
        Ok(())
    }
}
