//! Analytics snapshotter
//!
//! Periodic samples while a stream is live, plus the single final summary
//! written when it ends. Snapshots are append-only.

use chrono::Utc;
use serde_json::json;

use crate::models::{Snapshot, Stream};
use crate::store::{SharedStreamStore, StoreResult};

#[derive(Clone)]
pub struct AnalyticsSnapshotter {
    store: SharedStreamStore,
}

impl AnalyticsSnapshotter {
    pub fn new(store: SharedStreamStore) -> Self {
        Self { store }
    }

    /// Sample the live viewer count and engagement rate. Called by the
    /// viewer-count job on every tick.
    pub async fn snapshot(&self, stream: &Stream) -> StoreResult<Snapshot> {
        self.store
            .append_snapshot(
                stream.id,
                stream.viewers_count,
                stream.engagement_rate(),
                None,
                Utc::now(),
            )
            .await
    }

    /// End-of-stream summary: computes distinct viewers and average watch
    /// time, persists `unique_viewers` onto the stream, and appends the one
    /// `data.type = "final"` snapshot row.
    ///
    /// Callers reach this through the status-guarded `ending -> ended`
    /// transition, which makes it run at most once per stream.
    pub async fn final_summary(&self, stream: &Stream) -> StoreResult<Snapshot> {
        let unique_viewers = self.store.count_distinct_viewers(stream.id).await?;
        let average_watch_time = self.store.average_watch_duration(stream.id).await?;

        self.store
            .set_unique_viewers(stream.id, unique_viewers)
            .await?;

        let data = json!({
            "type": "final",
            "total_viewers": stream.total_viewers,
            "unique_viewers": unique_viewers,
            "peak_viewers": stream.peak_viewers,
            "average_watch_time": average_watch_time,
            "likes_count": stream.likes_count,
            "comments_count": stream.comments_count,
            "shares_count": stream.shares_count,
            "gifts_count": stream.gifts_count,
            "gifts_value": stream.gifts_value,
            "duration": stream.duration,
        });

        self.store
            .append_snapshot(stream.id, 0, stream.engagement_rate(), Some(data), Utc::now())
            .await
    }
}
