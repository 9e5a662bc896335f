//! Durable store for streams, viewer sessions, snapshots, and notifications
//!
//! The relational store is the source of truth; the fast counter cache is
//! always reconstructible from the `stream_viewers` rows it holds. All
//! lifecycle transitions are status-guarded single statements so that
//! re-running a scheduler tick is a no-op for streams already past the
//! checkpoint.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Comment, Gift, NewStream, Notification, ReactionKind, Snapshot, Stream, StreamStatus,
    ViewerRecord,
};

pub use memory::MemoryStreamStore;
pub use postgres::PgStreamStore;

pub type SharedStreamStore = Arc<dyn StreamStore>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            other => StoreError::Database(other.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait StreamStore: Send + Sync {
    /// Create a stream. With `scheduled_at` the stream starts out
    /// `scheduled`; without it it is created `pre_live`, ready for `start`.
    async fn create_stream(&self, new: NewStream, now: DateTime<Utc>) -> StoreResult<Stream>;

    async fn get_stream(&self, id: Uuid) -> StoreResult<Option<Stream>>;

    /// Whether the owner already has a stream that has not ended.
    async fn has_active_stream(&self, owner_id: Uuid) -> StoreResult<bool>;

    async fn list_by_status(&self, status: StreamStatus) -> StoreResult<Vec<Stream>>;

    /// `scheduled` streams whose `scheduled_at` lies in `(from, to]`.
    async fn list_scheduled_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Stream>>;

    /// Guarded `scheduled -> pre_live`. Returns the updated stream, or
    /// `None` if the stream was not in `scheduled`.
    async fn mark_pre_live(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<Stream>>;

    /// Guarded `pre_live -> live`.
    async fn mark_live(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<Stream>>;

    /// Guarded `live -> ending`.
    async fn mark_ending(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<Stream>>;

    /// Guarded `ending -> ended`; sets `ended_at` and `duration`.
    async fn mark_ended(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        duration: i64,
    ) -> StoreResult<Option<Stream>>;

    async fn incr_total_viewers(&self, id: Uuid) -> StoreResult<()>;

    /// Raise `peak_viewers` to `candidate` if higher; returns the resulting
    /// peak either way.
    async fn raise_peak(&self, id: Uuid, candidate: i64) -> StoreResult<i64>;

    /// Persist a recounted `viewers_count`, raising the peak alongside it.
    async fn reconcile_viewer_counts(
        &self,
        id: Uuid,
        current: i64,
    ) -> StoreResult<Option<Stream>>;

    async fn set_unique_viewers(&self, id: Uuid, unique: i64) -> StoreResult<()>;

    async fn incr_likes(&self, id: Uuid) -> StoreResult<()>;

    async fn incr_shares(&self, id: Uuid) -> StoreResult<()>;

    async fn incr_reaction(&self, id: Uuid, kind: ReactionKind) -> StoreResult<()>;

    async fn add_comment(
        &self,
        stream_id: Uuid,
        user_id: Uuid,
        body: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Comment>;

    async fn add_gift(
        &self,
        stream_id: Uuid,
        user_id: Uuid,
        gift_type: &str,
        value: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Gift>;

    /// Open a viewing session unless the user already has one on this
    /// stream. Returns whether a new session row was created.
    async fn open_viewer(
        &self,
        stream_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Close the user's open session, computing `watch_duration`.
    async fn close_viewer(
        &self,
        stream_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<ViewerRecord>>;

    /// Force-close every open session at stream end. Returns how many.
    async fn close_all_viewers(&self, stream_id: Uuid, now: DateTime<Utc>) -> StoreResult<u64>;

    async fn count_watching(&self, stream_id: Uuid) -> StoreResult<i64>;

    async fn count_distinct_viewers(&self, stream_id: Uuid) -> StoreResult<i64>;

    async fn average_watch_duration(&self, stream_id: Uuid) -> StoreResult<f64>;

    async fn append_snapshot(
        &self,
        stream_id: Uuid,
        viewers_count: i64,
        engagement_rate: f64,
        data: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> StoreResult<Snapshot>;

    async fn list_snapshots(&self, stream_id: Uuid) -> StoreResult<Vec<Snapshot>>;

    /// Bulk-insert notification rows, skipping (stream, user, type)
    /// combinations already present. Returns how many were inserted.
    async fn insert_notifications(
        &self,
        stream_id: Uuid,
        user_ids: &[Uuid],
        notification_type: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;

    async fn list_notifications(&self, stream_id: Uuid) -> StoreResult<Vec<Notification>>;

    /// Subscribers who opted into live alerts for this broadcaster.
    async fn live_alert_subscribers(&self, broadcaster_id: Uuid) -> StoreResult<Vec<Uuid>>;
}
