//! Stream business logic
//!
//! Orchestrates the durable store, the viewer counters, and the broadcaster
//! for the REST surface. The externally-triggered transitions
//! (`pre_live -> live`, `live -> ending`) live here; the time-based ones
//! belong to the scheduler jobs. Engagement operations go through the same
//! counter and broadcast paths as the WebSocket gateway, so REST-based and
//! socket-based clients always see consistent counts.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::counter::ViewerCounterStore;
use crate::error::{AppError, AppResult};
use crate::models::{Comment, Gift, NewStream, ReactionKind, Snapshot, Stream, StreamStatus};
use crate::services::user_directory::SharedUserDirectory;
use crate::store::SharedStreamStore;
use crate::websocket::{ConnectionGateway, EventBroadcaster};

/// Aggregates returned by the analytics read endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StreamAnalytics {
    pub stream_id: Uuid,
    pub status: StreamStatus,
    pub total_viewers: i64,
    pub unique_viewers: i64,
    pub peak_viewers: i64,
    pub average_watch_time: f64,
    pub likes_count: i64,
    pub comments_count: i64,
    pub shares_count: i64,
    pub gifts_count: i64,
    pub gifts_value: i64,
    pub duration: i64,
    pub snapshots: Vec<Snapshot>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PresenceCounts {
    pub current_viewers: i64,
    pub peak_viewers: i64,
}

pub struct StreamService {
    store: SharedStreamStore,
    users: SharedUserDirectory,
    counters: ViewerCounterStore,
    broadcaster: EventBroadcaster,
    gateway: Arc<ConnectionGateway>,
}

impl StreamService {
    pub fn new(
        store: SharedStreamStore,
        users: SharedUserDirectory,
        counters: ViewerCounterStore,
        broadcaster: EventBroadcaster,
        gateway: Arc<ConnectionGateway>,
    ) -> Self {
        Self {
            store,
            users,
            counters,
            broadcaster,
            gateway,
        }
    }

    async fn require_user(&self, user_id: Uuid) -> AppResult<()> {
        match self.users.exists(user_id).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(AppError::BadRequest(format!("unknown user: {user_id}"))),
            Err(e) => Err(AppError::Database(e.to_string())),
        }
    }

    async fn require_stream(&self, stream_id: Uuid) -> AppResult<Stream> {
        self.store
            .get_stream(stream_id)
            .await?
            .ok_or(AppError::NotFound)
    }

    /// Stream that is currently accepting viewers and engagement.
    async fn require_joinable(&self, stream_id: Uuid) -> AppResult<Stream> {
        let stream = self.require_stream(stream_id).await?;
        if !stream.status.is_joinable() {
            return Err(AppError::Conflict(format!(
                "stream is not accepting viewers (status: {})",
                stream.status
            )));
        }
        Ok(stream)
    }

    /// Create a stream. With `scheduled_at` it waits for the pre-live job;
    /// without it it is created `pre_live`, ready for `start`.
    pub async fn create(
        &self,
        owner_id: Uuid,
        title: String,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> AppResult<Stream> {
        self.require_user(owner_id).await?;

        if let Some(at) = scheduled_at {
            if at <= Utc::now() {
                return Err(AppError::BadRequest(
                    "scheduled_at must be in the future".into(),
                ));
            }
        }

        if self.store.has_active_stream(owner_id).await? {
            return Err(AppError::Conflict(
                "broadcaster already has an active stream".into(),
            ));
        }

        let stream = self
            .store
            .create_stream(
                NewStream {
                    owner_id,
                    title,
                    scheduled_at,
                },
                Utc::now(),
            )
            .await?;

        Ok(stream)
    }

    /// Fetch a stream, overlaying the fast counters while it is joinable,
    /// since the stored row may lag the live count between reconciles.
    pub async fn details(&self, stream_id: Uuid) -> AppResult<Stream> {
        let mut stream = self.require_stream(stream_id).await?;

        if stream.status.is_joinable() {
            stream.viewers_count = self.counters.current(stream_id).await;
            stream.peak_viewers = stream
                .peak_viewers
                .max(self.counters.peak(stream_id).await);
        }

        Ok(stream)
    }

    pub async fn list_live(&self) -> AppResult<Vec<Stream>> {
        let mut streams = self.store.list_by_status(StreamStatus::Live).await?;
        for stream in &mut streams {
            stream.viewers_count = self.counters.current(stream.id).await;
        }
        Ok(streams)
    }

    /// Operator-triggered `pre_live -> live`.
    pub async fn start(&self, stream_id: Uuid, caller: Uuid) -> AppResult<Stream> {
        let stream = self.require_stream(stream_id).await?;
        if stream.owner_id != caller {
            return Err(AppError::Forbidden(
                "only the broadcaster can start the stream".into(),
            ));
        }

        let Some(updated) = self.store.mark_live(stream_id, Utc::now()).await? else {
            return Err(AppError::Conflict(format!(
                "stream cannot start from status {}",
                stream.status
            )));
        };

        self.broadcaster
            .status_changed(stream_id, StreamStatus::PreLive, StreamStatus::Live)
            .await;
        Ok(updated)
    }

    /// Operator-triggered `live -> ending`. Finalization is the scheduler's
    /// job once the grace window has passed.
    pub async fn end(&self, stream_id: Uuid, caller: Uuid) -> AppResult<Stream> {
        let stream = self.require_stream(stream_id).await?;
        if stream.owner_id != caller {
            return Err(AppError::Forbidden(
                "only the broadcaster can end the stream".into(),
            ));
        }

        let Some(updated) = self.store.mark_ending(stream_id, Utc::now()).await? else {
            return Err(AppError::Conflict(format!(
                "stream cannot end from status {}",
                stream.status
            )));
        };

        self.broadcaster
            .status_changed(stream_id, StreamStatus::Live, StreamStatus::Ending)
            .await;
        Ok(updated)
    }

    /// REST join: same presence path as a WebSocket connect.
    pub async fn join(&self, stream_id: Uuid, user_id: Uuid) -> AppResult<PresenceCounts> {
        self.require_joinable(stream_id).await?;
        self.require_user(user_id).await?;

        let (current, peak) = self
            .gateway
            .register_presence(stream_id, Some(user_id))
            .await;
        Ok(PresenceCounts {
            current_viewers: current,
            peak_viewers: peak,
        })
    }

    /// REST leave: same presence path as a WebSocket disconnect.
    pub async fn leave(&self, stream_id: Uuid, user_id: Uuid) -> AppResult<PresenceCounts> {
        self.require_stream(stream_id).await?;
        self.require_user(user_id).await?;

        let current = self.gateway.release_presence(stream_id, Some(user_id)).await;
        let peak = self.counters.peak(stream_id).await;
        Ok(PresenceCounts {
            current_viewers: current,
            peak_viewers: peak,
        })
    }

    pub async fn comment(&self, stream_id: Uuid, user_id: Uuid, body: String) -> AppResult<Comment> {
        self.require_joinable(stream_id).await?;
        self.require_user(user_id).await?;

        let comment = self
            .store
            .add_comment(stream_id, user_id, &body, Utc::now())
            .await?;
        self.broadcaster.new_comment(&comment).await;
        Ok(comment)
    }

    pub async fn gift(
        &self,
        stream_id: Uuid,
        user_id: Uuid,
        gift_type: String,
        value: i64,
    ) -> AppResult<Gift> {
        self.require_joinable(stream_id).await?;
        self.require_user(user_id).await?;
        if value < 0 {
            return Err(AppError::BadRequest("gift value cannot be negative".into()));
        }

        let gift = self
            .store
            .add_gift(stream_id, user_id, &gift_type, value, Utc::now())
            .await?;
        self.broadcaster
            .gift_sent(stream_id, user_id, &gift.gift_type, gift.value)
            .await;
        Ok(gift)
    }

    pub async fn like(&self, stream_id: Uuid, user_id: Uuid) -> AppResult<()> {
        self.require_joinable(stream_id).await?;
        self.require_user(user_id).await?;
        self.store.incr_likes(stream_id).await?;
        Ok(())
    }

    pub async fn share(&self, stream_id: Uuid, user_id: Uuid) -> AppResult<()> {
        self.require_joinable(stream_id).await?;
        self.require_user(user_id).await?;
        self.store.incr_shares(stream_id).await?;
        Ok(())
    }

    /// REST reaction: unlike the WebSocket path, an unlisted kind is a
    /// synchronous rejection rather than a silent drop.
    pub async fn reaction(
        &self,
        stream_id: Uuid,
        user_id: Uuid,
        reaction_type: &str,
    ) -> AppResult<ReactionKind> {
        self.require_joinable(stream_id).await?;
        self.require_user(user_id).await?;

        let kind = reaction_type
            .parse::<ReactionKind>()
            .map_err(|_| AppError::BadRequest(format!("invalid reaction kind: {reaction_type}")))?;

        self.gateway
            .record_reaction(stream_id, Some(user_id), kind)
            .await;
        Ok(kind)
    }

    pub async fn analytics(&self, stream_id: Uuid) -> AppResult<StreamAnalytics> {
        let stream = self.require_stream(stream_id).await?;
        let average_watch_time = self.store.average_watch_duration(stream_id).await?;
        let snapshots = self.store.list_snapshots(stream_id).await?;

        Ok(StreamAnalytics {
            stream_id,
            status: stream.status,
            total_viewers: stream.total_viewers,
            unique_viewers: stream.unique_viewers,
            peak_viewers: stream.peak_viewers,
            average_watch_time,
            likes_count: stream.likes_count,
            comments_count: stream.comments_count,
            shares_count: stream.shares_count,
            gifts_count: stream.gifts_count,
            gifts_value: stream.gifts_value,
            duration: stream.duration,
            snapshots,
        })
    }
}
