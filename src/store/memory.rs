//! In-memory `StreamStore` used by tests and Redis-less local runs
//!
//! Mirrors the Postgres implementation's semantics, including the
//! status-guarded transitions and the single-open-session rule.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{StoreError, StoreResult, StreamStore};
use crate::models::{
    Comment, Gift, NewStream, Notification, ReactionKind, Snapshot, Stream, StreamStatus,
    ViewerRecord,
};

#[derive(Default)]
struct Inner {
    streams: HashMap<Uuid, Stream>,
    viewers: Vec<ViewerRecord>,
    comments: Vec<Comment>,
    gifts: Vec<Gift>,
    snapshots: Vec<Snapshot>,
    notifications: Vec<Notification>,
    /// (subscriber, broadcaster) pairs with live alerts on.
    subscriptions: Vec<(Uuid, Uuid)>,
}

#[derive(Default)]
pub struct MemoryStreamStore {
    inner: Mutex<Inner>,
}

impl MemoryStreamStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a live-alert subscription for the pre-live job to pick up.
    pub async fn subscribe_live_alerts(&self, subscriber_id: Uuid, broadcaster_id: Uuid) {
        let mut guard = self.inner.lock().await;
        if !guard
            .subscriptions
            .iter()
            .any(|(s, b)| *s == subscriber_id && *b == broadcaster_id)
        {
            guard.subscriptions.push((subscriber_id, broadcaster_id));
        }
    }

    /// Backdate a stream's `updated_at`, e.g. to age an `ending` stream
    /// past the finalization grace window.
    pub async fn backdate_updated_at(&self, id: Uuid, at: DateTime<Utc>) {
        let mut guard = self.inner.lock().await;
        if let Some(stream) = guard.streams.get_mut(&id) {
            stream.updated_at = at;
        }
    }

    /// All session rows for a stream, open and closed.
    pub async fn sessions_for(&self, stream_id: Uuid) -> Vec<ViewerRecord> {
        let guard = self.inner.lock().await;
        guard
            .viewers
            .iter()
            .filter(|v| v.stream_id == stream_id)
            .cloned()
            .collect()
    }
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_seconds().max(0)
}

#[async_trait]
impl StreamStore for MemoryStreamStore {
    async fn create_stream(&self, new: NewStream, now: DateTime<Utc>) -> StoreResult<Stream> {
        let (status, pre_live_started_at) = match new.scheduled_at {
            Some(_) => (StreamStatus::Scheduled, None),
            None => (StreamStatus::PreLive, Some(now)),
        };

        let stream = Stream {
            id: Uuid::new_v4(),
            owner_id: new.owner_id,
            title: new.title,
            status,
            scheduled_at: new.scheduled_at,
            pre_live_started_at,
            started_at: None,
            ended_at: None,
            duration: 0,
            viewers_count: 0,
            peak_viewers: 0,
            total_viewers: 0,
            unique_viewers: 0,
            likes_count: 0,
            comments_count: 0,
            shares_count: 0,
            gifts_count: 0,
            gifts_value: 0,
            reaction_counts: HashMap::new(),
            created_at: now,
            updated_at: now,
        };

        let mut guard = self.inner.lock().await;
        guard.streams.insert(stream.id, stream.clone());
        Ok(stream)
    }

    async fn get_stream(&self, id: Uuid) -> StoreResult<Option<Stream>> {
        let guard = self.inner.lock().await;
        Ok(guard.streams.get(&id).cloned())
    }

    async fn has_active_stream(&self, owner_id: Uuid) -> StoreResult<bool> {
        let guard = self.inner.lock().await;
        Ok(guard
            .streams
            .values()
            .any(|s| s.owner_id == owner_id && s.status != StreamStatus::Ended))
    }

    async fn list_by_status(&self, status: StreamStatus) -> StoreResult<Vec<Stream>> {
        let guard = self.inner.lock().await;
        let mut streams: Vec<Stream> = guard
            .streams
            .values()
            .filter(|s| s.status == status)
            .cloned()
            .collect();
        streams.sort_by_key(|s| s.created_at);
        Ok(streams)
    }

    async fn list_scheduled_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Stream>> {
        let guard = self.inner.lock().await;
        let mut streams: Vec<Stream> = guard
            .streams
            .values()
            .filter(|s| {
                s.status == StreamStatus::Scheduled
                    && s.scheduled_at.map_or(false, |at| at > from && at <= to)
            })
            .cloned()
            .collect();
        streams.sort_by_key(|s| s.scheduled_at);
        Ok(streams)
    }

    async fn mark_pre_live(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<Stream>> {
        let mut guard = self.inner.lock().await;
        let Some(stream) = guard.streams.get_mut(&id) else {
            return Ok(None);
        };
        if stream.status != StreamStatus::Scheduled {
            return Ok(None);
        }
        stream.status = StreamStatus::PreLive;
        stream.pre_live_started_at = Some(now);
        stream.updated_at = now;
        Ok(Some(stream.clone()))
    }

    async fn mark_live(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<Stream>> {
        let mut guard = self.inner.lock().await;
        let Some(stream) = guard.streams.get_mut(&id) else {
            return Ok(None);
        };
        if stream.status != StreamStatus::PreLive {
            return Ok(None);
        }
        stream.status = StreamStatus::Live;
        stream.started_at = Some(now);
        stream.updated_at = now;
        Ok(Some(stream.clone()))
    }

    async fn mark_ending(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<Stream>> {
        let mut guard = self.inner.lock().await;
        let Some(stream) = guard.streams.get_mut(&id) else {
            return Ok(None);
        };
        if stream.status != StreamStatus::Live {
            return Ok(None);
        }
        stream.status = StreamStatus::Ending;
        stream.updated_at = now;
        Ok(Some(stream.clone()))
    }

    async fn mark_ended(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        duration: i64,
    ) -> StoreResult<Option<Stream>> {
        let mut guard = self.inner.lock().await;
        let Some(stream) = guard.streams.get_mut(&id) else {
            return Ok(None);
        };
        if stream.status != StreamStatus::Ending {
            return Ok(None);
        }
        stream.status = StreamStatus::Ended;
        stream.ended_at = Some(now);
        stream.duration = duration;
        stream.updated_at = now;
        Ok(Some(stream.clone()))
    }

    async fn incr_total_viewers(&self, id: Uuid) -> StoreResult<()> {
        let mut guard = self.inner.lock().await;
        let stream = guard.streams.get_mut(&id).ok_or(StoreError::NotFound)?;
        stream.total_viewers += 1;
        stream.updated_at = Utc::now();
        Ok(())
    }

    async fn raise_peak(&self, id: Uuid, candidate: i64) -> StoreResult<i64> {
        let mut guard = self.inner.lock().await;
        let stream = guard.streams.get_mut(&id).ok_or(StoreError::NotFound)?;
        if candidate > stream.peak_viewers {
            stream.peak_viewers = candidate;
        }
        stream.updated_at = Utc::now();
        Ok(stream.peak_viewers)
    }

    async fn reconcile_viewer_counts(
        &self,
        id: Uuid,
        current: i64,
    ) -> StoreResult<Option<Stream>> {
        let mut guard = self.inner.lock().await;
        let Some(stream) = guard.streams.get_mut(&id) else {
            return Ok(None);
        };
        stream.viewers_count = current;
        stream.peak_viewers = stream.peak_viewers.max(current);
        stream.updated_at = Utc::now();
        Ok(Some(stream.clone()))
    }

    async fn set_unique_viewers(&self, id: Uuid, unique: i64) -> StoreResult<()> {
        let mut guard = self.inner.lock().await;
        let stream = guard.streams.get_mut(&id).ok_or(StoreError::NotFound)?;
        stream.unique_viewers = unique;
        stream.updated_at = Utc::now();
        Ok(())
    }

    async fn incr_likes(&self, id: Uuid) -> StoreResult<()> {
        let mut guard = self.inner.lock().await;
        let stream = guard.streams.get_mut(&id).ok_or(StoreError::NotFound)?;
        stream.likes_count += 1;
        stream.updated_at = Utc::now();
        Ok(())
    }

    async fn incr_shares(&self, id: Uuid) -> StoreResult<()> {
        let mut guard = self.inner.lock().await;
        let stream = guard.streams.get_mut(&id).ok_or(StoreError::NotFound)?;
        stream.shares_count += 1;
        stream.updated_at = Utc::now();
        Ok(())
    }

    async fn incr_reaction(&self, id: Uuid, kind: ReactionKind) -> StoreResult<()> {
        let mut guard = self.inner.lock().await;
        let stream = guard.streams.get_mut(&id).ok_or(StoreError::NotFound)?;
        *stream
            .reaction_counts
            .entry(kind.as_str().to_string())
            .or_insert(0) += 1;
        stream.updated_at = Utc::now();
        Ok(())
    }

    async fn add_comment(
        &self,
        stream_id: Uuid,
        user_id: Uuid,
        body: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Comment> {
        let mut guard = self.inner.lock().await;
        let stream = guard
            .streams
            .get_mut(&stream_id)
            .ok_or(StoreError::NotFound)?;
        stream.comments_count += 1;
        stream.updated_at = now;

        let comment = Comment {
            id: Uuid::new_v4(),
            stream_id,
            user_id,
            body: body.to_string(),
            created_at: now,
        };
        guard.comments.push(comment.clone());
        Ok(comment)
    }

    async fn add_gift(
        &self,
        stream_id: Uuid,
        user_id: Uuid,
        gift_type: &str,
        value: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Gift> {
        let mut guard = self.inner.lock().await;
        let stream = guard
            .streams
            .get_mut(&stream_id)
            .ok_or(StoreError::NotFound)?;
        stream.gifts_count += 1;
        stream.gifts_value += value;
        stream.updated_at = now;

        let gift = Gift {
            id: Uuid::new_v4(),
            stream_id,
            user_id,
            gift_type: gift_type.to_string(),
            value,
            created_at: now,
        };
        guard.gifts.push(gift.clone());
        Ok(gift)
    }

    async fn open_viewer(
        &self,
        stream_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut guard = self.inner.lock().await;
        let already_open = guard
            .viewers
            .iter()
            .any(|v| v.stream_id == stream_id && v.user_id == user_id && v.is_currently_watching);
        if already_open {
            return Ok(false);
        }

        guard.viewers.push(ViewerRecord {
            id: Uuid::new_v4(),
            stream_id,
            user_id,
            joined_at: now,
            left_at: None,
            watch_duration: 0,
            is_currently_watching: true,
        });
        Ok(true)
    }

    async fn close_viewer(
        &self,
        stream_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<ViewerRecord>> {
        let mut guard = self.inner.lock().await;
        let Some(viewer) = guard
            .viewers
            .iter_mut()
            .find(|v| v.stream_id == stream_id && v.user_id == user_id && v.is_currently_watching)
        else {
            return Ok(None);
        };

        viewer.left_at = Some(now);
        viewer.watch_duration = seconds_between(viewer.joined_at, now);
        viewer.is_currently_watching = false;
        Ok(Some(viewer.clone()))
    }

    async fn close_all_viewers(&self, stream_id: Uuid, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut guard = self.inner.lock().await;
        let mut closed = 0;
        for viewer in guard
            .viewers
            .iter_mut()
            .filter(|v| v.stream_id == stream_id && v.is_currently_watching)
        {
            viewer.left_at = Some(now);
            viewer.watch_duration = seconds_between(viewer.joined_at, now);
            viewer.is_currently_watching = false;
            closed += 1;
        }
        Ok(closed)
    }

    async fn count_watching(&self, stream_id: Uuid) -> StoreResult<i64> {
        let guard = self.inner.lock().await;
        Ok(guard
            .viewers
            .iter()
            .filter(|v| v.stream_id == stream_id && v.is_currently_watching)
            .count() as i64)
    }

    async fn count_distinct_viewers(&self, stream_id: Uuid) -> StoreResult<i64> {
        let guard = self.inner.lock().await;
        let mut users: Vec<Uuid> = guard
            .viewers
            .iter()
            .filter(|v| v.stream_id == stream_id)
            .map(|v| v.user_id)
            .collect();
        users.sort();
        users.dedup();
        Ok(users.len() as i64)
    }

    async fn average_watch_duration(&self, stream_id: Uuid) -> StoreResult<f64> {
        let guard = self.inner.lock().await;
        let durations: Vec<i64> = guard
            .viewers
            .iter()
            .filter(|v| v.stream_id == stream_id)
            .map(|v| v.watch_duration)
            .collect();
        if durations.is_empty() {
            return Ok(0.0);
        }
        Ok(durations.iter().sum::<i64>() as f64 / durations.len() as f64)
    }

    async fn append_snapshot(
        &self,
        stream_id: Uuid,
        viewers_count: i64,
        engagement_rate: f64,
        data: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> StoreResult<Snapshot> {
        let snapshot = Snapshot {
            id: Uuid::new_v4(),
            stream_id,
            viewers_count,
            engagement_rate,
            data,
            created_at: now,
        };
        let mut guard = self.inner.lock().await;
        guard.snapshots.push(snapshot.clone());
        Ok(snapshot)
    }

    async fn list_snapshots(&self, stream_id: Uuid) -> StoreResult<Vec<Snapshot>> {
        let guard = self.inner.lock().await;
        Ok(guard
            .snapshots
            .iter()
            .filter(|s| s.stream_id == stream_id)
            .cloned()
            .collect())
    }

    async fn insert_notifications(
        &self,
        stream_id: Uuid,
        user_ids: &[Uuid],
        notification_type: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut guard = self.inner.lock().await;
        let mut inserted = 0;
        for user_id in user_ids {
            let duplicate = guard.notifications.iter().any(|n| {
                n.stream_id == stream_id
                    && n.user_id == *user_id
                    && n.notification_type == notification_type
            });
            if duplicate {
                continue;
            }
            guard.notifications.push(Notification {
                id: Uuid::new_v4(),
                stream_id,
                user_id: *user_id,
                notification_type: notification_type.to_string(),
                sent_at: now,
            });
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn list_notifications(&self, stream_id: Uuid) -> StoreResult<Vec<Notification>> {
        let guard = self.inner.lock().await;
        Ok(guard
            .notifications
            .iter()
            .filter(|n| n.stream_id == stream_id)
            .cloned()
            .collect())
    }

    async fn live_alert_subscribers(&self, broadcaster_id: Uuid) -> StoreResult<Vec<Uuid>> {
        let guard = self.inner.lock().await;
        Ok(guard
            .subscriptions
            .iter()
            .filter(|(_, b)| *b == broadcaster_id)
            .map(|(s, _)| *s)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_stream(owner: Uuid) -> NewStream {
        NewStream {
            owner_id: owner,
            title: "memory test".into(),
            scheduled_at: None,
        }
    }

    #[tokio::test]
    async fn at_most_one_open_session_per_user() {
        let store = MemoryStreamStore::new();
        let stream = store
            .create_stream(new_stream(Uuid::new_v4()), Utc::now())
            .await
            .unwrap();
        let user = Uuid::new_v4();

        assert!(store.open_viewer(stream.id, user, Utc::now()).await.unwrap());
        assert!(!store.open_viewer(stream.id, user, Utc::now()).await.unwrap());
        assert_eq!(store.count_watching(stream.id).await.unwrap(), 1);

        let closed = store
            .close_viewer(stream.id, user, Utc::now())
            .await
            .unwrap()
            .expect("open session");
        assert!(!closed.is_currently_watching);
        assert!(closed.left_at.is_some());

        // A fresh session opens a second historical row.
        assert!(store.open_viewer(stream.id, user, Utc::now()).await.unwrap());
        assert_eq!(store.count_distinct_viewers(stream.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn transitions_are_status_guarded() {
        let store = MemoryStreamStore::new();
        let owner = Uuid::new_v4();
        let stream = store
            .create_stream(
                NewStream {
                    owner_id: owner,
                    title: "guarded".into(),
                    scheduled_at: Some(Utc::now() + chrono::Duration::minutes(10)),
                },
                Utc::now(),
            )
            .await
            .unwrap();

        // live before pre_live is refused
        assert!(store.mark_live(stream.id, Utc::now()).await.unwrap().is_none());

        assert!(store
            .mark_pre_live(stream.id, Utc::now())
            .await
            .unwrap()
            .is_some());
        // second pre_live is a no-op
        assert!(store
            .mark_pre_live(stream.id, Utc::now())
            .await
            .unwrap()
            .is_none());

        assert!(store.mark_live(stream.id, Utc::now()).await.unwrap().is_some());
        assert!(store.mark_ending(stream.id, Utc::now()).await.unwrap().is_some());
        let ended = store
            .mark_ended(stream.id, Utc::now(), 42)
            .await
            .unwrap()
            .expect("finalize");
        assert_eq!(ended.status, StreamStatus::Ended);
        assert_eq!(ended.duration, 42);
        // already ended: guarded no-op
        assert!(store.mark_ended(stream.id, Utc::now(), 99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn notification_inserts_deduplicate() {
        let store = MemoryStreamStore::new();
        let stream = store
            .create_stream(new_stream(Uuid::new_v4()), Utc::now())
            .await
            .unwrap();
        let users = vec![Uuid::new_v4(), Uuid::new_v4()];

        let first = store
            .insert_notifications(stream.id, &users, "stream_starting_soon", Utc::now())
            .await
            .unwrap();
        assert_eq!(first, 2);

        let second = store
            .insert_notifications(stream.id, &users, "stream_starting_soon", Utc::now())
            .await
            .unwrap();
        assert_eq!(second, 0);
    }
}
