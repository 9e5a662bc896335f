//! PostgreSQL-backed `StreamStore`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use uuid::Uuid;

use super::{StoreError, StoreResult, StreamStore};
use crate::models::{
    Comment, Gift, NewStream, Notification, ReactionKind, Snapshot, Stream, StreamStatus,
    ViewerRecord,
};

#[derive(Clone)]
pub struct PgStreamStore {
    pool: PgPool,
}

impl PgStreamStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct StreamRow {
    id: Uuid,
    owner_id: Uuid,
    title: String,
    status: String,
    scheduled_at: Option<DateTime<Utc>>,
    pre_live_started_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    duration: i64,
    viewers_count: i64,
    peak_viewers: i64,
    total_viewers: i64,
    unique_viewers: i64,
    likes_count: i64,
    comments_count: i64,
    shares_count: i64,
    gifts_count: i64,
    gifts_value: i64,
    reaction_counts: Json<HashMap<String, i64>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<StreamRow> for Stream {
    type Error = StoreError;

    fn try_from(row: StreamRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<StreamStatus>()
            .map_err(StoreError::Database)?;
        Ok(Stream {
            id: row.id,
            owner_id: row.owner_id,
            title: row.title,
            status,
            scheduled_at: row.scheduled_at,
            pre_live_started_at: row.pre_live_started_at,
            started_at: row.started_at,
            ended_at: row.ended_at,
            duration: row.duration,
            viewers_count: row.viewers_count,
            peak_viewers: row.peak_viewers,
            total_viewers: row.total_viewers,
            unique_viewers: row.unique_viewers,
            likes_count: row.likes_count,
            comments_count: row.comments_count,
            shares_count: row.shares_count,
            gifts_count: row.gifts_count,
            gifts_value: row.gifts_value,
            reaction_counts: row.reaction_counts.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ViewerRow {
    id: Uuid,
    stream_id: Uuid,
    user_id: Uuid,
    joined_at: DateTime<Utc>,
    left_at: Option<DateTime<Utc>>,
    watch_duration: i64,
    is_currently_watching: bool,
}

impl From<ViewerRow> for ViewerRecord {
    fn from(row: ViewerRow) -> Self {
        ViewerRecord {
            id: row.id,
            stream_id: row.stream_id,
            user_id: row.user_id,
            joined_at: row.joined_at,
            left_at: row.left_at,
            watch_duration: row.watch_duration,
            is_currently_watching: row.is_currently_watching,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    id: Uuid,
    stream_id: Uuid,
    viewers_count: i64,
    engagement_rate: f64,
    data: Option<Json<serde_json::Value>>,
    created_at: DateTime<Utc>,
}

impl From<SnapshotRow> for Snapshot {
    fn from(row: SnapshotRow) -> Self {
        Snapshot {
            id: row.id,
            stream_id: row.stream_id,
            viewers_count: row.viewers_count,
            engagement_rate: row.engagement_rate,
            data: row.data.map(|d| d.0),
            created_at: row.created_at,
        }
    }
}

fn rows_to_streams(rows: Vec<StreamRow>) -> StoreResult<Vec<Stream>> {
    rows.into_iter().map(Stream::try_from).collect()
}

#[async_trait]
impl StreamStore for PgStreamStore {
    async fn create_stream(&self, new: NewStream, now: DateTime<Utc>) -> StoreResult<Stream> {
        let (status, pre_live_started_at) = match new.scheduled_at {
            Some(_) => (StreamStatus::Scheduled, None),
            None => (StreamStatus::PreLive, Some(now)),
        };

        let row = sqlx::query_as::<_, StreamRow>(
            r#"
            INSERT INTO streams (id, owner_id, title, status, scheduled_at,
                                 pre_live_started_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.owner_id)
        .bind(&new.title)
        .bind(status.as_str())
        .bind(new.scheduled_at)
        .bind(pre_live_started_at)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn get_stream(&self, id: Uuid) -> StoreResult<Option<Stream>> {
        let row = sqlx::query_as::<_, StreamRow>("SELECT * FROM streams WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Stream::try_from).transpose()
    }

    async fn has_active_stream(&self, owner_id: Uuid) -> StoreResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM streams WHERE owner_id = $1 AND status <> 'ended')",
        )
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn list_by_status(&self, status: StreamStatus) -> StoreResult<Vec<Stream>> {
        let rows = sqlx::query_as::<_, StreamRow>(
            "SELECT * FROM streams WHERE status = $1 ORDER BY created_at",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows_to_streams(rows)
    }

    async fn list_scheduled_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Stream>> {
        let rows = sqlx::query_as::<_, StreamRow>(
            r#"
            SELECT * FROM streams
            WHERE status = 'scheduled' AND scheduled_at > $1 AND scheduled_at <= $2
            ORDER BY scheduled_at
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        rows_to_streams(rows)
    }

    async fn mark_pre_live(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<Stream>> {
        let row = sqlx::query_as::<_, StreamRow>(
            r#"
            UPDATE streams
            SET status = 'pre_live', pre_live_started_at = $2, updated_at = $2
            WHERE id = $1 AND status = 'scheduled'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Stream::try_from).transpose()
    }

    async fn mark_live(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<Stream>> {
        let row = sqlx::query_as::<_, StreamRow>(
            r#"
            UPDATE streams
            SET status = 'live', started_at = $2, updated_at = $2
            WHERE id = $1 AND status = 'pre_live'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Stream::try_from).transpose()
    }

    async fn mark_ending(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<Stream>> {
        let row = sqlx::query_as::<_, StreamRow>(
            r#"
            UPDATE streams
            SET status = 'ending', updated_at = $2
            WHERE id = $1 AND status = 'live'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Stream::try_from).transpose()
    }

    async fn mark_ended(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        duration: i64,
    ) -> StoreResult<Option<Stream>> {
        let row = sqlx::query_as::<_, StreamRow>(
            r#"
            UPDATE streams
            SET status = 'ended', ended_at = $2, duration = $3, updated_at = $2
            WHERE id = $1 AND status = 'ending'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(duration)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Stream::try_from).transpose()
    }

    async fn incr_total_viewers(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query(
            "UPDATE streams SET total_viewers = total_viewers + 1, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn raise_peak(&self, id: Uuid, candidate: i64) -> StoreResult<i64> {
        let peak = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE streams
            SET peak_viewers = GREATEST(peak_viewers, $2), updated_at = NOW()
            WHERE id = $1
            RETURNING peak_viewers
            "#,
        )
        .bind(id)
        .bind(candidate)
        .fetch_optional(&self.pool)
        .await?;

        peak.ok_or(StoreError::NotFound)
    }

    async fn reconcile_viewer_counts(
        &self,
        id: Uuid,
        current: i64,
    ) -> StoreResult<Option<Stream>> {
        let row = sqlx::query_as::<_, StreamRow>(
            r#"
            UPDATE streams
            SET viewers_count = $2, peak_viewers = GREATEST(peak_viewers, $2), updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(current)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Stream::try_from).transpose()
    }

    async fn set_unique_viewers(&self, id: Uuid, unique: i64) -> StoreResult<()> {
        sqlx::query("UPDATE streams SET unique_viewers = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(unique)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn incr_likes(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query(
            "UPDATE streams SET likes_count = likes_count + 1, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn incr_shares(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query(
            "UPDATE streams SET shares_count = shares_count + 1, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn incr_reaction(&self, id: Uuid, kind: ReactionKind) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE streams
            SET reaction_counts = jsonb_set(
                    COALESCE(reaction_counts, '{}'::jsonb),
                    ARRAY[$2],
                    TO_JSONB(COALESCE((reaction_counts ->> $2)::BIGINT, 0) + 1)
                ),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(kind.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn add_comment(
        &self,
        stream_id: Uuid,
        user_id: Uuid,
        body: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Comment> {
        let mut tx = self.pool.begin().await?;

        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO stream_comments (id, stream_id, user_id, body, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(id)
        .bind(stream_id)
        .bind(user_id)
        .bind(body)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE streams SET comments_count = comments_count + 1, updated_at = $2 WHERE id = $1",
        )
        .bind(stream_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Comment {
            id,
            stream_id,
            user_id,
            body: body.to_string(),
            created_at: now,
        })
    }

    async fn add_gift(
        &self,
        stream_id: Uuid,
        user_id: Uuid,
        gift_type: &str,
        value: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Gift> {
        let mut tx = self.pool.begin().await?;

        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO stream_gifts (id, stream_id, user_id, gift_type, value, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(id)
        .bind(stream_id)
        .bind(user_id)
        .bind(gift_type)
        .bind(value)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE streams
            SET gifts_count = gifts_count + 1, gifts_value = gifts_value + $2, updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(stream_id)
        .bind(value)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Gift {
            id,
            stream_id,
            user_id,
            gift_type: gift_type.to_string(),
            value,
            created_at: now,
        })
    }

    async fn open_viewer(
        &self,
        stream_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        // The partial unique index on open sessions turns a concurrent
        // double-connect into a no-op insert.
        let result = sqlx::query(
            r#"
            INSERT INTO stream_viewers (id, stream_id, user_id, joined_at,
                                        watch_duration, is_currently_watching)
            SELECT $1, $2, $3, $4, 0, TRUE
            WHERE NOT EXISTS (
                SELECT 1 FROM stream_viewers
                WHERE stream_id = $2 AND user_id = $3 AND is_currently_watching
            )
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(stream_id)
        .bind(user_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn close_viewer(
        &self,
        stream_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<ViewerRecord>> {
        let row = sqlx::query_as::<_, ViewerRow>(
            r#"
            UPDATE stream_viewers
            SET left_at = $3,
                watch_duration = GREATEST(0, EXTRACT(EPOCH FROM ($3 - joined_at))::BIGINT),
                is_currently_watching = FALSE
            WHERE stream_id = $1 AND user_id = $2 AND is_currently_watching
            RETURNING *
            "#,
        )
        .bind(stream_id)
        .bind(user_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ViewerRecord::from))
    }

    async fn close_all_viewers(&self, stream_id: Uuid, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE stream_viewers
            SET left_at = $2,
                watch_duration = GREATEST(0, EXTRACT(EPOCH FROM ($2 - joined_at))::BIGINT),
                is_currently_watching = FALSE
            WHERE stream_id = $1 AND is_currently_watching
            "#,
        )
        .bind(stream_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn count_watching(&self, stream_id: Uuid) -> StoreResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM stream_viewers WHERE stream_id = $1 AND is_currently_watching",
        )
        .bind(stream_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn count_distinct_viewers(&self, stream_id: Uuid) -> StoreResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(DISTINCT user_id) FROM stream_viewers WHERE stream_id = $1",
        )
        .bind(stream_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn average_watch_duration(&self, stream_id: Uuid) -> StoreResult<f64> {
        let avg = sqlx::query_scalar::<_, f64>(
            r#"
            SELECT COALESCE(AVG(watch_duration), 0)::DOUBLE PRECISION
            FROM stream_viewers WHERE stream_id = $1
            "#,
        )
        .bind(stream_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(avg)
    }

    async fn append_snapshot(
        &self,
        stream_id: Uuid,
        viewers_count: i64,
        engagement_rate: f64,
        data: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> StoreResult<Snapshot> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO stream_snapshots (id, stream_id, viewers_count,
                                          engagement_rate, data, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(id)
        .bind(stream_id)
        .bind(viewers_count)
        .bind(engagement_rate)
        .bind(data.clone().map(Json))
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Snapshot {
            id,
            stream_id,
            viewers_count,
            engagement_rate,
            data,
            created_at: now,
        })
    }

    async fn list_snapshots(&self, stream_id: Uuid) -> StoreResult<Vec<Snapshot>> {
        let rows = sqlx::query_as::<_, SnapshotRow>(
            "SELECT * FROM stream_snapshots WHERE stream_id = $1 ORDER BY created_at",
        )
        .bind(stream_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Snapshot::from).collect())
    }

    async fn insert_notifications(
        &self,
        stream_id: Uuid,
        user_ids: &[Uuid],
        notification_type: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        if user_ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            INSERT INTO stream_notifications (id, stream_id, user_id, notification_type, sent_at)
            SELECT gen_random_uuid(), $1, u, $2, $3
            FROM UNNEST($4::uuid[]) AS u
            ON CONFLICT (stream_id, user_id, notification_type) DO NOTHING
            "#,
        )
        .bind(stream_id)
        .bind(notification_type)
        .bind(now)
        .bind(user_ids)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn list_notifications(&self, stream_id: Uuid) -> StoreResult<Vec<Notification>> {
        let rows = sqlx::query(
            r#"
            SELECT id, stream_id, user_id, notification_type, sent_at
            FROM stream_notifications WHERE stream_id = $1 ORDER BY sent_at
            "#,
        )
        .bind(stream_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Notification {
                id: row.get("id"),
                stream_id: row.get("stream_id"),
                user_id: row.get("user_id"),
                notification_type: row.get("notification_type"),
                sent_at: row.get("sent_at"),
            })
            .collect())
    }

    async fn live_alert_subscribers(&self, broadcaster_id: Uuid) -> StoreResult<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT subscriber_id FROM live_alert_subscriptions
            WHERE broadcaster_id = $1 AND live_alerts
            "#,
        )
        .bind(broadcaster_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }
}
