use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Notification type written by the pre-live job.
pub const NOTIFY_STREAM_STARTING: &str = "stream_starting_soon";

/// Deduplicating log of "stream starting soon" notices.
///
/// Uniqueness over (stream, user, type) makes the pre-live job idempotent:
/// re-running it enqueues nothing new.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub user_id: Uuid,
    pub notification_type: String,
    pub sent_at: DateTime<Utc>,
}
