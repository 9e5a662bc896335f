use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One viewing session of a user on a stream.
///
/// A (stream, user) pair may have many historical rows, one per session, but
/// at most one with `is_currently_watching = true` and `left_at = NULL`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewerRecord {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub user_id: Uuid,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
    /// Seconds watched, computed when the session closes.
    pub watch_duration: i64,
    pub is_currently_watching: bool,
}
