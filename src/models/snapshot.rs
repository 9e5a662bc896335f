use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Append-only analytics sample. Never mutated once written.
///
/// Periodic samples carry no `data`; the single end-of-stream summary row
/// carries `data.type = "final"` with the full totals payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub viewers_count: i64,
    pub engagement_rate: f64,
    pub data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}
