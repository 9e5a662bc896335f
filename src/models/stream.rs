use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle status of a stream.
///
/// Transitions are strictly forward:
/// `scheduled -> pre_live -> live -> ending -> ended`.
/// `pre_live -> live` and `live -> ending` are API-triggered; the other two
/// are time-based and driven by the scheduler jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    Scheduled,
    PreLive,
    Live,
    Ending,
    Ended,
}

impl StreamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamStatus::Scheduled => "scheduled",
            StreamStatus::PreLive => "pre_live",
            StreamStatus::Live => "live",
            StreamStatus::Ending => "ending",
            StreamStatus::Ended => "ended",
        }
    }

    /// Whether viewers may connect in this state.
    pub fn is_joinable(&self) -> bool {
        matches!(self, StreamStatus::PreLive | StreamStatus::Live)
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(StreamStatus::Scheduled),
            "pre_live" => Ok(StreamStatus::PreLive),
            "live" => Ok(StreamStatus::Live),
            "ending" => Ok(StreamStatus::Ending),
            "ended" => Ok(StreamStatus::Ended),
            other => Err(format!("unknown stream status: {other}")),
        }
    }
}

/// A live stream and its cumulative counters.
///
/// `viewers_count <= peak_viewers <= total_viewers` holds after every
/// gateway or scheduler write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stream {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub status: StreamStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub pre_live_started_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Seconds from `started_at` to `ended_at`, set at finalization.
    pub duration: i64,
    pub viewers_count: i64,
    pub peak_viewers: i64,
    /// Cumulative joins (one per viewer session).
    pub total_viewers: i64,
    /// Distinct users across all sessions, computed at stream end.
    pub unique_viewers: i64,
    pub likes_count: i64,
    pub comments_count: i64,
    pub shares_count: i64,
    pub gifts_count: i64,
    pub gifts_value: i64,
    pub reaction_counts: HashMap<String, i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Stream {
    /// Periodic engagement rate: `(likes + comments + gifts) / total * 100`.
    ///
    /// The final-summary snapshot carries a fuller totals payload; this
    /// simpler formula is what the 5-second sampler records.
    pub fn engagement_rate(&self) -> f64 {
        if self.total_viewers == 0 {
            return 0.0;
        }
        let engaged = self.likes_count + self.comments_count + self.gifts_count;
        engaged as f64 / self.total_viewers as f64 * 100.0
    }
}

/// Payload for creating a stream.
#[derive(Debug, Clone)]
pub struct NewStream {
    pub owner_id: Uuid,
    pub title: String,
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            StreamStatus::Scheduled,
            StreamStatus::PreLive,
            StreamStatus::Live,
            StreamStatus::Ending,
            StreamStatus::Ended,
        ] {
            assert_eq!(status.as_str().parse::<StreamStatus>().unwrap(), status);
        }
        assert!("paused".parse::<StreamStatus>().is_err());
    }

    #[test]
    fn engagement_rate_handles_zero_viewers() {
        let mut stream = sample();
        assert_eq!(stream.engagement_rate(), 0.0);

        stream.total_viewers = 10;
        stream.likes_count = 3;
        stream.comments_count = 1;
        stream.gifts_count = 1;
        assert!((stream.engagement_rate() - 50.0).abs() < f64::EPSILON);
    }

    fn sample() -> Stream {
        let now = Utc::now();
        Stream {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            title: "test".into(),
            status: StreamStatus::Scheduled,
            scheduled_at: None,
            pre_live_started_at: None,
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
        }
    }
}
