use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Allowed live reaction kinds. Anything else is dropped on the floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionKind {
    Heart,
    Fire,
    Love,
    Wow,
    Clap,
    Laugh,
}

impl ReactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReactionKind::Heart => "heart",
            ReactionKind::Fire => "fire",
            ReactionKind::Love => "love",
            ReactionKind::Wow => "wow",
            ReactionKind::Clap => "clap",
            ReactionKind::Laugh => "laugh",
        }
    }
}

impl fmt::Display for ReactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReactionKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "heart" => Ok(ReactionKind::Heart),
            "fire" => Ok(ReactionKind::Fire),
            "love" => Ok(ReactionKind::Love),
            "wow" => Ok(ReactionKind::Wow),
            "clap" => Ok(ReactionKind::Clap),
            "laugh" => Ok(ReactionKind::Laugh),
            _ => Err(()),
        }
    }
}

/// A live comment posted while the stream is active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub user_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// A gift sent to the broadcaster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gift {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub user_id: Uuid,
    pub gift_type: String,
    pub value: i64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reaction_allow_list_is_closed() {
        assert_eq!("fire".parse::<ReactionKind>(), Ok(ReactionKind::Fire));
        assert!("skull".parse::<ReactionKind>().is_err());
        assert!("HEART".parse::<ReactionKind>().is_err());
    }
}
