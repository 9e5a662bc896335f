//! Wire format for the viewer WebSocket
//!
//! Both directions use `{"event": "<name>", "data": {...}}`. Unknown or
//! malformed client messages are ignored without a reply.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Comment, ReactionKind, StreamStatus};

/// Client-to-server events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Liveness probe; answered with `pong`, never broadcast.
    Ping,
    Reaction {
        reaction_type: String,
    },
}

/// Server-to-client events, both direct replies and topic broadcasts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Error {
        message: String,
    },
    Pong {
        timestamp: i64,
    },
    ViewerCountUpdated {
        current_viewers: i64,
        peak_viewers: i64,
    },
    Reaction {
        user_id: Option<Uuid>,
        reaction_type: ReactionKind,
    },
    NewComment {
        comment: Comment,
    },
    GiftSent {
        user_id: Uuid,
        gift_type: String,
        value: i64,
    },
    StatusChanged {
        old_status: StreamStatus,
        new_status: StreamStatus,
    },
    StreamEnded {
        stream_id: Uuid,
        duration: i64,
        total_viewers: i64,
        unique_viewers: i64,
        peak_viewers: i64,
    },
}

impl ServerEvent {
    /// Wire name, also used as the metrics label.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Error { .. } => "error",
            ServerEvent::Pong { .. } => "pong",
            ServerEvent::ViewerCountUpdated { .. } => "viewer_count_updated",
            ServerEvent::Reaction { .. } => "reaction",
            ServerEvent::NewComment { .. } => "new_comment",
            ServerEvent::GiftSent { .. } => "gift_sent",
            ServerEvent::StatusChanged { .. } => "status_changed",
            ServerEvent::StreamEnded { .. } => "stream_ended",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_parses_without_data() {
        let event: ClientEvent = serde_json::from_str(r#"{"event":"ping"}"#).unwrap();
        assert!(matches!(event, ClientEvent::Ping));
    }

    #[test]
    fn reaction_parses_with_payload() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"event":"reaction","data":{"reaction_type":"fire"}}"#)
                .unwrap();
        match event {
            ClientEvent::Reaction { reaction_type } => assert_eq!(reaction_type, "fire"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn garbage_is_rejected_by_the_parser() {
        assert!(serde_json::from_str::<ClientEvent>("not json").is_err());
        assert!(serde_json::from_str::<ClientEvent>(r#"{"event":"dance"}"#).is_err());
    }

    #[test]
    fn viewer_count_event_matches_wire_shape() {
        let json = serde_json::to_value(ServerEvent::ViewerCountUpdated {
            current_viewers: 7,
            peak_viewers: 12,
        })
        .unwrap();
        assert_eq!(json["event"], "viewer_count_updated");
        assert_eq!(json["data"]["current_viewers"], 7);
        assert_eq!(json["data"]["peak_viewers"], 12);
    }

    #[test]
    fn status_change_serializes_snake_case_statuses() {
        let json = serde_json::to_value(ServerEvent::StatusChanged {
            old_status: StreamStatus::PreLive,
            new_status: StreamStatus::Live,
        })
        .unwrap();
        assert_eq!(json["event"], "status_changed");
        assert_eq!(json["data"]["old_status"], "pre_live");
        assert_eq!(json["data"]["new_status"], "live");
    }
}
