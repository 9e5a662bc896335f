//! Best-effort event fan-out
//!
//! Every event goes two ways: to this instance's own topic subscribers, and
//! onto the per-stream pub/sub channel for the WebSocket edge layer serving
//! other instances. Publishing is best-effort by contract; a dropped
//! real-time update must never fail the business operation that caused it,
//! so the error branch is logged and discarded here, at the one call site
//! allowed to do that.

use async_trait::async_trait;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use super::messages::ServerEvent;
use super::StreamTopicRegistry;
use crate::metrics;
use crate::models::{Comment, ReactionKind, Stream, StreamStatus};
use crate::redis_client::RedisClient;

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("serialize event: {0}")]
    Serialize(String),

    #[error("transport publish failed: {0}")]
    Transport(String),
}

/// Raw pub/sub hop to the out-of-process edge fan-out.
#[async_trait]
pub trait PubSubTransport: Send + Sync {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BroadcastError>;
}

pub struct RedisPubSub {
    client: RedisClient,
}

impl RedisPubSub {
    pub fn new(client: RedisClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PubSubTransport for RedisPubSub {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BroadcastError> {
        let mut conn = self.client.connection();
        conn.publish::<_, _, ()>(topic, payload)
            .await
            .map_err(|e| BroadcastError::Transport(e.to_string()))
    }
}

/// Transport that drops everything. Used when Redis is not configured and
/// in tests; local subscribers still receive events through the registry.
pub struct NullPubSub;

#[async_trait]
impl PubSubTransport for NullPubSub {
    async fn publish(&self, _topic: &str, _payload: &[u8]) -> Result<(), BroadcastError> {
        Ok(())
    }
}

fn topic(stream_id: Uuid) -> String {
    format!("stream:{stream_id}:events")
}

/// Upper bound on the pub/sub hop; past it the event is dropped like any
/// other transport failure.
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct EventBroadcaster {
    registry: StreamTopicRegistry,
    transport: Arc<dyn PubSubTransport>,
}

impl EventBroadcaster {
    pub fn new(registry: StreamTopicRegistry, transport: Arc<dyn PubSubTransport>) -> Self {
        Self {
            registry,
            transport,
        }
    }

    /// Publish one event to the stream's topic, best-effort.
    pub async fn publish(&self, stream_id: Uuid, event: &ServerEvent) {
        match self.try_publish(stream_id, event).await {
            Ok(()) => metrics::event_published(event.name()),
            Err(e) => {
                metrics::broadcast_dropped();
                warn!(%stream_id, event = event.name(), error = %e, "dropping stream event");
            }
        }
    }

    async fn try_publish(&self, stream_id: Uuid, event: &ServerEvent) -> Result<(), BroadcastError> {
        let json =
            serde_json::to_string(event).map_err(|e| BroadcastError::Serialize(e.to_string()))?;

        self.registry.fan_out(stream_id, &json).await;

        match tokio::time::timeout(
            PUBLISH_TIMEOUT,
            self.transport.publish(&topic(stream_id), json.as_bytes()),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(BroadcastError::Transport("publish timed out".into())),
        }
    }

    pub async fn viewer_count_updated(&self, stream_id: Uuid, current: i64, peak: i64) {
        self.publish(
            stream_id,
            &ServerEvent::ViewerCountUpdated {
                current_viewers: current,
                peak_viewers: peak,
            },
        )
        .await;
    }

    pub async fn reaction(&self, stream_id: Uuid, user_id: Option<Uuid>, kind: ReactionKind) {
        self.publish(
            stream_id,
            &ServerEvent::Reaction {
                user_id,
                reaction_type: kind,
            },
        )
        .await;
    }

    pub async fn new_comment(&self, comment: &Comment) {
        self.publish(
            comment.stream_id,
            &ServerEvent::NewComment {
                comment: comment.clone(),
            },
        )
        .await;
    }

    pub async fn gift_sent(&self, stream_id: Uuid, user_id: Uuid, gift_type: &str, value: i64) {
        self.publish(
            stream_id,
            &ServerEvent::GiftSent {
                user_id,
                gift_type: gift_type.to_string(),
                value,
            },
        )
        .await;
    }

    pub async fn status_changed(&self, stream_id: Uuid, old: StreamStatus, new: StreamStatus) {
        self.publish(
            stream_id,
            &ServerEvent::StatusChanged {
                old_status: old,
                new_status: new,
            },
        )
        .await;
    }

    pub async fn stream_ended(&self, stream: &Stream) {
        self.publish(
            stream.id,
            &ServerEvent::StreamEnded {
                stream_id: stream.id,
                duration: stream.duration,
                total_viewers: stream.total_viewers,
                unique_viewers: stream.unique_viewers,
                peak_viewers: stream.peak_viewers,
            },
        )
        .await;
    }
}
