//! Per-stream topic registry for connected viewers
//!
//! Each WebSocket connection subscribes to its stream's topic and receives
//! serialized events over an unbounded channel. Subscribers are identified
//! so that a transport-level close can always remove exactly its own entry.

pub mod broadcaster;
pub mod gateway;
pub mod messages;

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    RwLock,
};
use tracing::debug;
use uuid::Uuid;

pub use broadcaster::{EventBroadcaster, NullPubSub, PubSubTransport, RedisPubSub};
pub use gateway::{ConnectReject, ConnectionContext, ConnectionGateway};
pub use messages::{ClientEvent, ServerEvent};

/// Identity of one subscription to a stream topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

struct Subscriber {
    id: SubscriberId,
    sender: UnboundedSender<String>,
}

/// Tracks which connections are watching which stream.
///
/// Cleanup is precise: removal is by subscriber id, and senders whose
/// receiving side is gone are dropped during fan-out.
#[derive(Default, Clone)]
pub struct StreamTopicRegistry {
    inner: Arc<RwLock<HashMap<Uuid, Vec<Subscriber>>>>,
}

impl StreamTopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join a stream's topic, returning the subscription id (for teardown)
    /// and the channel events arrive on.
    pub async fn subscribe(&self, stream_id: Uuid) -> (SubscriberId, UnboundedReceiver<String>) {
        let (tx, rx) = unbounded_channel();
        let id = SubscriberId::new();

        let mut guard = self.inner.write().await;
        guard
            .entry(stream_id)
            .or_default()
            .push(Subscriber { id, sender: tx });

        debug!(%stream_id, subscribers = guard[&stream_id].len(), "topic subscriber added");
        (id, rx)
    }

    /// Remove one subscription. Must run on every transport close so the
    /// registry never leaks a dead connection.
    pub async fn unsubscribe(&self, stream_id: Uuid, id: SubscriberId) {
        let mut guard = self.inner.write().await;
        if let Some(subscribers) = guard.get_mut(&stream_id) {
            subscribers.retain(|s| s.id != id);
            if subscribers.is_empty() {
                guard.remove(&stream_id);
                debug!(%stream_id, "topic drained, removed from registry");
            }
        }
    }

    /// Deliver a serialized event to every subscriber of the stream,
    /// discarding senders whose connection has gone away. Returns how many
    /// subscribers received it.
    pub async fn fan_out(&self, stream_id: Uuid, payload: &str) -> usize {
        let mut guard = self.inner.write().await;
        let Some(subscribers) = guard.get_mut(&stream_id) else {
            return 0;
        };

        subscribers.retain(|s| s.sender.send(payload.to_string()).is_ok());
        let delivered = subscribers.len();
        if delivered == 0 {
            guard.remove(&stream_id);
        }
        delivered
    }

    pub async fn subscriber_count(&self, stream_id: Uuid) -> usize {
        let guard = self.inner.read().await;
        guard.get(&stream_id).map(|v| v.len()).unwrap_or(0)
    }
}
