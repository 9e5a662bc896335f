//! Connection gateway
//!
//! Owns the connect / message / disconnect lifecycle for viewer
//! connections, independent of the transport actor. The transport hands the
//! gateway an explicit `ConnectionContext` rather than hanging state off
//! the socket object.
//!
//! Failure semantics: admission checks reject with an `error` event, but
//! once a connection is admitted every persistence or broadcast failure is
//! logged and discarded. The connection lifecycle itself never fails on a
//! side effect, and topic registration is torn down unconditionally when
//! the transport closes.

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::messages::{ClientEvent, ServerEvent};
use super::{EventBroadcaster, StreamTopicRegistry, SubscriberId};
use crate::counter::ViewerCounterStore;
use crate::models::{ReactionKind, StreamStatus};
use crate::services::user_directory::SharedUserDirectory;
use crate::store::SharedStreamStore;
use tokio::sync::mpsc::UnboundedReceiver;

/// Why a connection was refused. Sent to the client as an `error` event
/// before the socket closes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectReject {
    StreamNotFound,
    StreamNotJoinable(StreamStatus),
    UnknownUser(Uuid),
    /// The durable store could not answer the admission checks.
    Unavailable,
}

impl ConnectReject {
    pub fn message(&self) -> String {
        match self {
            ConnectReject::StreamNotFound => "stream not found".to_string(),
            ConnectReject::StreamNotJoinable(status) => {
                format!("stream is not accepting viewers (status: {status})")
            }
            ConnectReject::UnknownUser(user_id) => format!("unknown user: {user_id}"),
            ConnectReject::Unavailable => "stream temporarily unavailable".to_string(),
        }
    }
}

/// Gateway-owned state for one admitted connection.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionContext {
    pub stream_id: Uuid,
    /// Anonymous viewing is allowed; presence rows exist only for users.
    pub user_id: Option<Uuid>,
    pub subscriber_id: SubscriberId,
}

pub struct ConnectionGateway {
    store: SharedStreamStore,
    users: SharedUserDirectory,
    counters: ViewerCounterStore,
    broadcaster: EventBroadcaster,
    registry: StreamTopicRegistry,
}

impl ConnectionGateway {
    pub fn new(
        store: SharedStreamStore,
        users: SharedUserDirectory,
        counters: ViewerCounterStore,
        broadcaster: EventBroadcaster,
        registry: StreamTopicRegistry,
    ) -> Self {
        Self {
            store,
            users,
            counters,
            broadcaster,
            registry,
        }
    }

    /// Admit a viewer connection.
    ///
    /// On success the connection is subscribed to the stream topic, its
    /// presence is registered, and the updated viewer count has been
    /// broadcast. The returned receiver carries the serialized events the
    /// transport should forward to the client.
    pub async fn connect(
        &self,
        stream_id: Uuid,
        user_id: Option<Uuid>,
    ) -> Result<(ConnectionContext, UnboundedReceiver<String>), ConnectReject> {
        let stream = match self.store.get_stream(stream_id).await {
            Ok(Some(stream)) => stream,
            Ok(None) => return Err(ConnectReject::StreamNotFound),
            Err(e) => {
                warn!(%stream_id, error = %e, "admission check failed against durable store");
                return Err(ConnectReject::Unavailable);
            }
        };

        if !stream.status.is_joinable() {
            return Err(ConnectReject::StreamNotJoinable(stream.status));
        }

        if let Some(user_id) = user_id {
            match self.users.exists(user_id).await {
                Ok(true) => {}
                Ok(false) => return Err(ConnectReject::UnknownUser(user_id)),
                Err(e) => {
                    warn!(%stream_id, %user_id, error = %e, "user directory check failed");
                    return Err(ConnectReject::Unavailable);
                }
            }
        }

        let (subscriber_id, rx) = self.registry.subscribe(stream_id).await;
        let ctx = ConnectionContext {
            stream_id,
            user_id,
            subscriber_id,
        };

        self.register_presence(stream_id, user_id).await;
        Ok((ctx, rx))
    }

    /// Record a viewer joining: open a session row for known users, bump
    /// the counters, ratchet the peak, and broadcast the new count.
    /// Returns `(current, peak)` after the join.
    ///
    /// Shared by the WebSocket connect path and the REST join endpoint so
    /// both produce the same counts. Best-effort throughout.
    pub async fn register_presence(&self, stream_id: Uuid, user_id: Option<Uuid>) -> (i64, i64) {
        if let Some(user_id) = user_id {
            match self.store.open_viewer(stream_id, user_id, Utc::now()).await {
                Ok(true) => {
                    if let Err(e) = self.store.incr_total_viewers(stream_id).await {
                        warn!(%stream_id, %user_id, error = %e, "failed to bump total_viewers");
                    }
                }
                Ok(false) => {
                    debug!(%stream_id, %user_id, "viewer already has an open session");
                }
                Err(e) => {
                    warn!(%stream_id, %user_id, error = %e, "failed to open viewer session");
                }
            }
        }

        let current = self.counters.increment(stream_id).await;
        let peak = self.counters.update_peak(stream_id, current).await;
        self.broadcaster
            .viewer_count_updated(stream_id, current, peak)
            .await;
        (current, peak)
    }

    /// Record a viewer leaving: drop the live count, broadcast it, and
    /// close the user's session row. Returns the count after the leave.
    /// Best-effort throughout.
    pub async fn release_presence(&self, stream_id: Uuid, user_id: Option<Uuid>) -> i64 {
        let current = self.counters.decrement(stream_id).await;
        let peak = self.counters.peak(stream_id).await;
        self.broadcaster
            .viewer_count_updated(stream_id, current, peak)
            .await;

        if let Some(user_id) = user_id {
            match self.store.close_viewer(stream_id, user_id, Utc::now()).await {
                Ok(Some(_)) => {}
                Ok(None) => debug!(%stream_id, %user_id, "no open session to close"),
                Err(e) => {
                    warn!(%stream_id, %user_id, error = %e, "failed to close viewer session");
                }
            }
        }
        current
    }

    /// Handle one raw client message. Returns a direct reply for the
    /// transport to send, if any. Malformed or unknown messages are ignored.
    pub async fn handle_message(
        &self,
        ctx: &ConnectionContext,
        raw: &str,
    ) -> Option<ServerEvent> {
        let event = match serde_json::from_str::<ClientEvent>(raw) {
            Ok(event) => event,
            Err(_) => {
                debug!(stream_id = %ctx.stream_id, "ignoring unparseable client message");
                return None;
            }
        };

        match event {
            ClientEvent::Ping => Some(ServerEvent::Pong {
                timestamp: Utc::now().timestamp_millis(),
            }),
            ClientEvent::Reaction { reaction_type } => {
                let Ok(kind) = reaction_type.parse::<ReactionKind>() else {
                    debug!(stream_id = %ctx.stream_id, %reaction_type, "dropping unknown reaction kind");
                    return None;
                };
                self.record_reaction(ctx.stream_id, ctx.user_id, kind).await;
                None
            }
        }
    }

    /// Count a reaction and broadcast it. Shared with the REST path.
    pub async fn record_reaction(
        &self,
        stream_id: Uuid,
        user_id: Option<Uuid>,
        kind: ReactionKind,
    ) {
        if let Err(e) = self.store.incr_reaction(stream_id, kind).await {
            warn!(%stream_id, reaction = %kind, error = %e, "failed to persist reaction count");
        }
        self.broadcaster.reaction(stream_id, user_id, kind).await;
    }

    /// Transport-level close. The topic subscription is removed first and
    /// unconditionally; presence bookkeeping failures cannot leak it.
    pub async fn disconnect(&self, ctx: &ConnectionContext) {
        self.registry
            .unsubscribe(ctx.stream_id, ctx.subscriber_id)
            .await;
        self.release_presence(ctx.stream_id, ctx.user_id).await;
    }
}
