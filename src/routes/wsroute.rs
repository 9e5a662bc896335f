//! Viewer WebSocket endpoint
//!
//! `GET /ws/streams/{stream_id}?user_id=<uuid>`. The `user_id` is optional;
//! anonymous viewing is allowed. Admission runs before the upgrade; a
//! rejected client still gets a completed handshake, one `error` event, and
//! a close frame. Admitted sessions forward topic events to the client and
//! hand every inbound frame to the gateway.

use actix::{Actor, ActorContext, AsyncContext, Handler, Message as ActixMessage, StreamHandler};
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use crate::metrics;
use crate::state::AppState;
use crate::websocket::{ConnectionContext, ConnectionGateway, ServerEvent};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub user_id: Option<Uuid>,
}

/// Serialized event headed to this client.
#[derive(ActixMessage)]
#[rtype(result = "()")]
struct ForwardEvent(String);

struct ViewerSession {
    gateway: Arc<ConnectionGateway>,
    conn: ConnectionContext,
    hb: Instant,
}

impl ViewerSession {
    fn new(gateway: Arc<ConnectionGateway>, conn: ConnectionContext) -> Self {
        Self {
            gateway,
            conn,
            hb: Instant::now(),
        }
    }

    fn heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                warn!(stream_id = %act.conn.stream_id, "viewer heartbeat timed out, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl Actor for ViewerSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        metrics::connection_opened();
        self.heartbeat(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        metrics::connection_closed();

        // Teardown is unconditional on transport close; the gateway removes
        // the topic subscription before any best-effort bookkeeping.
        let gateway = self.gateway.clone();
        let conn = self.conn;
        actix::spawn(async move {
            gateway.disconnect(&conn).await;
        });
    }
}

impl Handler<ForwardEvent> for ViewerSession {
    type Result = ();

    fn handle(&mut self, msg: ForwardEvent, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ViewerSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(payload)) => {
                self.hb = Instant::now();
                ctx.pong(&payload);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();

                let gateway = self.gateway.clone();
                let conn = self.conn;
                let addr = ctx.address();
                actix::spawn(async move {
                    if let Some(reply) = gateway.handle_message(&conn, &text).await {
                        if let Ok(json) = serde_json::to_string(&reply) {
                            addr.do_send(ForwardEvent(json));
                        }
                    }
                });
            }
            Ok(ws::Message::Binary(_)) => {
                warn!(stream_id = %self.conn.stream_id, "binary frames not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                warn!(stream_id = %self.conn.stream_id, error = %e, "websocket protocol error");
                ctx.stop();
            }
            _ => {}
        }
    }
}

/// Completes the handshake only to deliver the rejection and close.
struct RejectSession {
    message: String,
}

impl Actor for RejectSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let event = ServerEvent::Error {
            message: self.message.clone(),
        };
        if let Ok(json) = serde_json::to_string(&event) {
            ctx.text(json);
        }
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Policy,
            description: Some(self.message.clone()),
        }));
        ctx.stop();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for RejectSession {
    fn handle(&mut self, _msg: Result<ws::Message, ws::ProtocolError>, _ctx: &mut Self::Context) {}
}

/// GET /ws/streams/{stream_id}
#[get("/ws/streams/{stream_id}")]
pub async fn stream_ws(
    req: HttpRequest,
    path: web::Path<Uuid>,
    query: web::Query<WsQuery>,
    payload: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let stream_id = path.into_inner();

    match state.gateway.connect(stream_id, query.user_id).await {
        Ok((conn, mut rx)) => {
            let session = ViewerSession::new(state.gateway.clone(), conn);
            match ws::WsResponseBuilder::new(session, &req, payload).start_with_addr() {
                Ok((addr, resp)) => {
                    // Bridge the topic subscription into the session actor.
                    // The loop ends when the gateway unsubscribes and drops
                    // the sender.
                    tokio::spawn(async move {
                        while let Some(event) = rx.recv().await {
                            addr.do_send(ForwardEvent(event));
                        }
                    });
                    Ok(resp)
                }
                Err(e) => {
                    // The upgrade failed after admission; roll presence back
                    // so the registration does not outlive the connection.
                    let gateway = state.gateway.clone();
                    tokio::spawn(async move {
                        gateway.disconnect(&conn).await;
                    });
                    Err(e)
                }
            }
        }
        Err(reject) => {
            info!(%stream_id, reason = %reject.message(), "viewer connection rejected");
            ws::start(
                RejectSession {
                    message: reject.message(),
                },
                &req,
                payload,
            )
        }
    }
}
