use crate::config::WebSocketConfig;
use crate::error::AppError;
use crate::state::AppState;
use crate::websocket::message_types::WsOutboundEvent;
use crate::websocket::session::ChatSession;
use crate::websocket::{ConnectionId, Frame, OutboundReceiver};
use actix::{Actor, ActorContext, AsyncContext, StreamHandler};
use actix_web::{get, http::header, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use crypto_core::jwt::bearer_token;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

/// Frames a client may have in flight before the connection is closed
const INBOUND_BUFFER: usize = 64;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// Serialized event leaving through this connection
struct Outbound(Frame);

/// Transport half of a chat connection.
///
/// Forwards inbound text frames to the connection's `ChatSession` task and
/// writes whatever the registry queues for it. Stopping the actor drops the
/// inbound sender, which ends the session and releases its groups.
struct WsConnection {
    connection_id: ConnectionId,
    user_id: Uuid,
    inbound: Option<mpsc::Sender<String>>,
    outbound: Option<OutboundReceiver>,
    hb: Instant,
    heartbeat_interval: Duration,
    client_timeout: Duration,
}

impl WsConnection {
    fn new(
        connection_id: ConnectionId,
        user_id: Uuid,
        inbound: mpsc::Sender<String>,
        outbound: OutboundReceiver,
        config: &WebSocketConfig,
    ) -> Self {
        Self {
            connection_id,
            user_id,
            inbound: Some(inbound),
            outbound: Some(outbound),
            hb: Instant::now(),
            heartbeat_interval: config.heartbeat_interval,
            client_timeout: config.client_timeout,
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(self.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.hb) > act.client_timeout {
                tracing::warn!(
                    connection_id = %act.connection_id,
                    user_id = %act.user_id,
                    "WebSocket heartbeat failed, disconnecting"
                );
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn forward(&mut self, text: String, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(inbound) = self.inbound.as_ref() else {
            return;
        };
        match inbound.try_send(text) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    connection_id = %self.connection_id,
                    "inbound queue overflow, closing connection"
                );
                ctx.close(Some(ws::CloseReason {
                    code: ws::CloseCode::Policy,
                    description: Some("too many pending frames".to_string()),
                }));
                ctx.stop();
            }
            Err(TrySendError::Closed(_)) => ctx.stop(),
        }
    }
}

impl Actor for WsConnection {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(
            connection_id = %self.connection_id,
            user_id = %self.user_id,
            "WebSocket connection started"
        );

        self.hb(ctx);

        if let Some(outbound) = self.outbound.take() {
            ctx.add_stream(futures::stream::unfold(outbound, |mut rx| async move {
                rx.recv().await.map(|frame| (Outbound(frame), rx))
            }));
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.inbound.take();
        tracing::info!(
            connection_id = %self.connection_id,
            user_id = %self.user_id,
            "WebSocket connection stopped"
        );
    }
}

// Outbound queue closes once the session is torn down; the default
// `finished` then stops the actor.
impl StreamHandler<Outbound> for WsConnection {
    fn handle(&mut self, msg: Outbound, ctx: &mut Self::Context) {
        ctx.text(&*msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsConnection {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                self.forward(text.to_string(), ctx);
            }
            Ok(ws::Message::Binary(_)) => {
                if let Ok(json) = serde_json::to_string(&WsOutboundEvent::error(
                    "Binary frames are not supported",
                )) {
                    ctx.text(json);
                }
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::debug!(connection_id = %self.connection_id, ?reason, "close received");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(e) => {
                tracing::warn!(connection_id = %self.connection_id, error = %e, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

/// Token from `?token=` or, failing that, `Authorization: Bearer`
fn credential(req: &HttpRequest, params: &WsParams) -> Option<String> {
    params
        .token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .or_else(|| {
            req.headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(bearer_token)
                .map(str::to_string)
        })
}

/// Socket handshake. Authentication happens before the upgrade: an
/// unauthenticated client gets a plain 401 and never sees an event.
#[get("/ws")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    query: web::Query<WsParams>,
) -> Result<HttpResponse, Error> {
    let Some(token) = credential(&req, &query) else {
        tracing::warn!("WebSocket connection rejected: no token provided");
        return Ok(HttpResponse::Unauthorized().finish());
    };

    let identity = match state.identity.resolve(&token).await {
        Ok(identity) => identity,
        Err(AppError::Unauthorized) => {
            tracing::warn!("WebSocket connection rejected: invalid token");
            return Ok(HttpResponse::Unauthorized().finish());
        }
        Err(e) => return Err(e.into()),
    };

    let (handle, outbound) = state.registry.register(identity.user_id);
    let connection_id = handle.id;
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);

    let connection = WsConnection::new(
        connection_id,
        identity.user_id,
        inbound_tx,
        outbound,
        &state.config.ws,
    );

    let resp = match ws::start(connection, &req, stream) {
        Ok(resp) => resp,
        Err(e) => {
            state.registry.disconnect(connection_id);
            return Err(e);
        }
    };

    let session = ChatSession::new(
        identity,
        handle,
        state.registry.clone(),
        state.messages.clone(),
        state.config.ws.send_timeout,
    );
    tokio::spawn(session.run(inbound_rx));

    Ok(resp)
}
