// src/web_socket_server.rs

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use log::{debug, info, warn};
use serde::Deserialize;
use std::time::{Duration, Instant};

use crate::app_state::AppState;
use crate::auth::{current_user, validate_jwt, AuthUser};
use crate::error::ApiError;
use crate::live_hub::{Connect, Disconnect, LiveHub, LiveText};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct ClientFrame {
    #[serde(rename = "type")]
    kind: String,
}

/// Reply for a client text frame; only `{"type":"ping"}` gets one.
fn reply_to(text: &str) -> Option<&'static str> {
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) if frame.kind == "ping" => Some(r#"{"type":"pong"}"#),
        _ => None,
    }
}

pub struct WebSocketSession {
    pub user_id: String,
    pub hb: Instant,
    pub hub: Addr<LiveHub>,
}

impl WebSocketSession {
    pub fn new(user_id: String, hub: Addr<LiveHub>) -> Self {
        Self {
            user_id,
            hb: Instant::now(),
            hub,
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                warn!("Heartbeat lost for {}, closing live session", act.user_id);
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl Actor for WebSocketSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.hb(ctx);

        let addr = ctx.address();
        self.hub
            .send(Connect {
                user_id: self.user_id.clone(),
                addr: addr.recipient(),
            })
            .into_actor(self)
            .then(|res, act, ctx| {
                if res.is_err() {
                    warn!("Live hub refused session for {}", act.user_id);
                    ctx.stop();
                }
                fut::ready(())
            })
            .wait(ctx);
    }

    fn stopped(&mut self, ctx: &mut Self::Context) {
        self.hub.do_send(Disconnect {
            user_id: self.user_id.clone(),
            addr: ctx.address().recipient(),
        });
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WebSocketSession {
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
                match reply_to(&text) {
                    Some(reply) => ctx.text(reply),
                    None => debug!("Ignoring client frame from {}", self.user_id),
                }
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                warn!("WebSocket error for {}: {}", self.user_id, e);
                ctx.stop();
            }
            _ => {}
        }
    }
}

impl Handler<LiveText> for WebSocketSession {
    type Result = ();

    fn handle(&mut self, msg: LiveText, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

#[derive(Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// Browsers cannot set headers on a WebSocket handshake, so the token may
/// also come as `?token=`.
fn ws_caller(req: &HttpRequest, query: &WsQuery, secret: &str) -> Result<AuthUser, ApiError> {
    if let Ok(caller) = current_user(req) {
        return Ok(caller);
    }
    let token = query
        .token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Missing token"))?;
    Ok(validate_jwt(token, secret)?.into())
}

/// GET /ws
pub async fn ws_index(
    req: HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
    query: web::Query<WsQuery>,
) -> Result<HttpResponse, actix_web::Error> {
    let caller = ws_caller(&req, &query, &data.config.jwt_secret)?;
    info!("Opening live session for {}", caller.user_id);
    ws::start(
        WebSocketSession::new(caller.user_id, data.live_hub.clone()),
        &req,
        stream,
    )
}
