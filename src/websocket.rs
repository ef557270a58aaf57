//! WebSocket module for real-time engine events
//!
//! Each session subscribes to the engine's broadcast channel and relays
//! every event to its client as a `WsMessage::Event` frame.

use actix::{Actor, ActorContext, AsyncContext, StreamHandler};
use actix_web_actors::ws;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, warn};

use crate::models::{EngineEvent, WsMessage};

/// How often heartbeat pings are sent
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// How long before lack of client response causes a timeout
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// How often pending engine events are flushed to the client
const EVENT_FLUSH_INTERVAL: Duration = Duration::from_millis(250);

/// WebSocket session actor
pub struct WsSession {
    client_id: String,
    last_heartbeat: Instant,
    events: broadcast::Receiver<EngineEvent>,
    relayed: u64,
}

impl WsSession {
    pub fn new(client_id: String, events: broadcast::Receiver<EngineEvent>) -> Self {
        Self {
            client_id,
            last_heartbeat: Instant::now(),
            events,
            relayed: 0,
        }
    }

    fn send(ctx: &mut ws::WebsocketContext<Self>, msg: &WsMessage) {
        if let Ok(json) = serde_json::to_string(msg) {
            ctx.text(json);
        }
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(
                    client_id = %act.client_id,
                    "WebSocket heartbeat timeout"
                );
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn start_event_relay(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(EVENT_FLUSH_INTERVAL, |act, ctx| loop {
            match act.events.try_recv() {
                Ok(event) => {
                    act.relayed += 1;
                    Self::send(ctx, &WsMessage::Event(event));
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Lagged(missed)) => {
                    warn!(client_id = %act.client_id, missed, "WebSocket client lagging");
                    Self::send(
                        ctx,
                        &WsMessage::Error {
                            message: format!("Missed {} events, refresh state", missed),
                        },
                    );
                }
                Err(TryRecvError::Closed) => {
                    info!(client_id = %act.client_id, "Event stream closed");
                    ctx.stop();
                    break;
                }
            }
        });
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(client_id = %self.client_id, "WebSocket connected");

        self.start_heartbeat(ctx);
        self.start_event_relay(ctx);

        Self::send(
            ctx,
            &WsMessage::Connected {
                client_id: self.client_id.clone(),
            },
        );
    }

    fn stopped(&mut self, _: &mut Self::Context) {
        info!(
            client_id = %self.client_id,
            relayed = self.relayed,
            "WebSocket disconnected"
        );
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                debug!(client_id = %self.client_id, message = %text);

                match serde_json::from_str::<WsMessage>(&text) {
                    Ok(WsMessage::Ping) => {
                        self.last_heartbeat = Instant::now();
                        Self::send(ctx, &WsMessage::Pong);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(client_id = %self.client_id, error = %e);
                        Self::send(
                            ctx,
                            &WsMessage::Error {
                                message: "Invalid message format".into(),
                            },
                        );
                    }
                }
            }
            Ok(ws::Message::Close(reason)) => {
                info!(client_id = %self.client_id, reason = ?reason);
                ctx.stop();
            }
            Err(e) => {
                warn!(client_id = %self.client_id, error = %e);
                ctx.stop();
            }
            _ => {}
        }
    }
}
