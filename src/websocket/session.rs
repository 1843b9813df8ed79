use std::sync::Arc;
use std::time::{Duration, Instant};

use actix::{Actor, ActorContext, AsyncContext, StreamHandler};
use actix_web_actors::ws;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use super::{BroadcastHub, ConnectionId, HubConnection};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// One live connection. Outbound frames come from the hub buffer; inbound
/// text is ignored since every write goes through REST.
pub struct WsSession {
    user_id: Uuid,
    connection_id: ConnectionId,
    hub: BroadcastHub,
    receiver: Option<mpsc::Receiver<Arc<str>>>,
    hb: Instant,
}

impl WsSession {
    pub fn new(connection: HubConnection, hub: BroadcastHub) -> Self {
        Self {
            user_id: connection.user_id,
            connection_id: connection.id,
            hub,
            receiver: Some(connection.receiver),
            hb: Instant::now(),
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                tracing::warn!(user_id = %act.user_id, "WebSocket heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(user_id = %self.user_id, connection = ?self.connection_id, "WebSocket session started");
        self.hb(ctx);
        if let Some(receiver) = self.receiver.take() {
            ctx.add_stream(ReceiverStream::new(receiver));
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(user_id = %self.user_id, connection = ?self.connection_id, "WebSocket session stopped");
        self.hub.disconnect(self.connection_id);
    }
}

// Frames pushed by the hub
impl StreamHandler<Arc<str>> for WsSession {
    fn handle(&mut self, frame: Arc<str>, ctx: &mut Self::Context) {
        ctx.text(frame.to_string());
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        // The hub dropped this connection (overflow, eviction or shutdown).
        tracing::debug!(user_id = %self.user_id, connection = ?self.connection_id, "hub stream ended");
        ctx.close(Some(ws::CloseCode::Away.into()));
        ctx.stop();
    }
}

// WebSocket protocol messages
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(_)) | Ok(ws::Message::Binary(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(e) => {
                tracing::warn!(user_id = %self.user_id, error = %e, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}
