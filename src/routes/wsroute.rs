use crate::middleware::guards::User;
use crate::state::AppState;
use crate::websocket::session::WsSession;
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;

/// GET /ws
/// Upgrades to a live connection subscribed to every conversation of the caller.
#[get("")]
pub async fn ws_handler(
    state: web::Data<AppState>,
    user: User,
    req: HttpRequest,
    stream: web::Payload,
) -> Result<HttpResponse, Error> {
    // Registered before the roster read, so conversations joined meanwhile
    // reach this connection through subscribe_user.
    let connection = state.hub.connect(user.id);
    let connection_id = connection.id;

    let conversation_ids = match state
        .messaging
        .conversations()
        .ids_for_user(user.id)
        .await
    {
        Ok(ids) => ids,
        Err(e) => {
            state.hub.disconnect(connection_id);
            return Err(e.into());
        }
    };

    for conversation_id in &conversation_ids {
        state.hub.subscribe(*conversation_id, connection_id);
    }

    let session = WsSession::new(connection, state.hub.clone());
    let response = ws::start(session, &req, stream);
    if response.is_err() {
        // Not an upgrade request; the session never started.
        state.hub.disconnect(connection_id);
    } else {
        tracing::debug!(
            user_id = %user.id,
            conversations = conversation_ids.len(),
            "live connection subscribed"
        );
    }
    response
}
