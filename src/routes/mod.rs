pub mod conversations;
pub mod messages;
pub mod participants;
pub mod wsroute;

use actix_web::web;

/// REST surface, mounted under an authenticated scope.
///
/// Literal segments (`search`, `unread-counts`) are registered before `{id}`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(conversations::create_conversation)
        .service(conversations::list_conversations)
        .service(conversations::search_conversations)
        .service(conversations::unread_counts)
        .service(conversations::get_conversation)
        .service(conversations::update_conversation)
        .service(conversations::conversation_stats)
        .service(conversations::mute_conversation)
        .service(conversations::archive_conversation)
        .service(participants::add_participants)
        .service(participants::remove_participant)
        .service(participants::update_participant_role)
        .service(participants::leave_conversation)
        .service(messages::send_message)
        .service(messages::list_messages)
        .service(messages::mark_read)
        .service(messages::search_messages)
        .service(messages::get_message)
        .service(messages::edit_message)
        .service(messages::delete_message)
        .service(messages::react_to_message);
}

/// Live transport, mounted under its own authenticated `/ws` scope.
pub fn configure_ws(cfg: &mut web::ServiceConfig) {
    cfg.service(wsroute::ws_handler);
}
