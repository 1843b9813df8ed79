use crate::{
    config::Config,
    repository::{ConversationRepository, MessageRepository},
    services::{
        ConversationService, DispatcherHandle, FanoutDispatcher, MessageService, MessagingFacade,
        Notifier, UserDirectory,
    },
    websocket::BroadcastHub,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub messaging: MessagingFacade,
    pub hub: BroadcastHub,
    pub fanout: FanoutDispatcher,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wires stores, hub and dispatcher. Must run inside a tokio runtime since
    /// the dispatcher spawns its workers here.
    pub fn build(
        config: Arc<Config>,
        conversations: Arc<dyn ConversationRepository>,
        messages: Arc<dyn MessageRepository>,
        users: Arc<dyn UserDirectory>,
        notifier: Arc<dyn Notifier>,
    ) -> (Self, DispatcherHandle) {
        let hub = BroadcastHub::new(config.hub);
        let (fanout, handle) = FanoutDispatcher::start(hub.clone(), notifier, config.fanout);

        let conversation_service = Arc::new(ConversationService::new(
            conversations,
            users,
            config.deadlines,
            config.limits,
        ));
        let message_service = Arc::new(MessageService::new(
            messages,
            conversation_service.clone(),
            config.deadlines,
            config.limits,
        ));
        let messaging = MessagingFacade::new(
            conversation_service,
            message_service,
            hub.clone(),
            fanout.clone(),
        );

        let state = Self {
            messaging,
            hub,
            fanout,
            config,
        };
        (state, handle)
    }

    /// Drains the dispatcher, then closes every live connection.
    pub async fn shutdown(&self, handle: DispatcherHandle) {
        self.fanout.shutdown(handle).await;
        self.hub.shutdown();
    }
}
