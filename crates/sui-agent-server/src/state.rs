use std::sync::Arc;
use sui_agent::action::ActionService;
use sui_agent::chat::ChatService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<ChatService>,
    pub actions: ActionService,
}

impl AppState {
    pub fn new(chat: ChatService) -> Self {
        Self {
            chat: Arc::new(chat),
            actions: ActionService::new(),
        }
    }
}
