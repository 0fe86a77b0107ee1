use std::sync::Arc;

use axum::extract::FromRef;

use crate::config::Settings;
use crate::services::{ConversationStore, LlmService, PromptAssembler, RetrievalProvider};

/// Application state shared across handlers. Everything is injected here
/// explicitly; no service reads globals.
#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub store: ConversationStore,
    pub llm: Arc<LlmService>,
    pub assembler: Arc<PromptAssembler>,
    pub retrieval: Arc<dyn RetrievalProvider>,
}

impl AppState {
    pub fn new(settings: Settings, retrieval: Arc<dyn RetrievalProvider>) -> Self {
        let llm = Arc::new(LlmService::new(
            settings.llm.clone(),
            settings.server.public_url.clone(),
        ));
        let assembler = Arc::new(PromptAssembler::new(settings.prompts.system_prompt.clone()));
        Self {
            settings,
            store: ConversationStore::new(),
            llm,
            assembler,
            retrieval,
        }
    }
}

impl FromRef<AppState> for ConversationStore {
    fn from_ref(state: &AppState) -> Self {
        state.store.clone()
    }
}

impl FromRef<AppState> for Settings {
    fn from_ref(state: &AppState) -> Self {
        state.settings.clone()
    }
}
