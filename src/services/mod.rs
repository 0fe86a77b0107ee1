pub mod conversation;
pub mod credentials;
pub mod llm_service;
pub mod retrieval;

pub use conversation::{ConversationStore, PromptAssembler, StreamCommit};
pub use credentials::Credentials;
pub use llm_service::LlmService;
pub use retrieval::{DisabledRetrieval, RetrievalProvider, RetrievedSnippet};
