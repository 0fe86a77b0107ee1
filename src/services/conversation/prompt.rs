use tracing::debug;

use crate::models::chat::ChatMessage;

/// Placeholder the configured system prompt may carry; substituted with the
/// caller's question when no retrieved context is in play.
const USER_MESSAGE_PLACEHOLDER: &str = "{user_message}";

/// Builds the provider-ready message list: one system message followed by
/// the bounded history window. No model-specific formatting beyond the
/// `{role, content}` schema.
pub struct PromptAssembler {
    system_prompt: String,
}

impl PromptAssembler {
    pub fn new(system_prompt: String) -> Self {
        Self { system_prompt }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Fold retrieved context into the user's question. This is applied to
    /// the most recent user turn BEFORE it is appended to the store, so the
    /// augmented text is what history carries (configurable via
    /// `prompts.persist_augmented`).
    pub fn augment(&self, context: &str, question: &str) -> String {
        format!("Context:\n{}\n\nQuestion: {}\n\nAnswer:", context, question)
    }

    /// Assemble the outgoing message list from the windowed history.
    ///
    /// `question` is the caller's raw input; it is substituted into the
    /// system prompt's `{user_message}` placeholder only when no retrieval
    /// context was applied (the templated prompt predates retrieval; with
    /// context in play the question already lives in the rewritten user
    /// turn).
    pub fn assemble(
        &self,
        windowed: &[ChatMessage],
        question: &str,
        context_applied: bool,
    ) -> Vec<ChatMessage> {
        let system = if !context_applied && self.system_prompt.contains(USER_MESSAGE_PLACEHOLDER) {
            self.system_prompt.replace(USER_MESSAGE_PLACEHOLDER, question)
        } else {
            self.system_prompt.clone()
        };

        let mut messages = Vec::with_capacity(windowed.len() + 1);
        messages.push(ChatMessage::system(system));
        messages.extend_from_slice(windowed);

        debug!(
            "Assembled prompt: {} history messages, context_applied={}",
            windowed.len(),
            context_applied
        );
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::Role;

    fn assembler(prompt: &str) -> PromptAssembler {
        PromptAssembler::new(prompt.to_string())
    }

    #[test]
    fn test_augment_template() {
        let a = assembler("prompt");
        let text = a.augment("C", "X");
        assert_eq!(text, "Context:\nC\n\nQuestion: X\n\nAnswer:");
    }

    #[test]
    fn test_system_message_comes_first() {
        let a = assembler("be helpful");
        let window = vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")];
        let messages = a.assemble(&window, "hi", false);

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, "be helpful");
        assert_eq!(messages[1].content, "hi");
        assert_eq!(messages[2].content, "hello");
    }

    #[test]
    fn test_placeholder_substitution_without_context() {
        let a = assembler("Answer this: {user_message}");
        let window = vec![ChatMessage::user("what is a bond?")];
        let messages = a.assemble(&window, "what is a bond?", false);
        assert_eq!(messages[0].content, "Answer this: what is a bond?");
    }

    #[test]
    fn test_placeholder_left_alone_when_context_applied() {
        let a = assembler("Answer this: {user_message}");
        let window = vec![ChatMessage::user("Context:\nC\n\nQuestion: q\n\nAnswer:")];
        let messages = a.assemble(&window, "q", true);
        assert_eq!(messages[0].content, "Answer this: {user_message}");
    }

    #[test]
    fn test_empty_window() {
        let a = assembler("sys");
        let messages = a.assemble(&[], "q", false);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::System);
    }
}
