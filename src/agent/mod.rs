//! Agent module: the conversational reply seam and its LLM-backed implementation.

mod llm_agent;
pub mod prompt;

use async_trait::async_trait;

use crate::conversations::Message;
use crate::error::LlmError;

pub use llm_agent::LlmAgent;
pub use prompt::PromptComposer;

/// Produces the next reply in a conversation.
///
/// Implementations must not touch stored state; the caller persists the
/// turn only after a reply comes back.
#[async_trait]
pub trait ConversationalAgent: Send + Sync {
    /// `history` is the full message log, oldest first; implementations
    /// apply their own context window. `utterance` is the new customer
    /// message and is not yet part of `history`.
    async fn reply(
        &self,
        system: &str,
        history: &[Message],
        utterance: &str,
    ) -> Result<String, LlmError>;
}
