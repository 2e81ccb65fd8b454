use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::debug;

use super::ConversationalAgent;
use crate::conversations::{Message, MessageRole};
use crate::error::LlmError;
use crate::llm::provider::{ChatMessage, CompletionRequest, FinishReason, LlmProvider};

/// Default number of prior messages sent as context.
pub const DEFAULT_HISTORY_WINDOW: usize = 20;

/// Replies are chat-sized.
const DEFAULT_MAX_TOKENS: u32 = 512;

const DEFAULT_TEMPERATURE: f32 = 0.7;

/// `ConversationalAgent` over any `LlmProvider`.
pub struct LlmAgent {
    llm: Arc<dyn LlmProvider>,
    history_window: usize,
    max_tokens: u32,
    temperature: f32,
}

impl LlmAgent {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            history_window: DEFAULT_HISTORY_WINDOW,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Window the history, map roles, and append the new utterance last.
    pub fn build_request(&self, system: &str, history: &[Message], utterance: &str) -> CompletionRequest {
        let start = history.len().saturating_sub(self.history_window);
        let mut messages = Vec::with_capacity(history.len() - start + 2);
        messages.push(ChatMessage::system(system));
        messages.extend(history[start..].iter().map(|m| match m.role {
            MessageRole::Customer => ChatMessage::user(m.content.clone()),
            MessageRole::Assistant => ChatMessage::assistant(m.content.clone()),
        }));
        messages.push(ChatMessage::user(utterance));

        CompletionRequest::new(messages)
            .with_max_tokens(self.max_tokens)
            .with_temperature(self.temperature)
    }
}

#[async_trait]
impl ConversationalAgent for LlmAgent {
    async fn reply(
        &self,
        system: &str,
        history: &[Message],
        utterance: &str,
    ) -> Result<String, LlmError> {
        let request = self.build_request(system, history, utterance);
        let response = self.llm.complete(request).await?;

        let (input_rate, output_rate) = self.llm.cost_per_token();
        let cost = input_rate * Decimal::from(response.input_tokens)
            + output_rate * Decimal::from(response.output_tokens);
        debug!(
            model = self.llm.model_name(),
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            cost = %cost.round_dp(6),
            truncated = response.finish_reason == FinishReason::Length,
            "Agent reply generated"
        );

        Ok(response.content)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::llm::provider::{CompletionResponse, Role};

    /// Records the last request and answers with a fixed reply.
    struct RecordingLlm {
        seen: Mutex<Option<CompletionRequest>>,
    }

    #[async_trait]
    impl LlmProvider for RecordingLlm {
        fn model_name(&self) -> &str {
            "mock-recording"
        }

        fn cost_per_token(&self) -> (Decimal, Decimal) {
            (Decimal::ZERO, Decimal::ZERO)
        }

        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            *self.seen.lock().unwrap() = Some(request);
            Ok(CompletionResponse {
                content: "Namaste! 🙏".into(),
                input_tokens: 120,
                output_tokens: 8,
                finish_reason: FinishReason::Stop,
                response_id: None,
            })
        }
    }

    struct FailingLlm;

    #[async_trait]
    impl LlmProvider for FailingLlm {
        fn model_name(&self) -> &str {
            "mock-failing"
        }

        fn cost_per_token(&self) -> (Decimal, Decimal) {
            (Decimal::ZERO, Decimal::ZERO)
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            Err(LlmError::RequestFailed {
                provider: "mock".into(),
                reason: "connection reset".into(),
            })
        }
    }

    fn history(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    Message::customer(format!("c{i}"))
                } else {
                    Message::assistant(format!("a{i}"))
                }
            })
            .collect()
    }

    #[test]
    fn request_is_windowed_and_role_mapped() {
        let agent = LlmAgent::new(Arc::new(FailingLlm)).with_history_window(4);
        let req = agent.build_request("sys", &history(10), "new one");

        assert_eq!(req.messages.len(), 1 + 4 + 1);
        assert_eq!(req.messages[0].role, Role::System);
        assert_eq!(req.messages[1].content, "c6");
        assert_eq!(req.messages[1].role, Role::User);
        assert_eq!(req.messages[2].role, Role::Assistant);
        let last = req.messages.last().unwrap();
        assert_eq!(last.role, Role::User);
        assert_eq!(last.content, "new one");
        assert_eq!(req.max_tokens, Some(DEFAULT_MAX_TOKENS));
    }

    #[test]
    fn short_history_is_sent_whole() {
        let agent = LlmAgent::new(Arc::new(FailingLlm));
        let req = agent.build_request("sys", &history(3), "hi");
        assert_eq!(req.messages.len(), 5);
    }

    #[tokio::test]
    async fn reply_returns_content() {
        let llm = Arc::new(RecordingLlm {
            seen: Mutex::new(None),
        });
        let agent = LlmAgent::new(llm.clone());
        let reply = agent.reply("sys", &[], "namaste").await.unwrap();
        assert_eq!(reply, "Namaste! 🙏");

        let seen = llm.seen.lock().unwrap().take().unwrap();
        assert_eq!(seen.system_text().as_deref(), Some("sys"));
    }

    #[tokio::test]
    async fn backend_failure_propagates() {
        let agent = LlmAgent::new(Arc::new(FailingLlm));
        let err = agent.reply("sys", &[], "hi").await.unwrap_err();
        assert!(matches!(err, LlmError::RequestFailed { .. }));
    }
}
