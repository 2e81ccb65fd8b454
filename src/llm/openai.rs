//! OpenAI Chat Completions adapter.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::llm::provider::{
    self, CompletionRequest, CompletionResponse, FinishReason, LlmProvider,
};

const PROVIDER: &str = "openai";
const DEFAULT_BASE_URL: &str = "https://api.openai.com";

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(
        api_key: SecretString,
        model: impl Into<String>,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("Failed to create HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: model.into(),
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        (dec!(0.0000025), dec!(0.00001))
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = build_request_body(&self.model, &request);
        let url = format!("{}/v1/chat/completions", self.base_url);

        debug!(model = %self.model, "Sending request to OpenAI");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let retry = provider::retry_after(resp.headers());
            let text = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %text, "OpenAI API error");
            return Err(provider::status_error(PROVIDER, status, retry, text));
        }

        let api_resp: ApiResponse = resp.json().await.map_err(|e| LlmError::InvalidResponse {
            provider: PROVIDER.to_string(),
            reason: e.to_string(),
        })?;

        Ok(parse_response(api_resp))
    }
}

fn build_request_body(model: &str, req: &CompletionRequest) -> serde_json::Value {
    // Flat message list; system prompt leads as its own message.
    let mut messages = Vec::new();
    if let Some(system) = req.system_text() {
        messages.push(serde_json::json!({ "role": "system", "content": system }));
    }
    for m in req.turns() {
        messages.push(serde_json::json!({ "role": m.role, "content": m.content }));
    }

    let mut body = serde_json::json!({
        "model": model,
        "messages": messages,
    });
    if let Some(max) = req.max_tokens {
        body["max_tokens"] = serde_json::json!(max);
    }
    if let Some(t) = req.temperature {
        body["temperature"] = serde_json::json!(t);
    }
    body
}

fn parse_response(resp: ApiResponse) -> CompletionResponse {
    let choice = resp.choices.into_iter().next();
    let finish = choice.as_ref().and_then(|c| c.finish_reason.clone());
    let content = choice.and_then(|c| c.message.content).unwrap_or_default();

    CompletionResponse {
        content,
        input_tokens: resp.usage.as_ref().map(|u| u.prompt_tokens).unwrap_or(0),
        output_tokens: resp.usage.as_ref().map(|u| u.completion_tokens).unwrap_or(0),
        finish_reason: FinishReason::from_provider(finish.as_deref()),
        response_id: resp.id,
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    id: Option<String>,
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::ChatMessage;

    #[test]
    fn system_prompt_leads_message_list() {
        let req = CompletionRequest::new(vec![
            ChatMessage::system("sys"),
            ChatMessage::user("hi"),
        ]);
        let body = build_request_body("gpt-test", &req);
        let msgs = body["messages"].as_array().unwrap();
        assert_eq!(msgs[0]["role"], "system");
        assert_eq!(msgs[1]["content"], "hi");
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn empty_choices_yield_empty_content() {
        let parsed: ApiResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        let resp = parse_response(parsed);
        assert!(resp.content.is_empty());
        assert_eq!(resp.input_tokens, 0);
    }

    #[test]
    fn first_choice_is_used() {
        let raw = r#"{
            "id": "chatcmpl-1",
            "choices": [{"message": {"content": "Namaste"}, "finish_reason": "length"}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 2}
        }"#;
        let resp = parse_response(serde_json::from_str(raw).unwrap());
        assert_eq!(resp.content, "Namaste");
        assert_eq!(resp.finish_reason, FinishReason::Length);
        assert_eq!(resp.output_tokens, 2);
    }
}
