//! OpenAI-compatible chat-completions backend.
//!
//! Covers the OpenAI API itself and every gateway speaking the same wire
//! format; the platform registry selects the `api_base`.

use crate::error::ThinkError;
use crate::http::build_http_client;
use crate::retry::{RetryPolicy, with_retry};
use crate::types::{
    AgentBackend, ChatRole, ThinkReply, ThinkRequest, TokenUsage, non_empty_reply,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Backend speaking the `/chat/completions` wire format.
#[derive(Debug)]
pub struct OpenAiCompatBackend {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
    request_timeout: Duration,
}

impl OpenAiCompatBackend {
    pub fn new(api_key: String, request_timeout: Duration) -> Result<Self, ThinkError> {
        Self::with_base_url(api_key, DEFAULT_OPENAI_BASE_URL.to_string(), request_timeout)
    }

    pub fn with_base_url(
        api_key: String,
        base_url: String,
        request_timeout: Duration,
    ) -> Result<Self, ThinkError> {
        let http = build_http_client(&base_url, request_timeout)?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            retry: RetryPolicy::default(),
            request_timeout,
        })
    }

    fn build_request_body(&self, request: &ThinkRequest) -> Value {
        let mut messages = Vec::with_capacity(request.history.len() + 1);
        if !request.system_prompt.is_empty() {
            messages.push(json!({
                "role": "system",
                "content": request.system_prompt,
            }));
        }
        for msg in &request.history {
            messages.push(json!({
                "role": match msg.role {
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                },
                "content": msg.content,
            }));
        }

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.params.max_tokens,
        });
        if let Some(temperature) = request.params.temperature {
            body["temperature"] = json!(temperature);
        }
        body
    }

    async fn send_once(&self, body: &Value) -> Result<ThinkReply, ThinkError> {
        let timeout_ms = self.request_timeout.as_millis() as u64;
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ThinkError::from_transport(&e, timeout_ms))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| ThinkError::from_transport(&e, timeout_ms))?;

        if !(200..300).contains(&status) {
            return Err(ThinkError::from_http_status(status, truncate(&text, 300)));
        }

        let parsed: ChatCompletionResponse =
            serde_json::from_str(&text).map_err(|e| ThinkError::Transient {
                message: format!("malformed completion response: {e}"),
            })?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ThinkError::Transient {
                message: "completion response had no choices".to_string(),
            })?;

        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(ThinkError::PolicyBlocked {
                reason: "completion stopped by content filter".to_string(),
            });
        }

        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        non_empty_reply(choice.message.content.unwrap_or_default(), usage)
    }
}

#[async_trait]
impl AgentBackend for OpenAiCompatBackend {
    async fn think(
        &self,
        request: ThinkRequest,
        cancel: &CancellationToken,
    ) -> Result<ThinkReply, ThinkError> {
        let body = self.build_request_body(&request);
        with_retry(&self.retry, cancel, || self.send_once(&body)).await
    }

    fn platform(&self) -> &'static str {
        "openai"
    }

    // The chat-completions ecosystem exposes a listing endpoint, so the
    // probe is model-agnostic here.
    async fn health_check(&self, _model: &str) -> Result<(), ThinkError> {
        let timeout_ms = self.request_timeout.as_millis() as u64;
        let response = self
            .http
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| ThinkError::from_transport(&e, timeout_ms))?;
        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            Ok(())
        } else {
            Err(ThinkError::from_http_status(status, String::new()))
        }
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        text.chars().take(limit).collect()
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;
    use agora_core::ModelParams;

    fn backend() -> OpenAiCompatBackend {
        OpenAiCompatBackend::with_base_url(
            "test-key".to_string(),
            "http://127.0.0.1:9".to_string(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn request() -> ThinkRequest {
        ThinkRequest {
            model: "gpt-4o-mini".to_string(),
            system_prompt: "You are concise.".to_string(),
            history: vec![
                ChatMessage::user("User: what happened?"),
                ChatMessage::assistant("Several things."),
            ],
            params: ModelParams {
                temperature: Some(0.7),
                max_tokens: 256,
            },
        }
    }

    #[test]
    fn test_request_body_shape() {
        let body = backend().build_request_body(&request());
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["max_tokens"], 256);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[2]["role"], "assistant");
        assert!((body["temperature"].as_f64().unwrap() - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_temperature_omitted_when_unset() {
        let mut req = request();
        req.params.temperature = None;
        let body = backend().build_request_body(&req);
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn test_response_parsing() {
        let json = r#"{
            "choices": [{"message": {"content": "a reply"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 7}
        }"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some("a reply")
        );
        assert_eq!(parsed.usage.unwrap().prompt_tokens, 12);
    }
}
