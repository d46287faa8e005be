//! Anthropic messages backend.

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

pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Backend speaking the Anthropic `/v1/messages` wire format.
#[derive(Debug)]
pub struct AnthropicBackend {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
    request_timeout: Duration,
}

impl AnthropicBackend {
    pub fn new(api_key: String, request_timeout: Duration) -> Result<Self, ThinkError> {
        Self::with_base_url(
            api_key,
            DEFAULT_ANTHROPIC_BASE_URL.to_string(),
            request_timeout,
        )
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
        let messages: Vec<Value> = request
            .history
            .iter()
            .map(|msg| {
                json!({
                    "role": match msg.role {
                        ChatRole::User => "user",
                        ChatRole::Assistant => "assistant",
                    },
                    "content": msg.content,
                })
            })
            .collect();

        let mut body = json!({
            "model": request.model,
            "max_tokens": request.params.max_tokens,
            "messages": messages,
        });
        if !request.system_prompt.is_empty() {
            body["system"] = json!(request.system_prompt);
        }
        if let Some(temperature) = request.params.temperature {
            body["temperature"] = json!(temperature);
        }
        body
    }

    async fn send_once(&self, body: &Value) -> Result<ThinkReply, ThinkError> {
        let timeout_ms = self.request_timeout.as_millis() as u64;
        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
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

        let parsed: MessagesResponse =
            serde_json::from_str(&text).map_err(|e| ThinkError::Transient {
                message: format!("malformed messages response: {e}"),
            })?;

        if parsed.stop_reason.as_deref() == Some("refusal") {
            return Err(ThinkError::PolicyBlocked {
                reason: "model refused the request".to_string(),
            });
        }

        let reply_text: String = parsed
            .content
            .iter()
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        let usage = TokenUsage {
            input_tokens: parsed.usage.input_tokens,
            output_tokens: parsed.usage.output_tokens,
        };
        non_empty_reply(reply_text, usage)
    }
}

#[async_trait]
impl AgentBackend for AnthropicBackend {
    async fn think(
        &self,
        request: ThinkRequest,
        cancel: &CancellationToken,
    ) -> Result<ThinkReply, ThinkError> {
        let body = self.build_request_body(&request);
        with_retry(&self.retry, cancel, || self.send_once(&body)).await
    }

    fn platform(&self) -> &'static str {
        "anthropic"
    }

    async fn health_check(&self, model: &str) -> Result<(), ThinkError> {
        // Minimal request against the model under test; a failure here is a
        // conclusive probe result for that exact platform/model pair.
        self.send_once(&probe_body(model)).await.map(|_| ())
    }
}

fn probe_body(model: &str) -> Value {
    json!({
        "model": model,
        "max_tokens": 1,
        "messages": [{"role": "user", "content": "ping"}],
    })
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        text.chars().take(limit).collect()
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: MessagesUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MessagesUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}
