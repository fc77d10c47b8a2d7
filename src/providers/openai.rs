use async_trait::async_trait;
use log::{debug, error};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::response::ProviderResponse;
use super::stream::{StreamAccumulator, read_lines};
use super::{ProviderKind, TokenCallback, TranslateRequest, Translator};
use crate::errors::ProviderError;

const SSE_DATA_PREFIX: &str = "data:";
const SSE_DONE: &str = "[DONE]";

/// Client for OpenAI and OpenAI-compatible chat completion servers
#[derive(Debug)]
pub struct OpenAI {
    /// Display name used in logs ("OpenAI", "LM Studio")
    name: String,
    /// HTTP client for API requests
    client: Client,
    /// API key; local servers accept an empty key
    api_key: String,
    /// Base URL including the version segment, e.g. `https://api.openai.com/v1`
    endpoint: String,
    /// Request timeout, for error reporting
    timeout_ms: u64,
}

/// Chat message
#[derive(Debug, Serialize)]
pub struct OpenAIMessage {
    /// Role of the message sender
    pub role: String,
    /// Content of the message
    pub content: String,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

/// Streaming chat completion request
#[derive(Debug, Serialize)]
pub struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
    stream_options: StreamOptions,
}

impl OpenAIRequest {
    /// Build a streaming request for a translate call
    pub fn for_translation(text: &str, request: &TranslateRequest) -> Self {
        Self {
            model: request.model_id.clone(),
            messages: vec![
                OpenAIMessage {
                    role: "system".to_string(),
                    content: request.system_prompt.clone(),
                },
                OpenAIMessage {
                    role: "user".to_string(),
                    content: text.to_string(),
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: true,
            stream_options: StreamOptions { include_usage: true },
        }
    }
}

/// Payload of one SSE line, or `None` for comments, other fields and `[DONE]`
fn sse_payload(line: &str) -> Option<&str> {
    let data = line.strip_prefix(SSE_DATA_PREFIX)?.trim();
    if data.is_empty() || data == SSE_DONE {
        None
    } else {
        Some(data)
    }
}

impl OpenAI {
    /// Create a new client
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;

        Ok(Self {
            name: name.into(),
            client,
            api_key: api_key.into(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            timeout_ms: timeout_secs.saturating_mul(1000),
        })
    }

    /// Completions URL
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint)
    }
}

#[async_trait]
impl Translator for OpenAI {
    async fn translate(
        &self,
        text: &str,
        request: &TranslateRequest,
        on_tokens: TokenCallback<'_>,
    ) -> Result<String, ProviderError> {
        let body = OpenAIRequest::for_translation(text, request);

        let mut builder = self.client.post(self.completions_url()).json(&body);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, self.timeout_ms))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to get error response text".to_string());
            error!("{} API error ({}): {}", self.name, status, error_text);
            return Err(ProviderError::from_status(status.as_u16(), error_text));
        }

        let mut accumulator = StreamAccumulator::new();
        read_lines(response, self.timeout_ms, |line| {
            if line.strip_prefix(SSE_DATA_PREFIX).map(str::trim) == Some(SSE_DONE) {
                return Ok(false);
            }
            let Some(payload) = sse_payload(line) else {
                return Ok(true);
            };

            let chunk = ProviderResponse::parse(ProviderKind::OpenAi, payload)?;
            accumulator.push_text(&chunk.text());
            if let Some(tokens) = chunk.output_tokens() {
                accumulator.set_reported_tokens(tokens);
            }
            on_tokens(accumulator.tokens());

            // Keep reading after finish_reason: the usage chunk follows it
            Ok(true)
        })
        .await?;

        let output = accumulator.into_text();
        debug!("{} returned {} chars", self.name, output.len());
        Ok(output)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
