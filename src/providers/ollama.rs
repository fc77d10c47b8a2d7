use async_trait::async_trait;
use log::{debug, error};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use url::Url;

use super::response::ProviderResponse;
use super::stream::{StreamAccumulator, read_lines};
use super::{ProviderKind, TokenCallback, TranslateRequest, Translator};
use crate::errors::ProviderError;

/// Ollama client for interacting with a local Ollama server
#[derive(Debug)]
pub struct Ollama {
    /// Base URL of the server, without trailing slash
    base_url: String,
    /// HTTP client for API requests
    client: Client,
    /// Request timeout, for error reporting
    timeout_ms: u64,
}

/// Chat message object
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    /// Role of the message sender (system, user or assistant)
    pub role: String,
    /// Content of the message
    pub content: String,
}

/// Additional model parameters
#[derive(Debug, Serialize)]
pub struct ChatOptions {
    /// Sampling temperature
    temperature: f32,
    /// Maximum number of tokens to generate
    num_predict: u32,
}

/// Streaming chat request for `/api/chat`
#[derive(Debug, Serialize)]
pub struct ChatRequest {
    /// Model name to use for generation
    model: String,
    /// Messages of the conversation
    messages: Vec<ChatMessage>,
    /// Additional model parameters
    options: ChatOptions,
    /// Whether to stream the response
    stream: bool,
}

impl ChatRequest {
    /// Build a streaming chat request for a translate call
    pub fn for_translation(text: &str, request: &TranslateRequest) -> Self {
        Self {
            model: request.model_id.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: request.system_prompt.clone(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: text.to_string(),
                },
            ],
            options: ChatOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
            stream: true,
        }
    }
}

impl Ollama {
    /// Create a new Ollama client for `endpoint` (e.g. `http://localhost:11434`)
    pub fn new(endpoint: impl Into<String>, timeout_secs: u64) -> Result<Self, ProviderError> {
        let endpoint = endpoint.into();
        let with_scheme = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint
        } else {
            format!("http://{}", endpoint)
        };
        let url = Url::parse(&with_scheme).map_err(|e| {
            ProviderError::ConnectionError(format!("Invalid Ollama endpoint {}: {}", with_scheme, e))
        })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            // Ollama speaks HTTP/1.1
            .http1_only()
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;

        Ok(Self {
            base_url: url.as_str().trim_end_matches('/').to_string(),
            client,
            timeout_ms: timeout_secs.saturating_mul(1000),
        })
    }

    /// Base URL of the server
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Translator for Ollama {
    async fn translate(
        &self,
        text: &str,
        request: &TranslateRequest,
        on_tokens: TokenCallback<'_>,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = ChatRequest::for_translation(text, request);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, self.timeout_ms))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to get error response text".to_string());
            error!("Ollama API error ({}): {}", status, error_text);
            return Err(ProviderError::from_status(status.as_u16(), error_text));
        }

        let mut accumulator = StreamAccumulator::new();
        read_lines(response, self.timeout_ms, |line| {
            let chunk = ProviderResponse::parse(ProviderKind::Ollama, line)?;
            if let Some(message) = chunk.error() {
                return Err(ProviderError::ApiError {
                    status_code: status.as_u16(),
                    message: message.to_string(),
                });
            }

            accumulator.push_text(&chunk.text());
            if let Some(tokens) = chunk.output_tokens() {
                accumulator.set_reported_tokens(tokens);
            }
            on_tokens(accumulator.tokens());

            Ok(!chunk.is_done())
        })
        .await?;

        let output = accumulator.into_text();
        debug!("Ollama returned {} chars", output.len());
        Ok(output)
    }

    fn name(&self) -> &str {
        "Ollama"
    }
}
