/*!
 * Provider response shapes.
 *
 * Every provider payload is parsed into one closed enum, picked by the
 * provider kind rather than by guessing from the JSON shape.
 */

use serde::Deserialize;

use super::ProviderKind;
use crate::errors::ProviderError;

/// One streamed line from Ollama `/api/chat`
#[derive(Debug, Clone, Deserialize)]
pub struct OllamaChatChunk {
    #[serde(default)]
    pub message: Option<OllamaMessage>,
    #[serde(default)]
    pub done: bool,
    /// Number of generated tokens, sent on the final line
    #[serde(default)]
    pub eval_count: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Message body inside an Ollama chunk
#[derive(Debug, Clone, Deserialize)]
pub struct OllamaMessage {
    #[serde(default)]
    pub content: String,
}

/// One SSE `data:` payload from an OpenAI-compatible server
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiStreamChunk {
    #[serde(default)]
    pub choices: Vec<OpenAiChoice>,
    /// Sent on the last chunk by servers that support `stream_options.include_usage`
    #[serde(default)]
    pub usage: Option<OpenAiUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiChoice {
    #[serde(default)]
    pub delta: OpenAiDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAiDelta {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiUsage {
    #[serde(default)]
    pub completion_tokens: Option<u64>,
}

/// Complete Anthropic Messages API response
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicResponse {
    /// The content of the response
    pub content: Vec<AnthropicContent>,
    /// Token usage information
    pub usage: AnthropicUsage,
}

/// Individual content block in an Anthropic response
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicContent {
    /// The type of content
    #[serde(rename = "type")]
    pub content_type: String,
    /// The actual text content
    #[serde(default)]
    pub text: String,
}

/// Token usage information
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicUsage {
    /// Number of input tokens
    #[serde(default)]
    pub input_tokens: u64,
    /// Number of output tokens
    pub output_tokens: u64,
}

/// A parsed provider payload
#[derive(Debug, Clone)]
pub enum ProviderResponse {
    Ollama(OllamaChatChunk),
    OpenAi(OpenAiStreamChunk),
    Anthropic(AnthropicResponse),
}

impl ProviderResponse {
    /// Parse a payload using the adapter for `kind`
    pub fn parse(kind: ProviderKind, payload: &str) -> Result<Self, ProviderError> {
        let parsed = match kind {
            ProviderKind::Ollama => serde_json::from_str(payload).map(ProviderResponse::Ollama),
            ProviderKind::OpenAi => serde_json::from_str(payload).map(ProviderResponse::OpenAi),
            ProviderKind::Anthropic => {
                serde_json::from_str(payload).map(ProviderResponse::Anthropic)
            }
        };

        parsed.map_err(|e| ProviderError::ParseError(format!("{}: {}", e, truncate(payload))))
    }

    /// Text carried by this payload
    pub fn text(&self) -> String {
        match self {
            ProviderResponse::Ollama(chunk) => chunk
                .message
                .as_ref()
                .map(|m| m.content.clone())
                .unwrap_or_default(),
            ProviderResponse::OpenAi(chunk) => chunk
                .choices
                .iter()
                .filter_map(|c| c.delta.content.as_deref())
                .collect(),
            ProviderResponse::Anthropic(response) => response
                .content
                .iter()
                .filter(|c| c.content_type == "text")
                .map(|c| c.text.as_str())
                .collect(),
        }
    }

    /// Output token count reported by the provider, if any
    pub fn output_tokens(&self) -> Option<u64> {
        match self {
            ProviderResponse::Ollama(chunk) => chunk.eval_count,
            ProviderResponse::OpenAi(chunk) => {
                chunk.usage.as_ref().and_then(|u| u.completion_tokens)
            }
            ProviderResponse::Anthropic(response) => Some(response.usage.output_tokens),
        }
    }

    /// Whether this payload ends the stream
    pub fn is_done(&self) -> bool {
        match self {
            ProviderResponse::Ollama(chunk) => chunk.done,
            ProviderResponse::OpenAi(chunk) => chunk
                .choices
                .iter()
                .any(|c| c.finish_reason.is_some()),
            ProviderResponse::Anthropic(_) => true,
        }
    }

    /// Error message embedded in the payload
    pub fn error(&self) -> Option<&str> {
        match self {
            ProviderResponse::Ollama(chunk) => chunk.error.as_deref(),
            _ => None,
        }
    }
}

fn truncate(payload: &str) -> String {
    payload.chars().take(200).collect()
}
