/*!
 * Provider implementations for different translation services.
 *
 * This module contains client implementations for various LLM providers:
 * - Ollama: Local LLM server (streamed JSON lines)
 * - OpenAI: OpenAI API and OpenAI-compatible servers such as LM Studio (streamed SSE)
 * - Anthropic: Anthropic Messages API
 * - Mock: scripted behaviours for tests and dry runs
 */

use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

use crate::app_config::{TranslationConfig, TranslationProvider};
use crate::errors::ProviderError;

pub mod anthropic;
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod response;
pub mod stream;

pub use anthropic::Anthropic;
pub use mock::{MockBehavior, MockTranslator};
pub use ollama::Ollama;
pub use openai::OpenAI;
pub use response::ProviderResponse;

/// Generation parameters for one translate call
#[derive(Debug, Clone, PartialEq)]
pub struct TranslateRequest {
    /// Rendered system prompt
    pub system_prompt: String,
    /// Target language code
    pub target_language: String,
    /// Model identifier understood by the provider
    pub model_id: String,
    /// Generation cap
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
}

/// Streaming token callback; receives the running output token count
pub type TokenCallback<'a> = &'a (dyn Fn(u64) + Send + Sync);

/// Common trait for all translation back ends
///
/// Implementations call `on_tokens` with the running output token count
/// whenever new output arrives. Callers throttle anything expensive they
/// do in response.
#[async_trait]
pub trait Translator: Send + Sync + Debug {
    /// Translate `text`, returning the raw model output
    async fn translate(
        &self,
        text: &str,
        request: &TranslateRequest,
        on_tokens: TokenCallback<'_>,
    ) -> Result<String, ProviderError>;

    /// Short name used in logs
    fn name(&self) -> &str;
}

/// Closed set of wire protocols; selects the response adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Ollama `/api/chat`
    Ollama,
    /// OpenAI-compatible `/chat/completions`
    OpenAi,
    /// Anthropic `/v1/messages`
    Anthropic,
}

impl From<TranslationProvider> for ProviderKind {
    fn from(provider: TranslationProvider) -> Self {
        match provider {
            TranslationProvider::Ollama => ProviderKind::Ollama,
            TranslationProvider::OpenAI | TranslationProvider::LMStudio => ProviderKind::OpenAi,
            TranslationProvider::Anthropic => ProviderKind::Anthropic,
        }
    }
}

/// Build the translator for the configured provider
pub fn build_translator(config: &TranslationConfig) -> Result<Arc<dyn Translator>, ProviderError> {
    let endpoint = config.get_endpoint();
    let timeout_secs = config.get_timeout_secs();

    let translator: Arc<dyn Translator> = match config.provider {
        TranslationProvider::Ollama => Arc::new(Ollama::new(endpoint, timeout_secs)?),
        TranslationProvider::OpenAI | TranslationProvider::LMStudio => Arc::new(OpenAI::new(
            config.provider.display_name(),
            endpoint,
            config.get_api_key(),
            timeout_secs,
        )?),
        TranslationProvider::Anthropic => Arc::new(Anthropic::new(
            config.get_api_key(),
            endpoint,
            timeout_secs,
        )?),
    };

    Ok(translator)
}
