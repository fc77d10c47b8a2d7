/*!
 * Mock translator for testing and dry runs.
 *
 * Behaviours:
 * - `Echo` - prefixes each text line with the target language, keeps markers
 * - `DropMarkers` - echoes but loses the markers for the listed ordinals
 * - `NoMarkers` - echoes with every marker removed
 * - `FailOn` - fails on the listed (1-based) calls, echoes otherwise
 * - `Slow` - echoes after a delay
 * - `Fixed` - always returns the same text
 */

use async_trait::async_trait;
use log::debug;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{TokenCallback, TranslateRequest, Translator};
use crate::alignment::markers::{marker, strip_markers};
use crate::errors::ProviderError;
use crate::translation::tokens::estimate_tokens;

/// Behavior mode for the mock translator
#[derive(Debug, Clone, PartialEq)]
pub enum MockBehavior {
    /// Always succeeds with a proper translation
    Echo,
    /// Succeeds but omits the markers of the given ordinals
    DropMarkers { ordinals: Vec<usize> },
    /// Succeeds but returns no markers at all
    NoMarkers,
    /// Fails on the given 1-based call numbers
    FailOn { calls: Vec<usize> },
    /// Simulates slow response (for timeout testing)
    Slow { delay_ms: u64 },
    /// Returns this text verbatim
    Fixed(String),
}

/// Mock translator with call accounting
#[derive(Debug, Clone)]
pub struct MockTranslator {
    /// Behavior mode
    behavior: MockBehavior,
    /// Calls made so far, shared between clones
    call_count: Arc<AtomicUsize>,
    /// Texts received, in call order
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockTranslator {
    /// Create a new mock translator with the specified behavior
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            call_count: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that always succeeds
    pub fn echo() -> Self {
        Self::new(MockBehavior::Echo)
    }

    /// Number of translate calls made
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Texts received so far
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    /// The echo translation of `text`: every non-marker line gets a language prefix
    pub fn echo_text(text: &str, target_language: &str) -> String {
        text.lines()
            .map(|line| {
                if line.trim().is_empty() || strip_markers(line).trim().is_empty() {
                    line.to_string()
                } else {
                    format!("[{}] {}", target_language, line)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn respond(&self, text: &str, request: &TranslateRequest, call: usize) -> Result<String, ProviderError> {
        let echoed = || Self::echo_text(text, &request.target_language);

        match &self.behavior {
            MockBehavior::Echo | MockBehavior::Slow { .. } => Ok(echoed()),
            MockBehavior::DropMarkers { ordinals } => Ok(ordinals
                .iter()
                .fold(echoed(), |acc, &ordinal| acc.replace(&marker(ordinal), ""))),
            MockBehavior::NoMarkers => Ok(strip_markers(&echoed())),
            MockBehavior::FailOn { calls } if calls.contains(&call) => {
                Err(ProviderError::ApiError {
                    status_code: 503,
                    message: format!("Simulated failure on call #{}", call),
                })
            }
            MockBehavior::FailOn { .. } => Ok(echoed()),
            MockBehavior::Fixed(response) => Ok(response.clone()),
        }
    }
}

#[async_trait]
impl Translator for MockTranslator {
    async fn translate(
        &self,
        text: &str,
        request: &TranslateRequest,
        on_tokens: TokenCallback<'_>,
    ) -> Result<String, ProviderError> {
        let call = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().push(text.to_string());
        debug!("Mock translate call #{} ({} chars)", call, text.len());

        if let MockBehavior::Slow { delay_ms } = self.behavior {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        let output = self.respond(text, request, call)?;

        // Stream the output back line by line
        let mut streamed = String::new();
        for line in output.split_inclusive('\n') {
            streamed.push_str(line);
            on_tokens(estimate_tokens(&streamed) as u64);
        }

        Ok(output)
    }

    fn name(&self) -> &str {
        "Mock"
    }
}
