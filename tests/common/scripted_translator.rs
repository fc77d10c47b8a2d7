/*!
 * Scripted translator for integration tests.
 *
 * Each translate call consumes the next scripted step; once the script runs
 * out every call echoes. Steps can fail, hang until the caller gives up, or
 * run a hook first, which lets a test flip store failures or cancel a token
 * at an exact point in the batch loop.
 */

use async_trait::async_trait;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

use parabatch::errors::ProviderError;
use parabatch::providers::{MockTranslator, TokenCallback, TranslateRequest, Translator};
use parabatch::translation::estimate_tokens;

/// One scripted response
pub enum Scripted {
    /// Echo the request like the mock translator
    Echo,
    /// Return this text verbatim
    Reply(String),
    /// Fail with this error
    Fail(ProviderError),
    /// Never finish
    Hang,
    /// Run the hook, then echo
    Hook(Box<dyn FnOnce() + Send>),
}

impl fmt::Debug for Scripted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scripted::Echo => write!(f, "Echo"),
            Scripted::Reply(text) => write!(f, "Reply({:?})", text),
            Scripted::Fail(e) => write!(f, "Fail({})", e),
            Scripted::Hang => write!(f, "Hang"),
            Scripted::Hook(_) => write!(f, "Hook"),
        }
    }
}

/// Translator that plays back a script of responses
#[derive(Debug, Default)]
pub struct ScriptedTranslator {
    script: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedTranslator {
    /// Create a translator playing `steps` in order
    pub fn new(steps: impl IntoIterator<Item = Scripted>) -> Self {
        Self {
            script: Mutex::new(steps.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A translator that fails with a 503 on the given 1-based call
    pub fn failing_on(call: usize) -> Self {
        let mut steps: Vec<Scripted> = (1..call).map(|_| Scripted::Echo).collect();
        steps.push(Scripted::Fail(ProviderError::ApiError {
            status_code: 503,
            message: "service unavailable".to_string(),
        }));
        Self::new(steps)
    }

    /// Number of translate calls made
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Request texts, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Translator for ScriptedTranslator {
    async fn translate(
        &self,
        text: &str,
        request: &TranslateRequest,
        on_tokens: TokenCallback<'_>,
    ) -> Result<String, ProviderError> {
        self.calls.lock().unwrap().push(text.to_string());
        let step = self.script.lock().unwrap().pop_front().unwrap_or(Scripted::Echo);

        let output = match step {
            Scripted::Echo => MockTranslator::echo_text(text, &request.target_language),
            Scripted::Reply(reply) => reply,
            Scripted::Fail(error) => return Err(error),
            Scripted::Hang => std::future::pending::<String>().await,
            Scripted::Hook(hook) => {
                hook();
                MockTranslator::echo_text(text, &request.target_language)
            }
        };

        on_tokens(estimate_tokens(&output) as u64);
        Ok(output)
    }

    fn name(&self) -> &str {
        "Scripted"
    }
}
