/*!
 * Incremental reading of streamed HTTP bodies.
 *
 * Chunks can split a line, or a multi-byte character, anywhere. Bytes are
 * buffered until a newline so decoding only ever sees complete lines.
 */

use log::debug;
use reqwest::Response;

use crate::errors::ProviderError;
use crate::translation::tokens::estimate_tokens;

/// Splits a byte stream into text lines
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed, without terminators
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(newline) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            let text = String::from_utf8_lossy(&line);
            lines.push(text.trim_end_matches(['\n', '\r']).to_string());
        }
        lines
    }

    /// Whatever is left after the stream ended
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.pending).trim().to_string();
        self.pending.clear();
        (!rest.is_empty()).then_some(rest)
    }
}

/// Running output text and its token count
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    text: String,
    reported_tokens: Option<u64>,
}

impl StreamAccumulator {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a text delta
    pub fn push_text(&mut self, delta: &str) {
        self.text.push_str(delta);
    }

    /// Record a provider-reported output token count
    pub fn set_reported_tokens(&mut self, tokens: u64) {
        self.reported_tokens = Some(tokens);
    }

    /// Provider count when known, otherwise an estimate of the text so far
    pub fn tokens(&self) -> u64 {
        self.reported_tokens
            .unwrap_or_else(|| estimate_tokens(&self.text) as u64)
    }

    /// Accumulated text
    pub fn into_text(self) -> String {
        self.text
    }
}

/// Feed each line of a streamed body to `on_line` until it returns `false`
pub async fn read_lines<F>(
    mut response: Response,
    timeout_ms: u64,
    mut on_line: F,
) -> Result<(), ProviderError>
where
    F: FnMut(&str) -> Result<bool, ProviderError>,
{
    let mut buffer = LineBuffer::new();

    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| ProviderError::from_reqwest(e, timeout_ms))?
    {
        for line in buffer.push(&chunk) {
            if line.trim().is_empty() {
                continue;
            }
            if !on_line(&line)? {
                return Ok(());
            }
        }
    }

    if let Some(rest) = buffer.finish() {
        debug!("Stream ended without trailing newline");
        on_line(&rest)?;
    }

    Ok(())
}
