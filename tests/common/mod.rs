/*!
 * Common test utilities for the parabatch test suite
 */

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use parabatch::database::DocumentStore;
use parabatch::providers::Translator;
use parabatch::session::PersistPolicy;
use parabatch::translation::{
    Document, OrchestratorOptions, ProgressRegistry, Section, SlidingWindowLimiter,
    TranslationOrchestrator,
};

// Re-export the scripted translator module
pub mod scripted_translator;

pub use scripted_translator::{Scripted, ScriptedTranslator};

/// Route library logs to the test output; safe to call from every test
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Creates a temporary directory for test files
pub fn create_temp_dir() -> Result<TempDir> {
    Ok(TempDir::new()?)
}

/// Creates a test file with the given content in the specified directory
pub fn create_test_file(dir: &Path, filename: &str, content: &str) -> Result<PathBuf> {
    let file_path = dir.join(filename);
    fs::write(&file_path, content)?;
    Ok(file_path)
}

/// Text of paragraph `i`; each one estimates to 10 tokens
pub fn paragraph_text(i: usize) -> String {
    format!("Paragraph number {:02} of the test text.", i)
}

/// A single-section document of `count` paragraphs
pub fn sample_document(count: usize) -> Document {
    Document::new(vec![Section::new((0..count).map(paragraph_text))])
}

/// A document whose sections hold the given number of paragraphs
pub fn sectioned_document(sizes: &[usize]) -> Document {
    let mut next = 0;
    let sections = sizes
        .iter()
        .map(|&size| {
            let section = Section::new((next..next + size).map(paragraph_text));
            next += size;
            section
        })
        .collect();
    Document::new(sections)
}

/// Options that put exactly one sample paragraph in each batch and never
/// wait on persistence retries
pub fn one_paragraph_per_batch() -> OrchestratorOptions {
    OrchestratorOptions::default()
        .with_context_window(1012, 1000)
        .with_persist_policy(PersistPolicy {
            retry_count: 0,
            initial_backoff: Duration::from_millis(1),
        })
}

/// Orchestrator over the given services with an unlimited limiter
pub fn orchestrator_with(
    store: Arc<dyn DocumentStore>,
    translator: Arc<dyn Translator>,
    options: OrchestratorOptions,
) -> TranslationOrchestrator {
    TranslationOrchestrator::new(
        store,
        translator,
        Arc::new(SlidingWindowLimiter::unlimited()),
        Arc::new(ProgressRegistry::default()),
        options,
    )
}

/// The echo translation the mock and scripted translators produce
pub fn echoed(text: &str) -> String {
    format!("[fr] {}", text)
}
