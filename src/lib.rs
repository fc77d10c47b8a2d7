/*!
 * # parabatch - resumable, structure-preserving document translation
 *
 * Translates long paginated documents through a language model one
 * token-bounded batch at a time, keeping paragraph alignment even when the
 * model mangles the alignment markers, and persisting enough state after
 * every batch to resume a failed run without paying for finished batches
 * again.
 *
 * ## Architecture
 *
 * - `translation`: document model, batch planning, rate limiting, progress
 *   tracking and the orchestrator loop
 * - `alignment`: positional marker codec and the fallback resolver
 * - `session`: the persisted progress record and its lifecycle
 * - `database`: document store trait with SQLite and in-memory back ends
 * - `providers`: Ollama, OpenAI-compatible, Anthropic and mock translators
 * - `app_config`: configuration file handling
 * - `language_utils`: ISO language code utilities
 * - `errors`: error types
 */

// Global lints configuration
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]

pub mod alignment;
pub mod app_config;
pub mod app_controller;
pub mod database;
pub mod errors;
pub mod language_utils;
pub mod providers;
pub mod session;
pub mod translation;

// Re-export main types for easier usage
pub use app_config::Config;
pub use database::{DocumentStore, MemoryStore, SqliteStore};
pub use errors::{ProviderError, StoreError, TranslationError};
pub use providers::{Translator, build_translator};
pub use translation::{
    Document, OrchestratorOptions, ProgressRegistry, Section, SlidingWindowLimiter,
    TranslationOrchestrator, TranslationOutcome,
};
