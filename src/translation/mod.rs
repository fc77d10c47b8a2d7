/*!
 * Document translation pipeline.
 *
 * - `tokens`: heuristic token estimation
 * - `document`: document model, flattening and reassembly
 * - `batch`: token-bounded batch planning
 * - `prompts`: system prompt templates
 * - `rate_limit`: sliding-window admission control shared by all translations
 * - `progress`: smoothed throughput and ETA per translation
 * - `orchestrator`: the resumable batch loop tying it all together
 */

pub mod batch;
pub mod document;
pub mod orchestrator;
pub mod progress;
pub mod prompts;
pub mod rate_limit;
pub mod tokens;

// Re-export main types for easier usage
pub use batch::{Batch, BatchPlanner};
pub use document::{Document, Paragraph, Section};
pub use orchestrator::{
    OrchestratorOptions, ProgressEvent, ProgressEventKind, ProgressSink, TranslationOrchestrator,
    TranslationOutcome, TranslationPhase,
};
pub use progress::{ProgressRegistry, ProgressSettings, ProgressSnapshot};
pub use prompts::PromptTemplate;
pub use rate_limit::{AdmissionControl, SlidingWindowLimiter};
pub use tokens::estimate_tokens;
