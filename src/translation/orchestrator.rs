/*!
 * Batch translation orchestrator.
 *
 * Each translation id runs the state machine
 * `Planning -> Translating(i) -> Aligning(i) -> Persisting(i) -> ... -> Completed`,
 * ending in `Failed` when a batch cannot be translated or persisted.
 *
 * Batches of one id are strictly sequential: a second run of an id that is
 * already running is refused. Several ids may run at once on the same
 * orchestrator; they share the admission limiter and nothing else. Phase
 * and live progress entries exist only while a run is active. The orchestrator never retries a batch itself: a failure persists
 * the work done so far and surfaces an error carrying the resume position,
 * and `retry` re-enters the same loop from the persisted record.
 */

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::alignment::{FallbackResolver, MarkerCodec};
use crate::app_config::{Config, TranslationCommonConfig};
use crate::database::store::{DocumentStore, get_json, keys, put_json};
use crate::errors::{ProviderError, StoreError, TranslationError};
use crate::providers::{TranslateRequest, Translator};
use crate::session::{
    PersistPolicy, ResumeResult, SessionBeginParams, SessionInfo, SessionManager,
    TranslationProgressRecord,
};

use super::batch::{Batch, BatchPlanner, DEFAULT_RESERVED_MARGIN};
use super::document::Document;
use super::progress::{ProgressRegistry, ProgressSnapshot};
use super::prompts::PromptTemplate;
use super::rate_limit::AdmissionControl;
use super::tokens::estimate_tokens;

/// Knobs for one orchestrator instance
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Source language code
    pub source_language: String,
    /// Target language code
    pub target_language: String,
    /// Model identifier passed to the translator
    pub model: String,
    /// Provider context window, in tokens
    pub max_context_tokens: usize,
    /// Tokens held back from the context window for instructions and output
    pub reserved_margin: usize,
    /// Generation cap per call
    pub max_output_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// Deadline for a single translate call
    pub timeout: Duration,
    /// System prompt template
    pub prompt: PromptTemplate,
    /// Resume from a record whose source hash no longer matches
    pub allow_stale_resume: bool,
    /// Retry policy for progress writes
    pub persist: PersistPolicy,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        let common = TranslationCommonConfig::default();
        Self {
            source_language: "en".to_string(),
            target_language: "fr".to_string(),
            model: String::new(),
            max_context_tokens: 8192,
            reserved_margin: DEFAULT_RESERVED_MARGIN,
            max_output_tokens: 4096,
            temperature: common.temperature,
            timeout: Duration::from_secs(60),
            prompt: PromptTemplate::new(&common.system_prompt),
            allow_stale_resume: false,
            persist: PersistPolicy::from_config(&common),
        }
    }
}

impl OrchestratorOptions {
    /// Options for the active provider of `config`
    pub fn from_config(config: &Config) -> Self {
        let translation = &config.translation;
        let common = &translation.common;
        Self {
            source_language: config.source_language.clone(),
            target_language: config.target_language.clone(),
            model: translation.get_model(),
            max_context_tokens: translation.get_max_context_tokens(),
            reserved_margin: common.reserved_margin,
            max_output_tokens: translation.get_max_output_tokens(),
            temperature: common.temperature,
            timeout: Duration::from_secs(translation.get_timeout_secs()),
            prompt: PromptTemplate::new(&common.system_prompt),
            allow_stale_resume: false,
            persist: PersistPolicy::from_config(common),
        }
    }

    /// Set the context window and reserved margin used for planning
    pub fn with_context_window(mut self, max_context_tokens: usize, reserved_margin: usize) -> Self {
        self.max_context_tokens = max_context_tokens;
        self.reserved_margin = reserved_margin;
        self
    }

    /// Set the per-call deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Allow resuming against a changed source document
    pub fn with_stale_resume(mut self, allow: bool) -> Self {
        self.allow_stale_resume = allow;
        self
    }

    /// Set the progress-write retry policy
    pub fn with_persist_policy(mut self, policy: PersistPolicy) -> Self {
        self.persist = policy;
        self
    }

    fn planner(&self) -> BatchPlanner {
        BatchPlanner::new(self.max_context_tokens, self.reserved_margin)
    }
}

/// Where a translation currently is in its state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationPhase {
    Planning,
    Translating(usize),
    Aligning(usize),
    Persisting(usize),
    Completed,
    /// Stopped before finishing; holds the batch a retry resumes at
    Failed(usize),
}

impl fmt::Display for TranslationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Planning => write!(f, "planning"),
            Self::Translating(i) => write!(f, "translating batch {}", i + 1),
            Self::Aligning(i) => write!(f, "aligning batch {}", i + 1),
            Self::Persisting(i) => write!(f, "persisting batch {}", i + 1),
            Self::Completed => write!(f, "completed"),
            Self::Failed(i) => write!(f, "stopped at batch {}", i + 1),
        }
    }
}

/// Kind of progress notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEventKind {
    /// A batch was translated and persisted
    Batch,
    /// The whole document is done
    Completed,
    /// The run ended with an error
    Failed,
}

/// Notification emitted after each batch and when a run ends
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub translation_id: String,
    /// Zero-based index of the batch the event refers to
    pub batch_index: usize,
    pub total_batches: usize,
    /// Tokens consumed so far, across runs
    pub total_tokens: u64,
    pub kind: ProgressEventKind,
}

/// Receiver side is owned by whoever forwards events to a user interface
pub type ProgressSink = mpsc::UnboundedSender<ProgressEvent>;

/// Result of a finished translation
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationOutcome {
    /// Translated document, same shape as the source
    pub document: Document,
    pub total_batches: usize,
    /// Batches whose alignment fell below perfect
    pub degraded_batches: usize,
    pub tokens_consumed: u64,
    /// True when the result came from an earlier completed run
    pub from_cache: bool,
}

enum CallOutcome {
    Finished(Result<String, ProviderError>),
    TimedOut,
    Cancelled,
}

/// Drives batch translation for any number of translation ids
#[derive(Debug)]
pub struct TranslationOrchestrator {
    store: Arc<dyn DocumentStore>,
    sessions: SessionManager,
    translator: Arc<dyn Translator>,
    limiter: Arc<dyn AdmissionControl>,
    progress: Arc<ProgressRegistry>,
    options: OrchestratorOptions,
    phases: Mutex<HashMap<String, TranslationPhase>>,
    running: Mutex<HashSet<String>>,
    sink: Option<ProgressSink>,
}

/// Marks a translation id as running; dropping it clears every in-memory
/// entry of the run, including when the run's future is abandoned
struct RunClaim<'a> {
    orchestrator: &'a TranslationOrchestrator,
    translation_id: String,
}

impl Drop for RunClaim<'_> {
    fn drop(&mut self) {
        let id = &self.translation_id;
        self.orchestrator.phases.lock().remove(id);
        self.orchestrator.progress.complete(id);
        self.orchestrator.running.lock().remove(id);
    }
}

impl TranslationOrchestrator {
    /// Create an orchestrator over shared services
    pub fn new(
        store: Arc<dyn DocumentStore>,
        translator: Arc<dyn Translator>,
        limiter: Arc<dyn AdmissionControl>,
        progress: Arc<ProgressRegistry>,
        options: OrchestratorOptions,
    ) -> Self {
        let sessions = SessionManager::new(store.clone(), options.persist);
        Self {
            store,
            sessions,
            translator,
            limiter,
            progress,
            options,
            phases: Mutex::new(HashMap::new()),
            running: Mutex::new(HashSet::new()),
            sink: None,
        }
    }

    /// Send progress events to `sink`
    pub fn with_sink(mut self, sink: ProgressSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Options in use
    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    /// Store the source document under `id` and translate it
    pub async fn translate(
        &self,
        translation_id: &str,
        document: &Document,
        cancel: &CancellationToken,
    ) -> Result<TranslationOutcome, TranslationError> {
        if translation_id.trim().is_empty() {
            return Err(TranslationError::Planning(
                "translation id must not be empty".to_string(),
            ));
        }
        let _claim = self.claim(translation_id)?;

        put_json(self.store.as_ref(), &keys::source(translation_id), document)
            .await
            .map_err(|source| TranslationError::Persistence {
                completed_batches: 0,
                total_batches: 0,
                source,
            })?;

        self.execute(translation_id, document, cancel).await
    }

    /// Re-enter the loop for `id` from its persisted source and progress
    pub async fn retry(
        &self,
        translation_id: &str,
        cancel: &CancellationToken,
    ) -> Result<TranslationOutcome, TranslationError> {
        let _claim = self.claim(translation_id)?;
        let document: Document = get_json(self.store.as_ref(), &keys::source(translation_id))
            .await
            .map_err(|source| TranslationError::Persistence {
                completed_batches: 0,
                total_batches: 0,
                source,
            })?
            .ok_or_else(|| TranslationError::NotFound(translation_id.to_string()))?;

        info!("Retrying translation {}", translation_id);
        self.execute(translation_id, &document, cancel).await
    }

    /// Delete everything stored for `id`
    pub async fn discard(&self, translation_id: &str) -> Result<(), StoreError> {
        self.sessions.discard(translation_id).await?;
        self.store.delete(&keys::result(translation_id)).await?;
        self.store.delete(&keys::live(translation_id)).await?;
        self.store.delete(&keys::source(translation_id)).await?;

        self.progress.complete(translation_id);
        self.phases.lock().remove(translation_id);
        info!("Discarded translation {}", translation_id);
        Ok(())
    }

    /// Persisted summary for `id`
    pub async fn status(&self, translation_id: &str) -> Result<Option<SessionInfo>, StoreError> {
        self.sessions.status(translation_id).await
    }

    /// Current phase of `id`.
    ///
    /// Running translations report their live phase; otherwise the phase is
    /// derived from the persisted record.
    pub async fn phase(
        &self,
        translation_id: &str,
    ) -> Result<Option<TranslationPhase>, StoreError> {
        if let Some(phase) = self.phases.lock().get(translation_id).copied() {
            return Ok(Some(phase));
        }

        Ok(self.sessions.load(translation_id).await?.map(|record| {
            if record.is_completed() {
                TranslationPhase::Completed
            } else {
                TranslationPhase::Failed(record.completed_batch_count)
            }
        }))
    }

    /// Whether a run of `id` is in progress on this orchestrator
    pub fn is_running(&self, translation_id: &str) -> bool {
        self.running.lock().contains(translation_id)
    }

    fn claim(&self, translation_id: &str) -> Result<RunClaim<'_>, TranslationError> {
        if !self.running.lock().insert(translation_id.to_string()) {
            warn!("Translation {} is already running", translation_id);
            return Err(TranslationError::AlreadyRunning(translation_id.to_string()));
        }
        Ok(RunClaim {
            orchestrator: self,
            translation_id: translation_id.to_string(),
        })
    }

    /// Live throughput view while `id` is running
    pub fn progress(&self, translation_id: &str) -> Option<ProgressSnapshot> {
        self.progress.snapshot(translation_id)
    }

    async fn execute(
        &self,
        translation_id: &str,
        document: &Document,
        cancel: &CancellationToken,
    ) -> Result<TranslationOutcome, TranslationError> {
        let result = self.run(translation_id, document, cancel).await;

        if let Err(e) = &result {
            let batch_index = match e {
                TranslationError::Provider { batch_index, .. }
                | TranslationError::Timeout { batch_index, .. } => Some(*batch_index),
                other => other.completed_batches(),
            };

            let total_tokens = self
                .progress
                .complete(translation_id)
                .map(|snapshot| snapshot.total_tokens)
                .unwrap_or_default();
            self.emit(ProgressEvent {
                translation_id: translation_id.to_string(),
                batch_index: batch_index.unwrap_or_default(),
                total_batches: e.total_batches().unwrap_or_default(),
                total_tokens,
                kind: ProgressEventKind::Failed,
            });

            match e {
                TranslationError::Cancelled { .. } => info!("Translation {}: {}", translation_id, e),
                _ => error!("Translation {} failed: {}", translation_id, e),
            }
        }

        result
    }

    async fn run(
        &self,
        translation_id: &str,
        document: &Document,
        cancel: &CancellationToken,
    ) -> Result<TranslationOutcome, TranslationError> {
        self.set_phase(translation_id, TranslationPhase::Planning);

        let paragraphs = document.flatten();
        if paragraphs.is_empty() {
            return Err(TranslationError::Planning(
                "document has no translatable paragraphs".to_string(),
            ));
        }
        let batches = self.options.planner().plan(&paragraphs);
        let total_batches = batches.len();
        let estimated_total_tokens: u64 =
            paragraphs.iter().map(|p| p.estimated_tokens as u64).sum();

        let resume = self
            .sessions
            .begin(SessionBeginParams {
                translation_id: translation_id.to_string(),
                source_hash: document.content_hash(),
                batch_keys: batches.iter().map(Batch::keys).collect(),
                target_language: self.options.target_language.clone(),
                model: self.options.model.clone(),
                allow_stale_resume: self.options.allow_stale_resume,
            })
            .await
            .map_err(|source| TranslationError::Persistence {
                completed_batches: 0,
                total_batches,
                source,
            })?;

        let mut record = match resume {
            ResumeResult::AlreadyCompleted(record) => {
                return self.cached_outcome(translation_id, document, record).await;
            }
            ResumeResult::Restarted { record, reason } => {
                info!("Translation {} restarted: {}", translation_id, reason);
                record
            }
            other => other.into_record(),
        };
        self.progress.start(
            translation_id,
            estimated_total_tokens,
            record.total_tokens_consumed,
        );

        for batch in batches.iter().skip(record.completed_batch_count) {
            self.run_batch(translation_id, batch, &mut record, cancel)
                .await?;
        }

        self.finish(translation_id, document, record).await
    }

    async fn run_batch(
        &self,
        translation_id: &str,
        batch: &Batch,
        record: &mut TranslationProgressRecord,
        cancel: &CancellationToken,
    ) -> Result<(), TranslationError> {
        let total_batches = record.total_batch_count;
        let cancelled = |record: &TranslationProgressRecord| TranslationError::Cancelled {
            completed_batches: record.completed_batch_count,
            total_batches,
        };

        if cancel.is_cancelled() {
            return Err(cancelled(record));
        }

        self.set_phase(translation_id, TranslationPhase::Translating(batch.index));
        tokio::select! {
            _ = self.limiter.await_admission() => {}
            _ = cancel.cancelled() => return Err(cancelled(record)),
        }
        if cancel.is_cancelled() {
            return Err(cancelled(record));
        }

        info!(
            "Translation {}: batch {}/{} ({} paragraphs, ~{} tokens)",
            translation_id,
            batch.index + 1,
            total_batches,
            batch.len(),
            batch.estimated_tokens()
        );

        let sources = batch.source_texts();
        let text = MarkerCodec::encode(&sources);
        let request = TranslateRequest {
            system_prompt: self.options.prompt.for_batch(
                &self.options.source_language,
                &self.options.target_language,
                batch.len(),
            ),
            target_language: self.options.target_language.clone(),
            model_id: self.options.model.clone(),
            max_tokens: self.options.max_output_tokens,
            temperature: self.options.temperature,
        };

        let base_tokens = record.total_tokens_consumed;
        let (token_tx, mut token_rx) = watch::channel(0u64);
        let on_tokens = move |tokens: u64| {
            token_tx.send_replace(tokens);
        };

        let call = self.translator.translate(&text, &request, &on_tokens);
        tokio::pin!(call);
        let deadline = tokio::time::sleep(self.options.timeout);
        tokio::pin!(deadline);
        let mut streaming = true;

        let outcome = loop {
            tokio::select! {
                result = &mut call => break CallOutcome::Finished(result),
                _ = &mut deadline => break CallOutcome::TimedOut,
                _ = cancel.cancelled() => break CallOutcome::Cancelled,
                changed = token_rx.changed(), if streaming => {
                    if changed.is_err() {
                        streaming = false;
                        continue;
                    }
                    let batch_tokens = *token_rx.borrow_and_update();
                    self.publish_live(translation_id, base_tokens + batch_tokens).await;
                }
            }
        };
        let streamed_tokens = *token_rx.borrow();

        let raw = match outcome {
            CallOutcome::Finished(Ok(raw)) => raw,
            CallOutcome::Finished(Err(ProviderError::Cancelled)) | CallOutcome::Cancelled => {
                return Err(cancelled(record));
            }
            CallOutcome::Finished(Err(e)) => {
                return Err(self
                    .fail_batch(record, batch.index, e, streamed_tokens)
                    .await);
            }
            CallOutcome::TimedOut => {
                let after_ms = self.options.timeout.as_millis() as u64;
                warn!(
                    "Translation {}: batch {} timed out after {} ms",
                    translation_id,
                    batch.index + 1,
                    after_ms
                );
                return Err(self
                    .fail_batch(
                        record,
                        batch.index,
                        ProviderError::Timeout { after_ms },
                        streamed_tokens,
                    )
                    .await);
            }
        };

        self.set_phase(translation_id, TranslationPhase::Aligning(batch.index));
        let extraction = MarkerCodec::decode(&raw, batch.len());
        let resolved = FallbackResolver::default().resolve(&extraction, &sources, &raw);
        if resolved.is_degraded() {
            warn!(
                "Translation {}: batch {} aligned at {} level",
                translation_id,
                batch.index + 1,
                resolved.level
            );
        }

        let tokens_consumed = if streamed_tokens > 0 {
            streamed_tokens
        } else {
            estimate_tokens(&raw) as u64
        };

        self.set_phase(translation_id, TranslationPhase::Persisting(batch.index));
        let merged = batch.keys().into_iter().zip(resolved.paragraphs.iter().cloned());
        self.sessions
            .record_batch_success(record, merged, tokens_consumed, resolved.is_degraded())
            .await
            .map_err(|source| TranslationError::Persistence {
                completed_batches: record.completed_batch_count,
                total_batches,
                source,
            })?;

        self.progress
            .update(translation_id, record.total_tokens_consumed);
        self.emit(ProgressEvent {
            translation_id: translation_id.to_string(),
            batch_index: batch.index,
            total_batches,
            total_tokens: record.total_tokens_consumed,
            kind: ProgressEventKind::Batch,
        });

        Ok(())
    }

    /// Persist work so far after a failed call and build the matching error
    async fn fail_batch(
        &self,
        record: &mut TranslationProgressRecord,
        batch_index: usize,
        error: ProviderError,
        tokens_consumed: u64,
    ) -> TranslationError {
        let total_batches = record.total_batch_count;
        if let Err(source) = self
            .sessions
            .record_batch_failure(record, &error.to_string(), tokens_consumed)
            .await
        {
            return TranslationError::Persistence {
                completed_batches: record.completed_batch_count,
                total_batches,
                source,
            };
        }

        let completed_batches = record.completed_batch_count;
        match error {
            ProviderError::Timeout { after_ms } => TranslationError::Timeout {
                batch_index,
                completed_batches,
                total_batches,
                after_ms,
            },
            source => TranslationError::Provider {
                batch_index,
                completed_batches,
                total_batches,
                source,
            },
        }
    }

    async fn finish(
        &self,
        translation_id: &str,
        document: &Document,
        mut record: TranslationProgressRecord,
    ) -> Result<TranslationOutcome, TranslationError> {
        let total_batches = record.total_batch_count;
        let persistence = |completed_batches: usize| {
            move |source: StoreError| TranslationError::Persistence {
                completed_batches,
                total_batches,
                source,
            }
        };

        let translated = document.reassemble(&record.translated_paragraphs);
        put_json(self.store.as_ref(), &keys::result(translation_id), &translated)
            .await
            .map_err(persistence(record.completed_batch_count))?;
        self.sessions
            .mark_completed(&mut record)
            .await
            .map_err(persistence(record.completed_batch_count))?;

        if let Err(e) = self.store.delete(&keys::live(translation_id)).await {
            debug!("Could not remove live progress for {}: {}", translation_id, e);
        }
        self.progress.complete(translation_id);
        self.emit(ProgressEvent {
            translation_id: translation_id.to_string(),
            batch_index: total_batches.saturating_sub(1),
            total_batches,
            total_tokens: record.total_tokens_consumed,
            kind: ProgressEventKind::Completed,
        });

        info!(
            "Translation {} completed: {} batches, {} degraded, {} tokens",
            translation_id, total_batches, record.degraded_batches, record.total_tokens_consumed
        );

        Ok(TranslationOutcome {
            document: translated,
            total_batches,
            degraded_batches: record.degraded_batches,
            tokens_consumed: record.total_tokens_consumed,
            from_cache: false,
        })
    }

    async fn cached_outcome(
        &self,
        translation_id: &str,
        document: &Document,
        record: TranslationProgressRecord,
    ) -> Result<TranslationOutcome, TranslationError> {
        let stored: Option<Document> = get_json(self.store.as_ref(), &keys::result(translation_id))
            .await
            .map_err(|source| TranslationError::Persistence {
                completed_batches: record.completed_batch_count,
                total_batches: record.total_batch_count,
                source,
            })?;
        let translated =
            stored.unwrap_or_else(|| document.reassemble(&record.translated_paragraphs));

        info!("Translation {} already completed, returning stored result", translation_id);
        self.emit(ProgressEvent {
            translation_id: translation_id.to_string(),
            batch_index: record.total_batch_count.saturating_sub(1),
            total_batches: record.total_batch_count,
            total_tokens: record.total_tokens_consumed,
            kind: ProgressEventKind::Completed,
        });

        Ok(TranslationOutcome {
            document: translated,
            total_batches: record.total_batch_count,
            degraded_batches: record.degraded_batches,
            tokens_consumed: record.total_tokens_consumed,
            from_cache: true,
        })
    }

    /// Feed a streamed token total to the tracker; write a throttled snapshot
    async fn publish_live(&self, translation_id: &str, total_tokens: u64) {
        let Some(snapshot) = self.progress.update(translation_id, total_tokens) else {
            return;
        };
        if !self.progress.should_persist(translation_id) {
            return;
        }
        // Live snapshots are advisory; the progress record is what resumes
        if let Err(e) = put_json(self.store.as_ref(), &keys::live(translation_id), &snapshot).await {
            debug!("Skipping live progress write for {}: {}", translation_id, e);
        }
    }

    fn set_phase(&self, translation_id: &str, phase: TranslationPhase) {
        debug!("Translation {}: {}", translation_id, phase);
        self.phases.lock().insert(translation_id.to_string(), phase);
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(sink) = &self.sink {
            if sink.send(event).is_err() {
                debug!("Progress sink closed, dropping event");
            }
        }
    }
}
