use anyhow::{Context, Result, anyhow};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::app_config::Config;
use crate::database::{DatabaseConnection, DocumentStore, SqliteStore};
use crate::errors::TranslationError;
use crate::providers::{MockTranslator, Translator, build_translator};
use crate::session::SessionInfo;
use crate::translation::{
    Document, OrchestratorOptions, ProgressEvent, ProgressEventKind, ProgressRegistry,
    ProgressSettings, SlidingWindowLimiter, TranslationOrchestrator, TranslationOutcome,
};

// @module: Application controller wiring configuration to the orchestrator

/// Main application controller for document translation
pub struct Controller {
    // @field: App configuration
    config: Config,
    // @field: Where sources, progress and results live
    store: Arc<dyn DocumentStore>,
    // @field: Active translation back end
    translator: Arc<dyn Translator>,
    // @field: Process-wide admission control
    limiter: Arc<SlidingWindowLimiter>,
    // @field: Live progress of running translations
    progress: Arc<ProgressRegistry>,
}

impl Controller {
    /// Create a controller from configuration, opening the SQLite store.
    ///
    /// With `dry_run` the configured provider is replaced by the echo mock.
    pub fn with_config(config: Config, dry_run: bool) -> Result<Self> {
        let connection = match &config.database_path {
            Some(path) => DatabaseConnection::new(path)?,
            None => DatabaseConnection::new_default()?,
        };
        info!("Using database {}", connection.path().display());
        let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::new(connection));

        let translator: Arc<dyn Translator> = if dry_run {
            info!("Dry run: using the echo translator");
            Arc::new(MockTranslator::echo())
        } else {
            build_translator(&config.translation)?
        };

        Ok(Self::with_services(config, store, translator))
    }

    /// Create a controller over explicit services
    pub fn with_services(
        config: Config,
        store: Arc<dyn DocumentStore>,
        translator: Arc<dyn Translator>,
    ) -> Self {
        let common = &config.translation.common;
        let limiter = Arc::new(SlidingWindowLimiter::from_limit(
            config.translation.get_rate_limit(),
            Duration::from_millis(common.rate_window_ms),
        ));
        let progress = Arc::new(ProgressRegistry::new(ProgressSettings::from_config(common)));

        Self {
            config,
            store,
            translator,
            limiter,
            progress,
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Translate the JSON document at `input`.
    ///
    /// The result is written to `output`, or next to the input as
    /// `<stem>.<target>.json`. Returns the translation id and outcome.
    pub async fn translate_file(
        &self,
        input: &Path,
        output: Option<PathBuf>,
        translation_id: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<(String, TranslationOutcome)> {
        let document = read_document(input)?;
        let translation_id =
            translation_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let output = output.unwrap_or_else(|| self.default_output_path(input));

        info!(
            "Translating {} as {} ({} - {})",
            input.display(),
            translation_id,
            self.config.translation.provider.display_name(),
            self.config.translation.get_model()
        );

        let (orchestrator, consumer) = self.orchestrator_with_bar(&translation_id);
        let result = orchestrator
            .translate(&translation_id, &document, cancel)
            .await;
        // Dropping the orchestrator closes the event channel
        drop(orchestrator);
        close_bar(consumer).await;
        let outcome = self.report(&translation_id, result)?;

        write_document(&output, &outcome.document)?;
        info!("Success: {}", output.display());
        Ok((translation_id, outcome))
    }

    /// Resume a failed or cancelled translation
    pub async fn retry(
        &self,
        translation_id: &str,
        output: Option<PathBuf>,
        cancel: &CancellationToken,
    ) -> Result<TranslationOutcome> {
        let (orchestrator, consumer) = self.orchestrator_with_bar(translation_id);
        let result = orchestrator.retry(translation_id, cancel).await;
        drop(orchestrator);
        close_bar(consumer).await;
        let outcome = self.report(translation_id, result)?;

        match output {
            Some(path) => {
                write_document(&path, &outcome.document)?;
                info!("Success: {}", path.display());
            }
            None => println!(
                "{}",
                serde_json::to_string_pretty(&outcome.document)
                    .context("Failed to serialize translated document")?
            ),
        }
        Ok(outcome)
    }

    /// Persisted summary of a translation
    pub async fn status(&self, translation_id: &str) -> Result<Option<SessionInfo>> {
        Ok(self.orchestrator().status(translation_id).await?)
    }

    /// Delete everything stored for a translation
    pub async fn discard(&self, translation_id: &str) -> Result<()> {
        Ok(self.orchestrator().discard(translation_id).await?)
    }

    fn orchestrator(&self) -> TranslationOrchestrator {
        TranslationOrchestrator::new(
            self.store.clone(),
            self.translator.clone(),
            self.limiter.clone(),
            self.progress.clone(),
            OrchestratorOptions::from_config(&self.config),
        )
    }

    fn orchestrator_with_bar(
        &self,
        translation_id: &str,
    ) -> (TranslationOrchestrator, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} batches ({percent}%) {msg}")
            .or_else(|_| ProgressStyle::default_bar().template("{spinner} [{elapsed_precise}] [{bar:40}] {pos}/{len} ({percent}%) {msg}"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style.progress_chars("█▓▒░"));
        bar.set_message("Translating");

        let consumer = tokio::spawn(drive_bar(
            rx,
            bar,
            self.progress.clone(),
            translation_id.to_string(),
        ));
        (self.orchestrator().with_sink(tx), consumer)
    }

    /// Turn an orchestrator error into a message that says how to continue
    fn report(
        &self,
        translation_id: &str,
        result: Result<TranslationOutcome, TranslationError>,
    ) -> Result<TranslationOutcome> {
        match result {
            Ok(outcome) => {
                if outcome.from_cache {
                    info!("Translation {} was already complete", translation_id);
                }
                if outcome.degraded_batches > 0 {
                    warn!(
                        "{} of {} batches needed alignment fallback",
                        outcome.degraded_batches, outcome.total_batches
                    );
                }
                info!("Tokens consumed: {}", outcome.tokens_consumed);
                Ok(outcome)
            }
            Err(e) if e.is_resumable() => {
                let completed = e.completed_batches().unwrap_or_default();
                let total = e.total_batches().unwrap_or_default();
                Err(anyhow!(e).context(format!(
                    "{}/{} batches are saved; run `parabatch retry {}` to continue",
                    completed, total, translation_id
                )))
            }
            Err(e) => Err(anyhow!(e)),
        }
    }

    fn default_output_path(&self, input: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "document".to_string());
        input.with_file_name(format!("{}.{}.json", stem, self.config.target_language))
    }
}

/// Wait for the progress bar task once its orchestrator is gone
async fn close_bar(consumer: JoinHandle<()>) {
    if let Err(e) = consumer.await {
        warn!("Progress display task failed: {}", e);
    }
}

async fn drive_bar(
    mut events: mpsc::UnboundedReceiver<ProgressEvent>,
    bar: ProgressBar,
    progress: Arc<ProgressRegistry>,
    translation_id: String,
) {
    while let Some(event) = events.recv().await {
        bar.set_length(event.total_batches as u64);
        match event.kind {
            ProgressEventKind::Batch => {
                bar.set_position(event.batch_index as u64 + 1);
                let rate = progress
                    .snapshot(&translation_id)
                    .map(|s| s.tokens_per_second)
                    .unwrap_or_default();
                bar.set_message(format!("{} tokens, {:.1} tok/s", event.total_tokens, rate));
            }
            ProgressEventKind::Completed => {
                bar.set_position(event.total_batches as u64);
                bar.finish_and_clear();
            }
            ProgressEventKind::Failed => bar.abandon_with_message("Stopped"),
        }
    }
}

/// Read a JSON document from disk
pub fn read_document(path: &Path) -> Result<Document> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read input document: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse input document: {}", path.display()))
}

/// Write a JSON document to disk
pub fn write_document(path: &Path, document: &Document) -> Result<()> {
    let json = serde_json::to_string_pretty(document)
        .context("Failed to serialize translated document")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write output document: {}", path.display()))
}
