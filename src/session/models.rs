/*!
 * Persisted progress record and session DTOs.
 */

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a translation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    /// Batches remain to be translated
    #[default]
    InProgress,
    /// Every batch is done and the result is stored
    Completed,
    /// The last attempt failed; retry resumes from the persisted position
    Failed,
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressStatus::InProgress => write!(f, "in_progress"),
            ProgressStatus::Completed => write!(f, "completed"),
            ProgressStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for ProgressStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(ProgressStatus::InProgress),
            "completed" => Ok(ProgressStatus::Completed),
            "failed" => Ok(ProgressStatus::Failed),
            _ => Err(format!("Unknown progress status: {}", s)),
        }
    }
}

/// Durable state needed to resume a translation.
///
/// `translated_paragraphs` only gains or overwrites keys for the lifetime of
/// one record, and `completed_batch_count` only grows while the batch plan
/// stays the same. A re-plan rebases the count onto the new plan; a full
/// restart replaces the record instead of rewinding it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationProgressRecord {
    /// Translation id this record belongs to
    pub translation_id: String,
    /// Lifecycle status
    #[serde(default)]
    pub status: ProgressStatus,
    /// Content hash of the source document the batches were planned from
    #[serde(default)]
    pub source_hash: String,
    /// Target language code
    #[serde(default)]
    pub target_language: String,
    /// Model that produced the translations
    #[serde(default)]
    pub model: String,
    /// Index of the next batch to attempt
    pub completed_batch_count: usize,
    /// Number of batches in the plan
    pub total_batch_count: usize,
    /// Translated text keyed by `"{item_index}-{paragraph_index}"`
    #[serde(default)]
    pub translated_paragraphs: HashMap<String, String>,
    /// Output tokens paid for so far
    #[serde(default)]
    pub total_tokens_consumed: u64,
    /// Batches whose alignment fell below perfect
    #[serde(default)]
    pub degraded_batches: usize,
    /// Creation time (RFC 3339)
    pub created_at: String,
    /// Last write time (RFC 3339)
    pub updated_at: String,
    /// Message of the most recent failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl TranslationProgressRecord {
    /// Create an empty record for a freshly planned translation
    pub fn new(
        translation_id: impl Into<String>,
        source_hash: impl Into<String>,
        total_batch_count: usize,
        target_language: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            translation_id: translation_id.into(),
            status: ProgressStatus::InProgress,
            source_hash: source_hash.into(),
            target_language: target_language.into(),
            model: model.into(),
            completed_batch_count: 0,
            total_batch_count,
            translated_paragraphs: HashMap::new(),
            total_tokens_consumed: 0,
            degraded_batches: 0,
            created_at: now.clone(),
            updated_at: now,
            last_error: None,
        }
    }

    /// Whether the translation finished
    pub fn is_completed(&self) -> bool {
        self.status == ProgressStatus::Completed
    }

    /// Batches still to translate
    pub fn remaining_batches(&self) -> usize {
        self.total_batch_count
            .saturating_sub(self.completed_batch_count)
    }

    /// Completion percentage by batch count
    pub fn completion_percentage(&self) -> f64 {
        if self.total_batch_count == 0 {
            return if self.is_completed() { 100.0 } else { 0.0 };
        }
        (self.completed_batch_count as f64 / self.total_batch_count as f64 * 100.0).min(100.0)
    }

    /// Merge translated paragraphs; existing keys are overwritten, never removed
    pub fn merge_paragraphs<I>(&mut self, paragraphs: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.translated_paragraphs.extend(paragraphs);
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().to_rfc3339();
    }
}

/// Parameters for starting or resuming a translation
#[derive(Debug, Clone)]
pub struct SessionBeginParams {
    /// Translation id
    pub translation_id: String,
    /// Content hash of the current source document
    pub source_hash: String,
    /// Paragraph keys of each batch in the current plan, in order
    pub batch_keys: Vec<Vec<String>>,
    /// Target language code
    pub target_language: String,
    /// Model name
    pub model: String,
    /// Resume even when the source hash differs from the persisted one
    pub allow_stale_resume: bool,
}

impl SessionBeginParams {
    /// Number of batches in the current plan
    pub fn total_batch_count(&self) -> usize {
        self.batch_keys.len()
    }

    /// Leading batches whose paragraphs are all already translated in `record`
    pub fn covered_batches(&self, record: &TranslationProgressRecord) -> usize {
        self.batch_keys
            .iter()
            .take_while(|keys| {
                keys.iter()
                    .all(|key| record.translated_paragraphs.contains_key(key))
            })
            .count()
    }
}

/// Why a persisted record was thrown away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    /// The source document changed since the record was written
    SourceChanged,
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartReason::SourceChanged => write!(f, "source document changed"),
        }
    }
}

/// Result of attempting to resume a translation
#[derive(Debug, Clone)]
pub enum ResumeResult {
    /// No record existed; a fresh one was created
    Started(TranslationProgressRecord),
    /// An unfinished record was picked up
    Resumed(TranslationProgressRecord),
    /// The translation is already complete
    AlreadyCompleted(TranslationProgressRecord),
    /// The batch plan changed; saved paragraphs were kept and the resume
    /// position rebased onto the new plan
    Replanned(TranslationProgressRecord),
    /// A stale record was discarded and replaced by a fresh one
    Restarted {
        /// The fresh record
        record: TranslationProgressRecord,
        /// Why the old one was discarded
        reason: RestartReason,
    },
}

impl ResumeResult {
    /// The record to continue with
    pub fn record(&self) -> &TranslationProgressRecord {
        match self {
            ResumeResult::Started(record)
            | ResumeResult::Resumed(record)
            | ResumeResult::AlreadyCompleted(record)
            | ResumeResult::Replanned(record)
            | ResumeResult::Restarted { record, .. } => record,
        }
    }

    /// Take ownership of the record
    pub fn into_record(self) -> TranslationProgressRecord {
        match self {
            ResumeResult::Started(record)
            | ResumeResult::Resumed(record)
            | ResumeResult::AlreadyCompleted(record)
            | ResumeResult::Replanned(record)
            | ResumeResult::Restarted { record, .. } => record,
        }
    }
}

/// Summary of a translation for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Translation id
    pub translation_id: String,
    /// Lifecycle status
    pub status: ProgressStatus,
    /// Batches done
    pub completed_batches: usize,
    /// Batches planned
    pub total_batches: usize,
    /// Paragraphs with a stored translation
    pub translated_paragraphs: usize,
    /// Output tokens paid for so far
    pub total_tokens_consumed: u64,
    /// Batches resolved with degraded alignment
    pub degraded_batches: usize,
    /// Completion percentage by batch count
    pub percentage: f64,
    /// Target language code
    pub target_language: String,
    /// Model used
    pub model: String,
    /// Last write time
    pub updated_at: String,
    /// Most recent failure, if any
    pub last_error: Option<String>,
}

impl SessionInfo {
    /// Build the summary of a record
    pub fn from_record(record: &TranslationProgressRecord) -> Self {
        Self {
            translation_id: record.translation_id.clone(),
            status: record.status,
            completed_batches: record.completed_batch_count,
            total_batches: record.total_batch_count,
            translated_paragraphs: record.translated_paragraphs.len(),
            total_tokens_consumed: record.total_tokens_consumed,
            degraded_batches: record.degraded_batches,
            percentage: record.completion_percentage(),
            target_language: record.target_language.clone(),
            model: record.model.clone(),
            updated_at: record.updated_at.clone(),
            last_error: record.last_error.clone(),
        }
    }
}
