/*!
 * Session manager for the translation progress lifecycle.
 *
 * This module handles:
 * - Creating progress records and resuming persisted ones
 * - Invalidating records whose source document changed
 * - Rebasing records onto a changed batch plan without losing saved paragraphs
 * - Durable writes with bounded retry before a persistence error surfaces
 */

use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::app_config::TranslationCommonConfig;
use crate::database::store::{DocumentStore, get_json, keys, put_json};
use crate::errors::StoreError;

use super::models::{
    ProgressStatus, RestartReason, ResumeResult, SessionBeginParams, SessionInfo,
    TranslationProgressRecord,
};

/// Retry policy for durable writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistPolicy {
    /// Retries after the first failed attempt
    pub retry_count: u32,
    /// Delay before the first retry; doubles on each further retry
    pub initial_backoff: Duration,
}

impl Default for PersistPolicy {
    fn default() -> Self {
        Self {
            retry_count: 3,
            initial_backoff: Duration::from_millis(200),
        }
    }
}

impl PersistPolicy {
    /// Build the policy from configuration
    pub fn from_config(common: &TranslationCommonConfig) -> Self {
        Self {
            retry_count: common.persist_retry_count,
            initial_backoff: Duration::from_millis(common.persist_retry_backoff_ms),
        }
    }
}

/// Owns reads and writes of `progress:{id}` records
#[derive(Debug, Clone)]
pub struct SessionManager {
    store: Arc<dyn DocumentStore>,
    policy: PersistPolicy,
}

impl SessionManager {
    /// Create a manager over a document store
    pub fn new(store: Arc<dyn DocumentStore>, policy: PersistPolicy) -> Self {
        Self { store, policy }
    }

    /// The store records are written to
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Load the persisted record for a translation
    pub async fn load(
        &self,
        translation_id: &str,
    ) -> Result<Option<TranslationProgressRecord>, StoreError> {
        get_json(self.store.as_ref(), &keys::progress(translation_id)).await
    }

    /// Load or create the record for a translation about to run
    pub async fn begin(&self, params: SessionBeginParams) -> Result<ResumeResult, StoreError> {
        let existing = self.load(&params.translation_id).await?;

        let Some(record) = existing else {
            let record = self.fresh_record(&params);
            self.persist(&record).await?;
            info!(
                "Started translation {} ({} batches)",
                params.translation_id,
                params.total_batch_count()
            );
            return Ok(ResumeResult::Started(record));
        };

        let source_changed = record.source_hash != params.source_hash;
        if source_changed && !params.allow_stale_resume {
            warn!(
                "Source document for {} changed since the last run, discarding {} completed batch(es)",
                params.translation_id, record.completed_batch_count
            );
            return self.restart(&params, RestartReason::SourceChanged).await;
        }

        if record.is_completed() {
            debug!("Translation {} already completed", params.translation_id);
            return Ok(ResumeResult::AlreadyCompleted(record));
        }

        if record.total_batch_count != params.total_batch_count() {
            return self.replan(record, &params).await;
        }

        if source_changed {
            warn!(
                "Resuming {} against a changed source document",
                params.translation_id
            );
        }

        info!(
            "Resuming translation {} at batch {}/{}",
            params.translation_id, record.completed_batch_count, record.total_batch_count
        );
        let mut resumed = record;
        resumed.status = ProgressStatus::InProgress;
        resumed.touch();
        self.persist(&resumed).await?;

        Ok(ResumeResult::Resumed(resumed))
    }

    /// Merge a finished batch and advance the resume position.
    ///
    /// `record` is only updated once the write succeeded, so it always
    /// mirrors what is durable.
    pub async fn record_batch_success<I>(
        &self,
        record: &mut TranslationProgressRecord,
        paragraphs: I,
        tokens_consumed: u64,
        degraded: bool,
    ) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut updated = record.clone();
        updated.merge_paragraphs(paragraphs);
        updated.completed_batch_count += 1;
        updated.total_tokens_consumed += tokens_consumed;
        if degraded {
            updated.degraded_batches += 1;
        }
        updated.status = ProgressStatus::InProgress;
        updated.last_error = None;
        updated.touch();

        self.persist(&updated).await?;
        *record = updated;
        Ok(())
    }

    /// Persist work so far after a failed batch
    pub async fn record_batch_failure(
        &self,
        record: &mut TranslationProgressRecord,
        error: &str,
        tokens_consumed: u64,
    ) -> Result<(), StoreError> {
        let mut updated = record.clone();
        updated.status = ProgressStatus::Failed;
        updated.total_tokens_consumed += tokens_consumed;
        updated.last_error = Some(error.to_string());
        updated.touch();

        self.persist(&updated).await?;
        *record = updated;
        Ok(())
    }

    /// Mark a translation as finished
    pub async fn mark_completed(
        &self,
        record: &mut TranslationProgressRecord,
    ) -> Result<(), StoreError> {
        let mut updated = record.clone();
        updated.status = ProgressStatus::Completed;
        updated.last_error = None;
        updated.touch();

        self.persist(&updated).await?;
        *record = updated;
        Ok(())
    }

    /// Delete the record for a translation
    pub async fn discard(&self, translation_id: &str) -> Result<(), StoreError> {
        debug!("Discarding progress for {}", translation_id);
        self.store.delete(&keys::progress(translation_id)).await
    }

    /// Summary of a translation, if a record exists
    pub async fn status(&self, translation_id: &str) -> Result<Option<SessionInfo>, StoreError> {
        Ok(self
            .load(translation_id)
            .await?
            .map(|record| SessionInfo::from_record(&record)))
    }

    /// Write a record, retrying with doubling backoff
    pub async fn persist(&self, record: &TranslationProgressRecord) -> Result<(), StoreError> {
        let key = keys::progress(&record.translation_id);
        let mut backoff = self.policy.initial_backoff;
        let mut attempt = 0;

        loop {
            match put_json(self.store.as_ref(), &key, record).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.policy.retry_count => {
                    attempt += 1;
                    warn!(
                        "Failed to persist progress for {} (attempt {}/{}): {}. Retrying in {:?}",
                        record.translation_id,
                        attempt,
                        self.policy.retry_count + 1,
                        e,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn fresh_record(&self, params: &SessionBeginParams) -> TranslationProgressRecord {
        TranslationProgressRecord::new(
            params.translation_id.clone(),
            params.source_hash.clone(),
            params.total_batch_count(),
            params.target_language.clone(),
            params.model.clone(),
        )
    }

    /// Keep every saved paragraph and resume after the leading batches of the
    /// new plan that they already cover
    async fn replan(
        &self,
        record: TranslationProgressRecord,
        params: &SessionBeginParams,
    ) -> Result<ResumeResult, StoreError> {
        let covered = params.covered_batches(&record);
        warn!(
            "Batch plan for {} changed ({} -> {} batches), {} batch(es) already translated",
            params.translation_id,
            record.total_batch_count,
            params.total_batch_count(),
            covered
        );

        let mut replanned = record;
        replanned.total_batch_count = params.total_batch_count();
        replanned.completed_batch_count = covered;
        replanned.status = ProgressStatus::InProgress;
        replanned.touch();
        self.persist(&replanned).await?;

        Ok(ResumeResult::Replanned(replanned))
    }

    async fn restart(
        &self,
        params: &SessionBeginParams,
        reason: RestartReason,
    ) -> Result<ResumeResult, StoreError> {
        self.discard(&params.translation_id).await?;
        let record = self.fresh_record(params);
        self.persist(&record).await?;
        Ok(ResumeResult::Restarted { record, reason })
    }
}
