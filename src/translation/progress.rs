/*!
 * Live throughput and ETA estimation.
 *
 * The registry holds one `RealtimeProgress` per active translation id. Token
 * counts stream in on every provider delta; the smoothed rate is only
 * recomputed once per sampling interval so bursty deltas do not make the
 * ETA jump around. Entries are removed explicitly when a translation ends.
 */

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::app_config::TranslationCommonConfig;

/// Tuning for the estimator and for durable progress snapshots
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSettings {
    /// Updates closer together than this do not produce a rate sample
    pub min_sample_interval: Duration,
    /// Weight of the previous smoothed rate, in `[0, 1)`
    pub alpha: f64,
    /// Minimum spacing of durable progress snapshots
    pub persist_interval: Duration,
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self {
            min_sample_interval: Duration::from_millis(500),
            alpha: 0.7,
            persist_interval: Duration::from_secs(3),
        }
    }
}

impl ProgressSettings {
    /// Build the settings from configuration
    pub fn from_config(common: &TranslationCommonConfig) -> Self {
        Self {
            min_sample_interval: Duration::from_millis(common.min_sample_interval_ms),
            alpha: common.smoothing_alpha,
            persist_interval: Duration::from_millis(common.progress_persist_interval_ms),
        }
    }
}

/// In-memory progress of one running translation
#[derive(Debug, Clone)]
pub struct RealtimeProgress {
    /// Tokens produced so far, including tokens from earlier runs
    pub total_tokens: u64,
    /// Expected tokens for the whole document
    pub estimated_total_tokens: u64,
    /// Smoothed throughput
    pub tokens_per_second: f64,
    /// Time left at the smoothed rate; unknown until a rate is measured
    pub estimated_remaining_ms: Option<u64>,
    /// When tracking began
    pub start_time: Instant,
    /// When the last update arrived
    pub last_update_time: Instant,
    last_sample_time: Instant,
    last_sample_tokens: u64,
    has_sample: bool,
    last_persist: Option<Instant>,
}

impl RealtimeProgress {
    fn new(estimated_total_tokens: u64, resume_tokens: u64, now: Instant) -> Self {
        Self {
            total_tokens: resume_tokens,
            estimated_total_tokens,
            tokens_per_second: 0.0,
            estimated_remaining_ms: None,
            start_time: now,
            last_update_time: now,
            last_sample_time: now,
            last_sample_tokens: resume_tokens,
            has_sample: false,
            last_persist: None,
        }
    }

    fn record(&mut self, total_tokens: u64, now: Instant, settings: &ProgressSettings) {
        self.total_tokens = self.total_tokens.max(total_tokens);
        self.last_update_time = now;

        let elapsed = now.saturating_duration_since(self.last_sample_time);
        if elapsed < settings.min_sample_interval || elapsed.is_zero() {
            return;
        }

        let delta = self.total_tokens.saturating_sub(self.last_sample_tokens) as f64;
        let instantaneous = delta / elapsed.as_secs_f64();
        self.tokens_per_second = if self.has_sample {
            settings.alpha * self.tokens_per_second + (1.0 - settings.alpha) * instantaneous
        } else {
            instantaneous
        };
        self.has_sample = true;
        self.last_sample_time = now;
        self.last_sample_tokens = self.total_tokens;

        if self.tokens_per_second > 0.0 {
            let remaining = self
                .estimated_total_tokens
                .saturating_sub(self.total_tokens) as f64;
            self.estimated_remaining_ms =
                Some((remaining / self.tokens_per_second * 1000.0).round() as u64);
        }
    }

    /// Read model of this entry
    pub fn snapshot(&self) -> ProgressSnapshot {
        let percentage = if self.estimated_total_tokens == 0 {
            100.0
        } else {
            (self.total_tokens as f64 / self.estimated_total_tokens as f64 * 100.0).min(100.0)
        };

        ProgressSnapshot {
            total_tokens: self.total_tokens,
            estimated_total_tokens: self.estimated_total_tokens,
            tokens_per_second: self.tokens_per_second,
            estimated_remaining_ms: self.estimated_remaining_ms,
            percentage,
            elapsed_ms: self
                .last_update_time
                .saturating_duration_since(self.start_time)
                .as_millis() as u64,
        }
    }
}

/// Exposed view of a translation's live progress
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub total_tokens: u64,
    pub estimated_total_tokens: u64,
    pub tokens_per_second: f64,
    pub estimated_remaining_ms: Option<u64>,
    /// `min(100, total / estimated * 100)`
    pub percentage: f64,
    pub elapsed_ms: u64,
}

/// Per-translation progress entries with explicit eviction
#[derive(Debug, Default)]
pub struct ProgressRegistry {
    settings: ProgressSettings,
    active: Mutex<HashMap<String, RealtimeProgress>>,
}

impl ProgressRegistry {
    /// Create an empty registry
    pub fn new(settings: ProgressSettings) -> Self {
        Self {
            settings,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Registry settings
    pub fn settings(&self) -> &ProgressSettings {
        &self.settings
    }

    /// Begin tracking a translation, replacing any previous entry for the id
    pub fn start(&self, translation_id: &str, estimated_total_tokens: u64, resume_tokens: u64) {
        self.active.lock().insert(
            translation_id.to_string(),
            RealtimeProgress::new(estimated_total_tokens, resume_tokens, Instant::now()),
        );
    }

    /// Report the running token total for a translation
    pub fn update(&self, translation_id: &str, total_tokens: u64) -> Option<ProgressSnapshot> {
        self.update_at(translation_id, total_tokens, Instant::now())
    }

    /// Report the running token total as of `now`
    pub fn update_at(
        &self,
        translation_id: &str,
        total_tokens: u64,
        now: Instant,
    ) -> Option<ProgressSnapshot> {
        let mut active = self.active.lock();
        let entry = active.get_mut(translation_id)?;
        entry.record(total_tokens, now, &self.settings);
        Some(entry.snapshot())
    }

    /// Current view of a translation
    pub fn snapshot(&self, translation_id: &str) -> Option<ProgressSnapshot> {
        self.active
            .lock()
            .get(translation_id)
            .map(RealtimeProgress::snapshot)
    }

    /// Stop tracking and return the final view
    pub fn complete(&self, translation_id: &str) -> Option<ProgressSnapshot> {
        self.active
            .lock()
            .remove(translation_id)
            .map(|entry| entry.snapshot())
    }

    /// Whether a durable snapshot is due; claims the slot when it is
    pub fn should_persist(&self, translation_id: &str) -> bool {
        let now = Instant::now();
        let mut active = self.active.lock();
        let Some(entry) = active.get_mut(translation_id) else {
            return false;
        };

        let due = match entry.last_persist {
            Some(last) => now.saturating_duration_since(last) >= self.settings.persist_interval,
            None => true,
        };
        if due {
            entry.last_persist = Some(now);
        }
        due
    }

    /// Number of translations being tracked
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }
}
