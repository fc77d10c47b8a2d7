/*!
 * Escalating fallback for damaged marker alignment.
 *
 * Alignment confidence is treated as a continuum. Depending on how many
 * markers were lost, the resolver fills gaps with source text, fuzzy-matches
 * response lines, zips lines positionally, or gives up and returns the
 * source. The output always has exactly one paragraph per batch slot.
 */

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::markers::{MarkerExtractionResult, strip_markers};

/// Minimum similarity for a fuzzy line match to be accepted
pub const MATCH_THRESHOLD: f64 = 0.5;

const MINOR_RATIO: f64 = 0.10;
const MODERATE_RATIO: f64 = 0.30;

/// Severity of alignment loss, from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FallbackLevel {
    /// Every marker present exactly once
    Perfect,
    /// Under 10% missing; gaps filled with source text
    Minor,
    /// Under 30% missing; gaps fuzzy-matched against response lines
    Moderate,
    /// Some markers found; whole batch zipped line by line
    Severe,
    /// No markers found; source text returned
    CompleteFailure,
}

impl fmt::Display for FallbackLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Perfect => "perfect",
            Self::Minor => "minor",
            Self::Moderate => "moderate",
            Self::Severe => "severe",
            Self::CompleteFailure => "complete-failure",
        };
        f.write_str(name)
    }
}

/// Best-effort paragraphs for one batch
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackResult {
    /// Severity tier that produced the paragraphs
    pub level: FallbackLevel,
    /// One entry per batch slot
    pub paragraphs: Vec<String>,
    /// Markers that were missing
    pub missing_count: usize,
    /// Paragraphs in the batch
    pub total_count: usize,
    /// Human-readable account of the strategy applied
    pub strategy: String,
}

impl FallbackResult {
    /// True when alignment was not perfect
    pub fn is_degraded(&self) -> bool {
        self.level > FallbackLevel::Perfect
    }
}

/// Picks the response line that best corresponds to a source paragraph
pub trait SimilarityMatcher: Send + Sync {
    /// Return the index and score of the best candidate, if any
    fn best_match(&self, candidates: &[&str], original: &str) -> Option<(usize, f64)>;
}

/// Scores candidates by the ratio of the shorter to the longer character length.
///
/// This is a cheap placeholder; edit distance or token overlap would be
/// stronger. It only works because translations tend to keep length.
#[derive(Debug, Clone, Copy, Default)]
pub struct LengthRatioMatcher;

impl LengthRatioMatcher {
    /// Similarity in `[0, 1]`
    pub fn score(candidate: &str, original: &str) -> f64 {
        let a = candidate.chars().count();
        let b = original.chars().count();
        if a == 0 && b == 0 {
            return 1.0;
        }
        a.min(b) as f64 / a.max(b) as f64
    }
}

impl SimilarityMatcher for LengthRatioMatcher {
    fn best_match(&self, candidates: &[&str], original: &str) -> Option<(usize, f64)> {
        candidates
            .iter()
            .enumerate()
            .map(|(i, candidate)| (i, Self::score(candidate, original)))
            .fold(None, |best: Option<(usize, f64)>, (i, score)| match best {
                Some((_, best_score)) if best_score >= score => best,
                _ => Some((i, score)),
            })
    }
}

/// Non-empty, marker-free lines of a raw response
fn response_lines(raw: &str) -> Vec<String> {
    raw.lines()
        .map(|line| strip_markers(line).trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

/// Turns a partial marker extraction into a full paragraph list
pub struct FallbackResolver<M: SimilarityMatcher = LengthRatioMatcher> {
    matcher: M,
}

impl Default for FallbackResolver<LengthRatioMatcher> {
    fn default() -> Self {
        Self::new(LengthRatioMatcher)
    }
}

impl<M: SimilarityMatcher> FallbackResolver<M> {
    /// Create a resolver with a custom similarity matcher
    pub fn new(matcher: M) -> Self {
        Self { matcher }
    }

    /// Resolve a batch.
    ///
    /// * `extraction` - marker decode result for the response
    /// * `source` - original paragraph texts, one per batch slot
    /// * `raw` - the unmodified response text
    pub fn resolve(
        &self,
        extraction: &MarkerExtractionResult,
        source: &[String],
        raw: &str,
    ) -> FallbackResult {
        let total_count = source.len();
        let missing_count = extraction.missing.len().min(total_count);
        let duplicate_count = extraction.duplicates.len();
        let missing_ratio = if total_count == 0 {
            1.0
        } else {
            missing_count as f64 / total_count as f64
        };

        let recovered_at = |i: usize| extraction.recovered.get(i).cloned().flatten();

        let (level, paragraphs, strategy) = if total_count > 0
            && missing_count == 0
            && duplicate_count == 0
        {
            let paragraphs = (0..total_count)
                .map(|i| recovered_at(i).unwrap_or_else(|| source[i].clone()))
                .collect();
            (FallbackLevel::Perfect, paragraphs, "all markers recovered".to_string())
        } else if missing_ratio < MINOR_RATIO {
            let paragraphs = (0..total_count)
                .map(|i| recovered_at(i).unwrap_or_else(|| source[i].clone()))
                .collect();
            (
                FallbackLevel::Minor,
                paragraphs,
                format!(
                    "filled {} missing paragraph(s) with source text ({} duplicate marker(s))",
                    missing_count, duplicate_count
                ),
            )
        } else if missing_ratio < MODERATE_RATIO {
            self.resolve_moderate(extraction, source, raw, missing_count)
        } else if missing_ratio < 1.0 {
            let lines = response_lines(raw);
            let paragraphs = (0..total_count)
                .map(|i| lines.get(i).cloned().unwrap_or_else(|| source[i].clone()))
                .collect();
            (
                FallbackLevel::Severe,
                paragraphs,
                format!(
                    "abandoned markers, zipped {} response line(s) onto {} paragraph(s)",
                    lines.len().min(total_count),
                    total_count
                ),
            )
        } else {
            (
                FallbackLevel::CompleteFailure,
                source.to_vec(),
                "no markers recovered, kept source text".to_string(),
            )
        };

        if level > FallbackLevel::Perfect {
            warn!(
                "Alignment degraded to {} ({}/{} markers missing): {}",
                level, missing_count, total_count, strategy
            );
        }

        FallbackResult {
            level,
            paragraphs,
            missing_count,
            total_count,
            strategy,
        }
    }

    fn resolve_moderate(
        &self,
        extraction: &MarkerExtractionResult,
        source: &[String],
        raw: &str,
        missing_count: usize,
    ) -> (FallbackLevel, Vec<String>, String) {
        let recovered: Vec<&str> = extraction
            .recovered
            .iter()
            .filter_map(|r| r.as_deref())
            .collect();
        // Lines that already belong to a recovered paragraph are not candidates
        let lines: Vec<String> = response_lines(raw)
            .into_iter()
            .filter(|line| !recovered.iter().any(|r| r == line))
            .collect();
        let mut candidates: Vec<&str> = lines.iter().map(String::as_str).collect();

        let mut matched = 0usize;
        let mut paragraphs = Vec::with_capacity(source.len());
        for (i, original) in source.iter().enumerate() {
            if let Some(text) = extraction.recovered.get(i).cloned().flatten() {
                paragraphs.push(text);
                continue;
            }
            match self.matcher.best_match(&candidates, original) {
                Some((index, score)) if score > MATCH_THRESHOLD && index < candidates.len() => {
                    debug!("Matched missing paragraph {} with score {:.2}", i, score);
                    matched += 1;
                    // A line answers one paragraph at most
                    paragraphs.push(candidates.remove(index).to_string());
                }
                _ => paragraphs.push(original.clone()),
            }
        }

        (
            FallbackLevel::Moderate,
            paragraphs,
            format!(
                "fuzzy-matched {}/{} missing paragraph(s) against response lines",
                matched, missing_count
            ),
        )
    }
}
