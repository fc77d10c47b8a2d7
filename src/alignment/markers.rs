/*!
 * Positional marker codec for batch requests.
 *
 * Outgoing batch text has each paragraph followed by a `<<PARA_k>>` marker,
 * where `k` is the paragraph's 0-based position in the batch. The model is
 * asked to echo the markers; decoding recovers each paragraph as the text
 * between the previous marker and marker `k`.
 *
 * Models drop, duplicate, renumber and occasionally translate markers, so the
 * decoder never fails: it reports what it found and lets the fallback
 * resolver decide how to degrade.
 */

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

/// Matches a marker, tolerating the spacing and underscore variations models produce
static MARKER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<<\s*PARA[_ ]?(\d+)\s*>>").expect("Invalid marker regex")
});

/// Matches damaged marker fragments left in recovered text
static STRAY_MARKER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<<\s*/?\s*PARA[^<>]{0,12}>>").expect("Invalid stray marker regex")
});

/// Render the marker for a batch ordinal
pub fn marker(ordinal: usize) -> String {
    format!("<<PARA_{}>>", ordinal)
}

/// Remove any marker or marker fragment from `text`
pub fn strip_markers(text: &str) -> String {
    let without_markers = MARKER_REGEX.replace_all(text, "");
    STRAY_MARKER_REGEX.replace_all(&without_markers, "").into_owned()
}

/// Outcome of decoding one batch response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerExtractionResult {
    /// Recovered text per ordinal; `None` where the marker was missing
    pub recovered: Vec<Option<String>>,
    /// Ordinals in `[0, n)` with no marker in the response
    pub missing: BTreeSet<usize>,
    /// Ordinals whose marker appeared more than once
    pub duplicates: BTreeSet<usize>,
}

impl MarkerExtractionResult {
    /// Number of paragraphs the batch was expected to contain
    pub fn expected_count(&self) -> usize {
        self.recovered.len()
    }

    /// Number of ordinals that were recovered
    pub fn found_count(&self) -> usize {
        self.recovered.iter().filter(|r| r.is_some()).count()
    }

    /// True when every marker appeared exactly once
    pub fn is_perfect(&self) -> bool {
        self.missing.is_empty() && self.duplicates.is_empty()
    }
}

/// Encoder/decoder for marked batch text
pub struct MarkerCodec;

impl MarkerCodec {
    /// Join paragraphs into one request body.
    ///
    /// A single paragraph is sent unmarked, since there is nothing to align.
    pub fn encode<S: AsRef<str>>(paragraphs: &[S]) -> String {
        if paragraphs.len() == 1 {
            return paragraphs[0].as_ref().to_string();
        }

        paragraphs
            .iter()
            .enumerate()
            .map(|(ordinal, text)| format!("{}\n{}", text.as_ref(), marker(ordinal)))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Recover per-paragraph text from a response expected to hold `expected_count` paragraphs
    pub fn decode(response: &str, expected_count: usize) -> MarkerExtractionResult {
        let mut recovered: Vec<Option<String>> = vec![None; expected_count];
        let mut occurrences = vec![0usize; expected_count];
        let mut segment_start = 0;
        let mut out_of_range = 0usize;

        for captures in MARKER_REGEX.captures_iter(response) {
            let Some(whole) = captures.get(0) else {
                continue;
            };
            let segment = &response[segment_start..whole.start()];
            segment_start = whole.end();

            let ordinal = match captures.get(1).and_then(|m| m.as_str().parse::<usize>().ok()) {
                Some(ordinal) if ordinal < expected_count => ordinal,
                _ => {
                    out_of_range += 1;
                    continue;
                }
            };

            occurrences[ordinal] += 1;
            if recovered[ordinal].is_none() {
                recovered[ordinal] = Some(strip_markers(segment).trim().to_string());
            }
        }

        // An unmarked single-paragraph response is the paragraph itself
        if expected_count == 1 && occurrences[0] == 0 {
            let text = strip_markers(response).trim().to_string();
            if !text.is_empty() {
                occurrences[0] = 1;
                recovered[0] = Some(text);
            }
        }

        let missing: BTreeSet<usize> = (0..expected_count)
            .filter(|&ordinal| occurrences[ordinal] == 0)
            .collect();
        let duplicates: BTreeSet<usize> = (0..expected_count)
            .filter(|&ordinal| occurrences[ordinal] > 1)
            .collect();

        let trailing = response[segment_start..].trim();
        debug!(
            "Marker decode: expected={}, missing={:?}, duplicates={:?}, out_of_range={}, trailing_chars={}",
            expected_count,
            missing,
            duplicates,
            out_of_range,
            if expected_count == 1 { 0 } else { trailing.len() }
        );

        MarkerExtractionResult {
            recovered,
            missing,
            duplicates,
        }
    }
}
