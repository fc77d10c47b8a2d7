/*!
 * Paragraph alignment for batch responses.
 *
 * - `markers`: injects positional markers and recovers per-paragraph text
 * - `fallback`: degrades gracefully when markers are damaged
 */

pub mod fallback;
pub mod markers;

pub use fallback::{
    FallbackLevel, FallbackResolver, FallbackResult, LengthRatioMatcher, SimilarityMatcher,
};
pub use markers::{MarkerCodec, MarkerExtractionResult};
