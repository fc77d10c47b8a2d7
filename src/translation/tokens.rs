/*!
 * Heuristic token estimation.
 *
 * CJK ideographs cost half a token each, every other character a quarter,
 * each share rounded up separately. The result is a budgeting estimate for
 * batch planning and ETA display only; it is never used for billing.
 */

/// Returns true for characters in the CJK ideograph blocks
fn is_cjk_ideograph(ch: char) -> bool {
    matches!(ch as u32,
        0x4E00..=0x9FFF      // CJK Unified Ideographs
        | 0x3400..=0x4DBF    // Extension A
        | 0xF900..=0xFAFF    // Compatibility Ideographs
        | 0x20000..=0x2A6DF  // Extension B
        | 0x2A700..=0x2EBEF  // Extensions C-F
        | 0x30000..=0x3134F  // Extension G
    )
}

/// Estimate the number of tokens in `text`
pub fn estimate_tokens(text: &str) -> usize {
    let (cjk, other) = text.chars().fold((0usize, 0usize), |(cjk, other), ch| {
        if is_cjk_ideograph(ch) {
            (cjk + 1, other)
        } else {
            (cjk, other + 1)
        }
    });

    cjk.div_ceil(2) + other.div_ceil(4)
}
