/*!
 * Batch planning.
 *
 * Paragraphs are packed greedily, in flattening order, into batches whose
 * estimated token sum stays within the provider's safe budget. A paragraph
 * that alone exceeds the budget is sent as a singleton batch rather than
 * being split. Batch order is the resumption order.
 */

use log::debug;

use super::document::Paragraph;

/// Token margin reserved for instructions and the model's response
pub const DEFAULT_RESERVED_MARGIN: usize = 1000;

/// An ordered, non-empty group of paragraphs sent in one provider call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Position of the batch in the plan
    pub index: usize,
    /// Paragraphs in flattening order
    pub paragraphs: Vec<Paragraph>,
}

impl Batch {
    /// Number of paragraphs in the batch
    pub fn len(&self) -> usize {
        self.paragraphs.len()
    }

    /// Batches produced by the planner are never empty
    pub fn is_empty(&self) -> bool {
        self.paragraphs.is_empty()
    }

    /// Sum of the paragraphs' estimated tokens
    pub fn estimated_tokens(&self) -> usize {
        self.paragraphs.iter().map(|p| p.estimated_tokens).sum()
    }

    /// Source texts in batch order
    pub fn source_texts(&self) -> Vec<String> {
        self.paragraphs.iter().map(|p| p.text.clone()).collect()
    }

    /// Map keys of the paragraphs in batch order
    pub fn keys(&self) -> Vec<String> {
        self.paragraphs.iter().map(Paragraph::key).collect()
    }
}

/// Greedy token-bounded batch planner
#[derive(Debug, Clone, Copy)]
pub struct BatchPlanner {
    max_context_tokens: usize,
    reserved_margin: usize,
}

impl BatchPlanner {
    /// Create a planner for a provider context window
    pub fn new(max_context_tokens: usize, reserved_margin: usize) -> Self {
        Self {
            max_context_tokens,
            reserved_margin,
        }
    }

    /// Tokens available for paragraph text in one batch
    pub fn safe_budget(&self) -> usize {
        self.max_context_tokens.saturating_sub(self.reserved_margin)
    }

    /// Pack paragraphs into batches
    pub fn plan(&self, paragraphs: &[Paragraph]) -> Vec<Batch> {
        let budget = self.safe_budget();
        let mut batches: Vec<Batch> = Vec::new();
        let mut current: Vec<Paragraph> = Vec::new();
        let mut running = 0usize;

        let mut flush = |current: &mut Vec<Paragraph>, running: &mut usize| {
            if !current.is_empty() {
                batches.push(Batch {
                    index: batches.len(),
                    paragraphs: std::mem::take(current),
                });
                *running = 0;
            }
        };

        for paragraph in paragraphs {
            if running + paragraph.estimated_tokens > budget {
                flush(&mut current, &mut running);
            }

            running += paragraph.estimated_tokens;
            current.push(paragraph.clone());

            if paragraph.estimated_tokens > budget {
                debug!(
                    "Paragraph {} exceeds the batch budget ({} > {}), sending it alone",
                    paragraph.key(),
                    paragraph.estimated_tokens,
                    budget
                );
                flush(&mut current, &mut running);
            }
        }
        flush(&mut current, &mut running);

        debug!(
            "Planned {} batches for {} paragraphs (budget {} tokens)",
            batches.len(),
            paragraphs.len(),
            budget
        );

        batches
    }
}
