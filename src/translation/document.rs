/*!
 * Document model and paragraph flattening.
 *
 * A document is an ordered list of sections (pages), each an ordered list of
 * paragraph strings. Flattening turns it into an indexed paragraph list; the
 * `(item_index, paragraph_index)` pair is the join key used to merge
 * translations back, so flattening must be deterministic.
 */

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use super::tokens::estimate_tokens;

/// One page or section of a document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    /// Paragraphs in reading order
    #[serde(default)]
    pub paragraphs: Vec<String>,
}

impl Section {
    /// Create a section from paragraph strings
    pub fn new<I, S>(paragraphs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paragraphs: paragraphs.into_iter().map(Into::into).collect(),
        }
    }
}

/// Hierarchical source or translated document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Sections in document order
    #[serde(default)]
    pub sections: Vec<Section>,
}

/// A single translatable unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paragraph {
    /// Source text
    pub text: String,
    /// Position of the containing section
    pub item_index: usize,
    /// Position within the section
    pub paragraph_index: usize,
    /// Heuristic token count of `text`
    pub estimated_tokens: usize,
}

impl Paragraph {
    /// Key under which this paragraph's translation is stored
    pub fn key(&self) -> String {
        paragraph_key(self.item_index, self.paragraph_index)
    }
}

/// Build the persisted map key for a paragraph slot
pub fn paragraph_key(item_index: usize, paragraph_index: usize) -> String {
    format!("{}-{}", item_index, paragraph_index)
}

fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}

impl Document {
    /// Create a document from sections
    pub fn new(sections: Vec<Section>) -> Self {
        Self { sections }
    }

    /// Flatten into indexed paragraphs, skipping blank ones.
    ///
    /// `paragraph_index` is the paragraph's position in its section's original
    /// list, so a blank paragraph leaves a gap instead of shifting later keys.
    pub fn flatten(&self) -> Vec<Paragraph> {
        self.sections
            .iter()
            .enumerate()
            .flat_map(|(item_index, section)| {
                section
                    .paragraphs
                    .iter()
                    .enumerate()
                    .filter(|(_, text)| !is_blank(text))
                    .map(move |(paragraph_index, text)| Paragraph {
                        text: text.clone(),
                        item_index,
                        paragraph_index,
                        estimated_tokens: estimate_tokens(text),
                    })
            })
            .collect()
    }

    /// Rebuild the document with each translatable slot replaced by its
    /// translation. Blank paragraphs are carried over untouched; a slot with
    /// no translation renders as an empty string.
    pub fn reassemble(&self, translations: &HashMap<String, String>) -> Document {
        let sections = self
            .sections
            .iter()
            .enumerate()
            .map(|(item_index, section)| Section {
                paragraphs: section
                    .paragraphs
                    .iter()
                    .enumerate()
                    .map(|(paragraph_index, text)| {
                        if is_blank(text) {
                            text.clone()
                        } else {
                            translations
                                .get(&paragraph_key(item_index, paragraph_index))
                                .cloned()
                                .unwrap_or_default()
                        }
                    })
                    .collect(),
            })
            .collect();

        Document { sections }
    }

    /// Number of non-blank paragraphs
    pub fn translatable_count(&self) -> usize {
        self.sections
            .iter()
            .flat_map(|s| s.paragraphs.iter())
            .filter(|p| !is_blank(p))
            .count()
    }

    /// SHA-256 over section layout and paragraph bytes, used to detect source changes
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for (item_index, section) in self.sections.iter().enumerate() {
            hasher.update(item_index.to_le_bytes());
            for paragraph in &section.paragraphs {
                hasher.update((paragraph.len() as u64).to_le_bytes());
                hasher.update(paragraph.as_bytes());
            }
        }
        format!("{:x}", hasher.finalize())
    }
}
