/*!
 * System prompts for batch translation.
 *
 * The configured template carries the translator persona; marker
 * instructions are appended only for batches with more than one paragraph.
 */

use crate::language_utils;

/// Instructions appended to multi-paragraph batches
pub const MARKER_INSTRUCTIONS: &str = r#"The text contains several paragraphs. Each paragraph is followed by a marker such as <<PARA_0>>, <<PARA_1>> and so on.
- Translate every paragraph in order.
- After each translated paragraph, copy its marker exactly as it appears, on its own line.
- Never translate, renumber, merge or drop markers.
- Do not add commentary before or after the translation."#;

/// System prompt template with `{source_language}` and `{target_language}` placeholders
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    /// The template string with placeholders
    template: String,
}

impl PromptTemplate {
    /// Create a new prompt template
    pub fn new(template: &str) -> Self {
        Self {
            template: template.to_string(),
        }
    }

    /// Render the template; language codes are expanded to English names when known
    pub fn render(&self, source_language: &str, target_language: &str) -> String {
        self.template
            .replace("{source_language}", &language_utils::display_name(source_language))
            .replace("{target_language}", &language_utils::display_name(target_language))
    }

    /// System prompt for a batch of `paragraph_count` paragraphs
    pub fn for_batch(
        &self,
        source_language: &str,
        target_language: &str,
        paragraph_count: usize,
    ) -> String {
        let base = self.render(source_language, target_language);
        if paragraph_count > 1 {
            format!("{}\n\n{}", base, MARKER_INSTRUCTIONS)
        } else {
            base
        }
    }
}
