//! Content type policy
//!
//! Maps an attention level to the representation best suited to it. Lower
//! attention moves the reader toward more interactive formats.

use crate::types::ContentType;

/// Attention above which plain text is suggested
pub const TEXT_THRESHOLD: u8 = 80;
/// Attention above which a mind map is suggested
pub const MINDMAP_THRESHOLD: u8 = 60;
/// Attention above which flashcards are suggested
pub const FLIPCARD_THRESHOLD: u8 = 40;
/// Attention above which a quiz is suggested; anything lower gets the mini-game
pub const QUIZ_THRESHOLD: u8 = 20;

/// Threshold policy with the high-attention anti-oscillation guard
pub struct ContentTypePolicy;

impl ContentTypePolicy {
    /// Suggested representation for `attention_level` given what is shown now.
    ///
    /// A reader above the text threshold who is already working through a
    /// structured format (mind map, flashcards, quiz) keeps that format.
    pub fn decide(attention_level: u8, current: ContentType) -> ContentType {
        let suggested = Self::suggest(attention_level);

        if attention_level > TEXT_THRESHOLD && Self::is_guarded(current) {
            return current;
        }

        suggested
    }

    /// Raw threshold table, without the guard
    pub fn suggest(attention_level: u8) -> ContentType {
        if attention_level > TEXT_THRESHOLD {
            ContentType::Text
        } else if attention_level > MINDMAP_THRESHOLD {
            ContentType::Mindmap
        } else if attention_level > FLIPCARD_THRESHOLD {
            ContentType::Flipcard
        } else if attention_level > QUIZ_THRESHOLD {
            ContentType::Quiz
        } else {
            ContentType::React
        }
    }

    fn is_guarded(current: ContentType) -> bool {
        matches!(
            current,
            ContentType::Mindmap | ContentType::Flipcard | ContentType::Quiz
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expected_for(level: u8) -> ContentType {
        match level {
            81..=100 => ContentType::Text,
            61..=80 => ContentType::Mindmap,
            41..=60 => ContentType::Flipcard,
            21..=40 => ContentType::Quiz,
            _ => ContentType::React,
        }
    }

    #[test]
    fn test_threshold_table_for_unguarded_types() {
        for current in [ContentType::Text, ContentType::React] {
            for level in 0..=100u8 {
                assert_eq!(
                    ContentTypePolicy::decide(level, current),
                    expected_for(level),
                    "level {} from {}",
                    level,
                    current
                );
            }
        }
    }

    #[test]
    fn test_band_edges() {
        assert_eq!(ContentTypePolicy::suggest(81), ContentType::Text);
        assert_eq!(ContentTypePolicy::suggest(80), ContentType::Mindmap);
        assert_eq!(ContentTypePolicy::suggest(60), ContentType::Flipcard);
        assert_eq!(ContentTypePolicy::suggest(40), ContentType::Quiz);
        assert_eq!(ContentTypePolicy::suggest(20), ContentType::React);
        assert_eq!(ContentTypePolicy::suggest(0), ContentType::React);
    }

    #[test]
    fn test_anti_oscillation_guard() {
        assert_eq!(ContentTypePolicy::decide(85, ContentType::Flipcard), ContentType::Flipcard);
        assert_eq!(ContentTypePolicy::decide(85, ContentType::Quiz), ContentType::Quiz);
        assert_eq!(ContentTypePolicy::decide(85, ContentType::Mindmap), ContentType::Mindmap);
        assert_eq!(ContentTypePolicy::decide(85, ContentType::Text), ContentType::Text);
        assert_eq!(ContentTypePolicy::decide(85, ContentType::React), ContentType::Text);
    }

    #[test]
    fn test_guard_only_applies_above_text_threshold() {
        assert_eq!(ContentTypePolicy::decide(80, ContentType::Quiz), ContentType::Mindmap);
        assert_eq!(ContentTypePolicy::decide(50, ContentType::Mindmap), ContentType::Flipcard);
        assert_eq!(ContentTypePolicy::decide(10, ContentType::Flipcard), ContentType::React);
    }
}
