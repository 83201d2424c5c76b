//! Lexical emotion classification for assistant sentences.
//!
//! Reminiscence-therapy replies are tagged with a coarse emotional tone so
//! the view layer can show an empathy badge next to the avatar. First
//! matching category wins; anything unmatched reads as warm.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Nostalgic,
    Happy,
    Thoughtful,
    Warm,
}

/// Category word lists, checked in order. Entries are root forms so they
/// match conjugated Korean as a plain substring.
const EMOTION_KEYWORDS: &[(Emotion, &[&str])] = &[
    (
        Emotion::Nostalgic,
        &["추억", "그때", "옛날", "어릴", "젊을", "시절"],
    ),
    (Emotion::Happy, &["행복", "기뻐", "좋아", "즐거", "웃음"]),
    (Emotion::Thoughtful, &["생각", "기억", "떠올", "회상"]),
    (Emotion::Warm, &["따뜻", "정겨", "포근", "사랑"]),
];

impl Emotion {
    pub fn classify(text: &str) -> Emotion {
        for (emotion, keywords) in EMOTION_KEYWORDS {
            if keywords.iter().any(|k| text.contains(k)) {
                return *emotion;
            }
        }
        Emotion::Warm
    }

    /// Korean display label for the emotion badge.
    pub fn label(&self) -> &'static str {
        match self {
            Emotion::Nostalgic => "추억에 잠겨",
            Emotion::Happy => "기뻐하며",
            Emotion::Thoughtful => "생각하며",
            Emotion::Warm => "따뜻하게",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_keyword_classifies_nostalgic() {
        assert_eq!(
            Emotion::classify("어린 시절 추억이 떠오르네요"),
            Emotion::Nostalgic
        );
    }

    #[test]
    fn unmatched_sentence_defaults_to_warm() {
        // "그립" is not in any category list; the default applies.
        assert_eq!(Emotion::classify("고향이 그립습니다"), Emotion::Warm);
    }

    #[test]
    fn first_matching_category_wins() {
        // Contains both a nostalgic keyword and a happy one; category order
        // decides.
        assert_eq!(
            Emotion::classify("옛날에는 정말 행복했어요"),
            Emotion::Nostalgic
        );
    }

    #[test]
    fn happy_and_thoughtful_categories_match() {
        assert_eq!(Emotion::classify("웃음이 나네요"), Emotion::Happy);
        assert_eq!(Emotion::classify("기억을 떠올려 보세요"), Emotion::Thoughtful);
    }

    #[test]
    fn labels_are_korean_badges() {
        assert_eq!(Emotion::Nostalgic.label(), "추억에 잠겨");
        assert_eq!(Emotion::Warm.label(), "따뜻하게");
    }
}
