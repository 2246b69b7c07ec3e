use std::sync::LazyLock;

use regex::Regex;

// First "score" followed by a number, e.g. "Score: 7/10" or "overall score 8".
static SCORE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"score[:\s]*([0-9]+)").expect("Invalid regex"));

/// Best-effort score from coach feedback. Only the first match counts, and the
/// number is taken as written (no range check).
pub fn extract_score(feedback: &str) -> Option<u32> {
    let lowered = feedback.to_lowercase();
    SCORE_PATTERN
        .captures(&lowered)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

pub fn average(scores: &[u32]) -> Option<f32> {
    if scores.is_empty() {
        return None;
    }
    Some(scores.iter().sum::<u32>() as f32 / scores.len() as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_first_score_case_insensitively() {
        assert_eq!(extract_score("Content Score: 7/10. Clarity score: 9"), Some(7));
        assert_eq!(extract_score("SCORE 8 overall"), Some(8));
    }

    #[test]
    fn test_no_score_mentioned() {
        assert_eq!(extract_score("Great answer, well structured."), None);
        assert_eq!(extract_score("I would score this highly"), None);
    }

    #[test]
    fn test_out_of_range_numbers_are_kept() {
        assert_eq!(extract_score("score: 85"), Some(85));
    }

    #[test]
    fn test_average() {
        assert_eq!(average(&[]), None);
        assert_eq!(average(&[6, 8]), Some(7.0));
    }
}
