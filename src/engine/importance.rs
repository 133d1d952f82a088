//! Importance scoring (spec §4.1 "Importance scoring")

const KEYWORDS: &[&str] = &[
    "urgent", "critical", "deadline", "important", "alert", "error", "outage", "failure",
];

/// If the caller supplied a positive `metadata_importance`, clamp and use it
/// verbatim. Otherwise derive one from content length and keyword presence.
pub fn compute_importance(metadata_importance: f32, content: &str) -> f32 {
    if metadata_importance > 0.0 {
        return metadata_importance.clamp(0.0, 1.0);
    }

    let tokens = content.split_whitespace().count();
    let length_score = (tokens as f32 / 60.0).min(1.0);

    let lower = content.to_lowercase();
    let hits = KEYWORDS.iter().filter(|kw| lower.contains(*kw)).count();
    let keyword_boost = (0.25 * hits as f32).min(0.6);

    (length_score + keyword_boost).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_importance_is_clamped_and_used() {
        assert_eq!(compute_importance(2.0, "whatever"), 1.0);
        assert_eq!(compute_importance(0.3, "whatever"), 0.3);
    }

    #[test]
    fn formula_combines_length_and_keywords() {
        let score = compute_importance(0.0, "Critical production outage impacting users");
        // 6 tokens / 60 = 0.1 length score; "critical" + "outage" + "failure"? only critical, outage match -> 2 hits
        assert!(score > 0.1);
        assert!(score <= 1.0);
    }

    #[test]
    fn keyword_boost_is_capped_at_point_six() {
        let content = "urgent critical deadline important alert error outage failure";
        let score = compute_importance(0.0, content);
        // length_score = 8/60 ~= 0.133, boost capped at 0.6 -> total capped at 1.0 anyway
        assert!(score <= 1.0);
        assert!(score > 0.6);
    }

    #[test]
    fn plain_content_scores_low() {
        let score = compute_importance(0.0, "Lunch options for tomorrow");
        assert!(score < 0.2);
    }
}
