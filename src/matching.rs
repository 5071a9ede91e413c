//! Name normalization and candidate similarity scoring.
//!
//! Everything here is pure. Search candidates from providers are noisy
//! (reissue suffixes, case drift, punctuation), so adapters rank them with
//! the discrete tier scores below instead of raw ratios, keeping acceptance
//! deterministic and testable.

use crate::config::MatchingConfig;

/// Lower-cases, strips characters outside word/space classes, collapses
/// repeated whitespace, and trims. Idempotent.
pub fn normalize(text: &str) -> String {
    let mut cleaned = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            for lowered in ch.to_lowercase() {
                cleaned.push(lowered);
            }
        } else if ch.is_whitespace() {
            cleaned.push(' ');
        }
    }
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Sequence-similarity ratio over normalized strings in `[0, 1]`, with a
/// fixed bonus when one normalized string contains the other.
pub fn similarity(a: &str, b: &str) -> f64 {
    let left = normalize(a);
    let right = normalize(b);
    let mut score = strsim::normalized_levenshtein(&left, &right);
    if !left.is_empty() && !right.is_empty() && (left.contains(&right) || right.contains(&left)) {
        score += 0.15;
    }
    score.min(1.0)
}

/// Discrete per-field match tier between a query string and one candidate.
///
/// Exact match scores 100; containment 80 (candidate contains query) or 70
/// (query contains candidate); otherwise token overlap: all query tokens
/// present scores 90, partial overlap 60 for short queries and 70 for
/// longer ones, no overlap 0.
pub fn field_score(query: &str, candidate: &str) -> i32 {
    let query = normalize(query);
    let candidate = normalize(candidate);
    if query.is_empty() || candidate.is_empty() {
        return 0;
    }
    if query == candidate {
        return 100;
    }
    if candidate.contains(&query) {
        return 80;
    }
    if query.contains(&candidate) {
        return 70;
    }

    let query_tokens: Vec<&str> = query.split_whitespace().collect();
    let candidate_tokens: std::collections::HashSet<&str> =
        candidate.split_whitespace().collect();
    let present = query_tokens
        .iter()
        .filter(|token| candidate_tokens.contains(**token))
        .count();
    if present == query_tokens.len() {
        return 90;
    }
    if present > 0 {
        return if query_tokens.len() <= 2 { 60 } else { 70 };
    }
    0
}

/// Integer-weighted blend of the title and artist field scores.
/// Monotonic non-decreasing in both inputs.
pub fn combined_score(title_score: i32, artist_score: i32, settings: &MatchingConfig) -> i32 {
    let title_weight = settings.title_weight as i32;
    let artist_weight = settings.artist_weight as i32;
    let total = (title_weight + artist_weight).max(1);
    (title_weight * title_score + artist_weight * artist_score) / total
}

/// A candidate is usable once its combined score clears the acceptance
/// threshold.
pub fn accepts(score: i32, settings: &MatchingConfig) -> bool {
    score > settings.accept_threshold
}

/// Search stops trying further strategies once a candidate scores at or
/// above the early-stop threshold.
pub fn early_stop(score: i32, settings: &MatchingConfig) -> bool {
    score >= settings.early_stop_threshold
}

#[cfg(test)]
mod tests {
    use super::{accepts, combined_score, early_stop, field_score, normalize, similarity};
    use crate::config::MatchingConfig;

    #[test]
    fn test_normalize_strips_symbols_and_collapses_whitespace() {
        assert_eq!(normalize("  OK   Computer!! (Remaster)"), "ok computer remaster");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for input in ["Godspeed You! Black Emperor", "  a  b ", "Sigur Rós", ""] {
            let once = normalize(input);
            assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn test_similarity_identity_is_one() {
        for input in ["Radiohead", "OK Computer", "múm"] {
            assert!((similarity(input, input) - 1.0).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn test_similarity_containment_bonus_applies() {
        let plain = strsim::normalized_levenshtein("ok computer", "ok computer collectors edition");
        let bonused = similarity("OK Computer", "OK Computer (Collector's Edition)");
        assert!(bonused > plain);
        assert!(bonused <= 1.0);
    }

    #[test]
    fn test_field_score_tiers() {
        assert_eq!(field_score("OK Computer", "ok computer"), 100);
        assert_eq!(field_score("OK Computer", "Ok Computer (Collector's Edition)"), 80);
        assert_eq!(field_score("OK Computer Deluxe Box", "OK Computer"), 70);
        // All query tokens present but in scrambled order.
        assert_eq!(field_score("computer ok", "ok computer deluxe"), 90);
        // Partial overlap, short query.
        assert_eq!(field_score("blue train", "blue monday"), 60);
        // Partial overlap, longer query.
        assert_eq!(field_score("exile on main st", "main street band"), 70);
        assert_eq!(field_score("Amnesiac", "The Bends"), 0);
        assert_eq!(field_score("", "anything"), 0);
    }

    #[test]
    fn test_combined_score_matches_weighted_blend() {
        let settings = MatchingConfig::default();
        // Title containment (80), artist exact (100): the collector's
        // edition case accepted at 88 and early-stopped.
        let score = combined_score(80, 100, &settings);
        assert_eq!(score, 88);
        assert!(accepts(score, &settings));
        assert!(early_stop(score, &settings));
    }

    #[test]
    fn test_combined_score_is_monotonic() {
        let settings = MatchingConfig::default();
        let points = [0, 60, 70, 80, 90, 100];
        for &artist in &points {
            let mut previous = i32::MIN;
            for &title in &points {
                let score = combined_score(title, artist, &settings);
                assert!(score >= previous);
                previous = score;
            }
        }
        for &title in &points {
            let mut previous = i32::MIN;
            for &artist in &points {
                let score = combined_score(title, artist, &settings);
                assert!(score >= previous);
                previous = score;
            }
        }
    }

    #[test]
    fn test_threshold_boundaries() {
        let settings = MatchingConfig::default();
        assert!(!accepts(60, &settings));
        assert!(accepts(61, &settings));
        assert!(!early_stop(84, &settings));
        assert!(early_stop(85, &settings));
    }
}
