use std::collections::BTreeSet;

use crate::references::normalize_name;

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.8;

fn words(text: &str) -> BTreeSet<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(|word| word.to_lowercase())
        .collect()
}

/// Word-overlap score between two names in `0.0..=1.0`: the size of the
/// shared word set over the size of the combined word set. Two empty names
/// score 1.0; one empty name scores 0.0.
pub fn word_overlap(a: &str, b: &str) -> f64 {
    let words_a = words(a);
    let words_b = words(b);
    if words_a.is_empty() && words_b.is_empty() {
        return 1.0;
    }
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }

    let shared = words_a.intersection(&words_b).count();
    let combined = words_a.union(&words_b).count();
    shared as f64 / combined as f64
}

/// Fuzzy name match: word overlap at or above the threshold, falling back to
/// substring containment of the normalized forms. The threshold is tunable;
/// callers pass the configured value.
pub fn names_match(a: &str, b: &str, threshold: f64) -> bool {
    if word_overlap(a, b) >= threshold {
        return true;
    }

    let normalized_a = normalize_name(a);
    let normalized_b = normalize_name(b);
    if normalized_a.is_empty() || normalized_b.is_empty() {
        return false;
    }
    normalized_a.contains(&normalized_b) || normalized_b.contains(&normalized_a)
}
