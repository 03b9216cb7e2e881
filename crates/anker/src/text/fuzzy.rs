//! Token-set fuzzy matching.
//!
//! `token_set_ratio` compares the sorted token sets of two strings the way
//! header matching needs: word order and duplicate tokens are irrelevant, a
//! heading embedded in a longer line still scores high through the
//! intersection string, and pure noise scores near zero.

use std::collections::BTreeSet;

/// Plain similarity of two strings on a 0–100 scale.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 100.0;
    }
    strsim::normalized_levenshtein(a, b) * 100.0
}

/// Token-set similarity on a 0–100 scale.
///
/// Splits both inputs on whitespace, forms the sorted intersection and the
/// two sorted differences, then takes the best pairwise similarity between
/// the combined strings. Identical token sets score 100 regardless of order
/// or repetition.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let set_a: BTreeSet<&str> = a.split_whitespace().collect();
    let set_b: BTreeSet<&str> = b.split_whitespace().collect();

    if set_a.is_empty() || set_b.is_empty() {
        return if set_a.is_empty() && set_b.is_empty() { 100.0 } else { 0.0 };
    }

    let intersection: Vec<&str> = set_a.intersection(&set_b).copied().collect();
    let only_a: Vec<&str> = set_a.difference(&set_b).copied().collect();
    let only_b: Vec<&str> = set_b.difference(&set_a).copied().collect();

    if !intersection.is_empty() && only_a.is_empty() && only_b.is_empty() {
        return 100.0;
    }

    let sect = intersection.join(" ");
    let combined_a = join_parts(&sect, &only_a);
    let combined_b = join_parts(&sect, &only_b);

    let mut best = similarity(&combined_a, &combined_b);
    if !sect.is_empty() {
        best = best.max(similarity(&sect, &combined_a));
        best = best.max(similarity(&sect, &combined_b));
    }
    best
}

fn join_parts(sect: &str, rest: &[&str]) -> String {
    if sect.is_empty() {
        rest.join(" ")
    } else if rest.is_empty() {
        sect.to_owned()
    } else {
        format!("{sect} {}", rest.join(" "))
    }
}
