//! Trigram string similarity.
//!
//! Follows the PostgreSQL `pg_trgm` definition so thresholds carry over:
//! text is split into lower-cased alphanumeric words, each word is padded
//! with two spaces in front and one behind, and similarity is the Jaccard
//! index of the two trigram sets.

use std::collections::BTreeSet;

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
}

/// Padded trigram set of `text`.
pub fn trigrams(text: &str) -> BTreeSet<String> {
    let mut set = BTreeSet::new();
    for word in words(text) {
        let padded: Vec<char> = format!("  {} ", word).chars().collect();
        for window in padded.windows(3) {
            set.insert(window.iter().collect());
        }
    }
    set
}

/// Jaccard similarity of the trigram sets, in `[0, 1]`.
pub fn similarity(a: &str, b: &str) -> f64 {
    let ta = trigrams(a);
    let tb = trigrams(b);
    if ta.is_empty() && tb.is_empty() {
        return 0.0;
    }
    let shared = ta.intersection(&tb).count();
    let union = ta.len() + tb.len() - shared;
    shared as f64 / union as f64
}

/// Unpadded in-word trigrams, used to pull candidates from the FTS index.
///
/// Empty when no word has three or more characters.
pub fn search_trigrams(text: &str) -> BTreeSet<String> {
    let mut set = BTreeSet::new();
    for word in words(text) {
        let chars: Vec<char> = word.chars().collect();
        for window in chars.windows(3) {
            set.insert(window.iter().collect());
        }
    }
    set
}
