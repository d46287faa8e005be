//! Deterministic lexical helpers backing the SVR signals.
//!
//! Everything here is a pure function of its inputs so that scoring stays
//! reproducible across rounds and in tests.

use std::collections::BTreeSet;

/// Lowercased alphanumeric tokens, in order of appearance.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Distinct lowercased tokens of `text`.
pub fn token_set(text: &str) -> BTreeSet<String> {
    tokenize(text).into_iter().collect()
}

/// Jaccard similarity of two token sets. Empty-vs-anything is 0.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

/// Jaccard similarity of the word-level n-gram (n = 3) sets of two texts.
///
/// Texts shorter than one trigram contribute no overlap.
pub fn trigram_overlap(a: &str, b: &str) -> f64 {
    let ga = trigrams(a);
    let gb = trigrams(b);
    if ga.is_empty() || gb.is_empty() {
        return 0.0;
    }
    let intersection = ga.intersection(&gb).count();
    let union = ga.len() + gb.len() - intersection;
    intersection as f64 / union as f64
}

fn trigrams(text: &str) -> BTreeSet<String> {
    let tokens = tokenize(text);
    tokens.windows(3).map(|w| w.join(" ")).collect()
}

/// Normalized Shannon entropy of a count distribution, in [0, 1].
///
/// 1 means perfectly even, 0 means a single speaker (or no data).
pub fn normalized_entropy(counts: &[usize]) -> f64 {
    let total: usize = counts.iter().sum();
    let nonzero: Vec<usize> = counts.iter().copied().filter(|&c| c > 0).collect();
    if total == 0 || nonzero.len() <= 1 {
        return 0.0;
    }
    let total = total as f64;
    let entropy: f64 = nonzero
        .iter()
        .map(|&c| {
            let p = c as f64 / total;
            -p * p.ln()
        })
        .sum();
    entropy / (nonzero.len() as f64).ln()
}

/// Fraction of `text` tokens absent from `known`.
pub fn novelty_ratio(text: &str, known: &BTreeSet<String>) -> f64 {
    let tokens = token_set(text);
    if tokens.is_empty() {
        return 0.0;
    }
    let fresh = tokens.iter().filter(|t| !known.contains(*t)).count();
    fresh as f64 / tokens.len() as f64
}
