//! String similarity for scoring a query against passage titles and authors.

use std::collections::HashSet;

/// Optional fuzzy-matching capability, `similarity(a, b)` in `[0, 1]`.
pub trait FuzzyMatcher {
    fn similarity(&self, a: &str, b: &str) -> f64;
}

/// Best-window edit-distance similarity, case-insensitive.
#[derive(Debug, Default, Clone, Copy)]
pub struct PartialRatioMatcher;

impl FuzzyMatcher for PartialRatioMatcher {
    fn similarity(&self, a: &str, b: &str) -> f64 {
        partial_ratio(&a.to_lowercase(), &b.to_lowercase())
    }
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, left) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, right) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(left != right);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}

fn char_ratio(a: &[char], b: &[char]) -> f64 {
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / longest as f64
}

/// Normalized edit similarity in `[0, 1]`.
pub fn ratio(a: &str, b: &str) -> f64 {
    let a = a.chars().collect::<Vec<_>>();
    let b = b.chars().collect::<Vec<_>>();
    char_ratio(&a, &b)
}

/// Similarity of the shorter string against its best-aligned window of the
/// longer one.
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let a = a.chars().collect::<Vec<_>>();
    let b = b.chars().collect::<Vec<_>>();
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };

    if short.is_empty() {
        return 0.0;
    }
    if short.len() == long.len() {
        return char_ratio(&short, &long);
    }

    long.windows(short.len())
        .map(|window| char_ratio(&short, window))
        .fold(0.0, f64::max)
}

pub fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Shared tokens over the smaller token set, case-insensitive.
pub fn token_overlap(a: &str, b: &str) -> f64 {
    let left = tokens(a).into_iter().collect::<HashSet<_>>();
    let right = tokens(b).into_iter().collect::<HashSet<_>>();
    let smaller = left.len().min(right.len());
    if smaller == 0 {
        return 0.0;
    }
    left.intersection(&right).count() as f64 / smaller as f64
}
