/// Text normalization and whole-word mention detection.
///
/// Everything here is a pure function of its inputs so the scanning
/// components can be tested without any collaborator.
use std::collections::BTreeSet;

const LEADING_ARTICLE: &str = "the ";

/// Lowercase and collapse every whitespace run to a single space.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Normalize a candidate name: `normalize_text` plus a stripped leading "the".
///
/// "The Cigar Box" and "cigar  box" both become "cigar box".
pub fn normalize_name(name: &str) -> String {
    let text = normalize_text(name);
    match text.strip_prefix(LEADING_ARTICLE) {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => text,
    }
}

/// Byte spans of whole-word occurrences of `needle` in `haystack`.
///
/// Both arguments must already be normalized.
fn occurrences(haystack: &str, needle: &str) -> Vec<(usize, usize)> {
    if needle.is_empty() {
        return Vec::new();
    }
    haystack
        .match_indices(needle)
        .map(|(start, m)| (start, start + m.len()))
        .filter(|&(start, end)| {
            let before = haystack[..start].chars().next_back();
            let after = haystack[end..].chars().next();
            !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
        })
        .collect()
}

/// Returns true if `name` occurs in `text` as whole words.
pub fn mentions(text: &str, name: &str) -> bool {
    !occurrences(&normalize_text(text), &normalize_name(name)).is_empty()
}

/// Find which candidates are mentioned in `text`.
///
/// Each candidate is a `(key, phrase)` pair; a key may appear with several
/// phrases (its name and aliases). Longer phrases claim their spans first,
/// so "farmhouse kitchen" wins over "farmhouse" in "the farmhouse kitchen".
/// The result is deterministic for a given input.
pub fn find_mentions<'a, K, I>(text: &str, candidates: I) -> BTreeSet<K>
where
    K: Ord + Clone,
    I: IntoIterator<Item = (K, &'a str)>,
{
    let haystack = normalize_text(text);
    let mut phrases: Vec<(String, K)> = candidates
        .into_iter()
        .map(|(key, phrase)| (normalize_name(phrase), key))
        .filter(|(phrase, _)| !phrase.is_empty())
        .collect();
    phrases.sort_by(|a, b| {
        b.0.len()
            .cmp(&a.0.len())
            .then_with(|| a.0.cmp(&b.0))
            .then_with(|| a.1.cmp(&b.1))
    });
    phrases.dedup();

    let mut claimed: Vec<(usize, usize)> = Vec::new();
    let mut found = BTreeSet::new();
    for (phrase, key) in phrases {
        for (start, end) in occurrences(&haystack, &phrase) {
            let overlaps = claimed.iter().any(|&(s, e)| start < e && s < end);
            if !overlaps {
                claimed.push((start, end));
                found.insert(key.clone());
            }
        }
    }
    found
}
