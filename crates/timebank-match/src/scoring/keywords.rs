// scoring/keywords.rs
// Keyword extraction and skill-overlap scoring

use std::collections::HashSet;

/// Common words that carry no matching signal, including the marketplace
/// vocabulary every listing shares ("offer", "need", "looking").
const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "are", "was", "were", "been", "being", "have", "has",
    "had", "does", "did", "will", "would", "could", "should", "may", "might", "must", "shall",
    "can", "you", "she", "its", "our", "their", "this", "that", "these", "those", "help",
    "looking", "need", "want", "offer", "request",
];

/// Lowercased keywords of 3+ letters, stop words removed.
pub fn extract_keywords(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphabetic())
        .filter(|word| word.len() >= 3)
        .filter(|word| !STOP_WORDS.contains(word))
        .map(str::to_string)
        .collect()
}

/// Skill/keyword overlap between the seeker's vocabulary (skills plus their
/// own listing text) and a candidate listing, in [0, 1].
///
/// Neutral 0.5 when either side has no usable keywords; the overlap ratio
/// is boosted 1.5x and capped so a handful of shared terms still registers.
pub fn skill_score(seeker_keywords: &HashSet<String>, candidate_text: &str) -> f64 {
    let candidate_keywords = extract_keywords(candidate_text);
    if seeker_keywords.is_empty() || candidate_keywords.is_empty() {
        return 0.5;
    }

    let matches = candidate_keywords
        .iter()
        .filter(|word| seeker_keywords.contains(*word))
        .count();
    let ratio = matches as f64 / candidate_keywords.len().max(1) as f64;

    (ratio * 1.5).min(1.0)
}
