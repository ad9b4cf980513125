//! Word n-gram matching between suggested paper titles and cited references.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::keys::JoinKey;
use crate::stats::match_rate;

/// NFKC-normalize, lowercase and trim.
pub fn normalize_text(text: &str) -> String {
    text.nfkc().collect::<String>().to_lowercase().trim().to_string()
}

/// The set of `n`-word windows of `text`, words being `\w+` runs of the
/// normalized text. Empty when the text has fewer than `n` words.
pub fn word_ngrams(text: &str, n: usize) -> HashSet<Vec<String>> {
    static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").unwrap());
    if n == 0 {
        return HashSet::new();
    }
    let normalized = normalize_text(text);
    let words: Vec<String> = WORD
        .find_iter(&normalized)
        .map(|m| m.as_str().to_string())
        .collect();
    words.windows(n).map(<[String]>::to_vec).collect()
}

/// True when `title` and `reference` share at least one `n`-word window.
pub fn has_shared_ngram(title: &str, reference: &str, n: usize) -> bool {
    let title_grams = word_ngrams(title, n);
    if title_grams.is_empty() {
        return false;
    }
    !title_grams.is_disjoint(&word_ngrams(reference, n))
}

/// The `title` entry of a paper-details cell.
///
/// Suggestion exports store paper details as a Python-style dict literal
/// (`{'title': 'Attention Is All You Need', 'year': 2017}`) or as JSON.
/// Plain text without a `title` entry is returned trimmed as-is.
pub fn title_from_details(cell: &str) -> Option<String> {
    static TITLE_ENTRY: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r#"['"]title['"]\s*:\s*(?:'((?:[^'\\]|\\.)*)'|"((?:[^"\\]|\\.)*)")"#).unwrap()
    });
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return None;
    }
    if !trimmed.starts_with('{') {
        return Some(trimmed.to_string());
    }
    TITLE_ENTRY
        .captures(trimmed)
        .and_then(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str().replace("\\'", "'").replace("\\\"", "\""))
        .filter(|t| !t.trim().is_empty())
}

/// Outcome of matching suggested titles against each submission's cited
/// references.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchReport {
    /// Distinct submissions that received suggestions.
    pub total: usize,
    /// Submission and the first suggested title found among its references,
    /// ordered by submission key.
    pub matched: Vec<(JoinKey, String)>,
}

impl MatchReport {
    pub fn matched_count(&self) -> usize {
        self.matched.len()
    }

    pub fn percentage(&self) -> f64 {
        match_rate(self.matched.len(), self.total)
    }
}

/// Count the submissions for which some suggested title shares an `n`-gram
/// with some reference cited by the same submission.
pub fn match_suggestions(
    suggestions: &[(JoinKey, String)],
    references: &[(JoinKey, String)],
    n: usize,
) -> MatchReport {
    let mut refs_by_key: BTreeMap<&JoinKey, Vec<HashSet<Vec<String>>>> = BTreeMap::new();
    for (key, reference) in references {
        refs_by_key
            .entry(key)
            .or_default()
            .push(word_ngrams(reference, n));
    }

    let total = suggestions
        .iter()
        .map(|(key, _)| key)
        .collect::<BTreeSet<_>>()
        .len();

    let mut matched: BTreeMap<&JoinKey, &str> = BTreeMap::new();
    for (key, title) in suggestions {
        if matched.contains_key(key) {
            continue;
        }
        let Some(cited) = refs_by_key.get(key) else {
            continue;
        };
        let title_grams = word_ngrams(title, n);
        if title_grams.is_empty() {
            continue;
        }
        if cited.iter().any(|grams| !title_grams.is_disjoint(grams)) {
            tracing::debug!(submission = %key, title = %title, "suggested title cited");
            matched.insert(key, title);
        }
    }

    MatchReport {
        total,
        matched: matched
            .into_iter()
            .map(|(k, t)| (k.clone(), t.to_string()))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(raw: &str) -> JoinKey {
        JoinKey::canonical(raw).unwrap()
    }

    // =========================================================================
    // n-grams
    // =========================================================================

    #[test]
    fn ngrams_are_normalized_word_windows() {
        let grams = word_ngrams("  Deep   Residual Learning, for Image ", 4);
        assert_eq!(grams.len(), 2);
        assert!(grams.contains(&vec![
            "deep".to_string(),
            "residual".to_string(),
            "learning".to_string(),
            "for".to_string()
        ]));
    }

    #[test]
    fn short_text_has_no_ngrams() {
        assert!(word_ngrams("three word title", 4).is_empty());
        assert!(word_ngrams("anything", 0).is_empty());
    }

    #[test]
    fn nfkc_folds_compatibility_forms() {
        // Full-width letters and the "fi" ligature
        assert_eq!(normalize_text("ＢＥＲＴ ﬁne-tuning"), "bert fine-tuning");
    }

    #[test]
    fn title_found_inside_reference() {
        let reference = "K. He, X. Zhang, S. Ren, and J. Sun. Deep residual learning for image \
                         recognition. In CVPR, 2016.";
        assert!(has_shared_ngram(
            "Deep Residual Learning for Image Recognition",
            reference,
            4
        ));
        assert!(!has_shared_ngram("Attention is all you need", reference, 4));
    }

    // =========================================================================
    // Paper details
    // =========================================================================

    #[test]
    fn title_from_python_dict() {
        let cell = "{'title': \"Don't Stop Pretraining\", 'year': 2020}";
        assert_eq!(title_from_details(cell).unwrap(), "Don't Stop Pretraining");
        let cell = "{'title': 'BERT: Pre-training', 'authors': ['Devlin']}";
        assert_eq!(title_from_details(cell).unwrap(), "BERT: Pre-training");
    }

    #[test]
    fn title_from_json_and_plain_text() {
        assert_eq!(
            title_from_details(r#"{"title": "GPT-3", "year": 2020}"#).unwrap(),
            "GPT-3"
        );
        assert_eq!(title_from_details(" Plain title ").unwrap(), "Plain title");
        assert!(title_from_details("{'year': 2020}").is_none());
        assert!(title_from_details("").is_none());
    }

    // =========================================================================
    // Suggestion matching
    // =========================================================================

    #[test]
    fn matches_counted_once_per_submission() {
        let suggestions = vec![
            (key("Paper1"), "Deep Residual Learning for Image Recognition".to_string()),
            (key("Paper1"), "Residual Learning for Image Recognition Again".to_string()),
            (key("Paper2"), "Attention Is All You Need".to_string()),
            (key("Paper3"), "Graph Attention Networks Are Great".to_string()),
        ];
        let references = vec![
            (
                key("submission1"),
                "He et al. Deep residual learning for image recognition. 2016".to_string(),
            ),
            (key("submission2"), "Unrelated work on protein folding at scale".to_string()),
        ];

        let report = match_suggestions(&suggestions, &references, 4);
        assert_eq!(report.total, 3);
        assert_eq!(report.matched_count(), 1);
        assert_eq!(report.matched[0].0, key("1"));
        assert!((report.percentage() - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn no_suggestions_gives_zero_rate() {
        let report = match_suggestions(&[], &[], 4);
        assert_eq!(report.total, 0);
        assert_eq!(report.percentage(), 0.0);
    }
}
