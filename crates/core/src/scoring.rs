use crate::models::Document;
use crate::traits::{MatchMode, TextQuery};
use std::collections::HashSet;

/// Default threshold of the trigram `%` operator in PostgreSQL's pg_trgm.
pub const NATIVE_TRIGRAM_THRESHOLD: f64 = 0.3;

const TITLE_PATTERN_WEIGHT: f64 = 2.0;
const FIELD_PATTERN_WEIGHT: f64 = 1.0;

pub fn lexemes(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|ch: char| !(ch.is_alphanumeric() || ch == '\''))
        .map(|word| word.trim_matches('\''))
        .filter(|word| !word.is_empty())
        .map(str::to_string)
        .collect()
}

/// Full-text rank over the document's weighted fields, `None` when it does not match.
pub fn text_rank(document: &Document, query: &TextQuery) -> Option<f64> {
    let description = document.description.clone().unwrap_or_default();
    let body = document.extracted_text.clone().unwrap_or_default();
    let tags = document.tag_string();
    let fields: [(&str, f64); 5] = [
        (document.title.as_str(), 1.0),
        (tags.as_str(), 0.4),
        (description.as_str(), 0.4),
        (document.file_name.as_str(), 0.2),
        (body.as_str(), 0.1),
    ];

    let terms = query
        .terms
        .iter()
        .flat_map(|term| lexemes(term))
        .collect::<Vec<_>>();
    if terms.is_empty() {
        return None;
    }

    let mut matched_terms = HashSet::new();
    let mut rank = 0.0;

    for (text, weight) in fields {
        let words = lexemes(text);
        if words.is_empty() {
            continue;
        }

        let mut hits = 0usize;
        for word in &words {
            for term in &terms {
                let matched = match query.mode {
                    MatchMode::All => word == term,
                    MatchMode::AnyPrefix => word.starts_with(term.as_str()),
                };
                if matched {
                    hits += 1;
                    matched_terms.insert(term.as_str());
                }
            }
        }

        rank += weight * hits as f64 / (1.0 + (words.len() as f64).ln());
    }

    let matches = match query.mode {
        MatchMode::All => terms.iter().all(|term| matched_terms.contains(term.as_str())),
        MatchMode::AnyPrefix => !matched_terms.is_empty(),
    };

    matches.then_some(rank)
}

/// Padded word trigrams, as pg_trgm extracts them.
pub fn trigrams(text: &str) -> HashSet<String> {
    let mut grams = HashSet::new();
    for word in text
        .to_lowercase()
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|word| !word.is_empty())
    {
        let padded = format!("  {word} ").chars().collect::<Vec<_>>();
        for window in padded.windows(3) {
            grams.insert(window.iter().collect::<String>());
        }
    }
    grams
}

pub fn trigram_similarity(left: &str, right: &str) -> f64 {
    let left = trigrams(left);
    let right = trigrams(right);
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }

    let shared = left.intersection(&right).count() as f64;
    let union = (left.len() + right.len()) as f64 - shared;
    shared / union
}

/// Greatest similarity of the query against title, description and file name.
pub fn best_field_similarity(document: &Document, query: &str) -> f64 {
    [
        trigram_similarity(&document.title, query),
        trigram_similarity(document.description.as_deref().unwrap_or_default(), query),
        trigram_similarity(&document.file_name, query),
    ]
    .into_iter()
    .fold(0.0, f64::max)
}

/// Weighted substring score, `None` unless every term matches at least one field.
pub fn pattern_score(document: &Document, terms: &[String]) -> Option<f64> {
    let title = document.title.to_lowercase();
    let description = document
        .description
        .as_deref()
        .unwrap_or_default()
        .to_lowercase();
    let tags = document.tag_string().to_lowercase();
    let file_name = document.file_name.to_lowercase();

    let mut score = 0.0;
    for term in terms {
        let term = term.to_lowercase();
        let mut term_score = 0.0;
        if title.contains(&term) {
            term_score += TITLE_PATTERN_WEIGHT;
        }
        for field in [&description, &tags, &file_name] {
            if field.contains(&term) {
                term_score += FIELD_PATTERN_WEIGHT;
            }
        }
        if term_score == 0.0 {
            return None;
        }
        score += term_score;
    }

    Some(score)
}
