//! Text Normalizer
//!
//! Turns free text (comic transcripts, alt text, search queries) into the stemmed terms
//! stored in the index. Documents and queries go through the same pipeline, so a query
//! term matches exactly when the document produced the same stem.
//!
//! ## Steps
//! 1. Cut the text at the first `{{Alt:` editorial annotation.
//! 2. Split into maximal runs of letters and hyphens.
//! 3. Drop tokens that are plain numbers.
//! 4. Strip punctuation inside the token.
//! 5. Lowercase.
//! 6. Drop stop-words.
//! 7. Apply the English Snowball stemmer.

use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashSet;
use std::path::Path;

/// Everything from this marker on is an editorial duplicate of the alt text.
pub const ANNOTATION_MARKER: &str = "{{Alt:";

/// Used when no stop-word file is configured.
pub const DEFAULT_STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any",
    "are", "as", "at", "be", "because", "been", "before", "being", "below", "between",
    "both", "but", "by", "can", "could", "did", "do", "does", "doing", "down", "during",
    "each", "few", "for", "from", "further", "had", "has", "have", "having", "he", "her",
    "here", "hers", "herself", "him", "himself", "his", "how", "i", "if", "in", "into",
    "is", "it", "its", "itself", "just", "me", "more", "most", "my", "myself", "no", "nor",
    "not", "now", "of", "off", "on", "once", "only", "or", "other", "our", "ours",
    "ourselves", "out", "over", "own", "same", "she", "should", "so", "some", "such",
    "than", "that", "the", "their", "theirs", "them", "themselves", "then", "there",
    "these", "they", "this", "those", "through", "to", "too", "under", "until", "up",
    "very", "was", "we", "were", "what", "when", "where", "which", "while", "who", "whom",
    "why", "will", "with", "would", "you", "your", "yours", "yourself", "yourselves",
];

#[derive(Debug, thiserror::Error)]
pub enum NormalizerError {
    #[error("failed to read stop-word file {path}: {source}")]
    StopWords {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub struct Normalizer {
    token_re: Regex,
    stop_words: HashSet<String>,
    stemmer: Stemmer,
}

impl Normalizer {
    /// Builds a normalizer with the given stop-words (matched case-insensitively).
    pub fn new<I, S>(stop_words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let stop_words = stop_words
            .into_iter()
            .map(|word| word.as_ref().trim().to_lowercase())
            .filter(|word| !word.is_empty())
            .collect();

        Self {
            token_re: token_regex(),
            stop_words,
            stemmer: Stemmer::create(Algorithm::English),
        }
    }

    /// Normalizer with the built-in English stop-word list.
    pub fn english() -> Self {
        Self::new(DEFAULT_STOP_WORDS.iter().copied())
    }

    /// Loads stop-words from a file holding one word per line.
    pub fn from_stop_word_file(path: &Path) -> Result<Self, NormalizerError> {
        let contents =
            std::fs::read_to_string(path).map_err(|source| NormalizerError::StopWords {
                path: path.display().to_string(),
                source,
            })?;

        let normalizer = Self::new(contents.lines());
        tracing::info!(
            "Loaded {} stop-words from {}",
            normalizer.stop_words.len(),
            path.display()
        );
        Ok(normalizer)
    }

    pub fn is_stop_word(&self, word: &str) -> bool {
        self.stop_words.contains(&word.to_lowercase())
    }

    pub fn stop_word_count(&self) -> usize {
        self.stop_words.len()
    }

    /// Normalizes `text` into ordered terms. Duplicates are kept.
    pub fn normalize(&self, text: &str) -> Vec<String> {
        let text = match text.find(ANNOTATION_MARKER) {
            Some(marker) => &text[..marker],
            None => text,
        };

        self.token_re
            .find_iter(text)
            .map(|token| token.as_str())
            .filter(|token| token.parse::<i64>().is_err())
            .filter_map(|token| {
                let cleaned: String = token
                    .chars()
                    .filter(|c| !is_punctuation(*c))
                    .collect::<String>()
                    .to_lowercase();

                if cleaned.is_empty() || self.stop_words.contains(&cleaned) {
                    return None;
                }

                Some(self.stemmer.stem(&cleaned).into_owned())
            })
            .collect()
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::english()
    }
}

fn token_regex() -> Regex {
    Regex::new(r"[\p{L}-]+").expect("token pattern is a valid regex")
}

fn is_punctuation(c: char) -> bool {
    c.is_ascii_punctuation() || matches!(c, '\u{2010}'..='\u{2015}')
}
