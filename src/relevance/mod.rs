//! Keyword relevance scoring.
//!
//! A document is kept when the summed occurrences of the query's significant
//! terms reach the configured minimum. Total word count is reported but never
//! decides the verdict on its own.

mod stopwords;

pub use stopwords::{is_stop_word, STOP_WORDS};

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::Regex;

use crate::models::OmitReason;

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").unwrap());
static URL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"https?://\S+").unwrap());
static WWW: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"www\.\S+").unwrap());
static LINK_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s+(?:visita|ver|visitar|click|enlace|link|url|ver en|más en|más información en|leer más en)[:\s]+\S+$").unwrap()
});
static BARE_DOMAIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+\w+\.\w+(?:\.\w+)*(?:/\S*)?").unwrap());

const SHORT_DESCRIPTION: usize = 100;
const PREVIEW_CHARS: usize = 1000;

/// Word count plus per-keyword occurrence counts for one document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Relevance {
    pub total_words: usize,
    /// Capitalized keyword to occurrences; only keywords that occur.
    pub keyword_counts: BTreeMap<String, usize>,
}

impl Relevance {
    pub fn total_matches(&self) -> usize {
        self.keyword_counts.values().sum()
    }

    pub fn formatted(&self) -> String {
        format_word_counts(self.total_words, &self.keyword_counts)
    }
}

/// Lowercase `\w+` tokens of `term`, minus stop words and short tokens, deduplicated.
pub fn significant_terms(term: &str) -> Vec<String> {
    let lower = term.to_lowercase();
    let mut terms: Vec<String> = Vec::new();
    for m in WORD.find_iter(&lower) {
        let word = m.as_str();
        if word.chars().count() > 2 && !is_stop_word(word) && !terms.iter().any(|t| t == word) {
            terms.push(word.to_string());
        }
    }
    terms
}

/// Count whitespace-separated words and whole-word keyword hits.
pub fn score(text: &str, term: &str) -> Relevance {
    let total_words = text.split_whitespace().count();
    let terms = significant_terms(term);
    if terms.is_empty() || text.is_empty() {
        return Relevance {
            total_words,
            keyword_counts: BTreeMap::new(),
        };
    }

    let lower = text.to_lowercase();
    let mut hits: HashMap<&str, usize> = HashMap::new();
    for m in WORD.find_iter(&lower) {
        if let Some(t) = terms.iter().find(|t| t.as_str() == m.as_str()) {
            *hits.entry(t.as_str()).or_default() += 1;
        }
    }

    let keyword_counts = hits
        .into_iter()
        .map(|(word, count)| (capitalize(word), count))
        .collect();

    Relevance {
        total_words,
        keyword_counts,
    }
}

/// Exclusion rule: reject when summed keyword matches fall below `min_matches`.
///
/// Returns the verdict and, when excluded, the reason.
pub fn should_exclude(
    _total_words: usize,
    keyword_counts: &BTreeMap<String, usize>,
    min_matches: u32,
) -> (bool, String) {
    let total: usize = keyword_counts.values().sum();
    let min = min_matches as usize;
    if total < min {
        (true, format!("total keyword matches {} < {}", total, min))
    } else {
        (false, String::new())
    }
}

/// Audit tag for an excluded document.
pub fn classify_exclusion(total_words: usize, min_matches: u32) -> OmitReason {
    if total_words < min_matches as usize {
        OmitReason::LowWordCount
    } else {
        OmitReason::NoKeywordMatches
    }
}

/// "Total words: N | Keyword: c | ..." with keywords in ascending order.
pub fn format_word_counts(total_words: usize, keyword_counts: &BTreeMap<String, usize>) -> String {
    let mut out = format!("Total words: {}", total_words);
    for (word, count) in keyword_counts {
        out.push_str(&format!(" | {}: {}", word, count));
    }
    out
}

/// Drop stop words from a query, keeping it intact if nothing would remain.
pub fn filter_stop_words(query: &str) -> String {
    let kept: Vec<&str> = query
        .split_whitespace()
        .filter(|w| !is_stop_word(&w.to_lowercase()))
        .collect();
    if kept.is_empty() {
        query.trim().to_string()
    } else {
        kept.join(" ")
    }
}

/// Remove URLs, link references and bare domains from a snippet.
pub fn clean_description(text: &str) -> String {
    let cleaned = URL.replace_all(text, "");
    let cleaned = WWW.replace_all(&cleaned, "");
    let cleaned = LINK_REF.replace_all(&cleaned, "");
    let cleaned = BARE_DOMAIN.replace_all(&cleaned, "");
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cleaned description, replaced by a text preview when it is too short to be useful.
pub fn describe(description: &str, text: &str) -> String {
    let cleaned = clean_description(description);
    if cleaned.chars().count() >= SHORT_DESCRIPTION || text.is_empty() {
        return cleaned;
    }
    let head: String = text.chars().take(PREVIEW_CHARS).collect();
    let preview = clean_description(&head);
    if preview.chars().count() > cleaned.chars().count() * 2 {
        preview
    } else {
        cleaned
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Keep/drop decision for one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Keep(Relevance),
    Exclude {
        relevance: Relevance,
        reason: OmitReason,
        detail: String,
    },
}

/// Applies the exclusion rule at a fixed threshold.
#[derive(Debug, Clone, Copy)]
pub struct RelevanceFilter {
    min_keyword_matches: u32,
}

impl RelevanceFilter {
    pub fn new(min_keyword_matches: u32) -> Self {
        Self {
            min_keyword_matches,
        }
    }

    pub fn evaluate(&self, text: &str, term: &str) -> Verdict {
        let relevance = score(text, term);
        let (excluded, detail) = should_exclude(
            relevance.total_words,
            &relevance.keyword_counts,
            self.min_keyword_matches,
        );
        if excluded {
            Verdict::Exclude {
                reason: classify_exclusion(relevance.total_words, self.min_keyword_matches),
                relevance,
                detail,
            }
        } else {
            Verdict::Keep(relevance)
        }
    }
}
