//! Kept and omitted result records.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Candidate, Query};

/// A kept result. One per unique (code, name, url) per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeRecord {
    pub code: String,
    pub name: String,
    pub title: String,
    pub description: String,
    pub url: String,
    pub formatted_word_counts: String,
}

/// Why a candidate did not become a [`ScrapeRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OmitReason {
    #[serde(rename = "duplicate")]
    Duplicate,
    #[serde(rename = "extraction timeout")]
    ExtractionTimeout,
    #[serde(rename = "extraction failed")]
    ExtractionFailed,
    #[serde(rename = "extraction error")]
    ExtractionError,
    #[serde(rename = "low word count")]
    LowWordCount,
    #[serde(rename = "no keyword matches")]
    NoKeywordMatches,
    #[serde(rename = "non-government domain")]
    NonGovernment,
    #[serde(rename = "missing url")]
    MissingUrl,
}

impl OmitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Duplicate => "duplicate",
            Self::ExtractionTimeout => "extraction timeout",
            Self::ExtractionFailed => "extraction failed",
            Self::ExtractionError => "extraction error",
            Self::LowWordCount => "low word count",
            Self::NoKeywordMatches => "no keyword matches",
            Self::NonGovernment => "non-government domain",
            Self::MissingUrl => "missing url",
        }
    }
}

impl fmt::Display for OmitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit entry for a rejected or failed candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OmittedRecord {
    pub code: String,
    pub name: String,
    pub title: String,
    pub url: String,
    pub description: String,
    pub reason: OmitReason,
    /// Free-form detail, e.g. the error message or the match count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl OmittedRecord {
    pub fn new(query: &Query, candidate: &Candidate, reason: OmitReason) -> Self {
        Self {
            code: query.code.clone(),
            name: query.name.clone(),
            title: candidate.title.clone(),
            url: candidate.url.clone(),
            description: candidate.description.clone(),
            reason,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
