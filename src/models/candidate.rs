//! Raw search hits.

use serde::{Deserialize, Serialize};

use crate::config::SearchEngineKind;

/// Backend-specific fields carried alongside a hit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateExtras {
    /// Archive capture timestamp (`YYYYMMDDhhmmss`).
    pub archive_timestamp: Option<String>,
    /// Archived snapshot URL; extraction reads this instead of `url` when set.
    pub snapshot_url: Option<String>,
    /// Relevance score assigned by the archive search engine.
    pub score: Option<f64>,
    pub mediatype: Option<String>,
    pub format: Option<String>,
}

/// An unverified search hit before extraction and filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub url: String,
    pub title: String,
    pub description: String,
    pub source_engine: SearchEngineKind,
    #[serde(default)]
    pub extras: CandidateExtras,
}

impl Candidate {
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        source_engine: SearchEngineKind,
    ) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            description: description.into(),
            source_engine,
            extras: CandidateExtras::default(),
        }
    }

    pub fn with_extras(mut self, extras: CandidateExtras) -> Self {
        self.extras = extras;
        self
    }

    /// URL the content extractor should read.
    pub fn extraction_url(&self) -> &str {
        self.extras.snapshot_url.as_deref().unwrap_or(&self.url)
    }

    /// Host of the candidate URL, lowercased.
    pub fn host(&self) -> Option<String> {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_url_prefers_snapshot() {
        let c = Candidate::new("https://usda.gov/a", "A", "", SearchEngineKind::ArchiveIndex)
            .with_extras(CandidateExtras {
                snapshot_url: Some("https://web.archive.org/web/2020/https://usda.gov/a".into()),
                ..Default::default()
            });
        assert!(c.extraction_url().starts_with("https://web.archive.org/"));

        let plain = Candidate::new("https://usda.gov/b", "B", "", SearchEngineKind::Google);
        assert_eq!(plain.extraction_url(), "https://usda.gov/b");
    }

    #[test]
    fn test_host() {
        let c = Candidate::new("https://WWW.Usda.GOV/x", "", "", SearchEngineKind::Google);
        assert_eq!(c.host().as_deref(), Some("www.usda.gov"));
        let bad = Candidate::new("not a url", "", "", SearchEngineKind::Google);
        assert_eq!(bad.host(), None);
    }
}
