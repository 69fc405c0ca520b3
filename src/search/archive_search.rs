//! Full-text search over the public web archive, with local re-ranking.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::cdx::{fetch_captures, snapshot_url};
use super::{SearchOutcome, SearchStrategy};
use crate::config::SearchEngineKind;
use crate::error::ScrapeError;
use crate::http_client::HttpClient;
use crate::models::{Candidate, CandidateExtras};

const SEARCH_ENDPOINTS: [&str; 2] = [
    "https://archive.org/advancedsearch.php",
    "https://archive.org/services/search/v1/scrape",
];
const FIELDS: &str = "title,identifier,original,timestamp,mediatype,format";

/// Below this a hit is not considered relevant.
const MIN_SCORE: f64 = 0.10;
/// Score given to every hit when nothing clears [`MIN_SCORE`].
const FLOOR_SCORE: f64 = 0.05;

/// A raw archive hit before scoring.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArchiveHit {
    pub url: String,
    pub timestamp: Option<String>,
    pub title: String,
    pub description: String,
    pub mediatype: Option<String>,
    pub format: Option<String>,
}

impl ArchiveHit {
    /// Read a search API document. Fields may be scalars or arrays.
    fn from_doc(doc: &Value) -> Option<Self> {
        let url = field(doc, "original").or_else(|| field(doc, "url"))?;
        let title = field(doc, "title").unwrap_or_else(|| format!("Archived: {}", url));
        Some(Self {
            timestamp: field(doc, "timestamp").or_else(|| field(doc, "date")),
            title,
            description: field(doc, "description").unwrap_or_default(),
            mediatype: field(doc, "mediatype"),
            format: field(doc, "format"),
            url,
        })
    }

    fn from_capture(c: Candidate) -> Self {
        Self {
            timestamp: c.extras.archive_timestamp,
            title: c.title,
            description: c.description,
            mediatype: c.extras.mediatype,
            format: c.extras.format,
            url: c.url,
        }
    }
}

fn field(doc: &Value, key: &str) -> Option<String> {
    let value = match doc.get(key)? {
        Value::Array(items) => items.first()?.clone(),
        other => other.clone(),
    };
    match value {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Documents from either API shape: `response.docs` or `items`.
fn docs(body: &Value) -> Vec<ArchiveHit> {
    let list = body
        .get("response")
        .and_then(|r| r.get("docs"))
        .and_then(Value::as_array)
        .or_else(|| body.get("items").and_then(Value::as_array));
    list.map(|items| items.iter().filter_map(ArchiveHit::from_doc).collect())
        .unwrap_or_default()
}

/// Scheme, host and path only, without a trailing slash.
pub fn normalize_url(raw: &str) -> String {
    let parsed = url::Url::parse(raw).or_else(|_| url::Url::parse(&format!("https://{}", raw)));
    match parsed {
        Ok(u) => {
            let host = match (u.host_str(), u.port()) {
                (Some(h), Some(p)) => format!("{}:{}", h, p),
                (Some(h), None) => h.to_string(),
                (None, _) => String::new(),
            };
            format!("{}://{}{}", u.scheme(), host, u.path().trim_end_matches('/'))
        }
        Err(_) => raw.to_string(),
    }
}

/// Phrase and token scorer for one query.
struct Scorer {
    phrase: String,
    tokens: Vec<(String, Option<Regex>)>,
}

impl Scorer {
    fn new(query: &str) -> Self {
        let phrase = query.trim().to_lowercase();
        let mut seen = HashSet::new();
        let tokens = phrase
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| t.chars().count() > 2 && seen.insert(t.to_string()))
            .map(|t| {
                let boundary = Regex::new(&format!(r"\b{}\b", regex::escape(t))).ok();
                (t.to_string(), boundary)
            })
            .collect();
        Self { phrase, tokens }
    }

    fn is_empty(&self) -> bool {
        self.phrase.is_empty()
    }

    fn score(&self, title: &str, description: &str, normalized_url: &str) -> f64 {
        if self.phrase.is_empty() {
            return 0.0;
        }
        let title = title.to_lowercase();
        let description = description.to_lowercase();
        let url = normalized_url.to_lowercase();

        let mut score: f64 = 0.0;
        if title.contains(&self.phrase) {
            score += 0.6;
        }
        if description.contains(&self.phrase) {
            score += 0.25;
        }
        if url.contains(&self.phrase) {
            score += 0.15;
        }

        for (token, boundary) in &self.tokens {
            let whole_word = |text: &str| boundary.as_ref().is_some_and(|re| re.is_match(text));
            if whole_word(&title) {
                score += 0.08;
            }
            if whole_word(&description) {
                score += 0.04;
            }
            if url.contains(token.as_str()) {
                score += 0.02;
            }
        }
        score.min(1.0)
    }
}

fn to_candidate(hit: ArchiveHit, score: f64) -> Candidate {
    let extras = CandidateExtras {
        snapshot_url: hit.timestamp.as_deref().map(|ts| snapshot_url(ts, &hit.url)),
        archive_timestamp: hit.timestamp,
        score: Some((score * 1000.0).round() / 1000.0),
        mediatype: hit.mediatype,
        format: hit.format,
    };
    Candidate::new(hit.url, hit.title, hit.description, SearchEngineKind::ArchiveSearch)
        .with_extras(extras)
}

/// Filter, score, de-duplicate and rank raw hits.
pub fn refine(
    hits: Vec<ArchiveHit>,
    query: &str,
    domain: Option<&str>,
    max_items: usize,
) -> Vec<Candidate> {
    let scorer = Scorer::new(query);
    let domain = domain.map(str::to_lowercase);

    let in_scope: Vec<(String, ArchiveHit)> = hits
        .into_iter()
        .filter(|h| !h.url.is_empty())
        .map(|h| (normalize_url(&h.url), h))
        .filter(|(norm, _)| {
            domain
                .as_deref()
                .is_none_or(|d| norm.to_lowercase().contains(d))
        })
        .collect();

    let mut seen = HashSet::new();
    let mut ranked: Vec<(f64, ArchiveHit)> = Vec::new();
    let mut below: Vec<(String, ArchiveHit)> = Vec::new();
    for (norm, hit) in in_scope {
        let score = scorer.score(&hit.title, &hit.description, &norm);
        if !scorer.is_empty() && score < MIN_SCORE {
            below.push((norm, hit));
            continue;
        }
        if seen.insert(norm) {
            ranked.push((score, hit));
        }
    }

    if ranked.is_empty() && !below.is_empty() {
        debug!("No archive hit cleared {:.2}; keeping all at floor score", MIN_SCORE);
        for (norm, hit) in below {
            if seen.insert(norm) {
                ranked.push((FLOOR_SCORE, hit));
            }
        }
    }

    ranked.sort_by(|a, b| b.0.total_cmp(&a.0));
    ranked
        .into_iter()
        .take(max_items)
        .map(|(score, hit)| to_candidate(hit, score))
        .collect()
}

pub struct ArchiveSearch {
    http: HttpClient,
    max_items: usize,
    timeout: Duration,
}

impl ArchiveSearch {
    pub fn new(http: HttpClient, max_items: usize, timeout: Duration) -> Self {
        Self {
            http,
            max_items: max_items.max(1),
            timeout,
        }
    }

    async fn query_endpoint(&self, base: &str, term: &str) -> Result<Vec<ArchiveHit>, ScrapeError> {
        let url = reqwest::Url::parse_with_params(
            base,
            &[
                ("q", format!("text:\"{}\" AND mediatype:web", term)),
                ("fl", FIELDS.to_string()),
                ("output", "json".to_string()),
                ("rows", self.max_items.to_string()),
            ],
        )
        .map_err(|e| ScrapeError::Parse(format!("bad archive url: {}", e)))?;

        let response = self.http.get_with(url.as_str(), &[], Some(self.timeout)).await?;
        if !response.is_success() {
            return Err(ScrapeError::Unavailable(format!(
                "archive API {} returned {}",
                base, response.status
            )));
        }
        let body: Value = serde_json::from_str(&response.text().await?)
            .map_err(|e| ScrapeError::Parse(format!("archive API {}: {}", base, e)))?;
        Ok(docs(&body))
    }

    async fn free_text(&self, term: &str) -> Vec<ArchiveHit> {
        let mut hits = Vec::new();
        for base in SEARCH_ENDPOINTS {
            if hits.len() >= self.max_items {
                break;
            }
            match self.query_endpoint(base, term).await {
                Ok(found) => {
                    debug!("{} returned {} docs", base, found.len());
                    let room = self.max_items - hits.len();
                    hits.extend(found.into_iter().take(room));
                }
                Err(e) => warn!("Archive API {} failed: {}", base, e),
            }
        }
        hits
    }
}

#[async_trait]
impl SearchStrategy for ArchiveSearch {
    async fn search(
        &self,
        term: &str,
        domain: Option<&str>,
    ) -> Result<SearchOutcome, ScrapeError> {
        let hits = match domain {
            Some(d) => fetch_captures(
                &self.http,
                d,
                self.max_items,
                self.timeout,
                SearchEngineKind::ArchiveSearch,
            )
            .await?
            .into_iter()
            .map(ArchiveHit::from_capture)
            .collect(),
            None => self.free_text(term).await,
        };

        let found = refine(hits, term, domain, self.max_items);
        info!("Archive search returned {} results for '{}'", found.len(), term);
        Ok(SearchOutcome::Found(found))
    }
}
