//! Web archive URL-pattern index (CDX API).

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{SearchOutcome, SearchStrategy};
use crate::config::SearchEngineKind;
use crate::error::ScrapeError;
use crate::http_client::HttpClient;
use crate::models::{Candidate, CandidateExtras};

/// CDX API base URL.
const CDX_API_URL: &str = "http://web.archive.org/cdx/search/cdx";

/// Lists archived captures under a domain. The search term is not used by
/// the index itself; relevance is decided after extraction.
pub struct ArchiveIndexSearch {
    http: HttpClient,
    max_items: usize,
    timeout: Duration,
}

impl ArchiveIndexSearch {
    pub fn new(http: HttpClient, max_items: usize, timeout: Duration) -> Self {
        Self {
            http,
            max_items: max_items.max(1),
            timeout,
        }
    }
}

/// Snapshot URL for a capture.
pub fn snapshot_url(timestamp: &str, original: &str) -> String {
    format!("https://web.archive.org/web/{}/{}", timestamp, original)
}

/// Build the CDX API URL with parameters.
fn build_cdx_url(domain: &str, limit: usize) -> Result<reqwest::Url, ScrapeError> {
    reqwest::Url::parse_with_params(
        CDX_API_URL,
        &[
            ("url", format!("*.{}/*", domain)),
            ("output", "json".to_string()),
            ("filter", "statuscode:200".to_string()),
            ("collapse", "urlkey".to_string()),
            ("limit", limit.to_string()),
        ],
    )
    .map_err(|e| ScrapeError::Parse(format!("bad CDX url for {}: {}", domain, e)))
}

/// Query the index for captures under `domain`.
pub(crate) async fn fetch_captures(
    http: &HttpClient,
    domain: &str,
    limit: usize,
    timeout: Duration,
    engine: SearchEngineKind,
) -> Result<Vec<Candidate>, ScrapeError> {
    let url = build_cdx_url(domain, limit)?;
    debug!("Querying CDX API: {}", url);

    let response = http.get_with(url.as_str(), &[], Some(timeout)).await?;
    if !response.is_success() {
        return Err(ScrapeError::Unavailable(format!(
            "CDX API returned {}",
            response.status
        )));
    }
    let text = response.text().await?;
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let rows: serde_json::Value = serde_json::from_str(&text)
        .map_err(|e| ScrapeError::Parse(format!("Failed to parse CDX response: {}", e)))?;
    Ok(parse_cdx_rows(&rows, limit, engine))
}

/// Map CDX rows `[urlkey, timestamp, original, ...]` to candidates.
/// The first row is the field-name header.
pub fn parse_cdx_rows(
    rows: &serde_json::Value,
    limit: usize,
    engine: SearchEngineKind,
) -> Vec<Candidate> {
    let Some(rows) = rows.as_array() else {
        return Vec::new();
    };

    rows.iter()
        .skip(1)
        .filter_map(|row| {
            let row = row.as_array()?;
            let original = row.get(2)?.as_str().filter(|s| !s.is_empty())?;
            let timestamp = row.get(1).and_then(|t| t.as_str()).filter(|t| !t.is_empty());
            let extras = CandidateExtras {
                archive_timestamp: timestamp.map(str::to_string),
                snapshot_url: Some(match timestamp {
                    Some(ts) => snapshot_url(ts, original),
                    None => original.to_string(),
                }),
                mediatype: Some("web".into()),
                ..Default::default()
            };
            Some(
                Candidate::new(original, format!("Archived: {}", original), "", engine)
                    .with_extras(extras),
            )
        })
        .take(limit)
        .collect()
}

#[async_trait]
impl SearchStrategy for ArchiveIndexSearch {
    async fn search(
        &self,
        term: &str,
        domain: Option<&str>,
    ) -> Result<SearchOutcome, ScrapeError> {
        let Some(domain) = domain else {
            return Err(ScrapeError::Parse(
                "archive index search needs a site domain".into(),
            ));
        };
        let found = fetch_captures(
            &self.http,
            domain,
            self.max_items,
            self.timeout,
            SearchEngineKind::ArchiveIndex,
        )
        .await?;
        info!(
            "Archive index returned {} captures for {} ('{}')",
            found.len(),
            domain,
            term
        );
        Ok(SearchOutcome::Found(found))
    }
}
