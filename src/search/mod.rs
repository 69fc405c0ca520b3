//! Search strategies.
//!
//! Each backend turns a search term (plus an optional domain restriction)
//! into raw [`Candidate`]s. Backends that render pages borrow a tab from the
//! run's [`BrowserPool`] and route blocked pages through the
//! [`CaptchaCoordinator`]; the archive backends are plain HTTP.

mod archive_search;
mod cdx;
mod cordis;
mod duckduckgo;
mod google;
pub mod human;

pub use archive_search::{refine, ArchiveSearch, ArchiveHit};
pub use cdx::{parse_cdx_rows, ArchiveIndexSearch};
pub use cordis::{CordisPager, CordisSearch};
pub use duckduckgo::DuckDuckGoSearch;
pub use google::GoogleSearch;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::browser::{BrowserPage, BrowserPool};
use crate::captcha::{CaptchaChallenge, CaptchaCoordinator, Resolution};
use crate::config::{RunConfig, SearchEngineKind};
use crate::error::{ConfigError, ScrapeError};
use crate::http_client::HttpClient;
use crate::models::Candidate;

/// What a strategy produced for one term.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    Found(Vec<Candidate>),
    /// A block that neither the solver nor a human cleared in time.
    NeedsManualCaptcha(CaptchaChallenge),
}

impl SearchOutcome {
    pub fn candidates(&self) -> &[Candidate] {
        match self {
            Self::Found(c) => c,
            Self::NeedsManualCaptcha(_) => &[],
        }
    }
}

/// Common search contract.
#[async_trait]
pub trait SearchStrategy: Send + Sync {
    async fn search(&self, term: &str, domain: Option<&str>)
        -> Result<SearchOutcome, ScrapeError>;
}

/// Browser resources shared by the rendering backends.
#[derive(Clone)]
pub struct RenderContext {
    pub pool: Arc<BrowserPool>,
    pub captcha: Arc<CaptchaCoordinator>,
}

impl RenderContext {
    /// Clear a block on `page`, or hand back the unresolved challenge.
    pub async fn check_block(&self, page: &BrowserPage) -> Option<CaptchaChallenge> {
        match self.captcha.resolve(page).await {
            Resolution::Clear | Resolution::Solved => None,
            Resolution::Unresolved(challenge) => Some(challenge),
        }
    }
}

/// Order-preserving collector of unique results.
#[derive(Debug, Default)]
pub struct ResultSet {
    seen: HashSet<String>,
    items: Vec<Candidate>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a page of results; returns how many were new.
    pub fn absorb(&mut self, page: impl IntoIterator<Item = Candidate>) -> usize {
        let before = self.items.len();
        for candidate in page {
            if self.seen.insert(candidate.url.clone()) {
                self.items.push(candidate);
            }
        }
        self.items.len() - before
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_vec(self) -> Vec<Candidate> {
        self.items
    }
}

/// True when `url` is hosted on `domain` or one of its subdomains.
pub fn url_matches_domain(url: &str, domain: &str) -> bool {
    let domain = domain.trim_start_matches("www.").to_ascii_lowercase();
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
        .is_some_and(|host| host == domain || host.ends_with(&format!(".{}", domain)))
}

/// Append a `site:` restriction when a domain is given.
pub fn with_site(term: &str, domain: Option<&str>) -> String {
    match domain {
        Some(d) => format!("{} site:{}", term, d),
        None => term.to_string(),
    }
}

/// The closed set of configured backends.
pub enum SearchBackend {
    Google(GoogleSearch),
    DuckDuckGo(DuckDuckGoSearch),
    ArchiveIndex(ArchiveIndexSearch),
    ArchiveSearch(ArchiveSearch),
    Cordis(CordisSearch),
}

impl SearchBackend {
    /// Build the backend named by `config`.
    ///
    /// Rendering backends need `pool`; without one this is a configuration
    /// error rather than a silent empty search.
    pub fn build(
        config: &RunConfig,
        pool: Option<Arc<BrowserPool>>,
        captcha: Arc<CaptchaCoordinator>,
        http: HttpClient,
    ) -> Result<Self, ConfigError> {
        let kind = config.search_engine;
        let api_timeout = Duration::from_secs(config.search.api_timeout_secs);
        let max_items = config.search.archive_max_items;

        if kind.requires_browser() {
            let pool = pool.ok_or_else(|| {
                ConfigError::BrowserUnavailable(format!("{} renders result pages", kind))
            })?;
            let ctx = RenderContext { pool, captcha };
            return Ok(match kind {
                SearchEngineKind::Google => {
                    Self::Google(GoogleSearch::new(ctx, config.search.max_pages))
                }
                SearchEngineKind::DuckDuckGo => {
                    Self::DuckDuckGo(DuckDuckGoSearch::new(ctx, config.search.max_pages))
                }
                _ => Self::Cordis(CordisSearch::new(ctx, config.search.portal_max_pages)),
            });
        }

        Ok(match kind {
            SearchEngineKind::ArchiveIndex => {
                Self::ArchiveIndex(ArchiveIndexSearch::new(http, max_items, api_timeout))
            }
            _ => Self::ArchiveSearch(ArchiveSearch::new(http, max_items, api_timeout)),
        })
    }

    pub fn kind(&self) -> SearchEngineKind {
        match self {
            Self::Google(_) => SearchEngineKind::Google,
            Self::DuckDuckGo(_) => SearchEngineKind::DuckDuckGo,
            Self::ArchiveIndex(_) => SearchEngineKind::ArchiveIndex,
            Self::ArchiveSearch(_) => SearchEngineKind::ArchiveSearch,
            Self::Cordis(_) => SearchEngineKind::Cordis,
        }
    }
}

#[async_trait]
impl SearchStrategy for SearchBackend {
    async fn search(
        &self,
        term: &str,
        domain: Option<&str>,
    ) -> Result<SearchOutcome, ScrapeError> {
        match self {
            Self::Google(s) => s.search(term, domain).await,
            Self::DuckDuckGo(s) => s.search(term, domain).await,
            Self::ArchiveIndex(s) => s.search(term, domain).await,
            Self::ArchiveSearch(s) => s.search(term, domain).await,
            Self::Cordis(s) => {
                if domain.is_some() {
                    warn!("Cordis searches a single portal; ignoring the site domain");
                }
                s.search(term, None).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(url: &str) -> Candidate {
        Candidate::new(url, "t", "", SearchEngineKind::Google)
    }

    #[test]
    fn test_result_set_counts_only_new_urls() {
        let mut set = ResultSet::new();
        assert_eq!(set.absorb(vec![hit("https://a.gov/1"), hit("https://a.gov/2")]), 2);
        assert_eq!(set.absorb(vec![hit("https://a.gov/2"), hit("https://a.gov/3")]), 1);
        assert_eq!(set.absorb(vec![hit("https://a.gov/1")]), 0);
        let urls: Vec<String> = set.into_vec().into_iter().map(|c| c.url).collect();
        assert_eq!(urls, ["https://a.gov/1", "https://a.gov/2", "https://a.gov/3"]);
    }

    #[test]
    fn test_url_matches_domain() {
        assert!(url_matches_domain("https://usda.gov/page", "usda.gov"));
        assert!(url_matches_domain("https://www.ers.usda.gov/page", "usda.gov"));
        assert!(url_matches_domain("https://ers.usda.gov/x", "www.usda.gov"));
        assert!(!url_matches_domain("https://notusda.gov/page", "usda.gov"));
        assert!(!url_matches_domain("garbage", "usda.gov"));
    }

    #[test]
    fn test_with_site() {
        assert_eq!(with_site("Cotton", Some("usda.gov")), "Cotton site:usda.gov");
        assert_eq!(with_site("Cotton", None), "Cotton");
    }

    #[test]
    fn test_archive_backends_build_without_browser() {
        let http = HttpClient::new(Duration::from_secs(5), None).unwrap();
        let captcha = Arc::new(CaptchaCoordinator::new(
            &Default::default(),
            http.clone(),
            Arc::new(crate::captcha::ManualChannel::new(None)),
        ));
        let config = RunConfig::new(SearchEngineKind::ArchiveSearch);
        let backend = SearchBackend::build(&config, None, captcha.clone(), http.clone()).unwrap();
        assert_eq!(backend.kind(), SearchEngineKind::ArchiveSearch);

        let config = RunConfig::new(SearchEngineKind::Google);
        let err = SearchBackend::build(&config, None, captcha, http)
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::BrowserUnavailable(_)));
    }
}
