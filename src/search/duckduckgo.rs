//! DuckDuckGo search through its HTML endpoint.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::{debug, info};

use super::human::{self, TypingStyle};
use super::{url_matches_domain, with_site, RenderContext, ResultSet, SearchOutcome, SearchStrategy};
use crate::browser::BrowserPage;
use crate::config::SearchEngineKind;
use crate::error::ScrapeError;
use crate::extract::collapse_whitespace;
use crate::models::{Candidate, CandidateExtras};

/// DuckDuckGo HTML search URL.
const DDG_SEARCH_URL: &str = "https://html.duckduckgo.com/html/";
const SEARCH_BOX: &str = "input[name=\"q\"]";
const NEXT_BUTTON: &str = ".nav-link input[type=\"submit\"][value=\"Next\"]";

static RESULT: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".result__body").unwrap());
static TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h2.result__title a").unwrap());
static SNIPPET: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".result__snippet").unwrap());

pub struct DuckDuckGoSearch {
    ctx: RenderContext,
    max_pages: usize,
    typing: TypingStyle,
}

impl DuckDuckGoSearch {
    pub fn new(ctx: RenderContext, max_pages: usize) -> Self {
        Self {
            ctx,
            max_pages: max_pages.max(1),
            typing: TypingStyle::default(),
        }
    }

    async fn run(
        &self,
        page: &BrowserPage,
        query: &str,
        domain: Option<&str>,
    ) -> Result<SearchOutcome, ScrapeError> {
        page.goto(DDG_SEARCH_URL).await?;
        human::pause(1.0..3.0).await;
        human::wander(page, 2..4).await;

        human::type_into(page, SEARCH_BOX, query, &self.typing).await?;
        human::pause(0.8..2.0).await;
        human::press_enter(page, SEARCH_BOX).await?;

        let mut results = ResultSet::new();
        for page_num in 1..=self.max_pages {
            page.wait_for_any(&[".result__body", ".no-results"], Duration::from_secs(20))
                .await;
            if let Some(challenge) = self.ctx.check_block(page).await {
                return Ok(SearchOutcome::NeedsManualCaptcha(challenge));
            }

            human::skim(page).await;
            let html = page.html().await?;
            let hits = parse_results(&html)
                .into_iter()
                .filter(|c| domain.is_none_or(|d| url_matches_domain(&c.url, d)));
            let added = results.absorb(hits);
            info!(
                "DuckDuckGo page {}: {} new results ({} total)",
                page_num,
                added,
                results.len()
            );
            if added == 0 {
                break;
            }

            if !page.click(NEXT_BUTTON).await? {
                debug!("No further DuckDuckGo pages");
                break;
            }
            human::pause(3.0..6.0).await;
        }

        Ok(SearchOutcome::Found(results.into_vec()))
    }
}

#[async_trait]
impl SearchStrategy for DuckDuckGoSearch {
    async fn search(
        &self,
        term: &str,
        domain: Option<&str>,
    ) -> Result<SearchOutcome, ScrapeError> {
        let query = with_site(term, domain);
        info!("DuckDuckGo search: '{}'", query);

        let page = self.ctx.pool.lease().await?;
        let outcome = self.run(&page, &query, domain).await;
        page.release().await;
        outcome
    }
}

/// Extract the actual URL from DuckDuckGo's redirect URL.
pub(crate) fn extract_url(href: &str) -> Option<String> {
    let redirect = href
        .strip_prefix("https:")
        .unwrap_or(href)
        .strip_prefix("//duckduckgo.com/l/");
    if let Some(rest) = redirect {
        let query = rest.trim_start_matches('?');
        return url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == "uddg")
            .map(|(_, v)| v.into_owned());
    }

    if href.starts_with("http://") || href.starts_with("https://") {
        Some(href.to_string())
    } else if href.starts_with("//") {
        Some(format!("https:{}", href))
    } else {
        None
    }
}

/// Parse search results from HTML.
pub(crate) fn parse_results(html: &str) -> Vec<Candidate> {
    let document = Html::parse_document(html);
    let mut out = Vec::new();

    for body in document.select(&RESULT) {
        let Some(link) = body.select(&TITLE).next() else {
            continue;
        };
        let Some(url) = link.value().attr("href").and_then(extract_url) else {
            continue;
        };
        let title = collapse_whitespace(&link.text().collect::<String>());
        let description = body
            .select(&SNIPPET)
            .next()
            .map(|s| collapse_whitespace(&s.text().collect::<String>()))
            .unwrap_or_default();

        out.push(
            Candidate::new(url, title, description, SearchEngineKind::DuckDuckGo).with_extras(
                CandidateExtras {
                    mediatype: Some("web".into()),
                    ..Default::default()
                },
            ),
        );
    }

    debug!("Parsed {} results from DuckDuckGo", out.len());
    out
}
