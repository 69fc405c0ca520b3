//! CORDIS (EU research results portal) search.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};

use super::human;
use super::{RenderContext, ResultSet, SearchOutcome, SearchStrategy};
use crate::browser::BrowserPage;
use crate::config::SearchEngineKind;
use crate::error::ScrapeError;
use crate::extract::collapse_whitespace;
use crate::models::{Candidate, CandidateExtras};
use crate::relevance::filter_stop_words;

const BASE_URL: &str = "https://cordis.europa.eu/search";
const CONSENT_BUTTON: &str = "button.wt-ecl-cookie-consent-banner__accept-button";
const RESULT_CARD: &str = "app-card-search";
/// Consecutive empty pages before giving up.
const MAX_EMPTY_PAGES: u32 = 3;

static CARD: LazyLock<Selector> = LazyLock::new(|| Selector::parse(RESULT_CARD).unwrap());
static CARD_TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a.c-card-search__title").unwrap());
static CARD_BODY: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.c-card-search__block").unwrap());

/// Results page URL for a stop-word-filtered query.
pub fn page_url(filtered_query: &str, page: usize) -> String {
    let q: String = url::form_urlencoded::byte_serialize(filtered_query.as_bytes()).collect();
    format!(
        "{}?q={}&p={}&num=10&srt=Relevance:decreasing&archived=true",
        BASE_URL, q, page
    )
}

/// Pagination bookkeeping.
#[derive(Debug, Default)]
pub struct CordisPager {
    results: ResultSet,
    empty_streak: u32,
}

impl CordisPager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one page of results; returns false when pagination should stop.
    pub fn absorb(&mut self, page: usize, found: Vec<Candidate>) -> bool {
        if found.is_empty() {
            self.empty_streak += 1;
            debug!("Empty Cordis page {} ({} in a row)", page, self.empty_streak);
            return self.empty_streak < MAX_EMPTY_PAGES;
        }
        self.empty_streak = 0;
        let added = self.results.absorb(found);
        info!(
            "Cordis page {}: {} new results ({} total)",
            page,
            added,
            self.results.len()
        );
        !(added == 0 && page > 1)
    }

    pub fn into_vec(self) -> Vec<Candidate> {
        self.results.into_vec()
    }
}

/// Resolve a card link against the portal.
fn absolute(href: &str) -> Option<String> {
    let base = url::Url::parse(BASE_URL).ok()?;
    base.join(href).ok().map(|u| u.to_string())
}

pub(crate) fn parse_cards(html: &str) -> Vec<Candidate> {
    let document = Html::parse_document(html);
    document
        .select(&CARD)
        .filter_map(|card| {
            let title_el = card.select(&CARD_TITLE).next()?;
            let url = absolute(title_el.value().attr("href")?)?;
            let title = collapse_whitespace(&title_el.text().collect::<String>());
            let description = card
                .select(&CARD_BODY)
                .next()
                .map(|b| collapse_whitespace(&b.text().collect::<String>()))
                .unwrap_or_default();
            Some(
                Candidate::new(url, title, description, SearchEngineKind::Cordis).with_extras(
                    CandidateExtras {
                        mediatype: Some("web".into()),
                        ..Default::default()
                    },
                ),
            )
        })
        .collect()
}

pub struct CordisSearch {
    ctx: RenderContext,
    max_pages: usize,
}

impl CordisSearch {
    pub fn new(ctx: RenderContext, max_pages: usize) -> Self {
        Self {
            ctx,
            max_pages: max_pages.max(1),
        }
    }

    async fn load(&self, page: &BrowserPage, url: &str, first: bool) -> Result<(), ScrapeError> {
        debug!("Navigating to {}", url);
        page.goto(url).await?;

        if first {
            if page.wait_for_selector(CONSENT_BUTTON, Duration::from_secs(10)).await
                && page.click(CONSENT_BUTTON).await?
            {
                info!("Accepted Cordis cookie consent");
                tokio::time::sleep(Duration::from_secs(2)).await;
            } else {
                debug!("No Cordis consent banner");
            }
        }

        if !page.wait_for_selector(RESULT_CARD, Duration::from_secs(30)).await {
            warn!("No result cards on {}", url);
        }
        Ok(())
    }

    async fn run(&self, page: &BrowserPage, query: &str) -> Result<SearchOutcome, ScrapeError> {
        let mut pager = CordisPager::new();
        for n in 1..=self.max_pages {
            self.load(page, &page_url(query, n), n == 1).await?;
            if let Some(challenge) = self.ctx.check_block(page).await {
                return Ok(SearchOutcome::NeedsManualCaptcha(challenge));
            }

            let html = page.html().await?;
            if !pager.absorb(n, parse_cards(&html)) {
                break;
            }
            human::pause(1.0..2.5).await;
        }
        Ok(SearchOutcome::Found(pager.into_vec()))
    }
}

#[async_trait]
impl SearchStrategy for CordisSearch {
    async fn search(
        &self,
        term: &str,
        _domain: Option<&str>,
    ) -> Result<SearchOutcome, ScrapeError> {
        let query = filter_stop_words(term);
        info!("Cordis search: '{}' (from '{}')", query, term);

        let page = self.ctx.pool.lease().await?;
        let outcome = self.run(&page, &query).await;
        page.release().await;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cards(urls: &[&str]) -> Vec<Candidate> {
        urls.iter()
            .map(|u| Candidate::new(*u, "t", "", SearchEngineKind::Cordis))
            .collect()
    }

    #[test]
    fn test_page_url() {
        assert_eq!(
            page_url("cotton fibre", 2),
            "https://cordis.europa.eu/search?q=cotton+fibre&p=2&num=10&srt=Relevance:decreasing&archived=true"
        );
    }

    #[test]
    fn test_stops_after_three_empty_pages() {
        let mut pager = CordisPager::new();
        assert!(pager.absorb(1, cards(&["https://cordis.europa.eu/a"])));
        assert!(pager.absorb(2, vec![]));
        assert!(pager.absorb(3, vec![]));
        assert!(!pager.absorb(4, vec![]));
    }

    #[test]
    fn test_empty_streak_resets() {
        let mut pager = CordisPager::new();
        assert!(pager.absorb(1, vec![]));
        assert!(pager.absorb(2, vec![]));
        assert!(pager.absorb(3, cards(&["https://cordis.europa.eu/a"])));
        assert!(pager.absorb(4, vec![]));
        assert!(pager.absorb(5, vec![]));
    }

    #[test]
    fn test_stops_when_page_adds_nothing_new() {
        let mut pager = CordisPager::new();
        assert!(pager.absorb(1, cards(&["https://cordis.europa.eu/a"])));
        assert!(!pager.absorb(2, cards(&["https://cordis.europa.eu/a"])));
        assert_eq!(pager.into_vec().len(), 1);
    }

    #[test]
    fn test_parse_cards() {
        let html = r#"
            <app-card-search>
              <a class="c-card-search__title" href="/project/id/101000001">  Cotton
                 fibre recycling </a>
              <div class="c-card-search__block">Project   summary</div>
            </app-card-search>
            <app-card-search><span>no link</span></app-card-search>
        "#;
        let found = parse_cards(html);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].url, "https://cordis.europa.eu/project/id/101000001");
        assert_eq!(found[0].title, "Cotton fibre recycling");
        assert_eq!(found[0].description, "Project summary");
    }
}
