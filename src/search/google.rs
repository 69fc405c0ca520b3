//! Rendered Google search with human-like pacing.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};

use super::human::{self, TypingStyle};
use super::{with_site, RenderContext, ResultSet, SearchOutcome, SearchStrategy};
use crate::browser::BrowserPage;
use crate::config::SearchEngineKind;
use crate::error::ScrapeError;
use crate::extract::collapse_whitespace;
use crate::models::{Candidate, CandidateExtras};

const HOMEPAGE: &str = "https://www.google.com/";
const SEARCH_BOX: &str = "textarea[name=\"q\"]";
const SEARCH_BUTTON: &str = "input[value*=\"Search\"], button[aria-label*=\"search\"]";
const NEXT_LINK: &str = "a#pnnext";
const CONSENT_SCRIPT: &str = r#"
    (() => {
        const labels = ['Accept all', 'Aceptar todo'];
        const button = Array.from(document.querySelectorAll('button'))
            .find(b => labels.some(l => (b.innerText || '').trim().startsWith(l)));
        if (!button) return false;
        button.click();
        return true;
    })()
"#;
const BLOCK_SELECTORS: [&str; 3] = ["#search", "iframe[src*=\"recaptcha\"]", "form#captcha-form"];

pub struct GoogleSearch {
    ctx: RenderContext,
    max_pages: usize,
    typing: TypingStyle,
}

impl GoogleSearch {
    pub fn new(ctx: RenderContext, max_pages: usize) -> Self {
        Self {
            ctx,
            max_pages: max_pages.max(1),
            typing: TypingStyle::default(),
        }
    }

    /// Land on the homepage and behave like a person for a few seconds.
    async fn warm_up(&self, page: &BrowserPage) -> Result<(), ScrapeError> {
        page.goto(HOMEPAGE).await?;
        human::pause(3.0..8.0).await;

        let scroll = {
            let mut rng = rand::rng();
            rng.random_bool(0.4).then(|| rng.random_range(200..400))
        };
        if let Some(px) = scroll {
            human::scroll_by(page, px).await;
            human::pause(0.5..1.2).await;
        }

        if page.eval_bool(CONSENT_SCRIPT).await.unwrap_or(false) {
            info!("Accepted Google cookie consent");
            human::pause(2.0..4.0).await;
        }

        human::wander(page, 3..6).await;
        human::pause(2.0..4.5).await;
        Ok(())
    }

    async fn submit(&self, page: &BrowserPage, query: &str) -> Result<(), ScrapeError> {
        human::type_into(page, SEARCH_BOX, query, &self.typing).await?;
        human::pause(1.5..4.0).await;

        let use_button = rand::rng().random_bool(0.3);
        if use_button && page.click(SEARCH_BUTTON).await.unwrap_or(false) {
            debug!("Submitted with the search button");
            return Ok(());
        }
        human::press_enter(page, SEARCH_BOX).await
    }

    async fn run(&self, page: &BrowserPage, query: &str) -> Result<SearchOutcome, ScrapeError> {
        self.warm_up(page).await?;
        if let Some(challenge) = self.ctx.check_block(page).await {
            return Ok(SearchOutcome::NeedsManualCaptcha(challenge));
        }

        self.submit(page, query).await?;

        let wait = Duration::from_secs(rand::rng().random_range(35..45));
        if page.wait_for_any(&BLOCK_SELECTORS, wait).await.is_none() {
            warn!("Google results did not load for '{}'", query);
        }

        let mut results = ResultSet::new();
        for page_num in 1..=self.max_pages {
            if let Some(challenge) = self.ctx.check_block(page).await {
                return Ok(SearchOutcome::NeedsManualCaptcha(challenge));
            }
            if !page.wait_for_selector("#search", Duration::from_secs(30)).await {
                debug!("No results container on page {}", page_num);
                break;
            }

            human::skim(page).await;
            human::pause(2.0..5.0).await;

            let html = page.html().await?;
            let added = results.absorb(parse_results(&html));
            info!(
                "Google page {}: {} new results ({} total)",
                page_num,
                added,
                results.len()
            );
            if added == 0 {
                break;
            }

            if !page.click(NEXT_LINK).await? {
                break;
            }
            human::pause(5.0..10.0).await;
        }

        Ok(SearchOutcome::Found(results.into_vec()))
    }
}

#[async_trait]
impl SearchStrategy for GoogleSearch {
    async fn search(
        &self,
        term: &str,
        domain: Option<&str>,
    ) -> Result<SearchOutcome, ScrapeError> {
        let query = with_site(term, domain);
        info!("Google search: '{}'", query);

        let page = self.ctx.pool.lease().await?;
        let outcome = self.run(&page, &query).await;
        page.release().await;
        outcome
    }
}

static LINK: LazyLock<Selector> = LazyLock::new(|| Selector::parse("#search a").unwrap());
static TITLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h3").unwrap());
static SNIPPET: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"div[data-sncf="2"], div.VwiC3b, div[style*="-webkit-line-clamp"]"#).unwrap()
});

/// Unwrap `/url?q=` redirects and drop links back into Google search.
fn result_href(href: &str) -> Option<String> {
    if let Some(rest) = href.strip_prefix("/url?") {
        return url::form_urlencoded::parse(rest.as_bytes())
            .find(|(k, _)| k == "q")
            .map(|(_, v)| v.into_owned());
    }
    if href.starts_with("https://www.google.com/search") || !href.starts_with("http") {
        return None;
    }
    Some(href.to_string())
}

/// Snippet text near a result link.
fn snippet(anchor: ElementRef<'_>) -> String {
    let mut node = anchor.parent();
    for _ in 0..6 {
        let Some(current) = node else { break };
        if let Some(el) = ElementRef::wrap(current) {
            // Stop before climbing into a neighbouring result.
            if el.select(&TITLE).nth(1).is_some() {
                break;
            }
            if let Some(block) = el.select(&SNIPPET).next() {
                return collapse_whitespace(&block.text().collect::<String>());
            }
        }
        node = current.parent();
    }
    String::new()
}

/// Extract organic results from a results page.
pub(crate) fn parse_results(html: &str) -> Vec<Candidate> {
    let document = Html::parse_document(html);
    let mut out = Vec::new();
    for anchor in document.select(&LINK) {
        let Some(h3) = anchor.select(&TITLE).next() else {
            continue;
        };
        let Some(url) = anchor.value().attr("href").and_then(result_href) else {
            continue;
        };
        let title = collapse_whitespace(&h3.text().collect::<String>());
        let description = snippet(anchor);
        out.push(
            Candidate::new(url, title, description, SearchEngineKind::Google).with_extras(
                CandidateExtras {
                    mediatype: Some("web".into()),
                    ..Default::default()
                },
            ),
        );
    }
    out
}
