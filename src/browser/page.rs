//! Chromium page wrapper used by the pool, strategies and the extractor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{
    Headers, SetExtraHttpHeadersParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::cdp::browser_protocol::storage::ClearDataForOriginParams;
use chromiumoxide::Page;
use url::Url;
use tracing::{debug, warn};

use super::fingerprint::{ContextProfile, HeaderProfile};
use super::pool::PooledPage;
use super::stealth::stealth_scripts;
use crate::error::ScrapeError;

/// JavaScript to wait for page ready state.
const WAIT_FOR_READY_SCRIPT: &str = r#"
    new Promise((resolve) => {
        if (document.readyState === 'complete' || document.readyState === 'interactive') {
            resolve(document.readyState);
        } else {
            document.addEventListener('DOMContentLoaded', () => resolve(document.readyState));
            setTimeout(() => resolve('timeout'), 10000);
        }
    })
"#;

const CLEAR_STORAGE_SCRIPT: &str = r#"
    (() => {
        try { window.localStorage.clear(); } catch (e) {}
        try { window.sessionStorage.clear(); } catch (e) {}
        return true;
    })()
"#;

/// Storage wiped per origin before a page goes back into the pool.
const ORIGIN_STORAGE_TYPES: &str = "cookies,local_storage,indexeddb,cache_storage,service_workers";

/// A pooled Chromium tab.
pub struct BrowserPage {
    page: Page,
    profile: ContextProfile,
    nav_timeout: Duration,
    closed: AtomicBool,
}

impl BrowserPage {
    pub(crate) fn new(page: Page, profile: ContextProfile, nav_timeout: Duration) -> Self {
        Self {
            page,
            profile,
            nav_timeout,
            closed: AtomicBool::new(false),
        }
    }

    /// Underlying CDP page for input simulation.
    pub fn inner(&self) -> &Page {
        &self.page
    }

    pub fn profile(&self) -> &ContextProfile {
        &self.profile
    }

    /// Navigate, wait for the document, then apply stealth patches.
    pub async fn goto(&self, url: &str) -> Result<(), ScrapeError> {
        debug!("Navigating to {}", url);
        let nav_params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(|e| ScrapeError::Browser(format!("Invalid URL: {}", e)))?;

        tokio::time::timeout(self.nav_timeout, self.page.execute(nav_params))
            .await
            .map_err(|_| {
                ScrapeError::Timeout(format!(
                    "navigation timed out after {:?} for {}",
                    self.nav_timeout, url
                ))
            })??;

        self.wait_until_ready().await;
        self.apply_stealth().await;
        Ok(())
    }

    async fn wait_until_ready(&self) {
        match tokio::time::timeout(
            self.nav_timeout,
            self.page.evaluate(WAIT_FOR_READY_SCRIPT.to_string()),
        )
        .await
        {
            Ok(Ok(result)) => {
                let state: String = result
                    .into_value()
                    .unwrap_or_else(|_| "unknown".to_string());
                debug!("Page ready state: {}", state);
            }
            Ok(Err(e)) => debug!("Could not check ready state: {}", e),
            Err(_) => warn!("Timeout waiting for page ready state"),
        }
    }

    async fn apply_stealth(&self) {
        for script in stealth_scripts(&self.profile) {
            if let Err(e) = self.page.evaluate(script).await {
                debug!("Stealth script injection skipped: {}", e);
            }
        }
    }

    /// Current document HTML.
    pub async fn html(&self) -> Result<String, ScrapeError> {
        Ok(self.page.content().await?)
    }

    pub async fn current_url(&self) -> Option<String> {
        self.page.url().await.ok().flatten()
    }

    /// Evaluate a script that yields a string; non-string results become empty.
    pub async fn eval_string(&self, script: &str) -> Result<String, ScrapeError> {
        let result = self.page.evaluate(script.to_string()).await?;
        Ok(result.into_value::<String>().unwrap_or_default())
    }

    pub async fn eval_bool(&self, script: &str) -> Result<bool, ScrapeError> {
        let result = self.page.evaluate(script.to_string()).await?;
        Ok(result.into_value::<bool>().unwrap_or(false))
    }

    /// Evaluate a script and discard the result.
    pub async fn run_script(&self, script: &str) -> Result<(), ScrapeError> {
        self.page.evaluate(script.to_string()).await?;
        Ok(())
    }

    pub async fn exists(&self, selector: &str) -> bool {
        self.page.find_element(selector).await.is_ok()
    }

    /// Poll for a selector until it appears or the timeout elapses.
    pub async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.exists(selector).await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    /// Poll several selectors; returns the index of the first one that shows up.
    pub async fn wait_for_any(&self, selectors: &[&str], timeout: Duration) -> Option<usize> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            for (i, selector) in selectors.iter().enumerate() {
                if self.exists(selector).await {
                    return Some(i);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    /// Click the first element matching `selector`. Returns false when absent.
    pub async fn click(&self, selector: &str) -> Result<bool, ScrapeError> {
        match self.page.find_element(selector).await {
            Ok(element) => {
                element.click().await?;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }
}

#[async_trait]
impl PooledPage for BrowserPage {
    async fn clear_site_data(&self) -> Result<(), ScrapeError> {
        let Some(current) = self.current_url().await else {
            return Ok(());
        };
        let origin = match Url::parse(&current) {
            Ok(url) => url.origin(),
            Err(_) => return Ok(()),
        };
        if !origin.is_tuple() {
            return Ok(());
        }

        // Session storage is only reachable from inside the document.
        self.page.evaluate(CLEAR_STORAGE_SCRIPT.to_string()).await?;
        let origin = origin.ascii_serialization();
        self.page
            .execute(ClearDataForOriginParams::new(
                origin.clone(),
                ORIGIN_STORAGE_TYPES,
            ))
            .await?;
        debug!("Cleared site data for {}", origin);
        Ok(())
    }

    async fn blank(&self) -> Result<(), ScrapeError> {
        tokio::time::timeout(Duration::from_secs(5), self.page.goto("about:blank"))
            .await
            .map_err(|_| ScrapeError::Timeout("blanking page".into()))??;
        Ok(())
    }

    async fn apply_identity(&self, headers: &HeaderProfile) -> Result<(), ScrapeError> {
        self.page
            .execute(SetUserAgentOverrideParams::new(headers.user_agent.clone()))
            .await?;
        self.page
            .execute(SetExtraHttpHeadersParams::new(Headers::new(
                headers.to_json(),
            )))
            .await?;
        Ok(())
    }

    async fn is_closed(&self) -> bool {
        if self.closed.load(Ordering::Relaxed) {
            return true;
        }
        self.page.url().await.is_err()
    }

    async fn close(self) {
        self.closed.store(true, Ordering::Relaxed);
        if let Err(e) = self.page.close().await {
            debug!("Page close failed: {}", e);
        }
    }
}
