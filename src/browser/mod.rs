//! Headless Chromium resource management.
//!
//! One [`BrowserSession`] owns the browser process (or remote connection)
//! and a run-wide [`ContextProfile`]. Pages are lent through a
//! [`BrowserPool`], which caps how many idle tabs stay warm.

mod config;
mod fingerprint;
mod page;
mod pool;
mod stealth;

pub use config::{default_headless, BrowserEngineConfig, LAUNCH_ARGS};
pub use fingerprint::{ContextProfile, Geolocation, HeaderProfile, Viewport};
pub use page::BrowserPage;
pub use pool::{PageFactory, PageLease, PagePool, PoolCounters, PooledPage};

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetGeolocationOverrideParams, SetLocaleOverrideParams,
    SetTimezoneOverrideParams,
};
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::ScrapeError;

/// Pool of Chromium pages.
pub type BrowserPool = PagePool<BrowserPage, BrowserSession>;

/// A Chromium page on loan from a [`BrowserPool`].
pub type BrowserLease = PageLease<BrowserPage, BrowserSession>;

/// Launch a browser and wrap it in a pool.
pub async fn launch_pool(
    config: &BrowserEngineConfig,
    headless: bool,
    capacity: usize,
) -> anyhow::Result<BrowserPool> {
    let session = BrowserSession::launch(config, headless).await?;
    Ok(PagePool::new(session, capacity))
}

/// A running (or remotely connected) browser plus its fingerprint.
pub struct BrowserSession {
    browser: Mutex<Option<Browser>>,
    handler: Mutex<Option<JoinHandle<()>>>,
    profile: ContextProfile,
    nav_timeout: Duration,
}

impl BrowserSession {
    /// Common Chrome executable paths to check.
    const CHROME_PATHS: &'static [&'static str] = &[
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        "/opt/google/chrome/google-chrome",
    ];

    /// Launch a local browser, or connect to `remote_url` when configured.
    pub async fn launch(config: &BrowserEngineConfig, headless: bool) -> anyhow::Result<Self> {
        let profile = ContextProfile::random();
        info!(
            "Browser context: {}x{} {} {}",
            profile.viewport.width, profile.viewport.height, profile.locale, profile.timezone
        );

        let (browser, mut handler) = match config.remote_url.as_deref() {
            Some(remote_url) => Self::connect_remote(remote_url, config.timeout).await?,
            None => {
                let chrome_path = match &config.executable {
                    Some(path) => path.clone(),
                    None => Self::find_chrome()?,
                };
                info!("Launching browser (headless={})", headless);

                let mut builder = BrowserConfig::builder()
                    .chrome_executable(chrome_path)
                    .window_size(profile.viewport.width, profile.viewport.height);
                if !headless {
                    builder = builder.with_head();
                }
                if let Some(ref proxy) = config.proxy {
                    builder = builder.arg(format!("--proxy-server={}", proxy));
                }
                for arg in LAUNCH_ARGS {
                    builder = builder.arg(*arg);
                }
                builder = builder.arg(format!("--lang={}", profile.locale));
                for arg in &config.chrome_args {
                    builder = builder.arg(arg);
                }

                let browser_config = builder
                    .build()
                    .map_err(|e| anyhow::anyhow!("Failed to build browser config: {}", e))?;
                Browser::launch(browser_config)
                    .await
                    .context("Failed to launch browser")?
            }
        };

        let handle = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            browser: Mutex::new(Some(browser)),
            handler: Mutex::new(Some(handle)),
            profile,
            nav_timeout: Duration::from_secs(config.timeout),
        })
    }

    fn find_chrome() -> anyhow::Result<PathBuf> {
        for path in Self::CHROME_PATHS {
            let p = std::path::Path::new(path);
            if p.exists() {
                info!("Found Chrome at: {}", path);
                return Ok(p.to_path_buf());
            }
        }

        for cmd in [
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
        ] {
            if let Ok(path) = which::which(cmd) {
                info!("Found Chrome in PATH: {}", path.display());
                return Ok(path);
            }
        }

        Err(anyhow::anyhow!(
            "Chrome/Chromium not found. Install chromium or set browser.executable"
        ))
    }

    async fn connect_remote(
        url: &str,
        timeout_secs: u64,
    ) -> anyhow::Result<(Browser, chromiumoxide::handler::Handler)> {
        info!("Connecting to remote browser at {}", url);

        // Resolve the WebSocket URL from the /json/version endpoint
        let http_url = url
            .replace("ws://", "http://")
            .replace("wss://", "https://");
        let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));

        let resp: serde_json::Value = reqwest::Client::new()
            .get(&version_url)
            .send()
            .await
            .context("Failed to connect to remote browser")?
            .json()
            .await
            .context("Failed to parse browser version info")?;

        let ws_url = resp
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("No webSocketDebuggerUrl in response"))?;

        let handler_config = chromiumoxide::handler::HandlerConfig {
            request_timeout: Duration::from_secs(timeout_secs),
            ..Default::default()
        };

        Browser::connect_with_config(ws_url, handler_config)
            .await
            .context("Failed to connect to remote browser")
    }

    pub fn profile(&self) -> &ContextProfile {
        &self.profile
    }

    async fn apply_profile(&self, page: &chromiumoxide::Page) -> Result<(), ScrapeError> {
        let p = &self.profile;
        page.execute(SetDeviceMetricsOverrideParams::new(
            i64::from(p.viewport.width),
            i64::from(p.viewport.height),
            1.0,
            false,
        ))
        .await?;
        page.execute(SetLocaleOverrideParams {
            locale: Some(p.locale.to_string()),
        })
        .await?;
        page.execute(SetTimezoneOverrideParams::new(p.timezone.to_string()))
            .await?;
        page.execute(
            SetGeolocationOverrideParams::builder()
                .latitude(p.geolocation.latitude)
                .longitude(p.geolocation.longitude)
                .accuracy(100.0)
                .build(),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PageFactory<BrowserPage> for BrowserSession {
    async fn open_page(&self) -> Result<BrowserPage, ScrapeError> {
        let guard = self.browser.lock().await;
        let browser = guard
            .as_ref()
            .ok_or_else(|| ScrapeError::Browser("browser has been shut down".into()))?;
        let page = browser.new_page("about:blank").await?;
        drop(guard);

        if let Err(e) = self.apply_profile(&page).await {
            debug!("Context emulation partially applied: {}", e);
        }
        Ok(BrowserPage::new(page, self.profile, self.nav_timeout))
    }

    async fn shutdown(&self) {
        if let Some(mut browser) = self.browser.lock().await.take() {
            if let Err(e) = browser.close().await {
                debug!("Browser close failed: {}", e);
            }
        }
        if let Some(handle) = self.handler.lock().await.take() {
            handle.abort();
        }
    }
}
