//! Typed run configuration.
//!
//! A [`RunConfig`] is parsed once (usually from TOML), overlaid with
//! environment overrides, then validated at run start. Components receive
//! the typed sections they need; nothing reads configuration by key.

use std::env;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::browser::BrowserEngineConfig;
use crate::error::ConfigError;

/// The closed set of search backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SearchEngineKind {
    #[serde(alias = "Google")]
    Google,
    #[serde(alias = "DuckDuckGo", alias = "duck_duck_go")]
    #[value(name = "duckduckgo")]
    DuckDuckGo,
    /// URL-pattern index of the public web archive.
    #[serde(alias = "wayback", alias = "cdx")]
    ArchiveIndex,
    /// Full-text search over the public web archive.
    #[serde(alias = "Wayback Machine", alias = "archive")]
    ArchiveSearch,
    #[serde(alias = "Cordis Europa", alias = "cordis_europa")]
    Cordis,
}

impl SearchEngineKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::DuckDuckGo => "duckduckgo",
            Self::ArchiveIndex => "archive index",
            Self::ArchiveSearch => "archive search",
            Self::Cordis => "cordis",
        }
    }

    /// Engines that render pages need a live browser.
    pub fn requires_browser(&self) -> bool {
        matches!(self, Self::Google | Self::DuckDuckGo | Self::Cordis)
    }

    pub fn requires_site_domain(&self) -> bool {
        matches!(self, Self::ArchiveIndex)
    }
}

impl fmt::Display for SearchEngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Concurrency, batching and timeout limits for the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineLimits {
    /// Candidates per tabulation batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Units processed at once across a batch.
    #[serde(default = "default_processing_concurrency")]
    pub processing_concurrency: usize,

    /// Heavy extractions (browser render, file download) in flight at once.
    #[serde(default = "default_extraction_concurrency")]
    pub extraction_concurrency: usize,

    #[serde(default = "default_extraction_timeout")]
    pub extraction_timeout_secs: u64,

    #[serde(default = "default_batch_timeout")]
    pub batch_timeout_secs: u64,

    /// Pause between batches in milliseconds.
    #[serde(default = "default_batch_pause")]
    pub batch_pause_ms: u64,

    /// Pages kept warm in the browser pool.
    #[serde(default = "default_pool_capacity")]
    pub pool_capacity: usize,

    /// Extracted-text cache entries.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_batch_size() -> usize {
    1
}

fn default_processing_concurrency() -> usize {
    2
}

fn default_extraction_concurrency() -> usize {
    3
}

fn default_extraction_timeout() -> u64 {
    60
}

fn default_batch_timeout() -> u64 {
    180
}

fn default_batch_pause() -> u64 {
    500
}

fn default_pool_capacity() -> usize {
    5
}

fn default_cache_capacity() -> usize {
    500
}

impl Default for PipelineLimits {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            processing_concurrency: default_processing_concurrency(),
            extraction_concurrency: default_extraction_concurrency(),
            extraction_timeout_secs: default_extraction_timeout(),
            batch_timeout_secs: default_batch_timeout(),
            batch_pause_ms: default_batch_pause(),
            pool_capacity: default_pool_capacity(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl PipelineLimits {
    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_secs)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }
}

/// CAPTCHA solving settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaptchaSettings {
    /// 2Captcha API key. Automatic solving is skipped without one.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_auto_solve")]
    pub auto_solve: bool,

    /// How long a manual challenge waits for a human.
    #[serde(default = "default_manual_timeout")]
    pub manual_timeout_secs: u64,

    #[serde(default = "default_initial_wait")]
    pub initial_wait_secs: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
}

fn default_auto_solve() -> bool {
    true
}

fn default_manual_timeout() -> u64 {
    300
}

fn default_initial_wait() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    5
}

fn default_max_polls() -> u32 {
    30
}

impl Default for CaptchaSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            auto_solve: default_auto_solve(),
            manual_timeout_secs: default_manual_timeout(),
            initial_wait_secs: default_initial_wait(),
            poll_interval_secs: default_poll_interval(),
            max_polls: default_max_polls(),
        }
    }
}

impl CaptchaSettings {
    pub fn manual_timeout(&self) -> Duration {
        Duration::from_secs(self.manual_timeout_secs)
    }

    /// True when an automatic backend can be used.
    pub fn auto_solve_enabled(&self) -> bool {
        self.auto_solve && self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

/// Result and page caps for search strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchLimits {
    /// Result pages walked on general search engines.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Result pages walked on the site-specific portal.
    #[serde(default = "default_max_pages")]
    pub portal_max_pages: usize,

    /// Result cap for archive engines.
    #[serde(default = "default_archive_max_items")]
    pub archive_max_items: usize,

    /// HTTP timeout for archive APIs in seconds.
    #[serde(default = "default_api_timeout")]
    pub api_timeout_secs: u64,
}

fn default_max_pages() -> usize {
    100
}

fn default_archive_max_items() -> usize {
    50
}

fn default_api_timeout() -> u64 {
    30
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            portal_max_pages: default_max_pages(),
            archive_max_items: default_archive_max_items(),
            api_timeout_secs: default_api_timeout(),
        }
    }
}

/// Options recognized for a single engine run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub search_engine: SearchEngineKind,

    /// Restrict searches to this domain.
    #[serde(default)]
    pub site_domain: Option<String>,

    /// Minimum summed keyword occurrences for a document to be kept.
    #[serde(default = "default_min_keyword_matches")]
    pub min_keyword_matches: u32,

    #[serde(default = "crate::browser::default_headless")]
    pub headless: bool,

    /// Keep only candidates hosted under `.gov`.
    #[serde(default)]
    pub gov_only_filter: bool,

    #[serde(default)]
    pub browser: BrowserEngineConfig,

    #[serde(default)]
    pub limits: PipelineLimits,

    #[serde(default)]
    pub captcha: CaptchaSettings,

    #[serde(default)]
    pub search: SearchLimits,
}

fn default_min_keyword_matches() -> u32 {
    30
}

impl RunConfig {
    /// Config with defaults for everything but the engine.
    pub fn new(search_engine: SearchEngineKind) -> Self {
        Self {
            search_engine,
            site_domain: None,
            min_keyword_matches: default_min_keyword_matches(),
            headless: crate::browser::default_headless(),
            gov_only_filter: false,
            browser: BrowserEngineConfig::default(),
            limits: PipelineLimits::default(),
            captcha: CaptchaSettings::default(),
            search: SearchLimits::default(),
        }
    }

    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Invalid(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Apply environment overrides for secrets and deployment-specific settings.
    ///
    /// - `TWOCAPTCHA_API_KEY` - automatic CAPTCHA backend key
    /// - `BROWSER_URL` - remote DevTools endpoint
    /// - `SOCKS_PROXY` - proxy server for browser traffic
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = env::var("TWOCAPTCHA_API_KEY") {
            if !key.is_empty() {
                self.captcha.api_key = Some(key);
            }
        }
        if let Ok(url) = env::var("BROWSER_URL") {
            if !url.is_empty() {
                self.browser.remote_url = Some(url);
            }
        }
        if let Ok(proxy) = env::var("SOCKS_PROXY") {
            if !proxy.is_empty() {
                self.browser.proxy = Some(proxy);
            }
        }
        self
    }

    /// Validate and normalize. Called once at run start.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        let limits = &self.limits;
        if limits.batch_size == 0 {
            return Err(ConfigError::ZeroLimit("batch_size"));
        }
        if limits.processing_concurrency == 0 {
            return Err(ConfigError::ZeroLimit("processing_concurrency"));
        }
        if limits.extraction_concurrency == 0 {
            return Err(ConfigError::ZeroLimit("extraction_concurrency"));
        }
        if limits.pool_capacity == 0 {
            return Err(ConfigError::ZeroLimit("pool_capacity"));
        }
        if limits.cache_capacity == 0 {
            return Err(ConfigError::ZeroLimit("cache_capacity"));
        }
        if limits.extraction_timeout_secs == 0 {
            return Err(ConfigError::ZeroLimit("extraction_timeout_secs"));
        }
        if limits.batch_timeout_secs == 0 {
            return Err(ConfigError::ZeroLimit("batch_timeout_secs"));
        }

        self.site_domain = match self.site_domain.take() {
            Some(raw) => normalize_domain(&raw)?,
            None => None,
        };

        if self.search_engine.requires_site_domain() && self.site_domain.is_none() {
            return Err(ConfigError::MissingSiteDomain {
                engine: self.search_engine.label(),
            });
        }

        Ok(())
    }
}

/// Reduce a user-supplied domain to a bare lowercase host.
/// Blank input means "no domain".
fn normalize_domain(raw: &str) -> Result<Option<String>, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    let host = without_scheme
        .split('/')
        .next()
        .unwrap_or(without_scheme)
        .trim_end_matches('.')
        .to_ascii_lowercase();

    let valid = host.contains('.')
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
        && !host.starts_with('.')
        && !host.contains("..");

    if valid {
        Ok(Some(host))
    } else {
        Err(ConfigError::InvalidSiteDomain(raw.to_string()))
    }
}
