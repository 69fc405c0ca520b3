//! Error types shared across the engine.

use thiserror::Error;

/// Errors raised while searching or extracting.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("browser error: {0}")]
    Browser(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl ScrapeError {
    /// Connection problems and timeouts are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            ScrapeError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ScrapeError::Timeout(_) => true,
            ScrapeError::Unavailable(_) => true,
            _ => false,
        }
    }
}

impl From<chromiumoxide::error::CdpError> for ScrapeError {
    fn from(e: chromiumoxide::error::CdpError) -> Self {
        ScrapeError::Browser(e.to_string())
    }
}

/// Fatal run-configuration problems, detected once at run start.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{engine} requires a site domain")]
    MissingSiteDomain { engine: &'static str },

    #[error("invalid site domain: {0}")]
    InvalidSiteDomain(String),

    #[error("{0} must be greater than zero")]
    ZeroLimit(&'static str),

    #[error("browser not available: {0}")]
    BrowserUnavailable(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// CAPTCHA solving and hand-off failures.
#[derive(Debug, Error)]
pub enum CaptchaError {
    #[error("no pending challenge with id {0}")]
    UnknownChallenge(uuid::Uuid),

    #[error("solver rejected the challenge: {0}")]
    Rejected(String),

    #[error("solver gave up after {0} polls")]
    PollsExhausted(u32),

    #[error("challenge payload unavailable: {0}")]
    Payload(String),

    #[error(transparent)]
    Scrape(#[from] ScrapeError),
}

/// Document decoding failures.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unsupported document format: {0}")]
    Unsupported(String),

    #[error("PDF decode failed: {0}")]
    Pdf(String),

    #[error("archive decode failed: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("XML decode failed: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decoder task failed: {0}")]
    Worker(String),
}
