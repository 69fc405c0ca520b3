//! docsift - search, extract and filter documents for topic queries.
//!
//! A run takes a list of [`Query`] values, asks one search backend for
//! candidate URLs, pulls plain text out of every candidate and keeps the ones
//! whose text mentions the query often enough. Everything else is written to
//! an omitted audit trail with a reason.

pub mod browser;
pub mod captcha;
pub mod cli;
pub mod config;
pub mod error;
pub mod extract;
pub mod http_client;
pub mod models;
pub mod orchestrator;
pub mod rate_limiter;
pub mod relevance;
pub mod search;

pub use config::{RunConfig, SearchEngineKind};
pub use error::{CaptchaError, ConfigError, ScrapeError};
pub use models::{Candidate, OmitReason, OmittedRecord, Query, RunStats, ScrapeRecord};
pub use orchestrator::{
    run, MemorySink, ProgressFn, ResultSink, RunHandle, RunHooks, RunPhase, ScrapeOrchestrator,
};
