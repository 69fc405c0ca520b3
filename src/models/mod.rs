//! Data models for the scraping engine.
//!
//! Queries go in, candidates come out of search, and every candidate ends up
//! as exactly one kept [`ScrapeRecord`] or one audited [`OmittedRecord`].

mod candidate;
mod query;
mod record;
mod stats;

pub use candidate::{Candidate, CandidateExtras};
pub use query::Query;
pub use record::{OmitReason, OmittedRecord, ScrapeRecord};
pub use stats::RunStats;
