//! Run statistics.

use serde::{Deserialize, Serialize};

use super::OmitReason;

/// Counters owned by the orchestrator for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub found: u64,
    pub duplicates: u64,
    pub low_word: u64,
    pub no_keyword: u64,
    pub extraction_failed: u64,
    pub saved: u64,
    pub errors: u64,
    pub non_gov_skipped: u64,
    /// Total omitted records.
    pub not_saved: u64,
    pub captchas_detected: u64,
    pub captchas_solved: u64,
}

impl RunStats {
    /// Bump the counters matching an omission.
    pub fn record_omission(&mut self, reason: OmitReason) {
        self.not_saved += 1;
        match reason {
            OmitReason::Duplicate => self.duplicates += 1,
            OmitReason::ExtractionTimeout | OmitReason::ExtractionFailed => {
                self.extraction_failed += 1
            }
            OmitReason::ExtractionError => {
                self.extraction_failed += 1;
                self.errors += 1;
            }
            OmitReason::LowWordCount => self.low_word += 1,
            OmitReason::NoKeywordMatches => self.no_keyword += 1,
            OmitReason::NonGovernment => self.non_gov_skipped += 1,
            OmitReason::MissingUrl => {}
        }
    }

    /// Final status line reported to the progress callback.
    pub fn summary(&self, kept: usize) -> String {
        let mut msg = format!("completed, {} results", kept);
        if self.captchas_detected > 0 {
            msg.push_str(&format!(
                " | CAPTCHAs: {} detected, {} solved",
                self.captchas_detected, self.captchas_solved
            ));
        }
        msg
    }
}
