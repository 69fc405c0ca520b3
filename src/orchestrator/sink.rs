//! Output sink boundary.

use std::path::PathBuf;

use crate::models::{OmittedRecord, Query, ScrapeRecord};

/// Where kept and omitted records go. The physical format is the sink's business.
pub trait ResultSink: Send {
    /// Persist a kept record. `false` means the write failed.
    fn add_result(&mut self, record: &ScrapeRecord) -> bool;

    fn add_omitted(&mut self, record: &OmittedRecord);

    /// Flush the omitted audit trail; returns its location if one was written.
    fn finalize_omitted(&mut self) -> Option<PathBuf>;

    /// Called once every candidate of `query` has been settled.
    fn query_done(&mut self, _query: &Query) {}
}

/// In-memory sink.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub results: Vec<ScrapeRecord>,
    pub omitted: Vec<OmittedRecord>,
    pub done: Vec<Query>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultSink for MemorySink {
    fn add_result(&mut self, record: &ScrapeRecord) -> bool {
        self.results.push(record.clone());
        true
    }

    fn add_omitted(&mut self, record: &OmittedRecord) {
        self.omitted.push(record.clone());
    }

    fn finalize_omitted(&mut self) -> Option<PathBuf> {
        None
    }

    fn query_done(&mut self, query: &Query) {
        self.done.push(query.clone());
    }
}
