//! JSON Lines result sink.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::models::{OmittedRecord, Query, ScrapeRecord};
use crate::orchestrator::ResultSink;

#[derive(Serialize)]
struct Line<'a, T: Serialize> {
    #[serde(flatten)]
    record: &'a T,
    recorded_at: String,
}

/// Lazily-created append-only file.
struct LazyFile {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    lines: usize,
}

impl LazyFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            writer: None,
            lines: 0,
        }
    }

    fn append<T: Serialize>(&mut self, record: &T) -> std::io::Result<()> {
        let line = Line {
            record,
            recorded_at: Local::now().to_rfc3339(),
        };
        let json = serde_json::to_string(&line)?;

        if self.writer.is_none() {
            if let Some(dir) = self.path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            debug!("Opened {}", self.path.display());
            self.writer = Some(BufWriter::new(file));
        }
        if let Some(writer) = self.writer.as_mut() {
            writeln!(writer, "{}", json)?;
        }
        self.lines += 1;
        Ok(())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

/// Writes kept records to `results_<stamp>.jsonl` and omitted records to
/// `omitted_<stamp>.jsonl` under one output directory.
///
/// Files are only created once something is written to them.
pub struct JsonlSink {
    results: LazyFile,
    omitted: LazyFile,
}

impl JsonlSink {
    pub fn new(out_dir: &Path) -> Self {
        Self::with_stamp(out_dir, Local::now())
    }

    pub fn with_stamp(out_dir: &Path, at: DateTime<Local>) -> Self {
        let stamp = at.format("%Y%m%d_%H%M%S");
        Self {
            results: LazyFile::new(out_dir.join(format!("results_{}.jsonl", stamp))),
            omitted: LazyFile::new(out_dir.join(format!("omitted_{}.jsonl", stamp))),
        }
    }

    pub fn results_path(&self) -> Option<&Path> {
        (self.results.lines > 0).then_some(self.results.path.as_path())
    }

    pub fn result_count(&self) -> usize {
        self.results.lines
    }

    pub fn omitted_count(&self) -> usize {
        self.omitted.lines
    }
}

impl ResultSink for JsonlSink {
    fn add_result(&mut self, record: &ScrapeRecord) -> bool {
        match self.results.append(record) {
            Ok(()) => true,
            Err(e) => {
                error!(url = %record.url, "Failed to write result: {}", e);
                false
            }
        }
    }

    fn add_omitted(&mut self, record: &OmittedRecord) {
        if let Err(e) = self.omitted.append(record) {
            warn!(url = %record.url, "Failed to write omitted record: {}", e);
        }
    }

    fn finalize_omitted(&mut self) -> Option<PathBuf> {
        if let Err(e) = self.results.flush() {
            error!("Failed to flush results: {}", e);
        }
        if let Err(e) = self.omitted.flush() {
            error!("Failed to flush omitted records: {}", e);
        }
        (self.omitted.lines > 0).then(|| self.omitted.path.clone())
    }

    fn query_done(&mut self, query: &Query) {
        if let Err(e) = self.results.flush() {
            warn!(code = %query.code, "Failed to flush results: {}", e);
        }
    }
}
