//! Two-phase scrape run.
//!
//! Phase 1 sends every query to the configured search backend, in order,
//! pausing on manual CAPTCHAs and retrying the interrupted query in full.
//! Phase 2 walks the gathered candidates query by query in small batches:
//! each candidate is de-duplicated, extracted under its own timeout and
//! scored, then lands as exactly one kept or omitted record.
//!
//! Run state (seen-set, counters, records) lives in the task that drives
//! [`ScrapeOrchestrator::run`]; batch units only return outcomes.

mod gate;
mod sink;

pub use gate::{PauseGate, RunHandle, RunPhase};
pub use sink::{MemorySink, ResultSink};

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use self::gate::RunControl;
use crate::browser::{launch_pool, BrowserPool};
use crate::captcha::{CaptchaChallenge, CaptchaCoordinator, ChallengeListener, ManualChannel};
use crate::config::RunConfig;
use crate::error::ConfigError;
use crate::extract::{ContentExtractor, ContentSource};
use crate::http_client::HttpClient;
use crate::models::{Candidate, OmitReason, OmittedRecord, Query, RunStats, ScrapeRecord};
use crate::rate_limiter::RateLimiter;
use crate::relevance::{describe, RelevanceFilter, Verdict};
use crate::search::{SearchBackend, SearchOutcome, SearchStrategy};

/// Progress callback: percent (0-100), message, current counters.
pub type ProgressFn<'a> = dyn Fn(f64, &str, &RunStats) + Send + Sync + 'a;

/// Optional collaborators supplied by the caller.
#[derive(Clone, Default)]
pub struct RunHooks {
    /// Invoked whenever a CAPTCHA needs a human.
    pub challenge_listener: Option<Arc<dyn ChallengeListener>>,
}

impl RunHooks {
    pub fn with_listener(listener: Arc<dyn ChallengeListener>) -> Self {
        Self {
            challenge_listener: Some(listener),
        }
    }
}

/// How a paused search came back.
///
/// A manual answer cannot be applied to the page that raised the challenge,
/// since the strategy has already released it, so it only lifts the pause.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Clearance {
    Answered,
    Resumed,
    /// No usable answer arrived within the manual timeout.
    Expired,
    Stopped,
}

/// Result of one extraction unit.
#[derive(Debug)]
enum UnitOutcome {
    Text(String),
    Empty,
    Failed(String),
    TimedOut,
}

/// Mutable state of one run.
#[derive(Default)]
struct RunState {
    stats: RunStats,
    seen: HashSet<(String, String, String)>,
    records: Vec<ScrapeRecord>,
    /// Candidates settled in phase 2 so far.
    settled: usize,
    /// Candidates gathered in phase 1.
    total: usize,
}

impl RunState {
    fn phase_two_percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            50.0 + 50.0 * (self.settled as f64 / self.total as f64)
        }
    }
}

/// Runs queries through search, extraction and relevance filtering.
pub struct ScrapeOrchestrator {
    config: RunConfig,
    strategy: Arc<dyn SearchStrategy>,
    extractor: Arc<dyn ContentSource>,
    filter: RelevanceFilter,
    channel: Arc<ManualChannel>,
    control: Arc<RunControl>,
    captcha: Option<Arc<CaptchaCoordinator>>,
    pool: Option<Arc<BrowserPool>>,
    manual_timeout: Duration,
}

impl ScrapeOrchestrator {
    /// Assemble from already-built parts. An invalid `config` fails the run
    /// before any query is searched.
    pub fn new(
        config: RunConfig,
        strategy: Arc<dyn SearchStrategy>,
        extractor: Arc<dyn ContentSource>,
        channel: Arc<ManualChannel>,
    ) -> Self {
        Self {
            filter: RelevanceFilter::new(config.min_keyword_matches),
            manual_timeout: config.captcha.manual_timeout(),
            config,
            strategy,
            extractor,
            channel,
            control: Arc::new(RunControl::new()),
            captcha: None,
            pool: None,
        }
    }

    pub fn with_captcha(mut self, captcha: Arc<CaptchaCoordinator>) -> Self {
        self.captcha = Some(captcha);
        self
    }

    pub fn with_pool(mut self, pool: Option<Arc<BrowserPool>>) -> Self {
        self.pool = pool;
        self
    }

    /// Validate `config` and build every run-scoped component.
    pub async fn launch(mut config: RunConfig, hooks: RunHooks) -> Result<Self, ConfigError> {
        config.validate()?;
        info!(
            "Launching {} run (min keyword matches {})",
            config.search_engine, config.min_keyword_matches
        );

        let http = HttpClient::with_rate_limiter(
            Duration::from_secs(config.browser.timeout),
            config.browser.proxy.as_deref(),
            RateLimiter::new(),
        )
        .map_err(|e| ConfigError::Invalid(format!("HTTP client: {}", e)))?;

        let pool = match launch_pool(
            &config.browser,
            config.headless,
            config.limits.pool_capacity,
        )
        .await
        {
            Ok(pool) => Some(Arc::new(pool)),
            Err(e) if config.search_engine.requires_browser() => {
                return Err(ConfigError::BrowserUnavailable(format!("{:#}", e)));
            }
            Err(e) => {
                warn!("No browser for this run, extraction is HTTP only: {:#}", e);
                None
            }
        };

        let channel = Arc::new(ManualChannel::new(hooks.challenge_listener));
        let captcha = Arc::new(CaptchaCoordinator::new(
            &config.captcha,
            http.clone(),
            channel.clone(),
        ));

        let backend =
            match SearchBackend::build(&config, pool.clone(), captcha.clone(), http.clone()) {
                Ok(backend) => backend,
                Err(e) => {
                    if let Some(pool) = &pool {
                        pool.shutdown().await;
                    }
                    return Err(e);
                }
            };

        let extractor = ContentExtractor::new(
            http,
            pool.clone(),
            config.limits.extraction_concurrency,
            config.limits.cache_capacity,
        );

        Ok(
            Self::new(config, Arc::new(backend), Arc::new(extractor), channel)
                .with_captcha(captcha)
                .with_pool(pool),
        )
    }

    pub fn handle(&self) -> RunHandle {
        RunHandle::new(self.control.clone(), self.channel.clone())
    }

    pub fn phase(&self) -> RunPhase {
        self.control.phase()
    }

    /// Close the browser, if this run launched one.
    pub async fn shutdown(&self) {
        if let Some(pool) = &self.pool {
            pool.shutdown().await;
        }
    }

    fn sync_captcha_counts(&self, stats: &mut RunStats) {
        let (detected, solved) = self.captcha.as_ref().map_or((0, 0), |c| c.counts());
        stats.captchas_detected = detected;
        stats.captchas_solved = solved;
    }

    fn report(&self, progress: &ProgressFn<'_>, percent: f64, message: &str, state: &mut RunState) {
        self.sync_captcha_counts(&mut state.stats);
        progress(percent.clamp(0.0, 100.0), message, &state.stats);
    }

    /// Run every query through both phases and return the kept records.
    pub async fn run(
        &self,
        queries: &[Query],
        sink: &mut dyn ResultSink,
        progress: &ProgressFn<'_>,
    ) -> Vec<ScrapeRecord> {
        let mut state = RunState::default();

        if let Err(e) = self.config.clone().validate() {
            error!("Run not started: {}", e);
            self.control.set_phase(RunPhase::Failed);
            progress(100.0, &format!("Error: {}", e), &state.stats);
            return Vec::new();
        }

        self.control.set_phase(RunPhase::Searching);
        let gathered = self.search_all(queries, &mut state, progress).await;

        if !self.control.is_stopped() {
            self.control.set_phase(RunPhase::Tabulating);
            self.tabulate(queries, gathered, &mut state, sink, progress)
                .await;
        }

        if let Some(path) = sink.finalize_omitted() {
            info!("Omitted records written to {}", path.display());
        }

        let stopped = self.control.is_stopped();
        self.control.set_phase(if stopped {
            RunPhase::StoppedByUser
        } else {
            RunPhase::Completed
        });

        self.sync_captcha_counts(&mut state.stats);
        let mut message = state.stats.summary(state.records.len());
        if stopped {
            message = format!("stopped by user, {}", message.trim_start_matches("completed, "));
        }
        info!("{}", message);
        progress(100.0, &message, &state.stats);
        state.records
    }

    /// Phase 1: search each query in order.
    async fn search_all(
        &self,
        queries: &[Query],
        state: &mut RunState,
        progress: &ProgressFn<'_>,
    ) -> Vec<Vec<Candidate>> {
        let n = queries.len();
        let domain = self.config.site_domain.as_deref();
        let mut gathered = Vec::with_capacity(n);

        for (i, query) in queries.iter().enumerate() {
            if self.control.is_stopped() {
                info!("Stopping before query {}", query.code);
                break;
            }
            let term = query.search_term();
            self.report(
                progress,
                50.0 * i as f64 / n.max(1) as f64,
                &format!("Searching {}/{}: {}", i + 1, n, term),
                state,
            );

            let mut found = Vec::new();
            loop {
                self.control.gate.wait_open().await;
                match self.strategy.search(term, domain).await {
                    Ok(SearchOutcome::Found(candidates)) => {
                        info!(code = %query.code, "{} candidates for '{}'", candidates.len(), term);
                        found = candidates;
                        break;
                    }
                    Ok(SearchOutcome::NeedsManualCaptcha(challenge)) => {
                        self.report(
                            progress,
                            50.0 * i as f64 / n.max(1) as f64,
                            &format!("Paused: CAPTCHA on {} needs a solution", challenge.page_url),
                            state,
                        );
                        match self.await_clearance(&challenge).await {
                            Clearance::Stopped => break,
                            Clearance::Expired => {
                                warn!(
                                    code = %query.code,
                                    challenge_id = %challenge.id,
                                    "No CAPTCHA answer within {:?}, skipping '{}'",
                                    self.manual_timeout, term
                                );
                                state.stats.errors += 1;
                                break;
                            }
                            how => info!(
                                challenge_id = %challenge.id,
                                "Retrying '{}' after CAPTCHA ({:?})", term, how
                            ),
                        }
                    }
                    Err(e) => {
                        error!(code = %query.code, "Search failed for '{}': {}", term, e);
                        state.stats.errors += 1;
                        break;
                    }
                }
            }

            state.stats.found += found.len() as u64;
            gathered.push(found);
        }
        gathered
    }

    /// Publish the challenge once and suspend until it is answered, the run
    /// is resumed or stopped, or the manual timeout passes.
    async fn await_clearance(&self, challenge: &CaptchaChallenge) -> Clearance {
        self.control.set_phase(RunPhase::Paused);
        self.control.gate.close();
        info!(challenge_id = %challenge.id, "Run paused for manual CAPTCHA");

        let clearance = tokio::select! {
            answer = self.channel.wait_for_solution(challenge, self.manual_timeout) => {
                match answer {
                    Some(_) => Clearance::Answered,
                    None => Clearance::Expired,
                }
            }
            _ = self.control.gate.wait_open() => Clearance::Resumed,
            _ = self.control.stopped() => Clearance::Stopped,
        };

        self.channel.cancel(challenge.id);
        self.control.gate.open();
        if clearance != Clearance::Stopped {
            self.control.set_phase(RunPhase::Searching);
        }
        clearance
    }

    /// Phase 2: settle every gathered candidate.
    async fn tabulate(
        &self,
        queries: &[Query],
        gathered: Vec<Vec<Candidate>>,
        state: &mut RunState,
        sink: &mut dyn ResultSink,
        progress: &ProgressFn<'_>,
    ) {
        state.total = gathered.iter().map(Vec::len).sum();
        let batch_size = self.config.limits.batch_size.max(1);
        let permits = Arc::new(Semaphore::new(self.config.limits.processing_concurrency.max(1)));

        'groups: for (query, candidates) in queries.iter().zip(gathered) {
            let work = self.screen(query, candidates, state, sink);

            let mut first = true;
            for batch in work.chunks(batch_size) {
                if self.control.is_stopped() {
                    break 'groups;
                }
                if !first {
                    tokio::time::sleep(self.config.limits.batch_pause()).await;
                }
                first = false;
                self.run_batch(query, batch, &permits, state, sink, progress)
                    .await;
            }

            sink.query_done(query);
            let pct = state.phase_two_percent();
            self.report(progress, pct, &format!("Query {} done", query.code), state);
        }
    }

    /// Reject candidates that never need extraction; returns the rest.
    fn screen(
        &self,
        query: &Query,
        candidates: Vec<Candidate>,
        state: &mut RunState,
        sink: &mut dyn ResultSink,
    ) -> Vec<Candidate> {
        let mut work = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if candidate.url.trim().is_empty() {
                self.omit(query, &candidate, OmitReason::MissingUrl, None, state, sink);
                continue;
            }
            if self.config.gov_only_filter && !is_government_host(&candidate) {
                self.omit(query, &candidate, OmitReason::NonGovernment, None, state, sink);
                continue;
            }
            let identity = (
                query.code.clone(),
                query.name.clone(),
                candidate.url.clone(),
            );
            if !state.seen.insert(identity) {
                self.omit(query, &candidate, OmitReason::Duplicate, None, state, sink);
                continue;
            }
            work.push(candidate);
        }
        work
    }

    fn unit(
        &self,
        slot: usize,
        url: String,
        permits: Arc<Semaphore>,
    ) -> impl Future<Output = (usize, UnitOutcome)> + Send + 'static {
        let extractor = self.extractor.clone();
        let control = self.control.clone();
        let timeout = self.config.limits.extraction_timeout();
        async move {
            control.gate.wait_open().await;
            let Ok(_permit) = permits.acquire_owned().await else {
                return (slot, UnitOutcome::Failed("processing pool closed".into()));
            };
            let outcome = match tokio::time::timeout(timeout, extractor.extract(&url)).await {
                Err(_) => UnitOutcome::TimedOut,
                Ok(Ok(text)) if text.trim().is_empty() => UnitOutcome::Empty,
                Ok(Ok(text)) => UnitOutcome::Text(text),
                Ok(Err(e)) => UnitOutcome::Failed(e.to_string()),
            };
            (slot, outcome)
        }
    }

    async fn run_batch(
        &self,
        query: &Query,
        batch: &[Candidate],
        permits: &Arc<Semaphore>,
        state: &mut RunState,
        sink: &mut dyn ResultSink,
        progress: &ProgressFn<'_>,
    ) {
        let mut in_flight = FuturesUnordered::new();
        for (slot, candidate) in batch.iter().enumerate() {
            let pct = state.phase_two_percent();
            self.report(progress, pct, &format!("Processing {}", candidate.url), state);
            in_flight.push(self.unit(
                slot,
                candidate.extraction_url().to_string(),
                permits.clone(),
            ));
        }

        let mut done = vec![false; batch.len()];
        let deadline = tokio::time::Instant::now() + self.config.limits.batch_timeout();
        loop {
            match tokio::time::timeout_at(deadline, in_flight.next()).await {
                Ok(Some((slot, outcome))) => {
                    done[slot] = true;
                    self.settle(query, &batch[slot], outcome, state, sink);
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        code = %query.code,
                        "Batch deadline passed with {} units in flight",
                        in_flight.len()
                    );
                    break;
                }
            }
        }
        drop(in_flight);

        for (slot, finished) in done.iter().enumerate() {
            if !finished {
                self.settle(query, &batch[slot], UnitOutcome::TimedOut, state, sink);
            }
        }
    }

    fn settle(
        &self,
        query: &Query,
        candidate: &Candidate,
        outcome: UnitOutcome,
        state: &mut RunState,
        sink: &mut dyn ResultSink,
    ) {
        state.settled += 1;
        let text = match outcome {
            UnitOutcome::Text(text) => text,
            UnitOutcome::Empty => {
                self.omit(query, candidate, OmitReason::ExtractionFailed, None, state, sink);
                return;
            }
            UnitOutcome::Failed(e) => {
                warn!(url = %candidate.url, "Extraction error: {}", e);
                self.omit(query, candidate, OmitReason::ExtractionError, Some(e), state, sink);
                return;
            }
            UnitOutcome::TimedOut => {
                warn!(url = %candidate.url, "Extraction timed out");
                self.omit(query, candidate, OmitReason::ExtractionTimeout, None, state, sink);
                return;
            }
        };

        match self.filter.evaluate(&text, query.search_term()) {
            Verdict::Keep(relevance) => {
                let record = ScrapeRecord {
                    code: query.code.clone(),
                    name: query.name.clone(),
                    title: candidate.title.clone(),
                    description: describe(&candidate.description, &text),
                    url: candidate.url.clone(),
                    formatted_word_counts: relevance.formatted(),
                };
                info!(
                    code = %query.code,
                    url = %record.url,
                    "Kept: {}", record.formatted_word_counts
                );
                if !sink.add_result(&record) {
                    error!(url = %record.url, "Sink rejected record");
                    state.stats.errors += 1;
                }
                state.stats.saved += 1;
                state.records.push(record);
            }
            Verdict::Exclude {
                relevance,
                reason,
                detail,
            } => {
                debug!(
                    url = %candidate.url,
                    total_words = relevance.total_words,
                    "Excluded: {}", detail
                );
                self.omit(query, candidate, reason, Some(detail), state, sink);
            }
        }
    }

    fn omit(
        &self,
        query: &Query,
        candidate: &Candidate,
        reason: OmitReason,
        detail: Option<String>,
        state: &mut RunState,
        sink: &mut dyn ResultSink,
    ) {
        let mut record = OmittedRecord::new(query, candidate, reason);
        if let Some(detail) = detail {
            record = record.with_detail(detail);
        }
        debug!(url = %candidate.url, "Omitted ({})", reason);
        state.stats.record_omission(reason);
        sink.add_omitted(&record);
    }
}

fn is_government_host(candidate: &Candidate) -> bool {
    candidate
        .host()
        .is_some_and(|h| h == "gov" || h.ends_with(".gov"))
}

/// Build, run and tear down one engine run.
///
/// Configuration problems end the run immediately with an `"Error: ..."`
/// progress message and no records.
pub async fn run(
    queries: &[Query],
    config: RunConfig,
    progress: &ProgressFn<'_>,
    sink: &mut dyn ResultSink,
    hooks: RunHooks,
) -> Vec<ScrapeRecord> {
    let orchestrator = match ScrapeOrchestrator::launch(config, hooks).await {
        Ok(o) => o,
        Err(e) => {
            error!("Run not started: {}", e);
            progress(100.0, &format!("Error: {}", e), &RunStats::default());
            return Vec::new();
        }
    };
    let records = orchestrator.run(queries, sink, progress).await;
    orchestrator.shutdown().await;
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::captcha::CaptchaKind;
    use crate::config::SearchEngineKind;
    use crate::error::ScrapeError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Fixed results; blocks the first `captcha_first` calls.
    struct FakeSearch {
        results: HashMap<String, Vec<Candidate>>,
        calls: AtomicUsize,
        captcha_first: usize,
        fail_terms: Vec<String>,
        stop_after_first: Mutex<Option<RunHandle>>,
    }

    impl FakeSearch {
        fn new(results: Vec<(&str, Vec<Candidate>)>) -> Self {
            Self {
                results: results
                    .into_iter()
                    .map(|(t, c)| (t.to_string(), c))
                    .collect(),
                calls: AtomicUsize::new(0),
                captcha_first: 0,
                fail_terms: Vec::new(),
                stop_after_first: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl SearchStrategy for FakeSearch {
        async fn search(
            &self,
            term: &str,
            _domain: Option<&str>,
        ) -> Result<SearchOutcome, ScrapeError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(handle) = self.stop_after_first.lock().unwrap().as_ref() {
                handle.request_stop();
            }
            if n < self.captcha_first {
                return Ok(SearchOutcome::NeedsManualCaptcha(CaptchaChallenge::new(
                    CaptchaKind::Widget,
                    "https://www.google.com/sorry",
                    "6LcKEY",
                )));
            }
            if self.fail_terms.iter().any(|t| t == term) {
                return Err(ScrapeError::Unavailable("engine down".into()));
            }
            Ok(SearchOutcome::Found(
                self.results.get(term).cloned().unwrap_or_default(),
            ))
        }
    }

    enum Page {
        Text(String),
        Slow,
        Fail,
    }

    struct FakeExtractor {
        pages: HashMap<String, Page>,
        calls: AtomicUsize,
    }

    impl FakeExtractor {
        fn new(pages: Vec<(&str, Page)>) -> Self {
            Self {
                pages: pages.into_iter().map(|(u, p)| (u.to_string(), p)).collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ContentSource for FakeExtractor {
        async fn extract(&self, url: &str) -> Result<String, ScrapeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.pages.get(url) {
                Some(Page::Text(t)) => Ok(t.clone()),
                Some(Page::Slow) => {
                    tokio::time::sleep(Duration::from_secs(600)).await;
                    Ok("late".into())
                }
                Some(Page::Fail) => Err(ScrapeError::Parse("bad bytes".into())),
                None => Ok(String::new()),
            }
        }
    }

    fn cotton_text(hits: usize, total: usize) -> String {
        let mut words = vec!["cotton"; hits];
        words.extend(std::iter::repeat("field").take(total - hits));
        words.join(" ")
    }

    fn candidate(url: &str) -> Candidate {
        Candidate::new(url, "Cotton report", "", SearchEngineKind::Google)
    }

    fn config(min: u32) -> RunConfig {
        let mut config = RunConfig::new(SearchEngineKind::Google);
        config.min_keyword_matches = min;
        config.limits.batch_pause_ms = 0;
        config
    }

    fn orchestrator(
        config: RunConfig,
        search: FakeSearch,
        extractor: FakeExtractor,
    ) -> ScrapeOrchestrator {
        ScrapeOrchestrator::new(
            config,
            Arc::new(search),
            Arc::new(extractor),
            Arc::new(ManualChannel::new(None)),
        )
    }

    fn quiet(_: f64, _: &str, _: &RunStats) {}

    fn stats_of(messages: &Mutex<Vec<(f64, String, RunStats)>>) -> RunStats {
        messages.lock().unwrap().last().unwrap().2.clone()
    }

    #[tokio::test]
    async fn test_single_cotton_document_is_kept() {
        let search = FakeSearch::new(vec![("Cotton", vec![candidate("https://usda.gov/c")])]);
        let extractor = FakeExtractor::new(vec![(
            "https://usda.gov/c",
            Page::Text(cotton_text(3, 50)),
        )]);
        let o = orchestrator(config(1), search, extractor);

        let messages = Mutex::new(Vec::new());
        let progress = |p: f64, m: &str, s: &RunStats| {
            messages.lock().unwrap().push((p, m.to_string(), s.clone()))
        };
        let mut sink = MemorySink::new();
        let records = o.run(&[Query::new("01.0", "Cotton")], &mut sink, &progress).await;

        assert_eq!(records.len(), 1);
        assert!(records[0].formatted_word_counts.contains("Total words: 50"));
        assert!(records[0].formatted_word_counts.contains("Cotton: 3"));
        assert_eq!(sink.results.len(), 1);
        assert!(sink.omitted.is_empty());
        assert_eq!(sink.done.len(), 1);

        let stats = stats_of(&messages);
        assert_eq!(stats.saved, 1);
        assert_eq!(stats.found, 1);

        let log = messages.lock().unwrap();
        assert_eq!(log[0].1, "Searching 1/1: Cotton");
        assert!(log.iter().any(|(_, m, _)| m == "Processing https://usda.gov/c"));
        assert!(log.iter().any(|(_, m, _)| m == "Query 01.0 done"));
        assert_eq!(log.last().unwrap().1, "completed, 1 results");
        assert!(log.windows(2).all(|w| w[0].0 <= w[1].0));
        assert_eq!(o.phase(), RunPhase::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extraction_timeout_is_not_an_error() {
        let search = FakeSearch::new(vec![("Cotton", vec![candidate("https://usda.gov/slow")])]);
        let extractor = FakeExtractor::new(vec![("https://usda.gov/slow", Page::Slow)]);
        let o = orchestrator(config(1), search, extractor);

        let mut sink = MemorySink::new();
        let last = Mutex::new(RunStats::default());
        let progress = |_: f64, _: &str, s: &RunStats| *last.lock().unwrap() = s.clone();
        let records = o.run(&[Query::new("01.0", "Cotton")], &mut sink, &progress).await;

        assert!(records.is_empty());
        assert_eq!(sink.omitted.len(), 1);
        assert_eq!(sink.omitted[0].reason, OmitReason::ExtractionTimeout);
        let stats = last.lock().unwrap().clone();
        assert_eq!(stats.errors, 0);
        assert_eq!(stats.extraction_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_deadline_times_out_stragglers() {
        let mut cfg = config(1);
        cfg.limits.batch_size = 2;
        cfg.limits.extraction_timeout_secs = 1000;
        cfg.limits.batch_timeout_secs = 180;
        let search = FakeSearch::new(vec![(
            "Cotton",
            vec![candidate("https://usda.gov/slow"), candidate("https://usda.gov/c")],
        )]);
        let extractor = FakeExtractor::new(vec![
            ("https://usda.gov/slow", Page::Slow),
            ("https://usda.gov/c", Page::Text(cotton_text(3, 10))),
        ]);
        let o = orchestrator(cfg, search, extractor);

        let mut sink = MemorySink::new();
        let records = o.run(&[Query::new("01.0", "Cotton")], &mut sink, &quiet).await;
        assert_eq!(records.len(), 1);
        assert_eq!(sink.omitted.len(), 1);
        assert_eq!(sink.omitted[0].reason, OmitReason::ExtractionTimeout);
        assert_eq!(sink.omitted[0].url, "https://usda.gov/slow");
    }

    #[tokio::test]
    async fn test_duplicate_candidate_is_omitted_once() {
        let search = FakeSearch::new(vec![(
            "Cotton",
            vec![candidate("https://usda.gov/c"), candidate("https://usda.gov/c")],
        )]);
        let extractor = FakeExtractor::new(vec![(
            "https://usda.gov/c",
            Page::Text(cotton_text(3, 50)),
        )]);
        let o = orchestrator(config(1), search, extractor);

        let last = Mutex::new(RunStats::default());
        let progress = |_: f64, _: &str, s: &RunStats| *last.lock().unwrap() = s.clone();
        let mut sink = MemorySink::new();
        let records = o.run(&[Query::new("01.0", "Cotton")], &mut sink, &progress).await;

        assert_eq!(records.len(), 1);
        assert_eq!(sink.omitted.len(), 1);
        assert_eq!(sink.omitted[0].reason, OmitReason::Duplicate);
        assert_eq!(last.lock().unwrap().duplicates, 1);
    }

    #[tokio::test]
    async fn test_every_candidate_is_accounted_for() {
        let search = FakeSearch::new(vec![
            (
                "Cotton",
                vec![
                    candidate("https://usda.gov/keep"),
                    candidate("https://usda.gov/few"),
                    candidate("https://usda.gov/empty"),
                    candidate("https://usda.gov/broken"),
                    candidate("https://usda.gov/keep"),
                    candidate(""),
                ],
            ),
            ("Wheat", vec![candidate("https://usda.gov/keep")]),
        ]);
        let extractor = FakeExtractor::new(vec![
            ("https://usda.gov/keep", Page::Text(cotton_text(40, 200) + " wheat")),
            ("https://usda.gov/few", Page::Text(cotton_text(5, 200))),
            ("https://usda.gov/broken", Page::Fail),
        ]);
        let o = orchestrator(config(30), search, extractor);

        let last = Mutex::new(RunStats::default());
        let progress = |_: f64, _: &str, s: &RunStats| *last.lock().unwrap() = s.clone();
        let mut sink = MemorySink::new();
        let queries = [Query::new("01.0", "Cotton"), Query::new("02.0", "Wheat")];
        let records = o.run(&queries, &mut sink, &progress).await;

        let stats = last.lock().unwrap().clone();
        assert_eq!(stats.found, 7);
        assert_eq!(records.len() + sink.omitted.len(), 7);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].code, "01.0");

        let reasons: Vec<OmitReason> = sink.omitted.iter().map(|o| o.reason).collect();
        for expected in [
            OmitReason::NoKeywordMatches,
            OmitReason::ExtractionFailed,
            OmitReason::ExtractionError,
            OmitReason::Duplicate,
            OmitReason::MissingUrl,
        ] {
            assert!(reasons.contains(&expected), "missing {:?}", expected);
        }
        let few = sink
            .omitted
            .iter()
            .find(|o| o.url == "https://usda.gov/few")
            .unwrap();
        assert_eq!(few.detail.as_deref(), Some("total keyword matches 5 < 30"));
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.not_saved as usize, sink.omitted.len());
    }

    #[tokio::test]
    async fn test_gov_only_filter() {
        let mut cfg = config(1);
        cfg.gov_only_filter = true;
        let search = FakeSearch::new(vec![(
            "Cotton",
            vec![candidate("https://example.com/c"), candidate("https://usda.gov/c")],
        )]);
        let extractor = FakeExtractor::new(vec![(
            "https://usda.gov/c",
            Page::Text(cotton_text(3, 5)),
        )]);
        let o = orchestrator(cfg, search, extractor);

        let mut sink = MemorySink::new();
        let records = o.run(&[Query::new("01.0", "Cotton")], &mut sink, &quiet).await;
        assert_eq!(records.len(), 1);
        assert_eq!(sink.omitted[0].reason, OmitReason::NonGovernment);
    }

    #[tokio::test]
    async fn test_search_error_moves_to_next_query() {
        let mut search = FakeSearch::new(vec![("Wheat", vec![candidate("https://usda.gov/w")])]);
        search.fail_terms = vec!["Cotton".into()];
        let extractor = FakeExtractor::new(vec![(
            "https://usda.gov/w",
            Page::Text("wheat".into()),
        )]);
        let o = orchestrator(config(1), search, extractor);

        let last = Mutex::new(RunStats::default());
        let progress = |_: f64, _: &str, s: &RunStats| *last.lock().unwrap() = s.clone();
        let mut sink = MemorySink::new();
        let queries = [Query::new("01.0", "Cotton"), Query::new("02.0", "Wheat")];
        let records = o.run(&queries, &mut sink, &progress).await;

        assert_eq!(records.len(), 1);
        assert_eq!(last.lock().unwrap().errors, 1);
        assert_eq!(sink.done.len(), 2);
    }

    #[tokio::test]
    async fn test_manual_captcha_retries_query_in_full() {
        let mut search = FakeSearch::new(vec![("Cotton", vec![candidate("https://usda.gov/c")])]);
        search.captcha_first = 1;
        let search = Arc::new(search);
        let extractor = FakeExtractor::new(vec![(
            "https://usda.gov/c",
            Page::Text(cotton_text(3, 5)),
        )]);

        let seen: Arc<Mutex<Vec<uuid::Uuid>>> = Arc::default();
        let listener: Arc<dyn ChallengeListener> = {
            let seen = seen.clone();
            Arc::new(move |c: &CaptchaChallenge| seen.lock().unwrap().push(c.id))
        };
        let o = ScrapeOrchestrator::new(
            config(1),
            search.clone(),
            Arc::new(extractor),
            Arc::new(ManualChannel::new(Some(listener))),
        );
        let handle = o.handle();

        let solver = {
            let seen = seen.clone();
            tokio::spawn(async move {
                loop {
                    let id = seen.lock().unwrap().first().copied();
                    if let Some(id) = id {
                        if handle.submit_solution(id, "03AGdBq2").is_ok() {
                            return handle.phase();
                        }
                    }
                    tokio::task::yield_now().await;
                }
            })
        };

        let last = Mutex::new(RunStats::default());
        let progress = |_: f64, _: &str, s: &RunStats| *last.lock().unwrap() = s.clone();
        let mut sink = MemorySink::new();
        let records = o.run(&[Query::new("01.0", "Cotton")], &mut sink, &progress).await;
        assert_eq!(solver.await.unwrap(), RunPhase::Paused);

        assert_eq!(search.calls.load(Ordering::SeqCst), 2);
        assert_eq!(records.len(), 1);
        assert!(sink.omitted.is_empty());
        assert_eq!(o.phase(), RunPhase::Completed);
        // Published once; the answer lifts the pause but solves nothing itself.
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(last.lock().unwrap().captchas_solved, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_captcha_expires_and_skips_query() {
        let mut search = FakeSearch::new(vec![
            ("Cotton", vec![candidate("https://usda.gov/c")]),
            ("Wheat", vec![candidate("https://usda.gov/w")]),
        ]);
        search.captcha_first = 1;
        let search = Arc::new(search);
        let extractor =
            FakeExtractor::new(vec![("https://usda.gov/w", Page::Text("wheat wheat".into()))]);

        let published = Arc::new(AtomicUsize::new(0));
        let listener: Arc<dyn ChallengeListener> = {
            let published = published.clone();
            Arc::new(move |_: &CaptchaChallenge| {
                published.fetch_add(1, Ordering::SeqCst);
            })
        };
        let channel = Arc::new(ManualChannel::new(Some(listener)));
        let mut config = config(1);
        config.captcha.manual_timeout_secs = 30;
        let o = ScrapeOrchestrator::new(
            config,
            search.clone(),
            Arc::new(extractor),
            channel.clone(),
        );

        let last = Mutex::new(RunStats::default());
        let progress = |_: f64, _: &str, s: &RunStats| *last.lock().unwrap() = s.clone();
        let mut sink = MemorySink::new();
        let queries = [Query::new("01.0", "Cotton"), Query::new("02.0", "Wheat")];
        let started = tokio::time::Instant::now();
        let records = o.run(&queries, &mut sink, &progress).await;

        assert!(started.elapsed() >= Duration::from_secs(30));
        assert_eq!(search.calls.load(Ordering::SeqCst), 2);
        assert_eq!(published.load(Ordering::SeqCst), 1);
        assert_eq!(channel.pending_count(), 0);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "Wheat");
        assert_eq!(last.lock().unwrap().errors, 1);
        assert_eq!(o.phase(), RunPhase::Completed);
    }

    #[tokio::test]
    async fn test_resume_clears_pause_without_solution() {
        let mut search = FakeSearch::new(vec![("Cotton", vec![])]);
        search.captcha_first = 1;
        let search = Arc::new(search);
        let o = ScrapeOrchestrator::new(
            config(1),
            search.clone(),
            Arc::new(FakeExtractor::new(vec![])),
            Arc::new(ManualChannel::new(None)),
        );
        let handle = o.handle();
        let resumer = tokio::spawn(async move {
            while handle.phase() != RunPhase::Paused {
                tokio::task::yield_now().await;
            }
            handle.resume();
        });

        let mut sink = MemorySink::new();
        o.run(&[Query::new("01.0", "Cotton")], &mut sink, &quiet).await;
        resumer.await.unwrap();
        assert_eq!(search.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stop_is_observed_between_queries() {
        let search = Arc::new(FakeSearch::new(vec![
            ("Cotton", vec![candidate("https://usda.gov/c")]),
            ("Wheat", vec![candidate("https://usda.gov/w")]),
        ]));
        let extractor = FakeExtractor::new(vec![(
            "https://usda.gov/c",
            Page::Text("cotton".into()),
        )]);
        let o = ScrapeOrchestrator::new(
            config(1),
            search.clone(),
            Arc::new(extractor),
            Arc::new(ManualChannel::new(None)),
        );
        *search.stop_after_first.lock().unwrap() = Some(o.handle());

        let messages = Mutex::new(Vec::new());
        let progress = |_: f64, m: &str, _: &RunStats| messages.lock().unwrap().push(m.to_string());
        let mut sink = MemorySink::new();
        let queries = [Query::new("01.0", "Cotton"), Query::new("02.0", "Wheat")];
        let records = o.run(&queries, &mut sink, &progress).await;

        assert!(records.is_empty());
        assert_eq!(search.calls.load(Ordering::SeqCst), 1);
        assert_eq!(o.phase(), RunPhase::StoppedByUser);
        assert!(messages.lock().unwrap().last().unwrap().starts_with("stopped by user"));
    }

    #[tokio::test]
    async fn test_invalid_config_marks_run_failed() {
        let search = Arc::new(FakeSearch::new(vec![(
            "Cotton",
            vec![candidate("https://usda.gov/c")],
        )]));
        let mut config = config(1);
        config.limits.batch_size = 0;
        let o = ScrapeOrchestrator::new(
            config,
            search.clone(),
            Arc::new(FakeExtractor::new(vec![])),
            Arc::new(ManualChannel::new(None)),
        );

        let messages = Mutex::new(Vec::new());
        let progress = |_: f64, m: &str, _: &RunStats| messages.lock().unwrap().push(m.to_string());
        let mut sink = MemorySink::new();
        let records = o.run(&[Query::new("01.0", "Cotton")], &mut sink, &progress).await;

        assert!(records.is_empty());
        assert_eq!(search.calls.load(Ordering::SeqCst), 0);
        assert_eq!(o.phase(), RunPhase::Failed);
        assert_eq!(
            messages.lock().unwrap().as_slice(),
            ["Error: batch_size must be greater than zero"]
        );
    }

    #[tokio::test]
    async fn test_config_error_returns_empty_with_message() {
        let config = RunConfig::new(SearchEngineKind::ArchiveIndex);
        let messages = Mutex::new(Vec::new());
        let progress = |_: f64, m: &str, _: &RunStats| messages.lock().unwrap().push(m.to_string());
        let mut sink = MemorySink::new();

        let records = run(
            &[Query::new("01.0", "Cotton")],
            config,
            &progress,
            &mut sink,
            RunHooks::default(),
        )
        .await;

        assert!(records.is_empty());
        assert!(sink.results.is_empty() && sink.omitted.is_empty());
        assert_eq!(
            messages.lock().unwrap().as_slice(),
            ["Error: archive index requires a site domain"]
        );
    }
}
