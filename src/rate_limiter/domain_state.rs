//! Per-domain backoff state.

use std::time::{Duration, Instant};

/// Window in which 403s on distinct URLs count toward a rate-limit verdict.
pub const FORBIDDEN_WINDOW: Duration = Duration::from_secs(60);

/// Distinct URLs answering 403 inside the window before we call it a rate limit.
pub const FORBIDDEN_THRESHOLD: usize = 3;

#[derive(Debug, Clone)]
pub struct DomainState {
    /// Extra delay imposed on this domain; zero when healthy.
    pub backoff: Duration,
    pub last_request: Option<Instant>,
    pub consecutive_successes: u32,
    /// Recent 403 responses as (timestamp, url), oldest first.
    pub recent_403s: Vec<(Instant, String)>,
    pub total_requests: u64,
    pub rate_limit_hits: u64,
}

impl DomainState {
    pub fn new() -> Self {
        Self {
            backoff: Duration::ZERO,
            last_request: None,
            consecutive_successes: 0,
            recent_403s: Vec::new(),
            total_requests: 0,
            rate_limit_hits: 0,
        }
    }

    pub fn in_backoff(&self) -> bool {
        !self.backoff.is_zero()
    }

    /// Record a 403; true when enough distinct URLs were refused recently.
    pub fn add_403(&mut self, url: &str) -> bool {
        let now = Instant::now();
        self.recent_403s
            .retain(|(t, _)| now.duration_since(*t) < FORBIDDEN_WINDOW);
        self.recent_403s.push((now, url.to_string()));
        self.unique_403_count() >= FORBIDDEN_THRESHOLD
    }

    pub fn unique_403_count(&self) -> usize {
        let mut urls: Vec<&str> = self.recent_403s.iter().map(|(_, u)| u.as_str()).collect();
        urls.sort_unstable();
        urls.dedup();
        urls.len()
    }

    /// Time until this domain is ready for another request.
    pub fn time_until_ready(&self) -> Duration {
        match self.last_request {
            Some(last) => self.backoff.saturating_sub(last.elapsed()),
            None => Duration::ZERO,
        }
    }
}

impl Default for DomainState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_403_pattern_needs_distinct_urls() {
        let mut state = DomainState::new();
        assert!(!state.add_403("https://a.gov/1"));
        assert!(!state.add_403("https://a.gov/1"));
        assert!(!state.add_403("https://a.gov/2"));
        assert!(state.add_403("https://a.gov/3"));
    }

    #[test]
    fn test_healthy_domain_is_ready() {
        let mut state = DomainState::new();
        state.last_request = Some(Instant::now());
        assert_eq!(state.time_until_ready(), Duration::ZERO);
        state.backoff = Duration::from_secs(10);
        assert!(state.time_until_ready() > Duration::from_secs(9));
    }
}
