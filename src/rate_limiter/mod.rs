//! Request pacing and per-domain backoff.
//!
//! [`NavigationPacer`] spaces out every navigation. [`RateLimiter`] tracks
//! hosts that answered 429/503 (or a run of 403s) and holds further requests
//! to them until the backoff elapses; successes gradually clear it.

mod domain_state;
mod pacer;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use domain_state::DomainState;
pub use pacer::NavigationPacer;

/// Backoff tuning.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// First backoff applied after a rate-limit signal.
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    /// Multiplier applied per recovery step (< 1.0).
    pub recovery_multiplier: f64,
    /// Consecutive successes before a recovery step.
    pub recovery_threshold: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            recovery_multiplier: 0.5,
            recovery_threshold: 3,
        }
    }
}

/// Snapshot of one domain for logging.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainStats {
    pub backoff: Duration,
    pub total_requests: u64,
    pub rate_limit_hits: u64,
}

/// Adaptive per-domain backoff shared by every HTTP path of a run.
#[derive(Debug, Clone, Default)]
pub struct RateLimiter {
    config: RateLimitConfig,
    domains: Arc<RwLock<HashMap<String, DomainState>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_config(RateLimitConfig::default())
    }

    pub fn with_config(config: RateLimitConfig) -> Self {
        Self {
            config,
            domains: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn extract_domain(url: &str) -> Option<String> {
        Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|s| s.to_string()))
    }

    /// Wait out any backoff for the URL's domain, then mark a request as started.
    pub async fn acquire(&self, url: &str) -> Option<String> {
        let domain = Self::extract_domain(url)?;

        let wait_time = {
            let domains = self.domains.read().await;
            domains
                .get(&domain)
                .map(|s| s.time_until_ready())
                .unwrap_or(Duration::ZERO)
        };

        if !wait_time.is_zero() {
            debug!("Backing off {}: waiting {:?}", domain, wait_time);
            tokio::time::sleep(wait_time).await;
        }

        let mut domains = self.domains.write().await;
        let state = domains.entry(domain.clone()).or_default();
        state.last_request = Some(Instant::now());
        state.total_requests += 1;

        Some(domain)
    }

    /// Route a response status to the matching report.
    pub async fn report_status(&self, domain: &str, url: &str, status: u16, has_retry_after: bool) {
        match status {
            429 | 503 => self.report_rate_limit(domain, status).await,
            403 => {
                self.report_403(domain, url, has_retry_after).await;
            }
            200..=399 => self.report_success(domain).await,
            _ => {}
        }
    }

    pub async fn report_success(&self, domain: &str) {
        let mut domains = self.domains.write().await;
        if let Some(state) = domains.get_mut(domain) {
            state.consecutive_successes += 1;
            state.recent_403s.clear();

            if state.in_backoff() && state.consecutive_successes >= self.config.recovery_threshold
            {
                let reduced = state.backoff.mul_f64(self.config.recovery_multiplier);
                state.backoff = if reduced < Duration::from_millis(250) {
                    info!("Domain {} recovered from backoff", domain);
                    Duration::ZERO
                } else {
                    reduced
                };
                state.consecutive_successes = 0;
            }
        }
    }

    /// 403 only counts as rate limiting with Retry-After or a pattern across URLs.
    pub async fn report_403(&self, domain: &str, url: &str, has_retry_after: bool) -> bool {
        let mut domains = self.domains.write().await;
        let Some(state) = domains.get_mut(domain) else {
            return false;
        };
        state.consecutive_successes = 0;
        let pattern = state.add_403(url);

        if has_retry_after || pattern {
            let distinct = state.unique_403_count();
            state.recent_403s.clear();
            self.escalate(state);
            warn!(
                "Rate limited by {} ({} distinct URLs refused), backing off to {:?}",
                domain, distinct, state.backoff
            );
            true
        } else {
            debug!("403 from {} for {} treated as access denied", domain, url);
            false
        }
    }

    pub async fn report_rate_limit(&self, domain: &str, status_code: u16) {
        let mut domains = self.domains.write().await;
        if let Some(state) = domains.get_mut(domain) {
            state.consecutive_successes = 0;
            state.recent_403s.clear();
            self.escalate(state);
            warn!(
                "Rate limited by {} (HTTP {}), backing off to {:?}",
                domain, status_code, state.backoff
            );
        }
    }

    fn escalate(&self, state: &mut DomainState) {
        state.rate_limit_hits += 1;
        let next = if state.in_backoff() {
            state.backoff.mul_f64(self.config.backoff_multiplier)
        } else {
            self.config.initial_backoff
        };
        state.backoff = next.min(self.config.max_backoff);
    }

    pub async fn get_stats(&self) -> HashMap<String, DomainStats> {
        let domains = self.domains.read().await;
        domains
            .iter()
            .map(|(k, v)| {
                (
                    k.clone(),
                    DomainStats {
                        backoff: v.backoff,
                        total_requests: v.total_requests,
                        rate_limit_hits: v.rate_limit_hits,
                    },
                )
            })
            .collect()
    }
}
