//! Adaptive delay applied before every navigation.
//!
//! Counts navigations in a sliding 60 second window. Busy windows get a
//! longer base delay, quiet ones a shorter one, and every delay is jittered
//! and clamped to a fixed band.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::debug;

const WINDOW: Duration = Duration::from_secs(60);
const BUSY_THRESHOLD: usize = 10;
const MIN_DELAY: f64 = 0.2;
const MAX_DELAY: f64 = 2.0;
const JITTER: f64 = 0.2;

/// Sliding-window navigation pacer. Owned by one extractor for one run.
#[derive(Debug, Default)]
pub struct NavigationPacer {
    recent: Mutex<VecDeque<Instant>>,
}

impl NavigationPacer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay for a navigation given how many happened in the last minute.
    pub fn delay_for(recent_count: usize, rng: &mut impl Rng) -> Duration {
        let base = if recent_count > BUSY_THRESHOLD {
            rng.random_range(1.0..2.0)
        } else {
            rng.random_range(0.3..1.0)
        };
        let jittered = base + rng.random_range(-JITTER..JITTER);
        Duration::from_secs_f64(jittered.clamp(MIN_DELAY, MAX_DELAY))
    }

    /// Record a navigation now and return how long to wait before firing it.
    pub fn next_delay(&self) -> Duration {
        let now = Instant::now();
        let count = match self.recent.lock() {
            Ok(mut recent) => {
                while recent
                    .front()
                    .is_some_and(|t| now.duration_since(*t) >= WINDOW)
                {
                    recent.pop_front();
                }
                recent.push_back(now);
                recent.len() - 1
            }
            Err(_) => 0,
        };
        Self::delay_for(count, &mut rand::rng())
    }

    /// Sleep for the adaptive delay.
    pub async fn pace(&self) {
        let delay = self.next_delay();
        debug!("Pacing navigation by {:?}", delay);
        tokio::time::sleep(delay).await;
    }

    /// Navigations recorded in the current window.
    pub fn recent_count(&self) -> usize {
        let now = Instant::now();
        self.recent
            .lock()
            .map(|r| r.iter().filter(|t| now.duration_since(**t) < WINDOW).count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_always_in_band() {
        let mut rng = rand::rng();
        for count in [0, 5, 10, 11, 50] {
            for _ in 0..200 {
                let d = NavigationPacer::delay_for(count, &mut rng).as_secs_f64();
                assert!((MIN_DELAY..=MAX_DELAY).contains(&d), "{} out of band", d);
            }
        }
    }

    #[test]
    fn test_busy_window_is_slower_on_average() {
        let mut rng = rand::rng();
        let avg = |count: usize, rng: &mut rand::rngs::ThreadRng| {
            (0..500)
                .map(|_| NavigationPacer::delay_for(count, rng).as_secs_f64())
                .sum::<f64>()
                / 500.0
        };
        let quiet = avg(0, &mut rng);
        let busy = avg(20, &mut rng);
        assert!(busy > quiet);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_expires() {
        let pacer = NavigationPacer::new();
        for _ in 0..12 {
            pacer.next_delay();
        }
        assert_eq!(pacer.recent_count(), 12);
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(pacer.recent_count(), 0);
    }
}
