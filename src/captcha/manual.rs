//! Manual CAPTCHA hand-off keyed by challenge id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{info, warn};
use uuid::Uuid;

use super::CaptchaChallenge;
use crate::error::CaptchaError;

/// Receives challenges that need a human.
pub trait ChallengeListener: Send + Sync {
    fn on_challenge(&self, challenge: &CaptchaChallenge);
}

impl<F> ChallengeListener for F
where
    F: Fn(&CaptchaChallenge) + Send + Sync,
{
    fn on_challenge(&self, challenge: &CaptchaChallenge) {
        self(challenge)
    }
}

/// Pending challenges and their one-shot solution senders.
pub struct ManualChannel {
    pending: Mutex<HashMap<Uuid, oneshot::Sender<String>>>,
    listener: Option<Arc<dyn ChallengeListener>>,
}

impl ManualChannel {
    pub fn new(listener: Option<Arc<dyn ChallengeListener>>) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            listener,
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<Uuid, oneshot::Sender<String>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register `challenge` and hand it to the listener.
    pub fn publish(&self, challenge: &CaptchaChallenge) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        self.pending().insert(challenge.id, tx);
        match &self.listener {
            Some(listener) => listener.on_challenge(challenge),
            None => warn!(
                challenge_id = %challenge.id,
                "No challenge listener registered; challenge for {} can only be solved via submit_solution",
                challenge.page_url
            ),
        }
        rx
    }

    /// Deliver a solution to the waiter registered under `id`.
    pub fn submit_solution(
        &self,
        id: Uuid,
        solution: impl Into<String>,
    ) -> Result<(), CaptchaError> {
        let sender = self
            .pending()
            .remove(&id)
            .ok_or(CaptchaError::UnknownChallenge(id))?;
        sender
            .send(solution.into())
            .map_err(|_| CaptchaError::UnknownChallenge(id))
    }

    /// Drop a pending challenge; later submissions for it are rejected.
    pub fn cancel(&self, id: Uuid) {
        self.pending().remove(&id);
    }

    pub fn is_pending(&self, id: Uuid) -> bool {
        self.pending().contains_key(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }

    /// Publish and wait up to `timeout` for a non-empty solution.
    pub async fn wait_for_solution(
        &self,
        challenge: &CaptchaChallenge,
        timeout: Duration,
    ) -> Option<String> {
        let rx = self.publish(challenge);
        info!(
            challenge_id = %challenge.id,
            "Waiting up to {:?} for a manual solution", timeout
        );

        let outcome = tokio::time::timeout(timeout, rx).await;
        self.cancel(challenge.id);
        match outcome {
            Ok(Ok(solution)) if !solution.trim().is_empty() => Some(solution),
            Ok(Ok(_)) => {
                warn!(challenge_id = %challenge.id, "Empty manual solution");
                None
            }
            Ok(Err(_)) => None,
            Err(_) => {
                warn!(challenge_id = %challenge.id, "Manual solution timed out");
                None
            }
        }
    }
}

/// Cloneable entry point for whoever answers challenges.
#[derive(Clone)]
pub struct CaptchaHandle {
    channel: Arc<ManualChannel>,
}

impl CaptchaHandle {
    pub fn new(channel: Arc<ManualChannel>) -> Self {
        Self { channel }
    }

    pub fn submit_solution(
        &self,
        id: Uuid,
        solution: impl Into<String>,
    ) -> Result<(), CaptchaError> {
        self.channel.submit_solution(id, solution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::captcha::CaptchaKind;

    fn challenge() -> CaptchaChallenge {
        CaptchaChallenge::new(CaptchaKind::Widget, "https://example.com", "6LcKEY")
    }

    #[tokio::test]
    async fn test_solution_reaches_matching_waiter() {
        let channel = Arc::new(ManualChannel::new(None));
        let a = challenge();
        let b = challenge();
        let rx_a = channel.publish(&a);
        let rx_b = channel.publish(&b);

        channel.submit_solution(b.id, "token-b").unwrap();
        assert_eq!(rx_b.await.unwrap(), "token-b");
        assert!(channel.is_pending(a.id));

        channel.submit_solution(a.id, "token-a").unwrap();
        assert_eq!(rx_a.await.unwrap(), "token-a");
        assert_eq!(channel.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_id_rejected() {
        let channel = ManualChannel::new(None);
        let id = Uuid::new_v4();
        assert!(matches!(
            channel.submit_solution(id, "x"),
            Err(CaptchaError::UnknownChallenge(got)) if got == id
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_as_unresolved() {
        let channel = ManualChannel::new(None);
        let c = challenge();
        let solution = channel
            .wait_for_solution(&c, Duration::from_secs(300))
            .await;
        assert_eq!(solution, None);
        assert!(channel.submit_solution(c.id, "late").is_err());
    }

    #[tokio::test]
    async fn test_listener_sees_challenge_and_handle_answers() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_listener = seen.clone();
        let listener: Arc<dyn ChallengeListener> = Arc::new(move |c: &CaptchaChallenge| {
            seen_in_listener.lock().unwrap().push(c.id);
        });
        let channel = Arc::new(ManualChannel::new(Some(listener)));
        let handle = CaptchaHandle::new(channel.clone());

        let c = challenge();
        let waiter = {
            let channel = channel.clone();
            let c = c.clone();
            tokio::spawn(async move { channel.wait_for_solution(&c, Duration::from_secs(5)).await })
        };

        while seen.lock().unwrap().is_empty() {
            tokio::task::yield_now().await;
        }
        handle.submit_solution(c.id, "solved").unwrap();
        assert_eq!(waiter.await.unwrap(), Some("solved".to_string()));
        assert_eq!(seen.lock().unwrap().as_slice(), &[c.id]);
    }
}
