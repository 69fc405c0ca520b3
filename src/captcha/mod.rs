//! CAPTCHA detection, automatic solving and manual escalation.
//!
//! A strategy hands its page to [`CaptchaCoordinator::resolve`] whenever a
//! results page looks blocked. The coordinator only tries the configured
//! paid backend. A challenge it cannot solve is returned to the caller
//! right away; the orchestrator publishes it once on the [`ManualChannel`]
//! and suspends the run until a human answers.

mod detect;
mod manual;
mod solver;

pub use detect::{detect_in_html, Detection};
pub use manual::{CaptchaHandle, ChallengeListener, ManualChannel};
pub use solver::TwoCaptchaSolver;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::browser::BrowserPage;
use crate::config::CaptchaSettings;
use crate::error::{CaptchaError, ScrapeError};
use crate::http_client::HttpClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptchaKind {
    Image,
    Widget,
}

/// A challenge awaiting a solution.
///
/// `payload` is the widget site key, or the base64 image body for image
/// challenges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptchaChallenge {
    pub id: Uuid,
    pub kind: CaptchaKind,
    pub page_url: String,
    pub payload: String,
}

impl CaptchaChallenge {
    pub fn new(kind: CaptchaKind, page_url: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            page_url: page_url.into(),
            payload: payload.into(),
        }
    }
}

/// Outcome of [`CaptchaCoordinator::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Nothing detected.
    Clear,
    Solved,
    Unresolved(CaptchaChallenge),
}

/// Run-scoped CAPTCHA state machine.
pub struct CaptchaCoordinator {
    solver: Option<TwoCaptchaSolver>,
    channel: Arc<ManualChannel>,
    http: HttpClient,
    detected: AtomicU64,
    solved: AtomicU64,
}

impl CaptchaCoordinator {
    pub fn new(settings: &CaptchaSettings, http: HttpClient, channel: Arc<ManualChannel>) -> Self {
        let solver = TwoCaptchaSolver::from_settings(settings, http.clone());
        if solver.is_none() {
            debug!("Automatic CAPTCHA solving disabled");
        }
        Self {
            solver,
            channel,
            http,
            detected: AtomicU64::new(0),
            solved: AtomicU64::new(0),
        }
    }

    pub fn channel(&self) -> &Arc<ManualChannel> {
        &self.channel
    }

    pub fn handle(&self) -> CaptchaHandle {
        CaptchaHandle::new(self.channel.clone())
    }

    /// (detected, solved) so far.
    pub fn counts(&self) -> (u64, u64) {
        (
            self.detected.load(Ordering::Relaxed),
            self.solved.load(Ordering::Relaxed),
        )
    }

    /// Look for a challenge on the page.
    pub async fn detect(&self, page: &BrowserPage) -> Option<CaptchaChallenge> {
        let html = match page.html().await {
            Ok(html) => html,
            Err(e) => {
                debug!("Could not read page for CAPTCHA detection: {}", e);
                return None;
            }
        };
        let page_url = page.current_url().await.unwrap_or_default();

        let challenge = match detect_in_html(&html, &page_url)? {
            Detection::Widget { site_key } => {
                CaptchaChallenge::new(CaptchaKind::Widget, &page_url, site_key)
            }
            Detection::Image { image_src } => match self.image_payload(&image_src).await {
                Ok(payload) => CaptchaChallenge::new(CaptchaKind::Image, &page_url, payload),
                Err(e) => {
                    warn!("Image CAPTCHA on {} could not be fetched: {}", page_url, e);
                    return None;
                }
            },
        };

        self.detected.fetch_add(1, Ordering::Relaxed);
        info!(
            challenge_id = %challenge.id,
            "CAPTCHA ({:?}) detected on {}", challenge.kind, page_url
        );
        Some(challenge)
    }

    async fn image_payload(&self, src: &str) -> Result<String, CaptchaError> {
        if let Some(data) = src.strip_prefix("data:") {
            return data
                .split_once("base64,")
                .map(|(_, b64)| b64.to_string())
                .ok_or_else(|| CaptchaError::Payload("inline image is not base64".into()));
        }
        let (_, bytes) = self.http.get_bytes(src, &[]).await?;
        Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    /// Try the paid backend, if configured.
    pub async fn auto_solve(&self, challenge: &CaptchaChallenge) -> Option<String> {
        let solver = self.solver.as_ref()?;
        let result = match challenge.kind {
            CaptchaKind::Widget => {
                solver
                    .solve_widget(&challenge.page_url, &challenge.payload)
                    .await
            }
            CaptchaKind::Image => solver.solve_image(&challenge.payload).await,
        };
        match result {
            Ok(solution) => Some(solution),
            Err(e) => {
                warn!(challenge_id = %challenge.id, "Automatic solve failed: {}", e);
                None
            }
        }
    }

    /// Inject a solution into the page and submit it.
    pub async fn apply(
        &self,
        page: &BrowserPage,
        challenge: &CaptchaChallenge,
        solution: &str,
    ) -> Result<(), ScrapeError> {
        let token = serde_json::to_string(solution)
            .map_err(|e| ScrapeError::Parse(format!("unencodable solution: {}", e)))?;
        match challenge.kind {
            CaptchaKind::Widget => {
                let outcome = page.eval_string(&widget_script(&token)).await?;
                debug!(challenge_id = %challenge.id, "Widget solution applied via {}", outcome);
            }
            CaptchaKind::Image => {
                page.run_script(&image_script(&token)).await?;
                let settle = rand::rng().random_range(3.0..7.0);
                tokio::time::sleep(Duration::from_secs_f64(settle)).await;
            }
        }
        self.solved.fetch_add(1, Ordering::Relaxed);
        info!(challenge_id = %challenge.id, "CAPTCHA solution submitted");
        Ok(())
    }

    /// Detect, auto-solve and apply for one page. Never waits on a human.
    pub async fn resolve(&self, page: &BrowserPage) -> Resolution {
        let Some(challenge) = self.detect(page).await else {
            return Resolution::Clear;
        };
        let Some(solution) = self.auto_solve(&challenge).await else {
            debug!(challenge_id = %challenge.id, "No automatic solution, needs a human");
            return Resolution::Unresolved(challenge);
        };
        match self.apply(page, &challenge, &solution).await {
            Ok(()) => Resolution::Solved,
            Err(e) => {
                warn!(challenge_id = %challenge.id, "Applying solution failed: {}", e);
                Resolution::Unresolved(challenge)
            }
        }
    }
}

fn widget_script(token_json: &str) -> String {
    format!(
        r#"(() => {{
            const token = {token};
            const field = document.getElementById('g-recaptcha-response');
            if (field) {{ field.value = token; field.innerHTML = token; }}
            if (typeof submitCallback === 'function') {{ submitCallback(token); return 'callback'; }}
            const form = (field && field.form) || document.getElementById('captcha-form');
            if (form) {{ form.submit(); return 'form'; }}
            return 'none';
        }})()"#,
        token = token_json
    )
}

fn image_script(token_json: &str) -> String {
    format!(
        r#"(() => {{
            const input = document.querySelector('{selector}');
            if (!input) return false;
            input.value = {token};
            input.dispatchEvent(new Event('input', {{ bubbles: true }}));
            if (input.form) {{ input.form.submit(); }}
            return true;
        }})()"#,
        selector = detect::IMAGE_INPUT_SELECTOR.replace('\'', "\\'"),
        token = token_json
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_ids_are_unique() {
        let a = CaptchaChallenge::new(CaptchaKind::Image, "https://x", "aGk=");
        let b = CaptchaChallenge::new(CaptchaKind::Image, "https://x", "aGk=");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_challenge_serializes_kind() {
        let c = CaptchaChallenge::new(CaptchaKind::Widget, "https://x", "key");
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["kind"], "widget");
        assert_eq!(json["payload"], "key");
    }

    #[test]
    fn test_scripts_embed_escaped_token() {
        let token = serde_json::to_string("a'b\"c").unwrap();
        let script = widget_script(&token);
        assert!(script.contains(r#""a'b\"c""#));
        let script = image_script(&token);
        assert!(script.contains("input[name*=\"captcha\"]"));
    }

    #[tokio::test]
    async fn test_coordinator_without_key_has_no_solver() {
        let http = HttpClient::new(Duration::from_secs(5), None).unwrap();
        let coordinator = CaptchaCoordinator::new(
            &CaptchaSettings::default(),
            http,
            Arc::new(ManualChannel::new(None)),
        );
        let c = CaptchaChallenge::new(CaptchaKind::Widget, "https://x", "key");
        assert_eq!(coordinator.auto_solve(&c).await, None);
        assert_eq!(coordinator.counts(), (0, 0));
        // Falling through to a human is the orchestrator's job.
        assert_eq!(coordinator.channel().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_handle_answers_published_challenge() {
        let http = HttpClient::new(Duration::from_secs(5), None).unwrap();
        let coordinator = CaptchaCoordinator::new(
            &CaptchaSettings::default(),
            http,
            Arc::new(ManualChannel::new(None)),
        );
        let c = CaptchaChallenge::new(CaptchaKind::Image, "https://x", "aGk=");
        let answer = coordinator.channel().publish(&c);
        coordinator.handle().submit_solution(c.id, "x7k2").unwrap();
        assert_eq!(answer.await.unwrap(), "x7k2");
    }
}
