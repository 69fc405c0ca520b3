//! 2Captcha HTTP API client.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::CaptchaSettings;
use crate::error::CaptchaError;
use crate::http_client::HttpClient;

const SUBMIT_URL: &str = "https://2captcha.com/in.php";
const RESULT_URL: &str = "https://2captcha.com/res.php";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PollStatus {
    Ready(String),
    NotReady,
}

/// Paid solving backend. Only built when an API key is configured.
pub struct TwoCaptchaSolver {
    http: HttpClient,
    api_key: String,
    initial_wait: Duration,
    poll_interval: Duration,
    max_polls: u32,
}

impl TwoCaptchaSolver {
    pub fn from_settings(settings: &CaptchaSettings, http: HttpClient) -> Option<Self> {
        if !settings.auto_solve_enabled() {
            return None;
        }
        let api_key = settings.api_key.clone()?;
        Some(Self {
            http,
            api_key,
            initial_wait: Duration::from_secs(settings.initial_wait_secs),
            poll_interval: Duration::from_secs(settings.poll_interval_secs),
            max_polls: settings.max_polls,
        })
    }

    pub async fn solve_widget(
        &self,
        page_url: &str,
        site_key: &str,
    ) -> Result<String, CaptchaError> {
        info!("Submitting widget challenge for {} to 2Captcha", page_url);
        let form = [
            ("key", self.api_key.clone()),
            ("method", "userrecaptcha".to_string()),
            ("googlekey", site_key.to_string()),
            ("pageurl", page_url.to_string()),
        ];
        self.submit_and_poll(&form).await
    }

    /// `image_b64` is the base64-encoded image body.
    pub async fn solve_image(&self, image_b64: &str) -> Result<String, CaptchaError> {
        info!("Submitting image challenge to 2Captcha");
        let form = [
            ("key", self.api_key.clone()),
            ("method", "base64".to_string()),
            ("body", image_b64.to_string()),
        ];
        self.submit_and_poll(&form).await
    }

    async fn submit_and_poll(&self, form: &[(&str, String)]) -> Result<String, CaptchaError> {
        let response = self.http.post_form(SUBMIT_URL, form).await?;
        let task_id = parse_submit_response(&response)?;
        debug!("2Captcha task {} accepted", task_id);

        tokio::time::sleep(self.initial_wait).await;

        for attempt in 1..=self.max_polls {
            let url = format!(
                "{}?key={}&action=get&id={}",
                RESULT_URL,
                urlencoding::encode(&self.api_key),
                urlencoding::encode(&task_id)
            );
            let body = self.http.get_text(&url).await?;
            match parse_poll_response(&body)? {
                PollStatus::Ready(solution) => {
                    info!("2Captcha solved task {} after {} polls", task_id, attempt);
                    return Ok(solution);
                }
                PollStatus::NotReady => {
                    debug!("2Captcha task {} not ready (poll {})", task_id, attempt);
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        warn!("2Captcha task {} not solved in time", task_id);
        Err(CaptchaError::PollsExhausted(self.max_polls))
    }
}

/// `OK|<task id>` on success; anything else is an API error code.
pub(crate) fn parse_submit_response(body: &str) -> Result<String, CaptchaError> {
    let body = body.trim();
    match body.strip_prefix("OK|") {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => Err(CaptchaError::Rejected(body.to_string())),
    }
}

pub(crate) fn parse_poll_response(body: &str) -> Result<PollStatus, CaptchaError> {
    let body = body.trim();
    if body == "CAPCHA_NOT_READY" {
        return Ok(PollStatus::NotReady);
    }
    match body.strip_prefix("OK|") {
        Some(solution) if !solution.is_empty() => Ok(PollStatus::Ready(solution.to_string())),
        _ => Err(CaptchaError::Rejected(body.to_string())),
    }
}
