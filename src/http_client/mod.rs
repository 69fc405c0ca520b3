//! Shared HTTP client with rotating user agents and per-domain backoff.

mod response;
mod user_agent;

pub use response::{mime_essence, HttpResponse};
pub use user_agent::{
    random_user_agent, resolve_user_agent, DESKTOP_CHROME_UA, IMPERSONATE_USER_AGENTS,
    MOBILE_SAFARI_UA, USER_AGENT,
};

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::ScrapeError;
use crate::rate_limiter::RateLimiter;

/// Extra request headers as (name, value) pairs.
pub type HeaderList = [(&'static str, String)];

/// HTTP client used by the archive strategies and the extractor fast path.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    timeout: Duration,
    rate_limiter: RateLimiter,
}

impl HttpClient {
    pub fn new(timeout: Duration, proxy: Option<&str>) -> Result<Self, ScrapeError> {
        Self::with_rate_limiter(timeout, proxy, RateLimiter::new())
    }

    pub fn with_rate_limiter(
        timeout: Duration,
        proxy: Option<&str>,
        rate_limiter: RateLimiter,
    ) -> Result<Self, ScrapeError> {
        let mut builder = Client::builder()
            .user_agent(resolve_user_agent(None))
            .timeout(timeout)
            .cookie_store(true)
            .gzip(true)
            .brotli(true);
        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }

        Ok(Self {
            client: builder.build()?,
            timeout,
            rate_limiter,
        })
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// GET with extra headers and an optional per-request timeout.
    ///
    /// A random browser user agent is sent unless `headers` carries one.
    pub async fn get_with(
        &self,
        url: &str,
        headers: &HeaderList,
        timeout: Option<Duration>,
    ) -> Result<HttpResponse, ScrapeError> {
        let domain = self.rate_limiter.acquire(url).await;

        let mut request = self.client.get(url);
        if !headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("user-agent"))
        {
            request = request.header("User-Agent", random_user_agent());
        }
        for (name, value) in headers {
            request = request.header(*name, value.as_str());
        }
        if let Some(t) = timeout {
            request = request.timeout(t);
        }

        let response = HttpResponse::new(request.send().await?);
        debug!("GET {} -> {}", url, response.status);

        if let Some(ref domain) = domain {
            let has_retry_after = response.headers.contains_key("retry-after");
            self.rate_limiter
                .report_status(domain, url, response.status.as_u16(), has_retry_after)
                .await;
        }

        Ok(response)
    }

    pub async fn get(&self, url: &str) -> Result<HttpResponse, ScrapeError> {
        self.get_with(url, &[], None).await
    }

    /// GET and return the body, failing on non-2xx.
    pub async fn get_text(&self, url: &str) -> Result<String, ScrapeError> {
        let response = self.get(url).await?;
        if !response.is_success() {
            return Err(status_error(url, response.status));
        }
        Ok(response.text().await?)
    }

    pub async fn get_bytes(
        &self,
        url: &str,
        headers: &HeaderList,
    ) -> Result<(Option<String>, Vec<u8>), ScrapeError> {
        let response = self.get_with(url, headers, None).await?;
        if !response.is_success() {
            return Err(status_error(url, response.status));
        }
        let content_type = response.content_type();
        Ok((content_type, response.bytes().await?))
    }

    /// GET `url` with query parameters and decode a JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<T, ScrapeError> {
        let full = reqwest::Url::parse_with_params(url, params)
            .map_err(|e| ScrapeError::Parse(format!("bad url {}: {}", url, e)))?;
        let text = self.get_text(full.as_str()).await?;
        serde_json::from_str(&text)
            .map_err(|e| ScrapeError::Parse(format!("invalid JSON from {}: {}", url, e)))
    }

    /// POST a form and return the body text.
    pub async fn post_form(
        &self,
        url: &str,
        form: &[(&str, String)],
    ) -> Result<String, ScrapeError> {
        let response = self.client.post(url).form(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(url, status));
        }
        Ok(response.text().await?)
    }
}

fn status_error(url: &str, status: reqwest::StatusCode) -> ScrapeError {
    match status.as_u16() {
        429 | 503 => ScrapeError::Unavailable(format!("{} answered {}", url, status)),
        _ => ScrapeError::Parse(format!("{} answered {}", url, status)),
    }
}
