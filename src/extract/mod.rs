//! URL to plain text.
//!
//! [`ContentExtractor`] picks one of four paths per URL:
//!
//! 1. document URLs (by extension) are downloaded and decoded;
//! 2. hosts with a registered [`DomainOverride`] get their headers on every request;
//! 3. web-archive URLs use HTTP only, retried with backoff;
//! 4. everything else tries plain HTTP, then a rendered browser page.
//!
//! Results are cached per run and every navigation is paced.

mod cache;
mod documents;
mod html;
mod overrides;

pub use cache::PageCache;
pub use documents::{decode, DocumentFormat};
pub use html::{collapse_whitespace, html_to_text, BROWSER_EXTRACT_SCRIPT};
pub use overrides::{lookup as lookup_override, DomainOverride, DOMAIN_OVERRIDES};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use url::Url;

use crate::browser::BrowserPool;
use crate::error::ScrapeError;
use crate::http_client::{mime_essence, HttpClient, DESKTOP_CHROME_UA};
use crate::rate_limiter::NavigationPacer;

const ARCHIVE_HOSTS: &[&str] = &["web.archive.org", "archive.org"];
const MAX_ATTEMPTS: u32 = 3;
const BODY_WAIT: Duration = Duration::from_secs(15);

/// Anything that can turn a URL into text.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// `Ok("")` means every path ran and found nothing.
    async fn extract(&self, url: &str) -> Result<String, ScrapeError>;
}

/// Which extraction path a URL takes.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractPath {
    Document(DocumentFormat),
    Archive,
    Generic,
}

/// A URL resolved to its path, with archive URLs upgraded to https.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractPlan {
    pub url: String,
    pub path: ExtractPath,
    pub domain_override: Option<&'static DomainOverride>,
}

impl ExtractPlan {
    pub fn for_url(raw: &str) -> Result<Self, ScrapeError> {
        let mut url =
            Url::parse(raw).map_err(|e| ScrapeError::Parse(format!("bad url {}: {}", raw, e)))?;
        let host = url.host_str().unwrap_or_default().to_lowercase();
        let is_archive = ARCHIVE_HOSTS.contains(&host.as_str());

        if is_archive && url.scheme() == "http" {
            // http -> https is always a valid scheme change
            let _ = url.set_scheme("https");
        }

        let path = match DocumentFormat::from_path(url.path()) {
            Some(format) => ExtractPath::Document(format),
            None if is_archive => ExtractPath::Archive,
            None => ExtractPath::Generic,
        };

        Ok(Self {
            url: url.to_string(),
            path,
            domain_override: overrides::lookup(&host),
        })
    }

    fn headers(&self) -> Vec<(&'static str, String)> {
        self.domain_override
            .map(DomainOverride::headers)
            .unwrap_or_default()
    }

    fn timeout(&self) -> Option<Duration> {
        self.domain_override.and_then(|o| o.timeout)
    }
}

/// Run-scoped multi-path extractor.
pub struct ContentExtractor {
    http: HttpClient,
    pool: Option<Arc<BrowserPool>>,
    cache: PageCache,
    pacer: NavigationPacer,
    heavy: Semaphore,
    retry_base: Duration,
}

impl ContentExtractor {
    pub fn new(
        http: HttpClient,
        pool: Option<Arc<BrowserPool>>,
        heavy_limit: usize,
        cache_capacity: usize,
    ) -> Self {
        Self {
            http,
            pool,
            cache: PageCache::new(cache_capacity),
            pacer: NavigationPacer::new(),
            heavy: Semaphore::new(heavy_limit.max(1)),
            retry_base: Duration::from_secs(1),
        }
    }

    pub fn cache(&self) -> &PageCache {
        &self.cache
    }

    async fn extract_uncached(&self, plan: &ExtractPlan) -> Result<String, ScrapeError> {
        match &plan.path {
            ExtractPath::Document(format) => {
                let format = *format;
                self.with_retries(&plan.url, || self.fetch_document(plan, format))
                    .await
            }
            ExtractPath::Archive => {
                self.with_retries(&plan.url, || self.fetch_http(plan)).await
            }
            ExtractPath::Generic => {
                let fast = self.fetch_http(plan).await;
                match &fast {
                    Ok(text) if !text.is_empty() => return fast,
                    Ok(_) => debug!("HTTP fast path empty for {}", plan.url),
                    Err(e) => debug!("HTTP fast path failed for {}: {}", plan.url, e),
                }
                match &self.pool {
                    Some(pool) => match self.render(pool, plan).await {
                        Ok(text) => Ok(text),
                        Err(e) if fast.is_ok() => {
                            warn!("Browser extraction failed for {}: {}", plan.url, e);
                            Ok(String::new())
                        }
                        Err(e) => Err(e),
                    },
                    None => fast,
                }
            }
        }
    }

    /// Retry empty or transient results with exponential backoff. A transient
    /// failure on the last attempt counts as "nothing found".
    async fn with_retries<F, Fut>(&self, url: &str, mut attempt: F) -> Result<String, ScrapeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<String, ScrapeError>>,
    {
        for n in 0..MAX_ATTEMPTS {
            match attempt().await {
                Ok(text) if !text.is_empty() => return Ok(text),
                Ok(_) => debug!("Attempt {} for {} returned no text", n + 1, url),
                Err(e) if e.is_transient() => {
                    debug!("Attempt {} for {} failed: {}", n + 1, url, e)
                }
                Err(e) => return Err(e),
            }
            if n + 1 < MAX_ATTEMPTS {
                tokio::time::sleep(self.retry_base * 2u32.pow(n)).await;
            }
        }
        warn!("No content from {} after {} attempts", url, MAX_ATTEMPTS);
        Ok(String::new())
    }

    /// Lightweight GET, HTML stripped to text and documents decoded.
    async fn fetch_http(&self, plan: &ExtractPlan) -> Result<String, ScrapeError> {
        let response = self
            .http
            .get_with(&plan.url, &plan.headers(), plan.timeout())
            .await?;
        if !response.is_success() {
            debug!("{} answered {}", plan.url, response.status);
            return match response.status.as_u16() {
                429 | 503 => Err(ScrapeError::Unavailable(format!(
                    "{} answered {}",
                    plan.url, response.status
                ))),
                _ => Ok(String::new()),
            };
        }

        let content_type = response.content_type().unwrap_or_default();
        match content_type.as_str() {
            "" | "text/html" | "application/xhtml+xml" => {
                Ok(html_to_text(&response.text().await?))
            }
            ct if is_document_type(ct) => {
                let bytes = response.bytes().await?;
                let hint = DocumentFormat::from_mime(ct);
                self.decode(&plan.url, hint, Some(ct), bytes).await
            }
            other => {
                debug!("Skipping {} body from {}", other, plan.url);
                Ok(String::new())
            }
        }
    }

    /// Download and decode a document, falling back to a raw download.
    async fn fetch_document(
        &self,
        plan: &ExtractPlan,
        format: DocumentFormat,
    ) -> Result<String, ScrapeError> {
        let _permit = self
            .heavy
            .acquire()
            .await
            .map_err(|_| ScrapeError::Unavailable("extractor shut down".into()))?;

        let primary = match self.http.get_bytes(&plan.url, &plan.headers()).await {
            Ok((content_type, bytes)) => {
                self.decode(&plan.url, Some(format), content_type.as_deref(), bytes)
                    .await
            }
            Err(e) => Err(e),
        };
        match primary {
            Ok(text) if !text.is_empty() => return Ok(text),
            Ok(_) => debug!("Primary decode of {} produced no text", plan.url),
            Err(e) => debug!("Primary download of {} failed: {}", plan.url, e),
        }

        info!("Trying raw download for {}", plan.url);
        let raw_headers = [
            ("User-Agent", DESKTOP_CHROME_UA.to_string()),
            ("Accept", "*/*".to_string()),
        ];
        let response = self
            .http
            .get_with(&plan.url, &raw_headers, plan.timeout())
            .await?;
        if !response.is_success() {
            return Ok(String::new());
        }
        let content_type = response.content_type();
        let bytes = response.bytes().await?;
        self.decode(&plan.url, Some(format), content_type.as_deref(), bytes)
            .await
    }

    async fn decode(
        &self,
        url: &str,
        hint: Option<DocumentFormat>,
        content_type: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<String, ScrapeError> {
        let declared = content_type.map(mime_essence);
        let Some(format) = DocumentFormat::resolve(hint, declared.as_deref(), &bytes) else {
            debug!("Unrecognized document format at {}", url);
            return Ok(String::new());
        };
        match documents::decode_blocking(bytes, format).await {
            Ok(text) => Ok(collapse_whitespace(&text)),
            Err(e) => {
                warn!("Decoding {:?} from {} failed: {}", format, url, e);
                Ok(String::new())
            }
        }
    }

    /// Render in a pooled browser page and run the in-page extraction script.
    async fn render(
        &self,
        pool: &Arc<BrowserPool>,
        plan: &ExtractPlan,
    ) -> Result<String, ScrapeError> {
        let _permit = self
            .heavy
            .acquire()
            .await
            .map_err(|_| ScrapeError::Unavailable("extractor shut down".into()))?;

        // Dropped with the page still inside when the unit times out.
        let page = pool.lease().await?;
        let result: Result<String, ScrapeError> = async {
            page.goto(&plan.url).await?;
            if !page.wait_for_selector("body", BODY_WAIT).await {
                debug!("No body on {} yet, extracting partial content", plan.url);
            }
            match page.eval_string(BROWSER_EXTRACT_SCRIPT).await {
                Ok(text) => Ok(collapse_whitespace(&text)),
                Err(e) => {
                    debug!("Extraction script failed on {}: {}", plan.url, e);
                    Ok(html_to_text(&page.html().await?))
                }
            }
        }
        .await;
        page.release().await;
        result
    }
}

fn is_document_type(content_type: &str) -> bool {
    content_type.contains("pdf")
        || content_type.contains("msword")
        || content_type.contains("officedocument")
        || content_type == "text/plain"
}

#[async_trait]
impl ContentSource for ContentExtractor {
    async fn extract(&self, url: &str) -> Result<String, ScrapeError> {
        if let Some(text) = self.cache.get(url) {
            debug!("Cache hit for {}", url);
            return Ok(text);
        }

        let plan = ExtractPlan::for_url(url)?;
        self.pacer.pace().await;

        let text = self.extract_uncached(&plan).await?;
        if text.is_empty() {
            info!("No content extracted from {}", url);
        } else {
            debug!("Extracted {} chars from {}", text.len(), url);
            self.cache.insert(url, &text);
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_plan_document_by_extension() {
        let plan = ExtractPlan::for_url("https://www.usda.gov/files/cotton.pdf").unwrap();
        assert_eq!(plan.path, ExtractPath::Document(DocumentFormat::Pdf));
        assert!(plan.domain_override.is_none());
    }

    #[test]
    fn test_plan_archive_upgrades_scheme() {
        let plan =
            ExtractPlan::for_url("http://web.archive.org/web/2020/https://www.usda.gov/").unwrap();
        assert_eq!(plan.path, ExtractPath::Archive);
        assert!(plan.url.starts_with("https://web.archive.org/"));
    }

    #[test]
    fn test_plan_archive_document_stays_document() {
        let plan = ExtractPlan::for_url("http://web.archive.org/web/2020/https://x.gov/a.docx")
            .unwrap();
        assert_eq!(plan.path, ExtractPath::Document(DocumentFormat::Docx));
        assert!(plan.url.starts_with("https://"));
    }

    #[test]
    fn test_plan_override_carries_headers() {
        let plan = ExtractPlan::for_url("https://info.fldoe.org/docushare/report").unwrap();
        assert_eq!(plan.path, ExtractPath::Generic);
        assert_eq!(plan.timeout(), Some(Duration::from_secs(120)));
        assert!(plan.headers().iter().any(|(k, _)| *k == "Cache-Control"));
    }

    #[test]
    fn test_plan_rejects_garbage() {
        assert!(matches!(
            ExtractPlan::for_url("not a url"),
            Err(ScrapeError::Parse(_))
        ));
    }

    #[test]
    fn test_document_types() {
        assert!(is_document_type("application/pdf"));
        assert!(is_document_type("application/msword"));
        assert!(is_document_type("text/plain"));
        assert!(!is_document_type("image/png"));
    }

    #[tokio::test]
    async fn test_cached_text_short_circuits() {
        let http = HttpClient::new(Duration::from_secs(1), None).unwrap();
        let extractor = ContentExtractor::new(http, None, 3, 10);
        extractor
            .cache()
            .insert("https://unreachable.invalid/page", "cached cotton text");
        let text = extractor
            .extract("https://unreachable.invalid/page")
            .await
            .unwrap();
        assert_eq!(text, "cached cotton text");
    }

    fn extractor() -> ContentExtractor {
        let http = HttpClient::new(Duration::from_secs(5), None).unwrap();
        ContentExtractor::new(http, None, 3, 10)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_failures_with_backoff() {
        let extractor = extractor();
        let calls = AtomicUsize::new(0);
        let started = tokio::time::Instant::now();

        let text = extractor
            .with_retries("https://x.gov/a", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    match n {
                        0 => Err(ScrapeError::Timeout("slow".into())),
                        1 => Err(ScrapeError::Unavailable("503".into())),
                        _ => Ok("cotton yields".to_string()),
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(text, "cotton yields");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s after the first attempt, 2s after the second.
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let extractor = extractor();
        let calls = AtomicUsize::new(0);

        let result = extractor
            .with_retries("https://x.gov/a", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<String, _>(ScrapeError::Parse("bad bytes".into())) }
            })
            .await;

        assert!(matches!(result, Err(ScrapeError::Parse(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_results_exhaust_attempts() {
        let extractor = extractor();
        let calls = AtomicUsize::new(0);
        let started = tokio::time::Instant::now();

        let text = extractor
            .with_retries("https://x.gov/a", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, ScrapeError>(String::new()) }
            })
            .await
            .unwrap();

        assert_eq!(text, "");
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS as usize);
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    mod raw_download {
        use super::*;
        use axum::extract::State;
        use axum::http::{header, HeaderMap};
        use axum::routing::get;
        use axum::Router;
        use std::sync::Mutex;

        type SeenAgents = Arc<Mutex<Vec<String>>>;

        /// Empty body on the first request, text afterwards.
        async fn report(
            State(seen): State<SeenAgents>,
            headers: HeaderMap,
        ) -> ([(header::HeaderName, &'static str); 1], &'static str) {
            let agent = headers
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let mut seen = seen.lock().unwrap();
            seen.push(agent);
            let body = if seen.len() == 1 { "" } else { "cotton yields" };
            ([(header::CONTENT_TYPE, "text/plain")], body)
        }

        async fn serve() -> (String, SeenAgents) {
            let seen = SeenAgents::default();
            let app = Router::new()
                .route("/report.txt", get(report))
                .with_state(seen.clone());
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });
            (format!("http://{}", addr), seen)
        }

        #[tokio::test]
        async fn test_empty_document_falls_back_to_raw_download() {
            let (base, seen) = serve().await;
            let plan = ExtractPlan::for_url(&format!("{}/report.txt", base)).unwrap();
            assert_eq!(plan.path, ExtractPath::Document(DocumentFormat::PlainText));

            let text = extractor()
                .fetch_document(&plan, DocumentFormat::PlainText)
                .await
                .unwrap();

            assert_eq!(text, "cotton yields");
            let seen = seen.lock().unwrap();
            assert_eq!(seen.len(), 2);
            assert_eq!(seen[1], DESKTOP_CHROME_UA);
        }

        #[tokio::test]
        async fn test_missing_document_yields_nothing() {
            let (base, seen) = serve().await;
            let plan = ExtractPlan::for_url(&format!("{}/missing.txt", base)).unwrap();

            let text = extractor()
                .fetch_document(&plan, DocumentFormat::PlainText)
                .await
                .unwrap();

            assert_eq!(text, "");
            assert!(seen.lock().unwrap().is_empty());
        }
    }
}
