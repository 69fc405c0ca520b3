//! HTTP response wrapper.

use std::collections::HashMap;

use reqwest::{Response, StatusCode};

pub struct HttpResponse {
    pub status: StatusCode,
    pub final_url: String,
    /// Header names are lowercase.
    pub headers: HashMap<String, String>,
    pub(crate) response: Response,
}

impl HttpResponse {
    pub(crate) fn new(response: Response) -> Self {
        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.to_string(), v.to_string());
            }
        }
        Self {
            status: response.status(),
            final_url: response.url().to_string(),
            headers,
            response,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Content-Type without parameters, lowercased.
    pub fn content_type(&self) -> Option<String> {
        self.headers
            .get("content-type")
            .map(|s| mime_essence(s))
    }

    pub async fn bytes(self) -> Result<Vec<u8>, reqwest::Error> {
        self.response.bytes().await.map(|b| b.to_vec())
    }

    pub async fn text(self) -> Result<String, reqwest::Error> {
        self.response.text().await
    }
}

/// "text/html; charset=utf-8" => "text/html"
pub fn mime_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase()
}
