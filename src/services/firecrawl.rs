//! FireCrawl search and scrape client.
//!
//! Implements both [`SearchService`] (`POST /v1/search`) and
//! [`ExtractionService`] (`POST /v1/scrape`, markdown format).
//!
//! Transient failures (timeouts, connection errors, 429, 5xx) are retried
//! with exponential backoff inside a single call.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{ExtractionService, Finding, SearchHit, SearchService};
use crate::error::ServiceError;

/// Default public API endpoint
pub const DEFAULT_BASE_URL: &str = "https://api.firecrawl.dev";

/// Default timeout for FireCrawl requests
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum retry attempts for transient failures
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (milliseconds)
const RETRY_BASE_DELAY_MS: u64 = 1000;

/// Typed errors for the FireCrawl API
#[derive(Debug, thiserror::Error)]
pub enum FirecrawlError {
    #[error("Request timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unauthorized - check API key")]
    Unauthorized,

    #[error("Rate limited - too many requests")]
    RateLimited,

    #[error("Server error ({0}): {1}")]
    ServerError(u16, String),

    #[error("HTTP error ({0}): {1}")]
    HttpError(u16, String),

    #[error("FireCrawl reported failure: {0}")]
    Unsuccessful(String),

    #[error("Failed to parse response: {0}")]
    ParseError(String),
}

impl FirecrawlError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            FirecrawlError::Timeout
                | FirecrawlError::Connection(_)
                | FirecrawlError::RateLimited
                | FirecrawlError::ServerError(_, _)
        )
    }
}

impl From<FirecrawlError> for ServiceError {
    fn from(e: FirecrawlError) -> Self {
        match e {
            FirecrawlError::Timeout => ServiceError::Timeout,
            FirecrawlError::Unauthorized => ServiceError::Unauthorized,
            FirecrawlError::RateLimited => ServiceError::RateLimited,
            FirecrawlError::Connection(msg) | FirecrawlError::Network(msg) => {
                ServiceError::Http(msg)
            }
            FirecrawlError::ServerError(status, message)
            | FirecrawlError::HttpError(status, message) => ServiceError::Api { status, message },
            FirecrawlError::Unsuccessful(msg) => ServiceError::Provider(msg),
            FirecrawlError::ParseError(msg) => ServiceError::Parse(msg),
        }
    }
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    limit: usize,
}

#[derive(Debug, Serialize)]
struct ScrapeRequest<'a> {
    url: &'a str,
    formats: [&'static str; 1],
}

/// The `{success, data, error}` envelope every endpoint answers with.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T> Envelope<T> {
    fn into_result(self) -> Result<T, FirecrawlError> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            (_, _) => Err(FirecrawlError::Unsuccessful(
                self.error.unwrap_or_else(|| "no data returned".to_string()),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawHit {
    url: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

impl From<RawHit> for SearchHit {
    fn from(raw: RawHit) -> Self {
        SearchHit {
            url: raw.url,
            title: raw.title.unwrap_or_default(),
            description: raw.description.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ScrapeData {
    markdown: Option<String>,
}

/// FireCrawl API client.
#[derive(Debug, Clone)]
pub struct FirecrawlClient {
    api_key: String,
    base_url: String,
    client: Client,
    max_results: usize,
    timeout: Duration,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl FirecrawlClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            client: Client::new(),
            max_results: 5,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: MAX_RETRIES,
            retry_base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    async fn post_with_retry<B, T>(&self, path: &str, body: &B) -> Result<T, FirecrawlError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut attempt = 0;
        loop {
            match self.post_once(path, body).await {
                Ok(data) => return Ok(data),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.retry_base_delay * 2u32.pow(attempt - 1);
                    warn!(path, attempt, error = %e, "FireCrawl request failed, will retry");
                    debug!(delay_ms = delay.as_millis() as u64, "Backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn post_once<B, T>(&self, path: &str, body: &B) -> Result<T, FirecrawlError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FirecrawlError::Timeout
                } else if e.is_connect() {
                    FirecrawlError::Connection(e.to_string())
                } else {
                    FirecrawlError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            let envelope: Envelope<T> = response
                .json()
                .await
                .map_err(|e| FirecrawlError::ParseError(e.to_string()))?;
            return envelope.into_result();
        }

        let error_text = response.text().await.unwrap_or_default();
        match status.as_u16() {
            401 | 403 => Err(FirecrawlError::Unauthorized),
            429 => Err(FirecrawlError::RateLimited),
            500..=599 => Err(FirecrawlError::ServerError(status.as_u16(), error_text)),
            code => Err(FirecrawlError::HttpError(code, error_text)),
        }
    }
}

#[async_trait]
impl SearchService for FirecrawlClient {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, ServiceError> {
        debug!(query, "FireCrawl search");
        let request = SearchRequest {
            query,
            limit: self.max_results,
        };
        let hits: Vec<RawHit> = self.post_with_retry("/v1/search", &request).await?;
        Ok(hits.into_iter().map(SearchHit::from).collect())
    }
}

#[async_trait]
impl ExtractionService for FirecrawlClient {
    async fn extract(&self, url: &str) -> Result<Finding, ServiceError> {
        debug!(url, "FireCrawl scrape");
        let request = ScrapeRequest {
            url,
            formats: ["markdown"],
        };
        let data: ScrapeData = self.post_with_retry("/v1/scrape", &request).await?;
        match data.markdown {
            Some(markdown) if !markdown.trim().is_empty() => Ok(Finding::new(markdown, url)),
            _ => Err(ServiceError::Provider(format!("no markdown returned for {url}"))),
        }
    }
}
