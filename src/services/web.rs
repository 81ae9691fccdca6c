//! Plain HTTP page extractor.
//!
//! Key-less fallback [`ExtractionService`]: fetches the page directly and
//! converts HTML to plain text with `html2text`.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use super::{ExtractionService, Finding};
use crate::error::{status_error, ServiceError};

/// Column width used when rendering HTML to text.
const TEXT_WIDTH: usize = 120;

#[derive(Debug, Clone)]
pub struct WebPageExtractor {
    client: Client,
}

impl WebPageExtractor {
    pub fn new() -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("deep-research-agent/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ExtractionService for WebPageExtractor {
    async fn extract(&self, url: &str) -> Result<Finding, ServiceError> {
        debug!(url, "Fetching page");
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        let body = response.bytes().await?;

        let text = if content_type.contains("html") {
            html2text::from_read(&body[..], TEXT_WIDTH)
                .map_err(|e| ServiceError::Parse(e.to_string()))?
        } else if content_type.is_empty() || content_type.starts_with("text/") {
            String::from_utf8_lossy(&body).into_owned()
        } else {
            return Err(ServiceError::Provider(format!(
                "unsupported content type '{content_type}' at {url}"
            )));
        };

        if text.trim().is_empty() {
            return Err(ServiceError::Provider(format!("no readable text at {url}")));
        }
        Ok(Finding::new(text, url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_html_is_converted_to_text() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/article"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(
                    "<html><body><h1>Statins</h1><p>Muscle aches are reported.</p></body></html>",
                    "text/html; charset=utf-8",
                ),
            )
            .mount(&server)
            .await;

        let url = format!("{}/article", server.uri());
        let finding = WebPageExtractor::new().unwrap().extract(&url).await.unwrap();
        assert_eq!(finding.source, url);
        assert!(finding.text.contains("Muscle aches are reported."));
        assert!(!finding.text.contains("<p>"));
    }

    #[tokio::test]
    async fn test_binary_content_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(vec![0x25, 0x50, 0x44, 0x46], "application/pdf"),
            )
            .mount(&server)
            .await;

        let err = WebPageExtractor::new().unwrap().extract(&server.uri()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Provider(_)));
    }

    #[tokio::test]
    async fn test_not_found_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = WebPageExtractor::new().unwrap().extract(&server.uri()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Api { status: 404, .. }));
    }
}
