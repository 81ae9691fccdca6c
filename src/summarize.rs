//! # Page Summaries
//!
//! Scrape one article and summarize it. Extractors are tried in order, so a
//! FireCrawl scrape can fall back to a direct fetch when it fails or comes
//! back nearly empty.

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::SummarizeError;
use crate::services::{ChatMessage, CompletionRequest, ExtractionService, TextCompletionService};

/// Extracted text shorter than this is treated as a failed scrape.
pub const MIN_CONTENT_CHARS: usize = 100;

/// Target summary length in words.
pub const DEFAULT_SUMMARY_WORDS: usize = 400;

/// Completion budget for one summary.
pub const SUMMARY_MAX_TOKENS: u32 = 500;

/// Pages that usually scrape well, offered when a URL could not be read.
pub const SUGGESTED_URL: &str = "https://www.medicalnewstoday.com/articles/latest";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub summary: String,
    pub original_content: String,
    pub source: String,
}

#[derive(Clone)]
pub struct Summarizer {
    extractors: Vec<Arc<dyn ExtractionService>>,
    completion: Arc<dyn TextCompletionService>,
    words: usize,
}

impl Summarizer {
    /// `extractors` are tried in order until one returns enough text.
    pub fn new(extractors: Vec<Arc<dyn ExtractionService>>, completion: Arc<dyn TextCompletionService>) -> Self {
        Self {
            extractors,
            completion,
            words: DEFAULT_SUMMARY_WORDS,
        }
    }

    pub fn with_words(mut self, words: usize) -> Self {
        self.words = words;
        self
    }

    pub async fn summarize(&self, url: &str) -> Result<Summary, SummarizeError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(SummarizeError::MissingUrl);
        }
        let url = normalize_url(url);

        let content = self.scrape(&url).await?;

        info!(url = %url, chars = content.len(), provider = self.completion.name(), "Summarizing page");
        let request = CompletionRequest::with_messages(vec![
            ChatMessage::system(summary_prompt(self.words)),
            ChatMessage::user(content.as_str()),
        ])
        .with_max_tokens(SUMMARY_MAX_TOKENS);
        let summary = self
            .completion
            .complete(&request)
            .await
            .map_err(SummarizeError::Completion)?;

        let summary = summary.trim().to_string();
        if summary.is_empty() {
            return Err(SummarizeError::EmptySummary);
        }

        Ok(Summary {
            summary,
            original_content: content,
            source: url,
        })
    }

    async fn scrape(&self, url: &str) -> Result<String, SummarizeError> {
        let mut reason = "no extractor configured".to_string();
        for extractor in &self.extractors {
            match extractor.extract(url).await {
                Ok(finding) if finding.text.trim().chars().count() >= MIN_CONTENT_CHARS => {
                    return Ok(finding.text);
                }
                Ok(finding) => {
                    warn!(url, chars = finding.text.trim().len(), "Too little content, trying next extractor");
                    reason = "not enough readable content".to_string();
                }
                Err(e) => {
                    warn!(url, error = %e, "Extraction failed, trying next extractor");
                    reason = e.to_string();
                }
            }
        }
        Err(SummarizeError::Extraction {
            url: url.to_string(),
            reason,
        })
    }
}

/// Add `https://` when the URL has no scheme.
pub fn normalize_url(url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{url}")
    }
}

fn summary_prompt(words: usize) -> String {
    format!(
        "You are a news summarizer. Create a concise summary of the following news article. \
         Focus on key findings, their implications and why they matter. \
         The summary should be clear, informative, and approximately {words} words."
    )
}
