//! # Error Types
//!
//! Library errors are typed with `thiserror`. The binary and the config
//! loader use `anyhow` on top of these.

use thiserror::Error;

/// Error returned by any external service (search, extraction, completion).
///
/// Adapters translate their vendor-specific failures into one of these
/// variants so the orchestrator can treat every phase failure the same way.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Rate limited by provider")]
    RateLimited,

    #[error("Unauthorized - check API key")]
    Unauthorized,

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Provider reported failure: {0}")]
    Provider(String),

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ServiceError::Timeout
        } else if e.is_decode() {
            ServiceError::Parse(e.to_string())
        } else {
            ServiceError::Http(e.to_string())
        }
    }
}

/// Map a non-success HTTP status to a [`ServiceError`].
pub(crate) fn status_error(status: reqwest::StatusCode, body: String) -> ServiceError {
    match status.as_u16() {
        401 | 403 => ServiceError::Unauthorized,
        429 => ServiceError::RateLimited,
        code => ServiceError::Api {
            status: code,
            message: body,
        },
    }
}

/// Failure to turn a completion reply into a structured analysis.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("no JSON object found in model output")]
    MissingJson,

    #[error("invalid analysis JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Errors that abort a research run.
///
/// Phase failures never show up here; they are absorbed by the circuit
/// breaker. Only these end a run as `success: false`.
#[derive(Error, Debug)]
pub enum ResearchError {
    #[error("research cancelled")]
    Cancelled,

    #[error("final synthesis failed: {0}")]
    Synthesis(#[source] ServiceError),
}

/// Errors of a single-page summary.
#[derive(Error, Debug)]
pub enum SummarizeError {
    #[error("URL is required")]
    MissingUrl,

    /// Every extractor failed or returned too little text.
    #[error("Failed to extract content from {url}: {reason}")]
    Extraction { url: String, reason: String },

    #[error("Failed to summarize content: {0}")]
    Completion(#[source] ServiceError),

    #[error("The model returned an empty summary")]
    EmptySummary,
}
