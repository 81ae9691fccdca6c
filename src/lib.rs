//! # Deep Research Agent
//!
//! A bounded, iterative research loop over web search, page extraction and
//! an LLM, with progress streamed to the caller as it runs.
//!
//! ```text
//! topic ─▶ search ─▶ extract ─▶ analyze ─┐
//!            ▲                           │ gaps remain, time left
//!            └───────────────────────────┘
//!                                        │ done
//!                                        ▼
//!                                    synthesis ─▶ report
//! ```
//!
//! ## Modules
//!
//! - [`research`]: the orchestrator, its state and progress events
//! - [`chat`]: a streaming chat reply bridge
//! - [`tools`]: search, extract, scrape and deep-research tools for chat
//! - [`summarize`]: one-page scrape and summary
//! - [`services`]: search, extraction and completion traits plus adapters
//! - [`config`]: environment-driven configuration
//! - [`server`]: axum routes that stream events as SSE
//! - [`error`]: typed errors
//!
//! ## Example
//!
//! ```rust,ignore
//! use deep_research_agent::config::Config;
//! use deep_research_agent::research::NullSink;
//!
//! let config = Config::from_env()?;
//! config.validate()?;
//! let outcome = config.orchestrator()?.run("statin side effects", &NullSink).await;
//! println!("{}", outcome.report().unwrap_or_default());
//! ```

pub mod chat;
pub mod config;
pub mod error;
pub mod research;
pub mod server;
pub mod services;
pub mod summarize;
pub mod tools;

pub use chat::ChatBridge;
pub use config::Config;
pub use error::{AnalysisError, ResearchError, ServiceError, SummarizeError};
pub use research::{ProgressEvent, ProgressSink, ResearchOptions, ResearchOrchestrator, ResearchOutcome};
pub use summarize::Summarizer;
pub use tools::ChatTools;
