//! # Configuration Module
//!
//! Loads settings from environment variables (and a `.env` file, if present)
//! and turns them into ready-to-use services.
//!
//! Without a `FIRECRAWL_API_KEY` the agent falls back to DuckDuckGo search and
//! plain HTTP page fetching, so it can run with nothing but an LLM.

use anyhow::{Context, Result};
use std::env;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::chat::ChatBridge;
use crate::research::{ResearchOptions, ResearchOrchestrator};
use crate::summarize::Summarizer;
use crate::tools::ChatTools;
use crate::services::{
    firecrawl, ollama, DuckDuckGoSearch, ExtractionService, FirecrawlClient, OllamaCompletion,
    OpenAiCompatibleClient, ProviderPreset, SearchService, TextCompletionService, WebPageExtractor,
};

/// Default model for the local Ollama provider.
const DEFAULT_OLLAMA_MODEL: &str = "llama3.2";

// =============================================================================
// LLM PROVIDER
// =============================================================================

/// Which completion backend to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Groq,
    OpenRouter,
    OpenAi,
    Ollama,
}

impl LlmProvider {
    /// The OpenAI-compatible preset, or `None` for Ollama.
    pub fn preset(&self) -> Option<ProviderPreset> {
        match self {
            LlmProvider::Groq => Some(ProviderPreset::Groq),
            LlmProvider::OpenRouter => Some(ProviderPreset::OpenRouter),
            LlmProvider::OpenAi => Some(ProviderPreset::OpenAi),
            LlmProvider::Ollama => None,
        }
    }

    pub fn default_model(&self) -> &'static str {
        self.preset()
            .map(|p| p.default_model())
            .unwrap_or(DEFAULT_OLLAMA_MODEL)
    }
}

/// # Rust Concept: FromStr
///
/// Implementing `FromStr` lets us call `"groq".parse::<LlmProvider>()`,
/// the same way numbers are parsed from strings.
impl FromStr for LlmProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "groq" => Ok(LlmProvider::Groq),
            "openrouter" => Ok(LlmProvider::OpenRouter),
            "openai" => Ok(LlmProvider::OpenAi),
            "ollama" => Ok(LlmProvider::Ollama),
            other => anyhow::bail!(
                "Unknown LLM_PROVIDER '{}' (expected groq, openrouter, openai or ollama)",
                other
            ),
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.preset() {
            Some(preset) => f.write_str(preset.name()),
            None => f.write_str("ollama"),
        }
    }
}

// =============================================================================
// CONFIGURATION STRUCT
// =============================================================================

/// Main configuration for the research agent.
#[derive(Debug, Clone)]
pub struct Config {
    pub provider: LlmProvider,

    /// Chat model; `None` means the provider's default
    pub model: Option<String>,

    /// Model for analysis and synthesis; `None` means the chat model
    pub reasoning_model: Option<String>,

    /// API key for the hosted provider, read from its `*_API_KEY` variable
    pub api_key: Option<String>,

    /// Overrides the hosted provider's base URL
    pub base_url: Option<String>,

    pub ollama_host: String,

    /// Temperature for LLM responses (0.0 = deterministic, 2.0 = very random)
    pub temperature: f32,

    pub firecrawl_api_key: Option<String>,
    pub firecrawl_base_url: String,

    /// Search hits requested per query
    pub max_search_results: usize,

    /// Defaults for research runs; requests may override depth and budget
    pub research: ResearchOptions,

    pub host: String,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Groq,
            model: None,
            reasoning_model: None,
            api_key: None,
            base_url: None,
            ollama_host: ollama::DEFAULT_HOST.to_string(),
            temperature: 0.5,
            firecrawl_api_key: None,
            firecrawl_base_url: firecrawl::DEFAULT_BASE_URL.to_string(),
            max_search_results: 5,
            research: ResearchOptions::default(),
            host: "127.0.0.1".to_string(),
            port: 3001,
        }
    }
}

// =============================================================================
// CONFIGURATION LOADING
// =============================================================================

impl Config {
    /// Load configuration from the process environment.
    ///
    /// A `.env` file in the working directory is loaded first if it exists.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Rust Concept: Closures as Parameters
    ///
    /// Taking `impl Fn(&str) -> Option<String>` instead of reading the
    /// environment directly lets tests pass a `HashMap` lookup without
    /// touching global process state.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        // Blank values count as unset
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut config = Config::default();

        if let Some(val) = var("LLM_PROVIDER") {
            config.provider = val.parse()?;
        }

        config.model = var("LLM_MODEL");
        config.reasoning_model = var("REASONING_MODEL");
        config.api_key = config.provider.preset().and_then(|p| var(p.api_key_var()));
        config.base_url = var("LLM_BASE_URL");

        if let Some(val) = var("OLLAMA_API_BASE_URL") {
            config.ollama_host = val;
        }

        if let Some(val) = var("TEMPERATURE") {
            config.temperature = val
                .parse()
                .context("TEMPERATURE must be a valid floating-point number (e.g., 0.5)")?;
        }

        config.firecrawl_api_key = var("FIRECRAWL_API_KEY");
        if let Some(val) = var("FIRECRAWL_BASE_URL") {
            config.firecrawl_base_url = val;
        }

        if let Some(val) = var("MAX_SEARCH_RESULTS") {
            config.max_search_results = val
                .parse()
                .context("MAX_SEARCH_RESULTS must be a valid positive integer")?;
        }

        if let Some(val) = var("RESEARCH_MAX_DEPTH") {
            config.research.max_depth = val
                .parse()
                .context("RESEARCH_MAX_DEPTH must be a valid positive integer")?;
        }

        if let Some(val) = var("RESEARCH_TIME_BUDGET_SECS") {
            let secs: u64 = val
                .parse()
                .context("RESEARCH_TIME_BUDGET_SECS must be a whole number of seconds")?;
            config.research.time_budget = Duration::from_secs(secs);
        }

        if let Some(val) = var("RESEARCH_MAX_FAILED_ATTEMPTS") {
            config.research.max_failed_attempts = val
                .parse()
                .context("RESEARCH_MAX_FAILED_ATTEMPTS must be a valid positive integer")?;
        }

        if let Some(val) = var("HOST") {
            config.host = val;
        }

        if let Some(val) = var("PORT") {
            config.port = val.parse().context("PORT must be a valid port number")?;
        }

        Ok(config)
    }

    /// Validate the configuration before any service is built.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.temperature) {
            anyhow::bail!(
                "Temperature must be between 0.0 and 2.0, got: {}",
                self.temperature
            );
        }

        if self.max_search_results == 0 {
            anyhow::bail!("MAX_SEARCH_RESULTS must be at least 1");
        }

        if self.research.max_depth == 0 {
            anyhow::bail!("RESEARCH_MAX_DEPTH must be at least 1");
        }

        if self.research.max_failed_attempts == 0 {
            anyhow::bail!("RESEARCH_MAX_FAILED_ATTEMPTS must be at least 1");
        }

        if self.research.time_budget.is_zero() {
            anyhow::bail!("RESEARCH_TIME_BUDGET_SECS must be greater than 0");
        }

        if self.chat_model().trim().is_empty() || self.reasoning_model().trim().is_empty() {
            anyhow::bail!("Model name cannot be empty");
        }

        if let Some(preset) = self.provider.preset() {
            if self.api_key.is_none() {
                anyhow::bail!(
                    "{} must be set when LLM_PROVIDER is {}",
                    preset.api_key_var(),
                    self.provider
                );
            }
        }

        Ok(())
    }

    pub fn chat_model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }

    pub fn reasoning_model(&self) -> &str {
        self.reasoning_model
            .as_deref()
            .unwrap_or_else(|| self.chat_model())
    }

    /// The address the HTTP server binds to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    // =========================================================================
    // SERVICE CONSTRUCTION
    // =========================================================================

    /// Build a completion service for `model` on the configured provider.
    pub fn completion_service(&self, model: &str) -> Result<Arc<dyn TextCompletionService>> {
        match self.provider.preset() {
            Some(preset) => {
                let api_key = self
                    .api_key
                    .clone()
                    .with_context(|| format!("{} is not set", preset.api_key_var()))?;
                let mut client = OpenAiCompatibleClient::from_preset(preset, api_key, model)
                    .context("Failed to build completion client")?
                    .with_temperature(self.temperature);
                if let Some(base_url) = &self.base_url {
                    client = client.with_base_url(base_url);
                }
                Ok(Arc::new(client))
            }
            None => Ok(Arc::new(
                OllamaCompletion::new(&self.ollama_host, model)
                    .with_temperature(f64::from(self.temperature)),
            )),
        }
    }

    /// FireCrawl for both search and extraction when a key is configured,
    /// otherwise DuckDuckGo plus plain page fetching.
    pub fn search_services(&self) -> Result<(Arc<dyn SearchService>, Arc<dyn ExtractionService>)> {
        match &self.firecrawl_api_key {
            Some(key) => {
                let client = Arc::new(
                    FirecrawlClient::new(key.as_str())
                        .with_base_url(self.firecrawl_base_url.as_str())
                        .with_max_results(self.max_search_results),
                );
                let search: Arc<dyn SearchService> = client.clone();
                let extractor: Arc<dyn ExtractionService> = client;
                Ok((search, extractor))
            }
            None => {
                let search: Arc<dyn SearchService> = Arc::new(
                    DuckDuckGoSearch::new(self.max_search_results)
                        .context("Failed to build DuckDuckGo search client")?,
                );
                let extractor: Arc<dyn ExtractionService> =
                    Arc::new(WebPageExtractor::new().context("Failed to build page extractor")?);
                Ok((search, extractor))
            }
        }
    }

    /// An orchestrator wired to the configured services and research defaults.
    pub fn orchestrator(&self) -> Result<ResearchOrchestrator> {
        let (search, extractor) = self.search_services()?;
        let completion = self.completion_service(self.reasoning_model())?;
        Ok(ResearchOrchestrator::new(search, extractor, completion).with_options(self.research.clone()))
    }

    pub fn chat_bridge(&self) -> Result<ChatBridge> {
        Ok(ChatBridge::new(self.completion_service(self.chat_model())?))
    }

    /// `search`, `extract` and `scrape` over the configured web services.
    pub fn chat_tools(&self) -> Result<ChatTools> {
        let (search, extractor) = self.search_services()?;
        Ok(ChatTools::new(search, extractor))
    }

    /// Page summaries: FireCrawl first when configured, then a direct fetch.
    pub fn summarizer(&self) -> Result<Summarizer> {
        let (_, extractor) = self.search_services()?;
        let mut extractors = vec![extractor];
        if self.firecrawl_api_key.is_some() {
            let direct: Arc<dyn ExtractionService> =
                Arc::new(WebPageExtractor::new().context("Failed to build page extractor")?);
            extractors.push(direct);
        }
        Ok(Summarizer::new(extractors, self.completion_service(self.chat_model())?))
    }
}
