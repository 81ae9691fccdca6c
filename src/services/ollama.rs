//! # Ollama Completions via Rig
//!
//! Local inference through Rig's Ollama provider. Rig's agent builder takes a
//! preamble and a single prompt, so the request's system messages become the
//! preamble and the most recent user message becomes the prompt.
//!
//! Streaming uses the trait's default: the full reply as one chunk.

use async_trait::async_trait;
use rig::client::{CompletionClient, ProviderClient};
use rig::completion::Prompt;
use rig::providers::ollama;
use tracing::{debug, info};

use super::{CompletionRequest, TextCompletionService};
use crate::error::ServiceError;

/// Default Ollama host.
pub const DEFAULT_HOST: &str = "http://localhost:11434";

pub struct OllamaCompletion {
    client: ollama::Client,
    model: String,
    temperature: f64,
}

impl OllamaCompletion {
    /// Connect to the Ollama server at `host`.
    ///
    /// Rig's Ollama client reads its base URL from `OLLAMA_API_BASE_URL`.
    pub fn new(host: &str, model: impl Into<String>) -> Self {
        std::env::set_var("OLLAMA_API_BASE_URL", host);
        let client = ollama::Client::from_env();
        let model = model.into();

        debug!(host, model = %model, "Connected to Ollama");

        Self {
            client,
            model,
            temperature: 0.5,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }
}

#[async_trait]
impl TextCompletionService for OllamaCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ServiceError> {
        let prompt = request
            .last_user_message()
            .ok_or_else(|| ServiceError::Config("completion request has no user message".into()))?;

        let mut builder = self
            .client
            .agent(&self.model)
            .temperature(self.temperature)
            .max_tokens(u64::from(request.max_tokens));
        if let Some(preamble) = request.system_preamble() {
            builder = builder.preamble(&preamble);
        }
        let agent = builder.build();

        info!(model = %self.model, "Sending completion request to Ollama");

        agent
            .prompt(prompt)
            .await
            .map_err(|e| ServiceError::Provider(format!("Ollama completion failed: {}", e)))
    }

    fn name(&self) -> &str {
        "ollama"
    }
}
