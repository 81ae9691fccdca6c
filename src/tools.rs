//! # Chat Tools
//!
//! Tools the chat model may call while answering: `search`, `extract` and
//! `scrape` over the configured web services, and `deepResearch`, which runs
//! a whole research loop and streams its progress into the chat.
//!
//! Each tool implements Rig's [`Tool`] trait, so its name, JSON-schema
//! arguments and typed output live in one place. [`ChatTools`] dispatches a
//! model's call by name and returns the output as JSON text for the `tool`
//! message that answers it.

use rig::completion::ToolDefinition;
use rig::tool::Tool;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ServiceError;
use crate::research::orchestrator::truncate_chars;
use crate::research::{ProgressSink, ResearchOrchestrator, ResearchOutcome};
use crate::services::{ExtractionService, Finding, SearchService};

/// Results returned by `search` when the model gives no limit.
pub const DEFAULT_MAX_RESULTS: usize = 5;

/// Page text handed back to the model is cut to this many characters.
pub const TOOL_TEXT_LIMIT: usize = 8000;

/// Sent instead of an empty page body.
const EMPTY_PAGE_HINT: &str = "Could not get the page content, try using search or extract";

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Search failed: {0}")]
    Search(#[source] ServiceError),

    #[error("Extraction failed: {0}")]
    Extract(String),

    #[error("Scrape failed: {0}")]
    Scrape(#[source] ServiceError),

    #[error("Unknown tool: {0}")]
    Unknown(String),

    #[error("Invalid arguments for {tool}: {message}")]
    Arguments { tool: String, message: String },

    #[error("Could not encode tool output: {0}")]
    Output(String),
}

// =============================================================================
// SEARCH
// =============================================================================

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchArgs {
    pub query: String,
    #[serde(default)]
    pub max_results: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub url: String,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SearchResults {
    pub success: bool,
    pub data: Vec<SearchResult>,
}

/// Web search through the configured [`SearchService`].
#[derive(Clone)]
pub struct SearchTool {
    search: Arc<dyn SearchService>,
}

impl SearchTool {
    pub fn new(search: Arc<dyn SearchService>) -> Self {
        Self { search }
    }
}

impl Tool for SearchTool {
    const NAME: &'static str = "search";

    type Args = SearchArgs;
    type Output = SearchResults;
    type Error = ToolError;

    async fn definition(&self, _prompt: String) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Search for web pages. Normally you should call the extract tool after this one \
                to get a specific data point if search doesn't give the exact data you need."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Search query to find relevant web pages"
                    },
                    "maxResults": {
                        "type": "number",
                        "description": "Maximum number of results to return (default 5)"
                    }
                },
                "required": ["query"]
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        let limit = args.max_results.unwrap_or(DEFAULT_MAX_RESULTS).max(1);
        info!(query = %args.query, limit, "Chat tool: search");

        let hits = self.search.search(&args.query).await.map_err(ToolError::Search)?;
        let data = hits
            .into_iter()
            .take(limit)
            .map(|hit| SearchResult {
                favicon: favicon_url(&hit.url),
                url: hit.url,
                title: hit.title,
                description: hit.description,
            })
            .collect();

        Ok(SearchResults { success: true, data })
    }
}

/// Icon URL for the host of `url`.
pub fn favicon_url(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(format!("https://www.google.com/s2/favicons?domain={host}&sz=32"))
}

// =============================================================================
// EXTRACT
// =============================================================================

#[derive(Debug, Deserialize, Serialize)]
pub struct ExtractArgs {
    pub urls: Vec<String>,
    pub prompt: String,
}

#[derive(Debug, Serialize)]
pub struct ExtractResults {
    pub success: bool,
    /// What the model said it was looking for; pages come back whole.
    pub prompt: String,
    pub data: Vec<Finding>,
}

/// Reads several pages for the model to pull data out of.
#[derive(Clone)]
pub struct ExtractTool {
    extractor: Arc<dyn ExtractionService>,
}

impl ExtractTool {
    pub fn new(extractor: Arc<dyn ExtractionService>) -> Self {
        Self { extractor }
    }
}

impl Tool for ExtractTool {
    const NAME: &'static str = "extract";

    type Args = ExtractArgs;
    type Output = ExtractResults;
    type Error = ToolError;

    async fn definition(&self, _prompt: String) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Extract data from web pages. Use this to get whatever data you need from a URL. \
                Any time someone needs to gather data from something, use this tool."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "urls": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Array of URLs to extract data from"
                    },
                    "prompt": {
                        "type": "string",
                        "description": "Description of what data to extract"
                    }
                },
                "required": ["urls", "prompt"]
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        info!(urls = args.urls.len(), prompt = %args.prompt, "Chat tool: extract");

        let mut data = Vec::with_capacity(args.urls.len());
        let mut last_error = None;
        for url in args.urls.iter().map(|u| u.trim()).filter(|u| !u.is_empty()) {
            match self.extractor.extract(url).await {
                Ok(mut finding) => {
                    truncate_chars(&mut finding.text, TOOL_TEXT_LIMIT);
                    data.push(finding);
                }
                Err(e) => {
                    warn!(url, error = %e, "Extraction failed, skipping");
                    last_error = Some(e);
                }
            }
        }

        if data.is_empty() {
            let reason = last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no URLs given".to_string());
            return Err(ToolError::Extract(reason));
        }

        Ok(ExtractResults {
            success: true,
            prompt: args.prompt,
            data,
        })
    }
}

// =============================================================================
// SCRAPE
// =============================================================================

#[derive(Debug, Deserialize, Serialize)]
pub struct ScrapeArgs {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct ScrapeResult {
    pub success: bool,
    pub data: String,
}

/// Reads one page.
#[derive(Clone)]
pub struct ScrapeTool {
    extractor: Arc<dyn ExtractionService>,
}

impl ScrapeTool {
    pub fn new(extractor: Arc<dyn ExtractionService>) -> Self {
        Self { extractor }
    }
}

impl Tool for ScrapeTool {
    const NAME: &'static str = "scrape";

    type Args = ScrapeArgs;
    type Output = ScrapeResult;
    type Error = ToolError;

    async fn definition(&self, _prompt: String) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Scrape web pages. Use this to get from a page when you have the url.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string", "description": "URL to scrape"}
                },
                "required": ["url"]
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        info!(url = %args.url, "Chat tool: scrape");

        let mut finding = self.extractor.extract(&args.url).await.map_err(ToolError::Scrape)?;
        truncate_chars(&mut finding.text, TOOL_TEXT_LIMIT);
        let data = if finding.text.trim().is_empty() {
            EMPTY_PAGE_HINT.to_string()
        } else {
            finding.text
        };

        Ok(ScrapeResult { success: true, data })
    }
}

// =============================================================================
// DEEP RESEARCH
// =============================================================================

#[derive(Debug, Deserialize, Serialize)]
pub struct DeepResearchArgs {
    pub topic: String,
}

/// Runs a full research loop. Progress goes to the chat's own sink, so the
/// client sees research events interleaved with the reply.
#[derive(Clone)]
pub struct DeepResearchTool {
    orchestrator: ResearchOrchestrator,
    sink: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
}

impl DeepResearchTool {
    pub fn new(orchestrator: ResearchOrchestrator, sink: Arc<dyn ProgressSink>, cancel: CancellationToken) -> Self {
        Self {
            orchestrator,
            sink,
            cancel,
        }
    }
}

impl Tool for DeepResearchTool {
    const NAME: &'static str = "deepResearch";

    type Args = DeepResearchArgs;
    type Output = ResearchOutcome;
    type Error = ToolError;

    async fn definition(&self, _prompt: String) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Perform deep research on a topic using an AI agent that coordinates search, \
                extract, and analysis tools with reasoning steps."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "topic": {"type": "string", "description": "The topic or question to research"}
                },
                "required": ["topic"]
            }),
        }
    }

    /// A failed run is still an answer: the outcome carries `success: false`
    /// and whatever was found before it stopped.
    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        info!(topic = %args.topic, "Chat tool: deepResearch");
        Ok(self
            .orchestrator
            .run_with_cancellation(&args.topic, self.sink.as_ref(), &self.cancel)
            .await)
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// The tools offered to one chat reply.
#[derive(Clone)]
pub struct ChatTools {
    search: SearchTool,
    extract: ExtractTool,
    scrape: ScrapeTool,
    deep_research: Option<DeepResearchTool>,
}

impl ChatTools {
    /// `search`, `extract` and `scrape`; deep research is opt-in.
    pub fn new(search: Arc<dyn SearchService>, extractor: Arc<dyn ExtractionService>) -> Self {
        Self {
            search: SearchTool::new(search),
            extract: ExtractTool::new(extractor.clone()),
            scrape: ScrapeTool::new(extractor),
            deep_research: None,
        }
    }

    pub fn with_deep_research(mut self, tool: DeepResearchTool) -> Self {
        self.deep_research = Some(tool);
        self
    }

    /// Names of the active tools, in the order they are offered.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names = vec![SearchTool::NAME, ExtractTool::NAME, ScrapeTool::NAME];
        if self.deep_research.is_some() {
            names.push(DeepResearchTool::NAME);
        }
        names
    }

    pub async fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions = vec![
            self.search.definition(String::new()).await,
            self.extract.definition(String::new()).await,
            self.scrape.definition(String::new()).await,
        ];
        if let Some(tool) = &self.deep_research {
            definitions.push(tool.definition(String::new()).await);
        }
        definitions
    }

    /// Run the tool `name` with JSON `arguments` and return its output as JSON.
    pub async fn call(&self, name: &str, arguments: &str) -> Result<String, ToolError> {
        match name {
            n if n == SearchTool::NAME => invoke(&self.search, arguments).await,
            n if n == ExtractTool::NAME => invoke(&self.extract, arguments).await,
            n if n == ScrapeTool::NAME => invoke(&self.scrape, arguments).await,
            n if n == DeepResearchTool::NAME => match &self.deep_research {
                Some(tool) => invoke(tool, arguments).await,
                None => Err(ToolError::Unknown(name.to_string())),
            },
            _ => Err(ToolError::Unknown(name.to_string())),
        }
    }
}

async fn invoke<T>(tool: &T, arguments: &str) -> Result<String, ToolError>
where
    T: Tool<Error = ToolError>,
{
    // Some models send an empty string for a call without arguments
    let arguments = if arguments.trim().is_empty() { "{}" } else { arguments };
    let args: T::Args = serde_json::from_str(arguments).map_err(|e| ToolError::Arguments {
        tool: T::NAME.to_string(),
        message: e.to_string(),
    })?;

    let output = tool.call(args).await?;
    let encoded = serde_json::to_string(&output).map_err(|e| ToolError::Output(e.to_string()))?;
    debug!(tool = T::NAME, chars = encoded.len(), "Tool finished");
    Ok(encoded)
}

/// The `{"success": false, "error": ...}` reply the model sees when a tool fails.
pub fn failure_output(error: &ToolError) -> String {
    json!({ "success": false, "error": error.to_string() }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::research::{MemorySink, ResearchOptions};
    use crate::services::{CompletionRequest, SearchHit, TextCompletionService};
    use async_trait::async_trait;
    use serde_json::Value;

    struct FixedSearch;

    #[async_trait]
    impl SearchService for FixedSearch {
        async fn search(&self, query: &str) -> Result<Vec<SearchHit>, ServiceError> {
            Ok((1..=8)
                .map(|i| SearchHit {
                    url: format!("https://site{i}.org/{query}"),
                    title: format!("Result {i}"),
                    description: String::new(),
                })
                .collect())
        }
    }

    /// Fails for URLs containing "broken", returns "" for "blank".
    struct Pages;

    #[async_trait]
    impl ExtractionService for Pages {
        async fn extract(&self, url: &str) -> Result<Finding, ServiceError> {
            if url.contains("broken") {
                return Err(ServiceError::Http(format!("could not fetch {url}")));
            }
            let text = if url.contains("blank") { String::new() } else { format!("Text of {url}") };
            Ok(Finding::new(text, url))
        }
    }

    /// Always stops after one round with a fixed report.
    struct OneRound;

    #[async_trait]
    impl TextCompletionService for OneRound {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, ServiceError> {
            let prompt = request.last_user_message().unwrap_or_default();
            if prompt.starts_with("Create a comprehensive long analysis") {
                Ok("deep report".to_string())
            } else {
                Ok(r#"{"analysis":{"summary":"s","gaps":[],"nextSteps":[],"shouldContinue":false}}"#.to_string())
            }
        }

        fn name(&self) -> &str {
            "one-round"
        }
    }

    fn tools() -> ChatTools {
        ChatTools::new(Arc::new(FixedSearch), Arc::new(Pages))
    }

    #[tokio::test]
    async fn test_definitions_follow_active_tools() {
        let tools = tools();
        let names: Vec<String> = tools.definitions().await.into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["search", "extract", "scrape"]);
        assert_eq!(tools.names(), vec!["search", "extract", "scrape"]);

        let orchestrator = ResearchOrchestrator::new(Arc::new(FixedSearch), Arc::new(Pages), Arc::new(OneRound));
        let tools = tools.with_deep_research(DeepResearchTool::new(
            orchestrator,
            Arc::new(MemorySink::new()),
            CancellationToken::new(),
        ));
        let definitions = tools.definitions().await;
        assert_eq!(definitions.last().map(|d| d.name.as_str()), Some("deepResearch"));
        assert_eq!(definitions[3].parameters["required"], json!(["topic"]));
    }

    #[tokio::test]
    async fn test_search_respects_max_results_and_adds_favicons() {
        let output = tools().call("search", r#"{"query":"statins","maxResults":2}"#).await.unwrap();
        let value: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["success"], true);
        let data = value["data"].as_array().unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0]["url"], "https://site1.org/statins");
        assert_eq!(
            data[0]["favicon"],
            "https://www.google.com/s2/favicons?domain=site1.org&sz=32"
        );

        let output = tools().call("search", r#"{"query":"x"}"#).await.unwrap();
        let value: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["data"].as_array().unwrap().len(), DEFAULT_MAX_RESULTS);
    }

    #[tokio::test]
    async fn test_extract_skips_failed_pages() {
        let output = tools()
            .call(
                "extract",
                r#"{"urls":["https://a.org","https://broken.org"],"prompt":"dosage"}"#,
            )
            .await
            .unwrap();
        let value: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["prompt"], "dosage");
        assert_eq!(value["data"], json!([{"text": "Text of https://a.org", "source": "https://a.org"}]));

        let err = tools()
            .call("extract", r#"{"urls":["https://broken.org"],"prompt":"x"}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Extract(_)));
    }

    #[tokio::test]
    async fn test_scrape_hints_on_empty_page() {
        let output = tools().call("scrape", r#"{"url":"https://blank.org"}"#).await.unwrap();
        let value: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["data"], EMPTY_PAGE_HINT);
    }

    #[tokio::test]
    async fn test_unknown_tools_and_bad_arguments() {
        let tools = tools();
        assert!(matches!(
            tools.call("deepResearch", r#"{"topic":"x"}"#).await,
            Err(ToolError::Unknown(_))
        ));
        assert!(matches!(tools.call("rm", "{}").await, Err(ToolError::Unknown(_))));

        let err = tools.call("scrape", r#"{"link": 1}"#).await.unwrap_err();
        assert!(matches!(err, ToolError::Arguments { ref tool, .. } if tool == "scrape"));
        let failure: Value = serde_json::from_str(&failure_output(&err)).unwrap();
        assert_eq!(failure["success"], false);
        assert!(failure["error"].as_str().unwrap().contains("scrape"));
    }

    #[tokio::test]
    async fn test_deep_research_runs_orchestrator_into_chat_sink() {
        let sink = Arc::new(MemorySink::new());
        let orchestrator = ResearchOrchestrator::new(Arc::new(FixedSearch), Arc::new(Pages), Arc::new(OneRound))
            .with_options(ResearchOptions {
                max_depth: 1,
                ..ResearchOptions::default()
            });
        let tools = tools().with_deep_research(DeepResearchTool::new(
            orchestrator,
            sink.clone(),
            CancellationToken::new(),
        ));

        let output = tools.call("deepResearch", r#"{"topic":"statins"}"#).await.unwrap();
        let value: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["data"]["analysis"], "deep report");

        let events = sink.events();
        assert_eq!(events.first().map(|e| e.name()), Some("progress-init"));
        assert_eq!(events.last().map(|e| e.name()), Some("finish"));
    }
}
