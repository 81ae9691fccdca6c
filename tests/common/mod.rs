//! In-memory services shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use deep_research_agent::research::{ProgressEvent, ResearchOptions, ResearchOrchestrator};
use deep_research_agent::services::{
    CompletionRequest, ExtractionService, Finding, Role, SearchHit, SearchService,
    TextCompletionService, ToolCall, TurnChunk, TurnStream,
};
use rig::completion::ToolDefinition;
use deep_research_agent::ServiceError;

/// Prefix of every synthesis prompt.
pub const SYNTHESIS_PREFIX: &str = "Create a comprehensive long analysis of";

pub fn hit(url: &str, title: &str) -> SearchHit {
    SearchHit {
        url: url.to_string(),
        title: title.to_string(),
        description: format!("About {title}"),
    }
}

pub fn default_hits() -> Vec<SearchHit> {
    vec![
        hit("https://a.org", "A"),
        hit("https://b.org", "B"),
        hit("https://c.org", "C"),
        hit("https://d.org", "D"),
    ]
}

/// An analysis reply in the wrapped JSON shape the model is asked for.
pub fn analysis_json(summary: &str, gaps: &[&str], should_continue: bool) -> String {
    analysis_json_with(summary, gaps, should_continue, None, None)
}

pub fn analysis_json_with(
    summary: &str,
    gaps: &[&str],
    should_continue: bool,
    next_search_topic: Option<&str>,
    url_to_search: Option<&str>,
) -> String {
    serde_json::json!({
        "analysis": {
            "summary": summary,
            "gaps": gaps,
            "nextSteps": [],
            "shouldContinue": should_continue,
            "nextSearchTopic": next_search_topic.unwrap_or(""),
            "urlToSearch": url_to_search.unwrap_or(""),
        }
    })
    .to_string()
}

// =============================================================================
// SEARCH
// =============================================================================

pub struct MockSearch {
    hits: Vec<SearchHit>,
    fail: bool,
    pub queries: Mutex<Vec<String>>,
}

impl MockSearch {
    pub fn returning(hits: Vec<SearchHit>) -> Arc<Self> {
        Arc::new(Self {
            hits,
            fail: false,
            queries: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            hits: Vec::new(),
            fail: true,
            queries: Mutex::new(Vec::new()),
        })
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchService for MockSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, ServiceError> {
        self.queries.lock().unwrap().push(query.to_string());
        if self.fail {
            Err(ServiceError::Api {
                status: 500,
                message: "search backend down".into(),
            })
        } else {
            Ok(self.hits.clone())
        }
    }
}

// =============================================================================
// EXTRACTION
// =============================================================================

pub struct MockExtractor {
    failing: HashSet<String>,
    slow: HashSet<String>,
    delay: Duration,
    pub calls: Mutex<Vec<String>>,
}

impl MockExtractor {
    pub fn new() -> Arc<Self> {
        Self::failing_on(&[])
    }

    pub fn failing_on(urls: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            failing: urls.iter().map(|u| u.to_string()).collect(),
            slow: HashSet::new(),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Pages in `urls` take `delay` to extract (use with a paused clock).
    pub fn slow_on(urls: &[&str], delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            failing: HashSet::new(),
            slow: urls.iter().map(|u| u.to_string()).collect(),
            delay,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExtractionService for MockExtractor {
    async fn extract(&self, url: &str) -> Result<Finding, ServiceError> {
        self.calls.lock().unwrap().push(url.to_string());
        if self.slow.contains(url) {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.contains(url) {
            Err(ServiceError::Http(format!("could not fetch {url}")))
        } else {
            Ok(Finding::new(format!("Content of {url}"), url))
        }
    }
}

// =============================================================================
// COMPLETION
// =============================================================================

/// Answers analysis prompts from a queue and synthesis prompts with a fixed
/// report. An exhausted queue answers with an error.
pub struct MockCompletion {
    analyses: Mutex<VecDeque<Result<String, ServiceError>>>,
    synthesis: Mutex<Option<Result<String, ServiceError>>>,
    delay: Duration,
    pub prompts: Mutex<Vec<CompletionRequest>>,
}

impl MockCompletion {
    pub fn new(analyses: Vec<String>) -> Self {
        Self {
            analyses: Mutex::new(analyses.into_iter().map(Ok).collect()),
            synthesis: Mutex::new(Some(Ok("final report".to_string()))),
            delay: Duration::ZERO,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_analysis_results(analyses: Vec<Result<String, ServiceError>>) -> Self {
        let mock = Self::new(Vec::new());
        *mock.analyses.lock().unwrap() = analyses.into_iter().collect();
        mock
    }

    pub fn with_failing_synthesis(self) -> Self {
        *self.synthesis.lock().unwrap() = Some(Err(ServiceError::Timeout));
        self
    }

    /// Every call sleeps this long first (use with a paused clock).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn prompts(&self) -> Vec<CompletionRequest> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextCompletionService for MockCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ServiceError> {
        self.prompts.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let prompt = request.last_user_message().unwrap_or_default();
        if prompt.starts_with(SYNTHESIS_PREFIX) {
            return self
                .synthesis
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Err(ServiceError::Provider("synthesis called twice".into())));
        }

        self.analyses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ServiceError::Provider("no scripted analysis left".into())))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Chat model that calls `tool` once when it is offered, then answers.
pub struct ToolCaller {
    tool: String,
    arguments: String,
    pub offered: Mutex<Vec<Vec<String>>>,
}

impl ToolCaller {
    pub fn new(tool: &str, arguments: serde_json::Value) -> Arc<Self> {
        Arc::new(Self {
            tool: tool.to_string(),
            arguments: arguments.to_string(),
            offered: Mutex::new(Vec::new()),
        })
    }

    pub fn offered(&self) -> Vec<Vec<String>> {
        self.offered.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextCompletionService for ToolCaller {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String, ServiceError> {
        Ok("Answered without tools".to_string())
    }

    async fn stream_turn(
        &self,
        request: &CompletionRequest,
        tools: &[ToolDefinition],
    ) -> Result<TurnStream, ServiceError> {
        let names: Vec<String> = tools.iter().map(|t| t.name.clone()).collect();
        let offered = names.contains(&self.tool);
        self.offered.lock().unwrap().push(names);

        let answered = request.messages.iter().any(|m| m.role == Role::Tool);
        let chunk = if offered && !answered {
            TurnChunk::ToolCalls(vec![ToolCall::function("call_1", self.tool.as_str(), self.arguments.as_str())])
        } else {
            TurnChunk::Text("Answered with tools".to_string())
        };
        Ok(TurnStream::new(futures::stream::iter(vec![Ok(chunk)])))
    }

    fn name(&self) -> &str {
        "tool-caller"
    }
}

// =============================================================================
// HELPERS
// =============================================================================

pub fn orchestrator(
    search: Arc<MockSearch>,
    extractor: Arc<MockExtractor>,
    completion: Arc<MockCompletion>,
    options: ResearchOptions,
) -> ResearchOrchestrator {
    ResearchOrchestrator::new(search, extractor, completion).with_options(options)
}

pub fn count(events: &[ProgressEvent], name: &str) -> usize {
    events.iter().filter(|e| e.name() == name).count()
}
