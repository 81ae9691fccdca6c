//! # Research Orchestrator
//!
//! Runs the bounded search → extract → analyze loop and a final synthesis.
//!
//! One iteration is one unit of depth. The loop stops when:
//! - `max_depth` iterations have run,
//! - the time budget is spent (checked at the top of each iteration),
//! - the circuit breaker trips after `max_failed_attempts` phase failures,
//! - or an analysis reports that research should stop or has no gaps left.
//!
//! Whatever the reason, one synthesis call is made over all findings and the
//! result is emitted as the terminal `finish` event.
//!
//! The failure counter is cumulative for the whole run. A successful phase
//! does not reset it.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::analysis::{analysis_prompt, minutes_remaining, parse_analysis, synthesis_prompt, Analysis};
use super::progress::{
    timestamp_now, Activity, ActivityKind, ActivityStatus, DepthProgress, ProgressEvent,
    ProgressInit, ProgressSink,
};
use super::state::{NextStep, ResearchOptions, ResearchState};
use crate::error::ResearchError;
use crate::services::{
    CompletionRequest, ExtractionService, Finding, SearchHit, SearchService, TextCompletionService,
};

// =============================================================================
// OUTCOME
// =============================================================================

/// Result payload of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchData {
    pub findings: Vec<Finding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
    pub completed_steps: u32,
    pub total_steps: u32,
}

/// `{ success, error?, data }`, the shape returned to the calling tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub data: ResearchData,
}

impl ResearchOutcome {
    fn success(state: ResearchState, analysis: String) -> Self {
        let completed_steps = state.completed_steps();
        let total_steps = state.total_expected_steps();
        Self {
            success: true,
            error: None,
            data: ResearchData {
                findings: state.into_findings(),
                analysis: Some(analysis),
                completed_steps,
                total_steps,
            },
        }
    }

    fn failure(state: ResearchState, error: &ResearchError) -> Self {
        let completed_steps = state.completed_steps();
        let total_steps = state.total_expected_steps();
        Self {
            success: false,
            error: Some(error.to_string()),
            data: ResearchData {
                findings: state.into_findings(),
                analysis: None,
                completed_steps,
                total_steps,
            },
        }
    }

    /// The final synthesis, if the run succeeded.
    pub fn report(&self) -> Option<&str> {
        self.data.analysis.as_deref()
    }
}

// =============================================================================
// ORCHESTRATOR
// =============================================================================

/// Drives research runs against a set of services.
///
/// Cheap to clone; every run gets its own [`ResearchState`].
#[derive(Clone)]
pub struct ResearchOrchestrator {
    search: Arc<dyn SearchService>,
    extractor: Arc<dyn ExtractionService>,
    completion: Arc<dyn TextCompletionService>,
    options: ResearchOptions,
}

/// Per-run bookkeeping: the state plus where progress goes.
struct Run<'a> {
    state: ResearchState,
    sink: &'a dyn ProgressSink,
    started: Instant,
}

impl Run<'_> {
    fn emit(&self, event: ProgressEvent) {
        self.sink.emit(event);
    }

    /// Emit an activity. A `complete` activity counts as one finished step.
    fn activity(&mut self, kind: ActivityKind, status: ActivityStatus, message: impl Into<String>) {
        if status == ActivityStatus::Complete {
            self.state.complete_step();
        }
        let activity = Activity {
            kind,
            status,
            message: message.into(),
            timestamp: timestamp_now(),
            depth: self.state.current_depth(),
            completed_steps: self.state.completed_steps(),
            total_steps: self.state.total_expected_steps(),
        };
        self.emit(ProgressEvent::ActivityDelta(activity));
    }

    fn depth_progress(&self) {
        self.emit(ProgressEvent::DepthDelta(DepthProgress {
            current: self.state.current_depth(),
            max: self.state.max_depth(),
            completed_steps: self.state.completed_steps(),
            total_steps: self.state.total_expected_steps(),
        }));
    }
}

/// Race `fut` against cancellation.
async fn guarded<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output, ResearchError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ResearchError::Cancelled),
        output = fut => Ok(output),
    }
}

impl ResearchOrchestrator {
    pub fn new(
        search: Arc<dyn SearchService>,
        extractor: Arc<dyn ExtractionService>,
        completion: Arc<dyn TextCompletionService>,
    ) -> Self {
        Self {
            search,
            extractor,
            completion,
            options: ResearchOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ResearchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &ResearchOptions {
        &self.options
    }

    pub fn search_service(&self) -> Arc<dyn SearchService> {
        self.search.clone()
    }

    pub fn extraction_service(&self) -> Arc<dyn ExtractionService> {
        self.extractor.clone()
    }

    pub fn completion_service(&self) -> Arc<dyn TextCompletionService> {
        self.completion.clone()
    }

    /// Research `topic`, reporting progress to `sink`.
    pub async fn run(&self, topic: &str, sink: &dyn ProgressSink) -> ResearchOutcome {
        self.run_with_cancellation(topic, sink, &CancellationToken::new())
            .await
    }

    /// Like [`run`](Self::run), but stops at the next await point once
    /// `cancel` fires.
    pub async fn run_with_cancellation(
        &self,
        topic: &str,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> ResearchOutcome {
        info!(
            topic,
            max_depth = self.options.max_depth,
            budget_secs = self.options.time_budget.as_secs(),
            "Starting research run"
        );

        let mut run = Run {
            state: ResearchState::new(topic, &self.options),
            sink,
            started: Instant::now(),
        };

        run.emit(ProgressEvent::ProgressInit(ProgressInit {
            max_depth: self.options.max_depth,
            total_steps: run.state.total_expected_steps(),
        }));

        match self.drive(&mut run, cancel).await {
            Ok(report) => {
                info!(
                    findings = run.state.findings().len(),
                    depth = run.state.current_depth(),
                    elapsed_ms = run.started.elapsed().as_millis() as u64,
                    "Research completed"
                );
                ResearchOutcome::success(run.state, report)
            }
            Err(e) => {
                error!(error = %e, "Research failed");
                run.activity(
                    ActivityKind::Thought,
                    ActivityStatus::Error,
                    format!("Research failed: {e}"),
                );
                ResearchOutcome::failure(run.state, &e)
            }
        }
    }

    async fn drive(&self, run: &mut Run<'_>, cancel: &CancellationToken) -> Result<String, ResearchError> {
        while run.state.has_depth_remaining() {
            let elapsed = run.started.elapsed();
            if elapsed >= self.options.time_budget {
                info!(elapsed_ms = elapsed.as_millis() as u64, "Time budget spent");
                break;
            }

            run.state.advance_depth();
            run.depth_progress();

            // Search phase
            let query = run
                .state
                .next_step
                .search_topic
                .clone()
                .unwrap_or_else(|| run.state.topic.clone());
            run.activity(
                ActivityKind::Search,
                ActivityStatus::Pending,
                format!("Searching for \"{query}\""),
            );

            let hits = match guarded(cancel, self.search.search(&query)).await? {
                Ok(hits) => hits,
                Err(e) => {
                    warn!(query = %query, error = %e, "Search failed");
                    run.activity(
                        ActivityKind::Search,
                        ActivityStatus::Error,
                        format!("Search failed for \"{query}\""),
                    );
                    if run.state.record_failure() {
                        warn!(failures = run.state.failed_attempts(), "Too many failures, stopping");
                        break;
                    }
                    continue;
                }
            };

            run.activity(
                ActivityKind::Search,
                ActivityStatus::Complete,
                format!("Found {} relevant results", hits.len()),
            );
            for hit in &hits {
                run.emit(ProgressEvent::SourceDelta(hit.clone()));
            }

            // Extraction phase
            let urls = candidate_urls(run.state.next_step.url.as_deref(), &hits, self.options.urls_per_round);
            run.activity(
                ActivityKind::Extract,
                ActivityStatus::Pending,
                format!("Extracting content from {} sources", urls.len()),
            );
            let extracted_count = self.extract_all(run, &urls, cancel).await?;
            run.activity(
                ActivityKind::Extract,
                ActivityStatus::Complete,
                format!("Extracted {} of {} sources", extracted_count, urls.len()),
            );

            // Analysis phase
            run.activity(ActivityKind::Analyze, ActivityStatus::Pending, "Analyzing findings");
            let analysis = match self.analyze(run, cancel).await? {
                Some(analysis) => analysis,
                None => {
                    run.state.next_step = NextStep::default();
                    run.activity(
                        ActivityKind::Analyze,
                        ActivityStatus::Error,
                        "Failed to analyze findings",
                    );
                    if run.state.record_failure() {
                        warn!(failures = run.state.failed_attempts(), "Too many failures, stopping");
                        break;
                    }
                    continue;
                }
            };

            run.state.next_step = analysis.next_step();
            run.state.summaries.push(analysis.summary.clone());
            run.activity(ActivityKind::Analyze, ActivityStatus::Complete, analysis.summary.clone());

            if analysis.is_final() {
                debug!(should_continue = analysis.should_continue, "Analysis says stop");
                break;
            }
            if let Some(gap) = analysis.gaps.into_iter().next() {
                debug!(gap = %gap, "Following gap");
                run.state.topic = gap;
            }
        }

        self.synthesize(run, cancel).await
    }

    /// Extract each URL in turn. Individual failures are logged and skipped.
    /// Extract `urls` in order, storing each finding as soon as it arrives
    /// so a cancelled batch keeps what it already fetched. Returns how many
    /// pages were extracted.
    async fn extract_all(
        &self,
        run: &mut Run<'_>,
        urls: &[String],
        cancel: &CancellationToken,
    ) -> Result<usize, ResearchError> {
        let mut extracted = 0;
        for url in urls {
            match guarded(cancel, self.extractor.extract(url)).await? {
                Ok(mut finding) => {
                    truncate_chars(&mut finding.text, self.options.extract_char_limit);
                    run.state.add_findings([finding]);
                    extracted += 1;
                }
                Err(e) => warn!(url = %url, error = %e, "Extraction failed, skipping"),
            }
        }
        Ok(extracted)
    }

    /// `Ok(None)` means the analysis phase failed (call error or bad JSON).
    async fn analyze(&self, run: &Run<'_>, cancel: &CancellationToken) -> Result<Option<Analysis>, ResearchError> {
        let minutes = minutes_remaining(self.options.time_budget, run.started.elapsed());
        let prompt = analysis_prompt(&run.state.topic, minutes, run.state.findings());
        let request = CompletionRequest::prompt(prompt, None).with_max_tokens(self.options.analysis_max_tokens);

        let text = match guarded(cancel, self.completion.complete(&request)).await? {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Analysis completion failed");
                return Ok(None);
            }
        };

        match parse_analysis(&text) {
            Ok(analysis) => Ok(Some(analysis)),
            Err(e) => {
                warn!(error = %e, "Failed to parse analysis");
                Ok(None)
            }
        }
    }

    async fn synthesize(&self, run: &mut Run<'_>, cancel: &CancellationToken) -> Result<String, ResearchError> {
        run.activity(ActivityKind::Synthesis, ActivityStatus::Pending, "Preparing final analysis");

        let prompt = synthesis_prompt(&run.state.original_topic, run.state.findings(), &run.state.summaries);
        let request = CompletionRequest::prompt(prompt, None).with_max_tokens(self.options.synthesis_max_tokens);
        let report = guarded(cancel, self.completion.complete(&request))
            .await?
            .map_err(ResearchError::Synthesis)?;

        run.activity(ActivityKind::Synthesis, ActivityStatus::Complete, "Research completed");
        run.emit(ProgressEvent::Finish(report.clone()));
        Ok(report)
    }
}

/// The analysis-suggested URL first, then the top hits; blanks and repeats dropped.
fn candidate_urls(suggested: Option<&str>, hits: &[SearchHit], limit: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    suggested
        .into_iter()
        .chain(hits.iter().take(limit).map(|hit| hit.url.as_str()))
        .map(str::trim)
        .filter(|url| !url.is_empty() && seen.insert(*url))
        .map(str::to_string)
        .collect()
}

/// Cut `text` to at most `limit` characters.
pub(crate) fn truncate_chars(text: &mut String, limit: usize) {
    if let Some((idx, _)) = text.char_indices().nth(limit) {
        text.truncate(idx);
    }
}
