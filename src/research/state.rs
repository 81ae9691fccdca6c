//! Research run state and options.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::services::Finding;

/// Caller-supplied limits for one research run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchOptions {
    /// Number of search→extract→analyze iterations allowed
    pub max_depth: u32,

    /// Wall-clock ceiling, checked at the top of every iteration
    #[serde(with = "duration_secs")]
    pub time_budget: Duration,

    /// Phase failures tolerated before the loop stops
    pub max_failed_attempts: u32,

    /// Top search hits extracted per iteration
    pub urls_per_round: usize,

    /// Extracted text is cut to this many characters
    pub extract_char_limit: usize,

    pub analysis_max_tokens: u32,
    pub synthesis_max_tokens: u32,
}

impl Default for ResearchOptions {
    fn default() -> Self {
        Self {
            max_depth: 7,
            time_budget: Duration::from_secs(270),
            max_failed_attempts: 3,
            urls_per_round: 3,
            extract_char_limit: 4000,
            analysis_max_tokens: 1024,
            synthesis_max_tokens: 16000,
        }
    }
}

impl ResearchOptions {
    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_time_budget(mut self, time_budget: Duration) -> Self {
        self.time_budget = time_budget;
        self
    }

    pub fn with_max_failed_attempts(mut self, max_failed_attempts: u32) -> Self {
        self.max_failed_attempts = max_failed_attempts;
        self
    }

    /// Progress denominator surfaced to the caller.
    pub fn total_expected_steps(&self) -> u32 {
        self.max_depth.saturating_mul(5)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

/// Typed hand-off from one analysis round to the next iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NextStep {
    /// Query to use instead of the current topic
    pub search_topic: Option<String>,
    /// Specific page to extract alongside the next search hits
    pub url: Option<String>,
}

/// Mutable state owned by a single research run.
#[derive(Debug, Clone)]
pub struct ResearchState {
    pub original_topic: String,
    pub topic: String,
    findings: Vec<Finding>,
    pub summaries: Vec<String>,
    pub next_step: NextStep,
    current_depth: u32,
    max_depth: u32,
    failed_attempts: u32,
    max_failed_attempts: u32,
    completed_steps: u32,
    total_expected_steps: u32,
}

impl ResearchState {
    pub fn new(topic: impl Into<String>, options: &ResearchOptions) -> Self {
        let topic = topic.into();
        Self {
            original_topic: topic.clone(),
            topic,
            findings: Vec::new(),
            summaries: Vec::new(),
            next_step: NextStep::default(),
            current_depth: 0,
            max_depth: options.max_depth,
            failed_attempts: 0,
            max_failed_attempts: options.max_failed_attempts,
            completed_steps: 0,
            total_expected_steps: options.total_expected_steps(),
        }
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    /// Findings only ever grow.
    pub fn add_findings(&mut self, findings: impl IntoIterator<Item = Finding>) {
        self.findings.extend(findings);
    }

    pub fn into_findings(self) -> Vec<Finding> {
        self.findings
    }

    pub fn current_depth(&self) -> u32 {
        self.current_depth
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn has_depth_remaining(&self) -> bool {
        self.current_depth < self.max_depth
    }

    /// Advance to the next depth; refuses to go past `max_depth`.
    pub fn advance_depth(&mut self) -> bool {
        if self.has_depth_remaining() {
            self.current_depth += 1;
            true
        } else {
            false
        }
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    /// Count a phase failure; returns `true` once the breaker has tripped.
    pub fn record_failure(&mut self) -> bool {
        self.failed_attempts += 1;
        self.breaker_tripped()
    }

    pub fn breaker_tripped(&self) -> bool {
        self.failed_attempts >= self.max_failed_attempts
    }

    pub fn completed_steps(&self) -> u32 {
        self.completed_steps
    }

    pub fn total_expected_steps(&self) -> u32 {
        self.total_expected_steps
    }

    pub fn complete_step(&mut self) {
        self.completed_steps += 1;
    }
}
