//! Analysis and synthesis prompts, and parsing of the structured analysis reply.

use serde::Deserialize;
use std::time::Duration;

use super::state::NextStep;
use crate::error::AnalysisError;
use crate::services::Finding;

/// Structured result of one analysis round.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub summary: String,
    #[serde(default)]
    pub gaps: Vec<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
    pub should_continue: bool,
    #[serde(default)]
    pub next_search_topic: Option<String>,
    #[serde(default)]
    pub url_to_search: Option<String>,
}

impl Analysis {
    /// The scratch values for the next iteration. Blank strings count as absent.
    pub fn next_step(&self) -> NextStep {
        NextStep {
            search_topic: non_blank(self.next_search_topic.as_deref()),
            url: non_blank(self.url_to_search.as_deref()),
        }
    }

    /// Whether the loop should stop after this round.
    pub fn is_final(&self) -> bool {
        !self.should_continue || self.gaps.is_empty()
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AnalysisReply {
    Wrapped { analysis: Analysis },
    Bare(Analysis),
}

/// Parse a completion reply into an [`Analysis`].
///
/// Accepts `{"analysis": {...}}` or the bare inner object, optionally inside
/// a markdown code fence or surrounded by prose.
pub fn parse_analysis(text: &str) -> Result<Analysis, AnalysisError> {
    let json = extract_json_object(text).ok_or(AnalysisError::MissingJson)?;
    let reply: AnalysisReply = serde_json::from_str(json)?;
    Ok(match reply {
        AnalysisReply::Wrapped { analysis } => analysis,
        AnalysisReply::Bare(analysis) => analysis,
    })
}

/// Slice from the first `{` to the last `}`.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start <= end).then(|| &text[start..=end])
}

/// Remaining budget in minutes, rounded to one decimal and floored at zero.
pub fn minutes_remaining(budget: Duration, elapsed: Duration) -> f64 {
    let remaining = budget.saturating_sub(elapsed);
    (remaining.as_secs_f64() / 60.0 * 10.0).round() / 10.0
}

fn format_findings(findings: &[Finding]) -> String {
    findings
        .iter()
        .map(|f| format!("[From {}]: {}", f.source, f.text))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn analysis_prompt(topic: &str, minutes_remaining: f64, findings: &[Finding]) -> String {
    format!(
        r#"You are a research agent analyzing findings about: {topic}
You have {minutes_remaining} minutes remaining to complete the research but you don't need to use all of it.
Current findings: {findings}
What has been learned? What gaps remain? What specific aspects should be investigated next if any?
If you need to search for more information, include a nextSearchTopic.
If you need to search for more information in a specific URL, include a urlToSearch.
Important: If less than 1 minute remains, set shouldContinue to false to allow time for final synthesis.
If I have enough information, set shouldContinue to false.

Respond in this exact JSON format:
{{
  "analysis": {{
    "summary": "summary of findings",
    "gaps": ["gap1", "gap2"],
    "nextSteps": ["step1", "step2"],
    "shouldContinue": true/false,
    "nextSearchTopic": "optional topic",
    "urlToSearch": "optional url"
  }}
}}"#,
        findings = format_findings(findings),
    )
}

pub fn synthesis_prompt(topic: &str, findings: &[Finding], summaries: &[String]) -> String {
    let summaries = summaries
        .iter()
        .map(|s| format!("[Summary]: {s}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Create a comprehensive long analysis of {topic} based on these findings:\n\
         {findings}\n\
         {summaries}\n\
         Provide all the thought processes including findings details, key insights, conclusions, \
         and any remaining uncertainties. Include citations to sources where appropriate. \
         This analysis should be very comprehensive and full of details. \
         It is expected to be very long, detailed and comprehensive.",
        findings = format_findings(findings),
    )
}
