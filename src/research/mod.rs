//! # Deep Research
//!
//! The iterative research loop and everything it reports through.
//!
//! - [`orchestrator`]: the bounded search → extract → analyze loop
//! - [`state`]: per-run state and caller options
//! - [`analysis`]: prompts and parsing of the structured analysis reply
//! - [`progress`]: progress events and sinks

pub mod analysis;
pub mod orchestrator;
pub mod progress;
pub mod state;

pub use analysis::{parse_analysis, Analysis};
pub use orchestrator::{ResearchData, ResearchOrchestrator, ResearchOutcome};
pub use progress::{
    Activity, ActivityKind, ActivityStatus, ChannelSink, MemorySink, NullSink, ProgressEvent,
    ProgressSink, ToolInvocation, ToolResult,
};
pub use state::{NextStep, ResearchOptions, ResearchState};
