//! # Deep Research Agent CLI
//!
//! Runs research from the terminal, chats with the configured model, or
//! serves both over HTTP.
//!
//! ## Quick Start
//! ```bash
//! cargo run -- research "statin side effects" --max-depth 3
//! cargo run -- chat "What is a statin?"
//! cargo run -- summarize https://example.com/article
//! cargo run -- serve --port 3001
//! ```

// =============================================================================
// IMPORTS
// =============================================================================
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use deep_research_agent::config::Config;
use deep_research_agent::research::{
    ActivityStatus, ChannelSink, ProgressEvent, ProgressSink, ResearchOutcome,
};
use deep_research_agent::server;
use deep_research_agent::services::ChatMessage;
use deep_research_agent::tools::DeepResearchTool;

// =============================================================================
// CLI ARGUMENTS
// =============================================================================
/// # Rust Concept: Subcommands with Clap
///
/// Deriving `Subcommand` on an enum turns each variant into a subcommand
/// with its own arguments. `global = true` flags are accepted before or
/// after the subcommand name.
#[derive(Parser, Debug)]
#[command(
    name = "deep-research-agent",
    version,
    about = "Iterative web research with streamed progress",
    long_about = r#"
Deep Research Agent - searches, reads and analyzes the web in rounds,
then writes one long report.

Each round searches for the current focus, extracts the top pages and asks
the model what is still missing. The run stops when the model is satisfied,
the depth limit or time budget is reached, or too many steps fail.

CONFIGURATION (environment or .env):
  LLM_PROVIDER        groq | openrouter | openai | ollama (default: groq)
  GROQ_API_KEY        key for the selected hosted provider
  FIRECRAWL_API_KEY   optional; without it DuckDuckGo and plain HTTP are used

EXAMPLES:
  deep-research-agent research "statin side effects"
  deep-research-agent research "rust async runtimes" --max-depth 3 --events
  deep-research-agent chat "Summarize the CAP theorem"
  deep-research-agent chat --deep-research "What changed in statin guidance?"
  deep-research-agent summarize https://example.com/article
  deep-research-agent serve --port 3001
"#
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Model to use (overrides LLM_MODEL)
    #[arg(short = 'm', long = "model", global = true, env = "LLM_MODEL")]
    model: Option<String>,

    /// Enable verbose/debug logging
    #[arg(short = 'v', long = "verbose", global = true, default_value = "false")]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Research a topic and print the final report
    Research {
        #[arg(value_name = "TOPIC")]
        topic: String,

        /// Maximum search → extract → analyze rounds
        #[arg(short = 'd', long = "max-depth")]
        max_depth: Option<u32>,

        /// Time budget in seconds
        #[arg(short = 't', long = "time-budget", value_name = "SECS")]
        time_budget: Option<u64>,

        /// Print every progress event as an SSE `data:` frame
        #[arg(long = "events", default_value = "false")]
        events: bool,
    },

    /// Send one message and stream the reply (the model may search the web)
    Chat {
        #[arg(value_name = "MESSAGE")]
        message: String,

        /// Also let the model start a full research run
        #[arg(long = "deep-research", default_value = "false")]
        deep_research: bool,
    },

    /// Scrape one page and print a short summary
    Summarize {
        #[arg(value_name = "URL")]
        url: String,
    },

    /// Serve the HTTP API
    Serve {
        #[arg(long = "host")]
        host: Option<String>,

        #[arg(short = 'p', long = "port")]
        port: Option<u16>,
    },
}

// =============================================================================
// MAIN FUNCTION
// =============================================================================
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose)?;

    let mut config = Config::from_env()?;

    if let Some(model) = cli.model {
        info!(model = %model, "Using model from command line");
        config.model = Some(model);
    }

    match cli.command {
        Command::Research {
            topic,
            max_depth,
            time_budget,
            events,
        } => {
            if let Some(max_depth) = max_depth {
                config.research.max_depth = max_depth;
            }
            if let Some(secs) = time_budget {
                config.research.time_budget = Duration::from_secs(secs);
            }
            config.validate()?;
            run_research(&config, &topic, events).await
        }
        Command::Chat {
            message,
            deep_research,
        } => {
            config.validate()?;
            run_chat(&config, message, deep_research).await
        }
        Command::Summarize { url } => {
            config.validate()?;
            run_summarize(&config, &url).await
        }
        Command::Serve { host, port } => {
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            config.validate()?;
            server::serve(&config).await
        }
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

async fn run_research(config: &Config, topic: &str, events: bool) -> Result<()> {
    info!(
        provider = %config.provider,
        model = %config.reasoning_model(),
        firecrawl = config.firecrawl_api_key.is_some(),
        "Configuration loaded"
    );

    let orchestrator = config.orchestrator()?;
    let (sink, mut rx) = ChannelSink::channel();
    let cancel = CancellationToken::new();

    // Ctrl-C cancels the run instead of killing the process mid-write
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let run_topic = topic.to_string();
    let run = tokio::spawn(async move {
        orchestrator
            .run_with_cancellation(&run_topic, &sink, &cancel)
            .await
    });

    while let Some(event) = rx.recv().await {
        if events {
            println!("data: {}\n", serde_json::to_string(&event)?);
        } else {
            print_progress(&event);
        }
    }

    let outcome = run.await.context("Research task failed")?;

    if events {
        println!("event: result\ndata: {}\n", serde_json::to_string(&outcome)?);
        println!("data: [DONE]\n");
    } else {
        print_report(&outcome);
    }

    match outcome.error {
        None => {
            info!("Research completed successfully");
            Ok(())
        }
        Some(e) => {
            error!(error = %e, "Research failed");
            anyhow::bail!("Research failed: {}", e)
        }
    }
}

async fn run_chat(config: &Config, message: String, deep_research: bool) -> Result<()> {
    let bridge = config.chat_bridge()?;
    let mut tools = config.chat_tools()?;
    let (sink, mut rx) = ChannelSink::channel();
    let sink = Arc::new(sink);

    if deep_research {
        let research_sink: Arc<dyn ProgressSink> = sink.clone();
        tools = tools.with_deep_research(DeepResearchTool::new(
            config.orchestrator()?,
            research_sink,
            CancellationToken::new(),
        ));
    }

    let reply = tokio::spawn(async move {
        bridge
            .stream_reply_with_tools(&[ChatMessage::user(message)], &tools, sink.as_ref(), |_| {})
            .await
    });

    let mut stdout = std::io::stdout();
    while let Some(event) = rx.recv().await {
        match event {
            ProgressEvent::Text(chunk) => {
                write!(stdout, "{}", chunk)?;
                stdout.flush()?;
            }
            other => print_progress(&other),
        }
    }
    writeln!(stdout)?;

    reply.await.context("Chat task failed")??;
    Ok(())
}

async fn run_summarize(config: &Config, url: &str) -> Result<()> {
    let summary = config.summarizer()?.summarize(url).await?;
    info!(source = %summary.source, chars = summary.original_content.len(), "Page summarized");
    println!("{}", summary.summary);
    Ok(())
}

// =============================================================================
// OUTPUT
// =============================================================================

/// Human-readable progress on stderr, keeping stdout for the report.
fn print_progress(event: &ProgressEvent) {
    match event {
        ProgressEvent::DepthDelta(depth) => {
            eprintln!("\n── depth {}/{} ──", depth.current, depth.max);
        }
        ProgressEvent::ActivityDelta(activity) => {
            let marker = match activity.status {
                ActivityStatus::Pending => "…",
                ActivityStatus::Complete => "✓",
                ActivityStatus::Error => "✗",
            };
            eprintln!(
                "  {} [{}/{}] {}",
                marker, activity.completed_steps, activity.total_steps, activity.message
            );
        }
        ProgressEvent::SourceDelta(hit) => {
            eprintln!("      {}", hit.url);
        }
        ProgressEvent::ToolCall(call) => {
            eprintln!("  ⚙ {} {}", call.tool_name, call.args);
        }
        ProgressEvent::ToolResult(result) if !result.success => {
            eprintln!("  ✗ {} failed", result.tool_name);
        }
        _ => {}
    }
}

fn print_report(outcome: &ResearchOutcome) {
    let Some(report) = outcome.report() else {
        return;
    };

    println!("\n{}", "=".repeat(60));
    println!("RESEARCH RESULTS");
    println!("{}\n", "=".repeat(60));
    println!("{}", report);

    if !outcome.data.findings.is_empty() {
        println!("\nSources:");
        for finding in &outcome.data.findings {
            println!("  - {}", finding.source);
        }
    }
    println!("\n{}", "=".repeat(60));
}

// =============================================================================
// LOGGING INITIALIZATION
// =============================================================================
/// Initialize the tracing subscriber for structured logging.
///
/// `RUST_LOG` wins when set; otherwise INFO, or DEBUG with `--verbose`.
/// Logs go to stderr so stdout only carries results.
fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    Ok(())
}
