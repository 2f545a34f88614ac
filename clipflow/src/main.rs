//! clipflow CLI entry point.
//!
//! Initializes logging, wires the orchestrator from the config file and
//! environment, and runs one pipeline, a batch or an engagement pass.

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use clipflow::config::AppConfig;
use clipflow::events::{names, EventSink};
use clipflow::orchestrator::Orchestrator;
use clipflow::records::RunRecord;
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Produce short-form talking-head videos.
#[derive(Parser, Debug)]
#[command(name = "clipflow")]
#[command(about = "Produce short-form talking-head videos from trending topics")]
#[command(version)]
#[command(
    long_about = "clipflow writes a script for a topic, voices it, animates a face to the voice-over and attaches marketing metadata.\n\nWithout a topic one is selected from current trends.\n\nExample usage:\n  clipflow quantum computing\n  clipflow --batch cats dogs owls\n  clipflow --engage tiktok"
)]
struct Cli {
    /// Topic words, joined with spaces. With --batch, one topic per word.
    topic: Vec<String>,

    /// Run one pipeline per topic argument.
    #[arg(long, conflicts_with = "engage")]
    batch: bool,

    /// Reply to new comments on this platform instead of producing a video.
    #[arg(long, value_name = "PLATFORM")]
    engage: Option<String>,

    /// JSON config file.
    #[arg(short, long, env = "CLIPFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Cancel each run after this many seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,
}

/// Prints one line per stage transition to stderr.
#[derive(Debug, Default)]
struct ConsoleProgress;

impl ConsoleProgress {
    fn print(event_type: &str, data: Option<&Value>) {
        let field = |key: &str| {
            data.and_then(|d| d.get(key))
                .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string))
                .unwrap_or_default()
        };
        match event_type {
            names::STAGE_STARTED => eprintln!("  > {}", field("stage")),
            names::STAGE_COMPLETED => eprintln!("  ok {}", field("stage")),
            names::STAGE_DEGRADED => eprintln!("  ~ {} (fallback content)", field("stage")),
            names::STAGE_FAILED => eprintln!("  x {}: {}", field("stage"), field("error")),
            names::PIPELINE_STARTED => eprintln!("run {}", field("run_id")),
            _ => {}
        }
    }
}

#[async_trait]
impl EventSink for ConsoleProgress {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        Self::print(event_type, data.as_ref());
    }

    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        Self::print(event_type, data.as_ref());
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > --log-level CLI arg > default "info"
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log_level.clone());
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)))
        .init();

    let mut config = AppConfig::from_env(cli.config.as_deref()).context("loading config")?;
    if let Some(secs) = cli.timeout_secs {
        config.run.deadline_secs = Some(secs);
    }

    let orchestrator = Orchestrator::builder(config)
        .with_event_sink(Arc::new(ConsoleProgress))
        .with_configured_adapters()
        .and_then(|builder| builder.build())
        .context("wiring pipeline")?;

    let shutdown = orchestrator.shutdown_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            shutdown.cancel("ctrl-c");
        }
    });

    let ok = if let Some(platform) = cli.engage {
        let report = orchestrator.engage_audience(&platform).await;
        println!("{}", serde_json::to_string_pretty(&report)?);
        report.is_success()
    } else if cli.batch {
        let reports = orchestrator.produce_batch(cli.topic).await;
        let failed = reports.iter().filter(|r| !r.is_success()).count();
        let records: Vec<RunRecord> = reports.iter().map(RunRecord::from_report).collect();
        println!("{}", serde_json::to_string_pretty(&records)?);
        info!(runs = reports.len(), failed, "batch finished");
        failed == 0
    } else {
        let topic = cli.topic.join(" ");
        let report = orchestrator.produce_content(Some(topic.as_str())).await;
        println!("{}", serde_json::to_string_pretty(&RunRecord::from_report(&report))?);
        report.is_success()
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
