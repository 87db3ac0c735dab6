use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use trackfeed_capture::{CapturePolicy, CaptureSupervisor, TcpDialer};
use trackfeed_config::{ConfigError, TrackfeedConfig};
use trackfeed_core::MessageStream;
use trackfeed_telemetry::{CaptureMetrics, EventLogger};

use crate::signals::wait_for_shutdown_signal;
use crate::sink::{DailyFileSink, RecordSink, SinkError};

#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Capture every configured feed until interrupted
    Run(RunArgs),
    /// Print the resolved configuration as YAML
    Config(ConfigArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Configuration file; defaults to config/trackfeed.yaml when present
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Feed address (host:port), repeatable; replaces configured sources
    #[arg(short, long = "source")]
    pub sources: Vec<String>,
    /// Output directory for daily files
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_capture(args).await,
        Commands::Config(args) => {
            let config = load_config(args.config.as_deref())?;
            print!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<TrackfeedConfig, ConfigError> {
    match path {
        Some(path) => TrackfeedConfig::load_from_path(path),
        None => TrackfeedConfig::load(),
    }
}

async fn run_capture(args: RunArgs) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if !args.sources.is_empty() {
        config = config.with_sources(args.sources)?;
    }
    if let Some(out) = args.out {
        config.sink.directory = out;
    }

    EventLogger::init(&config.telemetry.log_level)?;
    if config.capture.sources.is_empty() {
        warn!("no sources configured, nothing will be captured");
    }

    let metrics = Arc::new(CaptureMetrics::new()?);
    let supervisor = CaptureSupervisor::with_policy(
        config.capture.sources.clone(),
        TcpDialer,
        CapturePolicy::from(&config.capture),
    )?
    .with_metrics(Arc::clone(&metrics));

    let sink = DailyFileSink::new(&config.sink.directory, config.sink.prefix.clone())
        .with_compression(config.sink.compress);
    let flush_every = config.sink.flush_interval();
    let stream = supervisor.messages();
    let consumer = tokio::spawn(async move {
        let mut sink = sink;
        drain(stream, &mut sink, flush_every).await
    });

    supervisor.start();
    info!(
        sources = config.capture.sources.len(),
        directory = %config.sink.directory.display(),
        "capturing"
    );

    wait_for_shutdown_signal()
        .await
        .context("failed to install signal handlers")?;
    info!("shutdown requested");

    // the consumer keeps draining while workers wind down
    supervisor.stop().await;
    let written = consumer.await??;

    info!(written, "capture finished");
    debug!("final metrics:\n{}", metrics.gather()?);
    Ok(())
}

/// Persists every message until the bus ends. Written records reach the file
/// within `flush_every`. Write failures are logged and skipped so a sink
/// problem never stalls producers.
async fn drain<S: RecordSink>(
    stream: MessageStream,
    sink: &mut S,
    flush_every: Duration,
) -> Result<u64, SinkError> {
    let mut written = 0u64;
    let mut dirty = false;
    let mut ticker = tokio::time::interval(flush_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            received = stream.recv() => {
                let Some(message) = received else { break };
                match sink.write_record(&message.data, message.timestamp).await {
                    Ok(()) => {
                        written += 1;
                        dirty = true;
                    }
                    Err(e) => error!(source = %message.source, error = %e, "failed to persist record"),
                }
            }
            _ = ticker.tick(), if dirty => {
                if let Err(e) = sink.flush().await {
                    error!(error = %e, "failed to flush records");
                }
                dirty = false;
            }
        }
    }

    sink.close().await?;
    Ok(written)
}
