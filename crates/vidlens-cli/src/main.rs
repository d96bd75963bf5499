//! VidLens CLI
//!
//! Runs the segmented video annotation pipeline from the command line.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use clap::{Args, Parser, Subcommand};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use vidlens_lib::core::annotations::GoogleCloudVideoService;
use vidlens_lib::core::clock::{Clock, SystemClock};
use vidlens_lib::core::ingest::{DirectorySource, EnvelopeFileSource, PayloadSource};
use vidlens_lib::core::segments::{Segmenter, SegmenterConfig, VideoPayload};
use vidlens_lib::core::sinks::{JsonlNotificationSink, JsonlTableSink};
use vidlens_lib::{Pipeline, PipelineConfig, PipelineEvent};

static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

#[derive(Parser)]
#[command(
    name = "vidlens",
    version,
    about = "Segmented, windowed video annotation pipeline",
    after_help = "EXAMPLES:\n  \
                  vidlens run --config pipeline.json --envelopes messages.jsonl\n  \
                  vidlens run --config pipeline.json --dir ./clips --glob '**/*.mp4'\n  \
                  vidlens plan --chunk-size-bytes 1048576 clip.mp4\n  \
                  vidlens check-config pipeline.json"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write daily-rotated logs to this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline until the source is exhausted or Ctrl-C
    Run(RunArgs),

    /// Print the segment plan of a file without annotating it
    Plan(PlanArgs),

    /// Validate a configuration file and print it normalized
    CheckConfig {
        /// Configuration file (JSON)
        config: PathBuf,
    },

    /// Print the default configuration
    InitConfig,
}

#[derive(Args)]
struct RunArgs {
    /// Configuration file (JSON); defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON-lines file of message envelopes
    #[arg(long, conflicts_with = "dir", required_unless_present = "dir")]
    envelopes: Option<PathBuf>,

    /// Directory whose matching files are each one payload
    #[arg(long)]
    dir: Option<PathBuf>,

    /// File pattern used with --dir
    #[arg(long, default_value = "**/*")]
    glob: String,

    /// Notification output file
    #[arg(long, default_value = "out/notifications.jsonl")]
    notifications_out: PathBuf,

    /// Directory receiving one JSON-lines file per table
    #[arg(long, default_value = "out/tables")]
    table_dir: PathBuf,

    /// Annotation service API key
    #[arg(long, env = "VIDLENS_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Override the annotation service endpoint
    #[arg(long)]
    api_url: Option<String>,

    /// How often a pending annotation operation is polled
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Override windowIntervalSeconds
    #[arg(long)]
    window_seconds: Option<u64>,

    /// Override keyRangeSize
    #[arg(long)]
    key_range_size: Option<u32>,

    /// Override confidenceThreshold
    #[arg(long)]
    confidence_threshold: Option<f32>,
}

#[derive(Args)]
struct PlanArgs {
    /// File to segment
    input: PathBuf,

    /// Routing context; defaults to the file name
    #[arg(long)]
    routing_context: Option<String>,

    #[arg(long, default_value_t = 4 * 1024 * 1024)]
    chunk_size_bytes: usize,

    #[arg(long, default_value_t = 4)]
    key_range_size: u32,
}

fn init_logging(verbose: bool, log_dir: Option<&Path>) {
    use tracing_subscriber::prelude::*;

    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let env_filter =
        tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let file_layer = log_dir.and_then(|dir| {
        std::fs::create_dir_all(dir).ok()?;
        let file_appender = tracing_appender::rolling::daily(dir, "vidlens.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let _ = LOG_GUARD.set(guard);
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
    });

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer);

    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_dir.as_deref());

    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Plan(args) => plan(args).await,
        Commands::CheckConfig { config } => check_config(&config),
        Commands::InitConfig => {
            println!("{}", PipelineConfig::default().to_json_pretty()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(seconds) = args.window_seconds {
        config.window_interval_seconds = seconds;
    }
    if let Some(keys) = args.key_range_size {
        config.key_range_size = keys;
    }
    if let Some(threshold) = args.confidence_threshold {
        config.confidence_threshold = threshold;
    }
    config.normalize();

    let mut service = GoogleCloudVideoService::new(&args.api_key)?;
    if let Some(url) = args.api_url {
        service = service.with_base_url(url);
    }
    if let Some(ms) = args.poll_interval_ms {
        service = service.with_poll_interval(Duration::from_millis(ms.max(1)));
    }

    let notification_sink =
        JsonlNotificationSink::open(&args.notifications_out, &config.notification_topic).await?;
    let table_sink = JsonlTableSink::new(&args.table_dir);

    let mut source: Box<dyn PayloadSource> = match (args.envelopes, args.dir) {
        (Some(path), _) => Box::new(EnvelopeFileSource::open(path).await?),
        (None, Some(dir)) => Box::new(DirectorySource::scan(dir, &args.glob)?),
        (None, None) => bail!("either --envelopes or --dir is required"),
    };

    let mut pipeline = Pipeline::new(
        config,
        Arc::new(service),
        Arc::new(notification_sink),
        Arc::new(table_sink),
        Arc::new(SystemClock),
    )?;

    if let Some(mut events) = pipeline.take_event_receiver() {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                log_event(&event);
            }
        });
    }

    let shutdown = Arc::new(Notify::new());
    let signal = Arc::clone(&shutdown);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            signal.notify_one();
        }
    });

    let report = pipeline.run(source.as_mut(), shutdown).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.is_success() {
        bail!(
            "{} batch(es) could not be written to the table sink",
            report.fatal_errors.len()
        );
    }
    Ok(())
}

fn log_event(event: &PipelineEvent) {
    match event {
        PipelineEvent::AnnotationFailed(failure) => warn!(
            "Segment {} of '{}' skipped after {} attempt(s)",
            failure.sequence_index, failure.routing_context, failure.attempts
        ),
        PipelineEvent::LateDataDropped {
            routing_context,
            sequence_index,
            ..
        } => info!(
            "Late result dropped for '{}' segment {}",
            routing_context, sequence_index
        ),
        PipelineEvent::BatchEmitted {
            routing_context,
            window_start_ms,
            results,
            ..
        } => info!(
            "Window {} for '{}' emitted with {} result(s)",
            window_start_ms, routing_context, results
        ),
        other => debug!("{:?}", other),
    }
}

async fn plan(args: PlanArgs) -> Result<()> {
    let bytes = tokio::fs::read(&args.input)
        .await
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let routing_context = args.routing_context.unwrap_or_else(|| {
        args.input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| args.input.display().to_string())
    });

    let segmenter = Segmenter::new(SegmenterConfig {
        chunk_size_bytes: args.chunk_size_bytes,
        key_range_size: args.key_range_size,
    })?;
    let payload = VideoPayload::new(routing_context, bytes, SystemClock.now());
    let plan = segmenter.plan(&payload)?;

    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

fn check_config(path: &Path) -> Result<()> {
    let config = PipelineConfig::load(path)
        .with_context(|| format!("Failed to load config {}", path.display()))?;
    config.validate()?;
    for warning in config.warnings() {
        eprintln!("warning: {}", warning);
    }
    println!("{}", config.to_json_pretty()?);
    Ok(())
}
