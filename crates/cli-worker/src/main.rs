//! CLI entry point for the transcode worker.
//!
//! Loads configuration, runs startup checks, wires the configured queue and
//! bus backings, starts the metrics server, and runs the worker loop until
//! the queue is interrupted or a claimed job fails fatally.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use transcode_config::{Config, QueueBackend};
use transcode_core::queue::{PersistentQueue, VolatileQueue};
use transcode_core::{
    new_shared_metrics, run_metrics_server, validate_envelope, JobBus, JobQueue, MqttBus, Worker,
};

/// Transcode worker: claims jobs off the queue and encodes them.
#[derive(Parser, Debug)]
#[command(name = "transcode-worker")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (config.toml)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Optional KEY=VALUE seed file consumed before environment overrides
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Skip startup checks (ffmpeg/ffprobe/render-node). For testing only.
    #[arg(long, default_value = "false")]
    skip_checks: bool,

    /// Port the metrics HTTP server listens on
    #[arg(long, default_value = "7878")]
    metrics_port: u16,

    /// MQTT client id
    #[arg(long, default_value = "transcode-worker")]
    client_id: String,
}

enum RunOutcome {
    Interrupted,
}

const BROKER_CONNECT_RETRIES: u32 = 5;

/// Connect to the broker, retrying with a short fixed backoff before giving
/// up (§4.2 "broker unavailability during publish causes a bounded retry
/// loop at startup").
async fn connect_with_retry(config: &transcode_config::BrokerConfig, client_id: &str) -> anyhow::Result<MqttBus> {
    let mut last_err = None;
    for attempt in 1..=BROKER_CONNECT_RETRIES {
        match MqttBus::connect(config, client_id).await {
            Ok(bus) => return Ok(bus),
            Err(err) => {
                tracing::warn!(attempt, error = %err, "broker connect failed, retrying");
                last_err = Some(err);
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
    Err(anyhow::anyhow!(last_err.unwrap()))
}

/// Subscribe to the jobs topic and hand validated envelopes to the queue.
/// Runs concurrently with the worker's consumer loop (§5 "two cooperating
/// flows"); a rejected payload is logged and dropped, never enqueued.
async fn spawn_intake(bus: Arc<dyn JobBus>, queue: Arc<dyn JobQueue>, config: &Config) -> anyhow::Result<()> {
    let topic = config.broker.topic_jobs.clone();
    let series_subpath = config.paths.series_subpath.to_string_lossy().to_string();
    let movie_subpath = config.paths.movie_subpath.to_string_lossy().to_string();

    let mut rx = bus.subscribe(&topic).await?;
    tokio::spawn(async move {
        while let Some(raw) = rx.recv().await {
            match validate_envelope(&raw, &series_subpath, &movie_subpath) {
                Ok(envelope) => {
                    if let Err(err) = queue.put(envelope).await {
                        tracing::warn!(error = %err, "failed to enqueue accepted envelope");
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "rejected job envelope");
                }
            }
        }
    });
    Ok(())
}

async fn run(args: Args) -> anyhow::Result<Result<(), RunOutcome>> {
    let config = Config::load(&args.config, args.env_file.as_deref())?;

    if !args.skip_checks {
        let hw_enabled = config.encoder.max_hw_retries > 0;
        transcode_core::worker::startup::run_startup_checks(hw_enabled, &config.encoder.render_node)?;
    } else {
        tracing::warn!("skipping startup checks (--skip-checks enabled)");
    }

    let bus: Arc<dyn JobBus> = Arc::new(connect_with_retry(&config.broker, &args.client_id).await?);
    let queue: Arc<dyn JobQueue> = match config.queue.backend {
        QueueBackend::Volatile => Arc::new(VolatileQueue::new()),
        QueueBackend::Persistent => Arc::new(PersistentQueue::open(
            &config.queue.db_path,
            Duration::from_secs(config.queue.poll_interval_secs),
            Duration::from_secs(config.queue.claim_ttl_secs),
        )?),
    };

    spawn_intake(bus.clone(), queue.clone(), &config).await?;

    let metrics = new_shared_metrics();
    let metrics_for_server = metrics.clone();
    let metrics_port = args.metrics_port;
    tokio::spawn(async move {
        if let Err(err) = run_metrics_server(metrics_for_server, metrics_port).await {
            tracing::warn!(error = %err, "metrics server exited");
        }
    });

    let mut worker = Worker::new(queue, bus, config, metrics)?;

    tokio::select! {
        result = worker.run() => result.map(|()| Ok(())).map_err(anyhow::Error::from),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received interrupt, shutting down");
            Ok(Err(RunOutcome::Interrupted))
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "transcode_worker_cli=info,transcode_core=info".into()),
        )
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(RunOutcome::Interrupted)) => ExitCode::from(130),
        Err(err) => {
            eprintln!("transcode-worker: {err}");
            ExitCode::FAILURE
        }
    }
}
