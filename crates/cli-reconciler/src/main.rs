//! CLI entry point for the one-shot library reconciler.
//!
//! Diffs the source and destination trees, republishing envelopes for any
//! file whose transcoded output is missing.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use transcode_config::{BrokerConfig, Config};
use transcode_core::{reconcile, MqttBus};

/// Reconcile the destination library against the source trees.
#[derive(Parser, Debug)]
#[command(name = "transcode-reconciler")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (config.toml)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Optional KEY=VALUE seed file consumed before environment overrides
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Compute and print envelopes without publishing them
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// MQTT client id
    #[arg(long, default_value = "transcode-reconciler")]
    client_id: String,
}

const BROKER_CONNECT_RETRIES: u32 = 5;

/// Connect to the broker, retrying with a short fixed backoff before giving
/// up (§4.2 "broker unavailability during publish causes a bounded retry
/// loop at startup"). Skipped entirely in dry-run mode, which never opens a
/// connection (§4.4 "Dry-run mode").
async fn connect_with_retry(config: &BrokerConfig, client_id: &str) -> anyhow::Result<MqttBus> {
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

fn print_report(report: &transcode_core::ReconcilerReport, dry_run: bool) {
    println!(
        "{} envelope(s), {} file(s){}, {} skipped on probe failure",
        report.envelopes.len(),
        report.published_files(),
        if dry_run { " (dry run, not published)" } else { "" },
        report.skipped_probe_failures,
    );
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = Config::load(&args.config, args.env_file.as_deref())?;

    let report = if args.dry_run {
        let bus = transcode_core::InMemoryBus::new();
        reconcile(&config, &bus, true).await?
    } else {
        let bus = connect_with_retry(&config.broker, &args.client_id).await?;
        reconcile(&config, &bus, false).await?
    };

    print_report(&report, args.dry_run);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "transcode_reconciler_cli=info,transcode_core=info".into()),
        )
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("transcode-reconciler: {err}");
            ExitCode::FAILURE
        }
    }
}
