mod config;

use clap::{Parser, Subcommand};
use config::{Config, ConfigError, MetricsConfig};
use latest_builds::aggregator::AggregateError;
use latest_builds::metrics_defs::{ALL_METRICS, MetricType};
use latest_builds::{ServiceError, generate_latest_builds_json};
use metrics_exporter_statsd::StatsdBuilder;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(about = "Serves the latest SQL Server build of every version")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run the refresh worker and the HTTP API
    Serve {
        #[arg(long)]
        config: PathBuf,
    },
    /// Run a single refresh and exit
    Refresh {
        #[arg(long)]
        config: PathBuf,
    },
    /// Print the latest builds document for a local CSV file
    Aggregate {
        input: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not set up metrics: {0}")]
    Metrics(String),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        CliCommand::Serve { config } => with_config(&config, |config| async move {
            latest_builds::run(config).await?;
            Ok(())
        }),
        CliCommand::Refresh { config } => with_config(&config, |config| async move {
            let report = latest_builds::refresh_once(config).await?;
            tracing::info!(?report, "refresh complete");
            Ok(())
        }),
        CliCommand::Aggregate { input, output } => {
            init_logging(false);
            aggregate_file(&input, output.as_deref())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "exiting");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Loads the config file, sets up logging, error reporting and metrics, then
/// runs `f` to completion on a fresh runtime.
fn with_config<F, Fut>(path: &Path, f: F) -> Result<(), CliError>
where
    F: FnOnce(latest_builds::config::Config) -> Fut,
    Fut: Future<Output = Result<(), CliError>>,
{
    let config = Config::from_file(path)?;

    // Keep the guard alive so queued events are flushed on exit.
    let sentry_guard = config.sentry_dsn().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });
    init_logging(sentry_guard.is_some());

    if let Some(metrics) = &config.common.metrics {
        init_metrics(metrics)?;
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.block_on(f(config.service))
}

fn init_logging(with_sentry: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let sentry_layer = with_sentry.then(sentry::integrations::tracing::layer);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(sentry_layer)
        .init();
}

fn init_metrics(config: &MetricsConfig) -> Result<(), CliError> {
    let recorder = StatsdBuilder::from(config.statsd_host.as_str(), config.statsd_port)
        .build(Some(&config.prefix))
        .map_err(|e| CliError::Metrics(e.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|e| CliError::Metrics(e.to_string()))?;

    for def in ALL_METRICS {
        match def.metric_type {
            MetricType::Counter => metrics::describe_counter!(def.name, def.description),
            MetricType::Gauge => metrics::describe_gauge!(def.name, def.description),
            MetricType::Histogram => metrics::describe_histogram!(def.name, def.description),
        }
    }
    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        "sending metrics to statsd"
    );
    Ok(())
}

fn aggregate_file(input: &Path, output: Option<&Path>) -> Result<(), CliError> {
    let csv = std::fs::read(input)?;
    let json = generate_latest_builds_json(&csv)?;

    match output {
        Some(path) => std::fs::write(path, json)?,
        None => println!("{json}"),
    }
    Ok(())
}
