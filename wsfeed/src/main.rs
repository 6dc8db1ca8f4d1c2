mod config;

use clap::{Parser, Subcommand};
use config::{Config, LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::{StatsdBuilder, StatsdError};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(version, about = "Ingests WebSocket feeds and publishes them as events")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run the service
    Serve {
        #[arg(long, short)]
        config: PathBuf,
    },
    /// Load and validate a config file, then exit
    CheckConfig {
        #[arg(long, short)]
        config: PathBuf,
    },
}

#[derive(thiserror::Error, Debug)]
enum MetricsError {
    #[error("could not build statsd recorder: {0}")]
    Statsd(#[from] StatsdError),
    #[error("a metrics recorder is already installed")]
    AlreadyInstalled,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match &cli.command {
        CliCommand::CheckConfig { config } => match Config::from_file(config) {
            Ok(config) => {
                println!(
                    "Config ok, replica {}",
                    config.feeds.replica.resolve_index().unwrap_or_default()
                );
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{e}");
                ExitCode::FAILURE
            }
        },
        CliCommand::Serve { config } => serve(config),
    }
}

fn serve(path: &std::path::Path) -> ExitCode {
    let config = match Config::from_file(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    // Sentry must be set up before the runtime starts its threads.
    let _sentry = init_logging(&config.common.logging);

    if let Some(metrics) = &config.common.metrics {
        if let Err(e) = init_metrics(metrics) {
            tracing::error!(error = %e, "Could not set up metrics");
            return ExitCode::FAILURE;
        }
    }

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "Could not start the runtime");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!("Starting wsfeed");
    match rt.block_on(feeds::run(config.feeds)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "wsfeed stopped");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(config: &LoggingConfig) -> Option<sentry::ClientInitGuard> {
    let guard = config.sentry_dsn.as_deref().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                environment: config.sentry_environment.clone().map(Into::into),
                ..Default::default()
            },
        ))
    });

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let sentry_layer = guard
        .is_some()
        .then(|| sentry::integrations::tracing::layer());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_layer)
        .init();

    guard
}

fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    let recorder = StatsdBuilder::from(config.statsd_host.as_str(), config.statsd_port)
        .build(Some(&config.prefix))?;
    metrics::set_global_recorder(recorder).map_err(|_| MetricsError::AlreadyInstalled)?;
    shared::metrics_defs::describe_all(feeds::metrics_defs::ALL_METRICS);
    Ok(())
}
