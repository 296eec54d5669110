mod config;

use clap::{Args, Parser};
use config::{CommonConfig, Config, LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
enum CliCommand {
    /// Serve the sponsorship API
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    #[arg(long)]
    config_file_path: PathBuf,
}

fn main() {
    let cli = CliCommand::parse();

    match cli {
        CliCommand::Run(args) => {
            let config = match Config::from_file(&args.config_file_path) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("{e}");
                    process::exit(1);
                }
            };

            let _sentry = init_logging(config.common.logging.as_ref());
            if let Err(e) = init_metrics(&config.common) {
                tracing::error!(error = %e, "Could not set up metrics");
                process::exit(1);
            }

            tracing::info!("Starting urwaldpate");
            if let Err(e) = run(config.sponsorship) {
                tracing::error!(error = %e, "Service failed");
                process::exit(1);
            }
        }
    }
}

fn run(config: sponsorship::config::Config) -> Result<(), sponsorship::SponsorshipError> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.block_on(sponsorship::run(config))
}

fn init_logging(config: Option<&LoggingConfig>) -> Option<sentry::ClientInitGuard> {
    let guard = config.map(|logging| {
        sentry::init((
            logging.sentry_dsn.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(guard.as_ref().map(|_| sentry::integrations::tracing::layer()))
        .init();

    guard
}

#[derive(thiserror::Error, Debug)]
enum MetricsError {
    #[error("could not build statsd recorder: {0}")]
    Statsd(#[from] metrics_exporter_statsd::StatsdError),
    #[error("a metrics recorder is already installed")]
    AlreadyInstalled,
}

fn init_metrics(config: &CommonConfig) -> Result<(), MetricsError> {
    let Some(MetricsConfig {
        statsd_host,
        statsd_port,
    }) = &config.metrics
    else {
        return Ok(());
    };

    let recorder = StatsdBuilder::from(statsd_host.as_str(), *statsd_port).build(Some("urwaldpate"))?;
    metrics::set_global_recorder(recorder).map_err(|_| MetricsError::AlreadyInstalled)?;
    shared::metrics_defs::describe_all(sponsorship::metrics_defs::ALL_METRICS);

    tracing::info!(host = %statsd_host, port = statsd_port, "Sending metrics to statsd");
    Ok(())
}
