mod config;

use checker::collector::{CheckResult, CheckStatus};
use checker::errors::CheckerError;
use checker::metrics_defs::ALL_METRICS;
use clap::{Parser, Subcommand};
use config::{Config, LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use shared::metrics_defs::describe_all;
use sources::siteinfo::{Siteinfo, SiteinfoError};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(about = "Checks switch configurations against their archived copies")]
struct Cli {
    #[arg(long, default_value = "/etc/switch-monitoring/config.yaml")]
    config_file_path: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Serve /v1/check for a metrics scraper
    Serve,
    /// Check one switch and print the exposition text
    Check {
        #[arg(long)]
        target: String,
    },
    /// Check every switch listed by siteinfo and print a summary
    CheckAll,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Checker(#[from] CheckerError),
    #[error("cannot fetch the switch list: {0}")]
    Siteinfo(#[from] SiteinfoError),
    #[error("cannot set up metrics: {0}")]
    Metrics(String),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::from_file(&cli.config_file_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {e}", cli.config_file_path.display());
            return ExitCode::FAILURE;
        }
    };

    let _sentry = init_logging(cli.debug, config.common.logging.as_ref());

    if let Some(metrics) = &config.common.metrics
        && let Err(e) = init_metrics(metrics)
    {
        tracing::error!(error = %e, "Continuing without statsd metrics");
    }

    match run(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "switch-monitoring failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: CliCommand, config: Config) -> Result<(), CliError> {
    match command {
        CliCommand::Serve => {
            tracing::info!(project = %config.checker.project, "Starting switch-monitoring");
            checker::run(config.checker).await?;
        }
        CliCommand::Check { target } => {
            let handler = checker::check_handler(&config.checker);
            let (_, body) = handler.check(&target).await?;
            print!("{body}");
        }
        CliCommand::CheckAll => {
            let siteinfo = match config.siteinfo.and_then(|s| s.base_url) {
                Some(base_url) => Siteinfo::with_base_url(base_url),
                None => Siteinfo::new(&config.checker.project),
            };

            tracing::info!(project = %config.checker.project, "Fetching switch hostnames");
            let switches = siteinfo.switches().await?;

            let handler = checker::check_handler(&config.checker);
            let results = checker::check_all(&handler, &switches).await;
            for result in &results {
                if result.status != CheckStatus::Ok {
                    tracing::warn!(target = %result.target, status = %result.status, "Check failed");
                }
            }

            for (status, count) in summarize(&results) {
                println!("{status}: {count}");
            }
        }
    }
    Ok(())
}

fn summarize(results: &[CheckResult]) -> BTreeMap<&'static str, usize> {
    let mut summary = BTreeMap::new();
    for result in results {
        *summary.entry(result.status.as_str()).or_insert(0) += 1;
    }
    summary
}

fn init_logging(
    debug: bool,
    logging: Option<&LoggingConfig>,
) -> Option<sentry::ClientInitGuard> {
    let sentry = logging.map(|logging| {
        sentry::init((
            logging.sentry_dsn.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            sentry
                .as_ref()
                .map(|_| sentry::integrations::tracing::layer()),
        )
        .init();

    sentry
}

fn init_metrics(config: &MetricsConfig) -> Result<(), CliError> {
    let recorder = StatsdBuilder::from(config.statsd_host.clone(), config.statsd_port)
        .build(Some(&config.prefix))
        .map_err(|e| CliError::Metrics(e.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|e| CliError::Metrics(e.to_string()))?;

    describe_all(ALL_METRICS);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize() {
        let result = |status| CheckResult {
            target: "s1.abc01.measurement-lab.org".into(),
            status,
        };
        let summary = summarize(&[
            result(CheckStatus::Ok),
            result(CheckStatus::ConfigMismatch),
            result(CheckStatus::Ok),
            result(CheckStatus::ConfigNotFoundSwitch),
        ]);

        assert_eq!(
            summary.into_iter().collect::<Vec<_>>(),
            vec![("config_mismatch", 1), ("config_not_found_switch", 1), ("ok", 2)]
        );
    }

    #[test]
    fn test_cli() {
        let cli = Cli::try_parse_from([
            "switch-monitoring",
            "--config-file-path",
            "/tmp/config.yaml",
            "--debug",
            "check",
            "--target",
            "s1.abc01.measurement-lab.org",
        ])
        .unwrap();

        assert!(cli.debug);
        assert_eq!(cli.config_file_path, PathBuf::from("/tmp/config.yaml"));
        assert!(matches!(
            cli.command,
            CliCommand::Check { ref target } if target == "s1.abc01.measurement-lab.org"
        ));

        assert!(Cli::try_parse_from(["switch-monitoring", "check"]).is_err());
        assert!(Cli::try_parse_from(["switch-monitoring", "check-all"]).is_ok());
    }
}
