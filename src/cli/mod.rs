// CLI module - User-facing command-line interface

mod output;

pub use output::print_error;

use crate::config::PipelineConfig;
use crate::dashboard::Dashboard;
use crate::health::HealthPoller;
use crate::logs;
use crate::process::Launcher;
use crate::shutdown::{self, wait_for_shutdown};
use crate::supervisor::{check_all, Supervision, Supervisor};
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Stagehand - launches, supervises and monitors a pipeline of HTTP services
#[derive(Parser)]
#[command(name = "stagehand")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch every service in order, supervise them and show the dashboard
    Run {
        /// Pipeline configuration file (.toml or .json)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Log to stderr instead of drawing the dashboard
        #[arg(long)]
        no_dashboard: bool,
    },

    /// Show the dashboard for services that are already running
    Monitor {
        /// Pipeline configuration file (.toml or .json)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Poll every service once and print a table
    Status {
        /// Pipeline configuration file (.toml or .json)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print the statuses as JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Concatenate every service log file into one
    Logs {
        /// Pipeline configuration file (.toml or .json)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Combined file (default: stagehand-logs-combined.txt in the log directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Delete the source files once the combined file is written
        #[arg(long)]
        remove: bool,
    },

    /// Print the effective configuration
    Config {
        /// Pipeline configuration file (.toml or .json)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

impl Cli {
    /// Execute the parsed command; returns the process exit code
    pub async fn execute(self) -> anyhow::Result<i32> {
        match self.command {
            Commands::Run {
                config,
                no_dashboard,
            } => {
                let config = load_config(config.as_deref())?;
                init_logging(&config, !no_dashboard)?;
                run_pipeline(config, !no_dashboard).await?;
                Ok(0)
            }
            Commands::Monitor { config } => {
                let config = load_config(config.as_deref())?;
                init_logging(&config, true)?;
                monitor(config).await?;
                Ok(0)
            }
            Commands::Status { config, json } => {
                let config = load_config(config.as_deref())?;
                init_logging(&config, false)?;
                status(config, json).await
            }
            Commands::Logs {
                config,
                output,
                remove,
            } => {
                let config = load_config(config.as_deref())?;
                consolidate_logs(&config, output, remove).await?;
                Ok(0)
            }
            Commands::Config { config } => {
                let config = load_config(config.as_deref())?;
                print!("{}", config.to_toml()?);
                Ok(0)
            }
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    PipelineConfig::load(path).context("Failed to load pipeline configuration")
}

/// Logs go to `stagehand-<ts>.log` under the log directory while the dashboard
/// owns the terminal, to stderr otherwise
fn init_logging(config: &PipelineConfig, to_file: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if to_file {
        std::fs::create_dir_all(&config.log_dir).with_context(|| {
            format!("Failed to create log directory {}", config.log_dir.display())
        })?;
        let path = config.log_dir.join(format!(
            "stagehand-{}.log",
            chrono::Local::now().format("%Y%m%d_%H%M%S")
        ));
        let file = File::create(&path)
            .with_context(|| format!("Failed to create log file {}", path.display()))?;

        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
    }

    Ok(())
}

async fn run_pipeline(config: PipelineConfig, with_dashboard: bool) -> anyhow::Result<()> {
    let specs = config.specs();
    let poller = HealthPoller::new(config.retry_policy());
    let launcher = Launcher::new(config.launch_config()).with_log_dir(&config.log_dir);
    let mut shutdown_rx = shutdown::listen();

    tracing::info!(services = specs.len(), "Launching pipeline");
    let pb = output::create_progress_bar(&format!("Launching {} service(s)...", specs.len()));

    let mut handles = match launcher.launch_all(&specs, &mut shutdown_rx).await {
        Ok(handles) => handles,
        Err(e) => {
            output::finish_progress_error(pb, "Launch failed");
            return Err(e).context("Failed to launch the first service");
        }
    };

    if *shutdown_rx.borrow() {
        output::finish_progress_error(pb, "Launch interrupted");
        launcher.stop_all(&mut handles).await;
        return Ok(());
    }
    output::finish_progress_success(pb, "Services launched");

    let supervisor = Supervisor::new(config.supervisor_config(), poller, launcher);
    let supervision = supervisor.supervise(handles, shutdown_rx.clone())?;

    run_until_shutdown(supervision, &config, with_dashboard, shutdown_rx).await;
    output::print_success_msg("Pipeline stopped");
    Ok(())
}

async fn monitor(config: PipelineConfig) -> anyhow::Result<()> {
    let specs = config.specs();
    let poller = HealthPoller::new(config.retry_policy());
    let launcher = Launcher::new(config.launch_config());
    let shutdown_rx = shutdown::listen();

    let supervisor = Supervisor::new(config.supervisor_config(), poller, launcher);
    let supervision = supervisor.observe(&specs, shutdown_rx.clone())?;

    run_until_shutdown(supervision, &config, true, shutdown_rx).await;
    Ok(())
}

async fn run_until_shutdown(
    supervision: Supervision,
    config: &PipelineConfig,
    with_dashboard: bool,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let dashboard = with_dashboard.then(|| {
        let dashboard = Dashboard::new(
            supervision.board().clone(),
            Duration::from_millis(config.dashboard.refresh_ms),
            config.dashboard.max_metrics,
        );
        tokio::spawn(dashboard.run(shutdown_rx.clone()))
    });

    wait_for_shutdown(&mut shutdown_rx).await;
    tracing::info!("Shutting down");

    if let Some(dashboard) = dashboard {
        let _ = dashboard.await;
    }
    supervision.finish().await;
}

async fn status(config: PipelineConfig, json: bool) -> anyhow::Result<i32> {
    let specs = config.specs();
    let poller = HealthPoller::new(config.retry_policy());

    let pb = (!json)
        .then(|| output::create_progress_bar(&format!("Polling {} service(s)...", specs.len())));
    let statuses = check_all(&specs, &poller).await;
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&statuses).context("Failed to encode statuses")?
        );
    } else {
        output::print_status_report(&statuses, config.dashboard.max_metrics);
    }

    if statuses.iter().all(|s| s.health.is_online()) {
        Ok(0)
    } else {
        if !json {
            output::print_info("Some services are not online");
        }
        Ok(1)
    }
}

async fn consolidate_logs(
    config: &PipelineConfig,
    target: Option<PathBuf>,
    remove: bool,
) -> anyhow::Result<()> {
    let target = target.unwrap_or_else(|| config.log_dir.join(logs::COMBINED_LOG_NAME));
    let files = logs::consolidate(&config.log_dir, &target, remove)
        .await
        .context("Failed to consolidate logs")?;

    if files.is_empty() {
        output::print_info(&format!(
            "No log files found in {}",
            config.log_dir.display()
        ));
    } else {
        output::print_success_msg(&format!(
            "Combined {} log file(s) into {}",
            files.len(),
            target.display()
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from(["stagehand", "run", "--config", "p.toml", "--no-dashboard"])
            .unwrap();
        match cli.command {
            Commands::Run {
                config,
                no_dashboard,
            } => {
                assert_eq!(config, Some(PathBuf::from("p.toml")));
                assert!(no_dashboard);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_status_without_config() {
        let cli = Cli::try_parse_from(["stagehand", "status"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Status {
                config: None,
                json: false
            }
        ));
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert!(Cli::try_parse_from(["stagehand", "explode"]).is_err());
    }

    #[test]
    fn test_parse_logs_flags() {
        let cli =
            Cli::try_parse_from(["stagehand", "logs", "-o", "all.txt", "--remove"]).unwrap();
        match cli.command {
            Commands::Logs {
                config,
                output,
                remove,
            } => {
                assert!(config.is_none());
                assert_eq!(output, Some(PathBuf::from("all.txt")));
                assert!(remove);
            }
            _ => panic!("expected logs"),
        }
    }
}
