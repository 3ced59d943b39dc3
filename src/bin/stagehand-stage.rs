use clap::{Args, Parser, Subcommand};
use stagehand::health::RetryPolicy;
use stagehand::shutdown;
use stagehand::stages::{self, StageOptions};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Toy pipeline stage served over HTTP
#[derive(Parser)]
#[command(name = "stagehand-stage")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    stage: Stage,
}

#[derive(Subcommand)]
enum Stage {
    /// Generate fake records (GET /dados)
    Generate {
        #[command(flatten)]
        common: CommonArgs,

        /// Records produced per generation
        #[arg(long, env = "STAGE_BUFFER_SIZE", default_value = "1000")]
        buffer_size: usize,
    },

    /// Standardize the generator's numeric columns (GET /dados_normalizados)
    Normalize {
        #[command(flatten)]
        common: CommonArgs,

        /// Base URL of the generator
        #[arg(long, default_value = "http://127.0.0.1:8001")]
        upstream: String,
    },

    /// Fit a model on normalized records (POST /predict)
    Train {
        #[command(flatten)]
        common: CommonArgs,

        /// Base URL of the normalizer
        #[arg(long, default_value = "http://127.0.0.1:8002")]
        upstream: String,

        /// Directory trained models are written to
        #[arg(long, default_value = "modelos")]
        model_dir: PathBuf,
    },

    /// Request predictions from the trainer
    Consume {
        #[command(flatten)]
        common: CommonArgs,

        /// Base URL of the trainer
        #[arg(long, default_value = "http://127.0.0.1:8003")]
        upstream: String,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// Port to listen on
    #[arg(short, long)]
    port: u16,

    /// Seconds between two runs of the stage's periodic work
    #[arg(long, env = "STAGE_INTERVAL_SECS", default_value = "60")]
    interval_secs: u64,

    /// Attempts per upstream call
    #[arg(long, env = "STAGE_RETRY_ATTEMPTS", default_value = "3")]
    retry_attempts: u32,

    /// Seconds between failed upstream attempts
    #[arg(long, env = "STAGE_RETRY_DELAY_SECS", default_value = "5")]
    retry_delay_secs: u64,
}

impl CommonArgs {
    fn options(&self) -> StageOptions {
        StageOptions {
            port: self.port,
            interval: Duration::from_secs(self.interval_secs.max(1)),
            retry: RetryPolicy::new(
                self.retry_attempts.max(1),
                Duration::from_secs(self.retry_delay_secs),
                Duration::from_secs(5),
            ),
            ..StageOptions::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let shutdown = shutdown::shutdown_signal();

    match cli.stage {
        Stage::Generate {
            common,
            buffer_size,
        } => {
            let options = StageOptions {
                buffer_size,
                ..common.options()
            };
            tracing::info!(port = options.port, "Starting generator stage");
            stages::generator::run(options, shutdown).await?;
        }
        Stage::Normalize { common, upstream } => {
            let options = StageOptions {
                upstream: Some(upstream),
                ..common.options()
            };
            tracing::info!(port = options.port, "Starting normalizer stage");
            stages::normalizer::run(options, shutdown).await?;
        }
        Stage::Train {
            common,
            upstream,
            model_dir,
        } => {
            let options = StageOptions {
                upstream: Some(upstream),
                model_dir,
                ..common.options()
            };
            tracing::info!(port = options.port, "Starting trainer stage");
            stages::trainer::run(options, shutdown).await?;
        }
        Stage::Consume { common, upstream } => {
            let options = StageOptions {
                upstream: Some(upstream),
                ..common.options()
            };
            tracing::info!(port = options.port, "Starting consumer stage");
            stages::consumer::run(options, shutdown).await?;
        }
    }

    Ok(())
}
