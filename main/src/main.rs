//! `sondera` CLI: run a declarative retrieval-evaluation configuration.

mod runner;

use std::path::Path;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tokio::runtime::Builder;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use common::config::RunConfig;

#[derive(Debug, Parser)]
#[command(name = "sondera", about = "Run a retrieval evaluation from a YAML configuration")]
struct Args {
    /// Path to the run configuration.
    #[arg(long, short, default_value = "configs/test.yml")]
    config: String,

    /// Short-circuit every external collaborator with deterministic mocks.
    #[arg(long)]
    dry_run: bool,
}

fn main() -> ExitCode {
    let runtime = match Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("failed to create tokio runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(async_main()) {
        Ok(code) => code,
        Err(err) => {
            error!(error = %err, "Run failed");
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn async_main() -> anyhow::Result<ExitCode> {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let _ = fmt()
        .with_env_filter(EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();

    let args = Args::parse();
    let dry_run = args.dry_run || env_dry_run();
    if dry_run {
        info!("Running in DRY RUN mode: mock responses, no external calls");
    }

    let config_path = Path::new(&args.config);
    if !config_path.exists() {
        anyhow::bail!("configuration file {} not found", args.config);
    }

    let config = RunConfig::from_yaml_file(config_path)
        .with_context(|| format!("loading configuration from {}", args.config))?;

    // Cooperative cancellation on Ctrl-C, honoured at every suspension point.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Cancellation requested");
            signal_cancel.cancel();
        }
    });

    match runner::execute(config, dry_run, cancel).await {
        Ok(outcome) => {
            if outcome.partial {
                println!(
                    "Run completed with {} recorded error(s); see logs for details.",
                    outcome.errors.len()
                );
            } else {
                println!(
                    "Run completed: {} documents, {} chunks, {} tests.",
                    outcome.documents, outcome.chunks, outcome.tests_run
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            error!(stage = err.stage, error = %err.source, "Stage failed");
            eprintln!("Error: {err}");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn env_dry_run() -> bool {
    std::env::var("DRY_RUN")
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(false)
}
