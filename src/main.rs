use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use tracing_subscriber::EnvFilter;

use batch_validate_xml::cli::{Cli, VerbosityLevel};
use batch_validate_xml::config::ConfigManager;
use batch_validate_xml::output::Output;
use batch_validate_xml::progress::CancellationToken;
use batch_validate_xml::runner::{BatchRunner, RunOutcome};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse_args();
    cli.validate().map_err(|e| anyhow!(e))?;

    let config = ConfigManager::load_config(&cli)
        .await
        .context("Failed to load configuration")?;
    let verbosity = config.verbosity();
    init_tracing(verbosity);

    let batch = config.to_batch_config(cli.root.clone())?;
    tracing::debug!(?batch, "Resolved batch configuration");

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling run");
            interrupt.cancel();
        }
    });

    let runner = BatchRunner::new()
        .with_observer(Arc::new(Output::new(verbosity)))
        .with_cancellation(cancel);
    let outcome = runner.run_batch(batch).await;

    print!("{}", Output::new(verbosity).format_outcome(&outcome));

    Ok(match outcome {
        RunOutcome::Completed { summary, .. } if summary.all_valid() => ExitCode::SUCCESS,
        RunOutcome::Completed { .. } => ExitCode::from(1),
        RunOutcome::Failed(_) => ExitCode::from(2),
    })
}

fn init_tracing(verbosity: VerbosityLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.log_directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
