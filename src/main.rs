mod cli;

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;

use pipechain::config::ChainConfig;
use pipechain::{ExitPolicy, FAILURE_CODE, PipelineError};

use cli::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_logging(&cli) {
        eprintln!("pipechain: {:#}", e);
        return ExitCode::from(FAILURE_CODE as u8);
    }

    match run(&cli) {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            eprintln!("pipechain: {:#}", e);
            let code = e
                .downcast_ref::<PipelineError>()
                .map(PipelineError::exit_code)
                .unwrap_or(FAILURE_CODE);
            ExitCode::from(code as u8)
        }
    }
}

fn run(cli: &Cli) -> Result<i32> {
    let pattern = cli
        .pattern
        .as_ref()
        .ok_or_else(|| PipelineError::configuration("missing required PATTERN argument"))?;

    let config = match &cli.config {
        Some(path) => ChainConfig::load(path)?,
        None => ChainConfig::default(),
    };
    debug!(?config, "loaded stage commands");

    let mut pipeline = config.pipeline(pattern);
    if cli.strict {
        pipeline = pipeline.policy(ExitPolicy::Strict);
    }
    if let Some(secs) = cli.timeout {
        let timeout = Duration::try_from_secs_f64(secs)
            .ok()
            .context("--timeout must be a non-negative number of seconds")?;
        pipeline = pipeline.timeout(timeout);
    }

    let outcome = pipeline.run()?;
    debug!(%outcome, "stage statuses");
    Ok(outcome.exit_code())
}

/// Logs go to stderr; stdout belongs to the last stage.
fn init_logging(cli: &Cli) -> Result<()> {
    use tracing_subscriber::EnvFilter;

    let filter = if cli.quiet {
        EnvFilter::new("error")
    } else {
        match cli.verbose {
            0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))
}
