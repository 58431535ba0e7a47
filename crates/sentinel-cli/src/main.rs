use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sentinel_client_core::{
    CorrelationId, OperationContext, RequestMode, SafeClient, SentinelConfig,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sentinel-safe")]
#[command(about = "Fetch secrets from VSecM Safe over SPIFFE mTLS", long_about = None)]
#[command(version)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the secrets registered in the Safe
    Get {
        /// Show secret values instead of redacting them
        #[arg(long)]
        reveal: bool,

        /// Correlation id for log lines (random if omitted)
        #[arg(long)]
        correlation_id: Option<String>,

        /// Whole-operation timeout, overriding VSECM_SENTINEL_TIMEOUT_MS
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Get {
            reveal,
            correlation_id,
            timeout_ms,
        } => get(reveal, correlation_id, timeout_ms).await,
    }
}

async fn get(reveal: bool, correlation_id: Option<String>, timeout_ms: Option<u64>) -> Result<()> {
    let config = SentinelConfig::from_env().context("loading configuration")?;

    let timeout = match timeout_ms {
        Some(0) => anyhow::bail!("--timeout-ms must be greater than zero"),
        Some(ms) => Duration::from_millis(ms),
        None => config.timeout,
    };
    let correlation_id = correlation_id
        .map(CorrelationId::new)
        .unwrap_or_else(CorrelationId::generate);
    let (ctx, cancel) = OperationContext::new(correlation_id)
        .with_timeout(timeout)
        .cancellable();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let mode = if reveal {
        RequestMode::Revealed
    } else {
        RequestMode::Redacted
    };

    info!(
        correlation_id = %ctx.correlation_id(),
        workload_api = %config.workload_api,
        safe = %config.safe_endpoint,
        "sentinel starting"
    );

    let client = SafeClient::from_config(&config);
    let body = match client.get_secrets(&ctx, mode).await {
        Ok(body) => body,
        Err(err) => {
            error!(
                correlation_id = %err.correlation_id(),
                category = %err.category(),
                "{err}"
            );
            return Err(err.into());
        }
    };

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(b"\n")?;
    stdout.write_all(&body)?;
    stdout.write_all(b"\n\n")?;
    stdout.flush()?;
    Ok(())
}
