use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::future::join_all;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crpt_client::api::{CrptApi, Document, DryRunSubmitter, HttpSubmitter, Submitter};
use crpt_client::config::{ClientConfig, TimeUnit};

/// Submit documents to the CRPT registration API under a rate limit.
#[derive(Parser, Debug)]
#[command(name = "crpt-client", version, about)]
struct Args {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of documents to submit concurrently
    #[arg(long, default_value_t = 10)]
    requests: usize,

    /// Override the number of submissions allowed per window
    #[arg(long)]
    request_limit: Option<usize>,

    /// Override the window length
    #[arg(long, value_enum)]
    time_unit: Option<TimeUnit>,

    /// Do not contact the endpoint
    #[arg(long)]
    dry_run: bool,

    /// Simulated endpoint latency for dry runs, in milliseconds
    #[arg(long, default_value_t = 100)]
    latency_ms: u64,

    #[arg(long, default_value = "signature")]
    signature: String,

    #[arg(long, default_value = "token")]
    token: String,

    #[arg(long, default_value = "pg")]
    product_group: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting CRPT client");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = ClientConfig::load(args.config.as_deref())?;
    if let Some(limit) = args.request_limit {
        config.throttle.request_limit = limit;
    }
    if let Some(unit) = args.time_unit {
        config.throttle.time_unit = unit;
    }
    config.validate()?;
    info!(
        url = %config.api.create_url(),
        request_limit = config.throttle.request_limit,
        time_unit = ?config.throttle.time_unit,
        "Configuration loaded"
    );

    if args.dry_run {
        let submitter = DryRunSubmitter::new(Duration::from_millis(args.latency_ms));
        run(CrptApi::with_submitter(&config, submitter)?, &args).await
    } else {
        let submitter = HttpSubmitter::new(&config.api)?;
        run(CrptApi::with_submitter(&config, submitter)?, &args).await
    }
}

/// Submit `args.requests` documents concurrently, then close the client.
async fn run<S: Submitter + 'static>(api: CrptApi<S>, args: &Args) -> anyhow::Result<()> {
    let api = Arc::new(api);

    let handles: Vec<_> = (0..args.requests)
        .map(|i| {
            let api = Arc::clone(&api);
            let signature = args.signature.clone();
            let token = args.token.clone();
            let product_group = args.product_group.clone();
            tokio::spawn(async move {
                let result = api
                    .create_document(&Document::default(), &signature, &token, &product_group)
                    .await;
                (i, result)
            })
        })
        .collect();

    let submissions = join_all(handles);
    tokio::pin!(submissions);

    let results = tokio::select! {
        results = &mut submissions => results,
        _ = shutdown_signal() => {
            // Waiters fail fast once the gate is closing
            if let Err(e) = api.close().await {
                warn!(error = %e, "Client closed with errors");
            }
            submissions.await
        }
    };

    let mut failed = 0;
    for joined in results {
        match joined {
            Ok((i, Ok(response))) => info!(request = i, status = response.status, "Success"),
            Ok((i, Err(e))) => {
                failed += 1;
                error!(request = i, error = %e, "Submission failed");
            }
            Err(e) => {
                failed += 1;
                error!(error = %e, "Submission task panicked");
            }
        }
    }

    api.close().await?;
    info!(
        submitted = args.requests - failed,
        failed, "CRPT client stopped"
    );
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, closing client");
        }
        _ = terminate => {
            info!("Received SIGTERM, closing client");
        }
    }
}
