//! Deposit Scanner CLI
//!
//! Confirmation-lagged deposit detection for a single EVM address.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use deposit_scanner::{
    chain::{HeadSubscription, JsonRpcChainClient, TimeoutChainClient},
    config::ScannerConfig,
    cursor::{CursorFile, FileCursorStore},
    matcher::{MatcherSet, NativeTransferMatcher},
    output::create_sink,
    scan_loop::{IterationOutcome, ScanLoop},
};

/// Delay between WebSocket reconnection attempts.
const HEAD_RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "deposit-scanner")]
#[command(about = "Confirmation-lagged deposit scanner for EVM-compatible chains")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "scanner.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scanner in continuous mode
    Scan {
        /// Start from a specific block height (overrides saved cursor).
        /// Block 0 carries no transactions, so the lowest start is 1.
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        from_height: Option<u64>,

        /// Run a single iteration and exit
        #[arg(long)]
        once: bool,
    },

    /// Show the persisted cursor
    Status,

    /// Validate configuration file
    ValidateConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    let config = match ScannerConfig::from_file(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            if matches!(cli.command, Commands::ValidateConfig) {
                eprintln!("Configuration validation failed: {}", e);
                std::process::exit(1);
            }
            anyhow::bail!("Failed to load config from {:?}: {}", cli.config, e);
        }
    };

    match cli.command {
        Commands::Scan { from_height, once } => run_scanner(&config, from_height, once).await,
        Commands::Status => show_status(&config),
        Commands::ValidateConfig => {
            println!("Configuration is valid.");
            println!("  RPC endpoint: {}", config.rpc_endpoint);
            if let Some(ws) = &config.ws_endpoint {
                println!("  WebSocket endpoint: {}", ws);
            }
            println!("  Target address: {}", config.target_address);
            println!("  Required confirmations: {}", config.required_confirmations);
            println!("  Poll interval: {:?}", config.poll_interval());
            println!("  Output mode: {:?}", config.output_mode);
            Ok(())
        }
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}

async fn run_scanner(config: &ScannerConfig, from_height: Option<u64>, once: bool) -> Result<()> {
    tracing::info!("Starting deposit scanner for {}", config.target_address);

    let rpc = JsonRpcChainClient::new(config.rpc_endpoint.as_str())
        .context("Failed to create RPC client")?;
    let client = Arc::new(TimeoutChainClient::new(rpc, config.rpc_timeout()));

    let sink = create_sink(
        &config.output_mode,
        config.webhook_url.as_deref(),
        config.pretty_output,
    )?;

    let matchers = MatcherSet::new().with(NativeTransferMatcher::new(&config.target_address));

    let mut scan_loop = ScanLoop::new(
        client,
        Arc::new(FileCursorStore::new(&config.state_file)),
        Arc::from(sink),
        matchers,
        config.confirmation_policy()?,
        config.poll_interval(),
    );

    if let Some(height) = from_height {
        tracing::info!("Starting from specified height: {}", height);
        scan_loop = scan_loop.with_start_height(height);
    }

    let cancel = CancellationToken::new();

    if once {
        let outcome = scan_loop.run_iteration(&cancel).await?;
        match outcome {
            IterationOutcome::Seeded { height } => {
                tracing::info!("Cursor initialized at height {}", height)
            }
            IterationOutcome::UpToDate { current_height, .. } => {
                tracing::info!("Up to date at chain height {}", current_height)
            }
            IterationOutcome::Scanned(summary) => {
                tracing::info!(
                    "Scanned {}..={}, {} deposits",
                    summary.start_height,
                    summary.end_height,
                    summary.deposits_found
                )
            }
        }
        tracing::info!("Single scan complete, exiting");
        return Ok(());
    }

    let mut head_task = None;
    if let Some(ws) = &config.ws_endpoint {
        let (heads, handle) =
            HeadSubscription::new(ws.as_str(), HEAD_RECONNECT_DELAY).spawn(cancel.clone());
        scan_loop = scan_loop.with_head_notifications(heads);
        head_task = Some(handle);
    }

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received Ctrl-C, shutting down");
                shutdown.cancel();
            }
            Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    let stats = scan_loop.run(cancel).await;

    if let Some(handle) = head_task {
        if let Err(e) = handle.await {
            tracing::warn!("Head subscription task failed: {}", e);
        }
    }

    tracing::info!(
        "Scanner stopped after {} iterations, {} deposits emitted",
        stats.iterations,
        stats.deposits_emitted
    );

    Ok(())
}

fn show_status(config: &ScannerConfig) -> Result<()> {
    match CursorFile::read(&config.state_file)? {
        Some(cursor) => println!("{}", cursor.summary()),
        None => println!(
            "No cursor saved at {:?}; the next scan starts at the chain tip.",
            config.state_file
        ),
    }
    Ok(())
}
