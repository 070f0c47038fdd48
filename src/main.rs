//! Strike Engine
//!
//! Boots the orchestration engine for one treasury account:
//!
//! - **Configuration**: TOML file plus `.env` / environment overrides
//! - **Nonce**: eager resync with bounded exponential retry
//! - **Streaming**: supervised `newPendingTransactions` subscription feeding strikes
//! - **HTTP**: withdrawals, status, Prometheus metrics and health

use alloy::primitives::utils::parse_ether;
use alloy::primitives::Address;
use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use strike_engine::config::Config;
use strike_engine::endpoints::{self, AppState};
use strike_engine::nonce_manager::AccountNonceAllocator;
use strike_engine::orchestrator::{Orchestrator, OrchestratorSettings};
use strike_engine::rpc_manager::{EndpointKind, EndpointPool, HttpChainRpc};
use strike_engine::sniffer::{
    ExponentialBackoff, MinValuePredicate, SamplingFilter, StreamSupervisor, SupervisorConfig,
};
use strike_engine::submission::SubmissionPipeline;
use strike_engine::tx_builder::{FeeDefaults, TxBuilder};
use strike_engine::types::FeePolicy;
use strike_engine::wallet::SigningIdentity;
use strike_engine::LedgerTotals;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (optional; defaults apply when absent)
    #[arg(short, long, default_value = "engine.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Serve HTTP only; do not subscribe to pending transactions
    #[arg(long)]
    no_stream: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.log_json)?;

    info!("Starting Strike Engine v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_file_with_env(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    // Fatal: nothing can be signed without the treasury key
    let identity = SigningIdentity::from_secret(
        config.wallet.secret_key.as_deref().unwrap_or_default(),
        config.network.chain_id,
    )
    .context("Failed to derive treasury identity")?;
    let payout = config
        .wallet
        .payout_wallet
        .as_deref()
        .map(|raw| raw.parse::<Address>())
        .transpose()
        .context("PAYOUT_WALLET is not a valid address")?;
    if payout.is_none() {
        warn!("No PAYOUT_WALLET configured; withdrawals must name a destination");
    }

    let pool = Arc::new(
        EndpointPool::new(config.network.rpc_urls.clone(), config.network.ws_urls.clone())
            .context("Invalid endpoint configuration")?,
    );
    let rpc = Arc::new(
        HttpChainRpc::new(pool.clone(), Duration::from_millis(config.network.rpc_timeout_ms))
            .context("Failed to build RPC client")?,
    );
    info!(
        chain_id = config.network.chain_id,
        rpc_endpoints = pool.len(EndpointKind::RequestResponse),
        ws_endpoints = pool.len(EndpointKind::Streaming),
        wallet = %identity.address(),
        "Engine configured"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn({
        let shutdown_tx = shutdown_tx.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received shutdown signal");
                let _ = shutdown_tx.send(true);
            }
        }
    });

    let nonces = Arc::new(AccountNonceAllocator::new(rpc.clone(), identity.address()));
    resync_with_retry(&nonces, &pool, &config, shutdown_rx.clone()).await?;

    let ledger = Arc::new(strike_engine::AccountingLedger::new());
    let builder = TxBuilder::new(
        identity,
        FeeDefaults {
            priority_fee_wei: u128::from(config.strike.priority_fee_wei),
            strike_gas_limit: config.strike.gas_limit,
            ..FeeDefaults::default()
        },
    );
    let pipeline = Arc::new(SubmissionPipeline::new(
        rpc.clone(),
        pool.clone(),
        nonces.clone(),
        builder,
        ledger.clone(),
        config.submission,
    ));

    let supervisor = if args.no_stream {
        info!("Streaming disabled");
        None
    } else {
        build_supervisor(&config, pool.clone(), rpc.clone(), pipeline.clone())?
    };
    let supervisor_task = supervisor
        .clone()
        .map(|s| tokio::spawn(s.run(shutdown_rx.clone())));

    let orchestrator = Arc::new(Orchestrator::new(
        pipeline,
        rpc,
        pool,
        nonces,
        ledger.clone(),
        OrchestratorSettings {
            network_name: config.network.name.clone(),
            payout,
            reference_price_usd: config.accounting.reference_price_usd,
        },
    ));

    let mut server_shutdown = shutdown_rx.clone();
    let served = endpoints::serve(
        &config.server.bind,
        config.server.port,
        AppState {
            orchestrator,
            supervisor,
        },
        async move {
            let _ = server_shutdown.wait_for(|stop| *stop).await;
        },
    )
    .await;

    let _ = shutdown_tx.send(true);
    if let Some(task) = supervisor_task {
        if let Err(e) = task.await {
            error!("Stream supervisor task failed: {}", e);
        }
    }

    let LedgerTotals {
        earnings_usd,
        withdrawn_usd,
    } = ledger.snapshot();
    info!(earnings_usd, withdrawn_usd, "Shut down");
    served
}

/// Initialize logging subsystem
fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let default_filter = if verbose {
        "strike_engine=debug,info"
    } else {
        "strike_engine=info,warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    }
    .map_err(|e| anyhow!("Failed to initialize logging: {}", e))
}

/// Read the starting nonce, retrying with backoff until it succeeds or
/// shutdown is requested. Failing endpoints are rotated away from.
async fn resync_with_retry(
    nonces: &AccountNonceAllocator,
    pool: &EndpointPool,
    config: &Config,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut backoff =
        ExponentialBackoff::new(config.server.init_retry_ms, config.server.init_retry_max_ms);
    loop {
        match nonces.resync().await {
            Ok(nonce) => {
                info!(wallet = %nonces.address(), nonce, "Nonce initialized");
                return Ok(());
            }
            Err(e) => {
                pool.rotate_on_error(e.rpc_error());
                let delay = backoff.next_backoff();
                warn!(
                    attempt = backoff.attempt(),
                    retry_in_ms = delay.as_millis() as u64,
                    error = %e,
                    "Nonce init failed, retrying"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.wait_for(|stop| *stop) => {
                        return Err(anyhow!("Shutdown before nonce initialization"));
                    }
                }
            }
        }
    }
}

/// Strike and liveness settings from configuration
fn supervisor_config(config: &Config) -> Result<SupervisorConfig> {
    let router: Address = config
        .strike
        .router
        .parse()
        .context("strike.router is not a valid address")?;
    let strike_value =
        parse_ether(&config.strike.value_eth).context("strike.value_eth is not an ether amount")?;

    Ok(SupervisorConfig {
        stall_threshold: Duration::from_secs(config.stream.stall_threshold_secs),
        liveness_check_interval: Duration::from_secs(config.stream.liveness_check_interval_secs),
        reconnect_delay: Duration::from_millis(config.stream.reconnect_delay_ms),
        backoff_initial_ms: config.stream.backoff_initial_ms,
        backoff_max_ms: config.stream.backoff_max_ms,
        router,
        strike_value,
        strike_fees: FeePolicy::DEFAULT,
        strike_credit_usd: config.strike.credit_usd,
    })
}

#[cfg(feature = "ws-stream")]
fn build_supervisor(
    config: &Config,
    pool: Arc<EndpointPool>,
    rpc: Arc<HttpChainRpc>,
    pipeline: Arc<SubmissionPipeline>,
) -> Result<Option<Arc<StreamSupervisor>>> {
    use strike_engine::streaming::websocket_stream::WebSocketConnector;

    let min_value = parse_ether(&config.strike.min_value_eth)
        .context("strike.min_value_eth is not an ether amount")?;
    let connector = WebSocketConnector::new(Duration::from_millis(config.stream.handshake_timeout_ms));

    Ok(Some(Arc::new(StreamSupervisor::new(
        supervisor_config(config)?,
        pool,
        Arc::new(connector),
        rpc,
        pipeline,
        Arc::new(MinValuePredicate::new(min_value)),
        SamplingFilter::new(config.strike.sampling_rate),
    ))))
}

#[cfg(not(feature = "ws-stream"))]
fn build_supervisor(
    _config: &Config,
    _pool: Arc<EndpointPool>,
    _rpc: Arc<HttpChainRpc>,
    _pipeline: Arc<SubmissionPipeline>,
) -> Result<Option<Arc<StreamSupervisor>>> {
    warn!("Built without ws-stream; streaming disabled");
    Ok(None)
}
