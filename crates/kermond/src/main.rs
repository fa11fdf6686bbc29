//! Kernel configuration synchronization daemon
//!
//! Main entry point for kermond: static routes from the configuration store
//! into the kernel, kernel forwarding state back into the store.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - AU-3: Content of Audit Records - Structured logging
//! - AU-12: Audit Record Generation - Log daemon lifecycle
//! - CM-6: Configuration Settings - File and command-line configuration

use anyhow::Context;
use clap::Parser;
use kermond::{
    Daemon, KermondConfig, NetlinkChannel, NetlinkRouteSocket, RedisStore,
    config::DEFAULT_CONFIG_PATH,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "kermond", version, about = "Kernel configuration synchronization daemon")]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Debug logging
    #[arg(short = 'd', long)]
    debug: bool,

    /// Verbose logging (kernel objects and store writes)
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Override the configuration store host
    #[arg(long)]
    redis_host: Option<String>,

    /// Override the configuration store port
    #[arg(long)]
    redis_port: Option<u16>,
}

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = if args.verbose {
        "trace"
    } else if args.debug {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("Failed to set logger")?;
    Ok(())
}

/// Cancel `shutdown` on SIGINT or SIGTERM
fn setup_signal_handlers(shutdown: CancellationToken) -> anyhow::Result<()> {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("Failed to install SIGTERM handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = shutdown.cancelled() => return,
        }
        shutdown.cancel();
    });
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    let mut config = KermondConfig::load_or_default(&args.config)
        .with_context(|| format!("Loading {}", args.config.display()))?;
    if let Some(host) = args.redis_host.clone() {
        config.store.redis_host = host;
    }
    if let Some(port) = args.redis_port {
        config.store.redis_port = port;
    }
    config.validate().context("Invalid configuration")?;

    info!(
        redis = %format!("{}:{}", config.store.redis_host, config.store.redis_port),
        "kermond: Starting"
    );

    let store = Arc::new(
        RedisStore::connect(&config.store.redis_host, config.store.redis_port, config.store.db)
            .context("Connecting to configuration store")?,
    );
    let channel = Arc::new(
        NetlinkChannel::new(config.netlink.recv_buffer_size)
            .context("Opening netlink monitor")?,
    );
    let kernel = Arc::new(NetlinkRouteSocket::new().context("Opening netlink route socket")?);

    let daemon = Daemon::new(&config, store.clone(), store, channel, kernel)?;
    setup_signal_handlers(daemon.shutdown_token())?;

    match daemon.run().await {
        Ok(()) => {
            info!("kermond: Exiting normally");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "kermond: Exiting with error");
            Err(e.into())
        }
    }
}
