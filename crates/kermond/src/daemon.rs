//! Daemon wiring and main loop
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - AU-12: Audit Record Generation - Lifecycle events logged
//! - CP-10: System Recovery - Configuration replayed at start, routes removed at exit
//! - SI-4: System Monitoring - Continuous configuration and kernel monitoring

use crate::config::KermondConfig;
use crate::error::{KermondError, Result};
use crate::fib::{FibMirror, FibModule};
use crate::interfaces::LinkDirectory;
use crate::kernel::{KernelChannel, RouteProgrammer};
use crate::metrics::Metrics;
use crate::module::{ModuleContext, ModuleSet};
use crate::mux::CacheMux;
use crate::paths;
use crate::rib::{RibEngine, RibModule};
use crate::store::{ConfigStore, ConfigWatcher};
use crate::types::AddressFamily;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

/// Fully wired daemon
pub struct Daemon {
    watcher: Arc<dyn ConfigWatcher>,
    mux: Arc<CacheMux>,
    rib: Arc<RibEngine>,
    modules: ModuleSet,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
}

impl Daemon {
    pub fn new(
        config: &KermondConfig,
        store: Arc<dyn ConfigStore>,
        watcher: Arc<dyn ConfigWatcher>,
        channel: Arc<dyn KernelChannel>,
        kernel: Arc<dyn RouteProgrammer>,
    ) -> Result<Self> {
        let metrics = Arc::new(Metrics::new()?);
        let shutdown = CancellationToken::new();

        let mux = Arc::new(
            CacheMux::new(channel, shutdown.clone(), Arc::clone(&metrics))
                .with_poll_interval(config.poll_interval()),
        );

        let directory = Arc::new(LinkDirectory::new(config.rib.ifname_os_fallback));
        let rib = Arc::new(
            RibEngine::new(
                Arc::clone(&store),
                kernel,
                directory.clone(),
                Arc::clone(&metrics),
            )
            .with_atomic_replace(config.rib.atomic_replace),
        );

        let mut modules = ModuleSet::new();
        modules.register(Box::new(FibModule::new(Arc::new(FibMirror::new(store)))));
        modules.register(Box::new(RibModule::new(Arc::clone(&rib), directory)));

        Ok(Self {
            watcher,
            mux,
            rib,
            modules,
            metrics,
            shutdown,
        })
    }

    /// Cancelling this token makes [`Daemon::run`] shut down
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn rib(&self) -> &Arc<RibEngine> {
        &self.rib
    }

    pub fn mux(&self) -> &Arc<CacheMux> {
        &self.mux
    }

    /// Start every module and process configuration changes until shutdown
    #[instrument(skip(self))]
    pub async fn run(mut self) -> Result<()> {
        self.mux.start()?;
        let ctx = ModuleContext {
            mux: Arc::clone(&self.mux),
        };

        // Watch before the startup replay so no edit falls between the two
        let patterns: Vec<String> = AddressFamily::ALL
            .iter()
            .map(|&f| paths::rib_watch_pattern(f))
            .collect();
        let pattern_refs: Vec<&str> = patterns.iter().map(String::as_str).collect();
        let watched = self.watcher.watch(&pattern_refs).await;

        let result = match watched {
            Ok(changes) => match self.modules.start(&ctx) {
                Ok(()) => self.main_loop(changes).await,
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        info!("Shutting down");
        self.modules.exit(&ctx);
        self.mux.stop();
        debug!(metrics = %self.metrics.gather_text(), "Final counters");
        result
    }

    /// Ends with an error if the watch closes before shutdown is requested
    async fn main_loop(
        &self,
        mut changes: tokio::sync::mpsc::UnboundedReceiver<crate::store::ConfigChange>,
    ) -> Result<()> {
        info!("Processing configuration changes");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested");
                    return Ok(());
                }
                change = changes.recv() => match change {
                    Some(change) => {
                        self.rib.handle_change(&change.path, change.value.as_deref());
                    }
                    None => {
                        error!("Configuration watch closed unexpectedly");
                        self.shutdown.cancel();
                        return Err(KermondError::WatchClosed);
                    }
                },
            }
        }
    }
}
