//! Prometheus counters for kermond
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - AU-6: Audit Record Review - Counters available for analysis
//! - SI-4: System Monitoring - Kernel programming outcomes

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Metrics collector shared by the multiplexer and the RIB
#[derive(Clone)]
pub struct Metrics {
    pub routes_added_total: IntCounter,
    pub routes_deleted_total: IntCounter,
    pub routes_replaced_total: IntCounter,
    pub kernel_errors_total: IntCounter,
    pub rejected_changes_total: IntCounter,
    /// Events delivered to subscribers, by cache kind
    pub dispatched_events_total: IntCounterVec,

    pub registry: Arc<Registry>,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let routes_added_total = IntCounter::with_opts(Opts::new(
            "kermond_routes_added_total",
            "Static routes added to the kernel",
        ))?;
        registry.register(Box::new(routes_added_total.clone()))?;

        let routes_deleted_total = IntCounter::with_opts(Opts::new(
            "kermond_routes_deleted_total",
            "Static routes deleted from the kernel",
        ))?;
        registry.register(Box::new(routes_deleted_total.clone()))?;

        let routes_replaced_total = IntCounter::with_opts(Opts::new(
            "kermond_routes_replaced_total",
            "Static routes replaced in place",
        ))?;
        registry.register(Box::new(routes_replaced_total.clone()))?;

        let kernel_errors_total = IntCounter::with_opts(Opts::new(
            "kermond_kernel_errors_total",
            "Route requests rejected by the kernel",
        ))?;
        registry.register(Box::new(kernel_errors_total.clone()))?;

        let rejected_changes_total = IntCounter::with_opts(Opts::new(
            "kermond_rejected_changes_total",
            "Configuration changes rejected as invalid",
        ))?;
        registry.register(Box::new(rejected_changes_total.clone()))?;

        let dispatched_events_total = IntCounterVec::new(
            Opts::new(
                "kermond_dispatched_events_total",
                "Cache change events delivered to subscribers",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(dispatched_events_total.clone()))?;

        Ok(Self {
            routes_added_total,
            routes_deleted_total,
            routes_replaced_total,
            kernel_errors_total,
            rejected_changes_total,
            dispatched_events_total,
            registry: Arc::new(registry),
        })
    }

    /// Render all metrics in the Prometheus text format
    pub fn gather_text(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if encoder.encode(&self.registry.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
