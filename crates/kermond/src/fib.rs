//! FIB mirror: republishes kernel routes under `/routing/ipv{4,6}/fib`
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SI-4: System Monitoring - Kernel forwarding state made observable
//! - CM-8: System Component Inventory - Installed routes

use crate::error::Result;
use crate::module::{Module, ModuleContext};
use crate::mux::SubscriberId;
use crate::paths;
use crate::store::ConfigStore;
use crate::types::{AddressFamily, CacheKind, ChangeAction, ChangeEvent, RT_TABLE_MAIN, Route};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Slash-free FIB key: `<dst>_<prefixlen>_<gateway>_<ifindex>_<protocol>_<priority>`
pub fn route_key(route: &Route) -> String {
    let unspecified = route.family.unspecified();
    let (dst, len) = match &route.destination {
        Some(dst) => (dst.addr(), dst.prefix_len()),
        None => (unspecified, 0),
    };
    let gateway = route
        .nexthop
        .as_ref()
        .and_then(|nh| nh.gateway)
        .unwrap_or(unspecified);
    let ifindex = route.nexthop.as_ref().and_then(|nh| nh.ifindex).unwrap_or(0);
    format!(
        "{}_{}_{}_{}_{}_{}",
        dst, len, gateway, ifindex, route.protocol, route.priority
    )
}

/// Mirrors main-table kernel routes into the configuration store
pub struct FibMirror {
    store: Arc<dyn ConfigStore>,
    subscription: Mutex<Option<SubscriberId>>,
}

impl FibMirror {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self {
            store,
            subscription: Mutex::new(None),
        }
    }

    /// Remove every published FIB entry
    pub fn prune(&self) -> Result<()> {
        for family in AddressFamily::ALL {
            self.store.prune(&paths::fib_path(family))?;
        }
        Ok(())
    }

    /// Apply one route cache change to the store
    pub fn handle(&self, event: &ChangeEvent) {
        let Some(current) = event.current.as_route() else {
            return;
        };
        let previous = event.previous.as_ref().and_then(|p| p.as_route());

        match event.action {
            ChangeAction::Created => self.publish(current),
            ChangeAction::Deleted => self.withdraw(current),
            ChangeAction::Updated => {
                if let Some(previous) = previous {
                    if route_key(previous) != route_key(current) {
                        self.withdraw(previous);
                    }
                }
                self.publish(current);
            }
        }
    }

    fn mirrored(route: &Route) -> bool {
        route.table == RT_TABLE_MAIN
    }

    fn publish(&self, route: &Route) {
        if !Self::mirrored(route) {
            return;
        }
        let key = route_key(route);
        debug!(family = %route.family, key, "FIB add");
        if let Err(e) = self
            .store
            .set(&paths::fib_entry_path(route.family, &key), Some(&key))
        {
            warn!(key, error = %e, "Failed to publish FIB entry");
        }
    }

    fn withdraw(&self, route: &Route) {
        if !Self::mirrored(route) {
            return;
        }
        let key = route_key(route);
        debug!(family = %route.family, key, "FIB delete");
        if let Err(e) = self.store.set(&paths::fib_entry_path(route.family, &key), None) {
            warn!(key, error = %e, "Failed to withdraw FIB entry");
        }
    }
}

/// Lifecycle wrapper so the mirror can be driven by [`crate::module::ModuleSet`]
pub struct FibModule {
    mirror: Arc<FibMirror>,
}

impl FibModule {
    pub fn new(mirror: Arc<FibMirror>) -> Self {
        Self { mirror }
    }
}

impl Module for FibModule {
    fn name(&self) -> &'static str {
        "fib"
    }

    fn init(&self, ctx: &ModuleContext) -> Result<()> {
        debug!("FIB: Initialising");
        self.mirror.prune()?;
        let mirror = Arc::clone(&self.mirror);
        let id = ctx.mux.subscribe(
            CacheKind::Routes,
            Arc::new(move |event: &ChangeEvent| mirror.handle(event)),
        )?;
        *self.mirror.subscription.lock() = Some(id);
        Ok(())
    }

    fn exit(&self, ctx: &ModuleContext) {
        debug!("FIB: Exiting");
        if let Some(id) = self.mirror.subscription.lock().take() {
            ctx.mux.unsubscribe(CacheKind::Routes, id);
        }
        if let Err(e) = self.mirror.prune() {
            warn!(error = %e, "Failed to prune FIB");
        }
    }
}
