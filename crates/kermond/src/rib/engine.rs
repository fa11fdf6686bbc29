//! RIB engine: configuration change handling and kernel convergence

use super::RouteKey;
use super::params::{ParamError, apply_parameter};
use crate::error::Result;
use crate::kernel::{InterfaceResolver, RouteProgrammer};
use crate::metrics::Metrics;
use crate::paths::{self, PARAM_ID, PARAM_PREFIX, RibPath};
use crate::store::{ConfigStore, rewatch_tree};
use crate::types::{AddressFamily, Link, Route};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, trace, warn};

/// Routes the engine believes are installed, by configuration index
type RouteTable = BTreeMap<u32, Route>;

/// Result of building a route from the stored configuration
#[derive(Debug)]
enum Candidate {
    Added,
    Incomplete,
    Rejected,
    Unresolved(String),
    KernelFailed,
}

/// Reconciles configured static routes with the kernel.
///
/// Each family's table has its own lock, held for the whole
/// read-modify-write including the kernel calls. The pending-interface map
/// is only locked while no table lock is held.
pub struct RibEngine {
    store: Arc<dyn ConfigStore>,
    kernel: Arc<dyn RouteProgrammer>,
    interfaces: Arc<dyn InterfaceResolver>,
    metrics: Arc<Metrics>,
    atomic_replace: bool,
    v4: Mutex<RouteTable>,
    v6: Mutex<RouteTable>,
    /// Interface name -> routes waiting for it to appear
    pending: Mutex<HashMap<String, BTreeSet<RouteKey>>>,
}

impl RibEngine {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        kernel: Arc<dyn RouteProgrammer>,
        interfaces: Arc<dyn InterfaceResolver>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            kernel,
            interfaces,
            metrics,
            atomic_replace: true,
            v4: Mutex::new(RouteTable::new()),
            v6: Mutex::new(RouteTable::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Use one atomic replace for updates that keep the kernel identity
    pub fn with_atomic_replace(mut self, enabled: bool) -> Self {
        self.atomic_replace = enabled;
        self
    }

    fn table(&self, family: AddressFamily) -> &Mutex<RouteTable> {
        match family {
            AddressFamily::Ipv4 => &self.v4,
            AddressFamily::Ipv6 => &self.v6,
        }
    }

    /// Tracked route for `key`, if installed
    pub fn route(&self, key: RouteKey) -> Option<Route> {
        self.table(key.family).lock().get(&key.index).cloned()
    }

    /// Number of tracked routes in `family`
    pub fn len(&self, family: AddressFamily) -> usize {
        self.table(family).lock().len()
    }

    pub fn is_empty(&self) -> bool {
        AddressFamily::ALL.iter().all(|&f| self.len(f) == 0)
    }

    /// Keys waiting for `ifname` to appear
    pub fn pending_for(&self, ifname: &str) -> Vec<RouteKey> {
        self.pending
            .lock()
            .get(ifname)
            .map(|keys| keys.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Replay both RIB subtrees so existing configuration converges
    #[instrument(skip(self))]
    pub fn start(&self) -> Result<usize> {
        let mut replayed = 0;
        for family in AddressFamily::ALL {
            replayed += rewatch_tree(self.store.as_ref(), &paths::rib_path(family), |path, value| {
                self.handle_change(path, value)
            })?;
        }
        info!(
            replayed,
            ipv4 = self.len(AddressFamily::Ipv4),
            ipv6 = self.len(AddressFamily::Ipv6),
            "RIB converged"
        );
        Ok(replayed)
    }

    /// Handle one RIB leaf change. Returns false only for a malformed path.
    pub fn handle_change(&self, path: &str, value: Option<&str>) -> bool {
        debug!(path, value, "RIB change");

        let Some(rib) = RibPath::parse(path) else {
            error!(path, "Invalid static route path");
            self.metrics.rejected_changes_total.inc();
            return false;
        };
        let key = RouteKey::new(rib.family, rib.index);

        let unresolved = {
            let mut table = self.table(key.family).lock();
            match table.get(&key.index).cloned() {
                None => match self.create_candidate(&mut table, key) {
                    Candidate::Unresolved(ifname) => Some(ifname),
                    _ => None,
                },
                Some(before) => self.update(&mut table, key, before, rib.parameter, value),
            }
        };

        if let Some(ifname) = unresolved {
            self.wait_for_interface(ifname, key);
        }
        true
    }

    /// Retry routes that were waiting for `link` to appear
    pub fn interface_appeared(&self, link: &Link) {
        let Some(keys) = self.pending.lock().remove(&link.name) else {
            return;
        };
        info!(
            ifname = %link.name,
            ifindex = link.ifindex,
            routes = keys.len(),
            "Interface appeared"
        );

        for key in keys {
            let outcome = {
                let mut table = self.table(key.family).lock();
                if table.contains_key(&key.index) {
                    continue;
                }
                self.create_candidate(&mut table, key)
            };
            if let Candidate::Unresolved(ifname) = outcome {
                self.wait_for_interface(ifname, key);
            }
        }
    }

    /// Forget routes the kernel flushed along with `link` and wait for its
    /// name to come back. Returns the number of routes moved to pending.
    pub fn interface_removed(&self, link: &Link) -> usize {
        let mut dropped = Vec::new();
        for family in AddressFamily::ALL {
            let mut table = self.table(family).lock();
            table.retain(|&index, route| {
                let through = route
                    .nexthop
                    .as_ref()
                    .is_some_and(|n| n.ifindex == Some(link.ifindex));
                if through {
                    dropped.push(RouteKey::new(family, index));
                }
                !through
            });
        }
        if dropped.is_empty() {
            return 0;
        }

        info!(
            ifname = %link.name,
            ifindex = link.ifindex,
            routes = dropped.len(),
            "Interface removed"
        );
        self.pending
            .lock()
            .entry(link.name.clone())
            .or_default()
            .extend(dropped.iter().copied());
        dropped.len()
    }

    /// Delete every tracked route from the kernel. Returns the deletes issued.
    #[instrument(skip(self))]
    pub fn shutdown(&self) -> usize {
        let mut issued = 0;
        for family in AddressFamily::ALL {
            let drained = std::mem::take(&mut *self.table(family).lock());
            for (index, route) in drained {
                self.kernel_delete(RouteKey::new(family, index), &route);
                issued += 1;
            }
        }
        self.pending.lock().clear();
        info!(deleted = issued, "RIB shut down");
        issued
    }

    fn wait_for_interface(&self, ifname: String, key: RouteKey) {
        debug!(%key, ifname, "Route waiting for interface");
        self.pending
            .lock()
            .entry(ifname.clone())
            .or_default()
            .insert(key);

        // The link may have appeared between the failed lookup and now
        if self.interfaces.ifindex(&ifname).is_some_and(|i| i != 0) {
            self.interface_appeared(&Link {
                ifindex: 0,
                name: ifname,
                up: false,
                mtu: None,
                mac: None,
            });
        }
    }

    /// Build a route from the stored subtree and add it if complete
    fn create_candidate(&self, table: &mut RouteTable, key: RouteKey) -> Candidate {
        let base = paths::rib_index_path(key.family, key.index);
        let tree = match self.store.get_tree(&base) {
            Ok(tree) => tree,
            Err(e) => {
                error!(%key, error = %e, "Failed to read route configuration");
                return Candidate::Incomplete;
            }
        };

        let mut route = Route::new_static(key.family);
        let prefix = format!("{}/", base);
        for (leaf, value) in &tree {
            let Some(parameter) = leaf.strip_prefix(&prefix) else {
                continue;
            };
            if parameter.contains('/') {
                trace!(%key, leaf, "Ignoring nested leaf");
                continue;
            }
            if let Err(e) = apply_parameter(
                &mut route,
                key.index,
                parameter,
                Some(value),
                self.interfaces.as_ref(),
            ) {
                error!(%key, parameter, error = %e, "Invalid route configuration");
                self.metrics.rejected_changes_total.inc();
                return match e {
                    ParamError::UnresolvedInterface(ifname) => Candidate::Unresolved(ifname),
                    _ => Candidate::Rejected,
                };
            }
        }

        if !route.is_valid() {
            debug!(%key, "Route configuration currently not valid");
            return Candidate::Incomplete;
        }

        if self.kernel_add(key, &route) {
            table.insert(key.index, route);
            Candidate::Added
        } else {
            Candidate::KernelFailed
        }
    }

    /// Apply one leaf change to an installed route. Returns the interface
    /// name the route now waits for, if its new `ifname` does not resolve.
    fn update(
        &self,
        table: &mut RouteTable,
        key: RouteKey,
        before: Route,
        parameter: &str,
        value: Option<&str>,
    ) -> Option<String> {
        if value.is_none() && (parameter == PARAM_ID || parameter == PARAM_PREFIX) {
            self.kernel_delete(key, &before);
            table.remove(&key.index);
            return None;
        }

        let mut after = before.clone();
        match apply_parameter(
            &mut after,
            key.index,
            parameter,
            value,
            self.interfaces.as_ref(),
        ) {
            Err(ParamError::UnresolvedInterface(ifname)) => {
                warn!(%key, ifname, "Route moved to an unknown interface");
                self.kernel_delete(key, &before);
                table.remove(&key.index);
                return Some(ifname);
            }
            Err(e) => {
                error!(%key, parameter, error = %e, "Invalid route configuration change");
                self.metrics.rejected_changes_total.inc();
            }
            Ok(false) => {
                trace!(%key, parameter, "No change to route configuration");
            }
            Ok(true) => self.converge(table, key, before, after),
        }
        None
    }

    fn converge(&self, table: &mut RouteTable, key: RouteKey, before: Route, after: Route) {
        if self.atomic_replace && after.is_valid() && before.identity() == after.identity() {
            match self.kernel.replace_route(&after) {
                Ok(()) => {
                    info!(%key, route = %after, "Replaced static route");
                    self.metrics.routes_replaced_total.inc();
                    table.insert(key.index, after);
                }
                Err(e) => {
                    error!(%key, route = %after, error = %e, "Unable to replace route");
                    self.metrics.kernel_errors_total.inc();
                }
            }
            return;
        }

        self.kernel_delete(key, &before);
        table.remove(&key.index);
        if !after.is_valid() {
            debug!(%key, "Route no longer valid, not re-adding");
            return;
        }
        if self.kernel_add(key, &after) {
            table.insert(key.index, after);
        }
    }

    fn kernel_add(&self, key: RouteKey, route: &Route) -> bool {
        match self.kernel.add_route(route, true) {
            Ok(()) => {
                info!(%key, %route, "Added static route");
                self.metrics.routes_added_total.inc();
                true
            }
            Err(e) => {
                error!(%key, %route, error = %e, "Unable to add route");
                self.metrics.kernel_errors_total.inc();
                false
            }
        }
    }

    fn kernel_delete(&self, key: RouteKey, route: &Route) {
        match self.kernel.delete_route(route) {
            Ok(()) => {
                info!(%key, %route, "Deleted static route");
                self.metrics.routes_deleted_total.inc();
            }
            Err(e) => {
                warn!(%key, %route, error = %e, "Unable to delete route");
                self.metrics.kernel_errors_total.inc();
            }
        }
    }
}
