//! Kernel seams
//!
//! The multiplexer and the RIB talk to the kernel only through these traits.
//! The netlink implementations live in [`crate::netlink`]; tests substitute
//! recording fakes.

use crate::error::Result;
use crate::types::{CacheKind, KernelObject, Notification, Route};
use std::time::Duration;

/// Source of kernel object state for the cache multiplexer
pub trait KernelChannel: Send + Sync {
    /// Dump every object of `kind` currently known to the kernel
    fn dump(&self, kind: CacheKind) -> Result<Vec<KernelObject>>;

    /// Wait up to `timeout` for notifications and return everything pending.
    ///
    /// An empty batch means the wait timed out. A wait interrupted by a signal
    /// returns [`crate::KermondError::Interrupted`].
    fn poll(&self, timeout: Duration) -> Result<Vec<Notification>>;
}

/// Route mutation requests
pub trait RouteProgrammer: Send + Sync {
    /// Create a route. With `exclusive`, fails if an identical route exists.
    fn add_route(&self, route: &Route, exclusive: bool) -> Result<()>;

    /// Atomically replace the route sharing `route`'s kernel identity
    fn replace_route(&self, route: &Route) -> Result<()>;

    fn delete_route(&self, route: &Route) -> Result<()>;
}

/// Interface name to index resolution
pub trait InterfaceResolver: Send + Sync {
    fn ifindex(&self, name: &str) -> Option<u32>;
}
