//! Kernel configuration synchronization daemon
//!
//! kermond keeps a path-addressed configuration store and the Linux
//! networking stack consistent: static routes configured under
//! `/routing/ipv{4,6}/rib` are programmed into the kernel, and the kernel's
//! forwarding table is republished under `/routing/ipv{4,6}/fib`.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//!
//! | Control | Description | Implementation |
//! |---------|-------------|----------------|
//! | AC-3 | Access Enforcement | Route changes require CAP_NET_ADMIN |
//! | AU-3 | Content of Audit Records | Structured logging of every kernel mutation |
//! | AU-12 | Audit Record Generation | Cache changes and route programming logged |
//! | CM-3 | Configuration Change Control | Only validated changes reach the kernel |
//! | CM-6 | Configuration Settings | TOML file and command-line overrides |
//! | CP-10 | System Recovery | Configuration replay at start, cleanup at exit |
//! | SC-7 | Boundary Protection | rtnetlink kernel interface |
//! | SI-4 | System Monitoring | Live kernel object caches |
//! | SI-10 | Input Validation | Route parameter parsing |
//! | SI-11 | Error Handling | Structured error types |
//!
//! # Architecture
//!
//! ```text
//! +----------------+   notifications   +-----------+   Created/Updated/Deleted
//! |  Linux kernel  | ----------------> | CacheMux  | ------------------------+
//! |  (rtnetlink)   |                   +-----------+                         |
//! |                |                     |  links            routes        |
//! |                |                     v                     v           |
//! |                |   add/replace/del  +-----------+   +-----------+      |
//! |                | <----------------- | RibEngine |   | FibMirror |      |
//! +----------------+                    +-----------+   +-----------+      |
//!                                          ^   tree read       | set/del   |
//!                                          |   + watch         v           |
//!                                       +----------------------------+     |
//!                                       |  configuration store       |     |
//!                                       +----------------------------+     |
//! ```

pub mod config;
pub mod daemon;
pub mod error;
pub mod fib;
pub mod interfaces;
pub mod kernel;
pub mod metrics;
pub mod module;
pub mod mux;
pub mod netlink;
pub mod paths;
pub mod rib;
pub mod store;
pub mod types;

pub use config::KermondConfig;
pub use daemon::Daemon;
pub use error::{KermondError, Result};
pub use fib::{FibMirror, route_key};
pub use interfaces::LinkDirectory;
pub use kernel::{InterfaceResolver, KernelChannel, RouteProgrammer};
pub use metrics::Metrics;
pub use mux::{CacheMux, Callback, SubscriberId};
pub use netlink::{NetlinkChannel, NetlinkRouteSocket};
pub use rib::{ParamError, RibEngine, RouteKey};
pub use store::{ConfigChange, ConfigStore, ConfigWatcher, MemoryStore, RedisStore};
pub use types::{
    AddressFamily, CacheKind, ChangeAction, ChangeEvent, KernelObject, Link, Nexthop,
    Notification, Route,
};
