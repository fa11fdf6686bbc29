//! Static route reconciliation (RIB)
//!
//! Turns `/routing/ipv{4,6}/rib/<index>/<parameter>` configuration into
//! kernel routes and keeps a per-family table of the routes it installed.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - CM-3: Configuration Change Control - Only validated changes reach the kernel
//! - SI-10: Information Input Validation - Parameter parsing and range checks
//! - AU-12: Audit Record Generation - Every kernel mutation is logged

mod engine;
mod module;
mod params;

pub use engine::RibEngine;
pub use module::RibModule;
pub use params::{MAX_PRIORITY_COMPONENT, ParamError, apply_parameter, parse_prefix};

use crate::types::AddressFamily;
use std::fmt;

/// Identity of a configured route: family plus configuration index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteKey {
    pub family: AddressFamily,
    pub index: u32,
}

impl RouteKey {
    pub fn new(family: AddressFamily, index: u32) -> Self {
        Self { family, index }
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.family, self.index)
    }
}
