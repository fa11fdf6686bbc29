//! Static route parameter parser
//!
//! Applies one configuration leaf to a route and reports whether the route
//! changed in a way the kernel can see.

use crate::kernel::InterfaceResolver;
use crate::paths::{
    PARAM_DISTANCE, PARAM_ID, PARAM_IFNAME, PARAM_METRIC, PARAM_NEXTHOP, PARAM_PREFIX,
    PARAM_PROTOCOL,
};
use crate::types::{AddressFamily, Nexthop, Route};
use ipnet::IpNet;
use std::net::IpAddr;
use thiserror::Error;
use tracing::debug;

/// Largest accepted distance or metric
pub const MAX_PRIORITY_COMPONENT: u32 = 65536;

const DISTANCE_SHIFT: u32 = 16;
const COMPONENT_MASK: u32 = 0xFFFF;

/// Why a configuration value was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamError {
    #[error("id {value:?} does not match index {index}")]
    IdMismatch { index: u32, value: String },

    #[error("deleting a route prefix is not supported")]
    PrefixDeleted,

    #[error("unable to parse {parameter} {value:?}")]
    InvalidAddress {
        parameter: &'static str,
        value: String,
    },

    #[error("{parameter} {value:?} is not an {family} value")]
    FamilyMismatch {
        parameter: &'static str,
        value: String,
        family: AddressFamily,
    },

    #[error("unable to resolve interface {0:?}")]
    UnresolvedInterface(String),

    #[error("invalid {parameter} {value:?} (must be 1-65536)")]
    OutOfRange {
        parameter: &'static str,
        value: String,
    },

    #[error("only static routes supported, got protocol {0:?}")]
    UnsupportedProtocol(String),
}

/// Apply `parameter = value` (`None` = deleted) to `route`.
///
/// Returns `Ok(true)` when the route's kernel-visible state changed.
pub fn apply_parameter(
    route: &mut Route,
    index: u32,
    parameter: &str,
    value: Option<&str>,
    interfaces: &dyn InterfaceResolver,
) -> Result<bool, ParamError> {
    match parameter {
        PARAM_ID => {
            if let Some(value) = value {
                if value.parse::<u32>().ok() != Some(index) {
                    return Err(ParamError::IdMismatch {
                        index,
                        value: value.to_string(),
                    });
                }
            }
            Ok(false)
        }
        PARAM_PREFIX => {
            let value = value.ok_or(ParamError::PrefixDeleted)?;
            let prefix = parse_prefix(route.family, value)?;
            let changed = route.destination != Some(prefix);
            route.destination = Some(prefix);
            Ok(changed)
        }
        PARAM_NEXTHOP => {
            let nexthop = match value {
                Some(value) => Some(Nexthop::gateway(parse_gateway(route.family, value)?)),
                None => None,
            };
            Ok(replace_nexthop(route, nexthop))
        }
        PARAM_IFNAME => {
            let nexthop = match value {
                Some(name) => {
                    let ifindex = interfaces
                        .ifindex(name)
                        .filter(|&i| i != 0)
                        .ok_or_else(|| ParamError::UnresolvedInterface(name.to_string()))?;
                    Some(Nexthop::device(ifindex))
                }
                None => None,
            };
            Ok(replace_nexthop(route, nexthop))
        }
        PARAM_DISTANCE => {
            let distance = parse_component(PARAM_DISTANCE, value)?;
            let priority =
                (route.priority & COMPONENT_MASK) | ((distance & COMPONENT_MASK) << DISTANCE_SHIFT);
            Ok(set_priority(route, priority))
        }
        PARAM_METRIC => {
            let metric = parse_component(PARAM_METRIC, value)?;
            let priority = (route.priority & !COMPONENT_MASK) | (metric & COMPONENT_MASK);
            Ok(set_priority(route, priority))
        }
        PARAM_PROTOCOL => match value {
            Some(value) if value != "static" => {
                Err(ParamError::UnsupportedProtocol(value.to_string()))
            }
            _ => Ok(false),
        },
        other => {
            debug!(parameter = other, "Ignoring unsupported parameter");
            Ok(false)
        }
    }
}

/// Parse `address[/len]` in `family`. `default`, `any` and `all` name the
/// zero prefix; a bare address is a host prefix.
pub fn parse_prefix(family: AddressFamily, value: &str) -> Result<IpNet, ParamError> {
    let prefix = match value {
        "default" | "any" | "all" => IpNet::new(family.unspecified(), 0)
            .map_err(|_| invalid(PARAM_PREFIX, value))?,
        _ => match value.parse::<IpNet>() {
            Ok(prefix) => prefix,
            Err(_) => {
                let addr: IpAddr = value.parse().map_err(|_| invalid(PARAM_PREFIX, value))?;
                IpNet::new(addr, AddressFamily::of(&addr).max_prefix_len())
                    .map_err(|_| invalid(PARAM_PREFIX, value))?
            }
        },
    };

    if AddressFamily::of(&prefix.addr()) != family {
        return Err(ParamError::FamilyMismatch {
            parameter: PARAM_PREFIX,
            value: value.to_string(),
            family,
        });
    }
    // The kernel refuses destinations with host bits set
    Ok(prefix.trunc())
}

fn parse_gateway(family: AddressFamily, value: &str) -> Result<IpAddr, ParamError> {
    let addr: IpAddr = value.parse().map_err(|_| invalid(PARAM_NEXTHOP, value))?;
    if AddressFamily::of(&addr) != family {
        return Err(ParamError::FamilyMismatch {
            parameter: PARAM_NEXTHOP,
            value: value.to_string(),
            family,
        });
    }
    Ok(addr)
}

/// Distance or metric: unset is 0, otherwise 1..=65536
fn parse_component(parameter: &'static str, value: Option<&str>) -> Result<u32, ParamError> {
    let Some(value) = value else {
        return Ok(0);
    };
    match value.parse::<u32>() {
        Ok(n) if (1..=MAX_PRIORITY_COMPONENT).contains(&n) => Ok(n),
        _ => Err(ParamError::OutOfRange {
            parameter,
            value: value.to_string(),
        }),
    }
}

fn replace_nexthop(route: &mut Route, nexthop: Option<Nexthop>) -> bool {
    let changed = route.nexthop != nexthop;
    route.nexthop = nexthop;
    changed
}

fn set_priority(route: &mut Route, priority: u32) -> bool {
    let changed = route.priority != priority;
    route.priority = priority;
    changed
}

fn invalid(parameter: &'static str, value: &str) -> ParamError {
    ParamError::InvalidAddress {
        parameter,
        value: value.to_string(),
    }
}
