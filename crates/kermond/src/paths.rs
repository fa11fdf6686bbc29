//! Configuration store path layout
//!
//! ```text
//! /routing/ipv4/rib/<index>/<parameter>   configured static routes
//! /routing/ipv4/fib/<key>                 kernel forwarding entries
//! ```
//! and the same under `/routing/ipv6`.

use crate::types::AddressFamily;

pub const ROUTING_PATH: &str = "/routing";

pub const PARAM_ID: &str = "id";
pub const PARAM_PREFIX: &str = "prefix";
pub const PARAM_NEXTHOP: &str = "nexthop";
pub const PARAM_IFNAME: &str = "ifname";
pub const PARAM_DISTANCE: &str = "distance";
pub const PARAM_METRIC: &str = "metric";
pub const PARAM_PROTOCOL: &str = "protocol";

/// `/routing/ipv{4,6}/rib`
pub fn rib_path(family: AddressFamily) -> String {
    format!("{}/{}/rib", ROUTING_PATH, family)
}

/// `/routing/ipv{4,6}/rib/<index>`
pub fn rib_index_path(family: AddressFamily, index: u32) -> String {
    format!("{}/{}", rib_path(family), index)
}

/// Watch pattern covering every RIB leaf of `family`
pub fn rib_watch_pattern(family: AddressFamily) -> String {
    format!("{}/*", rib_path(family))
}

/// `/routing/ipv{4,6}/fib`
pub fn fib_path(family: AddressFamily) -> String {
    format!("{}/{}/fib", ROUTING_PATH, family)
}

/// `/routing/ipv{4,6}/fib/<key>`
pub fn fib_entry_path(family: AddressFamily, key: &str) -> String {
    format!("{}/{}", fib_path(family), key)
}

/// Parsed `/routing/ipv{4,6}/rib/<index>/<parameter>` path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RibPath<'a> {
    pub family: AddressFamily,
    pub index: u32,
    pub parameter: &'a str,
}

impl<'a> RibPath<'a> {
    /// Parse a RIB leaf path. Parameters may not contain further separators.
    pub fn parse(path: &'a str) -> Option<Self> {
        let rest = path.strip_prefix(ROUTING_PATH)?.strip_prefix("/ipv")?;
        let (version, rest) = rest.split_once('/')?;
        let family = AddressFamily::from_version(version.parse().ok()?)?;
        let rest = rest.strip_prefix("rib/")?;
        let (index, parameter) = rest.split_once('/')?;
        if !index.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let index = index.parse().ok()?;
        if parameter.is_empty() || parameter.contains('/') {
            return None;
        }
        Some(Self {
            family,
            index,
            parameter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rib_path() {
        assert_eq!(
            RibPath::parse("/routing/ipv4/rib/3/prefix"),
            Some(RibPath {
                family: AddressFamily::Ipv4,
                index: 3,
                parameter: "prefix",
            })
        );
        assert_eq!(
            RibPath::parse("/routing/ipv6/rib/4294967295/metric").map(|p| p.index),
            Some(u32::MAX)
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for path in [
            "/routing/ipv5/rib/3/prefix",
            "/routing/ipv4/fib/3/prefix",
            "/routing/ipv4/rib/x/prefix",
            "/routing/ipv4/rib/+3/prefix",
            "/routing/ipv4/rib/3",
            "/routing/ipv4/rib/3/",
            "/routing/ipv4/rib/3/a/b",
            "/routing/ipv4/rib/4294967296/prefix",
            "/other/ipv4/rib/3/prefix",
        ] {
            assert_eq!(RibPath::parse(path), None, "{path}");
        }
    }

    #[test]
    fn test_path_builders() {
        assert_eq!(rib_index_path(AddressFamily::Ipv4, 7), "/routing/ipv4/rib/7");
        assert_eq!(rib_watch_pattern(AddressFamily::Ipv6), "/routing/ipv6/rib/*");
        assert_eq!(
            fib_entry_path(AddressFamily::Ipv4, "10.0.0.0_8_0.0.0.0_2_4_0"),
            "/routing/ipv4/fib/10.0.0.0_8_0.0.0.0_2_4_0"
        );
    }
}
