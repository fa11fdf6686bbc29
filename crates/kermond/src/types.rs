//! Core types shared by the cache multiplexer, the RIB and the FIB mirror
//!
//! Kernel objects are plain owned snapshots. They are converted to netlink
//! messages only at the socket boundary (see [`crate::netlink`]).
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - CM-8: System Component Inventory - Links, addresses and neighbors as components
//! - SI-4: System Monitoring - Kernel state tracking

use ipnet::IpNet;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Kernel main routing table (RT_TABLE_MAIN)
pub const RT_TABLE_MAIN: u32 = 254;
/// Route installed by an administrator (RTPROT_STATIC)
pub const RTPROT_STATIC: u8 = 4;
/// Gateway or direct route (RTN_UNICAST)
pub const RTN_UNICAST: u8 = 1;
/// Global route scope (RT_SCOPE_UNIVERSE)
pub const RT_SCOPE_UNIVERSE: u8 = 0;

/// IP address family used to partition configuration and route tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    /// Both families, in table order
    pub const ALL: [AddressFamily; 2] = [AddressFamily::Ipv4, AddressFamily::Ipv6];

    /// Version number used in configuration paths (`ipv4` / `ipv6`)
    pub fn version(self) -> u8 {
        match self {
            Self::Ipv4 => 4,
            Self::Ipv6 => 6,
        }
    }

    pub fn from_version(version: u8) -> Option<Self> {
        match version {
            4 => Some(Self::Ipv4),
            6 => Some(Self::Ipv6),
            _ => None,
        }
    }

    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Self::Ipv4,
            IpAddr::V6(_) => Self::Ipv6,
        }
    }

    /// Unspecified address (`0.0.0.0` / `::`)
    pub fn unspecified(self) -> IpAddr {
        match self {
            Self::Ipv4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Self::Ipv6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }

    /// Maximum prefix length for the family
    pub fn max_prefix_len(self) -> u8 {
        match self {
            Self::Ipv4 => 32,
            Self::Ipv6 => 128,
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ipv{}", self.version())
    }
}

/// Kernel object family that can be cached and multiplexed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheKind {
    Links,
    Addresses,
    Neighbors,
    Routes,
}

impl CacheKind {
    pub const ALL: [CacheKind; 4] = [
        CacheKind::Links,
        CacheKind::Addresses,
        CacheKind::Neighbors,
        CacheKind::Routes,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Links => "route/link",
            Self::Addresses => "route/addr",
            Self::Neighbors => "route/neigh",
            Self::Routes => "route/route",
        }
    }
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// MAC address representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub const ZERO: Self = Self([0, 0, 0, 0, 0, 0]);

    /// Build from a link-layer address attribute; `None` unless exactly 6 bytes
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 6] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == Self::ZERO.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// Kernel neighbor state (NUD_* values from linux/neighbour.h)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum NeighborState {
    Incomplete = 0x01,
    Reachable = 0x02,
    Stale = 0x04,
    Delay = 0x08,
    Probe = 0x10,
    Failed = 0x20,
    NoArp = 0x40,
    Permanent = 0x80,
    Unknown = 0x00,
}

impl NeighborState {
    /// Create from kernel NUD_* value
    pub fn from_kernel(state: u16) -> Self {
        match state {
            0x01 => Self::Incomplete,
            0x02 => Self::Reachable,
            0x04 => Self::Stale,
            0x08 => Self::Delay,
            0x10 => Self::Probe,
            0x20 => Self::Failed,
            0x40 => Self::NoArp,
            0x80 => Self::Permanent,
            _ => Self::Unknown,
        }
    }
}

/// Network interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub ifindex: u32,
    pub name: String,
    pub up: bool,
    pub mtu: Option<u32>,
    pub mac: Option<MacAddress>,
}

/// Interface address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub ifindex: u32,
    pub address: IpNet,
}

/// Neighbor cache entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neighbor {
    pub ifindex: u32,
    pub ip: IpAddr,
    pub mac: Option<MacAddress>,
    pub state: NeighborState,
}

/// Route nexthop. Configured routes carry exactly one of the two fields;
/// kernel routes may carry both.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Nexthop {
    pub gateway: Option<IpAddr>,
    pub ifindex: Option<u32>,
}

impl Nexthop {
    pub fn gateway(addr: IpAddr) -> Self {
        Self {
            gateway: Some(addr),
            ifindex: None,
        }
    }

    pub fn device(ifindex: u32) -> Self {
        Self {
            gateway: None,
            ifindex: Some(ifindex),
        }
    }
}

/// Kernel route (configured or observed)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route {
    pub family: AddressFamily,
    pub table: u32,
    pub protocol: u8,
    pub scope: u8,
    pub kind: u8,
    /// `[distance:16][metric:16]` for configured routes
    pub priority: u32,
    pub destination: Option<IpNet>,
    pub nexthop: Option<Nexthop>,
}

impl Route {
    /// Static unicast route in the main table with priority 0
    pub fn new_static(family: AddressFamily) -> Self {
        Self {
            family,
            table: RT_TABLE_MAIN,
            protocol: RTPROT_STATIC,
            scope: RT_SCOPE_UNIVERSE,
            kind: RTN_UNICAST,
            priority: 0,
            destination: None,
            nexthop: None,
        }
    }

    /// Minimal validity for a kernel request: destination and nexthop present
    pub fn is_valid(&self) -> bool {
        self.destination.is_some() && self.nexthop.is_some()
    }

    /// Upper 16 bits of the priority
    pub fn distance(&self) -> u16 {
        (self.priority >> 16) as u16
    }

    /// Lower 16 bits of the priority
    pub fn metric(&self) -> u16 {
        (self.priority & 0xFFFF) as u16
    }

    /// Fields the kernel uses to find an existing route
    pub fn identity(&self) -> RouteIdentity {
        RouteIdentity {
            family: self.family,
            table: self.table,
            destination: self.destination,
            priority: self.priority,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.destination {
            Some(dst) => write!(f, "{}", dst)?,
            None => write!(f, "default")?,
        }
        if let Some(nh) = &self.nexthop {
            if let Some(gw) = &nh.gateway {
                write!(f, " via {}", gw)?;
            }
            if let Some(ifindex) = nh.ifindex {
                write!(f, " dev {}", ifindex)?;
            }
        }
        write!(
            f,
            " table {} proto {} priority {}",
            self.table, self.protocol, self.priority
        )
    }
}

/// Kernel lookup identity of a route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteIdentity {
    pub family: AddressFamily,
    pub table: u32,
    pub destination: Option<IpNet>,
    pub priority: u32,
}

/// Snapshot of any cached kernel object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelObject {
    Link(Link),
    Address(Address),
    Neighbor(Neighbor),
    Route(Route),
}

impl KernelObject {
    pub fn kind(&self) -> CacheKind {
        match self {
            Self::Link(_) => CacheKind::Links,
            Self::Address(_) => CacheKind::Addresses,
            Self::Neighbor(_) => CacheKind::Neighbors,
            Self::Route(_) => CacheKind::Routes,
        }
    }

    /// Identity of this object within its cache
    pub fn key(&self) -> ObjectKey {
        match self {
            Self::Link(link) => ObjectKey::Link(link.ifindex),
            Self::Address(addr) => ObjectKey::Address(addr.ifindex, addr.address),
            Self::Neighbor(neigh) => ObjectKey::Neighbor(neigh.ifindex, neigh.ip),
            Self::Route(route) => ObjectKey::Route(route.identity()),
        }
    }

    pub fn as_link(&self) -> Option<&Link> {
        match self {
            Self::Link(link) => Some(link),
            _ => None,
        }
    }

    pub fn as_route(&self) -> Option<&Route> {
        match self {
            Self::Route(route) => Some(route),
            _ => None,
        }
    }
}

/// Cache identity of a kernel object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKey {
    Link(u32),
    Address(u32, IpNet),
    Neighbor(u32, IpAddr),
    Route(RouteIdentity),
}

/// What happened to a cached object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Created,
    Deleted,
    Updated,
}

/// Change delivered to cache subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: CacheKind,
    pub action: ChangeAction,
    pub previous: Option<KernelObject>,
    pub current: KernelObject,
}

impl ChangeEvent {
    pub fn created(current: KernelObject) -> Self {
        Self {
            kind: current.kind(),
            action: ChangeAction::Created,
            previous: None,
            current,
        }
    }
}

/// Kernel message type (RTM_NEW* / RTM_DEL*)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOp {
    New,
    Delete,
}

/// Raw kernel notification, before it is applied to a cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub op: NotifyOp,
    pub object: KernelObject,
}

impl Notification {
    pub fn new(object: KernelObject) -> Self {
        Self {
            op: NotifyOp::New,
            object,
        }
    }

    pub fn delete(object: KernelObject) -> Self {
        Self {
            op: NotifyOp::Delete,
            object,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_versions() {
        assert_eq!(AddressFamily::from_version(4), Some(AddressFamily::Ipv4));
        assert_eq!(AddressFamily::from_version(6), Some(AddressFamily::Ipv6));
        assert_eq!(AddressFamily::from_version(5), None);
        assert_eq!(AddressFamily::Ipv6.to_string(), "ipv6");
    }

    #[test]
    fn test_priority_components() {
        let mut route = Route::new_static(AddressFamily::Ipv4);
        route.priority = (10 << 16) | 20;
        assert_eq!(route.distance(), 10);
        assert_eq!(route.metric(), 20);
        assert!(!route.is_valid());
    }

    #[test]
    fn test_route_identity_ignores_nexthop() {
        let mut a = Route::new_static(AddressFamily::Ipv4);
        a.destination = Some("10.0.0.0/24".parse().unwrap());
        a.nexthop = Some(Nexthop::device(2));
        let mut b = a.clone();
        b.nexthop = Some(Nexthop::gateway("10.0.0.1".parse().unwrap()));
        assert_eq!(a.identity(), b.identity());
        assert_ne!(a, b);
    }

    #[test]
    fn test_mac_from_slice() {
        assert_eq!(
            MacAddress::from_slice(&[0, 0x11, 0x22, 0x33, 0x44, 0x55])
                .unwrap()
                .to_string(),
            "00:11:22:33:44:55"
        );
        assert!(MacAddress::from_slice(&[1, 2, 3]).is_none());
    }

    #[test]
    fn test_object_keys() {
        let link = KernelObject::Link(Link {
            ifindex: 3,
            name: "eth0".into(),
            up: true,
            mtu: Some(1500),
            mac: None,
        });
        assert_eq!(link.kind(), CacheKind::Links);
        assert_eq!(link.key(), ObjectKey::Link(3));
    }
}
