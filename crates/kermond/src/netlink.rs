//! rtnetlink kernel channel and route programming socket
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SC-7: Boundary Protection - Kernel interface for network state
//! - SI-4: System Monitoring - Monitor link, address, neighbor and route changes
//! - AC-3: Access Enforcement - Route changes require CAP_NET_ADMIN

#[cfg(target_os = "linux")]
mod linux {
    use crate::error::{KermondError, Result};
    use crate::kernel::{KernelChannel, RouteProgrammer};
    use crate::types::{
        Address, AddressFamily, CacheKind, KernelObject, Link, MacAddress, Neighbor,
        NeighborState, Nexthop, Notification, Route,
    };
    use ipnet::IpNet;
    use netlink_packet_core::{
        NLM_F_ACK, NLM_F_CREATE, NLM_F_DUMP, NLM_F_EXCL, NLM_F_REPLACE, NLM_F_REQUEST, NetlinkHeader,
        NetlinkMessage, NetlinkPayload,
    };
    use netlink_packet_route::address::{AddressAttribute, AddressMessage};
    use netlink_packet_route::link::{LinkAttribute, LinkFlags, LinkMessage};
    use netlink_packet_route::neighbour::{NeighbourAddress, NeighbourAttribute, NeighbourMessage};
    use netlink_packet_route::route::{
        RouteAddress, RouteAttribute, RouteMessage, RouteProtocol, RouteScope, RouteType,
    };
    use netlink_packet_route::{AddressFamily as NlFamily, RouteNetlinkMessage};
    use netlink_sys::{Socket, SocketAddr, protocols::NETLINK_ROUTE};
    use parking_lot::Mutex;
    use std::io;
    use std::net::IpAddr;
    use std::os::fd::AsRawFd;
    use std::time::Duration;
    use tracing::{debug, instrument, trace, warn};

    /// rtnetlink multicast groups (linux/rtnetlink.h)
    const RTNLGRP_LINK: u32 = 1;
    const RTNLGRP_NEIGH: u32 = 3;
    const RTNLGRP_IPV4_IFADDR: u32 = 5;
    const RTNLGRP_IPV4_ROUTE: u32 = 7;
    const RTNLGRP_IPV6_IFADDR: u32 = 9;
    const RTNLGRP_IPV6_ROUTE: u32 = 11;

    const MONITOR_GROUPS: [u32; 6] = [
        RTNLGRP_LINK,
        RTNLGRP_NEIGH,
        RTNLGRP_IPV4_IFADDR,
        RTNLGRP_IPV4_ROUTE,
        RTNLGRP_IPV6_IFADDR,
        RTNLGRP_IPV6_ROUTE,
    ];

    const RECV_BUFFER_LEN: usize = 64 * 1024;

    /// Tables above 255 only travel in the RTA_TABLE attribute
    const RT_TABLE_COMPAT: u8 = 252;

    fn netlink_err(what: &str, e: io::Error) -> KermondError {
        KermondError::Netlink(format!("{}: {}", what, e))
    }

    fn open_socket() -> Result<Socket> {
        let mut socket =
            Socket::new(NETLINK_ROUTE).map_err(|e| netlink_err("Failed to create socket", e))?;
        socket
            .bind_auto()
            .map_err(|e| netlink_err("Failed to bind socket", e))?;
        socket
            .connect(&SocketAddr::new(0, 0))
            .map_err(|e| netlink_err("Failed to connect socket", e))?;
        Ok(socket)
    }

    /// Send a request and collect every reply until the kernel signals the end.
    ///
    /// Replies flagged `Done`, or an `Error` payload (an ACK when the code is
    /// empty), terminate the exchange.
    fn transact(
        socket: &Socket,
        sequence: u32,
        op: &'static str,
        flags: u16,
        payload: RouteNetlinkMessage,
    ) -> Result<Vec<RouteNetlinkMessage>> {
        let mut header = NetlinkHeader::default();
        header.flags = flags;
        header.sequence_number = sequence;
        let mut packet = NetlinkMessage::new(header, NetlinkPayload::InnerMessage(payload));
        packet.finalize();

        let mut buf = vec![0u8; packet.buffer_len()];
        packet.serialize(&mut buf);
        socket
            .send(&buf, 0)
            .map_err(|e| netlink_err("Failed to send request", e))?;

        let mut replies = Vec::new();
        let mut buffer = vec![0u8; RECV_BUFFER_LEN];
        loop {
            let len = {
                let mut slice = &mut buffer[..];
                socket
                    .recv(&mut slice, 0)
                    .map_err(|e| netlink_err("Failed to receive", e))?
            };

            let mut offset = 0;
            while offset < len {
                let msg = NetlinkMessage::<RouteNetlinkMessage>::deserialize(&buffer[offset..len])
                    .map_err(|e| {
                        KermondError::Netlink(format!("Failed to parse message: {}", e))
                    })?;
                let msg_len = msg.header.length as usize;
                if msg_len == 0 {
                    break;
                }
                offset += (msg_len + 3) & !3;

                if msg.header.sequence_number != sequence {
                    trace!(seq = msg.header.sequence_number, "Skipping unrelated reply");
                    continue;
                }
                match msg.payload {
                    NetlinkPayload::Done(_) => return Ok(replies),
                    NetlinkPayload::Error(err) => {
                        return match err.code {
                            Some(code) => Err(KermondError::Kernel {
                                op,
                                source: io::Error::from_raw_os_error(-code.get()),
                            }),
                            None => Ok(replies),
                        };
                    }
                    NetlinkPayload::InnerMessage(inner) => replies.push(inner),
                    _ => {}
                }
            }
        }
    }

    fn route_address(addr: IpAddr) -> RouteAddress {
        match addr {
            IpAddr::V4(v4) => RouteAddress::Inet(v4),
            IpAddr::V6(v6) => RouteAddress::Inet6(v6),
        }
    }

    fn from_route_address(addr: &RouteAddress) -> Option<IpAddr> {
        match addr {
            RouteAddress::Inet(v4) => Some(IpAddr::V4(*v4)),
            RouteAddress::Inet6(v6) => Some(IpAddr::V6(*v6)),
            _ => None,
        }
    }

    fn family_of(family: NlFamily) -> Option<AddressFamily> {
        match family {
            NlFamily::Inet => Some(AddressFamily::Ipv4),
            NlFamily::Inet6 => Some(AddressFamily::Ipv6),
            _ => None,
        }
    }

    fn nl_family(family: AddressFamily) -> NlFamily {
        match family {
            AddressFamily::Ipv4 => NlFamily::Inet,
            AddressFamily::Ipv6 => NlFamily::Inet6,
        }
    }

    /// Kernel request for `route`
    pub fn route_message(route: &Route) -> RouteMessage {
        let mut msg = RouteMessage::default();
        msg.header.address_family = nl_family(route.family);
        msg.header.table = u8::try_from(route.table).unwrap_or(RT_TABLE_COMPAT);
        msg.header.protocol = RouteProtocol::from(route.protocol);
        msg.header.scope = RouteScope::from(route.scope);
        msg.header.kind = RouteType::from(route.kind);

        if let Some(dst) = &route.destination {
            msg.header.destination_prefix_length = dst.prefix_len();
            if dst.prefix_len() > 0 {
                msg.attributes
                    .push(RouteAttribute::Destination(route_address(dst.addr())));
            }
        }
        if let Some(nexthop) = &route.nexthop {
            if let Some(gateway) = nexthop.gateway {
                msg.attributes
                    .push(RouteAttribute::Gateway(route_address(gateway)));
            }
            if let Some(ifindex) = nexthop.ifindex {
                msg.attributes.push(RouteAttribute::Oif(ifindex));
            }
        }
        if route.priority != 0 {
            msg.attributes.push(RouteAttribute::Priority(route.priority));
        }
        msg.attributes.push(RouteAttribute::Table(route.table));
        msg
    }

    /// Route snapshot from a kernel message. The destination is always set,
    /// `0/0` when the kernel omits it.
    pub fn parse_route(msg: &RouteMessage) -> Option<Route> {
        let family = family_of(msg.header.address_family)?;
        let mut table = u32::from(msg.header.table);
        let mut destination = None;
        let mut gateway = None;
        let mut oif = None;
        let mut priority = 0;

        for attr in &msg.attributes {
            match attr {
                RouteAttribute::Destination(addr) => destination = from_route_address(addr),
                RouteAttribute::Gateway(addr) => gateway = from_route_address(addr),
                RouteAttribute::Oif(ifindex) => oif = Some(*ifindex),
                RouteAttribute::Priority(p) => priority = *p,
                RouteAttribute::Table(t) => table = *t,
                RouteAttribute::MultiPath(hops) if gateway.is_none() && oif.is_none() => {
                    if let Some(hop) = hops.first() {
                        oif = Some(hop.interface_index);
                        gateway = hop.attributes.iter().find_map(|a| match a {
                            RouteAttribute::Gateway(addr) => from_route_address(addr),
                            _ => None,
                        });
                    }
                }
                _ => {}
            }
        }

        let dst = destination.unwrap_or_else(|| family.unspecified());
        let destination = IpNet::new(dst, msg.header.destination_prefix_length).ok()?;
        let nexthop = (gateway.is_some() || oif.is_some()).then_some(Nexthop {
            gateway,
            ifindex: oif,
        });

        Some(Route {
            family,
            table,
            protocol: u8::from(msg.header.protocol),
            scope: u8::from(msg.header.scope),
            kind: u8::from(msg.header.kind),
            priority,
            destination: Some(destination),
            nexthop,
        })
    }

    fn parse_link(msg: &LinkMessage) -> Option<Link> {
        let mut name = None;
        let mut mtu = None;
        let mut mac = None;
        for attr in &msg.attributes {
            match attr {
                LinkAttribute::IfName(n) => name = Some(n.clone()),
                LinkAttribute::Mtu(m) => mtu = Some(*m),
                LinkAttribute::Address(bytes) => mac = MacAddress::from_slice(bytes),
                _ => {}
            }
        }
        Some(Link {
            ifindex: msg.header.index,
            name: name?,
            up: msg.header.flags.contains(LinkFlags::Up),
            mtu,
            mac,
        })
    }

    fn parse_address(msg: &AddressMessage) -> Option<Address> {
        family_of(msg.header.family)?;
        let mut address = None;
        let mut local = None;
        for attr in &msg.attributes {
            match attr {
                AddressAttribute::Address(a) => address = Some(*a),
                AddressAttribute::Local(a) => local = Some(*a),
                _ => {}
            }
        }
        // IFA_LOCAL is the interface address; IFA_ADDRESS is the peer on p2p links
        let ip = local.or(address)?;
        Some(Address {
            ifindex: msg.header.index,
            address: IpNet::new(ip, msg.header.prefix_len).ok()?,
        })
    }

    fn parse_neighbour(msg: &NeighbourMessage) -> Option<Neighbor> {
        family_of(msg.header.family)?;
        let mut ip = None;
        let mut mac = None;
        for attr in &msg.attributes {
            match attr {
                NeighbourAttribute::Destination(NeighbourAddress::Inet(v4)) => {
                    ip = Some(IpAddr::V4(*v4))
                }
                NeighbourAttribute::Destination(NeighbourAddress::Inet6(v6)) => {
                    ip = Some(IpAddr::V6(*v6))
                }
                NeighbourAttribute::LinkLocalAddress(bytes) => mac = MacAddress::from_slice(bytes),
                _ => {}
            }
        }
        Some(Neighbor {
            ifindex: msg.header.ifindex,
            ip: ip?,
            mac,
            state: NeighborState::from_kernel(u16::from(msg.header.state)),
        })
    }

    /// Convert a kernel message to a cache notification
    pub fn parse_notification(msg: &RouteNetlinkMessage) -> Option<Notification> {
        use RouteNetlinkMessage as M;
        match msg {
            M::NewLink(m) => parse_link(m).map(|l| Notification::new(KernelObject::Link(l))),
            M::DelLink(m) => parse_link(m).map(|l| Notification::delete(KernelObject::Link(l))),
            M::NewAddress(m) => {
                parse_address(m).map(|a| Notification::new(KernelObject::Address(a)))
            }
            M::DelAddress(m) => {
                parse_address(m).map(|a| Notification::delete(KernelObject::Address(a)))
            }
            M::NewNeighbour(m) => {
                parse_neighbour(m).map(|n| Notification::new(KernelObject::Neighbor(n)))
            }
            M::DelNeighbour(m) => {
                parse_neighbour(m).map(|n| Notification::delete(KernelObject::Neighbor(n)))
            }
            M::NewRoute(m) => parse_route(m).map(|r| Notification::new(KernelObject::Route(r))),
            M::DelRoute(m) => parse_route(m).map(|r| Notification::delete(KernelObject::Route(r))),
            _ => None,
        }
    }

    /// Parse one received datagram into notifications.
    ///
    /// A message that does not parse ends the datagram; the notifications
    /// before it are kept.
    pub fn parse_datagram(buffer: &[u8]) -> Vec<Notification> {
        let mut notifications = Vec::new();
        let mut offset = 0;
        while offset < buffer.len() {
            let msg = match NetlinkMessage::<RouteNetlinkMessage>::deserialize(&buffer[offset..]) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(
                        offset,
                        len = buffer.len(),
                        error = %e,
                        "Skipping unparsable kernel message"
                    );
                    break;
                }
            };
            let msg_len = msg.header.length as usize;
            if msg_len == 0 {
                break;
            }
            offset += (msg_len + 3) & !3;

            if let NetlinkPayload::InnerMessage(inner) = &msg.payload {
                match parse_notification(inner) {
                    Some(notification) => notifications.push(notification),
                    None => trace!("Ignoring unsupported kernel message"),
                }
            }
        }
        notifications
    }

    fn dump_request(kind: CacheKind) -> RouteNetlinkMessage {
        match kind {
            CacheKind::Links => RouteNetlinkMessage::GetLink(LinkMessage::default()),
            CacheKind::Addresses => RouteNetlinkMessage::GetAddress(AddressMessage::default()),
            CacheKind::Neighbors => RouteNetlinkMessage::GetNeighbour(NeighbourMessage::default()),
            CacheKind::Routes => RouteNetlinkMessage::GetRoute(RouteMessage::default()),
        }
    }

    struct Requester {
        socket: Socket,
        sequence: u32,
    }

    impl Requester {
        fn open() -> Result<Self> {
            Ok(Self {
                socket: open_socket()?,
                sequence: 0,
            })
        }

        fn request(
            &mut self,
            op: &'static str,
            flags: u16,
            payload: RouteNetlinkMessage,
        ) -> Result<Vec<RouteNetlinkMessage>> {
            self.sequence = self.sequence.wrapping_add(1);
            transact(&self.socket, self.sequence, op, flags, payload)
        }
    }

    /// Kernel notification channel: a monitor socket bound to the link,
    /// neighbor, address and route groups plus a separate dump socket.
    pub struct NetlinkChannel {
        monitor: Socket,
        buffer: Mutex<Vec<u8>>,
        dumper: Mutex<Requester>,
    }

    impl NetlinkChannel {
        /// Create and bind the monitor and dump sockets
        ///
        /// # NIST Controls
        /// - SC-5: DoS Protection - Receive buffer sized for bursts
        #[instrument]
        pub fn new(recv_buffer_size: usize) -> Result<Self> {
            let mut monitor = Socket::new(NETLINK_ROUTE)
                .map_err(|e| netlink_err("Failed to create socket", e))?;
            let groups = MONITOR_GROUPS
                .iter()
                .fold(0u32, |mask, group| mask | (1 << (group - 1)));
            monitor
                .bind(&SocketAddr::new(0, groups))
                .map_err(|e| netlink_err("Failed to bind socket", e))?;
            tune_socket(monitor.as_raw_fd(), recv_buffer_size);
            debug!(groups, "Netlink monitor bound");

            Ok(Self {
                monitor,
                buffer: Mutex::new(vec![0u8; RECV_BUFFER_LEN]),
                dumper: Mutex::new(Requester::open()?),
            })
        }

        /// Read every datagram pending on the monitor socket.
        ///
        /// After an overrun the socket is still emptied, and the batch is
        /// dropped in favour of [`KermondError::Overrun`].
        fn drain(&self) -> Result<Vec<Notification>> {
            let mut buffer = self.buffer.lock();
            let mut batch = Vec::new();
            let mut overrun = false;
            loop {
                let received = {
                    let mut slice = &mut buffer[..];
                    self.monitor.recv(&mut slice, libc::MSG_DONTWAIT)
                };
                match received {
                    Ok(0) => break,
                    Ok(len) => batch.extend(parse_datagram(&buffer[..len])),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) if e.raw_os_error() == Some(libc::ENOBUFS) => {
                        warn!("Netlink monitor overrun, notifications lost");
                        overrun = true;
                    }
                    Err(e) => return Err(netlink_err("Failed to receive", e)),
                }
            }
            if overrun {
                return Err(KermondError::Overrun);
            }
            Ok(batch)
        }
    }

    fn tune_socket(fd: i32, recv_buffer_size: usize) {
        unsafe {
            let size = recv_buffer_size as libc::c_int;
            let ret = libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_RCVBUF,
                &size as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            );
            if ret < 0 {
                warn!("Failed to set SO_RCVBUF, using default buffer size");
            } else {
                debug!(size = recv_buffer_size, "Set socket receive buffer");
            }
        }
    }

    impl KernelChannel for NetlinkChannel {
        #[instrument(skip(self))]
        fn dump(&self, kind: CacheKind) -> Result<Vec<KernelObject>> {
            let replies = self.dumper.lock().request(
                "dump",
                NLM_F_REQUEST | NLM_F_DUMP,
                dump_request(kind),
            )?;
            let objects: Vec<KernelObject> = replies
                .iter()
                .filter_map(parse_notification)
                .map(|n| n.object)
                .filter(|o| o.kind() == kind)
                .collect();
            debug!(%kind, count = objects.len(), "Dumped kernel table");
            Ok(objects)
        }

        fn poll(&self, timeout: Duration) -> Result<Vec<Notification>> {
            let mut pfd = libc::pollfd {
                fd: self.monitor.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            };
            let millis = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
            let ret = unsafe { libc::poll(&mut pfd, 1, millis) };
            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    return Err(KermondError::Interrupted);
                }
                return Err(netlink_err("Failed to poll", err));
            }
            if ret == 0 {
                return Ok(Vec::new());
            }
            self.drain()
        }
    }

    /// Socket for route add, replace and delete requests
    pub struct NetlinkRouteSocket {
        requester: Mutex<Requester>,
    }

    impl NetlinkRouteSocket {
        #[instrument]
        pub fn new() -> Result<Self> {
            Ok(Self {
                requester: Mutex::new(Requester::open()?),
            })
        }

        fn request(
            &self,
            op: &'static str,
            flags: u16,
            payload: RouteNetlinkMessage,
        ) -> Result<()> {
            self.requester
                .lock()
                .request(op, NLM_F_REQUEST | NLM_F_ACK | flags, payload)?;
            Ok(())
        }
    }

    impl RouteProgrammer for NetlinkRouteSocket {
        #[instrument(skip(self), fields(route = %route))]
        fn add_route(&self, route: &Route, exclusive: bool) -> Result<()> {
            let mut flags = NLM_F_CREATE;
            if exclusive {
                flags |= NLM_F_EXCL;
            }
            self.request(
                "add route",
                flags,
                RouteNetlinkMessage::NewRoute(route_message(route)),
            )
        }

        #[instrument(skip(self), fields(route = %route))]
        fn replace_route(&self, route: &Route) -> Result<()> {
            self.request(
                "replace route",
                NLM_F_CREATE | NLM_F_REPLACE,
                RouteNetlinkMessage::NewRoute(route_message(route)),
            )
        }

        #[instrument(skip(self), fields(route = %route))]
        fn delete_route(&self, route: &Route) -> Result<()> {
            self.request(
                "delete route",
                0,
                RouteNetlinkMessage::DelRoute(route_message(route)),
            )
        }
    }

}

#[cfg(target_os = "linux")]
pub use linux::*;

/// Mock implementation for non-Linux platforms (development only)
#[cfg(not(target_os = "linux"))]
mod mock {
    use crate::error::Result;
    use crate::kernel::{KernelChannel, RouteProgrammer};
    use crate::types::{CacheKind, KernelObject, Notification, Route};
    use std::time::Duration;

    pub struct NetlinkChannel;

    impl NetlinkChannel {
        #[allow(unused_variables)]
        pub fn new(recv_buffer_size: usize) -> Result<Self> {
            Ok(Self)
        }
    }

    impl KernelChannel for NetlinkChannel {
        fn dump(&self, _kind: CacheKind) -> Result<Vec<KernelObject>> {
            Ok(Vec::new())
        }

        fn poll(&self, timeout: Duration) -> Result<Vec<Notification>> {
            std::thread::sleep(timeout);
            Ok(Vec::new())
        }
    }

    pub struct NetlinkRouteSocket;

    impl NetlinkRouteSocket {
        pub fn new() -> Result<Self> {
            Ok(Self)
        }
    }

    impl RouteProgrammer for NetlinkRouteSocket {
        fn add_route(&self, _route: &Route, _exclusive: bool) -> Result<()> {
            Ok(())
        }

        fn replace_route(&self, _route: &Route) -> Result<()> {
            Ok(())
        }

        fn delete_route(&self, _route: &Route) -> Result<()> {
            Ok(())
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub use mock::*;
