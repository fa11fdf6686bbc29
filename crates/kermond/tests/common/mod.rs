//! Shared fakes for the kernel seams

#![allow(dead_code)]

use kermond::types::Link;
use kermond::{
    CacheKind, InterfaceResolver, KermondError, KernelChannel, KernelObject, Metrics, Nexthop,
    Notification, Result, Route, RouteProgrammer,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// One route request seen by [`RecordingKernel`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelCall {
    Add(Route),
    Replace(Route),
    Delete(Route),
}

/// Route programmer that records every request
#[derive(Default)]
pub struct RecordingKernel {
    calls: Mutex<Vec<KernelCall>>,
    fail_adds: AtomicBool,
}

impl RecordingKernel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<KernelCall> {
        self.calls.lock().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    /// Make subsequent adds fail with EEXIST
    pub fn fail_adds(&self, fail: bool) {
        self.fail_adds.store(fail, Ordering::SeqCst);
    }

    pub fn count(&self, pred: impl Fn(&KernelCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    pub fn adds(&self) -> usize {
        self.count(|c| matches!(c, KernelCall::Add(_)))
    }

    pub fn deletes(&self) -> usize {
        self.count(|c| matches!(c, KernelCall::Delete(_)))
    }
}

impl RouteProgrammer for RecordingKernel {
    fn add_route(&self, route: &Route, exclusive: bool) -> Result<()> {
        assert!(exclusive, "configured routes are always added exclusively");
        self.calls.lock().push(KernelCall::Add(route.clone()));
        if self.fail_adds.load(Ordering::SeqCst) {
            return Err(KermondError::Kernel {
                op: "add route",
                source: std::io::Error::from_raw_os_error(libc::EEXIST),
            });
        }
        Ok(())
    }

    fn replace_route(&self, route: &Route) -> Result<()> {
        self.calls.lock().push(KernelCall::Replace(route.clone()));
        Ok(())
    }

    fn delete_route(&self, route: &Route) -> Result<()> {
        self.calls.lock().push(KernelCall::Delete(route.clone()));
        Ok(())
    }
}

/// Kernel channel backed by in-memory tables and a notification queue
#[derive(Default)]
pub struct FakeChannel {
    tables: Mutex<HashMap<CacheKind, Vec<KernelObject>>>,
    pending: Mutex<VecDeque<Notification>>,
    dumps: AtomicUsize,
    fail_dumps: AtomicBool,
    fail_polls: AtomicBool,
    overrun: AtomicBool,
}

impl FakeChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_objects(objects: Vec<KernelObject>) -> Arc<Self> {
        let channel = Self::default();
        {
            let mut tables = channel.tables.lock();
            for object in objects {
                tables.entry(object.kind()).or_default().push(object);
            }
        }
        Arc::new(channel)
    }

    /// Queue a notification for the poll thread
    pub fn push(&self, notification: Notification) {
        self.pending.lock().push_back(notification);
    }

    pub fn dumps(&self) -> usize {
        self.dumps.load(Ordering::SeqCst)
    }

    pub fn fail_dumps(&self, fail: bool) {
        self.fail_dumps.store(fail, Ordering::SeqCst);
    }

    pub fn fail_polls(&self, fail: bool) {
        self.fail_polls.store(fail, Ordering::SeqCst);
    }

    /// Replace the table the next dump of `kind` returns
    pub fn set_objects(&self, kind: CacheKind, objects: Vec<KernelObject>) {
        self.tables.lock().insert(kind, objects);
    }

    /// Report lost notifications on the next poll and discard the queue
    pub fn overrun(&self) {
        self.overrun.store(true, Ordering::SeqCst);
    }
}

impl KernelChannel for FakeChannel {
    fn dump(&self, kind: CacheKind) -> Result<Vec<KernelObject>> {
        self.dumps.fetch_add(1, Ordering::SeqCst);
        if self.fail_dumps.load(Ordering::SeqCst) {
            return Err(KermondError::Netlink("dump refused".into()));
        }
        Ok(self.tables.lock().get(&kind).cloned().unwrap_or_default())
    }

    fn poll(&self, timeout: Duration) -> Result<Vec<Notification>> {
        if self.fail_polls.load(Ordering::SeqCst) {
            return Err(KermondError::Netlink("socket closed".into()));
        }
        if self.overrun.swap(false, Ordering::SeqCst) {
            self.pending.lock().clear();
            return Err(KermondError::Overrun);
        }
        let batch: Vec<Notification> = self.pending.lock().drain(..).collect();
        if batch.is_empty() {
            std::thread::sleep(timeout.min(Duration::from_millis(5)));
        }
        Ok(batch)
    }
}

/// Fixed interface name table
pub struct StaticInterfaces(pub HashMap<String, u32>);

impl StaticInterfaces {
    pub fn new(names: &[(&str, u32)]) -> Arc<Self> {
        Arc::new(Self(
            names.iter().map(|(n, i)| (n.to_string(), *i)).collect(),
        ))
    }
}

impl InterfaceResolver for StaticInterfaces {
    fn ifindex(&self, name: &str) -> Option<u32> {
        self.0.get(name).copied()
    }
}

pub fn metrics() -> Arc<Metrics> {
    Arc::new(Metrics::new().expect("metrics registry"))
}

pub fn link(ifindex: u32, name: &str) -> KernelObject {
    KernelObject::Link(Link {
        ifindex,
        name: name.to_string(),
        up: true,
        mtu: Some(1500),
        mac: None,
    })
}

pub fn kernel_route(dst: &str, nexthop: Nexthop, priority: u32) -> Route {
    let net: ipnet::IpNet = dst.parse().expect("valid prefix");
    let family = kermond::AddressFamily::of(&net.addr());
    let mut route = Route::new_static(family);
    route.destination = Some(net);
    route.nexthop = Some(nexthop);
    route.priority = priority;
    route
}

/// Block until `cond` holds or two seconds pass
pub fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}
