//! Interface name directory fed by the link cache

use crate::kernel::InterfaceResolver;
use crate::types::{ChangeAction, ChangeEvent, KernelObject};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::trace;

/// Name to ifindex map kept current from link change events.
///
/// Lookups of names the link cache has not seen fall back to the OS when
/// `os_fallback` is set.
pub struct LinkDirectory {
    by_name: RwLock<HashMap<String, u32>>,
    os_fallback: bool,
}

impl LinkDirectory {
    pub fn new(os_fallback: bool) -> Self {
        Self {
            by_name: RwLock::new(HashMap::new()),
            os_fallback,
        }
    }

    pub fn len(&self) -> usize {
        self.by_name.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.read().is_empty()
    }

    /// Track a link cache change
    pub fn apply(&self, event: &ChangeEvent) {
        let KernelObject::Link(link) = &event.current else {
            return;
        };
        let mut by_name = self.by_name.write();
        if let Some(KernelObject::Link(old)) = &event.previous {
            if old.name != link.name {
                by_name.remove(&old.name);
            }
        }
        match event.action {
            ChangeAction::Created | ChangeAction::Updated => {
                by_name.insert(link.name.clone(), link.ifindex);
            }
            ChangeAction::Deleted => {
                if by_name.get(&link.name) == Some(&link.ifindex) {
                    by_name.remove(&link.name);
                }
            }
        }
        trace!(
            ifname = %link.name,
            ifindex = link.ifindex,
            action = ?event.action,
            "Link directory updated"
        );
    }

    fn os_lookup(name: &str) -> Option<u32> {
        #[cfg(target_os = "linux")]
        {
            nix::net::if_::if_nametoindex(name).ok().filter(|&i| i != 0)
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = name;
            None
        }
    }
}

impl InterfaceResolver for LinkDirectory {
    fn ifindex(&self, name: &str) -> Option<u32> {
        if let Some(&ifindex) = self.by_name.read().get(name) {
            return Some(ifindex);
        }
        if self.os_fallback {
            Self::os_lookup(name)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Link;

    fn link(ifindex: u32, name: &str) -> KernelObject {
        KernelObject::Link(Link {
            ifindex,
            name: name.to_string(),
            up: true,
            mtu: None,
            mac: None,
        })
    }

    #[test]
    fn test_tracks_create_rename_delete() {
        let dir = LinkDirectory::new(false);
        dir.apply(&ChangeEvent::created(link(4, "eth0")));
        assert_eq!(dir.ifindex("eth0"), Some(4));

        dir.apply(&ChangeEvent {
            kind: crate::types::CacheKind::Links,
            action: ChangeAction::Updated,
            previous: Some(link(4, "eth0")),
            current: link(4, "wan0"),
        });
        assert_eq!(dir.ifindex("eth0"), None);
        assert_eq!(dir.ifindex("wan0"), Some(4));

        dir.apply(&ChangeEvent {
            kind: crate::types::CacheKind::Links,
            action: ChangeAction::Deleted,
            previous: None,
            current: link(4, "wan0"),
        });
        assert!(dir.is_empty());
    }

    #[test]
    fn test_ignores_other_objects() {
        let dir = LinkDirectory::new(false);
        dir.apply(&ChangeEvent::created(KernelObject::Address(crate::types::Address {
            ifindex: 1,
            address: "10.0.0.1/8".parse().unwrap(),
        })));
        assert_eq!(dir.len(), 0);
    }
}
