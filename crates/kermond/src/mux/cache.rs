//! Per-kind mirror of kernel objects

use crate::types::{ChangeAction, ChangeEvent, KernelObject, Notification, NotifyOp, ObjectKey};
use std::collections::BTreeMap;

/// Ordered mirror of one kernel object family.
///
/// Iteration order is the key order, so replays are reproducible.
#[derive(Debug, Default)]
pub struct KernelCache {
    objects: BTreeMap<ObjectKey, KernelObject>,
}

impl KernelCache {
    pub fn from_objects(objects: impl IntoIterator<Item = KernelObject>) -> Self {
        let mut cache = Self::default();
        for object in objects {
            cache.objects.insert(object.key(), object);
        }
        cache
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn objects(&self) -> impl Iterator<Item = &KernelObject> {
        self.objects.values()
    }

    pub fn get(&self, key: &ObjectKey) -> Option<&KernelObject> {
        self.objects.get(key)
    }

    /// Apply a kernel notification, returning the resulting change if any
    pub fn apply(&mut self, notification: Notification) -> Option<ChangeEvent> {
        let kind = notification.object.kind();
        let key = notification.object.key();

        match notification.op {
            NotifyOp::New => {
                let current = notification.object;
                match self.objects.insert(key, current.clone()) {
                    None => Some(ChangeEvent {
                        kind,
                        action: ChangeAction::Created,
                        previous: None,
                        current,
                    }),
                    Some(previous) if previous == current => None,
                    Some(previous) => Some(ChangeEvent {
                        kind,
                        action: ChangeAction::Updated,
                        previous: Some(previous),
                        current,
                    }),
                }
            }
            NotifyOp::Delete => self.objects.remove(&key).map(|cached| ChangeEvent {
                kind,
                action: ChangeAction::Deleted,
                previous: None,
                current: cached,
            }),
        }
    }

    /// Replace the contents with a fresh dump, returning the changes the
    /// missed notifications would have produced. Deletions come first.
    pub fn resync(
        &mut self,
        objects: impl IntoIterator<Item = KernelObject>,
    ) -> Vec<ChangeEvent> {
        let fresh = Self::from_objects(objects).objects;

        let mut events: Vec<ChangeEvent> = self
            .objects
            .iter()
            .filter(|(key, _)| !fresh.contains_key(key))
            .map(|(_, cached)| ChangeEvent {
                kind: cached.kind(),
                action: ChangeAction::Deleted,
                previous: None,
                current: cached.clone(),
            })
            .collect();

        for (key, current) in &fresh {
            match self.objects.get(key) {
                None => events.push(ChangeEvent::created(current.clone())),
                Some(previous) if previous == current => {}
                Some(previous) => events.push(ChangeEvent {
                    kind: current.kind(),
                    action: ChangeAction::Updated,
                    previous: Some(previous.clone()),
                    current: current.clone(),
                }),
            }
        }

        self.objects = fresh;
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CacheKind, Link};

    fn link(ifindex: u32, name: &str, up: bool) -> KernelObject {
        KernelObject::Link(Link {
            ifindex,
            name: name.to_string(),
            up,
            mtu: Some(1500),
            mac: None,
        })
    }

    #[test]
    fn test_new_then_update_then_delete() {
        let mut cache = KernelCache::default();

        let created = cache.apply(Notification::new(link(2, "eth0", false))).unwrap();
        assert_eq!(created.action, ChangeAction::Created);
        assert_eq!(created.kind, CacheKind::Links);
        assert!(created.previous.is_none());

        let updated = cache.apply(Notification::new(link(2, "eth0", true))).unwrap();
        assert_eq!(updated.action, ChangeAction::Updated);
        assert_eq!(updated.previous, Some(link(2, "eth0", false)));
        assert_eq!(updated.current, link(2, "eth0", true));

        let deleted = cache.apply(Notification::delete(link(2, "eth0", true))).unwrap();
        assert_eq!(deleted.action, ChangeAction::Deleted);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_identical_new_is_silent() {
        let mut cache = KernelCache::from_objects([link(2, "eth0", true)]);
        assert!(cache.apply(Notification::new(link(2, "eth0", true))).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_delete_unknown_is_silent() {
        let mut cache = KernelCache::default();
        assert!(cache.apply(Notification::delete(link(9, "gone", false))).is_none());
    }

    #[test]
    fn test_deleted_event_carries_cached_snapshot() {
        let mut cache = KernelCache::from_objects([link(4, "eth1", true)]);
        // Kernel delete messages may carry less detail than the cached copy
        let event = cache
            .apply(Notification::delete(link(4, "eth1", false)))
            .unwrap();
        assert_eq!(event.current, link(4, "eth1", true));
    }

    #[test]
    fn test_iteration_in_key_order() {
        let cache =
            KernelCache::from_objects([link(7, "c", true), link(1, "a", true), link(3, "b", true)]);
        let order: Vec<u32> = cache
            .objects()
            .filter_map(|o| o.as_link().map(|l| l.ifindex))
            .collect();
        assert_eq!(order, vec![1, 3, 7]);
    }

    #[test]
    fn test_resync_reports_missed_changes() {
        let mut cache = KernelCache::from_objects([
            link(2, "eth0", true),
            link(3, "eth1", true),
            link(4, "eth2", true),
        ]);

        let events = cache.resync([
            link(2, "eth0", true),
            link(3, "eth1", false),
            link(5, "eth3", true),
        ]);
        let summary: Vec<(ChangeAction, u32)> = events
            .iter()
            .map(|e| (e.action, e.current.as_link().map_or(0, |l| l.ifindex)))
            .collect();
        assert_eq!(
            summary,
            vec![
                (ChangeAction::Deleted, 4),
                (ChangeAction::Updated, 3),
                (ChangeAction::Created, 5),
            ]
        );
        assert_eq!(events[1].previous, Some(link(3, "eth1", true)));
        assert_eq!(cache.len(), 3);
        assert!(cache.get(&link(4, "eth2", true).key()).is_none());
    }

    #[test]
    fn test_resync_with_identical_dump_is_silent() {
        let mut cache = KernelCache::from_objects([link(2, "eth0", true)]);
        assert!(cache.resync([link(2, "eth0", true)]).is_empty());
        assert_eq!(cache.len(), 1);
    }
}
