//! In-process configuration store

use super::{ConfigChange, ConfigStore, ConfigWatcher, pattern_matches};
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use tokio::sync::mpsc;

struct Watch {
    patterns: Vec<String>,
    sender: mpsc::UnboundedSender<ConfigChange>,
}

/// Configuration store held in memory, with watch support
#[derive(Default)]
pub struct MemoryStore {
    leaves: RwLock<BTreeMap<String, String>>,
    watches: Mutex<Vec<Watch>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every leaf currently stored
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.leaves.read().clone()
    }

    fn notify(&self, change: ConfigChange) {
        let mut watches = self.watches.lock();
        watches.retain(|watch| !watch.sender.is_closed());
        for watch in watches.iter() {
            if watch.patterns.iter().any(|p| pattern_matches(p, &change.path)) {
                let _ = watch.sender.send(change.clone());
            }
        }
    }
}

impl ConfigStore for MemoryStore {
    fn get(&self, path: &str) -> Result<Option<String>> {
        Ok(self.leaves.read().get(path).cloned())
    }

    fn get_tree(&self, path: &str) -> Result<BTreeMap<String, String>> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        Ok(self
            .leaves
            .read()
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn set(&self, path: &str, value: Option<&str>) -> Result<()> {
        let changed = {
            let mut leaves = self.leaves.write();
            match value {
                Some(value) => {
                    let previous = leaves.insert(path.to_string(), value.to_string());
                    previous.as_deref() != Some(value)
                }
                None => leaves.remove(path).is_some(),
            }
        };
        if changed {
            self.notify(ConfigChange {
                path: path.to_string(),
                value: value.map(str::to_string),
            });
        }
        Ok(())
    }

    fn prune(&self, path: &str) -> Result<()> {
        let mut doomed: Vec<String> = self.get_tree(path)?.into_keys().collect();
        if self.leaves.read().contains_key(path) {
            doomed.push(path.to_string());
        }
        for leaf in doomed {
            self.set(&leaf, None)?;
        }
        Ok(())
    }
}

#[async_trait]
impl ConfigWatcher for MemoryStore {
    async fn watch(&self, patterns: &[&str]) -> Result<mpsc::UnboundedReceiver<ConfigChange>> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.watches.lock().push(Watch {
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            sender,
        });
        Ok(receiver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_tree_is_strictly_below() {
        let store = MemoryStore::new();
        store.set("/routing/ipv4/rib/1/prefix", Some("10.0.0.0/8")).unwrap();
        store.set("/routing/ipv4/rib/10/prefix", Some("10.10.0.0/16")).unwrap();
        store.set("/routing/ipv4/rib", Some("ignored")).unwrap();

        let tree = store.get_tree("/routing/ipv4/rib/1").unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree["/routing/ipv4/rib/1/prefix"], "10.0.0.0/8");

        assert_eq!(store.get_tree("/routing/ipv4/rib").unwrap().len(), 2);
    }

    #[test]
    fn test_prune_removes_subtree() {
        let store = MemoryStore::new();
        store.set("/routing/ipv4/fib/a", Some("a")).unwrap();
        store.set("/routing/ipv4/fib/b", Some("b")).unwrap();
        store.set("/routing/ipv6/fib/c", Some("c")).unwrap();

        store.prune("/routing/ipv4/fib").unwrap();
        let left = store.snapshot();
        assert_eq!(left.len(), 1);
        assert!(left.contains_key("/routing/ipv6/fib/c"));
    }

    #[tokio::test]
    async fn test_watch_delivers_matching_changes() {
        let store = MemoryStore::new();
        let mut rx = store.watch(&["/routing/ipv4/rib/*"]).await.unwrap();

        store.set("/routing/ipv4/rib/1/metric", Some("5")).unwrap();
        store.set("/routing/ipv6/rib/1/metric", Some("5")).unwrap();
        store.set("/routing/ipv4/rib/1/metric", None).unwrap();

        assert_eq!(rx.recv().await.unwrap(), ConfigChange::set("/routing/ipv4/rib/1/metric", "5"));
        assert_eq!(rx.recv().await.unwrap(), ConfigChange::delete("/routing/ipv4/rib/1/metric"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unchanged_write_is_not_notified() {
        let store = MemoryStore::new();
        store.set("/a/b", Some("1")).unwrap();
        let mut rx = store.watch(&["/a/*"]).await.unwrap();
        store.set("/a/b", Some("1")).unwrap();
        store.set("/a/c", None).unwrap();
        assert!(rx.try_recv().is_err());
    }
}
