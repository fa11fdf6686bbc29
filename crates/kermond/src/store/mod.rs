//! Configuration store seam
//!
//! The store is a flat map of slash-separated leaf paths to string values.
//! [`ConfigStore`] covers the synchronous reads and writes issued from the
//! main loop and the poll thread; [`ConfigWatcher`] delivers change
//! notifications to the main loop.

mod memory;
mod redis_adapter;

pub use self::memory::MemoryStore;
pub use self::redis_adapter::RedisStore;

use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::debug;

/// Leaf change notification. `value == None` means the leaf was deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigChange {
    pub path: String,
    pub value: Option<String>,
}

impl ConfigChange {
    pub fn set(path: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            value: Some(value.into()),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            value: None,
        }
    }
}

/// Synchronous store access
pub trait ConfigStore: Send + Sync {
    fn get(&self, path: &str) -> Result<Option<String>>;

    /// Every leaf strictly below `path`, keyed by full leaf path
    fn get_tree(&self, path: &str) -> Result<BTreeMap<String, String>>;

    /// Write a leaf; `None` deletes it
    fn set(&self, path: &str, value: Option<&str>) -> Result<()>;

    /// Delete `path` and every leaf below it
    fn prune(&self, path: &str) -> Result<()>;
}

/// Change notification source
#[async_trait]
pub trait ConfigWatcher: Send + Sync {
    /// Watch every leaf under each pattern's prefix (`<prefix>/*`)
    async fn watch(&self, patterns: &[&str]) -> Result<mpsc::UnboundedReceiver<ConfigChange>>;
}

/// Invoke `handler` for every leaf under `path` as if it had just been set.
///
/// Returns the number of leaves replayed.
pub fn rewatch_tree<F>(store: &dyn ConfigStore, path: &str, mut handler: F) -> Result<usize>
where
    F: FnMut(&str, Option<&str>) -> bool,
{
    let tree = store.get_tree(path)?;
    debug!(path, leaves = tree.len(), "Replaying configuration");
    for (leaf, value) in &tree {
        handler(leaf, Some(value));
    }
    Ok(tree.len())
}

/// True if `path` is matched by a watch pattern (`<prefix>/*` or exact)
pub fn pattern_matches(pattern: &str, path: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => path.starts_with(prefix),
        None => pattern == path,
    }
}
