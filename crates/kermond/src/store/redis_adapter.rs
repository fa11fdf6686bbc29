//! Redis-backed configuration store
//!
//! Each leaf path is a Redis string key (`/routing/ipv4/rib/3/prefix`).
//! Watches use keyspace notifications, which are enabled on connect.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SC-8: Transmission Confidentiality - Database communication
//! - CM-6: Configuration Settings - Configuration read from the store

use super::{ConfigChange, ConfigStore, ConfigWatcher};
use crate::error::Result;
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Commands, Connection};
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::{debug, instrument, trace, warn};

/// Keyspace events: keyspace channel, string commands, generic commands
const KEYSPACE_EVENTS: &str = "K$g";

/// Configuration store over a single Redis database
pub struct RedisStore {
    client: Client,
    conn: Mutex<Connection>,
    db: i64,
}

impl RedisStore {
    /// Connect and enable keyspace notifications
    #[instrument]
    pub fn connect(host: &str, port: u16, db: i64) -> Result<Self> {
        let url = format!("redis://{}:{}/{}", host, port, db);
        let client = Client::open(url)?;
        let mut conn = client.get_connection()?;

        let enabled: redis::RedisResult<()> = redis::cmd("CONFIG")
            .arg("SET")
            .arg("notify-keyspace-events")
            .arg(KEYSPACE_EVENTS)
            .query(&mut conn);
        if let Err(e) = enabled {
            warn!(error = %e, "Failed to enable keyspace notifications, watches may be silent");
        }

        debug!(host, port, db, "Connected to configuration store");
        Ok(Self {
            client,
            conn: Mutex::new(conn),
            db,
        })
    }

    fn channel_prefix(&self) -> String {
        format!("__keyspace@{}__:", self.db)
    }

    fn keys_below(conn: &mut Connection, path: &str) -> Result<Vec<String>> {
        let pattern = format!("{}/*", path.trim_end_matches('/'));
        let mut keys: Vec<String> = conn.scan_match(&pattern)?.collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

impl ConfigStore for RedisStore {
    fn get(&self, path: &str) -> Result<Option<String>> {
        Ok(self.conn.lock().get(path)?)
    }

    fn get_tree(&self, path: &str) -> Result<BTreeMap<String, String>> {
        let mut conn = self.conn.lock();
        let keys = Self::keys_below(&mut conn, path)?;
        if keys.is_empty() {
            return Ok(BTreeMap::new());
        }

        let values: Vec<Option<String>> = redis::cmd("MGET").arg(&keys).query(&mut *conn)?;
        // Keys deleted between SCAN and MGET come back as nil
        Ok(keys
            .into_iter()
            .zip(values)
            .filter_map(|(key, value)| value.map(|v| (key, v)))
            .collect())
    }

    fn set(&self, path: &str, value: Option<&str>) -> Result<()> {
        let mut conn = self.conn.lock();
        match value {
            Some(value) => conn.set::<_, _, ()>(path, value)?,
            None => conn.del::<_, ()>(path)?,
        }
        trace!(path, value, "Store write");
        Ok(())
    }

    fn prune(&self, path: &str) -> Result<()> {
        let mut conn = self.conn.lock();
        let mut keys = Self::keys_below(&mut conn, path)?;
        keys.push(path.to_string());
        conn.del::<_, ()>(&keys)?;
        debug!(path, count = keys.len() - 1, "Pruned subtree");
        Ok(())
    }
}

#[async_trait]
impl ConfigWatcher for RedisStore {
    #[instrument(skip(self))]
    async fn watch(&self, patterns: &[&str]) -> Result<mpsc::UnboundedReceiver<ConfigChange>> {
        let prefix = self.channel_prefix();
        let mut pubsub = self.client.get_async_pubsub().await?;
        for pattern in patterns {
            pubsub.psubscribe(format!("{}{}", prefix, pattern)).await?;
        }
        let mut reader = ConnectionManager::new(self.client.clone()).await?;
        let (sender, receiver) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                let Some(path) = msg.get_channel_name().strip_prefix(&prefix) else {
                    continue;
                };
                let event: String = match msg.get_payload() {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "Unreadable keyspace event");
                        continue;
                    }
                };

                let value = match event.as_str() {
                    "set" => match reader.get::<_, Option<String>>(path).await {
                        Ok(value) => value,
                        Err(e) => {
                            warn!(path, error = %e, "Failed to read changed leaf");
                            continue;
                        }
                    },
                    "del" | "expired" | "evicted" => None,
                    _ => continue,
                };

                let change = ConfigChange {
                    path: path.to_string(),
                    value,
                };
                if sender.send(change).is_err() {
                    break;
                }
            }
            debug!("Configuration watch closed");
        });

        Ok(receiver)
    }
}
