//! End-to-end daemon tests over in-memory store and fake kernel

mod common;

#[cfg(test)]
mod tests {
    use super::common::{FakeChannel, RecordingKernel, kernel_route, link};
    use async_trait::async_trait;
    use kermond::{
        AddressFamily, ConfigChange, ConfigStore, ConfigWatcher, Daemon, KermondConfig,
        KermondError, KernelObject, MemoryStore, Nexthop, Notification, Result, route_key,
    };
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn config() -> KermondConfig {
        let mut config = KermondConfig::default();
        config.netlink.poll_interval_ms = 10;
        config.rib.ifname_os_fallback = false;
        config
    }

    async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
        for _ in 0..400 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cond()
    }

    fn fib_leaves(store: &MemoryStore) -> Vec<String> {
        store
            .snapshot()
            .into_keys()
            .filter(|k| k.contains("/fib/"))
            .collect()
    }

    /// Watch whose stream ends right away, as a dropped pubsub link does
    struct ClosedWatch;

    #[async_trait]
    impl ConfigWatcher for ClosedWatch {
        async fn watch(&self, _patterns: &[&str]) -> Result<mpsc::UnboundedReceiver<ConfigChange>> {
            let (_, rx) = mpsc::unbounded_channel();
            Ok(rx)
        }
    }

    #[tokio::test]
    async fn test_configuration_round_trip() {
        let store = Arc::new(MemoryStore::new());
        store.set("/routing/ipv4/fib/left_over", Some("left_over")).unwrap();
        store.set("/routing/ipv4/rib/1/prefix", Some("10.1.0.0/16")).unwrap();
        store.set("/routing/ipv4/rib/1/ifname", Some("eth0")).unwrap();

        let channel = FakeChannel::with_objects(vec![link(1, "lo"), link(2, "eth0")]);
        let kernel = RecordingKernel::new();
        let daemon = Daemon::new(
            &config(),
            store.clone(),
            store.clone(),
            channel.clone(),
            kernel.clone(),
        )
        .unwrap();
        let shutdown = daemon.shutdown_token();
        let rib = Arc::clone(daemon.rib());
        let running = tokio::spawn(daemon.run());

        // Existing configuration is replayed at start
        assert!(eventually(|| kernel.adds() == 1).await);
        assert!(eventually(|| !store.snapshot().contains_key("/routing/ipv4/fib/left_over")).await);

        // Live edits flow through the watch
        store.set("/routing/ipv6/rib/4/prefix", Some("2001:db8::/32")).unwrap();
        store.set("/routing/ipv6/rib/4/nexthop", Some("fe80::1")).unwrap();
        assert!(eventually(|| kernel.adds() == 2).await);
        assert_eq!(rib.len(AddressFamily::Ipv6), 1);

        // Kernel routes are mirrored as they appear
        let installed = kernel_route("10.1.0.0/16", Nexthop::device(2), 0);
        channel.push(Notification::new(KernelObject::Route(installed.clone())));
        let leaf = format!("/routing/ipv4/fib/{}", route_key(&installed));
        assert!(eventually(|| fib_leaves(&store) == vec![leaf.clone()]).await);

        shutdown.cancel();
        running.await.unwrap().unwrap();

        assert_eq!(kernel.deletes(), 2);
        assert!(rib.is_empty());
        assert!(fib_leaves(&store).is_empty());
        // Configuration itself survives shutdown
        assert_eq!(
            store.get("/routing/ipv4/rib/1/ifname").unwrap().as_deref(),
            Some("eth0")
        );
    }

    #[tokio::test]
    async fn test_kernel_failure_stops_daemon() {
        let store = Arc::new(MemoryStore::new());
        store.set("/routing/ipv4/rib/1/prefix", Some("default")).unwrap();
        store.set("/routing/ipv4/rib/1/nexthop", Some("192.0.2.1")).unwrap();

        let channel = FakeChannel::new();
        let kernel = RecordingKernel::new();
        let daemon = Daemon::new(
            &config(),
            store.clone(),
            store.clone(),
            channel.clone(),
            kernel.clone(),
        )
        .unwrap();
        let shutdown = daemon.shutdown_token();
        let running = tokio::spawn(daemon.run());

        assert!(eventually(|| kernel.adds() == 1).await);
        channel.fail_polls(true);

        tokio::time::timeout(Duration::from_secs(2), running)
            .await
            .expect("daemon exits after a kernel failure")
            .unwrap()
            .unwrap();
        assert!(shutdown.is_cancelled());
        assert_eq!(kernel.deletes(), 1);
    }

    #[tokio::test]
    async fn test_route_cache_failure_aborts_start() {
        let store = Arc::new(MemoryStore::new());
        let channel = FakeChannel::new();
        channel.fail_dumps(true);
        let kernel = RecordingKernel::new();
        let daemon = Daemon::new(&config(), store.clone(), store, channel, kernel.clone()).unwrap();
        let shutdown = daemon.shutdown_token();

        assert!(daemon.run().await.is_err());
        assert!(shutdown.is_cancelled());
        assert!(kernel.calls().is_empty());
    }

    #[tokio::test]
    async fn test_closed_watch_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        store.set("/routing/ipv4/rib/1/prefix", Some("default")).unwrap();
        store.set("/routing/ipv4/rib/1/nexthop", Some("192.0.2.1")).unwrap();

        let kernel = RecordingKernel::new();
        let daemon = Daemon::new(
            &config(),
            store.clone(),
            Arc::new(ClosedWatch),
            FakeChannel::new(),
            kernel.clone(),
        )
        .unwrap();
        let shutdown = daemon.shutdown_token();

        let result = tokio::time::timeout(Duration::from_secs(2), daemon.run())
            .await
            .expect("daemon exits when its watch closes");
        assert!(matches!(result, Err(KermondError::WatchClosed)));
        assert!(shutdown.is_cancelled());
        // The startup replay still ran and was rolled back
        assert_eq!(kernel.adds(), 1);
        assert_eq!(kernel.deletes(), 1);
    }
}
