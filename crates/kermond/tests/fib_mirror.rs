//! Integration tests for the kernel route mirror

mod common;

#[cfg(test)]
mod tests {
    use super::common::{FakeChannel, kernel_route, metrics};
    use kermond::fib::FibModule;
    use kermond::module::{Module, ModuleContext};
    use kermond::{
        CacheKind, CacheMux, ConfigStore, FibMirror, KernelObject, MemoryStore, Nexthop,
        Notification, route_key,
    };
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct Harness {
        store: Arc<MemoryStore>,
        mux: Arc<CacheMux>,
        ctx: ModuleContext,
        module: FibModule,
    }

    fn harness(kernel_routes: Vec<KernelObject>) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let mux = Arc::new(
            CacheMux::new(
                FakeChannel::with_objects(kernel_routes),
                CancellationToken::new(),
                metrics(),
            )
            .with_poll_interval(Duration::from_millis(10)),
        );
        mux.start().unwrap();
        let ctx = ModuleContext {
            mux: Arc::clone(&mux),
        };
        let module = FibModule::new(Arc::new(FibMirror::new(store.clone())));
        Harness {
            store,
            mux,
            ctx,
            module,
        }
    }

    fn fib_leaves(store: &MemoryStore) -> Vec<String> {
        store
            .snapshot()
            .into_keys()
            .filter(|k| k.contains("/fib/"))
            .collect()
    }

    #[test]
    fn test_init_prunes_and_publishes_dump() {
        let connected = kernel_route("10.0.0.0/24", Nexthop::device(2), 256);
        let default = kernel_route("::/0", Nexthop::gateway("fe80::1".parse().unwrap()), 1024);
        let h = harness(vec![
            KernelObject::Route(connected.clone()),
            KernelObject::Route(default.clone()),
        ]);

        h.store.set("/routing/ipv4/fib/stale_entry", Some("stale")).unwrap();
        h.store.set("/routing/ipv4/rib/1/prefix", Some("10.9.0.0/16")).unwrap();

        h.module.init(&h.ctx).unwrap();

        let key4 = route_key(&connected);
        let key6 = route_key(&default);
        assert_eq!(
            fib_leaves(&h.store),
            vec![
                format!("/routing/ipv4/fib/{key4}"),
                format!("/routing/ipv6/fib/{key6}"),
            ]
        );
        assert_eq!(
            h.store.get(&format!("/routing/ipv4/fib/{key4}")).unwrap(),
            Some(key4.clone())
        );
        // Configuration outside the mirror is left alone
        assert!(h.store.get("/routing/ipv4/rib/1/prefix").unwrap().is_some());
    }

    #[test]
    fn test_kernel_changes_follow_through() {
        let h = harness(Vec::new());
        h.module.init(&h.ctx).unwrap();
        assert!(fib_leaves(&h.store).is_empty());

        let route = kernel_route("192.0.2.0/24", Nexthop::device(2), 0);
        h.mux.inject(Notification::new(KernelObject::Route(route.clone())));
        assert_eq!(fib_leaves(&h.store).len(), 1);

        // Same kernel identity, new nexthop: the old key is withdrawn
        let mut moved = route.clone();
        moved.nexthop = Some(Nexthop::device(3));
        h.mux.inject(Notification::new(KernelObject::Route(moved.clone())));
        assert_eq!(
            fib_leaves(&h.store),
            vec![format!("/routing/ipv4/fib/{}", route_key(&moved))]
        );

        h.mux.inject(Notification::delete(KernelObject::Route(moved)));
        assert!(fib_leaves(&h.store).is_empty());
    }

    #[test]
    fn test_non_main_tables_are_skipped() {
        let h = harness(Vec::new());
        h.module.init(&h.ctx).unwrap();

        let mut local = kernel_route("127.0.0.1/32", Nexthop::device(1), 0);
        local.table = 255;
        h.mux.inject(Notification::new(KernelObject::Route(local)));
        assert!(fib_leaves(&h.store).is_empty());
    }

    #[test]
    fn test_exit_unsubscribes_and_prunes() {
        let h = harness(vec![KernelObject::Route(kernel_route(
            "10.0.0.0/8",
            Nexthop::device(2),
            0,
        ))]);
        h.module.init(&h.ctx).unwrap();
        assert_eq!(h.mux.subscriber_count(CacheKind::Routes), 1);
        assert_eq!(fib_leaves(&h.store).len(), 1);

        h.module.exit(&h.ctx);
        assert_eq!(h.mux.subscriber_count(CacheKind::Routes), 0);
        assert_eq!(h.mux.cache_generation(CacheKind::Routes), None);
        assert!(fib_leaves(&h.store).is_empty());
    }
}
