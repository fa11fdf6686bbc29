//! RIB daemon module

use super::RibEngine;
use crate::error::Result;
use crate::interfaces::LinkDirectory;
use crate::module::{Module, ModuleContext};
use crate::mux::SubscriberId;
use crate::types::{CacheKind, ChangeAction, ChangeEvent, KernelObject};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Owns the engine's link subscription and its shutdown
pub struct RibModule {
    engine: Arc<RibEngine>,
    directory: Arc<LinkDirectory>,
    subscription: Mutex<Option<SubscriberId>>,
}

impl RibModule {
    /// `directory` must be the resolver the engine was built with
    pub fn new(engine: Arc<RibEngine>, directory: Arc<LinkDirectory>) -> Self {
        Self {
            engine,
            directory,
            subscription: Mutex::new(None),
        }
    }

    fn on_link(engine: &RibEngine, directory: &LinkDirectory, event: &ChangeEvent) {
        directory.apply(event);
        let KernelObject::Link(link) = &event.current else {
            return;
        };
        match (event.action, &event.previous) {
            (ChangeAction::Created, _) => engine.interface_appeared(link),
            (ChangeAction::Updated, Some(KernelObject::Link(old))) if old.name != link.name => {
                engine.interface_appeared(link)
            }
            (ChangeAction::Deleted, _) => {
                engine.interface_removed(link);
            }
            _ => {}
        }
    }
}

impl Module for RibModule {
    fn name(&self) -> &'static str {
        "rib"
    }

    fn init(&self, ctx: &ModuleContext) -> Result<()> {
        debug!("RIB: Initialising");
        let engine = Arc::clone(&self.engine);
        let directory = Arc::clone(&self.directory);
        let id = ctx.mux.subscribe(
            CacheKind::Links,
            Arc::new(move |event: &ChangeEvent| {
                Self::on_link(&engine, &directory, event)
            }),
        )?;
        *self.subscription.lock() = Some(id);
        Ok(())
    }

    fn start(&self, _ctx: &ModuleContext) -> Result<()> {
        self.engine.start()?;
        Ok(())
    }

    fn exit(&self, ctx: &ModuleContext) {
        debug!("RIB: Exiting");
        if let Some(id) = self.subscription.lock().take() {
            ctx.mux.unsubscribe(CacheKind::Links, id);
        }
        self.engine.shutdown();
    }
}
