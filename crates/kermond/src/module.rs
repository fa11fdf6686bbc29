//! Daemon module lifecycle
//!
//! Modules are initialised and started in registration order and exited in
//! reverse order. Only modules whose `init` succeeded are exited.

use crate::error::Result;
use crate::mux::CacheMux;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Shared handles passed to every module hook
pub struct ModuleContext {
    pub mux: Arc<CacheMux>,
}

/// A unit of daemon functionality with explicit setup and teardown
pub trait Module: Send + Sync {
    fn name(&self) -> &'static str;

    /// Allocate resources and register kernel cache subscriptions
    fn init(&self, ctx: &ModuleContext) -> Result<()>;

    /// Begin work once every module is initialised
    fn start(&self, _ctx: &ModuleContext) -> Result<()> {
        Ok(())
    }

    /// Release everything `init` acquired
    fn exit(&self, ctx: &ModuleContext);
}

/// Ordered set of modules
#[derive(Default)]
pub struct ModuleSet {
    modules: Vec<Box<dyn Module>>,
    initialised: usize,
}

impl ModuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module: Box<dyn Module>) {
        debug!(module = module.name(), "Registered module");
        self.modules.push(module);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.modules.iter().map(|m| m.name()).collect()
    }

    /// Init every module, then start every module. Stops at the first failure;
    /// `exit` must still be called afterwards.
    pub fn start(&mut self, ctx: &ModuleContext) -> Result<()> {
        for module in &self.modules {
            if let Err(e) = module.init(ctx) {
                error!(module = module.name(), error = %e, "Module init failed");
                return Err(e);
            }
            self.initialised += 1;
        }
        for module in &self.modules {
            if let Err(e) = module.start(ctx) {
                error!(module = module.name(), error = %e, "Module start failed");
                return Err(e);
            }
        }
        info!(modules = ?self.names(), "Modules running");
        Ok(())
    }

    /// Exit initialised modules in reverse registration order
    pub fn exit(&mut self, ctx: &ModuleContext) {
        for module in self.modules[..self.initialised].iter().rev() {
            debug!(module = module.name(), "Exiting module");
            module.exit(ctx);
        }
        self.initialised = 0;
    }
}
