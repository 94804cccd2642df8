//! The substrate context: every registry plus the per-tick driver contract
//!
//! A [`Substrate`] owns the type hierarchy, hook registry, service
//! dispatcher, weaver, event bus and module scheduler, and gives them one
//! explicit `startup`/`shutdown` lifecycle. A process-wide slot holds the
//! active instance; tests install their own and reset it afterwards.

use crate::classification::{load_classification, HookLibrary, LoadReport, StaticClassification};
use crate::clock::{Clock, SystemClock};
use crate::error::SubstrateError;
use crate::event::EventBus;
use crate::registry::TypeHandlerRegistry;
use crate::scheduler::{ModuleScheduler, SchedulerConfig};
use crate::service::LifecycleServiceDispatcher;
use crate::types::TypeHierarchy;
use crate::weaver::AspectWeaver;
use crate::Result;
use arc_swap::ArcSwapOption;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Configuration for a [`Substrate`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubstrateConfig {
    pub scheduler: SchedulerConfig,
    pub classification: StaticClassification,
}

/// Owns every registry and drives ticks
pub struct Substrate {
    hierarchy: Arc<TypeHierarchy>,
    registry: Arc<TypeHandlerRegistry>,
    services: Arc<LifecycleServiceDispatcher>,
    weaver: AspectWeaver,
    events: Arc<EventBus>,
    scheduler: ModuleScheduler,
    classification: StaticClassification,
    running: AtomicBool,
    ticks: AtomicU64,
}

impl Substrate {
    pub fn new(config: SubstrateConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(config: SubstrateConfig, clock: Arc<dyn Clock>) -> Self {
        let hierarchy = Arc::new(TypeHierarchy::new());
        let registry = Arc::new(TypeHandlerRegistry::new(hierarchy.clone()));
        let services = Arc::new(LifecycleServiceDispatcher::new(hierarchy.clone()));
        let weaver = AspectWeaver::new(registry.clone(), services.clone());
        let events = Arc::new(EventBus::with_hierarchy(hierarchy.clone()));
        let scheduler = ModuleScheduler::with_parts(config.scheduler, events.clone(), clock);

        Self {
            hierarchy,
            registry,
            services,
            weaver,
            events,
            scheduler,
            classification: config.classification,
            running: AtomicBool::new(false),
            ticks: AtomicU64::new(0),
        }
    }

    pub fn hierarchy(&self) -> &Arc<TypeHierarchy> {
        &self.hierarchy
    }

    pub fn registry(&self) -> &Arc<TypeHandlerRegistry> {
        &self.registry
    }

    pub fn services(&self) -> &Arc<LifecycleServiceDispatcher> {
        &self.services
    }

    pub fn weaver(&self) -> &AspectWeaver {
        &self.weaver
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn scheduler(&self) -> &ModuleScheduler {
        &self.scheduler
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Completed ticks since startup
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Load the classification and start the autostart modules.
    ///
    /// Module priorities declared by the classification override the
    /// scheduler configuration.
    pub fn startup(&self, library: &HookLibrary) -> Result<LoadReport> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(SubstrateError::AlreadyStarted);
        }

        info!("🚀 Starting frame substrate");
        let report = load_classification(&self.classification, library, &self.hierarchy, &self.registry);
        for (key, priority) in &report.priorities {
            self.scheduler.set_priority(key.clone(), *priority);
        }

        let modules = self.scheduler.startup();
        self.ticks.store(0, Ordering::Relaxed);
        info!(
            "✅ Frame substrate running: {} type(s), {} hook(s), {} module(s)",
            self.hierarchy.len(),
            self.registry.len(),
            modules
        );
        Ok(report)
    }

    /// Run one frame: due deferred tasks and `update`, buffered events,
    /// then `late_update` and reaping. Returns the tick number.
    pub fn tick(&self) -> Result<u64> {
        if !self.is_running() {
            return Err(SubstrateError::NotStarted);
        }

        self.scheduler.update();
        self.events.flush();
        self.scheduler.late_update();

        Ok(self.ticks.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Tear down every module and empty every registry
    pub fn shutdown(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Err(SubstrateError::NotStarted);
        }

        info!("🛑 Shutting down frame substrate after {} tick(s)", self.ticks());
        self.scheduler.teardown();
        self.events.clear();
        self.services.clear();
        self.registry.clear();
        self.hierarchy.clear();
        debug!("🧹 Registries cleared");
        Ok(())
    }
}

static ACTIVE: Lazy<ArcSwapOption<Substrate>> = Lazy::new(|| ArcSwapOption::from(None));

/// Make `substrate` the process-wide instance, returning the previous one
pub fn install(substrate: Arc<Substrate>) -> Option<Arc<Substrate>> {
    ACTIVE.swap(Some(substrate))
}

/// The process-wide instance, if one is installed
pub fn global() -> Option<Arc<Substrate>> {
    ACTIVE.load_full()
}

/// Remove the process-wide instance
pub fn reset() -> Option<Arc<Substrate>> {
    ACTIVE.swap(None)
}
