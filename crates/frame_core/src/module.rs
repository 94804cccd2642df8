//! Long-lived modules driven by the scheduler

use crate::scheduler::ModuleScheduler;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;

/// A unit of per-tick behaviour owned by the [`ModuleScheduler`].
///
/// Every hook receives the scheduler so modules can reach the event bus,
/// commands, deferred tasks and each other. All hooks default to no-ops.
pub trait Module: Send + 'static {
    /// Returns the name of this module
    fn name(&self) -> &str;

    /// Called once right after construction
    fn initialize(&mut self, _scheduler: &ModuleScheduler) {}

    /// Called once after `initialize`, before the module joins the update order
    fn startup(&mut self, _scheduler: &ModuleScheduler) {}

    /// Called every update pass
    fn update(&mut self, _scheduler: &ModuleScheduler) {}

    /// Called every late-update pass, after buffered events are flushed
    fn late_update(&mut self, _scheduler: &ModuleScheduler) {}

    /// First half of destruction
    fn cleanup(&mut self, _scheduler: &ModuleScheduler) {}

    /// Second half of destruction
    fn shutdown(&mut self, _scheduler: &ModuleScheduler) {}

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Lifecycle position of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    Uninitialized,
    Initialized,
    Started,
    /// Destruction requested mid-pass; reaped at the end of the late-update pass
    Expired,
    Destroyed,
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ModuleState::Uninitialized => "uninitialized",
            ModuleState::Initialized => "initialized",
            ModuleState::Started => "started",
            ModuleState::Expired => "expired",
            ModuleState::Destroyed => "destroyed",
        };
        f.write_str(label)
    }
}

/// Trait for factories that can create module instances
pub trait ModuleFactory: Send + Sync {
    fn create(&self) -> Box<dyn Module>;
}

/// Module factory that wraps a constructor function
pub struct SimpleModuleFactory<F>
where
    F: Fn() -> Box<dyn Module> + Send + Sync,
{
    constructor: F,
}

impl<F> SimpleModuleFactory<F>
where
    F: Fn() -> Box<dyn Module> + Send + Sync,
{
    pub fn new(constructor: F) -> Self {
        Self { constructor }
    }
}

impl<F> ModuleFactory for SimpleModuleFactory<F>
where
    F: Fn() -> Box<dyn Module> + Send + Sync,
{
    fn create(&self) -> Box<dyn Module> {
        (self.constructor)()
    }
}
