//! Priority-ordered module scheduler with deferred destruction
//!
//! Modules are created lazily from a type → priority table and ticked in
//! ascending priority order. Destroying a module while a pass is running
//! only marks it expired: it stops receiving ticks immediately and is torn
//! down at the end of the late-update pass. Outside a pass, destruction is
//! synchronous.
//!
//! Zero-argument tasks can be queued with an optional delay; due tasks run
//! at the start of the next update pass, never at the call site.

use crate::clock::{Clock, SystemClock};
use crate::command::CommandDispatcher;
use crate::error::SchedulerError;
use crate::event::EventBus;
use crate::module::{Module, ModuleFactory, ModuleState, SimpleModuleFactory};
use crate::types::TypeKey;
use crate::utils::{lock, read, try_lock, write};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Module priorities and startup set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Module type → priority; lower runs earlier
    pub priorities: BTreeMap<String, i32>,
    /// Modules created by [`ModuleScheduler::startup`], in order
    pub autostart: Vec<String>,
    /// Priority for module types missing from `priorities`
    pub default_priority: Option<i32>,
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if let Some(name) = self.priorities.keys().find(|name| name.trim().is_empty()) {
            return Err(SchedulerError::InvalidConfig(format!(
                "empty module name in priorities ({:?})",
                name
            )));
        }

        for name in &self.autostart {
            if !self.priorities.contains_key(name) && self.default_priority.is_none() {
                return Err(SchedulerError::InvalidConfig(format!(
                    "autostart module {} has no priority",
                    name
                )));
            }
        }

        let mut seen = HashSet::new();
        if let Some(name) = self.autostart.iter().find(|name| !seen.insert(name.as_str())) {
            return Err(SchedulerError::InvalidConfig(format!(
                "autostart module {} listed twice",
                name
            )));
        }

        Ok(())
    }
}

/// A live module and its position in the update order
pub struct ModuleRecord {
    key: TypeKey,
    priority: i32,
    module: Mutex<Box<dyn Module>>,
    state: Mutex<ModuleState>,
}

impl ModuleRecord {
    pub fn key(&self) -> &TypeKey {
        &self.key
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn state(&self) -> ModuleState {
        *lock(&self.state)
    }

    /// Run `f` against the concrete module.
    ///
    /// Returns `None` if the module is not a `T` or is currently running one
    /// of its own hooks.
    pub fn with<T: Module, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut module = try_lock(&self.module)?;
        module.as_any_mut().downcast_mut::<T>().map(f)
    }

    fn set_state(&self, state: ModuleState) {
        *lock(&self.state) = state;
    }
}

impl std::fmt::Debug for ModuleRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRecord")
            .field("key", &self.key)
            .field("priority", &self.priority)
            .field("state", &self.state())
            .finish()
    }
}

struct DeferredTask {
    due: Duration,
    action: Box<dyn FnOnce() + Send>,
}

#[derive(Clone, Copy)]
enum Pass {
    Update,
    LateUpdate,
}

/// Restores the updating flag when a pass ends, including by unwinding.
struct PassGuard<'a> {
    flag: &'a AtomicBool,
    previous: bool,
}

impl<'a> PassGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        let previous = flag.swap(true, Ordering::AcqRel);
        Self { flag, previous }
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(self.previous, Ordering::Release);
    }
}

/// Statistics for scheduler monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub modules: usize,
    pub created: u64,
    pub destroyed: u64,
    pub deferred_destructions: u64,
    pub update_passes: u64,
    pub late_update_passes: u64,
    pub tasks_run: u64,
    pub tasks_pending: usize,
}

#[derive(Default)]
struct SchedulerCounters {
    created: AtomicU64,
    destroyed: AtomicU64,
    deferred_destructions: AtomicU64,
    update_passes: AtomicU64,
    late_update_passes: AtomicU64,
    tasks_run: AtomicU64,
}

/// Owns every module, drives their passes and runs deferred tasks
pub struct ModuleScheduler {
    priorities: RwLock<HashMap<TypeKey, i32>>,
    default_priority: Option<i32>,
    autostart: Vec<TypeKey>,
    factories: RwLock<HashMap<TypeKey, Arc<dyn ModuleFactory>>>,
    /// Every live module, ascending priority
    records: RwLock<Vec<Arc<ModuleRecord>>>,
    update_list: RwLock<Vec<Arc<ModuleRecord>>>,
    dirty: AtomicBool,
    expired: Mutex<Vec<Arc<ModuleRecord>>>,
    creating: Mutex<HashSet<TypeKey>>,
    updating: AtomicBool,
    waiting: Mutex<Vec<DeferredTask>>,
    clock: Arc<dyn Clock>,
    events: Arc<EventBus>,
    commands: CommandDispatcher,
    counters: SchedulerCounters,
}

impl ModuleScheduler {
    /// Scheduler with its own event bus and the system clock
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_parts(config, Arc::new(EventBus::new()), Arc::new(SystemClock::new()))
    }

    pub fn with_parts(config: SchedulerConfig, events: Arc<EventBus>, clock: Arc<dyn Clock>) -> Self {
        let priorities = config
            .priorities
            .iter()
            .map(|(name, priority)| (TypeKey::new(name), *priority))
            .collect();

        Self {
            priorities: RwLock::new(priorities),
            default_priority: config.default_priority,
            autostart: config.autostart.iter().map(|name| TypeKey::new(name)).collect(),
            factories: RwLock::new(HashMap::new()),
            records: RwLock::new(Vec::new()),
            update_list: RwLock::new(Vec::new()),
            dirty: AtomicBool::new(false),
            expired: Mutex::new(Vec::new()),
            creating: Mutex::new(HashSet::new()),
            updating: AtomicBool::new(false),
            waiting: Mutex::new(Vec::new()),
            clock,
            events,
            commands: CommandDispatcher::new(),
            counters: SchedulerCounters::default(),
        }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn commands(&self) -> &CommandDispatcher {
        &self.commands
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Whether an update or late-update pass is running
    pub fn is_updating(&self) -> bool {
        self.updating.load(Ordering::Acquire)
    }

    /// Set or replace the priority for a module type
    pub fn set_priority(&self, key: TypeKey, priority: i32) {
        debug!("🔧 Module {} priority set to {}", key, priority);
        write(&self.priorities).insert(key, priority);
    }

    pub fn priority_of(&self, key: &TypeKey) -> Option<i32> {
        read(&self.priorities).get(key).copied().or(self.default_priority)
    }

    pub fn register_factory(
        &self,
        key: TypeKey,
        factory: Arc<dyn ModuleFactory>,
    ) -> Result<(), SchedulerError> {
        let mut factories = write(&self.factories);
        if factories.contains_key(&key) {
            warn!("⚠️ Module factory for {} already registered", key);
            return Err(SchedulerError::DuplicateFactory(key.to_string()));
        }
        debug!("📝 Registered module factory for {}", key);
        factories.insert(key, factory);
        Ok(())
    }

    /// Register a constructor closure as the factory for `key`
    pub fn register_module<F>(&self, key: TypeKey, constructor: F) -> Result<(), SchedulerError>
    where
        F: Fn() -> Box<dyn Module> + Send + Sync + 'static,
    {
        self.register_factory(key, Arc::new(SimpleModuleFactory::new(constructor)))
    }

    /// Create every autostart module, in configuration order.
    ///
    /// Failures are logged and skipped. Returns the number of modules running
    /// afterwards.
    pub fn startup(&self) -> usize {
        for key in &self.autostart {
            if let Err(e) = self.get_or_create(key) {
                error!("❌ Failed to start module {}: {}", key, e);
            }
        }
        let count = self.len();
        info!("🚀 Module scheduler started with {} module(s)", count);
        count
    }

    /// The live module for `key`, creating it if it is configured.
    ///
    /// A type with no configured priority is a plain lookup miss.
    pub fn get_or_create(&self, key: &TypeKey) -> Result<Arc<ModuleRecord>, SchedulerError> {
        if let Some(record) = self.find(key) {
            if record.state() == ModuleState::Expired {
                return Err(SchedulerError::Expired(key.to_string()));
            }
            return Ok(record);
        }

        let priority = self
            .priority_of(key)
            .ok_or_else(|| SchedulerError::NotConfigured(key.to_string()))?;

        let factory = match read(&self.factories).get(key) {
            Some(factory) => factory.clone(),
            None => {
                warn!("⚠️ Module {} has priority {} but no factory", key, priority);
                return Err(SchedulerError::NoFactory(key.to_string()));
            }
        };

        if !lock(&self.creating).insert(key.clone()) {
            warn!("⚠️ Module {} requested itself during creation", key);
            return Err(SchedulerError::CircularCreation(key.to_string()));
        }
        let record = self.create(key, priority, factory.as_ref());
        lock(&self.creating).remove(key);

        Ok(record)
    }

    fn create(&self, key: &TypeKey, priority: i32, factory: &dyn ModuleFactory) -> Arc<ModuleRecord> {
        let record = Arc::new(ModuleRecord {
            key: key.clone(),
            priority,
            module: Mutex::new(factory.create()),
            state: Mutex::new(ModuleState::Uninitialized),
        });

        {
            let mut module = lock(&record.module);
            module.initialize(self);
            record.set_state(ModuleState::Initialized);
            module.startup(self);
            record.set_state(ModuleState::Started);
        }

        {
            let mut records = write(&self.records);
            let position = records
                .iter()
                .position(|existing| existing.priority > priority)
                .unwrap_or(records.len());
            records.insert(position, record.clone());
        }
        self.dirty.store(true, Ordering::Release);
        self.counters.created.fetch_add(1, Ordering::Relaxed);

        info!("✅ Module {} started (priority {})", key, priority);
        record
    }

    /// The live module for `key`, without creating it
    pub fn get(&self, key: &TypeKey) -> Option<Arc<ModuleRecord>> {
        self.find(key)
            .filter(|record| record.state() != ModuleState::Expired)
    }

    /// Run `f` against module `key` as a `T`
    pub fn with<T: Module, R>(&self, key: &TypeKey, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.get(key)?.with(f)
    }

    pub fn contains(&self, key: &TypeKey) -> bool {
        self.get(key).is_some()
    }

    pub fn is_expired(&self, key: &TypeKey) -> bool {
        self.find(key)
            .map(|record| record.state() == ModuleState::Expired)
            .unwrap_or(false)
    }

    /// Request destruction of module `key`.
    ///
    /// During a pass (or while the module is running one of its own hooks)
    /// the module is only marked expired. Returns whether a live module was
    /// found and destroyed or marked.
    pub fn destroy_module(&self, key: &TypeKey) -> bool {
        let record = match self.find(key) {
            Some(record) => record,
            None => return false,
        };

        if record.state() == ModuleState::Expired {
            warn!("⚠️ Module {} is already expired, ignoring repeated destroy", key);
            return false;
        }

        if !self.is_updating() {
            if let Some(module) = try_lock(&record.module) {
                self.remove_record(&record);
                self.rebuild_update_list();
                self.teardown_module(&record, module);
                return true;
            }
        }

        record.set_state(ModuleState::Expired);
        lock(&self.expired).push(record);
        self.counters
            .deferred_destructions
            .fetch_add(1, Ordering::Relaxed);
        debug!("⏳ Module {} expired, destruction deferred to end of pass", key);
        true
    }

    /// Run due deferred tasks, then tick every live module's `update`
    pub fn update(&self) {
        self.flush_deferred();
        self.run_pass(Pass::Update);
        self.counters.update_passes.fetch_add(1, Ordering::Relaxed);
    }

    /// Tick every live module's `late_update`, then reap expired modules
    pub fn late_update(&self) {
        self.run_pass(Pass::LateUpdate);
        self.reap_expired();
        self.counters
            .late_update_passes
            .fetch_add(1, Ordering::Relaxed);
    }

    fn run_pass(&self, pass: Pass) {
        if self.dirty.load(Ordering::Acquire) {
            self.rebuild_update_list();
        }
        let list = read(&self.update_list).clone();
        let _guard = PassGuard::enter(&self.updating);

        for record in &list {
            if record.state() == ModuleState::Expired {
                continue;
            }
            let mut module = match try_lock(&record.module) {
                Some(module) => module,
                None => {
                    trace!("Module {} is busy, skipping nested pass", record.key);
                    continue;
                }
            };
            match pass {
                Pass::Update => module.update(self),
                Pass::LateUpdate => module.late_update(self),
            }
        }
    }

    fn reap_expired(&self) {
        let expired = std::mem::take(&mut *lock(&self.expired));
        if expired.is_empty() {
            return;
        }

        let mut busy = Vec::new();
        for record in expired {
            // The guard borrows `record`, so it must drop before the push.
            let is_busy = match try_lock(&record.module) {
                Some(module) => {
                    self.remove_record(&record);
                    self.teardown_module(&record, module);
                    false
                }
                None => true,
            };
            if is_busy {
                busy.push(record);
            }
        }
        if !busy.is_empty() {
            lock(&self.expired).extend(busy);
        }
        self.rebuild_update_list();
    }

    /// Destroy every module in reverse priority order and drop pending tasks.
    ///
    /// # Panics
    ///
    /// If called while a pass is running.
    pub fn teardown(&self) {
        assert!(
            !self.is_updating(),
            "module scheduler torn down during an update pass"
        );

        lock(&self.expired).clear();
        write(&self.update_list).clear();
        self.dirty.store(false, Ordering::Release);
        let records = std::mem::take(&mut *write(&self.records));

        for record in records.iter().rev() {
            let module = lock(&record.module);
            self.teardown_module(record, module);
        }

        let dropped = std::mem::take(&mut *lock(&self.waiting)).len();
        if dropped > 0 {
            debug!("🗑️ Dropped {} deferred task(s) that never came due", dropped);
        }
        self.commands.clear();
        info!("🛑 Module scheduler torn down ({} module(s))", records.len());
    }

    /// Run `action` at the start of an update pass once `delay` has elapsed.
    ///
    /// With no delay the task runs on the next update pass. Tasks queued
    /// while deferred tasks are running wait for a later pass.
    pub fn queue_on_main_thread<F>(&self, action: F, delay: Option<Duration>)
    where
        F: FnOnce() + Send + 'static,
    {
        let due = self.clock.now() + delay.unwrap_or(Duration::ZERO);
        lock(&self.waiting).push(DeferredTask {
            due,
            action: Box::new(action),
        });
    }

    /// Run every task whose due time has passed, in queue order.
    ///
    /// Returns the number of tasks run.
    pub fn flush_deferred(&self) -> usize {
        let now = self.clock.now();
        let running: Vec<DeferredTask> = {
            let mut waiting = lock(&self.waiting);
            if waiting.is_empty() {
                return 0;
            }
            let (due, pending): (Vec<_>, Vec<_>) =
                waiting.drain(..).partition(|task| task.due <= now);
            *waiting = pending;
            due
        };

        let count = running.len();
        for task in running {
            (task.action)();
        }

        if count > 0 {
            trace!("⏱️ Ran {} deferred task(s)", count);
            self.counters
                .tasks_run
                .fetch_add(count as u64, Ordering::Relaxed);
        }
        count
    }

    pub fn pending_tasks(&self) -> usize {
        lock(&self.waiting).len()
    }

    /// Module keys in update order, including expired ones not yet reaped
    pub fn module_order(&self) -> Vec<TypeKey> {
        read(&self.records)
            .iter()
            .map(|record| record.key.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        read(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.records).is_empty()
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            modules: self.len(),
            created: self.counters.created.load(Ordering::Relaxed),
            destroyed: self.counters.destroyed.load(Ordering::Relaxed),
            deferred_destructions: self.counters.deferred_destructions.load(Ordering::Relaxed),
            update_passes: self.counters.update_passes.load(Ordering::Relaxed),
            late_update_passes: self.counters.late_update_passes.load(Ordering::Relaxed),
            tasks_run: self.counters.tasks_run.load(Ordering::Relaxed),
            tasks_pending: self.pending_tasks(),
        }
    }

    fn find(&self, key: &TypeKey) -> Option<Arc<ModuleRecord>> {
        read(&self.records)
            .iter()
            .find(|record| record.key == *key)
            .cloned()
    }

    fn remove_record(&self, record: &Arc<ModuleRecord>) {
        write(&self.records).retain(|existing| !Arc::ptr_eq(existing, record));
        self.dirty.store(true, Ordering::Release);
    }

    fn rebuild_update_list(&self) {
        let list: Vec<Arc<ModuleRecord>> = read(&self.records).clone();
        *write(&self.update_list) = list;
        self.dirty.store(false, Ordering::Release);
    }

    fn teardown_module(
        &self,
        record: &ModuleRecord,
        mut module: std::sync::MutexGuard<'_, Box<dyn Module>>,
    ) {
        module.cleanup(self);
        module.shutdown(self);
        drop(module);
        record.set_state(ModuleState::Destroyed);
        self.counters.destroyed.fetch_add(1, Ordering::Relaxed);
        info!("🗑️ Module {} destroyed", record.key);
    }
}
