//! One-time service wiring triggered by successful woven calls
//!
//! Service callbacks are keyed by the exact type (or category) they were
//! registered against. Dispatching for a host resolves every callback whose
//! key the host type is assignable to, and remembers per
//! `(host type, operation)` whether anything matched. A remembered miss turns
//! later ordinary dispatches into a single map lookup; reload dispatches
//! always resolve again and never touch the memo.

use crate::error::RegistryError;
use crate::types::{HostObject, TypeHierarchy, TypeKey};
use crate::utils::{read, write};
use compact_str::CompactString;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, trace, warn};

/// Callback receiving the host object and whether this is a reload
pub type ServiceCallback = Arc<dyn Fn(&dyn HostObject, bool) + Send + Sync>;

/// Box a closure as a [`ServiceCallback`]
pub fn service<F>(f: F) -> ServiceCallback
where
    F: Fn(&dyn HostObject, bool) + Send + Sync + 'static,
{
    Arc::new(f)
}

struct ServiceRegistration {
    operation: CompactString,
    callback: ServiceCallback,
}

/// Dispatches service callbacks after successful operations
pub struct LifecycleServiceDispatcher {
    hierarchy: Arc<TypeHierarchy>,
    callbacks: RwLock<HashMap<TypeKey, Vec<ServiceRegistration>>>,
    status: DashMap<(TypeKey, CompactString), bool>,
    /// Hierarchy generation the memo was computed against
    status_generation: AtomicU64,
}

impl LifecycleServiceDispatcher {
    pub fn new(hierarchy: Arc<TypeHierarchy>) -> Self {
        let generation = hierarchy.generation();
        Self {
            hierarchy,
            callbacks: RwLock::new(HashMap::new()),
            status: DashMap::new(),
            status_generation: AtomicU64::new(generation),
        }
    }

    /// Register a callback for `operation` on `target` and everything
    /// assignable to it.
    ///
    /// Memoized results are discarded so a newly registered callback is
    /// reachable even for pairs that previously had no match.
    pub fn register_service_callback(
        &self,
        target: TypeKey,
        operation: &str,
        callback: ServiceCallback,
    ) -> Result<(), RegistryError> {
        if operation.is_empty() {
            warn!("⚠️ Rejected service callback for {}: empty operation name", target);
            return Err(RegistryError::EmptyOperation(target.to_string()));
        }

        debug!("📝 Registered service callback for {}::{}", target, operation);
        write(&self.callbacks)
            .entry(target)
            .or_default()
            .push(ServiceRegistration {
                operation: CompactString::new(operation),
                callback,
            });
        self.status.clear();
        Ok(())
    }

    /// Run every matching callback for `host` after `operation` succeeded.
    ///
    /// Returns how many callbacks ran.
    pub fn dispatch(&self, host: &dyn HostObject, operation: &str, reload: bool) -> usize {
        self.sync_with_hierarchy();

        let host_type = host.type_key();
        let memo_key = (host_type.clone(), CompactString::new(operation));
        let memo = self.status.get(&memo_key).map(|status| *status);

        if memo == Some(false) && !reload {
            trace!("⏭️ No service callbacks for {}::{} (memoized)", host_type, operation);
            return 0;
        }

        let matched = self.resolve(&host_type, operation);
        for callback in &matched {
            callback(host, reload);
        }

        if memo.is_none() && !reload {
            self.status.insert(memo_key, !matched.is_empty());
        }

        if !matched.is_empty() {
            debug!(
                "🔧 Dispatched {} service callback(s) for {}::{} (reload: {})",
                matched.len(),
                host_type,
                operation,
                reload
            );
        }
        matched.len()
    }

    /// Callbacks for `operation` keyed by any type `host_type` is assignable to,
    /// nearest level first.
    fn resolve(&self, host_type: &TypeKey, operation: &str) -> Vec<ServiceCallback> {
        let callbacks = read(&self.callbacks);
        if callbacks.is_empty() {
            return Vec::new();
        }

        self.hierarchy
            .lookup_chain(host_type)
            .iter()
            .filter_map(|level| callbacks.get(level))
            .flatten()
            .filter(|registration| registration.operation == operation)
            .map(|registration| registration.callback.clone())
            .collect()
    }

    fn sync_with_hierarchy(&self) {
        let current = self.hierarchy.generation();
        if self.status_generation.swap(current, Ordering::AcqRel) != current {
            self.status.clear();
        }
    }

    /// Memoized match result for a pair, if it has been dispatched
    pub fn memo(&self, host_type: &TypeKey, operation: &str) -> Option<bool> {
        self.status
            .get(&(host_type.clone(), CompactString::new(operation)))
            .map(|status| *status)
    }

    pub fn callback_count(&self) -> usize {
        read(&self.callbacks).values().map(Vec::len).sum()
    }

    pub fn clear(&self) {
        write(&self.callbacks).clear();
        self.status.clear();
    }
}
