//! Hook registry keyed by (target type, operation, access kind)
//!
//! Entries are stored by the type they were declared against. A lookup for a
//! concrete type merges the entries of every level of its lookup chain into a
//! [`ResolvedHandlerTable`], which is cached per type until the next
//! structural change. Any registration, unregistration or hierarchy change
//! discards the whole cache.

use crate::error::RegistryError;
use crate::types::{TypeHierarchy, TypeKey};
use crate::utils::{generate_id, read, write};
use crate::weaver::JoinPoint;
use compact_str::CompactString;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Position of a hook relative to the wrapped call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessKind {
    /// Never a valid registration key
    Unknown,
    /// Runs when the host has no real method for the operation
    Extend,
    Before,
    After,
    AfterReturning,
    AfterThrowing,
    /// Replaces the real call; the hook decides whether to proceed
    Around,
}

impl AccessKind {
    /// Whether hooks may be registered under this kind
    pub fn is_registrable(self) -> bool {
        !matches!(self, AccessKind::Unknown)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccessKind::Unknown => "unknown",
            AccessKind::Extend => "extend",
            AccessKind::Before => "before",
            AccessKind::After => "after",
            AccessKind::AfterReturning => "after_returning",
            AccessKind::AfterThrowing => "after_throwing",
            AccessKind::Around => "around",
        }
    }
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callback attached to a woven operation
pub type HookCallback = Arc<dyn Fn(&mut JoinPoint<'_>) + Send + Sync>;

/// Box a closure as a [`HookCallback`]
pub fn hook<F>(f: F) -> HookCallback
where
    F: Fn(&mut JoinPoint<'_>) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Several callbacks merged under one key, invoked in order
#[derive(Clone, Default)]
pub struct MulticastHook {
    callbacks: SmallVec<[HookCallback; 2]>,
}

impl MulticastHook {
    fn push(&mut self, callback: HookCallback) {
        self.callbacks.push(callback);
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Call every merged callback in order
    pub fn invoke(&self, join_point: &mut JoinPoint<'_>) {
        for callback in &self.callbacks {
            callback(join_point);
        }
    }
}

impl fmt::Debug for MulticastHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MulticastHook")
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

/// A single registration
pub struct HandlerEntry {
    pub identity: CompactString,
    pub target: TypeKey,
    pub operation: CompactString,
    pub access: AccessKind,
    pub callback: HookCallback,
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("identity", &self.identity)
            .field("target", &self.target)
            .field("operation", &self.operation)
            .field("access", &self.access)
            .finish()
    }
}

/// Merged hooks for one concrete type
#[derive(Debug, Default)]
pub struct ResolvedHandlerTable {
    hooks: HashMap<(AccessKind, CompactString), MulticastHook>,
}

impl ResolvedHandlerTable {
    pub fn get(&self, access: AccessKind, operation: &str) -> Option<&MulticastHook> {
        self.hooks.get(&(access, CompactString::new(operation)))
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

#[derive(Default)]
struct RegistryState {
    /// identity -> declaring type
    identities: HashMap<CompactString, TypeKey>,
    /// declaring type -> entries in registration order
    by_type: HashMap<TypeKey, Vec<HandlerEntry>>,
}

/// Hook registry with per-type resolution cache
pub struct TypeHandlerRegistry {
    hierarchy: Arc<TypeHierarchy>,
    state: RwLock<RegistryState>,
    cache: DashMap<TypeKey, Arc<ResolvedHandlerTable>>,
    /// Hierarchy generation the cache was built against
    cache_generation: AtomicU64,
}

impl TypeHandlerRegistry {
    pub fn new(hierarchy: Arc<TypeHierarchy>) -> Self {
        let generation = hierarchy.generation();
        Self {
            hierarchy,
            state: RwLock::new(RegistryState::default()),
            cache: DashMap::new(),
            cache_generation: AtomicU64::new(generation),
        }
    }

    pub fn hierarchy(&self) -> &Arc<TypeHierarchy> {
        &self.hierarchy
    }

    /// Register a hook under a unique identity
    pub fn register(
        &self,
        identity: &str,
        target: TypeKey,
        operation: &str,
        access: AccessKind,
        callback: HookCallback,
    ) -> Result<(), RegistryError> {
        if !access.is_registrable() {
            warn!("⚠️ Rejected hook {}: access kind {} is not registrable", identity, access);
            return Err(RegistryError::InvalidAccessKind {
                identity: identity.to_string(),
                access,
            });
        }
        if operation.is_empty() {
            warn!("⚠️ Rejected hook {}: empty operation name", identity);
            return Err(RegistryError::EmptyOperation(identity.to_string()));
        }

        let mut state = write(&self.state);
        if state.identities.contains_key(identity) {
            warn!("⚠️ Rejected hook {}: identity already registered", identity);
            return Err(RegistryError::DuplicateIdentity(identity.to_string()));
        }

        let identity = CompactString::new(identity);
        state.identities.insert(identity.clone(), target.clone());
        state
            .by_type
            .entry(target.clone())
            .or_default()
            .push(HandlerEntry {
                identity: identity.clone(),
                target: target.clone(),
                operation: CompactString::new(operation),
                access,
                callback,
            });
        self.cache.clear();

        debug!("📝 Registered {} hook {} for {}::{}", access, identity, target, operation);
        Ok(())
    }

    /// Register a hook under a generated identity, returning it
    pub fn register_anonymous(
        &self,
        target: TypeKey,
        operation: &str,
        access: AccessKind,
        callback: HookCallback,
    ) -> Result<String, RegistryError> {
        let identity = generate_id();
        self.register(&identity, target, operation, access, callback)?;
        Ok(identity)
    }

    /// Remove a hook. The remaining fields must describe the registered entry.
    pub fn unregister(
        &self,
        identity: &str,
        target: &TypeKey,
        operation: &str,
        access: AccessKind,
    ) -> Result<(), RegistryError> {
        let mut state = write(&self.state);

        let Some(declared) = state.identities.get(identity).cloned() else {
            warn!("⚠️ Cannot unregister hook {}: not registered", identity);
            return Err(RegistryError::UnknownIdentity(identity.to_string()));
        };
        if declared != *target {
            warn!("⚠️ Cannot unregister hook {}: registered for {}, not {}", identity, declared, target);
            return Err(RegistryError::Mismatch {
                identity: identity.to_string(),
                detail: format!("registered for type {}, not {}", declared, target),
            });
        }

        let entries = state.by_type.get_mut(target).ok_or_else(|| {
            RegistryError::UnknownIdentity(identity.to_string())
        })?;
        let Some(position) = entries.iter().position(|entry| entry.identity == identity) else {
            return Err(RegistryError::UnknownIdentity(identity.to_string()));
        };

        let entry = &entries[position];
        if entry.operation != operation || entry.access != access {
            let detail = format!(
                "registered as {}::{} ({}), not {}::{} ({})",
                entry.target, entry.operation, entry.access, target, operation, access
            );
            warn!("⚠️ Cannot unregister hook {}: {}", identity, detail);
            return Err(RegistryError::Mismatch {
                identity: identity.to_string(),
                detail,
            });
        }

        entries.remove(position);
        if entries.is_empty() {
            state.by_type.remove(target);
        }
        state.identities.remove(identity);
        self.cache.clear();

        debug!("🗑️ Unregistered hook {} from {}::{}", identity, target, operation);
        Ok(())
    }

    /// Merged hook for `(target, operation, access)`, if any
    pub fn lookup(&self, target: &TypeKey, operation: &str, access: AccessKind) -> Option<MulticastHook> {
        self.table_for(target).get(access, operation).cloned()
    }

    /// Cached resolution table for `target`, built on first use
    pub fn table_for(&self, target: &TypeKey) -> Arc<ResolvedHandlerTable> {
        self.sync_with_hierarchy();

        if let Some(table) = self.cache.get(target) {
            return table.clone();
        }

        // Building under the read lock keeps a concurrent registration from
        // clearing the cache between the build and the insert.
        let state = read(&self.state);
        let table = Arc::new(self.build_table(&state, target));
        self.cache.insert(target.clone(), table.clone());
        table
    }

    fn build_table(&self, state: &RegistryState, target: &TypeKey) -> ResolvedHandlerTable {
        let mut table = ResolvedHandlerTable::default();

        for level in self.hierarchy.lookup_chain(target) {
            let Some(entries) = state.by_type.get(&level) else {
                continue;
            };
            for entry in entries {
                table
                    .hooks
                    .entry((entry.access, entry.operation.clone()))
                    .or_default()
                    .push(entry.callback.clone());
            }
        }

        debug!("🔍 Resolved {} hook keys for {}", table.len(), target);
        table
    }

    fn sync_with_hierarchy(&self) {
        let current = self.hierarchy.generation();
        if self.cache_generation.load(Ordering::Acquire) != current {
            let _state = write(&self.state);
            self.cache.clear();
            self.cache_generation.store(current, Ordering::Release);
        }
    }

    pub fn is_registered(&self, identity: &str) -> bool {
        read(&self.state).identities.contains_key(identity)
    }

    /// Number of registered hooks
    pub fn len(&self) -> usize {
        read(&self.state).identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of types with a cached resolution table
    pub fn cached_type_count(&self) -> usize {
        self.cache.len()
    }

    /// Remove every hook and cached table
    pub fn clear(&self) {
        let mut state = write(&self.state);
        state.identities.clear();
        state.by_type.clear();
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn key(name: &str) -> TypeKey {
        TypeKey::new(name)
    }

    fn noop() -> HookCallback {
        Arc::new(|_: &mut JoinPoint<'_>| {})
    }

    fn registry() -> TypeHandlerRegistry {
        let hierarchy = Arc::new(TypeHierarchy::new());
        hierarchy.declare(key("Base"), None).unwrap();
        hierarchy.declare(key("Derived"), Some(key("Base"))).unwrap();
        TypeHandlerRegistry::new(hierarchy)
    }

    #[test]
    fn test_duplicate_identity_rejected() {
        let registry = registry();
        registry
            .register("h1", key("Base"), "Tick", AccessKind::Before, noop())
            .unwrap();

        let result = registry.register("h1", key("Derived"), "Tick", AccessKind::After, noop());
        assert!(matches!(result, Err(RegistryError::DuplicateIdentity(_))));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_access_rejected() {
        let registry = registry();
        let result = registry.register("h1", key("Base"), "Tick", AccessKind::Unknown, noop());
        assert!(matches!(result, Err(RegistryError::InvalidAccessKind { .. })));
        assert!(registry.is_empty());

        let result = registry.register("h2", key("Base"), "", AccessKind::Before, noop());
        assert!(matches!(result, Err(RegistryError::EmptyOperation(_))));
    }

    #[test]
    fn test_unregister_checks_fields() {
        let registry = registry();
        registry
            .register("h1", key("Base"), "Tick", AccessKind::Before, noop())
            .unwrap();

        assert!(matches!(
            registry.unregister("missing", &key("Base"), "Tick", AccessKind::Before),
            Err(RegistryError::UnknownIdentity(_))
        ));
        assert!(matches!(
            registry.unregister("h1", &key("Derived"), "Tick", AccessKind::Before),
            Err(RegistryError::Mismatch { .. })
        ));
        assert!(matches!(
            registry.unregister("h1", &key("Base"), "Tick", AccessKind::After),
            Err(RegistryError::Mismatch { .. })
        ));
        assert!(registry.is_registered("h1"));

        registry
            .unregister("h1", &key("Base"), "Tick", AccessKind::Before)
            .unwrap();
        assert!(!registry.is_registered("h1"));
        assert!(registry.lookup(&key("Base"), "Tick", AccessKind::Before).is_none());
    }

    #[test]
    fn test_inherited_lookup() {
        let registry = registry();
        registry
            .register("base", key("Base"), "Tick", AccessKind::Before, noop())
            .unwrap();
        registry
            .register("derived", key("Derived"), "Spawn", AccessKind::Before, noop())
            .unwrap();

        assert!(registry.lookup(&key("Derived"), "Tick", AccessKind::Before).is_some());
        assert!(registry.lookup(&key("Base"), "Spawn", AccessKind::Before).is_none());
        assert!(registry.lookup(&key("Derived"), "Tick", AccessKind::After).is_none());
    }

    #[test]
    fn test_merge_order_nearest_level_first() {
        let registry = registry();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (identity, target) in [("b1", "Base"), ("d1", "Derived"), ("b2", "Base")] {
            let order = order.clone();
            let callback: HookCallback = Arc::new(move |_: &mut JoinPoint<'_>| {
                order.lock().unwrap().push(identity);
            });
            registry
                .register(identity, key(target), "Tick", AccessKind::Before, callback)
                .unwrap();
        }

        let hook = registry
            .lookup(&key("Derived"), "Tick", AccessKind::Before)
            .unwrap();
        assert_eq!(hook.len(), 3);

        struct Marker;
        crate::host_object!(Marker => "Derived");
        let marker = Marker;
        let mut join_point = JoinPoint::detached(&marker, "Tick", AccessKind::Before);
        hook.invoke(&mut join_point);

        assert_eq!(*order.lock().unwrap(), vec!["d1", "b1", "b2"]);
    }

    #[test]
    fn test_cache_cleared_by_any_mutation() {
        let registry = registry();
        registry
            .register("h1", key("Base"), "Tick", AccessKind::Before, noop())
            .unwrap();

        registry.lookup(&key("Base"), "Tick", AccessKind::Before);
        registry.lookup(&key("Derived"), "Tick", AccessKind::Before);
        assert_eq!(registry.cached_type_count(), 2);

        registry
            .register("h2", key("Other"), "Tick", AccessKind::Before, noop())
            .unwrap();
        assert_eq!(registry.cached_type_count(), 0);
    }

    #[test]
    fn test_hierarchy_change_invalidates_cache() {
        let registry = registry();
        registry
            .register("h1", key("Base"), "Tick", AccessKind::Before, noop())
            .unwrap();

        assert!(registry.lookup(&key("Late"), "Tick", AccessKind::Before).is_none());

        registry
            .hierarchy()
            .declare(key("Late"), Some(key("Base")))
            .unwrap();
        assert!(registry.lookup(&key("Late"), "Tick", AccessKind::Before).is_some());
    }

    #[test]
    fn test_anonymous_registration() {
        let registry = registry();
        let identity = registry
            .register_anonymous(key("Base"), "Tick", AccessKind::After, noop())
            .unwrap();
        assert!(registry.is_registered(&identity));
        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(registry.cached_type_count(), 0);
    }
}
