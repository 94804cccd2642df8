//! Category fan-out for bus events
//!
//! A distribute registration delivers an event to every live instance of a
//! target category rather than to one subscribed listener. Instances are
//! tracked by weak reference; dropped instances are pruned the next time the
//! instance list is walked.

use crate::error::RegistryError;
use crate::types::{HostObject, TypeHierarchy, TypeKey};
use crate::utils::{identity_of, read, write};
use serde_json::Value;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};
use tracing::{debug, trace, warn};

/// Handler for identifier-keyed distribution
pub type DistributeIdHandler = Arc<dyn Fn(&dyn HostObject, i32, &[Value]) + Send + Sync>;

/// Handler for payload-keyed distribution
pub type DistributePayloadHandler<T> = Arc<dyn Fn(&dyn HostObject, &T) + Send + Sync>;

type ErasedPayloadHandler = Arc<dyn Fn(&dyn HostObject, &dyn Any) + Send + Sync>;

#[derive(Clone)]
struct Distribution<H: Clone> {
    category: TypeKey,
    identity: usize,
    handler: H,
}

/// Registrations that fan events out to tracked instances
pub struct DistributeLayer {
    hierarchy: Arc<TypeHierarchy>,
    instances: RwLock<Vec<Weak<dyn HostObject>>>,
    by_id: RwLock<HashMap<i32, Vec<Distribution<DistributeIdHandler>>>>,
    by_payload: RwLock<HashMap<TypeId, Vec<Distribution<ErasedPayloadHandler>>>>,
}

impl DistributeLayer {
    pub fn new(hierarchy: Arc<TypeHierarchy>) -> Self {
        Self {
            hierarchy,
            instances: RwLock::new(Vec::new()),
            by_id: RwLock::new(HashMap::new()),
            by_payload: RwLock::new(HashMap::new()),
        }
    }

    pub fn hierarchy(&self) -> &Arc<TypeHierarchy> {
        &self.hierarchy
    }

    /// Start delivering distributed events to `instance`.
    ///
    /// Only a weak reference is kept; tracking an instance twice is a no-op.
    pub fn track_instance(&self, instance: &Arc<dyn HostObject>) {
        let identity = identity_of(instance);
        let mut instances = write(&self.instances);
        instances.retain(|weak| weak.strong_count() > 0);
        if instances
            .iter()
            .any(|weak| weak.as_ptr() as *const () as usize == identity)
        {
            return;
        }
        trace!("📌 Tracking {} for distribution", instance.type_key());
        instances.push(Arc::downgrade(instance));
    }

    /// Stop delivering to `instance`; returns whether it was tracked
    pub fn untrack_instance(&self, instance: &Arc<dyn HostObject>) -> bool {
        let identity = identity_of(instance);
        let mut instances = write(&self.instances);
        let tracked = instances
            .iter()
            .any(|weak| weak.as_ptr() as *const () as usize == identity);
        instances.retain(|weak| {
            weak.strong_count() > 0 && weak.as_ptr() as *const () as usize != identity
        });
        tracked
    }

    /// Strong references to every still-alive tracked instance
    pub fn live_instances(&self) -> Vec<Arc<dyn HostObject>> {
        let mut instances = write(&self.instances);
        instances.retain(|weak| weak.strong_count() > 0);
        instances.iter().filter_map(Weak::upgrade).collect()
    }

    /// Fan identifier `id` out to every live instance of `category`.
    ///
    /// The category must already be declared in the hierarchy.
    pub fn register_id(
        &self,
        category: TypeKey,
        id: i32,
        handler: DistributeIdHandler,
    ) -> Result<(), RegistryError> {
        self.require_declared(&category)?;
        debug!("📝 Registered distribution of event {} to {}", id, category);
        write(&self.by_id).entry(id).or_default().push(Distribution {
            category,
            identity: identity_of(&handler),
            handler,
        });
        Ok(())
    }

    /// Fan payloads of type `T` out to every live instance of `category`
    pub fn register_payload<T: Any + Send + Sync>(
        &self,
        category: TypeKey,
        handler: DistributePayloadHandler<T>,
    ) -> Result<(), RegistryError> {
        self.require_declared(&category)?;
        debug!(
            "📝 Registered distribution of {} to {}",
            std::any::type_name::<T>(),
            category
        );
        let identity = identity_of(&handler);
        let erased: ErasedPayloadHandler = Arc::new(move |host: &dyn HostObject, payload: &dyn Any| {
            if let Some(payload) = payload.downcast_ref::<T>() {
                handler(host, payload);
            }
        });
        write(&self.by_payload)
            .entry(TypeId::of::<T>())
            .or_default()
            .push(Distribution {
                category,
                identity,
                handler: erased,
            });
        Ok(())
    }

    /// Remove every registration made with `handler`; returns how many
    pub fn unregister<H: ?Sized>(&self, handler: &Arc<H>) -> usize {
        let identity = identity_of(handler);
        let mut removed = 0;

        for list in write(&self.by_id).values_mut() {
            let before = list.len();
            list.retain(|entry| entry.identity != identity);
            removed += before - list.len();
        }
        for list in write(&self.by_payload).values_mut() {
            let before = list.len();
            list.retain(|entry| entry.identity != identity);
            removed += before - list.len();
        }

        removed
    }

    /// Deliver an identifier event; returns the number of handler calls
    pub fn dispatch_id(&self, id: i32, args: &[Value]) -> usize {
        let registrations = match read(&self.by_id).get(&id) {
            Some(list) if !list.is_empty() => list.clone(),
            _ => return 0,
        };
        let instances = self.live_instances();
        let mut delivered = 0;

        for registration in &registrations {
            for instance in self.members_of(&registration.category, &instances) {
                (registration.handler)(instance.as_ref(), id, args);
                delivered += 1;
            }
        }

        delivered
    }

    /// Deliver a payload event; returns the number of handler calls
    pub fn dispatch_payload(&self, type_id: TypeId, payload: &dyn Any) -> usize {
        let registrations = match read(&self.by_payload).get(&type_id) {
            Some(list) if !list.is_empty() => list.clone(),
            _ => return 0,
        };
        let instances = self.live_instances();
        let mut delivered = 0;

        for registration in &registrations {
            for instance in self.members_of(&registration.category, &instances) {
                (registration.handler)(instance.as_ref(), payload);
                delivered += 1;
            }
        }

        delivered
    }

    pub fn registration_count(&self) -> usize {
        read(&self.by_id).values().map(Vec::len).sum::<usize>()
            + read(&self.by_payload).values().map(Vec::len).sum::<usize>()
    }

    pub fn clear(&self) {
        write(&self.instances).clear();
        write(&self.by_id).clear();
        write(&self.by_payload).clear();
    }

    fn members_of<'a>(
        &self,
        category: &TypeKey,
        instances: &'a [Arc<dyn HostObject>],
    ) -> impl Iterator<Item = &'a Arc<dyn HostObject>> + 'a {
        // A registration whose category vanished from the hierarchy can no
        // longer be matched against anything; that is a configuration bug.
        assert!(
            self.hierarchy.contains(category),
            "distribution target category {} is not declared",
            category
        );
        let hierarchy = self.hierarchy.clone();
        let category = category.clone();
        instances
            .iter()
            .filter(move |instance| hierarchy.is_assignable(&category, &instance.type_key()))
    }

    fn require_declared(&self, category: &TypeKey) -> Result<(), RegistryError> {
        if self.hierarchy.contains(category) {
            Ok(())
        } else {
            warn!("⚠️ Cannot distribute to undeclared category {}", category);
            Err(RegistryError::UndeclaredType(category.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Guard {
        name: &'static str,
    }
    crate::host_object!(Guard => "Guard");

    struct Barrel;
    crate::host_object!(Barrel => "Barrel");

    fn layer() -> DistributeLayer {
        let hierarchy = Arc::new(TypeHierarchy::new());
        hierarchy.declare(TypeKey::new("Actor"), None).unwrap();
        hierarchy.declare(TypeKey::new("Guard"), Some(TypeKey::new("Actor"))).unwrap();
        hierarchy.declare(TypeKey::new("Barrel"), None).unwrap();
        hierarchy.add_category(TypeKey::new("Guard"), TypeKey::new("Alertable"));
        DistributeLayer::new(hierarchy)
    }

    #[test]
    fn test_id_fan_out_to_category_members() {
        let layer = layer();
        let a: Arc<dyn HostObject> = Arc::new(Guard { name: "a" });
        let b: Arc<dyn HostObject> = Arc::new(Guard { name: "b" });
        let c: Arc<dyn HostObject> = Arc::new(Barrel);
        layer.track_instance(&a);
        layer.track_instance(&b);
        layer.track_instance(&c);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        layer
            .register_id(
                TypeKey::new("Alertable"),
                3,
                Arc::new(move |host: &dyn HostObject, id: i32, _args: &[Value]| {
                    let guard = host.downcast_ref::<Guard>().unwrap();
                    sink.lock().unwrap().push((guard.name, id));
                }),
            )
            .unwrap();

        assert_eq!(layer.dispatch_id(3, &[]), 2);
        assert_eq!(*seen.lock().unwrap(), vec![("a", 3), ("b", 3)]);
        assert_eq!(layer.dispatch_id(4, &[]), 0);
    }

    #[test]
    fn test_payload_fan_out_by_base_type() {
        let layer = layer();
        let guard: Arc<dyn HostObject> = Arc::new(Guard { name: "g" });
        layer.track_instance(&guard);

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        layer
            .register_payload::<u64>(
                TypeKey::new("Actor"),
                Arc::new(move |_host: &dyn HostObject, value: &u64| {
                    counter.fetch_add(*value as usize, Ordering::SeqCst);
                }),
            )
            .unwrap();

        assert_eq!(layer.dispatch_payload(TypeId::of::<u64>(), &5u64), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 5);
        assert_eq!(layer.dispatch_payload(TypeId::of::<u32>(), &5u32), 0);
    }

    #[test]
    fn test_dropped_instances_pruned() {
        let layer = layer();
        let kept: Arc<dyn HostObject> = Arc::new(Guard { name: "kept" });
        layer.track_instance(&kept);
        layer.track_instance(&kept);
        {
            let dropped: Arc<dyn HostObject> = Arc::new(Guard { name: "dropped" });
            layer.track_instance(&dropped);
            assert_eq!(layer.live_instances().len(), 2);
        }
        assert_eq!(layer.live_instances().len(), 1);

        assert!(layer.untrack_instance(&kept));
        assert!(!layer.untrack_instance(&kept));
        assert!(layer.live_instances().is_empty());
    }

    #[test]
    fn test_undeclared_category_rejected() {
        let layer = layer();
        let result = layer.register_id(
            TypeKey::new("Ghost"),
            1,
            Arc::new(|_host: &dyn HostObject, _id: i32, _args: &[Value]| {}),
        );
        assert!(matches!(result, Err(RegistryError::UndeclaredType(_))));
        assert_eq!(layer.registration_count(), 0);
    }

    #[test]
    fn test_unregister_by_handler_identity() {
        let layer = layer();
        let handler: DistributeIdHandler = Arc::new(|_host: &dyn HostObject, _id: i32, _args: &[Value]| {});
        layer.register_id(TypeKey::new("Actor"), 1, handler.clone()).unwrap();
        layer.register_id(TypeKey::new("Actor"), 2, handler.clone()).unwrap();
        assert_eq!(layer.unregister(&handler), 2);
        assert_eq!(layer.registration_count(), 0);
    }

    #[test]
    #[should_panic(expected = "not declared")]
    fn test_dispatch_to_vanished_category_panics() {
        let layer = layer();
        let guard: Arc<dyn HostObject> = Arc::new(Guard { name: "g" });
        layer.track_instance(&guard);
        layer
            .register_id(
                TypeKey::new("Actor"),
                1,
                Arc::new(|_host: &dyn HostObject, _id: i32, _args: &[Value]| {}),
            )
            .unwrap();
        layer.hierarchy().clear();
        layer.dispatch_id(1, &[]);
    }
}
