//! Buffered and immediate event distribution
//!
//! Listeners are keyed either by an integer event identifier or by the
//! runtime type of a payload. `send*` enqueues an envelope that is delivered
//! on the next [`flush`](EventBus::flush); `fire*` delivers before returning.
//!
//! Listeners may subscribe and unsubscribe (themselves or others) while a
//! dispatch is running. Dispatch works from a snapshot of the listener list
//! taken when the dispatch starts, so every listener present at that moment
//! is called exactly once and later changes apply to the next dispatch.

use crate::distribute::DistributeLayer;
use crate::error::EventError;
use crate::types::TypeHierarchy;
use crate::utils::{identity_of, lock, read, write};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::{Any, TypeId};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, trace, warn};

/// Listener for identifier-keyed events
pub type IdListener = Arc<dyn Fn(i32, &[Value]) + Send + Sync>;

/// Listener for payload-keyed events of type `T`
pub type PayloadListener<T> = Arc<dyn Fn(&T) + Send + Sync>;

type ErasedCall = Arc<dyn Fn(&dyn Any) + Send + Sync>;

#[derive(Clone)]
struct ErasedListener {
    identity: usize,
    call: ErasedCall,
}

struct PayloadSlot {
    type_name: &'static str,
    listeners: Vec<ErasedListener>,
}

/// A buffered event waiting for the next flush
pub enum EventEnvelope {
    /// Addressed by integer identifier with loosely typed arguments
    Identified { id: i32, args: Vec<Value> },
    /// Addressed by the payload's runtime type
    Payload {
        type_id: TypeId,
        type_name: &'static str,
        payload: Arc<dyn Any + Send + Sync>,
    },
}

impl EventEnvelope {
    pub fn identified(id: i32, args: Vec<Value>) -> Self {
        EventEnvelope::Identified { id, args }
    }

    pub fn payload<T: Any + Send + Sync>(payload: T) -> Self {
        EventEnvelope::Payload {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            payload: Arc::new(payload),
        }
    }

    /// Human-readable address for logging
    pub fn describe(&self) -> String {
        match self {
            EventEnvelope::Identified { id, .. } => format!("event {}", id),
            EventEnvelope::Payload { type_name, .. } => format!("payload {}", type_name),
        }
    }
}

impl std::fmt::Debug for EventEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventEnvelope::Identified { id, args } => f
                .debug_struct("Identified")
                .field("id", id)
                .field("args", args)
                .finish(),
            EventEnvelope::Payload { type_name, .. } => f
                .debug_struct("Payload")
                .field("type_name", type_name)
                .finish_non_exhaustive(),
        }
    }
}

/// Listeners captured at the start of a dispatch.
///
/// A lone listener is carried without allocating a list.
enum Snapshot<T> {
    Empty,
    Single(T),
    Many(Vec<T>),
}

impl<T: Clone> Snapshot<T> {
    fn of(list: Option<&Vec<T>>) -> Self {
        match list {
            None => Snapshot::Empty,
            Some(list) => match list.as_slice() {
                [] => Snapshot::Empty,
                [only] => Snapshot::Single(only.clone()),
                many => Snapshot::Many(many.to_vec()),
            },
        }
    }

    fn for_each(self, mut f: impl FnMut(&T)) -> usize {
        match self {
            Snapshot::Empty => 0,
            Snapshot::Single(only) => {
                f(&only);
                1
            }
            Snapshot::Many(all) => {
                all.iter().for_each(&mut f);
                all.len()
            }
        }
    }
}

/// Statistics for event bus monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    /// Envelopes enqueued with `send*`
    pub sent: u64,
    /// Immediate dispatches via `fire*`
    pub fired: u64,
    /// Envelopes delivered by `flush`
    pub flushed: u64,
    /// Individual listener and distribution calls
    pub delivered: u64,
    /// Rejected duplicate subscriptions
    pub rejected: u64,
}

#[derive(Default)]
struct BusCounters {
    sent: AtomicU64,
    fired: AtomicU64,
    flushed: AtomicU64,
    delivered: AtomicU64,
    rejected: AtomicU64,
}

/// In-process event bus with a buffered queue
pub struct EventBus {
    by_id: RwLock<HashMap<i32, Vec<IdListener>>>,
    by_payload: RwLock<HashMap<TypeId, PayloadSlot>>,
    queue: Mutex<VecDeque<EventEnvelope>>,
    distribute: Option<DistributeLayer>,
    counters: BusCounters,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Bus without a distribute layer
    pub fn new() -> Self {
        Self {
            by_id: RwLock::new(HashMap::new()),
            by_payload: RwLock::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
            distribute: None,
            counters: BusCounters::default(),
        }
    }

    /// Bus whose events also fan out to category members of `hierarchy`
    pub fn with_hierarchy(hierarchy: Arc<TypeHierarchy>) -> Self {
        Self {
            distribute: Some(DistributeLayer::new(hierarchy)),
            ..Self::new()
        }
    }

    pub fn distribute(&self) -> Option<&DistributeLayer> {
        self.distribute.as_ref()
    }

    /// Subscribe `listener` to identifier `id`
    pub fn subscribe(&self, id: i32, listener: IdListener) -> Result<(), EventError> {
        let identity = identity_of(&listener);
        let mut by_id = write(&self.by_id);
        let list = by_id.entry(id).or_default();

        if list.iter().any(|existing| identity_of(existing) == identity) {
            drop(by_id);
            return Err(self.reject(format!("event {}", id)));
        }

        list.push(listener);
        debug!("📝 Subscribed listener to event {} ({} total)", id, list.len());
        Ok(())
    }

    /// Remove `listener` from identifier `id`
    pub fn unsubscribe(&self, id: i32, listener: &IdListener) -> Result<(), EventError> {
        let identity = identity_of(listener);
        let mut by_id = write(&self.by_id);

        let removed = match by_id.get_mut(&id) {
            Some(list) => {
                let before = list.len();
                list.retain(|existing| identity_of(existing) != identity);
                let removed = list.len() < before;
                if list.is_empty() {
                    by_id.remove(&id);
                }
                removed
            }
            None => false,
        };

        if removed {
            trace!("🗑️ Unsubscribed listener from event {}", id);
            Ok(())
        } else {
            Err(EventError::ListenerNotFound(format!("event {}", id)))
        }
    }

    /// Subscribe `listener` to payloads of type `T`
    pub fn subscribe_payload<T: Any + Send + Sync>(
        &self,
        listener: PayloadListener<T>,
    ) -> Result<(), EventError> {
        let identity = identity_of(&listener);
        let type_name = std::any::type_name::<T>();
        let mut by_payload = write(&self.by_payload);
        let slot = by_payload
            .entry(TypeId::of::<T>())
            .or_insert_with(|| PayloadSlot {
                type_name,
                listeners: Vec::new(),
            });

        if slot.listeners.iter().any(|existing| existing.identity == identity) {
            drop(by_payload);
            return Err(self.reject(format!("payload {}", type_name)));
        }

        let call: ErasedCall = Arc::new(move |payload: &dyn Any| {
            if let Some(payload) = payload.downcast_ref::<T>() {
                listener(payload);
            }
        });
        slot.listeners.push(ErasedListener { identity, call });
        debug!(
            "📝 Subscribed listener to payload {} ({} total)",
            type_name,
            slot.listeners.len()
        );
        Ok(())
    }

    /// Remove `listener` from payloads of type `T`
    pub fn unsubscribe_payload<T: Any + Send + Sync>(
        &self,
        listener: &PayloadListener<T>,
    ) -> Result<(), EventError> {
        let identity = identity_of(listener);
        let type_id = TypeId::of::<T>();
        let mut by_payload = write(&self.by_payload);

        let removed = match by_payload.get_mut(&type_id) {
            Some(slot) => {
                let before = slot.listeners.len();
                slot.listeners.retain(|existing| existing.identity != identity);
                let removed = slot.listeners.len() < before;
                if slot.listeners.is_empty() {
                    by_payload.remove(&type_id);
                }
                removed
            }
            None => false,
        };

        if removed {
            Ok(())
        } else {
            Err(EventError::ListenerNotFound(format!(
                "payload {}",
                std::any::type_name::<T>()
            )))
        }
    }

    /// Remove `listener` from every identifier and payload list it is in.
    ///
    /// Returns the number of subscriptions removed.
    pub fn unsubscribe_all<L: ?Sized>(&self, listener: &Arc<L>) -> usize {
        let identity = identity_of(listener);
        let mut removed = 0;

        {
            let mut by_id = write(&self.by_id);
            for list in by_id.values_mut() {
                let before = list.len();
                list.retain(|existing| identity_of(existing) != identity);
                removed += before - list.len();
            }
            by_id.retain(|_, list| !list.is_empty());
        }
        {
            let mut by_payload = write(&self.by_payload);
            for slot in by_payload.values_mut() {
                let before = slot.listeners.len();
                slot.listeners.retain(|existing| existing.identity != identity);
                removed += before - slot.listeners.len();
            }
            by_payload.retain(|_, slot| !slot.listeners.is_empty());
        }

        if removed > 0 {
            debug!("🗑️ Removed listener from {} subscription(s)", removed);
        }
        removed
    }

    /// Enqueue identifier `id` for the next flush
    pub fn send(&self, id: i32, args: Vec<Value>) {
        self.enqueue(EventEnvelope::identified(id, args));
    }

    /// Enqueue `payload` for the next flush
    pub fn send_payload<T: Any + Send + Sync>(&self, payload: T) {
        self.enqueue(EventEnvelope::payload(payload));
    }

    /// Deliver identifier `id` before returning; returns the number of calls made
    pub fn fire(&self, id: i32, args: &[Value]) -> usize {
        self.counters.fired.fetch_add(1, Ordering::Relaxed);
        self.dispatch_id(id, args)
    }

    /// Deliver `payload` before returning; returns the number of calls made
    pub fn fire_payload<T: Any + Send + Sync>(&self, payload: &T) -> usize {
        self.counters.fired.fetch_add(1, Ordering::Relaxed);
        self.dispatch_payload(TypeId::of::<T>(), payload)
    }

    /// Deliver every buffered envelope in FIFO order.
    ///
    /// The queue is swapped out first, so envelopes sent by listeners during
    /// the flush wait for the next one. Returns the number of envelopes
    /// delivered.
    pub fn flush(&self) -> usize {
        let pending = std::mem::take(&mut *lock(&self.queue));
        if pending.is_empty() {
            return 0;
        }

        let count = pending.len();
        trace!("📤 Flushing {} buffered event(s)", count);
        for envelope in pending {
            match envelope {
                EventEnvelope::Identified { id, args } => {
                    self.dispatch_id(id, &args);
                }
                EventEnvelope::Payload {
                    type_id, payload, ..
                } => {
                    self.dispatch_payload(type_id, &*payload);
                }
            }
        }

        self.counters.flushed.fetch_add(count as u64, Ordering::Relaxed);
        count
    }

    /// Number of envelopes waiting for the next flush
    pub fn pending(&self) -> usize {
        lock(&self.queue).len()
    }

    /// Listener count for identifier `id`
    pub fn listener_count(&self, id: i32) -> usize {
        read(&self.by_id).get(&id).map(Vec::len).unwrap_or(0)
    }

    /// Listener count for payloads of type `T`
    pub fn payload_listener_count<T: Any>(&self) -> usize {
        read(&self.by_payload)
            .get(&TypeId::of::<T>())
            .map(|slot| slot.listeners.len())
            .unwrap_or(0)
    }

    /// Payload types that currently have listeners
    pub fn payload_types(&self) -> Vec<&'static str> {
        read(&self.by_payload)
            .values()
            .map(|slot| slot.type_name)
            .collect()
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            sent: self.counters.sent.load(Ordering::Relaxed),
            fired: self.counters.fired.load(Ordering::Relaxed),
            flushed: self.counters.flushed.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }

    /// Drop every listener, distribution and buffered envelope
    pub fn clear(&self) {
        write(&self.by_id).clear();
        write(&self.by_payload).clear();
        let dropped = std::mem::take(&mut *lock(&self.queue));
        if !dropped.is_empty() {
            debug!("🗑️ Discarded {} undelivered event(s)", dropped.len());
        }
        if let Some(distribute) = &self.distribute {
            distribute.clear();
        }
    }

    fn enqueue(&self, envelope: EventEnvelope) {
        trace!("📥 Queued {}", envelope.describe());
        lock(&self.queue).push_back(envelope);
        self.counters.sent.fetch_add(1, Ordering::Relaxed);
    }

    fn reject(&self, key: String) -> EventError {
        self.counters.rejected.fetch_add(1, Ordering::Relaxed);
        warn!("⚠️ Listener already subscribed to {}, ignoring", key);
        EventError::DuplicateListener(key)
    }

    fn dispatch_id(&self, id: i32, args: &[Value]) -> usize {
        let snapshot = Snapshot::of(read(&self.by_id).get(&id));
        let mut delivered = snapshot.for_each(|listener| listener(id, args));

        if let Some(distribute) = &self.distribute {
            delivered += distribute.dispatch_id(id, args);
        }

        self.counters
            .delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    fn dispatch_payload(&self, type_id: TypeId, payload: &dyn Any) -> usize {
        let snapshot = Snapshot::of(
            read(&self.by_payload)
                .get(&type_id)
                .map(|slot| &slot.listeners),
        );
        let mut delivered = snapshot.for_each(|listener| (listener.call)(payload));

        if let Some(distribute) = &self.distribute {
            delivered += distribute.dispatch_payload(type_id, payload);
        }

        self.counters
            .delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }
}
