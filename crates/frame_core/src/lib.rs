//! # Frame Core
//!
//! The in-process substrate a frame-driven game framework is built on:
//! call interception for host objects, event distribution, and a
//! priority-ordered module scheduler.
//!
//! ## Key Features
//!
//! - **Aspect weaving**: attach before/around/after/returning/throwing/extend
//!   hooks to named operations of any host type without touching the type
//! - **Inheritance-aware resolution**: hooks and services declared on a base
//!   type or category apply to every derived type, with cached lookups
//! - **Buffered events**: identifier- or payload-keyed listeners, delivered
//!   immediately or on the next flush, safe against mid-dispatch unsubscribe
//! - **Module scheduling**: lazily created modules ticked in priority order,
//!   with destruction deferred to the end of a running pass
//!
//! ## Architecture
//!
//! - **TypeHierarchy**: runtime parent links and category tags for host types
//! - **TypeHandlerRegistry**: `(type, operation, access kind)` → hooks
//! - **AspectWeaver**: runs the five-phase protocol around a real call
//! - **LifecycleServiceDispatcher**: one-time wiring after successful calls
//! - **EventBus**: listeners plus the category fan-out `DistributeLayer`
//! - **ModuleScheduler**: module lifecycle, passes and deferred tasks
//! - **Substrate**: owns all of the above and drives one tick per frame
//!
//! ## Usage Example
//!
//! ```rust
//! use frame_core::*;
//! use std::sync::Arc;
//!
//! struct Door;
//! host_object!(Door => "Door");
//!
//! let substrate = Substrate::new(SubstrateConfig::default());
//! substrate.startup(&HookLibrary::new())?;
//!
//! register_hooks!(substrate.registry();
//!     "door.log" => "Door", "Open", Before => |jp| println!("{} opening", jp.target().type_key()),
//! )?;
//!
//! let opened = substrate
//!     .weaver()
//!     .invoke_returning(&Door, "Open", || Ok::<_, String>(true));
//! assert!(opened);
//!
//! substrate.tick()?;
//! substrate.shutdown()?;
//! # Ok::<(), SubstrateError>(())
//! ```

pub mod classification;
pub mod clock;
pub mod command;
pub mod context;
pub mod distribute;
pub mod error;
pub mod event;
pub mod macros;
pub mod module;
pub mod pool;
pub mod registry;
pub mod scheduler;
pub mod service;
pub mod types;
pub mod utils;
pub mod weaver;

#[cfg(test)]
mod test_integration;

// Re-exports for convenience
pub use classification::{
    load_classification, ClassificationSource, HookBinding, HookLibrary, LoadReport,
    StaticClassification, TypeDeclaration,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{CommandArgs, CommandDispatcher, CommandHandler};
pub use context::{Substrate, SubstrateConfig};
pub use distribute::{DistributeIdHandler, DistributeLayer, DistributePayloadHandler};
pub use error::{EventError, InvocationError, RegistryError, SchedulerError, SubstrateError};
pub use event::{BusStats, EventBus, EventEnvelope, IdListener, PayloadListener};
pub use module::{Module, ModuleFactory, ModuleState, SimpleModuleFactory};
pub use pool::{ObjectPool, Poolable, VecPool};
pub use registry::{hook, AccessKind, HookCallback, MulticastHook, ResolvedHandlerTable, TypeHandlerRegistry};
pub use scheduler::{ModuleRecord, ModuleScheduler, SchedulerConfig, SchedulerStats};
pub use service::{service, LifecycleServiceDispatcher, ServiceCallback};
pub use types::{HostObject, TypeHierarchy, TypeKey};
pub use weaver::{AspectWeaver, JoinPoint};

/// Version information for diagnostics
pub const FRAME_CORE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type used throughout the substrate
pub type Result<T> = std::result::Result<T, SubstrateError>;
