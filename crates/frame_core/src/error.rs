//! Error types for the frame substrate

use crate::registry::AccessKind;

/// Main error type for the substrate
#[derive(Debug, thiserror::Error)]
pub enum SubstrateError {
    /// Hook or service registration was rejected
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Event bus subscription was rejected
    #[error("Event error: {0}")]
    Event(#[from] EventError),

    /// Module scheduler error
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// The substrate has not been started (or was shut down)
    #[error("Substrate is not running")]
    NotStarted,

    /// `startup` was called twice
    #[error("Substrate is already running")]
    AlreadyStarted,
}

/// Configuration errors raised by the hook and service registries.
///
/// Every variant leaves the registry in its prior state.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Identity strings are unique within a registry
    #[error("Handler identity already registered: {0}")]
    DuplicateIdentity(String),

    /// Unregistering an identity that was never registered
    #[error("Handler identity not registered: {0}")]
    UnknownIdentity(String),

    /// The unregister request does not describe the registered entry
    #[error("Handler {identity} does not match the unregister request: {detail}")]
    Mismatch { identity: String, detail: String },

    /// `AccessKind::Unknown` is never a valid registration key
    #[error("Access kind {access} cannot be registered (identity {identity})")]
    InvalidAccessKind { identity: String, access: AccessKind },

    /// Operation names must be non-empty
    #[error("Empty operation name for {0}")]
    EmptyOperation(String),

    /// Declaring the parent would make the type its own ancestor
    #[error("Declaring {ty} with parent {parent} creates an inheritance cycle")]
    CyclicHierarchy { ty: String, parent: String },

    /// Target category has not been declared in the type hierarchy
    #[error("Type or category not declared: {0}")]
    UndeclaredType(String),

    /// A classification binding names a callback the hook library does not provide
    #[error("Hook callback not found in library: {0}")]
    UnknownCallback(String),
}

/// Errors that can occur during event subscription
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// A listener may subscribe at most once per key
    #[error("Listener already subscribed to {0}")]
    DuplicateListener(String),

    /// Unsubscribing a listener that is not subscribed
    #[error("Listener not subscribed to {0}")]
    ListenerNotFound(String),
}

/// Errors raised by the module scheduler
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// No priority is configured for the module type. This is a lookup miss
    /// and is never logged.
    #[error("Module not configured: {0}")]
    NotConfigured(String),

    /// A priority is configured but nothing can construct the module
    #[error("No factory registered for module: {0}")]
    NoFactory(String),

    /// A factory is already registered under this name
    #[error("Module factory already registered: {0}")]
    DuplicateFactory(String),

    /// The module is waiting to be reaped at the end of the current pass
    #[error("Module is expired: {0}")]
    Expired(String),

    /// The module requested its own creation while being created
    #[error("Circular module creation: {0}")]
    CircularCreation(String),

    /// A command with this name is already registered
    #[error("Command already registered: {0}")]
    DuplicateCommand(String),

    /// The scheduler configuration is malformed
    #[error("Invalid scheduler configuration: {0}")]
    InvalidConfig(String),
}

/// Failure of a wrapped host operation.
///
/// Produced by the weaver when the real invocation returns an error or
/// panics; it is logged and routed to `AfterThrowing` hooks, never returned
/// to the caller of `invoke`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InvocationError {
    /// The operation returned an error
    #[error("Operation {operation} failed: {message}")]
    Failed { operation: String, message: String },

    /// The operation panicked
    #[error("Operation {operation} panicked: {message}")]
    Panicked { operation: String, message: String },
}

impl InvocationError {
    /// Name of the operation that failed
    pub fn operation(&self) -> &str {
        match self {
            InvocationError::Failed { operation, .. } => operation,
            InvocationError::Panicked { operation, .. } => operation,
        }
    }

    /// Whether the failure was a panic rather than a returned error
    pub fn is_panic(&self) -> bool {
        matches!(self, InvocationError::Panicked { .. })
    }
}
