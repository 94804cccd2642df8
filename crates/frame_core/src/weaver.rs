//! Five-phase weaving of host operations
//!
//! `invoke` runs: Before, then Around (or the real call), then After, then
//! AfterReturning or AfterThrowing. A successful call is also reported to the
//! [`LifecycleServiceDispatcher`]. Only the real call is guarded: an error or
//! panic from it is logged and turned into the AfterThrowing path, while a
//! panic inside a hook propagates to the caller.

use crate::error::InvocationError;
use crate::registry::{AccessKind, TypeHandlerRegistry};
use crate::service::LifecycleServiceDispatcher;
use crate::types::{HostObject, TypeKey};
use crate::utils::panic_message;
use smallvec::SmallVec;
use std::any::Any;
use std::fmt::Display;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, warn};

type RealInvocation<'a> = Box<dyn FnOnce() -> Result<Box<dyn Any>, InvocationError> + 'a>;

/// State of one woven call, handed to every hook in turn
pub struct JoinPoint<'a> {
    target: &'a dyn HostObject,
    operation: &'a str,
    phase: AccessKind,
    args: SmallVec<[&'a dyn Any; 2]>,
    real: Option<RealInvocation<'a>>,
    proceeded: bool,
    returned: Option<Box<dyn Any>>,
    failure: Option<InvocationError>,
}

impl<'a> JoinPoint<'a> {
    fn new(
        target: &'a dyn HostObject,
        operation: &'a str,
        args: SmallVec<[&'a dyn Any; 2]>,
        real: Option<RealInvocation<'a>>,
    ) -> Self {
        Self {
            target,
            operation,
            phase: AccessKind::Unknown,
            args,
            real,
            proceeded: false,
            returned: None,
            failure: None,
        }
    }

    /// A join point with no underlying call, for invoking hooks directly
    pub fn detached(target: &'a dyn HostObject, operation: &'a str, phase: AccessKind) -> Self {
        let mut join_point = Self::new(target, operation, SmallVec::new(), None);
        join_point.phase = phase;
        join_point
    }

    pub fn target(&self) -> &'a dyn HostObject {
        self.target
    }

    /// Downcast the host object
    pub fn target_as<T: Any>(&self) -> Option<&'a T> {
        self.target.as_any().downcast_ref::<T>()
    }

    pub fn operation(&self) -> &str {
        self.operation
    }

    /// Phase currently executing
    pub fn phase(&self) -> AccessKind {
        self.phase
    }

    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    /// Typed view of input parameter `index`
    pub fn arg<T: Any>(&self, index: usize) -> Option<&'a T> {
        self.args.get(index).and_then(|arg| arg.downcast_ref::<T>())
    }

    /// Run the real operation from an Around hook.
    ///
    /// Returns `true` if the operation ran and succeeded. The real call runs
    /// at most once; later calls, and calls from any other phase, do nothing.
    pub fn proceed(&mut self) -> bool {
        if self.phase != AccessKind::Around {
            warn!(
                "⚠️ proceed() called from {} hook of {}::{}; ignored",
                self.phase,
                self.target.type_key(),
                self.operation
            );
            return false;
        }
        self.run_real()
    }

    pub fn has_proceeded(&self) -> bool {
        self.proceeded
    }

    /// Override the value returned to the caller
    pub fn set_return<R: Any>(&mut self, value: R) {
        self.returned = Some(Box::new(value));
    }

    pub fn return_value<R: Any>(&self) -> Option<&R> {
        self.returned.as_ref().and_then(|value| value.downcast_ref::<R>())
    }

    /// Failure of the real call, visible to After and AfterThrowing hooks
    pub fn failure(&self) -> Option<&InvocationError> {
        self.failure.as_ref()
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    fn run_real(&mut self) -> bool {
        let Some(real) = self.real.take() else {
            return false;
        };
        self.proceeded = true;

        match real() {
            Ok(value) => {
                self.returned = Some(value);
                true
            }
            Err(failure) => {
                error!(
                    "❌ {}::{} raised: {}",
                    self.target.type_key(),
                    self.operation,
                    failure
                );
                self.failure = Some(failure);
                false
            }
        }
    }

    fn take_return<R: Any + Default>(&mut self) -> R {
        if self.failure.is_some() {
            return R::default();
        }
        match self.returned.take().map(|value| value.downcast::<R>()) {
            Some(Ok(value)) => *value,
            Some(Err(_)) => {
                warn!(
                    "⚠️ {}::{} returned a value of an unexpected type; using default",
                    self.target.type_key(),
                    self.operation
                );
                R::default()
            }
            None => R::default(),
        }
    }
}

/// Run `real`, converting an error or a panic into an [`InvocationError`]
fn guard<'a, R, E, F>(operation: &'a str, real: F) -> RealInvocation<'a>
where
    R: Any,
    E: Display + 'a,
    F: FnOnce() -> Result<R, E> + 'a,
{
    Box::new(move || match catch_unwind(AssertUnwindSafe(real)) {
        Ok(Ok(value)) => Ok(Box::new(value) as Box<dyn Any>),
        Ok(Err(e)) => Err(InvocationError::Failed {
            operation: operation.to_string(),
            message: e.to_string(),
        }),
        Err(panic_info) => Err(InvocationError::Panicked {
            operation: operation.to_string(),
            message: panic_message(panic_info.as_ref()),
        }),
    })
}

fn pack<'a>(args: &[&'a dyn Any]) -> SmallVec<[&'a dyn Any; 2]> {
    args.iter().copied().collect()
}

/// Wraps host operations with registered hooks
pub struct AspectWeaver {
    registry: Arc<TypeHandlerRegistry>,
    services: Arc<LifecycleServiceDispatcher>,
}

impl AspectWeaver {
    pub fn new(registry: Arc<TypeHandlerRegistry>, services: Arc<LifecycleServiceDispatcher>) -> Self {
        Self { registry, services }
    }

    pub fn registry(&self) -> &Arc<TypeHandlerRegistry> {
        &self.registry
    }

    pub fn services(&self) -> &Arc<LifecycleServiceDispatcher> {
        &self.services
    }

    /// Weave a side-effecting operation with no parameters
    pub fn invoke<'a, E, F>(&self, host: &'a dyn HostObject, operation: &'a str, real: F)
    where
        E: Display + 'a,
        F: FnOnce() -> Result<(), E> + 'a,
    {
        self.weave::<()>(host, operation, SmallVec::new(), guard(operation, real));
    }

    /// Weave an operation returning a value; `R::default()` after a failure
    pub fn invoke_returning<'a, R, E, F>(&self, host: &'a dyn HostObject, operation: &'a str, real: F) -> R
    where
        R: Any + Default,
        E: Display + 'a,
        F: FnOnce() -> Result<R, E> + 'a,
    {
        self.weave(host, operation, SmallVec::new(), guard(operation, real))
    }

    /// Weave a side-effecting operation with one parameter
    pub fn invoke1<'a, A, E, F>(&self, host: &'a dyn HostObject, operation: &'a str, arg: &'a A, real: F)
    where
        A: Any,
        E: Display + 'a,
        F: FnOnce(&A) -> Result<(), E> + 'a,
    {
        self.weave::<()>(host, operation, pack(&[arg as &dyn Any]), guard(operation, move || real(arg)));
    }

    /// Weave an operation with one parameter returning a value
    pub fn invoke1_returning<'a, A, R, E, F>(
        &self,
        host: &'a dyn HostObject,
        operation: &'a str,
        arg: &'a A,
        real: F,
    ) -> R
    where
        A: Any,
        R: Any + Default,
        E: Display + 'a,
        F: FnOnce(&A) -> Result<R, E> + 'a,
    {
        self.weave(host, operation, pack(&[arg as &dyn Any]), guard(operation, move || real(arg)))
    }

    /// Weave a side-effecting operation with two parameters
    pub fn invoke2<'a, A, B, E, F>(
        &self,
        host: &'a dyn HostObject,
        operation: &'a str,
        a: &'a A,
        b: &'a B,
        real: F,
    ) where
        A: Any,
        B: Any,
        E: Display + 'a,
        F: FnOnce(&A, &B) -> Result<(), E> + 'a,
    {
        self.weave::<()>(host, operation, pack(&[a as &dyn Any, b as &dyn Any]), guard(operation, move || real(a, b)));
    }

    /// Weave an operation with two parameters returning a value
    pub fn invoke2_returning<'a, A, B, R, E, F>(
        &self,
        host: &'a dyn HostObject,
        operation: &'a str,
        a: &'a A,
        b: &'a B,
        real: F,
    ) -> R
    where
        A: Any,
        B: Any,
        R: Any + Default,
        E: Display + 'a,
        F: FnOnce(&A, &B) -> Result<R, E> + 'a,
    {
        self.weave(host, operation, pack(&[a as &dyn Any, b as &dyn Any]), guard(operation, move || real(a, b)))
    }

    /// Run the Extend hook for an operation the host does not implement.
    ///
    /// Returns `false` when no extension is registered.
    pub fn extend(&self, host: &dyn HostObject, operation: &str) -> bool {
        let type_key = host.type_key();
        let Some(hook) = self.registry.lookup(&type_key, operation, AccessKind::Extend) else {
            return false;
        };

        let mut join_point = JoinPoint::detached(host, operation, AccessKind::Extend);
        hook.invoke(&mut join_point);
        true
    }

    fn weave<'a, R: Any + Default>(
        &self,
        host: &'a dyn HostObject,
        operation: &'a str,
        args: SmallVec<[&'a dyn Any; 2]>,
        real: RealInvocation<'a>,
    ) -> R {
        let type_key = host.type_key();
        let mut join_point = JoinPoint::new(host, operation, args, Some(real));

        self.run_phase(&type_key, &mut join_point, AccessKind::Before);

        match self.registry.lookup(&type_key, operation, AccessKind::Around) {
            Some(around) => {
                join_point.phase = AccessKind::Around;
                around.invoke(&mut join_point);
            }
            None => {
                join_point.run_real();
            }
        }

        self.run_phase(&type_key, &mut join_point, AccessKind::After);

        if join_point.failure.is_some() {
            self.run_phase(&type_key, &mut join_point, AccessKind::AfterThrowing);
        } else {
            self.run_phase(&type_key, &mut join_point, AccessKind::AfterReturning);
            self.services.dispatch(host, operation, false);
        }

        debug!(
            "🧵 Wove {}::{} (succeeded: {})",
            type_key,
            operation,
            join_point.succeeded()
        );
        join_point.take_return::<R>()
    }

    fn run_phase(&self, type_key: &TypeKey, join_point: &mut JoinPoint<'_>, phase: AccessKind) {
        if let Some(hook) = self.registry.lookup(type_key, join_point.operation, phase) {
            join_point.phase = phase;
            hook.invoke(join_point);
        }
    }
}
