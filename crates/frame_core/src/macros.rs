//! Macros for declaring host types and hooks

/// Implement [`HostObject`](crate::HostObject) for a type under a runtime type name
///
/// ```rust
/// struct Door;
/// frame_core::host_object!(Door => "Door");
/// ```
#[macro_export]
macro_rules! host_object {
    ($ty:ty => $name:expr) => {
        impl $crate::HostObject for $ty {
            fn type_key(&self) -> $crate::TypeKey {
                $crate::TypeKey::new($name)
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }
        }
    };
}

/// Register several hooks with clean syntax, stopping at the first error
///
/// ```rust
/// use frame_core::*;
/// use std::sync::Arc;
///
/// let registry = TypeHandlerRegistry::new(Arc::new(TypeHierarchy::new()));
/// register_hooks!(registry;
///     "door.log" => "Door", "Open", Before => |jp| println!("opening {}", jp.operation()),
///     "door.audit" => "Door", "Open", AfterReturning => |_jp| {},
/// )
/// .unwrap();
/// assert_eq!(registry.len(), 2);
/// ```
#[macro_export]
macro_rules! register_hooks {
    ($registry:expr; $($identity:expr => $target:expr, $operation:expr, $access:ident => $callback:expr),* $(,)?) => {{
        (|| -> ::std::result::Result<(), $crate::RegistryError> {
            $(
                $registry.register(
                    $identity,
                    $crate::TypeKey::new($target),
                    $operation,
                    $crate::AccessKind::$access,
                    $crate::registry::hook($callback),
                )?;
            )*
            Ok(())
        })()
    }};
}

/// Register several service callbacks with clean syntax, stopping at the first error
#[macro_export]
macro_rules! register_services {
    ($services:expr; $($target:expr, $operation:expr => $callback:expr),* $(,)?) => {{
        (|| -> ::std::result::Result<(), $crate::RegistryError> {
            $(
                $services.register_service_callback(
                    $crate::TypeKey::new($target),
                    $operation,
                    $crate::service::service($callback),
                )?;
            )*
            Ok(())
        })()
    }};
}

#[cfg(test)]
mod tests {
    use crate::{HostObject, LifecycleServiceDispatcher, TypeHandlerRegistry, TypeHierarchy, TypeKey};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Lamp;
    crate::host_object!(Lamp => "Lamp");

    #[test]
    fn test_host_object_macro() {
        let lamp = Lamp;
        let host: &dyn HostObject = &lamp;
        assert_eq!(host.type_key(), TypeKey::new("Lamp"));
        assert!(host.downcast_ref::<Lamp>().is_some());
    }

    #[test]
    fn test_register_hooks_stops_at_first_error() {
        let registry = TypeHandlerRegistry::new(Arc::new(TypeHierarchy::new()));
        let result = crate::register_hooks!(registry;
            "lamp.on" => "Lamp", "Toggle", Before => |_jp| {},
            "lamp.on" => "Lamp", "Toggle", After => |_jp| {},
            "lamp.off" => "Lamp", "Toggle", After => |_jp| {},
        );
        assert!(result.is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_services() {
        let services = LifecycleServiceDispatcher::new(Arc::new(TypeHierarchy::new()));
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        crate::register_services!(services;
            "Lamp", "Toggle" => move |_host, _reload| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

        assert_eq!(services.dispatch(&Lamp, "Toggle", false), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
