use super::*;
use serde_json::{json, Value};
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tracing::debug;

type Trace = Arc<Mutex<Vec<String>>>;

struct Derived;
host_object!(Derived => "Derived");

struct Unrelated;
host_object!(Unrelated => "Unrelated");

fn hierarchy() -> Arc<TypeHierarchy> {
    let hierarchy = Arc::new(TypeHierarchy::new());
    hierarchy.declare(TypeKey::new("Base"), None).unwrap();
    hierarchy.declare(TypeKey::new("Derived"), Some(TypeKey::new("Base"))).unwrap();
    hierarchy.declare(TypeKey::new("Unrelated"), None).unwrap();
    hierarchy
}

fn tracing_hook(trace: &Trace, label: &'static str) -> HookCallback {
    let trace = trace.clone();
    hook(move |_jp| trace.lock().unwrap().push(label.to_string()))
}

fn recorded(trace: &Trace) -> Vec<String> {
    std::mem::take(&mut *trace.lock().unwrap())
}

#[test_log::test]
fn test_hooks_inherit_down_not_up() {
    let registry = TypeHandlerRegistry::new(hierarchy());
    let trace: Trace = Arc::default();

    registry
        .register("base.x", TypeKey::new("Base"), "X", AccessKind::Before, tracing_hook(&trace, "base"))
        .unwrap();
    registry
        .register("derived.y", TypeKey::new("Derived"), "Y", AccessKind::Before, tracing_hook(&trace, "derived"))
        .unwrap();

    assert!(registry.lookup(&TypeKey::new("Derived"), "X", AccessKind::Before).is_some());
    assert!(registry.lookup(&TypeKey::new("Base"), "Y", AccessKind::Before).is_none());
    assert!(registry.lookup(&TypeKey::new("Derived"), "X", AccessKind::After).is_none());
}

#[test]
fn test_no_stale_cache_after_any_mutation() {
    let registry = TypeHandlerRegistry::new(hierarchy());
    let trace: Trace = Arc::default();
    let t = TypeKey::new("Derived");

    // Populate a negative entry for T.
    assert!(registry.lookup(&t, "X", AccessKind::After).is_none());
    assert_eq!(registry.cached_type_count(), 1);

    // An unrelated registration clears everything.
    registry
        .register("u", TypeKey::new("Unrelated"), "X", AccessKind::After, tracing_hook(&trace, "u"))
        .unwrap();
    assert_eq!(registry.cached_type_count(), 0);

    registry
        .register("t", t.clone(), "X", AccessKind::After, tracing_hook(&trace, "t"))
        .unwrap();
    assert!(registry.lookup(&t, "X", AccessKind::After).is_some());

    registry.unregister("t", &t, "X", AccessKind::After).unwrap();
    assert!(registry.lookup(&t, "X", AccessKind::After).is_none());

    // Hierarchy changes invalidate too: Derived loses Base as parent.
    registry
        .register("b", TypeKey::new("Base"), "Z", AccessKind::Before, tracing_hook(&trace, "b"))
        .unwrap();
    assert!(registry.lookup(&t, "Z", AccessKind::Before).is_some());
    registry.hierarchy().declare(t.clone(), None).unwrap();
    assert!(registry.lookup(&t, "Z", AccessKind::Before).is_none());
}

fn woven(trace: &Trace) -> AspectWeaver {
    let hierarchy = hierarchy();
    let registry = Arc::new(TypeHandlerRegistry::new(hierarchy.clone()));
    let services = Arc::new(LifecycleServiceDispatcher::new(hierarchy));

    for (access, label) in [
        (AccessKind::Before, "Before"),
        (AccessKind::After, "After"),
        (AccessKind::AfterReturning, "AfterReturning"),
        (AccessKind::AfterThrowing, "AfterThrowing"),
    ] {
        registry
            .register_anonymous(TypeKey::new("Base"), "Run", access, tracing_hook(trace, label))
            .unwrap();
    }

    let sink = trace.clone();
    services
        .register_service_callback(
            TypeKey::new("Base"),
            "Run",
            service(move |_host, _reload| sink.lock().unwrap().push("ServiceDispatch".to_string())),
        )
        .unwrap();

    AspectWeaver::new(registry, services)
}

#[test_log::test]
fn test_weaving_order_success_and_failure() {
    let trace: Trace = Arc::default();
    let weaver = woven(&trace);

    let sink = trace.clone();
    weaver.invoke(&Derived, "Run", move || -> std::result::Result<(), String> {
        sink.lock().unwrap().push("Real".to_string());
        Ok(())
    });
    assert_eq!(
        recorded(&trace),
        vec!["Before", "Real", "After", "AfterReturning", "ServiceDispatch"]
    );

    weaver.invoke(&Derived, "Run", || Err::<(), _>("boom"));
    assert_eq!(recorded(&trace), vec!["Before", "After", "AfterThrowing"]);
}

#[test]
fn test_weaving_order_with_around() {
    let trace: Trace = Arc::default();
    let weaver = woven(&trace);
    let sink = trace.clone();
    weaver
        .registry()
        .register(
            "around",
            TypeKey::new("Base"),
            "Run",
            AccessKind::Around,
            hook(move |jp| {
                sink.lock().unwrap().push("Around".to_string());
                jp.proceed();
            }),
        )
        .unwrap();

    let sink = trace.clone();
    weaver.invoke(&Derived, "Run", move || -> std::result::Result<(), String> {
        sink.lock().unwrap().push("Real".to_string());
        Ok(())
    });
    assert_eq!(
        recorded(&trace),
        vec!["Before", "Around", "Real", "After", "AfterReturning", "ServiceDispatch"]
    );
}

#[test]
fn test_send_then_flush_versus_fire() {
    let bus = EventBus::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    bus.subscribe(5, Arc::new(move |id: i32, _args: &[Value]| sink.lock().unwrap().push(id)))
        .unwrap();

    bus.send(5, vec![]);
    assert!(seen.lock().unwrap().is_empty());
    bus.flush();
    assert_eq!(*seen.lock().unwrap(), vec![5]);

    bus.fire(5, &[json!(1)]);
    assert_eq!(*seen.lock().unwrap(), vec![5, 5]);
}

#[test_log::test]
fn test_listener_unsubscribing_itself_mid_dispatch() {
    let bus = Arc::new(EventBus::new());
    let calls = Arc::new(Mutex::new(Vec::new()));
    let me: Arc<OnceLock<IdListener>> = Arc::new(OnceLock::new());

    let sink = calls.clone();
    let first: IdListener = Arc::new(move |_id: i32, _args: &[Value]| sink.lock().unwrap().push("first"));

    let sink = calls.clone();
    let owner = bus.clone();
    let handle = me.clone();
    let quitter: IdListener = Arc::new(move |id: i32, _args: &[Value]| {
        sink.lock().unwrap().push("quitter");
        if let Some(me) = handle.get() {
            owner.unsubscribe(id, me).unwrap();
        }
    });
    let _ = me.set(quitter.clone());

    let sink = calls.clone();
    let last: IdListener = Arc::new(move |_id: i32, _args: &[Value]| sink.lock().unwrap().push("last"));

    bus.subscribe(7, first).unwrap();
    bus.subscribe(7, quitter).unwrap();
    bus.subscribe(7, last).unwrap();

    assert_eq!(bus.fire(7, &[]), 3);
    assert_eq!(*calls.lock().unwrap(), vec!["first", "quitter", "last"]);
    assert_eq!(bus.listener_count(7), 2);

    calls.lock().unwrap().clear();
    bus.fire(7, &[]);
    assert_eq!(*calls.lock().unwrap(), vec!["first", "last"]);
}

#[test_log::test]
fn test_listener_unsubscribing_another_mid_dispatch() {
    let bus = Arc::new(EventBus::new());
    let calls = Arc::new(Mutex::new(Vec::new()));
    let target: Arc<OnceLock<IdListener>> = Arc::new(OnceLock::new());

    let sink = calls.clone();
    let owner = bus.clone();
    let handle = target.clone();
    let evictor: IdListener = Arc::new(move |id: i32, _args: &[Value]| {
        sink.lock().unwrap().push("evictor");
        if let Some(evicted) = handle.get() {
            // Only the first dispatch finds it subscribed.
            let _ = owner.unsubscribe(id, evicted);
        }
    });

    let sink = calls.clone();
    let evicted: IdListener = Arc::new(move |_id: i32, _args: &[Value]| sink.lock().unwrap().push("evicted"));
    let _ = target.set(evicted.clone());

    bus.subscribe(9, evictor).unwrap();
    bus.subscribe(9, evicted).unwrap();

    // The dispatch in flight still reaches the removed listener exactly once.
    assert_eq!(bus.fire(9, &[]), 2);
    assert_eq!(*calls.lock().unwrap(), vec!["evictor", "evicted"]);
    assert_eq!(bus.listener_count(9), 1);

    calls.lock().unwrap().clear();
    assert_eq!(bus.fire(9, &[]), 1);
    assert_eq!(*calls.lock().unwrap(), vec!["evictor"]);
}

/// Module that logs its ticks and can destroy a module from `update`
struct Stage {
    name: &'static str,
    trace: Trace,
    destroy_on_update: Option<&'static str>,
}

impl Module for Stage {
    fn name(&self) -> &str {
        self.name
    }

    fn update(&mut self, scheduler: &ModuleScheduler) {
        self.trace.lock().unwrap().push(format!("{}.update", self.name));
        if let Some(target) = self.destroy_on_update.take() {
            debug!("{} destroying {}", self.name, target);
            scheduler.destroy_module(&TypeKey::new(target));
        }
    }

    fn late_update(&mut self, _scheduler: &ModuleScheduler) {
        self.trace.lock().unwrap().push(format!("{}.late_update", self.name));
    }

    fn shutdown(&mut self, _scheduler: &ModuleScheduler) {
        self.trace.lock().unwrap().push(format!("{}.shutdown", self.name));
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn stage_scheduler(trace: &Trace) -> ModuleScheduler {
    let config = SchedulerConfig {
        priorities: [("M", 0), ("N", 1), ("O", 2)]
            .into_iter()
            .map(|(name, priority)| (name.to_string(), priority))
            .collect(),
        autostart: vec!["M".to_string(), "N".to_string(), "O".to_string()],
        default_priority: None,
    };
    let scheduler = ModuleScheduler::new(config);
    for (name, destroy) in [("M", Some("M")), ("N", None), ("O", None)] {
        let trace = trace.clone();
        scheduler
            .register_module(TypeKey::new(name), move || {
                Box::new(Stage {
                    name,
                    trace: trace.clone(),
                    destroy_on_update: destroy,
                }) as Box<dyn Module>
            })
            .unwrap();
    }
    scheduler.startup();
    scheduler
}

#[test_log::test]
fn test_destruction_deferred_inside_pass_and_immediate_outside() {
    let trace: Trace = Arc::default();
    let scheduler = stage_scheduler(&trace);

    scheduler.update();
    scheduler.late_update();
    assert_eq!(
        recorded(&trace),
        vec![
            "M.update",
            "N.update",
            "O.update",
            "N.late_update",
            "O.late_update",
            "M.shutdown"
        ]
    );
    assert_eq!(scheduler.module_order(), vec![TypeKey::new("N"), TypeKey::new("O")]);

    assert!(scheduler.destroy_module(&TypeKey::new("N")));
    assert_eq!(recorded(&trace), vec!["N.shutdown"]);
    assert_eq!(scheduler.module_order(), vec![TypeKey::new("O")]);

    scheduler.update();
    assert_eq!(recorded(&trace), vec!["O.update"]);
}

#[test]
fn test_zero_delay_task_runs_on_next_update_only() {
    let scheduler = ModuleScheduler::new(SchedulerConfig::default());
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();

    scheduler.queue_on_main_thread(
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
        },
        Some(Duration::ZERO),
    );
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    scheduler.late_update();
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    scheduler.update();
    scheduler.update();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

struct Villager {
    name: &'static str,
}
host_object!(Villager => "Villager");

const ALARM: i32 = 42;

/// Activation wires each villager into alarm distribution.
#[test_log::test]
fn test_activation_wires_instances_into_distribution() {
    let substrate = Substrate::new(SubstrateConfig {
        classification: StaticClassification::new()
            .declare(TypeDeclaration::new("Actor"))
            .declare(TypeDeclaration::new("Villager").with_parent("Actor").with_category("Listener")),
        ..SubstrateConfig::default()
    });
    substrate.startup(&HookLibrary::new()).unwrap();

    let heard = Arc::new(Mutex::new(Vec::new()));
    let sink = heard.clone();
    substrate
        .events()
        .distribute()
        .unwrap()
        .register_id(
            TypeKey::new("Listener"),
            ALARM,
            Arc::new(move |host: &dyn HostObject, _id: i32, _args: &[Value]| {
                if let Some(villager) = host.downcast_ref::<Villager>() {
                    sink.lock().unwrap().push(villager.name);
                }
            }),
        )
        .unwrap();

    let activations = Arc::new(AtomicUsize::new(0));
    let counter = activations.clone();
    substrate
        .services()
        .register_service_callback(
            TypeKey::new("Actor"),
            "Activate",
            service(move |_host, _reload| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

    let anna: Arc<dyn HostObject> = Arc::new(Villager { name: "anna" });
    let bert: Arc<dyn HostObject> = Arc::new(Villager { name: "bert" });
    let distribute = substrate.events().distribute().unwrap();
    for villager in [&anna, &bert] {
        substrate.weaver().invoke(villager.as_ref(), "Activate", || {
            distribute.track_instance(villager);
            Ok::<(), String>(())
        });
    }
    assert_eq!(activations.load(Ordering::SeqCst), 2);

    substrate.events().send(ALARM, vec![json!("fire")]);
    assert!(heard.lock().unwrap().is_empty());
    substrate.tick().unwrap();
    assert_eq!(*heard.lock().unwrap(), vec!["anna", "bert"]);

    drop(bert);
    substrate.events().fire(ALARM, &[]);
    assert_eq!(*heard.lock().unwrap(), vec!["anna", "bert", "anna"]);

    substrate.shutdown().unwrap();
}

#[test]
fn test_classification_bindings_resolve_through_library() {
    let trace: Trace = Arc::default();
    let mut library = HookLibrary::new();
    library.insert("audit", tracing_hook(&trace, "audit"));

    let substrate = Substrate::new(SubstrateConfig {
        classification: StaticClassification::new()
            .declare(TypeDeclaration::new("Base"))
            .declare(TypeDeclaration::new("Derived").with_parent("Base"))
            .bind("base.audit", "Base", "Save", AccessKind::AfterReturning, "audit"),
        ..SubstrateConfig::default()
    });
    let report = substrate.startup(&library).unwrap();
    assert!(report.is_clean());

    substrate.weaver().invoke(&Derived, "Save", || Ok::<(), String>(()));
    substrate.weaver().invoke(&Unrelated, "Save", || Ok::<(), String>(()));
    assert_eq!(recorded(&trace), vec!["audit"]);

    substrate.shutdown().unwrap();
}
