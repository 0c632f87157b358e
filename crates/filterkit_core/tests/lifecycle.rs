use filterkit_core::binder::ExportSpec;
use filterkit_core::extension::{ClassRegistration, ClassTable, ExtensionClass};
use filterkit_core::{
    ConfigContext, Dictionary, ExtensionModule, ExtensionRuntime, ModuleInstance,
    UnloadCallback, Value,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Ordered {
    label: &'static str,
    log: &'static Mutex<Vec<&'static str>>,
}

impl ExtensionModule for Ordered {
    fn attach(&self, _ctx: &ConfigContext) -> anyhow::Result<()> {
        self.log.lock().push(self.label);
        Ok(())
    }

    fn detach(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

static PRIORITY_LOG: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

fn five() -> anyhow::Result<ModuleInstance> {
    Ok(ModuleInstance::new(Ordered { label: "five", log: &PRIORITY_LOG }))
}

fn one_a() -> anyhow::Result<ModuleInstance> {
    Ok(ModuleInstance::new(Ordered { label: "one_a", log: &PRIORITY_LOG }))
}

fn one_b() -> anyhow::Result<ModuleInstance> {
    Ok(ModuleInstance::new(Ordered { label: "one_b", log: &PRIORITY_LOG }))
}

fn three() -> anyhow::Result<ModuleInstance> {
    Ok(ModuleInstance::new(Ordered { label: "three", log: &PRIORITY_LOG }))
}

#[test]
fn modules_activate_by_ascending_priority_with_stable_ties() {
    let mut classes = ClassTable::new();
    for (name, priority, constructor) in [
        ("p.Five", 5, five as fn() -> anyhow::Result<ModuleInstance>),
        ("p.OneA", 1, one_a),
        ("p.OneB", 1, one_b),
        ("p.Three", 3, three),
    ] {
        classes
            .register(
                ExtensionClass::builder(name)
                    .module(constructor)
                    .priority(priority)
                    .build(),
            )
            .expect("register class");
    }
    let runtime = ExtensionRuntime::builder()
        .classes(classes)
        .build()
        .expect("runtime");

    runtime.configure(&ConfigContext::new());
    assert_eq!(*PRIORITY_LOG.lock(), vec!["one_a", "one_b", "three", "five"]);
    assert_eq!(
        runtime.active_modules(),
        vec!["p.OneA", "p.OneB", "p.Three", "p.Five"]
    );
    runtime.close();
}

static COUNTED_ATTACHES: AtomicUsize = AtomicUsize::new(0);
static COUNTED_DETACHES: AtomicUsize = AtomicUsize::new(0);

struct Counted;

impl ExtensionModule for Counted {
    fn attach(&self, _ctx: &ConfigContext) -> anyhow::Result<()> {
        COUNTED_ATTACHES.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn detach(&self) -> anyhow::Result<()> {
        COUNTED_DETACHES.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn counted() -> anyhow::Result<ModuleInstance> {
    Ok(ModuleInstance::new(Counted))
}

#[test]
fn reference_count_loads_once_and_tears_down_once() {
    let classes = ClassTable::new()
        .with(
            ExtensionClass::builder("rc.Counted")
                .module(counted)
                .plugin_named("counted")
                .export(ExportSpec::substitutable("ready", |_| Ok(Some(true.into()))))
                .build(),
        )
        .expect("class table");
    let runtime = ExtensionRuntime::builder()
        .classes(classes)
        .build()
        .expect("runtime");
    let ctx = ConfigContext::new();

    assert_eq!(runtime.configure(&ctx), 1);
    assert_eq!(runtime.configure(&ctx), 2);
    assert_eq!(COUNTED_ATTACHES.load(Ordering::SeqCst), 1);

    assert_eq!(runtime.unconfigure(), 1);
    assert!(runtime.is_loaded());
    assert!(runtime.plugin("counted").is_some());
    assert_eq!(COUNTED_DETACHES.load(Ordering::SeqCst), 0);

    assert_eq!(runtime.unconfigure(), 0);
    assert!(!runtime.is_loaded());
    assert!(runtime.plugin("counted").is_none());
    assert!(runtime.snapshot().is_empty());

    assert_eq!(runtime.unconfigure(), 0);
    assert_eq!(runtime.ref_count(), 0);
    assert_eq!(COUNTED_DETACHES.load(Ordering::SeqCst), 1);
}

#[test]
fn failing_unload_callback_does_not_block_the_next() {
    let runtime = ExtensionRuntime::builder()
        .classes(ClassTable::new())
        .build()
        .expect("runtime");
    runtime.configure(&ConfigContext::new());

    let later_runs = Arc::new(AtomicUsize::new(0));
    let later: UnloadCallback = {
        let later_runs = Arc::clone(&later_runs);
        Arc::new(move || {
            later_runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    };
    let first_runs = Arc::new(AtomicUsize::new(0));
    let failing: UnloadCallback = {
        let first_runs = Arc::clone(&first_runs);
        Arc::new(move || {
            first_runs.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("cache flush failed")
        })
    };
    // Most recent registration runs first.
    runtime.register_unload_callback(later).expect("register");
    runtime
        .register_unload_callback(failing)
        .expect("register");

    assert_eq!(runtime.unconfigure(), 0);
    assert_eq!(first_runs.load(Ordering::SeqCst), 1);
    assert_eq!(later_runs.load(Ordering::SeqCst), 1);

    runtime.configure(&ConfigContext::new());
    runtime.unconfigure();
    assert_eq!(later_runs.load(Ordering::SeqCst), 1);
}

struct Beacon;

impl ExtensionModule for Beacon {
    fn attach(&self, _ctx: &ConfigContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn detach(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

static SHARED: once_cell::sync::Lazy<Arc<Beacon>> =
    once_cell::sync::Lazy::new(|| Arc::new(Beacon));

fn shared_beacon() -> anyhow::Result<ModuleInstance> {
    Ok(ModuleInstance::shared(Arc::clone(&*SHARED)))
}

#[test]
fn interface_instances_are_published_by_provided_name() {
    let classes = ClassTable::new()
        .with(
            ExtensionClass::builder("svc.SharedBeacon")
                .module(shared_beacon)
                .provides("svc.Beacon")
                .build(),
        )
        .expect("class table");
    let runtime = ExtensionRuntime::builder()
        .classes(classes)
        .build()
        .expect("runtime");
    runtime.configure(&ConfigContext::new());

    let instance = runtime.instance_of::<Beacon>("svc.Beacon").expect("instance");
    assert!(Arc::ptr_eq(&instance, &*SHARED));
    assert!(runtime.instance("svc.Missing").is_none());
    runtime.close();
    assert!(runtime.instance("svc.Beacon").is_none());
}

fn inventory_greeter() -> ExtensionClass {
    ExtensionClass::builder("inv.Greeter")
        .plugin_named("inv_greeter")
        .export(ExportSpec::substitutable("hello", |_| Ok(Some("hi".into()))))
        .build()
}

inventory::submit! {
    ClassRegistration { build: inventory_greeter }
}

#[test]
fn inventory_submitted_classes_are_discovered_by_default() {
    let runtime = ExtensionRuntime::builder().build().expect("runtime");
    runtime.configure(&ConfigContext::new());
    let plugin = runtime.plugin("inv_greeter").expect("plugin");
    assert_eq!(plugin.class_name(), "inv.Greeter");
    runtime.close();
}

static RACED_ATTACHES: AtomicUsize = AtomicUsize::new(0);
static RACED_DETACHES: AtomicUsize = AtomicUsize::new(0);

struct Raced;

impl ExtensionModule for Raced {
    fn attach(&self, _ctx: &ConfigContext) -> anyhow::Result<()> {
        RACED_ATTACHES.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn detach(&self) -> anyhow::Result<()> {
        RACED_DETACHES.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn raced() -> anyhow::Result<ModuleInstance> {
    Ok(ModuleInstance::new(Raced))
}

#[test]
fn concurrent_configure_loads_once_and_readers_never_see_partial_maps() {
    let classes = ClassTable::new()
        .with(
            ExtensionClass::builder("race.Raced")
                .module(raced)
                .plugin_named("raced")
                .export(ExportSpec::substitutable("left", |_| Ok(Some(1_i64.into()))))
                .export(ExportSpec::substitutable("right", |_| Ok(Some(2_i64.into()))))
                .build(),
        )
        .expect("class table");
    let runtime = ExtensionRuntime::builder()
        .classes(classes)
        .build()
        .expect("runtime");
    let ctx = ConfigContext::new();

    std::thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| runtime.configure(&ctx));
        }
    });
    assert_eq!(runtime.ref_count(), 8);
    assert_eq!(RACED_ATTACHES.load(Ordering::SeqCst), 1);

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                let namespace = runtime.namespace();
                for _ in 0..500 {
                    if let Some(plugin) = runtime.plugin("raced") {
                        assert_eq!(plugin.len(), 2);
                    }
                    match namespace.get("raced") {
                        Ok(None) | Ok(Some(Value::Provider(_))) => {}
                        other => panic!("partial namespace entry: {:?}", other.map(|_| ())),
                    }
                }
            });
        }
        scope.spawn(|| {
            for _ in 0..8 {
                runtime.unconfigure();
            }
        });
    });

    assert_eq!(runtime.ref_count(), 0);
    assert!(!runtime.is_loaded());
    assert!(runtime.plugin("raced").is_none());
    assert_eq!(RACED_DETACHES.load(Ordering::SeqCst), 1);
    assert_eq!(RACED_ATTACHES.load(Ordering::SeqCst), 1);
}
