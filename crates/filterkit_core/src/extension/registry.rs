//! Extension registration.
//!
//! # Responsibility
//! - Resolve candidate class names, classify them, and activate modules in
//!   priority order.
//! - Build the plugin, filter-type, and interface-instance maps of one
//!   registration pass.
//!
//! # Invariants
//! - Activation order is ascending priority; ties keep discovery order.
//! - A module instance already live is never attached again.
//! - One class failing never blocks the others.
//! - The first binding of a name wins; later duplicates are logged and dropped.
//! - A class is classified by its own markers plus any a scan inferred for it.

use crate::dictionary::ExpressionCompiler;
use crate::extension::context::ExtensionContext;
use crate::extension::descriptor::{ClassTable, ExtensionClass, ExtensionDescriptor};
use crate::extension::marker::{MarkerKind, MarkerSet};
use crate::extension::module::{guarded, instantiate, ConfigContext, ModuleInstance};
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Module attached during a registration pass.
#[derive(Debug, Clone)]
pub struct ActivatedModule {
    pub class_name: String,
    pub instance: ModuleInstance,
}

/// Outcome of one registration pass.
#[derive(Debug, Default)]
pub struct Registration {
    /// Descriptors of every marked class processed, in activation order.
    pub descriptors: Vec<ExtensionDescriptor>,
    pub plugins: BTreeMap<String, Arc<ExtensionContext>>,
    pub filters: BTreeMap<String, Arc<ExtensionClass>>,
    pub instances: BTreeMap<String, ModuleInstance>,
    /// Newly attached modules, in activation order.
    pub activated: Vec<ActivatedModule>,
}

/// Registers candidate classes against a class table.
pub struct ExtensionRegistry<'a> {
    classes: &'a ClassTable,
    compiler: &'a dyn ExpressionCompiler,
    scanned: Option<&'a HashMap<String, MarkerSet>>,
}

impl<'a> ExtensionRegistry<'a> {
    pub fn new(classes: &'a ClassTable, compiler: &'a dyn ExpressionCompiler) -> Self {
        Self {
            classes,
            compiler,
            scanned: None,
        }
    }

    /// Adds the effective markers a scan computed, including those
    /// inherited from supertypes, to each class's own markers.
    pub fn with_scanned_markers(mut self, markers: &'a HashMap<String, MarkerSet>) -> Self {
        self.scanned = Some(markers);
        self
    }

    /// Runs one registration pass over `candidates`.
    ///
    /// `live` holds modules attached by earlier passes; they are bound but
    /// not attached again.
    pub fn register(
        &self,
        candidates: &[String],
        ctx: &ConfigContext,
        live: &[ModuleInstance],
    ) -> Registration {
        let mut registration = Registration::default();
        for (class, markers) in self.resolve(candidates) {
            let mut descriptor = class.descriptor();
            descriptor.markers = markers;
            registration.descriptors.push(descriptor);
            if markers.contains(MarkerKind::FilterDefinition) && !class.is_abstract() {
                register_filter(&mut registration, &class);
            }
            let instance = if markers.contains(MarkerKind::Module) && !class.is_abstract() {
                activate(&mut registration, &class, ctx, live)
            } else {
                None
            };
            if let Some(instance) = &instance {
                publish_instance(&mut registration, &class, instance);
            }
            if markers.contains(MarkerKind::Plugin) {
                self.register_plugin(&mut registration, &class, instance.as_ref());
            }
        }
        registration
    }

    /// Looks up candidates, keeps registrable classes with their effective
    /// markers, and orders them by priority.
    fn resolve(&self, candidates: &[String]) -> Vec<(Arc<ExtensionClass>, MarkerSet)> {
        let mut seen = BTreeSet::new();
        let mut classes = Vec::with_capacity(candidates.len());
        for name in candidates {
            if !seen.insert(name.as_str()) {
                continue;
            }
            let Some(class) = self.classes.get(name) else {
                error!(
                    "event=class_load module=registry status=error class={name} error_code=class_not_found"
                );
                continue;
            };
            let scanned = self
                .scanned
                .and_then(|scanned| scanned.get(name).copied())
                .unwrap_or_default();
            let markers = class.markers().union(scanned);
            if !(markers.contains(MarkerKind::Plugin)
                || markers.contains(MarkerKind::Module)
                || markers.contains(MarkerKind::FilterDefinition))
            {
                debug!(
                    "event=class_load module=registry status=skip class={name} reason=no_registrable_marker"
                );
                continue;
            }
            classes.push((class, markers));
        }
        classes.sort_by_key(|(class, _)| class.priority());
        classes
    }

    fn register_plugin(
        &self,
        registration: &mut Registration,
        class: &ExtensionClass,
        instance: Option<&ModuleInstance>,
    ) {
        let export_name = class.export_name();
        if registration.plugins.contains_key(export_name) {
            error!(
                "event=plugin_register module=registry status=error class={} export_name={export_name} error_code=duplicate_export_name",
                class.name()
            );
            return;
        }
        let context = ExtensionContext::bind(
            class.name(),
            class.exports(),
            instance.map(ModuleInstance::receiver),
            self.compiler,
        );
        info!(
            "event=plugin_register module=registry status=ok class={} export_name={export_name} resources={} binding={}",
            class.name(),
            context.len(),
            if instance.is_some() { "instance" } else { "static" }
        );
        registration
            .plugins
            .insert(export_name.to_string(), Arc::new(context));
    }
}

fn register_filter(registration: &mut Registration, class: &Arc<ExtensionClass>) {
    let Some(filter_type) = class.filter_type().filter(|name| !name.trim().is_empty()) else {
        error!(
            "event=filter_register module=registry status=error class={} error_code=empty_filter_type",
            class.name()
        );
        return;
    };
    if let Some(existing) = registration.filters.get(filter_type) {
        warn!(
            "event=filter_register module=registry status=skip class={} filter_type={filter_type} registered_by={}",
            class.name(),
            existing.name()
        );
        return;
    }
    info!(
        "event=filter_register module=registry status=ok class={} filter_type={filter_type}",
        class.name()
    );
    registration
        .filters
        .insert(filter_type.to_string(), Arc::clone(class));
}

fn activate(
    registration: &mut Registration,
    class: &ExtensionClass,
    ctx: &ConfigContext,
    live: &[ModuleInstance],
) -> Option<ModuleInstance> {
    let instance = match instantiate(class) {
        Ok(instance) => instance,
        Err(err) => {
            error!(
                "event=module_instantiate module=registry status=error class={} error_code={} error={err}",
                class.name(),
                err.error_code()
            );
            return None;
        }
    };

    let already_live = live
        .iter()
        .chain(registration.activated.iter().map(|module| &module.instance))
        .any(|active| active.same_instance(&instance));
    if already_live {
        debug!(
            "event=module_attach module=registry status=skip class={} reason=already_active",
            class.name()
        );
        return Some(instance);
    }

    match guarded(|| instance.module().attach(ctx)) {
        Ok(()) => {
            info!(
                "event=module_attach module=registry status=ok class={} priority={}",
                class.name(),
                class.priority()
            );
            registration.activated.push(ActivatedModule {
                class_name: class.name().to_string(),
                instance: instance.clone(),
            });
            Some(instance)
        }
        Err(err) => {
            error!(
                "event=module_attach module=registry status=error class={} error={err}",
                class.name()
            );
            None
        }
    }
}

fn publish_instance(
    registration: &mut Registration,
    class: &ExtensionClass,
    instance: &ModuleInstance,
) {
    for interface in class.provides() {
        if interface.trim().is_empty() {
            error!(
                "event=instance_register module=registry status=error class={} error_code=empty_interface_name",
                class.name()
            );
            continue;
        }
        if registration.instances.contains_key(interface) {
            error!(
                "event=instance_register module=registry status=error class={} interface={interface} error_code=duplicate_interface_instance",
                class.name()
            );
            continue;
        }
        registration
            .instances
            .insert(interface.clone(), instance.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::ExtensionRegistry;
    use crate::binder::ExportSpec;
    use crate::dictionary::{GlobalScope, SelectorCompiler};
    use crate::extension::descriptor::{ClassTable, ExtensionClass};
    use crate::extension::marker::{MarkerKind, MarkerSet};
    use crate::extension::module::{ConfigContext, ExtensionModule, ModuleInstance};
    use once_cell::sync::Lazy;
    use std::collections::HashMap;
    use std::sync::Arc;

    struct Plain;

    impl ExtensionModule for Plain {
        fn attach(&self, _ctx: &ConfigContext) -> anyhow::Result<()> {
            Ok(())
        }

        fn detach(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct Refusing;

    impl ExtensionModule for Refusing {
        fn attach(&self, _ctx: &ConfigContext) -> anyhow::Result<()> {
            anyhow::bail!("store unavailable")
        }

        fn detach(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn plain() -> anyhow::Result<ModuleInstance> {
        Ok(ModuleInstance::new(Plain))
    }

    fn refusing() -> anyhow::Result<ModuleInstance> {
        Ok(ModuleInstance::new(Refusing))
    }

    static SINGLETON: Lazy<Arc<Plain>> = Lazy::new(|| Arc::new(Plain));

    fn singleton() -> anyhow::Result<ModuleInstance> {
        Ok(ModuleInstance::shared(Arc::clone(&SINGLETON)))
    }

    fn compiler() -> SelectorCompiler {
        SelectorCompiler::new(Arc::new(GlobalScope::new()))
    }

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn classifies_and_skips_unmarked_or_missing_classes() {
        let table = ClassTable::new()
            .with(ExtensionClass::builder("demo.Plugin").plugin().build())
            .and_then(|t| t.with(ExtensionClass::builder("demo.Helper").build()))
            .and_then(|t| t.with(ExtensionClass::builder("demo.Filter").filter("Throttle").build()))
            .expect("class table");
        let compiler = compiler();
        let registry = ExtensionRegistry::new(&table, &compiler);
        let registration = registry.register(
            &names(&["demo.Plugin", "demo.Helper", "demo.Missing", "demo.Filter", "demo.Plugin"]),
            &ConfigContext::new(),
            &[],
        );
        assert_eq!(registration.descriptors.len(), 2);
        assert!(registration.plugins.contains_key("demo.Plugin"));
        assert!(registration.filters.contains_key("Throttle"));
        assert!(registration.activated.is_empty());
    }

    #[test]
    fn failed_attach_binds_plugin_statically() {
        let table = ClassTable::new()
            .with(
                ExtensionClass::builder("demo.Refusing")
                    .module(refusing)
                    .plugin_named("refusing")
                    .export(ExportSpec::invocable_on::<Refusing, _>("check", |_, _| Ok(true)))
                    .export(ExportSpec::invocable("ping", |_| Ok(true)))
                    .build(),
            )
            .expect("class table");
        let compiler = compiler();
        let registration = ExtensionRegistry::new(&table, &compiler).register(
            &names(&["demo.Refusing"]),
            &ConfigContext::new(),
            &[],
        );
        assert!(registration.activated.is_empty());
        let context = registration.plugins.get("refusing").expect("plugin published");
        assert_eq!(context.names().collect::<Vec<_>>(), vec!["ping"]);
    }

    #[test]
    fn duplicate_names_keep_first_binding() {
        let table = ClassTable::new()
            .with(
                ExtensionClass::builder("demo.A")
                    .plugin_named("shared")
                    .priority(1)
                    .build(),
            )
            .and_then(|t| t.with(ExtensionClass::builder("demo.B").plugin_named("shared").build()))
            .and_then(|t| t.with(ExtensionClass::builder("demo.F1").filter("Same").build()))
            .and_then(|t| t.with(ExtensionClass::builder("demo.F2").filter("Same").build()))
            .and_then(|t| t.with(ExtensionClass::builder("demo.F3").filter("  ").build()))
            .expect("class table");
        let compiler = compiler();
        let registration = ExtensionRegistry::new(&table, &compiler).register(
            &table.marked_names(),
            &ConfigContext::new(),
            &[],
        );
        let shared = registration.plugins.get("shared").expect("plugin");
        assert_eq!(shared.class_name(), "demo.B");
        assert_eq!(registration.filters.len(), 1);
        assert_eq!(
            registration.filters.get("Same").map(|class| class.name().to_string()),
            Some("demo.F1".to_string())
        );
    }

    #[test]
    fn live_modules_are_not_attached_again() {
        let table = ClassTable::new()
            .with(
                ExtensionClass::builder("demo.Singleton")
                    .module(singleton)
                    .provides("demo.Service")
                    .build(),
            )
            .and_then(|t| {
                t.with(
                    ExtensionClass::builder("demo.Base")
                        .marker(MarkerKind::Module)
                        .abstract_class()
                        .build(),
                )
            })
            .expect("class table");
        let compiler = compiler();
        let registry = ExtensionRegistry::new(&table, &compiler);

        let first = registry.register(&table.marked_names(), &ConfigContext::new(), &[]);
        assert_eq!(first.activated.len(), 1);
        assert_eq!(first.activated[0].class_name, "demo.Singleton");
        assert!(first.instances.contains_key("demo.Service"));

        let live = first
            .activated
            .iter()
            .map(|module| module.instance.clone())
            .collect::<Vec<_>>();
        let second = registry.register(&table.marked_names(), &ConfigContext::new(), &live);
        assert!(second.activated.is_empty());
        assert!(second.instances.contains_key("demo.Service"));
    }

    #[test]
    fn blank_interface_names_are_not_published() {
        let table = ClassTable::new()
            .with(
                ExtensionClass::builder("demo.Store")
                    .module(plain)
                    .provides("")
                    .provides("   ")
                    .provides("demo.Store")
                    .build(),
            )
            .expect("class table");
        let compiler = compiler();
        let registration = ExtensionRegistry::new(&table, &compiler).register(
            &names(&["demo.Store"]),
            &ConfigContext::new(),
            &[],
        );
        assert_eq!(registration.activated.len(), 1);
        assert_eq!(
            registration.instances.keys().collect::<Vec<_>>(),
            vec!["demo.Store"]
        );
    }

    #[test]
    fn scanned_markers_classify_classes_without_their_own() {
        let table = ClassTable::new()
            .with(
                ExtensionClass::builder("demo.Impl")
                    .constructor(plain)
                    .build(),
            )
            .expect("class table");
        let compiler = compiler();
        let candidates = names(&["demo.Impl"]);

        let unscanned = ExtensionRegistry::new(&table, &compiler).register(
            &candidates,
            &ConfigContext::new(),
            &[],
        );
        assert!(unscanned.descriptors.is_empty());

        let scanned = HashMap::from([(
            "demo.Impl".to_string(),
            MarkerSet::of(&[MarkerKind::Module]),
        )]);
        let registration = ExtensionRegistry::new(&table, &compiler)
            .with_scanned_markers(&scanned)
            .register(&candidates, &ConfigContext::new(), &[]);
        assert_eq!(registration.activated.len(), 1);
        assert_eq!(
            registration.descriptors[0].markers,
            MarkerSet::of(&[MarkerKind::Module])
        );
    }
}
