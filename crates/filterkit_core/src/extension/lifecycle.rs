//! Reference-counted extension lifecycle.
//!
//! # Responsibility
//! - Load extensions on the first `configure` and tear them down when the
//!   last configuration releases them.
//! - Publish plugin, filter-type and interface-instance maps to lock-free
//!   readers.
//!
//! # Invariants
//! - Scan and registration run at most once per loaded period.
//! - The reference count saturates at both ends; teardown runs once.
//! - Unload callbacks run most recent first, then modules detach in reverse
//!   activation order. Every callback and detach is isolated.
//! - Lifecycle operations are serialised by a reentrant lock. Hooks run on
//!   the thread holding it and may call back into the runtime, e.g. a
//!   module's `attach` may `rescan` or register unload callbacks.
//! - No state borrow is held while a hook runs.

use crate::config::{ConfigError, RuntimeConfig};
use crate::dictionary::{
    DictionaryRef, ExpressionCompiler, GlobalScope, ProviderDictionary, SelectorCompiler,
};
use crate::extension::context::ExtensionContext;
use crate::extension::descriptor::{
    ClassTable, ClassTableError, ExtensionClass, ExtensionDescriptor,
};
use crate::extension::module::{guarded, ConfigContext, ModuleInstance};
use crate::extension::namespace::{ExtensionNamespace, Published};
use crate::extension::registry::{ActivatedModule, ExtensionRegistry, Registration};
use crate::scan::{
    ArtifactEnumerator, CandidateScanner, CodeLoader, JsonClassInspector, MetadataInspector,
    ScanReport,
};
use arc_swap::ArcSwap;
use log::{debug, error, info, warn};
use parking_lot::ReentrantMutex;
use std::any::Any;
use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

/// Hook run once during teardown, before modules detach.
pub type UnloadCallback = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// Where candidate class names come from on load.
#[derive(Clone)]
pub enum Discovery {
    /// Every marked class of the class table.
    ClassTable,
    /// Classes found by scanning the artifacts of a loader chain.
    Artifacts(Arc<dyn CodeLoader>),
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("extension runtime is not loaded")]
    NotLoaded,
    #[error("extension runtime is closed")]
    Closed,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Classes(#[from] ClassTableError),
}

#[derive(Default)]
struct State {
    ref_count: u32,
    loaded: bool,
    closed: bool,
    modules: Vec<ActivatedModule>,
    callbacks: VecDeque<UnloadCallback>,
    registered: BTreeSet<String>,
}

pub struct ExtensionRuntime {
    config: RuntimeConfig,
    classes: ClassTable,
    discovery: Discovery,
    enumerator: ArtifactEnumerator,
    scanner: CandidateScanner,
    compiler: Arc<dyn ExpressionCompiler>,
    global_scope: Arc<GlobalScope>,
    published: Arc<ArcSwap<Published>>,
    namespace: Arc<ExtensionNamespace>,
    state: ReentrantMutex<RefCell<State>>,
}

impl ExtensionRuntime {
    pub fn builder() -> ExtensionRuntimeBuilder {
        ExtensionRuntimeBuilder::default()
    }

    /// Acquires one configuration reference, loading extensions on the first.
    ///
    /// Returns the reference count after the call.
    pub fn configure(&self, ctx: &ConfigContext) -> u32 {
        let guard = self.state.lock();
        let previous = {
            let mut state = guard.borrow_mut();
            if state.closed {
                warn!("event=configure module=lifecycle status=skip reason=closed");
                return state.ref_count;
            }
            let previous = state.ref_count;
            state.ref_count = previous.saturating_add(1);
            previous
        };
        if previous == u32::MAX {
            warn!("event=configure module=lifecycle status=skip reason=ref_count_saturated");
        }
        if previous == 0 {
            self.load(&guard, ctx);
        }
        let ref_count = guard.borrow().ref_count;
        debug!("event=configure module=lifecycle status=ok ref_count={ref_count}");
        ref_count
    }

    /// Releases one configuration reference, tearing down on the last.
    ///
    /// Returns the reference count after the call. Extra releases are
    /// ignored.
    pub fn unconfigure(&self) -> u32 {
        let guard = self.state.lock();
        let remaining = {
            let mut state = guard.borrow_mut();
            if state.ref_count == 0 {
                debug!("event=unconfigure module=lifecycle status=skip reason=not_configured");
                return 0;
            }
            state.ref_count -= 1;
            state.ref_count
        };
        if remaining == 0 {
            self.teardown(&guard);
        }
        let ref_count = guard.borrow().ref_count;
        debug!("event=unconfigure module=lifecycle status=ok ref_count={ref_count}");
        ref_count
    }

    /// Tears down regardless of outstanding references and refuses further
    /// configuration.
    pub fn close(&self) {
        let guard = self.state.lock();
        let loaded = {
            let mut state = guard.borrow_mut();
            if state.closed {
                return;
            }
            state.closed = true;
            state.ref_count = 0;
            state.loaded
        };
        if loaded {
            self.teardown(&guard);
        }
        self.global_scope.unbind(&self.config.namespace);
        info!(
            "event=runtime_close module=lifecycle status=ok namespace={}",
            self.config.namespace
        );
    }

    /// Adds `callback` to the front of the unload list unless it is already
    /// registered.
    pub fn register_unload_callback(
        &self,
        callback: UnloadCallback,
    ) -> Result<(), LifecycleError> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        if state.closed {
            return Err(LifecycleError::Closed);
        }
        if state
            .callbacks
            .iter()
            .any(|existing| same_callback(existing, &callback))
        {
            debug!(
                "event=unload_callback_register module=lifecycle status=skip reason=already_registered"
            );
            return Ok(());
        }
        state.callbacks.push_front(callback);
        debug!(
            "event=unload_callback_register module=lifecycle status=ok callbacks={}",
            state.callbacks.len()
        );
        Ok(())
    }

    /// Scans another loader chain while loaded and publishes what it adds.
    ///
    /// Classes registered earlier, or being registered by the pass that is
    /// attaching the caller, are skipped. Returns the descriptors of the
    /// newly registered classes.
    pub fn rescan(
        &self,
        loader: &dyn CodeLoader,
        ctx: &ConfigContext,
    ) -> Result<Vec<ExtensionDescriptor>, LifecycleError> {
        let guard = self.state.lock();
        {
            let state = guard.borrow();
            if state.closed {
                return Err(LifecycleError::Closed);
            }
            if !state.loaded {
                return Err(LifecycleError::NotLoaded);
            }
        }
        let report = self.scan(loader);
        let (candidates, live) = {
            let mut state = guard.borrow_mut();
            let candidates = report
                .candidates
                .into_iter()
                .filter(|name| !state.registered.contains(name))
                .collect::<Vec<_>>();
            state.registered.extend(candidates.iter().cloned());
            let live = state
                .modules
                .iter()
                .map(|module| module.instance.clone())
                .collect::<Vec<_>>();
            (candidates, live)
        };
        let registration = self
            .registry()
            .with_scanned_markers(&report.markers)
            .register(&candidates, ctx, &live);
        let descriptors = registration.descriptors.clone();
        self.publish(&guard, registration);
        info!(
            "event=rescan module=lifecycle status=ok loader={} candidates={} registered={}",
            loader.name(),
            candidates.len(),
            descriptors.len()
        );
        Ok(descriptors)
    }

    pub fn plugin(&self, name: &str) -> Option<Arc<ExtensionContext>> {
        self.published.load().plugins.get(name).cloned()
    }

    pub fn filter_type(&self, name: &str) -> Option<Arc<ExtensionClass>> {
        self.published.load().filters.get(name).cloned()
    }

    pub fn instance(&self, interface: &str) -> Option<ModuleInstance> {
        self.published.load().instances.get(interface).cloned()
    }

    /// Published instance for `interface`, downcast to its concrete type.
    pub fn instance_of<T: Any + Send + Sync>(&self, interface: &str) -> Option<Arc<T>> {
        self.instance(interface)?.downcast::<T>()
    }

    /// Dictionary over the plugin exported as `name`, resolved against `base`.
    pub fn provider_dictionary(
        &self,
        name: &str,
        base: DictionaryRef,
    ) -> Option<ProviderDictionary> {
        let plugin = self.plugin(name)?;
        Some(
            ProviderDictionary::new(plugin, base)
                .with_policy(self.config.substitution_policy()),
        )
    }

    pub fn namespace(&self) -> Arc<ExtensionNamespace> {
        Arc::clone(&self.namespace)
    }

    pub fn global_scope(&self) -> &Arc<GlobalScope> {
        &self.global_scope
    }

    pub fn compiler(&self) -> &Arc<dyn ExpressionCompiler> {
        &self.compiler
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn ref_count(&self) -> u32 {
        self.state.lock().borrow().ref_count
    }

    pub fn is_loaded(&self) -> bool {
        self.state.lock().borrow().loaded
    }

    /// Class names of attached modules, in activation order.
    pub fn active_modules(&self) -> Vec<String> {
        self.state
            .lock()
            .borrow()
            .modules
            .iter()
            .map(|module| module.class_name.clone())
            .collect()
    }

    /// Current published maps.
    pub fn snapshot(&self) -> Arc<Published> {
        self.published.load_full()
    }

    fn registry(&self) -> ExtensionRegistry<'_> {
        ExtensionRegistry::new(&self.classes, self.compiler.as_ref())
    }

    fn scan(&self, loader: &dyn CodeLoader) -> ScanReport {
        let artifacts = self.enumerator.enumerate(loader);
        self.scanner.scan(&artifacts)
    }

    /// Loads under the runtime lock without holding a state borrow while
    /// modules attach, so their hooks can re-enter the runtime.
    fn load(&self, state: &RefCell<State>, ctx: &ConfigContext) {
        state.borrow_mut().loaded = true;
        let report = match &self.discovery {
            Discovery::ClassTable => ScanReport {
                candidates: self.classes.marked_names(),
                ..ScanReport::default()
            },
            Discovery::Artifacts(loader) => self.scan(loader.as_ref()),
        };
        state
            .borrow_mut()
            .registered
            .extend(report.candidates.iter().cloned());
        let registration = self
            .registry()
            .with_scanned_markers(&report.markers)
            .register(&report.candidates, ctx, &[]);
        self.publish(state, registration);
        let published = self.published.load();
        info!(
            "event=extensions_load module=lifecycle status=ok candidates={} plugins={} filter_types={} modules={}",
            report.candidates.len(),
            published.plugins.len(),
            published.filters.len(),
            state.borrow().modules.len()
        );
    }

    fn publish(&self, state: &RefCell<State>, registration: Registration) {
        let next = self.published.load().merged(&registration);
        self.published.store(Arc::new(next));
        state.borrow_mut().modules.extend(registration.activated);
    }

    fn teardown(&self, state: &RefCell<State>) {
        self.published.store(Arc::new(Published::default()));
        let (callbacks, mut modules) = {
            let mut state = state.borrow_mut();
            state.loaded = false;
            state.registered.clear();
            (
                std::mem::take(&mut state.callbacks),
                std::mem::take(&mut state.modules),
            )
        };

        let mut failures = 0usize;
        for (position, callback) in callbacks.iter().enumerate() {
            if let Err(err) = guarded(callback.as_ref()) {
                failures += 1;
                error!(
                    "event=unload_callback module=lifecycle status=error position={position} error={err}"
                );
            }
        }

        while let Some(module) = modules.pop() {
            match guarded(|| module.instance.module().detach()) {
                Ok(()) => info!(
                    "event=module_detach module=lifecycle status=ok class={}",
                    module.class_name
                ),
                Err(err) => {
                    failures += 1;
                    error!(
                        "event=module_detach module=lifecycle status=error class={} error={err}",
                        module.class_name
                    );
                }
            }
        }
        info!(
            "event=extensions_unload module=lifecycle status=ok callbacks={} failures={failures}",
            callbacks.len()
        );
    }
}

fn same_callback(left: &UnloadCallback, right: &UnloadCallback) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(left), Arc::as_ptr(right))
}

#[derive(Default)]
pub struct ExtensionRuntimeBuilder {
    config: Option<RuntimeConfig>,
    classes: Option<ClassTable>,
    discovery: Option<Discovery>,
    inspector: Option<Arc<dyn MetadataInspector>>,
    global_scope: Option<Arc<GlobalScope>>,
    compiler: Option<Arc<dyn ExpressionCompiler>>,
}

impl ExtensionRuntimeBuilder {
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Class table to resolve candidates against; defaults to every class
    /// submitted through `inventory`.
    pub fn classes(mut self, classes: ClassTable) -> Self {
        self.classes = Some(classes);
        self
    }

    pub fn discovery(mut self, discovery: Discovery) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn inspector(mut self, inspector: Arc<dyn MetadataInspector>) -> Self {
        self.inspector = Some(inspector);
        self
    }

    pub fn global_scope(mut self, scope: Arc<GlobalScope>) -> Self {
        self.global_scope = Some(scope);
        self
    }

    /// Expression compiler for export parameters; defaults to a selector
    /// compiler over the runtime's global scope.
    pub fn compiler(mut self, compiler: Arc<dyn ExpressionCompiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    pub fn build(self) -> Result<Arc<ExtensionRuntime>, LifecycleError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let classes = match self.classes {
            Some(classes) => classes,
            None => ClassTable::from_inventory()?,
        };
        let global_scope = self
            .global_scope
            .unwrap_or_else(|| Arc::new(GlobalScope::new()));
        let compiler = self.compiler.unwrap_or_else(|| {
            Arc::new(
                SelectorCompiler::new(Arc::clone(&global_scope))
                    .with_policy(config.substitution_policy()),
            )
        });
        let inspector = self
            .inspector
            .unwrap_or_else(|| Arc::new(JsonClassInspector));

        let published = Arc::new(ArcSwap::from_pointee(Published::default()));
        let namespace = Arc::new(ExtensionNamespace::new(Arc::clone(&published)));
        if global_scope
            .bind(config.namespace.clone(), Arc::clone(&namespace) as DictionaryRef)
            .is_some()
        {
            warn!(
                "event=namespace_bind module=lifecycle status=ok namespace={} replaced=true",
                config.namespace
            );
        }
        info!(
            "event=runtime_build module=lifecycle status=ok namespace={} classes={}",
            config.namespace,
            classes.len()
        );

        Ok(Arc::new(ExtensionRuntime {
            enumerator: ArtifactEnumerator::from_config(&config),
            scanner: CandidateScanner::from_config(inspector, &config),
            discovery: self.discovery.unwrap_or(Discovery::ClassTable),
            config,
            classes,
            compiler,
            global_scope,
            published,
            namespace,
            state: ReentrantMutex::new(RefCell::new(State::default())),
        }))
    }
}
