//! Extension classes and the class table.
//!
//! # Responsibility
//! - Hold the explicit registration record of every extension class:
//!   markers, priority, export name, constructor, and exported functions.
//! - Resolve candidate class names to records, like a class loader would.
//!
//! # Invariants
//! - Class names are unique within one table.
//! - An empty export name resolves to the class name.
//! - Table iteration follows registration order.

use crate::binder::ExportSpec;
use crate::extension::marker::{MarkerKind, MarkerSet};
use crate::extension::module::ModuleInstance;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// No-argument module constructor.
pub type Constructor = fn() -> anyhow::Result<ModuleInstance>;

/// Registration record of one extension class.
#[derive(Clone)]
pub struct ExtensionClass {
    name: String,
    markers: MarkerSet,
    priority: i32,
    export_name: String,
    filter_type: Option<String>,
    is_abstract: bool,
    provides: Vec<String>,
    constructor: Option<Constructor>,
    exports: Vec<ExportSpec>,
}

impl ExtensionClass {
    pub fn builder(name: impl Into<String>) -> ExtensionClassBuilder {
        ExtensionClassBuilder {
            class: ExtensionClass {
                name: name.into(),
                markers: MarkerSet::empty(),
                priority: 0,
                export_name: String::new(),
                filter_type: None,
                is_abstract: false,
                provides: Vec::new(),
                constructor: None,
                exports: Vec::new(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn markers(&self) -> MarkerSet {
        self.markers
    }

    pub fn has_marker(&self, marker: MarkerKind) -> bool {
        self.markers.contains(marker)
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Declared export name, falling back to the class name when empty.
    pub fn export_name(&self) -> &str {
        if self.export_name.trim().is_empty() {
            &self.name
        } else {
            &self.export_name
        }
    }

    pub fn filter_type(&self) -> Option<&str> {
        self.filter_type.as_deref()
    }

    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    /// Interface names this class publishes its module instance under.
    pub fn provides(&self) -> &[String] {
        &self.provides
    }

    pub fn constructor(&self) -> Option<Constructor> {
        self.constructor
    }

    pub fn exports(&self) -> &[ExportSpec] {
        &self.exports
    }

    pub fn descriptor(&self) -> ExtensionDescriptor {
        ExtensionDescriptor {
            class_name: self.name.clone(),
            markers: self.markers,
            priority: self.priority,
            export_name: self.export_name().to_string(),
            filter_type: self.filter_type.clone(),
        }
    }
}

impl Debug for ExtensionClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionClass")
            .field("name", &self.name)
            .field("markers", &self.markers)
            .field("priority", &self.priority)
            .field("export_name", &self.export_name())
            .field("filter_type", &self.filter_type)
            .field("is_abstract", &self.is_abstract)
            .field("exports", &self.exports.len())
            .finish()
    }
}

pub struct ExtensionClassBuilder {
    class: ExtensionClass,
}

impl ExtensionClassBuilder {
    pub fn marker(mut self, marker: MarkerKind) -> Self {
        self.class.markers.insert(marker);
        self
    }

    /// Plugin exported under the class name.
    pub fn plugin(self) -> Self {
        self.marker(MarkerKind::Plugin)
    }

    /// Plugin exported under `export_name`.
    pub fn plugin_named(mut self, export_name: impl Into<String>) -> Self {
        self.class.export_name = export_name.into();
        self.marker(MarkerKind::Plugin)
    }

    /// Lifecycle module created through `constructor`.
    pub fn module(mut self, constructor: Constructor) -> Self {
        self.class.constructor = Some(constructor);
        self.marker(MarkerKind::Module)
    }

    /// Filter definition registered under `filter_type`.
    pub fn filter(mut self, filter_type: impl Into<String>) -> Self {
        self.class.filter_type = Some(filter_type.into());
        self.marker(MarkerKind::FilterDefinition)
            .marker(MarkerKind::FilterType)
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.class.priority = priority;
        self
    }

    pub fn abstract_class(mut self) -> Self {
        self.class.is_abstract = true;
        self
    }

    pub fn constructor(mut self, constructor: Constructor) -> Self {
        self.class.constructor = Some(constructor);
        self
    }

    pub fn provides(mut self, interface: impl Into<String>) -> Self {
        self.class.provides.push(interface.into());
        self
    }

    pub fn export(mut self, export: ExportSpec) -> Self {
        self.class.exports.push(export);
        self
    }

    pub fn build(self) -> ExtensionClass {
        self.class
    }
}

/// Immutable metadata view of a loaded extension class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionDescriptor {
    pub class_name: String,
    pub markers: MarkerSet,
    pub priority: i32,
    pub export_name: String,
    pub filter_type: Option<String>,
}

/// Build-time registration entry collected with `inventory`.
pub struct ClassRegistration {
    pub build: fn() -> ExtensionClass,
}

inventory::collect!(ClassRegistration);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassTableError {
    #[error("class name must not be empty")]
    EmptyName,
    #[error("class already registered: {0}")]
    DuplicateClass(String),
}

/// Name-addressable set of extension classes.
#[derive(Debug, Clone, Default)]
pub struct ClassTable {
    classes: Vec<Arc<ExtensionClass>>,
    index: BTreeMap<String, usize>,
}

impl ClassTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collects every class submitted with `inventory::submit!`, ordered by name.
    pub fn from_inventory() -> Result<Self, ClassTableError> {
        let mut classes = inventory::iter::<ClassRegistration>
            .into_iter()
            .map(|registration| (registration.build)())
            .collect::<Vec<_>>();
        classes.sort_by(|left, right| left.name.cmp(&right.name));
        let mut table = Self::new();
        for class in classes {
            table.register(class)?;
        }
        Ok(table)
    }

    pub fn register(&mut self, class: ExtensionClass) -> Result<(), ClassTableError> {
        if class.name.trim().is_empty() {
            return Err(ClassTableError::EmptyName);
        }
        let name = class.name.clone();
        if self.index.contains_key(&name) {
            return Err(ClassTableError::DuplicateClass(name));
        }
        self.index.insert(name, self.classes.len());
        self.classes.push(Arc::new(class));
        Ok(())
    }

    pub fn with(mut self, class: ExtensionClass) -> Result<Self, ClassTableError> {
        self.register(class)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<Arc<ExtensionClass>> {
        self.index
            .get(name)
            .and_then(|position| self.classes.get(*position))
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ExtensionClass>> {
        self.classes.iter()
    }

    /// Names of classes carrying at least one marker, in registration order.
    pub fn marked_names(&self) -> Vec<String> {
        self.classes
            .iter()
            .filter(|class| !class.markers.is_empty())
            .map(|class| class.name.clone())
            .collect()
    }
}
