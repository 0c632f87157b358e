//! Extension classes, registration and lifecycle.
//!
//! Classes are described by `ExtensionClass` values collected in a
//! `ClassTable`. A registration pass turns marked candidates into plugin
//! contexts, filter types and attached modules; `ExtensionRuntime` owns the
//! reference-counted load/unload cycle around it.

pub mod context;
pub mod descriptor;
pub mod lifecycle;
pub mod marker;
pub mod module;
pub mod namespace;
pub mod registry;

pub use context::ExtensionContext;
pub use descriptor::{
    ClassRegistration, ClassTable, ClassTableError, Constructor, ExtensionClass,
    ExtensionClassBuilder, ExtensionDescriptor,
};
pub use lifecycle::{
    Discovery, ExtensionRuntime, ExtensionRuntimeBuilder, LifecycleError, UnloadCallback,
};
pub use marker::{MarkerKind, MarkerSet};
pub use module::{instantiate, ConfigContext, ExtensionModule, InstantiationError, ModuleInstance};
pub use namespace::{ExtensionNamespace, Published};
pub use registry::{ActivatedModule, ExtensionRegistry, Registration};
