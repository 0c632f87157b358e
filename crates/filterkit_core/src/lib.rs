//! Core runtime of filterkit.
//!
//! Discovers extension classes, registers and lifecycle-manages them, and
//! exposes their resources through lazily substituted dictionaries.

pub mod binder;
pub mod config;
pub mod dictionary;
pub mod extension;
pub mod logging;
pub mod resource;
pub mod scan;
pub mod value;

pub use binder::{Arguments, ExportSpec, ParameterDecl, Receiver, ReceiverKind};
pub use config::{ConfigError, LoggingConfig, RuntimeConfig};
pub use dictionary::{
    Dictionary, DictionaryRef, DictResult, EmptyDictionary, Expression, ExpressionCompiler,
    ExpressionError, GlobalScope, MapDictionary, MessageDictionary, ProviderDictionary,
    ResolveError, SelectorCompiler, SliceDictionary, SubstitutionPolicy,
};
pub use extension::{
    ClassRegistration, ClassTable, ConfigContext, Discovery, ExtensionClass, ExtensionContext,
    ExtensionModule, ExtensionNamespace, ExtensionRuntime, LifecycleError, MarkerKind,
    ModuleInstance, UnloadCallback,
};
pub use logging::{default_log_level, init_logging, init_logging_to_stderr, logging_status};
pub use resource::{
    AbortError, ContextResource, FunctionResource, InvocableResource, ResourceProvider,
    SubstitutableResource, ViewableResource,
};
pub use scan::{
    ArtifactEnumerator, CandidateScanner, CodeLoader, JsonClassInspector, MetadataInspector,
    ScanReport, UrlLoader,
};
pub use value::Value;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
