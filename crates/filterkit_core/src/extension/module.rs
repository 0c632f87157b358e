//! Lifecycle modules and their instantiation.
//!
//! # Responsibility
//! - Define the attach/detach contract of extension modules.
//! - Instantiate module classes through their no-argument constructor.
//!
//! # Invariants
//! - Module identity is the identity of its shared instance.
//! - Constructor failures, including panics, are reported and never escape.

use crate::binder::Receiver;
use crate::extension::descriptor::ExtensionClass;
use crate::logging::panic_payload_summary;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Process-lifetime component activated once per configure cycle.
pub trait ExtensionModule: Send + Sync + 'static {
    /// Called once when the module is activated.
    fn attach(&self, ctx: &ConfigContext) -> anyhow::Result<()>;

    /// Called once on full teardown, in reverse activation order.
    fn detach(&self) -> anyhow::Result<()>;
}

/// Opaque host configuration handed unchanged to every `attach`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigContext {
    properties: BTreeMap<String, serde_json::Value>,
}

impl ConfigContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.properties.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(serde_json::Value::as_str)
    }

    pub fn properties(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.properties
    }
}

/// Live module handle, comparable by identity.
#[derive(Clone)]
pub struct ModuleInstance {
    module: Arc<dyn ExtensionModule>,
    receiver: Receiver,
}

impl ModuleInstance {
    pub fn new<T: ExtensionModule>(module: T) -> Self {
        Self::shared(Arc::new(module))
    }

    /// Wraps an instance the constructor keeps elsewhere, e.g. a singleton.
    pub fn shared<T: ExtensionModule>(module: Arc<T>) -> Self {
        Self {
            module: module.clone(),
            receiver: module,
        }
    }

    pub fn module(&self) -> &Arc<dyn ExtensionModule> {
        &self.module
    }

    /// Instance handed to instance-bound exports.
    pub fn receiver(&self) -> &Receiver {
        &self.receiver
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.receiver).downcast::<T>().ok()
    }

    pub fn same_instance(&self, other: &ModuleInstance) -> bool {
        Arc::ptr_eq(&self.receiver, &other.receiver)
    }
}

impl Debug for ModuleInstance {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ModuleInstance({:p})", Arc::as_ptr(&self.receiver))
    }
}

/// Module instantiation failures, one variant per failure class.
#[derive(Debug, thiserror::Error)]
pub enum InstantiationError {
    #[error("class '{0}' is abstract")]
    Abstract(String),
    #[error("class '{0}' does not declare a no-argument constructor")]
    MissingConstructor(String),
    #[error("constructor of '{class}' failed: {cause:#}")]
    ConstructorFailed { class: String, cause: anyhow::Error },
    #[error("constructor of '{class}' panicked: {payload}")]
    ConstructorPanicked { class: String, payload: String },
}

impl InstantiationError {
    /// Stable code used in log events.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Abstract(_) => "abstract_class",
            Self::MissingConstructor(_) => "missing_constructor",
            Self::ConstructorFailed { .. } => "constructor_failed",
            Self::ConstructorPanicked { .. } => "constructor_panicked",
        }
    }
}

/// Creates a module instance of `class`.
pub fn instantiate(class: &ExtensionClass) -> Result<ModuleInstance, InstantiationError> {
    if class.is_abstract() {
        return Err(InstantiationError::Abstract(class.name().to_string()));
    }
    let Some(constructor) = class.constructor() else {
        return Err(InstantiationError::MissingConstructor(
            class.name().to_string(),
        ));
    };
    match catch_unwind(AssertUnwindSafe(constructor)) {
        Ok(Ok(instance)) => Ok(instance),
        Ok(Err(cause)) => Err(InstantiationError::ConstructorFailed {
            class: class.name().to_string(),
            cause,
        }),
        Err(payload) => Err(InstantiationError::ConstructorPanicked {
            class: class.name().to_string(),
            payload: panic_payload_summary(payload.as_ref()),
        }),
    }
}

/// Runs extension code, turning errors and panics into a log-ready message.
pub(crate) fn guarded<T>(hook: impl FnOnce() -> anyhow::Result<T>) -> Result<T, String> {
    match catch_unwind(AssertUnwindSafe(hook)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(format!("{err:#}")),
        Err(payload) => Err(format!("panic: {}", panic_payload_summary(payload.as_ref()))),
    }
}
