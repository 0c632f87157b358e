//! Exported resource kinds and the provider contract.
//!
//! # Responsibility
//! - Model every raw resource an extension context can export as one tagged
//!   union, so resolution is an explicit match instead of open type checks.
//! - Define the flow-abort failure raised by invocable and function resources.
//!
//! # Invariants
//! - Substitutable resources never fail; a failed substitution is `None`.
//! - Invocable resources always produce a boolean outcome or abort.

use crate::dictionary::DictionaryRef;
use crate::value::Value;
use log::error;
use std::error::Error;
use std::sync::Arc;

/// Resource resolved iteratively against a dictionary.
///
/// The result may itself be another resource; resolvers keep substituting
/// until the chain produces something final.
pub trait SubstitutableResource: Send + Sync {
    fn substitute(&self, dict: &DictionaryRef) -> Option<ContextResource>;
}

impl<F> SubstitutableResource for F
where
    F: Fn(&DictionaryRef) -> Option<ContextResource> + Send + Sync,
{
    fn substitute(&self, dict: &DictionaryRef) -> Option<ContextResource> {
        self(dict)
    }
}

/// Resource exposed through a public view (caches as maps, stores as
/// dictionaries). The view is taken once and never re-projected.
pub trait ViewableResource: Send + Sync {
    fn view(&self) -> Value;
}

impl<F> ViewableResource for F
where
    F: Fn() -> Value + Send + Sync,
{
    fn view(&self) -> Value {
        self()
    }
}

/// Executable resource with a boolean outcome.
pub trait InvocableResource: Send + Sync {
    fn invoke(&self, message: &DictionaryRef) -> Result<bool, AbortError>;
}

/// Resource called with explicit positional arguments.
pub trait FunctionResource: Send + Sync {
    fn call(&self, dict: &DictionaryRef, args: &[Value]) -> Result<Option<Value>, AbortError>;
}

/// Raw resource as stored in an extension context.
#[derive(Clone)]
pub enum ContextResource {
    Resolved(Value),
    Substitutable(Arc<dyn SubstitutableResource>),
    Viewable(Arc<dyn ViewableResource>),
    Invocable(Arc<dyn InvocableResource>),
    Function(Arc<dyn FunctionResource>),
}

impl ContextResource {
    pub fn resolved(value: impl Into<Value>) -> Self {
        Self::Resolved(value.into())
    }

    pub fn substitutable(resource: impl SubstitutableResource + 'static) -> Self {
        Self::Substitutable(Arc::new(resource))
    }

    pub fn viewable(resource: impl ViewableResource + 'static) -> Self {
        Self::Viewable(Arc::new(resource))
    }

    pub fn invocable(resource: impl InvocableResource + 'static) -> Self {
        Self::Invocable(Arc::new(resource))
    }

    pub fn function(resource: impl FunctionResource + 'static) -> Self {
        Self::Function(Arc::new(resource))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Resolved(_) => "resolved",
            Self::Substitutable(_) => "substitutable",
            Self::Viewable(_) => "viewable",
            Self::Invocable(_) => "invocable",
            Self::Function(_) => "function",
        }
    }
}

impl std::fmt::Debug for ContextResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resolved(value) => f.debug_tuple("Resolved").field(value).finish(),
            other => write!(f, "{}(..)", other.kind()),
        }
    }
}

/// Set of named resources.
pub trait ResourceProvider: Send + Sync {
    /// Returns the raw resource bound to `name`.
    fn context_resource(&self, name: &str) -> Option<ContextResource>;

    /// Returns whether any resource is exported under `prefix.`.
    fn has_children(&self, _prefix: &str) -> bool {
        false
    }

    /// Invokes the named resource against a message dictionary.
    fn invoke(&self, message: &DictionaryRef, name: &str) -> Result<bool, AbortError> {
        let Some(ContextResource::Invocable(resource)) = self.context_resource(name) else {
            return Err(AbortError::new(format!(
                "resource '{name}' is not invocable"
            )));
        };
        if !message.is_message() {
            return Err(AbortError::new("no message context"));
        }
        resource.invoke(message)
    }

    /// Runs one substitution step of the named resource.
    ///
    /// Only resolved values are returned; a substitution yielding another
    /// resource kind is reported as `None`.
    fn substitute(&self, dict: &DictionaryRef, name: &str) -> Option<Value> {
        match self.context_resource(name) {
            Some(ContextResource::Substitutable(resource)) => match resource.substitute(dict) {
                Some(ContextResource::Resolved(value)) => Some(value),
                _ => None,
            },
            _ => {
                error!(
                    "event=resource_substitute module=resource status=error name={name} error_code=not_substitutable"
                );
                None
            }
        }
    }
}

/// Flow-abort failure raised by invocable and function resources.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct AbortError {
    message: String,
    #[source]
    source: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl AbortError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn Error + Send + Sync + 'static>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::{AbortError, ContextResource, InvocableResource, ResourceProvider};
    use crate::dictionary::{DictionaryRef, EmptyDictionary, MessageDictionary};
    use std::collections::BTreeMap;
    use std::error::Error;
    use std::sync::Arc;

    struct Always(bool);

    impl InvocableResource for Always {
        fn invoke(&self, _message: &DictionaryRef) -> Result<bool, AbortError> {
            Ok(self.0)
        }
    }

    struct Fixed(BTreeMap<String, ContextResource>);

    impl ResourceProvider for Fixed {
        fn context_resource(&self, name: &str) -> Option<ContextResource> {
            self.0.get(name).cloned()
        }
    }

    fn provider() -> Fixed {
        let mut resources = BTreeMap::new();
        resources.insert("ok".to_string(), ContextResource::invocable(Always(true)));
        resources.insert(
            "greeting".to_string(),
            ContextResource::substitutable(|_: &DictionaryRef| {
                Some(ContextResource::resolved("hello"))
            }),
        );
        Fixed(resources)
    }

    #[test]
    fn invoke_requires_invocable_resource_and_message() {
        let provider = provider();
        let message: DictionaryRef = Arc::new(MessageDictionary::new());
        assert!(provider.invoke(&message, "ok").expect("invocable"));

        let err = provider
            .invoke(&message, "greeting")
            .expect_err("substitutable is not invocable");
        assert_eq!(err.message(), "resource 'greeting' is not invocable");

        let plain: DictionaryRef = Arc::new(EmptyDictionary);
        let err = provider
            .invoke(&plain, "ok")
            .expect_err("plain dictionary is not a message");
        assert_eq!(err.message(), "no message context");
    }

    #[test]
    fn substitute_returns_resolved_value_or_none() {
        let provider = provider();
        let dict: DictionaryRef = Arc::new(EmptyDictionary);
        let value = provider.substitute(&dict, "greeting").expect("value");
        assert_eq!(value.as_str(), Some("hello"));
        assert!(provider.substitute(&dict, "ok").is_none());
        assert!(provider.substitute(&dict, "missing").is_none());
    }

    #[test]
    fn abort_error_keeps_source() {
        let err = AbortError::with_source("flow aborted", "backend unavailable");
        assert_eq!(err.to_string(), "flow aborted");
        assert_eq!(
            err.source().map(|source| source.to_string()),
            Some("backend unavailable".to_string())
        );
    }
}
