//! Resolved values handed out by dictionaries.

use crate::dictionary::Dictionary;
use crate::resource::ResourceProvider;
use std::any::Any;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// A fully resolved value.
///
/// Plain data travels as JSON. Hierarchical values (slices, namespaces) are
/// dictionaries, and extension contexts are exposed as providers so the
/// caller can keep drilling with its own request dictionary.
#[derive(Clone)]
pub enum Value {
    Data(serde_json::Value),
    Dictionary(Arc<dyn Dictionary>),
    Provider(Arc<dyn ResourceProvider>),
    Object(Arc<dyn Any + Send + Sync>),
}

impl Value {
    /// Wraps an arbitrary host object.
    pub fn object<T: Any + Send + Sync>(value: T) -> Self {
        Self::Object(Arc::new(value))
    }

    pub fn as_data(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Data(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_data().and_then(serde_json::Value::as_bool)
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_data().and_then(serde_json::Value::as_i64)
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_data().and_then(serde_json::Value::as_str)
    }

    pub fn as_dictionary(&self) -> Option<&Arc<dyn Dictionary>> {
        match self {
            Self::Dictionary(dict) => Some(dict),
            _ => None,
        }
    }

    pub fn as_provider(&self) -> Option<&Arc<dyn ResourceProvider>> {
        match self {
            Self::Provider(provider) => Some(provider),
            _ => None,
        }
    }

    /// Downcasts a host object value.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Object(object) => object.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Short kind label used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Data(serde_json::Value::Null) => "null",
            Self::Data(serde_json::Value::Bool(_)) => "bool",
            Self::Data(serde_json::Value::Number(_)) => "number",
            Self::Data(serde_json::Value::String(_)) => "string",
            Self::Data(serde_json::Value::Array(_)) => "array",
            Self::Data(serde_json::Value::Object(_)) => "object",
            Self::Dictionary(_) => "dictionary",
            Self::Provider(_) => "provider",
            Self::Object(_) => "host_object",
        }
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Data(value) => f.debug_tuple("Data").field(value).finish(),
            other => write!(f, "{}(..)", other.kind()),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Self::Data(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Data(serde_json::Value::String(value.to_string()))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Data(serde_json::Value::String(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Data(serde_json::Value::Bool(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Data(serde_json::Value::from(value))
    }
}
