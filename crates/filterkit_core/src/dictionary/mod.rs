//! Uniform named-value lookup.
//!
//! # Responsibility
//! - Define the `Dictionary` capability consulted by request-time code.
//! - Provide the basic dictionaries hosts and tests build on.
//!
//! # Invariants
//! - `Ok(None)` means "not found" and is never an error.
//! - A non-null value of the wrong shape is reported as `ResolveError`.

pub mod resolver;
pub mod selector;

use crate::value::Value;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

pub use resolver::{ProviderDictionary, SliceDictionary, SubstitutionPolicy};
pub use selector::{Expression, ExpressionCompiler, ExpressionError, GlobalScope, SelectorCompiler};

pub type DictResult<T> = Result<T, ResolveError>;

/// Shared handle on a request-scoped dictionary.
pub type DictionaryRef = Arc<dyn Dictionary>;

/// Named-value lookup.
pub trait Dictionary: Send + Sync {
    fn get(&self, key: &str) -> DictResult<Option<Value>>;

    /// Whether this dictionary is the in-flight message of a request.
    fn is_message(&self) -> bool {
        false
    }
}

/// Resolution-time failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("property '{0}' is not readable")]
    Unreadable(String),
    #[error("property or method name must be a non empty string")]
    EmptyName,
    #[error("invocation of '{key}' aborted: {reason}")]
    Aborted { key: String, reason: String },
    #[error("substitution of '{key}' exceeded {limit} steps")]
    DepthExceeded { key: String, limit: usize },
}

/// Dictionary with no entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyDictionary;

impl Dictionary for EmptyDictionary {
    fn get(&self, _key: &str) -> DictResult<Option<Value>> {
        Ok(None)
    }
}

/// Immutable dictionary over a fixed set of entries.
#[derive(Debug, Clone, Default)]
pub struct MapDictionary {
    entries: BTreeMap<String, Value>,
}

impl MapDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Dictionary for MapDictionary {
    fn get(&self, key: &str) -> DictResult<Option<Value>> {
        Ok(self.entries.get(key).cloned())
    }
}

/// Request-scoped attribute bag standing in for the host's in-flight message.
#[derive(Debug, Default)]
pub struct MessageDictionary {
    attributes: RwLock<BTreeMap<String, Value>>,
}

impl MessageDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes.write().insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.attributes.write().remove(key)
    }
}

impl Dictionary for MessageDictionary {
    fn get(&self, key: &str) -> DictResult<Option<Value>> {
        Ok(self.attributes.read().get(key).cloned())
    }

    fn is_message(&self) -> bool {
        true
    }
}
