//! Expression seam and the dotted-path selector evaluator.
//!
//! # Responsibility
//! - Define the compile/evaluate contract consumed by the invocation binder.
//! - Hold the global namespaces visible to every expression.
//!
//! # Invariants
//! - Expressions are compiled once and evaluated many times.
//! - Global namespaces shadow request dictionary keys of the same name.

use super::{
    DictResult, Dictionary, DictionaryRef, ProviderDictionary, ResolveError, SubstitutionPolicy,
};
use crate::value::Value;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::Arc;

static PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_\-]*(?:\.[A-Za-z_][A-Za-z0-9_\-]*)*$")
        .expect("valid selector path regex")
});

/// Precompiled expression.
pub trait Expression: Send + Sync {
    fn literal(&self) -> &str;
    fn evaluate(&self, dict: &DictionaryRef) -> DictResult<Option<Value>>;
}

/// Compiles expression literals.
pub trait ExpressionCompiler: Send + Sync {
    fn compile(&self, literal: &str) -> Result<Arc<dyn Expression>, ExpressionError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExpressionError {
    #[error("expression is empty")]
    Empty,
    #[error("invalid expression '{0}'")]
    Invalid(String),
}

/// Global namespaces bound into the expression evaluator.
#[derive(Default)]
pub struct GlobalScope {
    namespaces: RwLock<BTreeMap<String, DictionaryRef>>,
}

impl GlobalScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `dict` under `name`, returning the previous binding.
    pub fn bind(&self, name: impl Into<String>, dict: DictionaryRef) -> Option<DictionaryRef> {
        self.namespaces.write().insert(name.into(), dict)
    }

    pub fn unbind(&self, name: &str) -> Option<DictionaryRef> {
        self.namespaces.write().remove(name)
    }

    pub fn lookup(&self, name: &str) -> Option<DictionaryRef> {
        self.namespaces.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.namespaces.read().keys().cloned().collect()
    }
}

/// Compiles `${a.b.c}` (or bare `a.b.c`) selectors.
#[derive(Clone)]
pub struct SelectorCompiler {
    scope: Arc<GlobalScope>,
    policy: SubstitutionPolicy,
}

impl SelectorCompiler {
    pub fn new(scope: Arc<GlobalScope>) -> Self {
        Self {
            scope,
            policy: SubstitutionPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: SubstitutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn scope(&self) -> &Arc<GlobalScope> {
        &self.scope
    }
}

impl ExpressionCompiler for SelectorCompiler {
    fn compile(&self, literal: &str) -> Result<Arc<dyn Expression>, ExpressionError> {
        let trimmed = literal.trim();
        let path = match trimmed.strip_prefix("${") {
            Some(rest) => rest
                .strip_suffix('}')
                .ok_or_else(|| ExpressionError::Invalid(literal.to_string()))?
                .trim(),
            None => trimmed,
        };
        if path.is_empty() {
            return Err(ExpressionError::Empty);
        }
        if !PATH_RE.is_match(path) {
            return Err(ExpressionError::Invalid(literal.to_string()));
        }
        Ok(Arc::new(PathSelector {
            literal: literal.to_string(),
            segments: path.split('.').map(str::to_string).collect(),
            scope: Arc::clone(&self.scope),
            policy: self.policy,
        }))
    }
}

struct PathSelector {
    literal: String,
    segments: Vec<String>,
    scope: Arc<GlobalScope>,
    policy: SubstitutionPolicy,
}

impl Expression for PathSelector {
    fn literal(&self) -> &str {
        &self.literal
    }

    fn evaluate(&self, dict: &DictionaryRef) -> DictResult<Option<Value>> {
        let Some((first, rest)) = self.segments.split_first() else {
            return Err(ResolveError::EmptyName);
        };
        let mut current = match self.scope.lookup(first) {
            Some(namespace) => Some(Value::Dictionary(namespace)),
            None => dict.get(first)?,
        };
        let mut path = first.clone();
        for segment in rest {
            let Some(value) = current else {
                return Ok(None);
            };
            current = drill(&value, segment, &path, dict, self.policy)?;
            path.push('.');
            path.push_str(segment);
        }
        Ok(current)
    }
}

/// Reads `segment` out of an already resolved `value`.
///
/// `path` names the value being drilled into and is reported when the value
/// has no readable members.
pub fn drill(
    value: &Value,
    segment: &str,
    path: &str,
    base: &DictionaryRef,
    policy: SubstitutionPolicy,
) -> DictResult<Option<Value>> {
    match value {
        Value::Dictionary(dict) => dict.get(segment),
        Value::Provider(provider) => ProviderDictionary::new(Arc::clone(provider), Arc::clone(base))
            .with_policy(policy)
            .get(segment),
        Value::Data(serde_json::Value::Object(map)) => {
            Ok(map.get(segment).cloned().map(Value::Data))
        }
        Value::Data(serde_json::Value::Null) => Ok(None),
        _ => Err(ResolveError::Unreadable(path.to_string())),
    }
}
