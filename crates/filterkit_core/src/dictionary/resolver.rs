//! Provider-backed dictionary resolution.
//!
//! # Responsibility
//! - Turn raw context resources into final values against a caller-scoped
//!   base dictionary.
//! - Fall back to hierarchical slices when a key has no direct binding.
//!
//! # Invariants
//! - Viewable resources are projected exactly once.
//! - Substitution repeats until the chain yields a non-substitutable result,
//!   bounded only when a `SubstitutionPolicy` depth limit is set.
//! - Absent keys are `Ok(None)`; only wrong-shaped resources are errors.

use super::{DictResult, Dictionary, DictionaryRef, ResolveError};
use crate::resource::{ContextResource, ResourceProvider};
use crate::value::Value;
use log::warn;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Termination policy for substitution chains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubstitutionPolicy {
    /// Maximum number of substitution steps per lookup. `None` is unbounded.
    pub max_depth: Option<usize>,
}

impl SubstitutionPolicy {
    pub const fn unbounded() -> Self {
        Self { max_depth: None }
    }

    pub const fn bounded(max_depth: usize) -> Self {
        Self {
            max_depth: Some(max_depth),
        }
    }
}

/// Dictionary view over one resource provider.
#[derive(Clone)]
pub struct ProviderDictionary {
    provider: Arc<dyn ResourceProvider>,
    base: DictionaryRef,
    policy: SubstitutionPolicy,
}

impl ProviderDictionary {
    pub fn new(provider: Arc<dyn ResourceProvider>, base: DictionaryRef) -> Self {
        Self {
            provider,
            base,
            policy: SubstitutionPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: SubstitutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn provider(&self) -> &Arc<dyn ResourceProvider> {
        &self.provider
    }

    pub fn base(&self) -> &DictionaryRef {
        &self.base
    }

    pub fn policy(&self) -> SubstitutionPolicy {
        self.policy
    }

    /// Resolves the resource bound to `key` without slice fallback.
    pub fn lookup(&self, key: &str) -> DictResult<Option<Value>> {
        if key.is_empty() {
            return Err(ResolveError::EmptyName);
        }
        match self.provider.context_resource(key) {
            Some(resource) => self.substitute(key, resource),
            None => Ok(None),
        }
    }

    /// Resolves `key`, returning a slice when only nested keys exist.
    pub fn resolve(&self, key: &str) -> DictResult<Option<Value>> {
        if let Some(value) = self.lookup(key)? {
            return Ok(Some(value));
        }
        if self.provider.has_children(key) {
            return Ok(Some(Value::Dictionary(Arc::new(self.slice(key)))));
        }
        Ok(None)
    }

    /// Dictionary scoped to `prefix`.
    pub fn slice(&self, prefix: &str) -> SliceDictionary {
        SliceDictionary {
            parent: self.clone(),
            prefix: prefix.to_string(),
        }
    }

    fn substitute(&self, key: &str, resource: ContextResource) -> DictResult<Option<Value>> {
        let mut current = resource;
        let mut steps = 0_usize;
        loop {
            current = match current {
                ContextResource::Resolved(value) => return Ok(Some(value)),
                ContextResource::Viewable(resource) => return Ok(Some(resource.view())),
                ContextResource::Substitutable(resource) => {
                    if let Some(limit) = self.policy.max_depth {
                        if steps >= limit {
                            warn!(
                                "event=resource_substitute module=resolver status=error key={key} limit={limit} error_code=depth_exceeded"
                            );
                            return Err(ResolveError::DepthExceeded {
                                key: key.to_string(),
                                limit,
                            });
                        }
                    }
                    steps += 1;
                    match resource.substitute(&self.base) {
                        Some(next) => next,
                        None => return Ok(None),
                    }
                }
                ContextResource::Invocable(resource) if self.base.is_message() => {
                    return resource
                        .invoke(&self.base)
                        .map(|outcome| Some(Value::from(outcome)))
                        .map_err(|err| ResolveError::Aborted {
                            key: key.to_string(),
                            reason: err.message().to_string(),
                        });
                }
                ContextResource::Invocable(_) | ContextResource::Function(_) => {
                    return Err(ResolveError::Unreadable(key.to_string()));
                }
            };
        }
    }
}

impl Dictionary for ProviderDictionary {
    fn get(&self, key: &str) -> DictResult<Option<Value>> {
        self.resolve(key)
    }
}

impl Debug for ProviderDictionary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderDictionary")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Dictionary re-resolving `prefix.key` against its parent provider.
#[derive(Debug, Clone)]
pub struct SliceDictionary {
    parent: ProviderDictionary,
    prefix: String,
}

impl SliceDictionary {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl Dictionary for SliceDictionary {
    fn get(&self, key: &str) -> DictResult<Option<Value>> {
        if key.is_empty() {
            return Err(ResolveError::EmptyName);
        }
        self.parent.resolve(&format!("{}.{key}", self.prefix))
    }
}
