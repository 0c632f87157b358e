//! Published extension maps and the global namespace dictionary.
//!
//! # Invariants
//! - A `Published` snapshot is never mutated after it is stored; writers
//!   build a new one and swap it in whole.
//! - Readers of `ExtensionNamespace` never take a lock.

use crate::dictionary::{DictResult, Dictionary, ResolveError};
use crate::extension::context::ExtensionContext;
use crate::extension::descriptor::ExtensionClass;
use crate::extension::module::ModuleInstance;
use crate::extension::registry::Registration;
use crate::resource::ResourceProvider;
use crate::value::Value;
use arc_swap::ArcSwap;
use log::error;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::ops::Bound;
use std::sync::Arc;

/// Maps visible to request-time readers.
#[derive(Clone, Default)]
pub struct Published {
    pub plugins: BTreeMap<String, Arc<ExtensionContext>>,
    pub filters: BTreeMap<String, Arc<ExtensionClass>>,
    pub instances: BTreeMap<String, ModuleInstance>,
}

impl Published {
    /// Copy of `self` extended with `registration`; names already published win.
    pub fn merged(&self, registration: &Registration) -> Self {
        let mut next = self.clone();
        for (name, context) in &registration.plugins {
            if next.plugins.contains_key(name) {
                error!("event=publish module=namespace status=error kind=plugin name={name} error_code=duplicate_export_name");
                continue;
            }
            next.plugins.insert(name.clone(), Arc::clone(context));
        }
        for (name, class) in &registration.filters {
            if next.filters.contains_key(name) {
                error!("event=publish module=namespace status=error kind=filter_type name={name} error_code=duplicate_filter_type");
                continue;
            }
            next.filters.insert(name.clone(), Arc::clone(class));
        }
        for (name, instance) in &registration.instances {
            if next.instances.contains_key(name) {
                error!("event=publish module=namespace status=error kind=instance name={name} error_code=duplicate_interface_instance");
                continue;
            }
            next.instances.insert(name.clone(), instance.clone());
        }
        next
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty() && self.filters.is_empty() && self.instances.is_empty()
    }

    fn has_plugins_under(&self, prefix: &str) -> bool {
        let start = format!("{prefix}.");
        self.plugins
            .range::<str, _>((Bound::Included(start.as_str()), Bound::Unbounded))
            .next()
            .is_some_and(|(name, _)| name.starts_with(&start))
    }
}

impl Debug for Published {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Published")
            .field("plugins", &self.plugins.keys().collect::<Vec<_>>())
            .field("filters", &self.filters.keys().collect::<Vec<_>>())
            .field("instances", &self.instances.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Dictionary over the published plugin map.
///
/// `get(name)` yields the plugin exported as `name`. Dotted export names
/// are reachable one segment at a time through namespace slices.
#[derive(Clone)]
pub struct ExtensionNamespace {
    published: Arc<ArcSwap<Published>>,
}

impl ExtensionNamespace {
    pub fn new(published: Arc<ArcSwap<Published>>) -> Self {
        Self { published }
    }

    pub fn plugin(&self, name: &str) -> Option<Arc<ExtensionContext>> {
        self.published.load().plugins.get(name).cloned()
    }

    pub fn plugin_names(&self) -> Vec<String> {
        self.published.load().plugins.keys().cloned().collect()
    }
}

impl Dictionary for ExtensionNamespace {
    fn get(&self, key: &str) -> DictResult<Option<Value>> {
        if key.is_empty() {
            return Err(ResolveError::EmptyName);
        }
        let published = self.published.load();
        if let Some(context) = published.plugins.get(key) {
            let provider: Arc<dyn ResourceProvider> =
                Arc::clone(context) as Arc<dyn ResourceProvider>;
            return Ok(Some(Value::Provider(provider)));
        }
        if published.has_plugins_under(key) {
            return Ok(Some(Value::Dictionary(Arc::new(NamespaceSlice {
                namespace: self.clone(),
                prefix: key.to_string(),
            }))));
        }
        Ok(None)
    }
}

impl Debug for ExtensionNamespace {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionNamespace")
            .field("plugins", &self.plugin_names())
            .finish()
    }
}

struct NamespaceSlice {
    namespace: ExtensionNamespace,
    prefix: String,
}

impl Dictionary for NamespaceSlice {
    fn get(&self, key: &str) -> DictResult<Option<Value>> {
        if key.is_empty() {
            return Err(ResolveError::EmptyName);
        }
        self.namespace.get(&format!("{}.{key}", self.prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::{ExtensionNamespace, Published};
    use crate::dictionary::{Dictionary, ResolveError};
    use crate::extension::context::ExtensionContext;
    use crate::extension::registry::Registration;
    use crate::resource::ContextResource;
    use crate::value::Value;
    use arc_swap::ArcSwap;
    use std::sync::Arc;

    fn context(class_name: &str, resource: &str, value: i64) -> Arc<ExtensionContext> {
        Arc::new(ExtensionContext::from_resources(
            class_name,
            [(resource.to_string(), ContextResource::resolved(value))],
        ))
    }

    #[test]
    fn first_publication_of_a_name_wins() {
        let mut first = Registration::default();
        first.plugins.insert("cache".to_string(), context("a.Cache", "size", 1));
        let mut second = Registration::default();
        second.plugins.insert("cache".to_string(), context("b.Cache", "size", 2));
        second.plugins.insert("audit".to_string(), context("b.Audit", "on", 1));

        let published = Published::default().merged(&first).merged(&second);
        assert_eq!(published.plugins.len(), 2);
        assert_eq!(published.plugins["cache"].class_name(), "a.Cache");
        assert!(!published.is_empty());
    }

    #[test]
    fn dotted_export_names_resolve_through_slices() {
        let mut registration = Registration::default();
        registration
            .plugins
            .insert("acme.cache".to_string(), context("acme.Cache", "size", 7));
        let published = Arc::new(ArcSwap::from_pointee(Published::default().merged(&registration)));
        let namespace = ExtensionNamespace::new(published);

        let Some(Value::Dictionary(acme)) = namespace.get("acme").expect("lookup") else {
            panic!("expected a namespace slice");
        };
        assert!(matches!(acme.get("cache").expect("lookup"), Some(Value::Provider(_))));
        assert!(acme.get("other").expect("lookup").is_none());
        assert!(namespace.get("acm").expect("lookup").is_none());
        assert_eq!(namespace.get("").err(), Some(ResolveError::EmptyName));
    }

    #[test]
    fn readers_see_swapped_snapshots() {
        let published = Arc::new(ArcSwap::from_pointee(Published::default()));
        let namespace = ExtensionNamespace::new(Arc::clone(&published));
        assert!(namespace.get("cache").expect("lookup").is_none());

        let mut registration = Registration::default();
        registration.plugins.insert("cache".to_string(), context("a.Cache", "size", 1));
        published.store(Arc::new(Published::default().merged(&registration)));
        assert!(namespace.plugin("cache").is_some());
        assert_eq!(namespace.plugin_names(), vec!["cache".to_string()]);
    }
}
