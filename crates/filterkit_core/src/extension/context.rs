//! Per-plugin resource context.
//!
//! # Responsibility
//! - Bind the exported functions of one plugin class into named resources.
//!
//! # Invariants
//! - A context is immutable once built.
//! - Resource names are unique; every export sharing a name is rejected.

use crate::binder::{ExportSpec, Receiver};
use crate::dictionary::{DictionaryRef, ExpressionCompiler};
use crate::resource::{AbortError, ContextResource, ResourceProvider};
use crate::value::Value;
use log::{debug, error};
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};

/// Named resources exported by one plugin class.
pub struct ExtensionContext {
    class_name: String,
    resources: BTreeMap<String, ContextResource>,
}

impl ExtensionContext {
    /// Binds `exports` of `class_name`, optionally against a module instance.
    pub fn bind(
        class_name: &str,
        exports: &[ExportSpec],
        receiver: Option<&Receiver>,
        compiler: &dyn ExpressionCompiler,
    ) -> Self {
        let mut occurrences = BTreeMap::<&str, usize>::new();
        for export in exports {
            *occurrences.entry(export.name()).or_default() += 1;
        }

        let mut resources = BTreeMap::new();
        for export in exports {
            let name = export.name();
            if name.trim().is_empty() {
                error!(
                    "event=context_bind module=context status=error class={class_name} error_code=empty_export_name"
                );
                continue;
            }
            if occurrences.get(name).copied().unwrap_or_default() > 1 {
                error!(
                    "event=context_bind module=context status=error class={class_name} export={name} error_code=duplicate_export_name"
                );
                continue;
            }
            if let Some(resource) = export.bind(class_name, receiver, compiler) {
                debug!(
                    "event=context_bind module=context status=ok class={class_name} export={name} kind={}",
                    resource.kind()
                );
                resources.insert(name.to_string(), resource);
            }
        }

        Self {
            class_name: class_name.to_string(),
            resources,
        }
    }

    /// Context over prebuilt resources.
    pub fn from_resources<I>(class_name: impl Into<String>, resources: I) -> Self
    where
        I: IntoIterator<Item = (String, ContextResource)>,
    {
        Self {
            class_name: class_name.into(),
            resources: resources.into_iter().collect(),
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Calls the named function resource with positional arguments.
    pub fn call(
        &self,
        dict: &DictionaryRef,
        name: &str,
        args: &[Value],
    ) -> Result<Option<Value>, AbortError> {
        match self.resources.get(name) {
            Some(ContextResource::Function(function)) => function.call(dict, args),
            _ => Err(AbortError::new(format!("resource '{name}' is not a function"))),
        }
    }
}

impl ResourceProvider for ExtensionContext {
    fn context_resource(&self, name: &str) -> Option<ContextResource> {
        self.resources.get(name).cloned()
    }

    fn has_children(&self, prefix: &str) -> bool {
        let prefix = format!("{prefix}.");
        self.resources
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(name, _)| name.starts_with(&prefix))
    }
}

impl Debug for ExtensionContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionContext")
            .field("class_name", &self.class_name)
            .field("resources", &self.resources.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::ExtensionContext;
    use crate::binder::{ExportSpec, Receiver};
    use crate::dictionary::{
        DictionaryRef, EmptyDictionary, GlobalScope, MessageDictionary, SelectorCompiler,
    };
    use crate::resource::{ContextResource, ResourceProvider};
    use crate::value::Value;
    use std::sync::Arc;

    fn compiler() -> SelectorCompiler {
        SelectorCompiler::new(Arc::new(GlobalScope::new()))
    }

    #[test]
    fn duplicate_names_are_all_rejected() {
        let exports = vec![
            ExportSpec::invocable("check", |_| Ok(true)),
            ExportSpec::invocable("check", |_| Ok(false)),
            ExportSpec::invocable("other", |_| Ok(true)),
        ];
        let context = ExtensionContext::bind("demo.Checks", &exports, None, &compiler());
        assert_eq!(context.names().collect::<Vec<_>>(), vec!["other"]);
    }

    #[test]
    fn instance_exports_need_a_receiver() {
        let exports = vec![
            ExportSpec::invocable_on::<u32, _>("positive", |value, _| Ok(*value > 0)),
            ExportSpec::invocable("static", |_| Ok(true)),
        ];
        let unbound = ExtensionContext::bind("demo.Counter", &exports, None, &compiler());
        assert_eq!(unbound.names().collect::<Vec<_>>(), vec!["static"]);

        let receiver: Receiver = Arc::new(3_u32);
        let bound = ExtensionContext::bind("demo.Counter", &exports, Some(&receiver), &compiler());
        assert_eq!(bound.len(), 2);
        let message: DictionaryRef = Arc::new(MessageDictionary::new());
        assert!(bound.invoke(&message, "positive").expect("invoke"));
    }

    #[test]
    fn has_children_matches_dotted_prefixes_only() {
        let context = ExtensionContext::from_resources(
            "demo.Tree",
            vec![
                ("a.b".to_string(), ContextResource::resolved(1_i64)),
                ("ab".to_string(), ContextResource::resolved(2_i64)),
            ],
        );
        assert!(context.has_children("a"));
        assert!(!context.has_children("ab"));
        assert!(!context.has_children("a.b"));
        assert!(!context.has_children("b"));
    }

    #[test]
    fn call_dispatches_function_resources() {
        let exports = vec![
            ExportSpec::function("first", |_, args| Ok(args.first().cloned())),
            ExportSpec::invocable("check", |_| Ok(true)),
        ];
        let context = ExtensionContext::bind("demo.Text", &exports, None, &compiler());
        let dict: DictionaryRef = Arc::new(EmptyDictionary);
        let value = context
            .call(&dict, "first", &[Value::from("x")])
            .expect("call")
            .expect("value");
        assert_eq!(value.as_str(), Some("x"));
        let err = context
            .call(&dict, "check", &[])
            .expect_err("not a function");
        assert_eq!(err.message(), "resource 'check' is not a function");
    }
}
