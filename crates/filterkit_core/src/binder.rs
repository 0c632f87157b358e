//! Invocation binder for exported functions.
//!
//! # Responsibility
//! - Describe exported functions with explicit parameter declarations.
//! - Compile parameter sources once at registration time and resolve them
//!   against the request dictionary at call time.
//!
//! # Invariants
//! - Substitutable exports never fail; failures become `None`.
//! - Invocable exports produce a boolean outcome or a flow abort.
//! - Instance exports are never bound without a receiver.

use crate::dictionary::{Dictionary, DictionaryRef, Expression, ExpressionCompiler, ResolveError};
use crate::extension::module::guarded;
use crate::logging::verbose_diagnostics;
use crate::resource::{
    AbortError, ContextResource, FunctionResource, InvocableResource, SubstitutableResource,
};
use crate::value::Value;
use log::{debug, error};
use std::any::{type_name, Any};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Module instance an export is bound to.
pub type Receiver = Arc<dyn Any + Send + Sync>;

type ReceiverRef<'a> = Option<&'a (dyn Any + Send + Sync)>;
type InvocableBody =
    Arc<dyn for<'r> Fn(ReceiverRef<'r>, &Arguments) -> Result<bool, AbortError> + Send + Sync>;
type SubstitutableBody = Arc<
    dyn for<'r> Fn(ReceiverRef<'r>, &Arguments) -> anyhow::Result<Option<Value>> + Send + Sync,
>;
type FunctionBody = Arc<
    dyn for<'r> Fn(ReceiverRef<'r>, &Arguments, &[Value]) -> Result<Option<Value>, AbortError>
        + Send
        + Sync,
>;

fn invocable_body<F>(body: F) -> ExportBody
where
    F: for<'r> Fn(ReceiverRef<'r>, &Arguments) -> Result<bool, AbortError> + Send + Sync + 'static,
{
    ExportBody::Invocable(Arc::new(body))
}

fn substitutable_body<F>(body: F) -> ExportBody
where
    F: for<'r> Fn(ReceiverRef<'r>, &Arguments) -> anyhow::Result<Option<Value>>
        + Send
        + Sync
        + 'static,
{
    ExportBody::Substitutable(Arc::new(body))
}

fn function_body<F>(body: F) -> ExportBody
where
    F: for<'r> Fn(ReceiverRef<'r>, &Arguments, &[Value]) -> Result<Option<Value>, AbortError>
        + Send
        + Sync
        + 'static,
{
    ExportBody::Function(Arc::new(body))
}

/// Declared injection source of one parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterDecl {
    /// Direct lookup of a literal name in the request dictionary.
    Attribute(String),
    /// Precompiled expression evaluated against the request dictionary.
    Expression(String),
    /// The request dictionary itself.
    Dictionary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverKind {
    Static,
    Instance,
}

#[derive(Clone)]
enum ExportBody {
    Invocable(InvocableBody),
    Substitutable(SubstitutableBody),
    Function(FunctionBody),
    Resource(ContextResource),
}

impl ExportBody {
    fn kind(&self) -> &'static str {
        match self {
            Self::Invocable(_) => "invocable",
            Self::Substitutable(_) => "substitutable",
            Self::Function(_) => "function",
            Self::Resource(resource) => resource.kind(),
        }
    }
}

/// One exported function of an extension class.
#[derive(Clone)]
pub struct ExportSpec {
    name: String,
    receiver: ReceiverKind,
    parameters: Vec<ParameterDecl>,
    body: ExportBody,
}

impl ExportSpec {
    fn new(name: impl Into<String>, receiver: ReceiverKind, body: ExportBody) -> Self {
        Self {
            name: name.into(),
            receiver,
            parameters: Vec::new(),
            body,
        }
    }

    /// Static export with a boolean outcome.
    pub fn invocable<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&Arguments) -> Result<bool, AbortError> + Send + Sync + 'static,
    {
        Self::new(
            name,
            ReceiverKind::Static,
            invocable_body(move |_, args| body(args)),
        )
    }

    /// Static export resolved lazily against the request dictionary.
    pub fn substitutable<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&Arguments) -> anyhow::Result<Option<Value>> + Send + Sync + 'static,
    {
        Self::new(
            name,
            ReceiverKind::Static,
            substitutable_body(move |_, args| body(args)),
        )
    }

    /// Static export called with positional arguments.
    pub fn function<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&Arguments, &[Value]) -> Result<Option<Value>, AbortError> + Send + Sync + 'static,
    {
        Self::new(
            name,
            ReceiverKind::Static,
            function_body(move |_, args, positional| body(args, positional)),
        )
    }

    /// Prebuilt resource exported as is.
    pub fn resource(name: impl Into<String>, resource: ContextResource) -> Self {
        Self::new(name, ReceiverKind::Static, ExportBody::Resource(resource))
    }

    pub fn invocable_on<T, F>(name: impl Into<String>, body: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&T, &Arguments) -> Result<bool, AbortError> + Send + Sync + 'static,
    {
        let name = name.into();
        let export = name.clone();
        Self::new(
            name,
            ReceiverKind::Instance,
            invocable_body(move |receiver, args| {
                let target = downcast::<T>(receiver)
                    .ok_or_else(|| AbortError::new(receiver_mismatch::<T>(&export)))?;
                body(target, args)
            }),
        )
    }

    pub fn substitutable_on<T, F>(name: impl Into<String>, body: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&T, &Arguments) -> anyhow::Result<Option<Value>> + Send + Sync + 'static,
    {
        let name = name.into();
        let export = name.clone();
        Self::new(
            name,
            ReceiverKind::Instance,
            substitutable_body(move |receiver, args| {
                let target = downcast::<T>(receiver)
                    .ok_or_else(|| anyhow::anyhow!(receiver_mismatch::<T>(&export)))?;
                body(target, args)
            }),
        )
    }

    pub fn function_on<T, F>(name: impl Into<String>, body: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&T, &Arguments, &[Value]) -> Result<Option<Value>, AbortError>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        let export = name.clone();
        Self::new(
            name,
            ReceiverKind::Instance,
            function_body(move |receiver, args, positional| {
                let target = downcast::<T>(receiver)
                    .ok_or_else(|| AbortError::new(receiver_mismatch::<T>(&export)))?;
                body(target, args, positional)
            }),
        )
    }

    pub fn with_attribute(mut self, name: impl Into<String>) -> Self {
        self.parameters.push(ParameterDecl::Attribute(name.into()));
        self
    }

    pub fn with_expression(mut self, literal: impl Into<String>) -> Self {
        self.parameters.push(ParameterDecl::Expression(literal.into()));
        self
    }

    pub fn with_dictionary(mut self) -> Self {
        self.parameters.push(ParameterDecl::Dictionary);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn receiver(&self) -> ReceiverKind {
        self.receiver
    }

    pub fn parameters(&self) -> &[ParameterDecl] {
        &self.parameters
    }

    pub fn kind(&self) -> &'static str {
        self.body.kind()
    }

    /// Binds this export to `receiver`, compiling its parameters.
    ///
    /// Returns `None` (after logging) when an instance export has no receiver.
    pub fn bind(
        &self,
        class_name: &str,
        receiver: Option<&Receiver>,
        compiler: &dyn ExpressionCompiler,
    ) -> Option<ContextResource> {
        let receiver = match (self.receiver, receiver) {
            (ReceiverKind::Static, _) => None,
            (ReceiverKind::Instance, Some(receiver)) => Some(Arc::clone(receiver)),
            (ReceiverKind::Instance, None) => {
                error!(
                    "event=export_bind module=binder status=error class={class_name} export={} error_code=instance_export_without_receiver message=\"export must be static\"",
                    self.name
                );
                return None;
            }
        };

        if let ExportBody::Resource(resource) = &self.body {
            return Some(resource.clone());
        }

        let sources = self
            .parameters
            .iter()
            .enumerate()
            .map(|(index, decl)| compile_parameter(class_name, &self.name, index, decl, compiler))
            .collect();
        let bound = Arc::new(BoundExport {
            class_name: class_name.to_string(),
            name: self.name.clone(),
            receiver,
            sources,
        });

        Some(match &self.body {
            ExportBody::Invocable(body) => ContextResource::invocable(BoundInvocable {
                export: bound,
                body: Arc::clone(body),
            }),
            ExportBody::Substitutable(body) => ContextResource::substitutable(BoundSubstitutable {
                export: bound,
                body: Arc::clone(body),
            }),
            ExportBody::Function(body) => ContextResource::function(BoundFunction {
                export: bound,
                body: Arc::clone(body),
            }),
            ExportBody::Resource(resource) => resource.clone(),
        })
    }
}

impl Debug for ExportSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportSpec")
            .field("name", &self.name)
            .field("kind", &self.body.kind())
            .field("receiver", &self.receiver)
            .field("parameters", &self.parameters)
            .finish()
    }
}

/// Parameter values resolved for one call.
pub struct Arguments {
    values: Vec<Option<Value>>,
    dictionary: DictionaryRef,
}

impl Arguments {
    pub fn dictionary(&self) -> &DictionaryRef {
        &self.dictionary
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value injected at `index`; `None` when the source resolved to nothing.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index).and_then(Option::as_ref)
    }

    pub fn str(&self, index: usize) -> Option<&str> {
        self.get(index).and_then(Value::as_str)
    }

    pub fn i64(&self, index: usize) -> Option<i64> {
        self.get(index).and_then(Value::as_i64)
    }

    pub fn bool(&self, index: usize) -> Option<bool> {
        self.get(index).and_then(Value::as_bool)
    }

    pub fn dictionary_at(&self, index: usize) -> Option<&DictionaryRef> {
        self.get(index).and_then(Value::as_dictionary)
    }
}

enum ParameterSource {
    Attribute(String),
    Expression(Arc<dyn Expression>),
    Dictionary,
    Unbound,
}

fn compile_parameter(
    class_name: &str,
    export: &str,
    index: usize,
    decl: &ParameterDecl,
    compiler: &dyn ExpressionCompiler,
) -> ParameterSource {
    match decl {
        ParameterDecl::Attribute(name) if name.trim().is_empty() => {
            error!(
                "event=parameter_bind module=binder status=error class={class_name} export={export} index={index} error_code=empty_attribute_name"
            );
            ParameterSource::Unbound
        }
        ParameterDecl::Attribute(name) => ParameterSource::Attribute(name.clone()),
        ParameterDecl::Expression(literal) => match compiler.compile(literal) {
            Ok(expression) => ParameterSource::Expression(expression),
            Err(err) => {
                error!(
                    "event=parameter_bind module=binder status=error class={class_name} export={export} index={index} error_code=invalid_expression error={err}"
                );
                ParameterSource::Unbound
            }
        },
        ParameterDecl::Dictionary => ParameterSource::Dictionary,
    }
}

struct BoundExport {
    class_name: String,
    name: String,
    receiver: Option<Receiver>,
    sources: Vec<ParameterSource>,
}

impl BoundExport {
    fn receiver(&self) -> ReceiverRef<'_> {
        self.receiver.as_deref()
    }

    fn arguments(&self, dict: &DictionaryRef) -> Result<Arguments, ResolveError> {
        let values = self
            .sources
            .iter()
            .map(|source| match source {
                ParameterSource::Attribute(name) => dict.get(name),
                ParameterSource::Expression(expression) => expression.evaluate(dict),
                ParameterSource::Dictionary => Ok(Some(Value::Dictionary(Arc::clone(dict)))),
                ParameterSource::Unbound => Ok(None),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Arguments {
            values,
            dictionary: Arc::clone(dict),
        })
    }

    fn abort_on_parameters(&self, err: ResolveError) -> AbortError {
        AbortError::with_source(
            format!("failed to resolve parameters of '{}'", self.name),
            err,
        )
    }
}

struct BoundInvocable {
    export: Arc<BoundExport>,
    body: InvocableBody,
}

impl InvocableResource for BoundInvocable {
    fn invoke(&self, message: &DictionaryRef) -> Result<bool, AbortError> {
        let args = self
            .export
            .arguments(message)
            .map_err(|err| self.export.abort_on_parameters(err))?;
        (self.body)(self.export.receiver(), &args)
    }
}

struct BoundSubstitutable {
    export: Arc<BoundExport>,
    body: SubstitutableBody,
}

impl SubstitutableResource for BoundSubstitutable {
    fn substitute(&self, dict: &DictionaryRef) -> Option<ContextResource> {
        let outcome = guarded(|| {
            let args = self.export.arguments(dict)?;
            (self.body)(self.export.receiver(), &args)
        });
        match outcome {
            Ok(value) => value.map(ContextResource::Resolved),
            Err(err) => {
                if verbose_diagnostics() {
                    debug!(
                        "event=export_substitute module=binder status=error class={} export={} error={err}",
                        self.export.class_name, self.export.name
                    );
                }
                None
            }
        }
    }
}

struct BoundFunction {
    export: Arc<BoundExport>,
    body: FunctionBody,
}

impl FunctionResource for BoundFunction {
    fn call(&self, dict: &DictionaryRef, args: &[Value]) -> Result<Option<Value>, AbortError> {
        let injected = self
            .export
            .arguments(dict)
            .map_err(|err| self.export.abort_on_parameters(err))?;
        (self.body)(self.export.receiver(), &injected, args)
    }
}

fn downcast<T: Any>(receiver: ReceiverRef<'_>) -> Option<&T> {
    receiver.and_then(|receiver| receiver.downcast_ref::<T>())
}

fn receiver_mismatch<T>(export: &str) -> String {
    format!("receiver of '{export}' is not a {}", type_name::<T>())
}
