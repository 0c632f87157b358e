//! Class metadata inspection seam.
//!
//! Reading compiled classes is delegated to a `MetadataInspector`. The
//! bundled `JsonClassInspector` reads the JSON records produced by the
//! build-time indexing step, one record per class entry.

use crate::extension::marker::{MarkerKind, MarkerSet};
use serde::{Deserialize, Serialize};
use std::io::Read;

/// Declared metadata of one class, as read without loading it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassMetadata {
    pub name: String,
    #[serde(default)]
    pub annotations: Vec<String>,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub superclass: Option<String>,
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    /// Symbols the class references that cannot be resolved yet.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved: Vec<String>,
}

impl ClassMetadata {
    /// Markers named directly by annotations or implemented interfaces.
    pub fn declared_markers(&self) -> MarkerSet {
        self.annotations
            .iter()
            .chain(self.interfaces.iter())
            .filter_map(|name| MarkerKind::parse(name))
            .collect()
    }

    /// Declared supertypes: interfaces first, then the superclass.
    pub fn supertypes(&self) -> impl Iterator<Item = &str> {
        self.interfaces
            .iter()
            .map(String::as_str)
            .chain(self.superclass.as_deref())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InspectError {
    #[error("class '{class}' references unresolved symbol '{symbol}'")]
    Unresolved { class: String, symbol: String },
    #[error("malformed class metadata: {0}")]
    Malformed(String),
    #[error("failed to read class entry: {0}")]
    Io(#[from] std::io::Error),
}

/// Reports declared metadata of a compiled-class byte stream.
pub trait MetadataInspector: Send + Sync {
    fn inspect(&self, input: &mut dyn Read) -> Result<ClassMetadata, InspectError>;
}

/// Inspector over JSON class-metadata records.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonClassInspector;

impl MetadataInspector for JsonClassInspector {
    fn inspect(&self, input: &mut dyn Read) -> Result<ClassMetadata, InspectError> {
        let mut raw = Vec::new();
        input.read_to_end(&mut raw)?;
        let metadata: ClassMetadata =
            serde_json::from_slice(&raw).map_err(|err| InspectError::Malformed(err.to_string()))?;
        if metadata.name.trim().is_empty() {
            return Err(InspectError::Malformed("class name is empty".to_string()));
        }
        if let Some(symbol) = metadata.unresolved.first() {
            return Err(InspectError::Unresolved {
                class: metadata.name.clone(),
                symbol: symbol.clone(),
            });
        }
        Ok(metadata)
    }
}
