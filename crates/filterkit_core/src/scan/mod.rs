//! Candidate discovery over code artifacts.
//!
//! Artifacts come from a `CodeLoader` chain; every class entry is read
//! through a `MetadataInspector`, never loaded.

pub mod artifact;
pub mod inspector;
pub mod scanner;

pub use artifact::{ArtifactEnumerator, ArtifactLocation, CodeLoader, UrlLoader};
pub use inspector::{ClassMetadata, InspectError, JsonClassInspector, MetadataInspector};
pub use scanner::{CandidateScanner, ScanReport};
