//! Marker contract recognised by discovery and registration.

use std::fmt::{Debug, Formatter};

/// Marker carried by an extension class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MarkerKind {
    /// Exports named resources into the global plugin map.
    Plugin,
    /// Lifecycle module with attach/detach hooks.
    Module,
    /// Declares the entity-type name of a filter definition.
    FilterType,
    /// Pluggable filter definition.
    FilterDefinition,
}

/// Marker name of plugin classes.
pub const MARKER_PLUGIN: &str = "filterkit.ExtensionContext";
/// Marker name of lifecycle modules.
pub const MARKER_MODULE: &str = "filterkit.ExtensionModule";
/// Marker name of the filter-type declaration.
pub const MARKER_FILTER_TYPE: &str = "filterkit.FilterType";
/// Marker name of filter definitions.
pub const MARKER_FILTER_DEFINITION: &str = "filterkit.Filter";

const ALL_MARKERS: [MarkerKind; 4] = [
    MarkerKind::Plugin,
    MarkerKind::Module,
    MarkerKind::FilterType,
    MarkerKind::FilterDefinition,
];

impl MarkerKind {
    pub fn all() -> &'static [MarkerKind] {
        &ALL_MARKERS
    }

    /// Stable marker name as it appears in class metadata.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plugin => MARKER_PLUGIN,
            Self::Module => MARKER_MODULE,
            Self::FilterType => MARKER_FILTER_TYPE,
            Self::FilterDefinition => MARKER_FILTER_DEFINITION,
        }
    }

    /// Whether the marker is inherited through implemented interfaces.
    pub fn is_interface(self) -> bool {
        matches!(self, Self::Module | Self::FilterDefinition)
    }

    /// Parses a marker name; unknown names are not markers.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            MARKER_PLUGIN => Some(Self::Plugin),
            MARKER_MODULE => Some(Self::Module),
            MARKER_FILTER_TYPE => Some(Self::FilterType),
            MARKER_FILTER_DEFINITION => Some(Self::FilterDefinition),
            _ => None,
        }
    }

    fn bit(self) -> u8 {
        match self {
            Self::Plugin => 1,
            Self::Module => 1 << 1,
            Self::FilterType => 1 << 2,
            Self::FilterDefinition => 1 << 3,
        }
    }
}

/// Small set of markers.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MarkerSet(u8);

impl MarkerSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn of(markers: &[MarkerKind]) -> Self {
        markers.iter().fold(Self::empty(), |set, marker| set.with(*marker))
    }

    #[must_use]
    pub fn with(self, marker: MarkerKind) -> Self {
        Self(self.0 | marker.bit())
    }

    pub fn insert(&mut self, marker: MarkerKind) {
        self.0 |= marker.bit();
    }

    pub fn contains(self, marker: MarkerKind) -> bool {
        self.0 & marker.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Interface markers only.
    #[must_use]
    pub fn interfaces(self) -> Self {
        self.iter()
            .filter(|marker| marker.is_interface())
            .fold(Self::empty(), Self::with)
    }

    pub fn iter(self) -> impl Iterator<Item = MarkerKind> {
        MarkerKind::all()
            .iter()
            .copied()
            .filter(move |marker| self.contains(*marker))
    }
}

impl Debug for MarkerSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<MarkerKind> for MarkerSet {
    fn from_iter<I: IntoIterator<Item = MarkerKind>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}
