#![forbid(unsafe_code)]

//! Closed set of component kinds.

use std::fmt;

use serde::{Deserialize, Serialize};

/// What a descriptor node is, and therefore how the builder expands it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComponentKind {
    /// Layout-only node. Transparent to data addressing.
    Container,
    /// Owns an isolated form data store for its subtree.
    FormRoot,
    /// Data-bound object. Children always exist regardless of data.
    ObjectField,
    /// Data-bound array. Children are replicated once per element.
    ArrayField,
    /// Data-bound scalar value.
    PrimitiveField,
    /// Non-data UI leaf.
    Leaf,
}

impl ComponentKind {
    /// Whether nodes of this kind bind to a value in a form store.
    #[must_use]
    pub const fn is_field(self) -> bool {
        matches!(
            self,
            Self::ObjectField | Self::ArrayField | Self::PrimitiveField
        )
    }

    /// Whether nodes of this kind are meaningless without an ancestor form root.
    #[must_use]
    pub const fn requires_form(self) -> bool {
        matches!(self, Self::ObjectField | Self::ArrayField)
    }

    /// Whether nodes of this kind may declare children.
    #[must_use]
    pub const fn accepts_children(self) -> bool {
        !matches!(self, Self::PrimitiveField | Self::Leaf)
    }

    /// Stable lowercase name used in diagnostics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Container => "container",
            Self::FormRoot => "form-root",
            Self::ObjectField => "object-field",
            Self::ArrayField => "array-field",
            Self::PrimitiveField => "primitive-field",
            Self::Leaf => "leaf",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
