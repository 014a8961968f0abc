#![forbid(unsafe_code)]

//! Configuration errors raised while validating a descriptor tree.

use tform_core::{ComponentKind, PathError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConfigError>;

/// A descriptor tree that cannot be built. Every variant names the instance
/// path of the offending node.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{kind} `{path}` must be nested inside a form root")]
    OutsideForm { kind: ComponentKind, path: String },

    #[error("{kind} `{path}` declares no usable field name")]
    MissingFieldName { kind: ComponentKind, path: String },

    #[error("component name `{name}` under `{parent}` cannot be addressed")]
    InvalidComponentName { name: String, parent: String },

    #[error("duplicate component `{name}` under `{parent}`")]
    DuplicateSibling { name: String, parent: String },

    #[error("{kind} `{path}` cannot declare children")]
    UnexpectedChildren { kind: ComponentKind, path: String },

    #[error("dependency `{reference}` declared by `{path}` is not a valid value path")]
    InvalidReference {
        path: String,
        reference: String,
        #[source]
        source: PathError,
    },
}

impl ConfigError {
    /// Instance path (or parent path) of the offending node.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::OutsideForm { path, .. }
            | Self::MissingFieldName { path, .. }
            | Self::UnexpectedChildren { path, .. }
            | Self::InvalidReference { path, .. } => path,
            Self::InvalidComponentName { parent, .. } | Self::DuplicateSibling { parent, .. } => {
                parent
            }
        }
    }
}
