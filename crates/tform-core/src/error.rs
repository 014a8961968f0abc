#![forbid(unsafe_code)]

//! Path parsing errors.

use thiserror::Error;

/// Error returned when a rendered path string cannot be parsed back into a
/// structured key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("empty segment in path `{path}`")]
    EmptySegment { path: String },

    #[error("unterminated index in path `{path}`")]
    UnterminatedIndex { path: String },

    #[error("invalid index `{index}` in path `{path}`")]
    InvalidIndex { path: String, index: String },

    #[error("index without owning component in instance path `{path}`")]
    DanglingIndex { path: String },
}

impl PathError {
    /// The offending path string.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::EmptySegment { path }
            | Self::UnterminatedIndex { path }
            | Self::InvalidIndex { path, .. }
            | Self::DanglingIndex { path } => path,
        }
    }
}
