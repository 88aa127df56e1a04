//! Error types for parameter map conversion.

use thiserror::Error;

/// Errors raised while building or exporting a [`ConfigMap`](crate::ConfigMap).
///
/// Merging itself never fails; these only surface at the edges where
/// untyped documents come in or parameters go out.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A document that must be a mapping was something else.
    #[error("expected a mapping of calculator parameters, found {found}")]
    NotAMap { found: &'static str },

    /// A dotted path runs through a value that is not a mapping.
    #[error("cannot descend into '{path}': existing value is a {found}")]
    PathConflict { path: String, found: &'static str },

    /// An empty key or path segment.
    #[error("empty parameter key in path '{0}'")]
    EmptyKey(String),

    /// Serialization failed, usually because a removal marker survived the merge.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
