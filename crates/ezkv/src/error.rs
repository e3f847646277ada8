/*
 * error.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Error types for key-value loading.
//!
//! Every failure the loader can surface is one of the kinds below. The
//! scheduler attaches resource-chain context (the failing resource plus the
//! chain of keys that declared it) before an error escapes a load, and the
//! optional-resource logic inspects the *kind* (`is_not_found`) rather than
//! any underlying I/O error type.

use thiserror::Error;

/// Result type alias for ezkv operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading, parsing, filtering, or
/// interpolating key values.
#[derive(Debug, Error)]
pub enum Error {
    /// A resource (file, classpath entry, env key, system property, ...)
    /// could not be found. Tolerated when the resource is flagged
    /// `NO_REQUIRE`.
    #[error("{0}")]
    ResourceNotFound(String),

    /// Two sibling resources share a name.
    #[error("Duplicate resource name found in grouped resources. name={0}")]
    ResourceNameDuplicate(String),

    /// A malformed resource DSL key in a resource body or URI.
    #[error("{0}")]
    ResourceKeyInvalid(String),

    /// A filter expression could not be parsed (unsupported sed verb,
    /// malformed regex, unknown target suffix).
    #[error("{0}")]
    BadFilterExpression(String),

    /// A media parser or formatter failed.
    #[error("{0}")]
    Media(String),

    /// `${name}` with no default and no binding.
    #[error("Missing variable '{variable}' for key '{key}'")]
    MissingVariable { variable: String, key: String },

    /// Interpolation recursed past the depth limit.
    #[error("Interpolation exceeded max depth of {depth} for key '{key}'")]
    InterpolationLimit { key: String, depth: usize },

    /// A resource flagged `NO_EMPTY` contributed nothing.
    #[error("{0}")]
    Empty(String),

    /// No scheme handler matched the resource URI.
    #[error("{0}")]
    LoaderNotFound(String),

    /// An I/O error that is not a missing resource.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error means "the resource does not exist", which
    /// `NO_REQUIRE` is allowed to tolerate.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::ResourceNotFound(_) => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Rewraps the message of this error with load context, keeping the
    /// kind so callers can still dispatch on it.
    pub(crate) fn with_context(self, context: &str) -> Error {
        match self {
            Error::ResourceNotFound(m) => {
                Error::ResourceNotFound(format!("{context} {m}"))
            }
            Error::ResourceKeyInvalid(m) => {
                Error::ResourceKeyInvalid(format!("{context} {m}"))
            }
            Error::BadFilterExpression(m) => {
                Error::BadFilterExpression(format!("{context} {m}"))
            }
            Error::Media(m) => Error::Media(format!("{context} {m}")),
            Error::Empty(m) => Error::Empty(format!("{context} {m}")),
            Error::LoaderNotFound(m) => Error::LoaderNotFound(format!("{context} {m}")),
            Error::Io(e) => Error::Media(format!("{context} {e}")),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_kind() {
        let e = Error::ResourceNotFound("gone".to_string());
        assert!(e.is_not_found());

        let io = Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "x"));
        assert!(io.is_not_found());

        let other = Error::Media("bad".to_string());
        assert!(!other.is_not_found());
    }

    #[test]
    fn test_context_preserves_kind() {
        let e = Error::ResourceNotFound("Resource not found.".to_string());
        let wrapped = e.with_context("While loading thing:");
        assert!(wrapped.is_not_found());
        assert!(wrapped.to_string().starts_with("While loading thing:"));
    }
}
