//! Rich diagnostic error types for the seshat frame store.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text so embedders know exactly what went
//! wrong and how to fix it.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the seshat store.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text, source chains) through to the caller.
#[derive(Debug, Error, Diagnostic)]
pub enum SeshatError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Match(#[from] MatchError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Frame errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum FrameError {
    #[error("invalid number range: min {min} > max {max}")]
    #[diagnostic(
        code(seshat::frame::invalid_range),
        help("A numeric range must satisfy min <= max. Swap the bounds or use `NumberSpec::exact`.")
    )]
    InvalidRange { min: f64, max: f64 },
}

// ---------------------------------------------------------------------------
// Index registry errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum IndexError {
    #[error("identity \"{identity}\" already has index {index}")]
    #[diagnostic(
        code(seshat::index::identity_conflict),
        help(
            "Each identity may hold exactly one slot index. Remove the stored \
             instance first, or use `update` to rewrite it in place."
        )
    )]
    IdentityConflict { identity: String, index: usize },

    #[error("identity \"{identity}\" has no assigned index")]
    #[diagnostic(
        code(seshat::index::unknown_identity),
        help("The identity is not currently stored. Check the identifier, or add the instance first.")
    )]
    UnknownIdentity { identity: String },

    #[error("index {index} is not assigned to any identity")]
    #[diagnostic(
        code(seshat::index::unknown_index),
        help(
            "The slot index is on the free list or beyond the high-water mark. \
             This usually indicates a stale profile file in a store directory."
        )
    )]
    UnknownIndex { index: usize },
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("I/O error: {source}")]
    #[diagnostic(
        code(seshat::store::io),
        help(
            "A filesystem operation failed. Check that the store directory exists, \
             has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {message}")]
    #[diagnostic(
        code(seshat::store::serde),
        help(
            "Failed to serialize or deserialize an instance file. \
             This usually means a profile or body file was edited by hand \
             or written by an incompatible version."
        )
    )]
    Serialization { message: String },

    #[error("instance \"{identity}\" not found")]
    #[diagnostic(
        code(seshat::store::not_found),
        help("No instance with this identity is stored. Verify the identifier is correct.")
    )]
    NotFound { identity: String },
}

// ---------------------------------------------------------------------------
// Matcher errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum MatchError {
    #[error("SPARQL error: {message}")]
    #[diagnostic(
        code(seshat::matcher::sparql),
        help(
            "The triple store rejected an operation. Check the rendered query \
             syntax and ensure the oxigraph store is initialized."
        )
    )]
    Sparql { message: String },

    #[error("cannot assert indefinite number on slot \"{slot}\"")]
    #[diagnostic(
        code(seshat::matcher::indefinite_number),
        help(
            "The triples back end stores only definite values. Numeric ranges \
             without an exact value are legal in queries, not in stored assertions."
        )
    )]
    IndefiniteNumber { slot: String },

    #[error("cannot assert disjunctive type ({count} alternatives)")]
    #[diagnostic(
        code(seshat::matcher::disjunctive_assertion),
        help(
            "A stored assertion must have exactly one type per frame. \
             Type disjunctions are legal in queries, not in stored assertions."
        )
    )]
    DisjunctiveAssertion { count: usize },
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read store config: {path}")]
    #[diagnostic(
        code(seshat::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse store config: {path}")]
    #[diagnostic(
        code(seshat::config::parse),
        help("Check the TOML syntax in the store config file.")
    )]
    Parse { path: String, message: String },

    #[error("duplicate area name \"{name}\"")]
    #[diagnostic(
        code(seshat::config::duplicate_area),
        help("Each store area must have a unique name; rename one of the duplicates.")
    )]
    DuplicateArea { name: String },
}

/// Convenience alias for functions returning seshat results.
pub type SeshatResult<T> = std::result::Result<T, SeshatError>;

impl From<std::io::Error> for StoreError {
    fn from(source: std::io::Error) -> Self {
        StoreError::Io { source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_error_converts_to_seshat_error() {
        let err = IndexError::IdentityConflict {
            identity: "p1".into(),
            index: 3,
        };
        let top: SeshatError = err.into();
        assert!(matches!(
            top,
            SeshatError::Index(IndexError::IdentityConflict { .. })
        ));
    }

    #[test]
    fn store_error_converts_to_seshat_error() {
        let err = StoreError::NotFound {
            identity: "p1".into(),
        };
        let top: SeshatError = err.into();
        assert!(matches!(top, SeshatError::Store(StoreError::NotFound { .. })));
    }

    #[test]
    fn error_display_messages_are_descriptive() {
        let err = MatchError::DisjunctiveAssertion { count: 3 };
        let msg = format!("{err}");
        assert!(msg.contains('3'));
    }
}
