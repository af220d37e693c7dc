//! Instance identities: stable external keys for stored frames.
//!
//! An [`Identity`] is the client-assigned, immutable key under which an
//! instance is stored. The identifier string is the key; the optional label
//! is presentation metadata and never participates in equality or hashing.

use std::borrow::Borrow;

use serde::{Deserialize, Serialize};

/// Stable external key for a stored instance (or a type, or a slot).
///
/// Equality, ordering, and hashing use the identifier only, so two
/// identities with the same identifier but different labels are the same
/// key. Labels are carried purely for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    /// Unique identifier string.
    pub id: String,
    /// Optional human-readable display label.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub label: Option<String>,
}

impl Identity {
    /// Create an identity with no display label.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: None,
        }
    }

    /// Create an identity with a display label.
    pub fn labeled(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: Some(label.into()),
        }
    }

    /// The display label, falling back to the identifier.
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Identity {}

impl PartialOrd for Identity {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Identity {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

impl std::hash::Hash for Identity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl From<&str> for Identity {
    fn from(id: &str) -> Self {
        Identity::new(id)
    }
}

// Lets `HashMap<Identity, _>` be probed with a plain `&str`.
impl Borrow<str> for Identity {
    fn borrow(&self) -> &str {
        &self.id
    }
}
