//! Frame instance data model.
//!
//! An instance is a rooted tree of typed [`Frame`] nodes. Each node carries a
//! type identity, a [`FrameFunction`] (assertion vs. query), and a set of
//! [`Slot`]s; each slot holds zero or more [`Value`]s. Values are a closed
//! tagged union: nested frames, numbers, text, or references to other stored
//! instances.
//!
//! The store holds the canonical durable tree; matchers only ever see
//! [network representations](crate::frame::network) built from *free copies*
//! so matcher-internal mutation (reference expansion in particular) never
//! corrupts the stored instance.

pub mod network;

use serde::{Deserialize, Serialize};

use crate::error::FrameError;
use crate::identity::Identity;

/// Role of a frame: a stored fact or a query shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameFunction {
    /// A stored fact about the world.
    Assertion,
    /// A query shape to match stored assertions against.
    Query,
}

impl std::fmt::Display for FrameFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameFunction::Assertion => write!(f, "assertion"),
            FrameFunction::Query => write!(f, "query"),
        }
    }
}

/// A numeric value or inclusive interval.
///
/// An exact value is a degenerate interval. Queries may use open-ended
/// ranges; stored assertions must be definite (enforced by the triples
/// matcher at render time).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumberSpec {
    /// Exact value, if definite.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub exact: Option<f64>,
    /// Inclusive lower bound.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub min: Option<f64>,
    /// Inclusive upper bound.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub max: Option<f64>,
}

impl NumberSpec {
    /// A definite number.
    pub fn exact(value: f64) -> Self {
        Self {
            exact: Some(value),
            min: None,
            max: None,
        }
    }

    /// A min-only range (`value >= min`).
    pub fn min(min: f64) -> Self {
        Self {
            exact: None,
            min: Some(min),
            max: None,
        }
    }

    /// A max-only range (`value <= max`).
    pub fn max(max: f64) -> Self {
        Self {
            exact: None,
            min: None,
            max: Some(max),
        }
    }

    /// A closed range `[min, max]`. Errors if the bounds are inverted.
    pub fn range(min: f64, max: f64) -> Result<Self, FrameError> {
        if min > max {
            return Err(FrameError::InvalidRange { min, max });
        }
        Ok(Self {
            exact: None,
            min: Some(min),
            max: Some(max),
        })
    }

    /// Whether this spec names one definite value.
    pub fn is_definite(&self) -> bool {
        self.exact.is_some()
    }

    /// Effective interval covered by this spec.
    fn interval(&self) -> (f64, f64) {
        match self.exact {
            Some(v) => (v, v),
            None => (
                self.min.unwrap_or(f64::NEG_INFINITY),
                self.max.unwrap_or(f64::INFINITY),
            ),
        }
    }

    /// Interval containment: does this spec's interval cover `other`'s?
    pub fn subsumes(&self, other: &NumberSpec) -> bool {
        let (lo, hi) = self.interval();
        let (olo, ohi) = other.interval();
        lo <= olo && ohi <= hi
    }
}

/// A slot value: a closed union of the value kinds the store understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// An inline nested frame, owned by this instance.
    Frame(Frame),
    /// A numeric value or interval.
    Number(NumberSpec),
    /// A text value.
    Text(String),
    /// A reference to another stored instance, by identity.
    Reference(Identity),
}

/// A typed slot holding zero or more values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    /// The slot's identity.
    pub id: Identity,
    /// The slot's values, in insertion order.
    pub values: Vec<Value>,
}

impl Slot {
    /// Create an empty slot.
    pub fn new(id: impl Into<Identity>) -> Self {
        Self {
            id: id.into(),
            values: Vec::new(),
        }
    }

    /// Add a value.
    pub fn with_value(mut self, value: Value) -> Self {
        self.values.push(value);
        self
    }
}

/// A frame node: the unit an instance tree is built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// The node's type identity.
    pub ty: Identity,
    /// Alternative type identities; more than one is legal only in queries.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub disjunct_types: Vec<Identity>,
    /// Assertion or query.
    pub function: FrameFunction,
    /// The node's slots, in declaration order.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub slots: Vec<Slot>,
}

impl Frame {
    /// Create an assertion frame of the given type.
    pub fn assertion(ty: impl Into<Identity>) -> Self {
        Self::new(ty, FrameFunction::Assertion)
    }

    /// Create a query frame of the given type.
    pub fn query(ty: impl Into<Identity>) -> Self {
        Self::new(ty, FrameFunction::Query)
    }

    fn new(ty: impl Into<Identity>, function: FrameFunction) -> Self {
        Self {
            ty: ty.into(),
            disjunct_types: Vec::new(),
            function,
            slots: Vec::new(),
        }
    }

    /// Add a slot.
    pub fn with_slot(mut self, slot: Slot) -> Self {
        self.slots.push(slot);
        self
    }

    /// Add an alternative type (disjunctive query types).
    pub fn with_disjunct(mut self, ty: impl Into<Identity>) -> Self {
        self.disjunct_types.push(ty.into());
        self
    }

    /// All type alternatives: the primary type plus any disjuncts.
    pub fn type_disjunction(&self) -> Vec<&Identity> {
        std::iter::once(&self.ty).chain(self.disjunct_types.iter()).collect()
    }

    /// Look up a slot by identity.
    pub fn slot(&self, id: &str) -> Option<&Slot> {
        self.slots.iter().find(|s| s.id.id == id)
    }

    /// A deep, structurally independent clone for matcher-side mutation.
    pub fn free_copy(&self) -> Frame {
        self.clone()
    }

    /// Collect every instance reference anywhere in this tree,
    /// including inside nested frames. Duplicates removed, order preserved.
    pub fn references(&self) -> Vec<Identity> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references(&self, out: &mut Vec<Identity>) {
        for slot in &self.slots {
            for value in &slot.values {
                match value {
                    Value::Reference(id) => {
                        if !out.contains(id) {
                            out.push(id.clone());
                        }
                    }
                    Value::Frame(nested) => nested.collect_references(out),
                    Value::Number(_) | Value::Text(_) => {}
                }
            }
        }
    }

    /// Strip every reference to `target` anywhere in the tree.
    ///
    /// Returns the number of values removed. Used by the integrity manager
    /// when the referenced instance has been removed from the store.
    pub fn strip_references_to(&mut self, target: &Identity) -> usize {
        let mut removed = 0;
        for slot in &mut self.slots {
            slot.values.retain(|v| match v {
                Value::Reference(id) => {
                    let keep = id != target;
                    if !keep {
                        removed += 1;
                    }
                    keep
                }
                _ => true,
            });
            for value in &mut slot.values {
                if let Value::Frame(nested) = value {
                    removed += nested.strip_references_to(target);
                }
            }
        }
        removed
    }
}
