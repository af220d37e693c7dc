//! Index registry: bidirectional identity ↔ slot-index mapping.
//!
//! Every stored instance holds exactly one dense integer index, used as the
//! file-name key for its profile and body. Freed indices are reused
//! smallest-first, which bounds file fan-out in the store directories.

use std::collections::{BTreeSet, HashMap};

use crate::error::IndexError;
use crate::identity::Identity;

/// Bidirectional registry of identity ↔ index assignments with a min-first
/// free list.
#[derive(Debug, Default)]
pub struct IndexRegistry {
    /// Forward map: identity → index.
    by_identity: HashMap<Identity, usize>,
    /// Reverse map: index → identity (source of truth for labels).
    by_index: HashMap<usize, Identity>,
    /// Previously freed indices, smallest first.
    free: BTreeSet<usize>,
    /// High-water mark: the next never-used index.
    next: usize,
}

impl IndexRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign an index to a new identity.
    ///
    /// Reuses the smallest freed index before growing the high-water mark.
    /// Errors if the identity already holds an index.
    pub fn assign_index(&mut self, identity: &Identity) -> Result<usize, IndexError> {
        if let Some(&index) = self.by_identity.get(identity) {
            return Err(IndexError::IdentityConflict {
                identity: identity.id.clone(),
                index,
            });
        }
        let index = match self.free.pop_first() {
            Some(reused) => reused,
            None => {
                let fresh = self.next;
                self.next += 1;
                fresh
            }
        };
        self.by_identity.insert(identity.clone(), index);
        self.by_index.insert(index, identity.clone());
        Ok(index)
    }

    /// Re-establish an assignment found on disk during the start-up scan.
    ///
    /// Pushes the high-water mark past `index`; the free list is rebuilt
    /// afterwards with [`rebuild_free_list`](Self::rebuild_free_list).
    pub fn restore(&mut self, identity: &Identity, index: usize) -> Result<(), IndexError> {
        if let Some(&existing) = self.by_identity.get(identity) {
            return Err(IndexError::IdentityConflict {
                identity: identity.id.clone(),
                index: existing,
            });
        }
        self.by_identity.insert(identity.clone(), index);
        self.by_index.insert(index, identity.clone());
        self.next = self.next.max(index + 1);
        Ok(())
    }

    /// Recompute the free list as every unassigned index below the
    /// high-water mark. Called once after the start-up scan.
    pub fn rebuild_free_list(&mut self) {
        self.free = (0..self.next)
            .filter(|i| !self.by_index.contains_key(i))
            .collect();
    }

    /// Whether the identity holds an index.
    pub fn has_index(&self, identity: &Identity) -> bool {
        self.by_identity.contains_key(identity)
    }

    /// The index held by an identity.
    pub fn index_of(&self, identity: &Identity) -> Result<usize, IndexError> {
        self.by_identity
            .get(identity)
            .copied()
            .ok_or_else(|| IndexError::UnknownIdentity {
                identity: identity.id.clone(),
            })
    }

    /// The identity holding an index.
    pub fn identity_of(&self, index: usize) -> Result<&Identity, IndexError> {
        self.by_index
            .get(&index)
            .ok_or(IndexError::UnknownIndex { index })
    }

    /// Release an identity's index back to the free list.
    pub fn free_index(&mut self, identity: &Identity) -> Result<usize, IndexError> {
        let index = self.index_of(identity)?;
        self.by_identity.remove(identity);
        self.by_index.remove(&index);
        self.free.insert(index);
        Ok(index)
    }

    /// All currently assigned identities.
    pub fn identities(&self) -> Vec<Identity> {
        self.by_identity.keys().cloned().collect()
    }

    /// Number of live assignments.
    pub fn len(&self) -> usize {
        self.by_identity.len()
    }

    /// Whether no assignments exist.
    pub fn is_empty(&self) -> bool {
        self.by_identity.is_empty()
    }
}
