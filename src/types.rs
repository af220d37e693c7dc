//! Type system interface and a concrete in-memory catalog.
//!
//! The store does not own the frame/type model. It consumes an opaque
//! [`TypeSystem`] able to answer subsumption and hierarchy-navigation
//! queries — typically backed by an external reasoner. [`TypeCatalog`] is a
//! plain hierarchy implementation for embedders (and tests) that don't need
//! one: parent links with a cached transitive closure, the same shape as a
//! `genlPreds`-style subsumption lattice.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::identity::Identity;

/// Subsumption and hierarchy queries over frame types.
///
/// `subsumes(general, specific)` is a partial order: reflexive, and true
/// when `specific` is at least as specific as `general`.
pub trait TypeSystem: Send + Sync {
    /// Whether the type identity resolves in the current model.
    fn contains(&self, ty: &Identity) -> bool;

    /// Whether `general` subsumes `specific`.
    fn subsumes(&self, general: &Identity, specific: &Identity) -> bool;

    /// Slots declared for the type (directly or inherited).
    fn slots_of(&self, ty: &Identity) -> Vec<Identity>;

    /// All types strictly below `ty` in the hierarchy.
    fn descendants(&self, ty: &Identity) -> Vec<Identity>;
}

/// In-memory type hierarchy with cached transitive closure.
#[derive(Debug, Default)]
pub struct TypeCatalog {
    /// Direct parent links: type → parents.
    parents: HashMap<Identity, Vec<Identity>>,
    /// Declared slots per type (direct only; lookup walks ancestors).
    slots: HashMap<Identity, Vec<Identity>>,
    /// Cached ancestor closure: type → all types above it.
    ancestors: HashMap<Identity, HashSet<Identity>>,
    /// Cached descendant closure: type → all types below it.
    descendants: HashMap<Identity, HashSet<Identity>>,
}

impl TypeCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a root type (no parent).
    pub fn add_root(&mut self, ty: impl Into<Identity>) -> &mut Self {
        let ty = ty.into();
        self.parents.entry(ty).or_default();
        self.rebuild_closure();
        self
    }

    /// Register a type below `parent`. The parent is registered implicitly
    /// if it isn't yet.
    pub fn add_subtype(&mut self, ty: impl Into<Identity>, parent: impl Into<Identity>) -> &mut Self {
        let ty = ty.into();
        let parent = parent.into();
        self.parents.entry(parent.clone()).or_default();
        self.parents.entry(ty).or_default().push(parent);
        self.rebuild_closure();
        self
    }

    /// Declare a slot on a type.
    pub fn add_slot(&mut self, ty: impl Into<Identity>, slot: impl Into<Identity>) -> &mut Self {
        self.slots.entry(ty.into()).or_default().push(slot.into());
        self
    }

    /// Remove a type and everything strictly below it.
    ///
    /// Lets tests simulate a type disappearing between store sessions.
    pub fn remove_type(&mut self, ty: &Identity) -> &mut Self {
        let mut doomed: Vec<Identity> = self
            .descendants
            .get(ty)
            .map(|d| d.iter().cloned().collect())
            .unwrap_or_default();
        doomed.push(ty.clone());
        for t in &doomed {
            self.parents.remove(t);
            self.slots.remove(t);
        }
        for parents in self.parents.values_mut() {
            parents.retain(|p| !doomed.contains(p));
        }
        self.rebuild_closure();
        self
    }

    // Recompute both closures by BFS over the parent links. The catalog is
    // small and mutated rarely (model load time), so a full rebuild is fine.
    fn rebuild_closure(&mut self) {
        self.ancestors.clear();
        self.descendants.clear();
        for ty in self.parents.keys() {
            let mut seen = HashSet::new();
            let mut queue: VecDeque<&Identity> = self.parents[ty].iter().collect();
            while let Some(parent) = queue.pop_front() {
                if seen.insert(parent.clone()) {
                    if let Some(grand) = self.parents.get(parent) {
                        queue.extend(grand.iter());
                    }
                }
            }
            for ancestor in &seen {
                self.descendants
                    .entry(ancestor.clone())
                    .or_default()
                    .insert(ty.clone());
            }
            self.ancestors.insert(ty.clone(), seen);
        }
    }
}

impl TypeSystem for TypeCatalog {
    fn contains(&self, ty: &Identity) -> bool {
        self.parents.contains_key(ty)
    }

    fn subsumes(&self, general: &Identity, specific: &Identity) -> bool {
        if !self.contains(general) || !self.contains(specific) {
            return false;
        }
        general == specific
            || self
                .ancestors
                .get(specific)
                .is_some_and(|a| a.contains(general))
    }

    fn slots_of(&self, ty: &Identity) -> Vec<Identity> {
        let mut out: Vec<Identity> = self.slots.get(ty).cloned().unwrap_or_default();
        if let Some(ancestors) = self.ancestors.get(ty) {
            for ancestor in ancestors {
                for slot in self.slots.get(ancestor).into_iter().flatten() {
                    if !out.contains(slot) {
                        out.push(slot.clone());
                    }
                }
            }
        }
        out
    }

    fn descendants(&self, ty: &Identity) -> Vec<Identity> {
        self.descendants
            .get(ty)
            .map(|d| d.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> TypeCatalog {
        let mut cat = TypeCatalog::new();
        cat.add_root("Thing");
        cat.add_subtype("Person", "Thing");
        cat.add_subtype("Patient", "Person");
        cat.add_subtype("Address", "Thing");
        cat.add_slot("Person", "hasAge");
        cat.add_slot("Patient", "hasWard");
        cat
    }

    #[test]
    fn subsumption_is_reflexive_and_transitive() {
        let cat = catalog();
        let thing = Identity::new("Thing");
        let patient = Identity::new("Patient");
        assert!(cat.subsumes(&patient, &patient));
        assert!(cat.subsumes(&thing, &patient));
        assert!(!cat.subsumes(&patient, &thing));
    }

    #[test]
    fn unknown_types_never_subsume() {
        let cat = catalog();
        assert!(!cat.subsumes(&Identity::new("Thing"), &Identity::new("Ghost")));
        assert!(!cat.subsumes(&Identity::new("Ghost"), &Identity::new("Thing")));
    }

    #[test]
    fn slots_inherit_from_ancestors() {
        let cat = catalog();
        let slots = cat.slots_of(&Identity::new("Patient"));
        assert!(slots.contains(&Identity::new("hasWard")));
        assert!(slots.contains(&Identity::new("hasAge")));
    }

    #[test]
    fn descendants_are_transitive() {
        let cat = catalog();
        let below = cat.descendants(&Identity::new("Thing"));
        assert!(below.contains(&Identity::new("Patient")));
        assert!(below.contains(&Identity::new("Address")));
    }

    #[test]
    fn remove_type_drops_subtree() {
        let mut cat = catalog();
        cat.remove_type(&Identity::new("Person"));
        assert!(!cat.contains(&Identity::new("Person")));
        assert!(!cat.contains(&Identity::new("Patient")));
        assert!(cat.contains(&Identity::new("Address")));
    }
}
