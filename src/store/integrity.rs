//! Reference-integrity bookkeeping: who references whom.
//!
//! For every stored identity the tracker maintains the set of identities
//! referencing it (back-links), rebuilt incrementally on add/update/reload.
//! The orchestrator drives the actual repair on removal: loading each
//! referencer, stripping the dangling references from its slot tree, and
//! rewriting it to disk.

use std::collections::{HashMap, HashSet};

use crate::identity::Identity;

/// Incremental back-link tracker over the implicit reference graph.
#[derive(Debug, Default)]
pub struct ReferenceTracker {
    /// target → identities referencing it.
    back_links: HashMap<Identity, HashSet<Identity>>,
    /// referencer → targets it currently references (for de-registration).
    forward: HashMap<Identity, Vec<Identity>>,
}

impl ReferenceTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the current reference set of `referencer`.
    ///
    /// Old registrations for the referencer are dropped first, so this is
    /// correct for add, update, and reload-from-profile alike.
    pub fn update_links(&mut self, referencer: &Identity, references: &[Identity]) {
        self.drop_referencer(referencer);
        for target in references {
            self.back_links
                .entry(target.clone())
                .or_default()
                .insert(referencer.clone());
        }
        if !references.is_empty() {
            self.forward.insert(referencer.clone(), references.to_vec());
        }
    }

    /// Remove every registration made by `referencer`.
    pub fn drop_referencer(&mut self, referencer: &Identity) {
        if let Some(old) = self.forward.remove(referencer) {
            for target in old {
                if let Some(set) = self.back_links.get_mut(&target) {
                    set.remove(referencer);
                    if set.is_empty() {
                        self.back_links.remove(&target);
                    }
                }
            }
        }
    }

    /// The identities currently referencing `target`.
    pub fn referencers_of(&self, target: &Identity) -> Vec<Identity> {
        self.back_links
            .get(target)
            .map(|set| {
                let mut v: Vec<Identity> = set.iter().cloned().collect();
                v.sort();
                v
            })
            .unwrap_or_default()
    }

    /// Begin removal of `target`: returns the referencers needing repair
    /// and drops all of the target's own bookkeeping.
    pub fn on_remove(&mut self, target: &Identity) -> Vec<Identity> {
        let referencers = self.referencers_of(target);
        self.back_links.remove(target);
        self.drop_referencer(target);
        referencers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> Identity {
        Identity::new(s)
    }

    #[test]
    fn back_links_registered_and_queried() {
        let mut tracker = ReferenceTracker::new();
        tracker.update_links(&id("p1"), &[id("addr1"), id("addr2")]);
        tracker.update_links(&id("p2"), &[id("addr1")]);
        assert_eq!(tracker.referencers_of(&id("addr1")), vec![id("p1"), id("p2")]);
        assert_eq!(tracker.referencers_of(&id("addr2")), vec![id("p1")]);
    }

    #[test]
    fn update_drops_stale_registrations() {
        let mut tracker = ReferenceTracker::new();
        tracker.update_links(&id("p1"), &[id("addr1")]);
        tracker.update_links(&id("p1"), &[id("addr2")]);
        assert!(tracker.referencers_of(&id("addr1")).is_empty());
        assert_eq!(tracker.referencers_of(&id("addr2")), vec![id("p1")]);
    }

    #[test]
    fn on_remove_reports_referencers_and_clears() {
        let mut tracker = ReferenceTracker::new();
        tracker.update_links(&id("p1"), &[id("addr1")]);
        tracker.update_links(&id("addr1"), &[id("city1")]);

        let repair = tracker.on_remove(&id("addr1"));
        assert_eq!(repair, vec![id("p1")]);
        // addr1's own registrations are gone too.
        assert!(tracker.referencers_of(&id("city1")).is_empty());
        assert!(tracker.on_remove(&id("addr1")).is_empty());
    }
}
