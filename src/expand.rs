//! Instance-reference expansion: inlining referenced instances for matching.
//!
//! A reference value only carries an identity; structural matching over it
//! needs the referenced instance's content. The expander recursively loads
//! each referenced instance as an editable free copy and splices it in as an
//! *additional* value on the same slot — the reference placeholder is never
//! replaced, so identity-based matching keeps working alongside structural
//! matching.
//!
//! Two guards bound the recursion: the chain of root types currently being
//! expanded (a candidate whose type subsumes, or is subsumed by, any type on
//! the chain is refused — type-level cycles), and the set of identities on
//! the current expansion path (structural cycles).

use std::collections::HashSet;
use std::sync::Arc;

use crate::frame::network::{Network, NetworkNode, NetworkValue};
use crate::identity::Identity;
use crate::types::TypeSystem;

/// Provider of editable free copies of stored instances, in network form.
///
/// Implemented by the store; test code can back it with a plain map.
pub trait InstanceSource {
    /// Load the instance, or `None` when absent or not regenerable.
    fn load(&self, identity: &Identity) -> Option<Network>;
}

/// Recursive reference expander over network representations.
pub struct ReferenceExpander<'a> {
    source: &'a dyn InstanceSource,
    types: Arc<dyn TypeSystem>,
}

impl<'a> ReferenceExpander<'a> {
    /// Create an expander reading instances from `source`.
    pub fn new(source: &'a dyn InstanceSource, types: Arc<dyn TypeSystem>) -> Self {
        Self { source, types }
    }

    /// Expand every reference reachable from the network's root.
    pub fn expand(&self, network: &mut Network) {
        let chain = vec![network.root.ty.clone()];
        let path = HashSet::new();
        self.expand_node_tree(&mut network.root, &chain, &path);
    }

    // Walks a node and its inline children, splicing referenced instances.
    // Inline children are expanded first (under the caller's guards), then
    // splices are appended; spliced nodes are expanded during the splice and
    // never re-walked, so guard state is always the state of their own path.
    fn expand_node_tree(&self, node: &mut NetworkNode, chain: &[Identity], path: &HashSet<Identity>) {
        for slot in &mut node.slots {
            for value in &mut slot.values {
                if let NetworkValue::Node(child) = value {
                    self.expand_node_tree(child, chain, path);
                }
            }

            let references: Vec<Identity> = slot
                .values
                .iter()
                .filter_map(|v| match v {
                    NetworkValue::Reference(id) => Some(id.clone()),
                    _ => None,
                })
                .collect();
            for id in references {
                if path.contains(&id) {
                    tracing::debug!(identity = %id, "skipping expansion: structural cycle");
                    continue;
                }
                let Some(mut loaded) = self.source.load(&id) else {
                    continue;
                };
                if self.type_cycle(&loaded.root.ty, chain) {
                    tracing::debug!(
                        identity = %id,
                        ty = %loaded.root.ty,
                        "skipping expansion: type cycle"
                    );
                    continue;
                }
                let mut chain = chain.to_vec();
                chain.push(loaded.root.ty.clone());
                let mut path = path.clone();
                path.insert(id);
                self.expand_node_tree(&mut loaded.root, &chain, &path);
                slot.values.push(NetworkValue::Node(loaded.root));
            }
        }
    }

    fn type_cycle(&self, candidate: &Identity, chain: &[Identity]) -> bool {
        chain.iter().any(|on_chain| {
            self.types.subsumes(on_chain, candidate) || self.types.subsumes(candidate, on_chain)
        })
    }
}
