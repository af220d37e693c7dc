//! In-memory structural subsumption matcher.
//!
//! Instances are grouped by root type. A query first rules groups in or out
//! with a single type-subsumption check, then runs the recursive structural
//! test instance-by-instance within qualifying groups. Linear in stored
//! instances per qualifying group; type grouping prunes the rest of the
//! search space.
//!
//! Structural subsumption: a query node subsumes an instance node when the
//! instance's type is subsumed by (one of) the query's type(s) and, for
//! every query slot, every query value is subsumed by at least one value in
//! the corresponding instance slot. Multi-valued slots match existentially,
//! not bijectively.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::SeshatResult;
use crate::frame::network::{Network, NetworkNode, NetworkValue};
use crate::identity::Identity;
use crate::matcher::{Matcher, ValueMatchers};
use crate::types::TypeSystem;

/// Type-grouped in-memory subsumption matcher.
pub struct StructuralMatcher {
    name: String,
    types: Arc<dyn TypeSystem>,
    value_matchers: Arc<ValueMatchers>,
    /// Root types this matcher owns; `None` makes it total (default matcher).
    scope: Option<Vec<Identity>>,
    /// Root type → members in insertion order.
    groups: HashMap<Identity, Vec<(Identity, Network)>>,
}

impl StructuralMatcher {
    /// A total matcher, suitable as the chain default.
    pub fn new(types: Arc<dyn TypeSystem>, value_matchers: Arc<ValueMatchers>) -> Self {
        Self {
            name: "structural".into(),
            types,
            value_matchers,
            scope: None,
            groups: HashMap::new(),
        }
    }

    /// A matcher owning only types below the given roots.
    pub fn scoped(
        name: impl Into<String>,
        types: Arc<dyn TypeSystem>,
        value_matchers: Arc<ValueMatchers>,
        roots: Vec<Identity>,
    ) -> Self {
        Self {
            name: name.into(),
            types,
            value_matchers,
            scope: Some(roots),
            groups: HashMap::new(),
        }
    }

    /// Does any of the query's type alternatives subsume `ty`?
    fn query_covers(&self, query: &NetworkNode, ty: &Identity) -> bool {
        query
            .type_disjunction()
            .iter()
            .any(|qty| self.types.subsumes(qty, ty))
    }

    fn node_subsumes(&self, query: &NetworkNode, instance: &NetworkNode) -> bool {
        if !self.query_covers(query, &instance.ty) {
            return false;
        }
        query.slots.iter().all(|qslot| {
            if qslot.values.is_empty() {
                return true;
            }
            let Some(islot) = instance.slots.iter().find(|s| s.id == qslot.id) else {
                return false;
            };
            qslot.values.iter().all(|qv| {
                islot
                    .values
                    .iter()
                    .any(|iv| self.value_subsumes(&qslot.id, qv, iv))
            })
        })
    }

    fn value_subsumes(&self, slot: &Identity, query: &NetworkValue, instance: &NetworkValue) -> bool {
        if let Some(verdict) = self.value_matchers.apply(slot, query, instance) {
            return verdict;
        }
        match (query, instance) {
            (NetworkValue::Node(q), NetworkValue::Node(i)) => self.node_subsumes(q, i),
            (NetworkValue::Number(q), NetworkValue::Number(i)) => q.subsumes(i),
            (NetworkValue::Text(q), NetworkValue::Text(i)) => q == i,
            (NetworkValue::Reference(q), NetworkValue::Reference(i)) => q == i,
            // Mixed kinds never subsume; expansion splices referenced
            // instances in as additional node values, so existential
            // matching still finds them.
            _ => false,
        }
    }
}

impl Matcher for StructuralMatcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn handles_type(&self, ty: &Identity) -> bool {
        match &self.scope {
            None => true,
            Some(roots) => roots.iter().any(|root| self.types.subsumes(root, ty)),
        }
    }

    fn add(&mut self, network: Network, identity: Identity) -> SeshatResult<()> {
        let group = network.root.ty.clone();
        self.groups.entry(group).or_default().push((identity, network));
        Ok(())
    }

    fn remove(&mut self, identity: &Identity) -> SeshatResult<()> {
        for members in self.groups.values_mut() {
            members.retain(|(id, _)| id != identity);
        }
        self.groups.retain(|_, members| !members.is_empty());
        Ok(())
    }

    fn query(&self, query: &Network) -> SeshatResult<Vec<Identity>> {
        let mut hits = Vec::new();
        for (group_ty, members) in &self.groups {
            // Group-level pruning: skip groups the query types cannot cover.
            if !self.query_covers(&query.root, group_ty) {
                continue;
            }
            for (identity, network) in members {
                if self.node_subsumes(&query.root, &network.root) {
                    hits.push(identity.clone());
                }
            }
        }
        hits.sort();
        Ok(hits)
    }

    fn matches(&self, query: &Network, identity: &Identity) -> SeshatResult<bool> {
        for members in self.groups.values() {
            if let Some((_, network)) = members.iter().find(|(id, _)| id == identity) {
                return Ok(self.node_subsumes(&query.root, &network.root));
            }
        }
        Ok(false)
    }

    fn stop(&mut self) {
        self.groups.clear();
    }
}

impl std::fmt::Debug for StructuralMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructuralMatcher")
            .field("name", &self.name)
            .field("groups", &self.groups.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Frame, NumberSpec, Slot, Value};
    use crate::types::TypeCatalog;

    fn types() -> Arc<TypeCatalog> {
        let mut cat = TypeCatalog::new();
        cat.add_root("Thing");
        cat.add_subtype("Person", "Thing");
        cat.add_subtype("Patient", "Person");
        cat.add_subtype("Address", "Thing");
        Arc::new(cat)
    }

    fn matcher() -> StructuralMatcher {
        StructuralMatcher::new(types(), Arc::new(ValueMatchers::new()))
    }

    fn net(frame: &Frame) -> Network {
        Network::from_frame(frame)
    }

    fn patient(age: f64) -> Frame {
        Frame::assertion("Patient")
            .with_slot(Slot::new("hasAge").with_value(Value::Number(NumberSpec::exact(age))))
    }

    #[test]
    fn age_range_query_scenario() {
        let mut m = matcher();
        m.add(net(&patient(42.0)), Identity::new("p1")).unwrap();
        m.add(net(&patient(67.0)), Identity::new("p3")).unwrap();

        let query = Frame::query("Patient").with_slot(
            Slot::new("hasAge").with_value(Value::Number(NumberSpec::range(30.0, 50.0).unwrap())),
        );
        assert_eq!(m.query(&net(&query)).unwrap(), vec![Identity::new("p1")]);
    }

    #[test]
    fn supertype_query_finds_subtype_instances() {
        let mut m = matcher();
        m.add(net(&patient(42.0)), Identity::new("p1")).unwrap();

        let query = Frame::query("Person");
        assert_eq!(m.query(&net(&query)).unwrap(), vec![Identity::new("p1")]);
        // And the other direction prunes.
        let address_query = Frame::query("Address");
        assert!(m.query(&net(&address_query)).unwrap().is_empty());
    }

    #[test]
    fn multi_valued_slots_match_existentially() {
        let mut m = matcher();
        let inst = Frame::assertion("Patient").with_slot(
            Slot::new("hasTag")
                .with_value(Value::Text("chronic".into()))
                .with_value(Value::Text("recovering".into())),
        );
        m.add(net(&inst), Identity::new("p1")).unwrap();

        let query = Frame::query("Patient")
            .with_slot(Slot::new("hasTag").with_value(Value::Text("chronic".into())));
        assert_eq!(m.query(&net(&query)).unwrap(), vec![Identity::new("p1")]);

        let miss = Frame::query("Patient")
            .with_slot(Slot::new("hasTag").with_value(Value::Text("cured".into())));
        assert!(m.query(&net(&miss)).unwrap().is_empty());
    }

    #[test]
    fn missing_query_slot_fails_match() {
        let mut m = matcher();
        m.add(net(&Frame::assertion("Patient")), Identity::new("p1")).unwrap();
        let query = Frame::query("Patient")
            .with_slot(Slot::new("hasAge").with_value(Value::Number(NumberSpec::min(0.0))));
        assert!(m.query(&net(&query)).unwrap().is_empty());
    }

    #[test]
    fn disjunctive_query_types_union_groups() {
        let mut m = matcher();
        m.add(net(&patient(42.0)), Identity::new("p1")).unwrap();
        m.add(net(&Frame::assertion("Address")), Identity::new("a1")).unwrap();

        let query = Frame::query("Patient").with_disjunct("Address");
        let hits = m.query(&net(&query)).unwrap();
        assert_eq!(hits, vec![Identity::new("a1"), Identity::new("p1")]);
    }

    #[test]
    fn nested_frames_match_recursively() {
        let mut m = matcher();
        let inst = Frame::assertion("Patient").with_slot(
            Slot::new("hasAddress").with_value(Value::Frame(
                Frame::assertion("Address")
                    .with_slot(Slot::new("inCity").with_value(Value::Text("Leiden".into()))),
            )),
        );
        m.add(net(&inst), Identity::new("p1")).unwrap();

        let query = Frame::query("Patient").with_slot(
            Slot::new("hasAddress").with_value(Value::Frame(
                Frame::query("Address")
                    .with_slot(Slot::new("inCity").with_value(Value::Text("Leiden".into()))),
            )),
        );
        assert!(m.matches(&net(&query), &Identity::new("p1")).unwrap());

        let wrong_city = Frame::query("Patient").with_slot(
            Slot::new("hasAddress").with_value(Value::Frame(
                Frame::query("Address")
                    .with_slot(Slot::new("inCity").with_value(Value::Text("Delft".into()))),
            )),
        );
        assert!(!m.matches(&net(&wrong_city), &Identity::new("p1")).unwrap());
    }

    #[test]
    fn remove_drops_instance() {
        let mut m = matcher();
        m.add(net(&patient(42.0)), Identity::new("p1")).unwrap();
        m.remove(&Identity::new("p1")).unwrap();
        assert!(m.query(&net(&Frame::query("Patient"))).unwrap().is_empty());
        assert!(!m.matches(&net(&Frame::query("Patient")), &Identity::new("p1")).unwrap());
    }

    #[test]
    fn scoped_matcher_handles_subtree_only() {
        let m = StructuralMatcher::scoped(
            "clinical",
            types(),
            Arc::new(ValueMatchers::new()),
            vec![Identity::new("Person")],
        );
        assert!(m.handles_type(&Identity::new("Patient")));
        assert!(!m.handles_type(&Identity::new("Address")));
    }
}
