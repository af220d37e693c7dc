//! Matcher framework: pluggable query-execution strategies.
//!
//! Every matcher implements the same contract over [`Network`]
//! representations; the [`MatcherChain`] routes each instance and query to
//! the first registered matcher whose `handles_type` accepts its root type,
//! falling back to a default matcher that handles everything. Exactly one
//! matcher is ever asked to index or query a given type, and routing is
//! identical for add and for query.

pub mod sparql;
pub mod structural;

use std::collections::HashSet;

use crate::error::SeshatResult;
use crate::frame::network::{Network, NetworkValue};
use crate::identity::Identity;

/// A query-execution strategy over network representations.
pub trait Matcher: Send {
    /// Name for registration and logs.
    fn name(&self) -> &str;

    /// Whether this matcher owns the given root type.
    fn handles_type(&self, ty: &Identity) -> bool;

    /// Whether the store must feed reloaded instances back in at start-up.
    ///
    /// False for matchers with their own durable index (e.g. an on-disk
    /// triple store).
    fn requires_rebuild(&self) -> bool {
        true
    }

    /// Index an instance under its identity.
    fn add(&mut self, network: Network, identity: Identity) -> SeshatResult<()>;

    /// Drop an instance from the index. Unknown identities are a no-op.
    fn remove(&mut self, identity: &Identity) -> SeshatResult<()>;

    /// All stored identities matching the query.
    fn query(&self, query: &Network) -> SeshatResult<Vec<Identity>>;

    /// Whether one specific stored instance matches the query.
    fn matches(&self, query: &Network, identity: &Identity) -> SeshatResult<bool>;

    /// Tear down internal state. Must be idempotent.
    fn stop(&mut self) {}
}

/// Ordered matcher list with a total-fallback default.
pub struct MatcherChain {
    matchers: Vec<Box<dyn Matcher>>,
    default: Box<dyn Matcher>,
}

impl MatcherChain {
    /// Create a chain with only the default matcher.
    pub fn new(default: Box<dyn Matcher>) -> Self {
        Self {
            matchers: Vec::new(),
            default,
        }
    }

    /// Register a matcher at the end of the chain.
    pub fn register(&mut self, matcher: Box<dyn Matcher>) {
        self.matchers.push(matcher);
    }

    /// Register a matcher at a specific priority position.
    pub fn register_at(&mut self, position: usize, matcher: Box<dyn Matcher>) {
        let position = position.min(self.matchers.len());
        self.matchers.insert(position, matcher);
    }

    /// Replace the matcher with the given name. Returns whether anything
    /// was replaced; the displaced matcher is stopped.
    pub fn replace(&mut self, name: &str, matcher: Box<dyn Matcher>) -> bool {
        match self.matchers.iter().position(|m| m.name() == name) {
            Some(i) => {
                self.matchers[i].stop();
                self.matchers[i] = matcher;
                true
            }
            None => false,
        }
    }

    /// The matcher owning `ty`: first registered match, else the default.
    pub fn matcher_for(&mut self, ty: &Identity) -> &mut dyn Matcher {
        // Two passes to sidestep the borrow of the whole list.
        let position = self.matchers.iter().position(|m| m.handles_type(ty));
        match position {
            Some(i) => self.matchers[i].as_mut(),
            None => self.default.as_mut(),
        }
    }

    /// Immutable routing, for query execution.
    pub fn matcher_for_ref(&self, ty: &Identity) -> &dyn Matcher {
        self.matchers
            .iter()
            .find(|m| m.handles_type(ty))
            .map(|m| m.as_ref())
            .unwrap_or(self.default.as_ref())
    }

    /// Stop every matcher, default included. Idempotent.
    pub fn stop_all(&mut self) {
        for matcher in &mut self.matchers {
            matcher.stop();
        }
        self.default.stop();
    }
}

impl std::fmt::Debug for MatcherChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatcherChain")
            .field("matchers", &self.matchers.iter().map(|m| m.name()).collect::<Vec<_>>())
            .field("default", &self.default.name())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Custom value matching
// ---------------------------------------------------------------------------

/// The kind of a slot value, for custom-matcher registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Node,
    Number,
    Text,
    Reference,
}

impl ValueKind {
    /// The kind of a network value.
    pub fn of(value: &NetworkValue) -> Self {
        match value {
            NetworkValue::Node(_) => ValueKind::Node,
            NetworkValue::Number(_) => ValueKind::Number,
            NetworkValue::Text(_) => ValueKind::Text,
            NetworkValue::Reference(_) => ValueKind::Reference,
        }
    }
}

type ValuePredicate = Box<dyn Fn(&NetworkValue, &NetworkValue) -> bool + Send + Sync>;

struct CustomMatcher {
    kind: ValueKind,
    slots: HashSet<Identity>,
    predicate: ValuePredicate,
}

/// Registry of custom equality/matching predicates, keyed by value kind and
/// slot identity set. Overrides the default subsumption comparison for the
/// registered (kind, slot) combinations only.
#[derive(Default)]
pub struct ValueMatchers {
    custom: Vec<CustomMatcher>,
}

impl ValueMatchers {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a predicate for a value kind under the given slots.
    pub fn register<F>(&mut self, kind: ValueKind, slots: impl IntoIterator<Item = Identity>, predicate: F)
    where
        F: Fn(&NetworkValue, &NetworkValue) -> bool + Send + Sync + 'static,
    {
        self.custom.push(CustomMatcher {
            kind,
            slots: slots.into_iter().collect(),
            predicate: Box::new(predicate),
        });
    }

    /// Evaluate the first applicable custom predicate, if any.
    pub fn apply(
        &self,
        slot: &Identity,
        query_value: &NetworkValue,
        instance_value: &NetworkValue,
    ) -> Option<bool> {
        let kind = ValueKind::of(query_value);
        self.custom
            .iter()
            .find(|c| c.kind == kind && c.slots.contains(slot))
            .map(|c| (c.predicate)(query_value, instance_value))
    }
}

impl std::fmt::Debug for ValueMatchers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueMatchers")
            .field("custom", &self.custom.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;

    struct FakeMatcher {
        name: &'static str,
        owns: Vec<&'static str>,
        added: Vec<Identity>,
    }

    impl FakeMatcher {
        fn boxed(name: &'static str, owns: Vec<&'static str>) -> Box<Self> {
            Box::new(Self {
                name,
                owns,
                added: Vec::new(),
            })
        }
    }

    impl Matcher for FakeMatcher {
        fn name(&self) -> &str {
            self.name
        }
        fn handles_type(&self, ty: &Identity) -> bool {
            self.owns.iter().any(|t| *t == ty.id)
        }
        fn add(&mut self, _network: Network, identity: Identity) -> SeshatResult<()> {
            self.added.push(identity);
            Ok(())
        }
        fn remove(&mut self, identity: &Identity) -> SeshatResult<()> {
            self.added.retain(|i| i != identity);
            Ok(())
        }
        fn query(&self, _query: &Network) -> SeshatResult<Vec<Identity>> {
            Ok(self.added.clone())
        }
        fn matches(&self, _query: &Network, identity: &Identity) -> SeshatResult<bool> {
            Ok(self.added.contains(identity))
        }
    }

    #[test]
    fn first_matching_matcher_wins() {
        let mut chain = MatcherChain::new(FakeMatcher::boxed("default", vec![]));
        chain.register(FakeMatcher::boxed("a", vec!["Patient"]));
        chain.register(FakeMatcher::boxed("b", vec!["Patient", "Address"]));

        assert_eq!(chain.matcher_for(&Identity::new("Patient")).name(), "a");
        assert_eq!(chain.matcher_for(&Identity::new("Address")).name(), "b");
        assert_eq!(chain.matcher_for(&Identity::new("Other")).name(), "default");
    }

    #[test]
    fn routing_consistent_for_add_and_query() {
        let mut chain = MatcherChain::new(FakeMatcher::boxed("default", vec![]));
        chain.register(FakeMatcher::boxed("a", vec!["Patient"]));
        let ty = Identity::new("Patient");
        let net = Network::from_frame(&Frame::assertion("Patient"));
        chain.matcher_for(&ty).add(net.clone(), Identity::new("p1")).unwrap();
        let hits = chain.matcher_for_ref(&ty).query(&net).unwrap();
        assert_eq!(hits, vec![Identity::new("p1")]);
    }

    #[test]
    fn register_at_and_replace() {
        let mut chain = MatcherChain::new(FakeMatcher::boxed("default", vec![]));
        chain.register(FakeMatcher::boxed("a", vec!["Patient"]));
        chain.register_at(0, FakeMatcher::boxed("priority", vec!["Patient"]));
        assert_eq!(chain.matcher_for(&Identity::new("Patient")).name(), "priority");

        assert!(chain.replace("priority", FakeMatcher::boxed("swapped", vec!["Patient"])));
        assert_eq!(chain.matcher_for(&Identity::new("Patient")).name(), "swapped");
        assert!(!chain.replace("ghost", FakeMatcher::boxed("x", vec![])));
    }

    #[test]
    fn custom_value_matcher_overrides_for_registered_slots_only() {
        let mut matchers = ValueMatchers::new();
        matchers.register(ValueKind::Text, [Identity::new("hasName")], |q, i| {
            match (q, i) {
                (NetworkValue::Text(a), NetworkValue::Text(b)) => a.eq_ignore_ascii_case(b),
                _ => false,
            }
        });

        let q = NetworkValue::Text("Ada".into());
        let i = NetworkValue::Text("ada".into());
        assert_eq!(matchers.apply(&Identity::new("hasName"), &q, &i), Some(true));
        assert_eq!(matchers.apply(&Identity::new("hasCity"), &q, &i), None);
    }
}
