//! Triples-store-backed matcher over oxigraph.
//!
//! Each indexed instance is rendered as a named graph of RDF triples. Graph
//! names come from a deterministic URI scheme over an internal assertion
//! index (monotonically increasing, freed indices reused) that is distinct
//! from the store's identity/index registry and exists only to namespace
//! triples. Non-IRI constants (type identities, slot identities, reference
//! targets) are interned through a bidirectional constant registry so they
//! render as stable IRIs.
//!
//! Queries execute in two forms: a `SELECT DISTINCT ?g` over `GRAPH ?g`
//! returning every graph satisfying the pattern, and an `ASK` scoped to one
//! named graph for single-instance tests. Disjunctive query types render as
//! `UNION` alternatives; numeric ranges bind a variable and `FILTER` on it,
//! since an unbounded constraint cannot be a single triple object.
//!
//! The back end stores only definite values: asserting an indefinite number
//! or a multi-disjunct type fails fast, before any store mutation.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use oxigraph::model::{GraphName, Literal, NamedNode, Quad, Term};
use oxigraph::sparql::QueryResults;
use oxigraph::store::Store;

use crate::error::{MatchError, SeshatResult};
use crate::frame::FrameFunction;
use crate::frame::network::{Network, NetworkNode, NetworkValue};
use crate::identity::Identity;
use crate::matcher::Matcher;
use crate::types::TypeSystem;

/// IRI namespace for seshat-rendered triples.
const SESHAT_NS: &str = "https://seshat.dev/";
const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";

fn sparql_err(context: &str, e: impl std::fmt::Display) -> MatchError {
    MatchError::Sparql {
        message: format!("{context}: {e}"),
    }
}

// ---------------------------------------------------------------------------
// Constant registry
// ---------------------------------------------------------------------------

/// Bidirectional string ↔ numeric-id interning for query constants.
///
/// Type, slot, and reference identities are arbitrary client strings; they
/// are interned to a `u64` and rendered as `{NS}c/{id}` so every IRI is
/// trivially valid and round-trips exactly.
#[derive(Debug, Default)]
pub struct ConstantRegistry {
    by_name: DashMap<String, u64>,
    by_id: DashMap<u64, String>,
    next: AtomicU64,
}

impl ConstantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a constant, returning its stable numeric id.
    pub fn intern(&self, name: &str) -> u64 {
        if let Some(existing) = self.by_name.get(name) {
            return *existing;
        }
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.by_name.insert(name.to_string(), id);
        self.by_id.insert(id, name.to_string());
        id
    }

    /// Render a constant as an IRI string.
    pub fn iri(&self, name: &str) -> String {
        format!("{SESHAT_NS}c/{}", self.intern(name))
    }

    /// Resolve a constant id back to its string.
    pub fn resolve(&self, id: u64) -> Option<String> {
        self.by_id.get(&id).map(|r| r.value().clone())
    }
}

// ---------------------------------------------------------------------------
// Assertion index allocation
// ---------------------------------------------------------------------------

/// Monotonic assertion-index allocator with smallest-first reuse.
#[derive(Debug, Default)]
struct AssertionIndexes {
    next: usize,
    free: BTreeSet<usize>,
}

impl AssertionIndexes {
    fn allocate(&mut self) -> usize {
        match self.free.pop_first() {
            Some(reused) => reused,
            None => {
                let fresh = self.next;
                self.next += 1;
                fresh
            }
        }
    }

    fn release(&mut self, index: usize) {
        self.free.insert(index);
    }
}

fn graph_base(index: usize) -> String {
    format!("{SESHAT_NS}assertion/{index}")
}

fn parse_graph_base(iri: &str) -> Option<usize> {
    iri.strip_prefix(SESHAT_NS)?
        .strip_prefix("assertion/")?
        .parse()
        .ok()
}

// ---------------------------------------------------------------------------
// Matcher
// ---------------------------------------------------------------------------

/// oxigraph-backed matcher executing structural queries as SPARQL.
pub struct SparqlMatcher {
    name: String,
    store: Store,
    types: Arc<dyn TypeSystem>,
    constants: Arc<ConstantRegistry>,
    /// Root types this matcher owns; `None` makes it total.
    scope: Option<Vec<Identity>>,
    indexes: AssertionIndexes,
    by_identity: HashMap<Identity, usize>,
    by_index: HashMap<usize, Identity>,
}

impl SparqlMatcher {
    /// Create a matcher over an in-memory triple store.
    pub fn in_memory(types: Arc<dyn TypeSystem>) -> SeshatResult<Self> {
        let store = Store::new().map_err(|e| sparql_err("failed to create oxigraph store", e))?;
        Ok(Self::with_store(store, types))
    }

    /// Open a matcher over an on-disk triple store.
    ///
    /// The graph content is cleared and rebuilt from the canonical store at
    /// start-up (the identity ↔ assertion-index map is in-memory only), so
    /// the disk backing serves as a working set, not a second durable copy.
    pub fn open(path: &Path, types: Arc<dyn TypeSystem>) -> SeshatResult<Self> {
        std::fs::create_dir_all(path)
            .map_err(|e| sparql_err("failed to create oxigraph directory", e))?;
        let store = Store::open(path)
            .map_err(|e| sparql_err(&format!("failed to open oxigraph store at {}", path.display()), e))?;
        store
            .clear()
            .map_err(|e| sparql_err("failed to clear stale graphs", e))?;
        Ok(Self::with_store(store, types))
    }

    fn with_store(store: Store, types: Arc<dyn TypeSystem>) -> Self {
        Self {
            name: "sparql".into(),
            store,
            types,
            constants: Arc::new(ConstantRegistry::new()),
            scope: None,
            indexes: AssertionIndexes::default(),
            by_identity: HashMap::new(),
            by_index: HashMap::new(),
        }
    }

    /// Restrict the matcher to types below the given roots.
    pub fn scoped(mut self, name: impl Into<String>, roots: Vec<Identity>) -> Self {
        self.name = name.into();
        self.scope = Some(roots);
        self
    }

    /// The constant registry handle (shared with external query builders).
    pub fn constants(&self) -> &Arc<ConstantRegistry> {
        &self.constants
    }

    /// Number of triples currently stored.
    pub fn len(&self) -> SeshatResult<usize> {
        let mut count = 0;
        let results = self
            .store
            .query("SELECT ?s WHERE { GRAPH ?g { ?s ?p ?o } }")
            .map_err(|e| sparql_err("count query failed", e))?;
        if let QueryResults::Solutions(solutions) = results {
            for solution in solutions {
                solution.map_err(|e| sparql_err("solution error", e))?;
                count += 1;
            }
        }
        Ok(count)
    }

    /// Whether no triples are stored.
    pub fn is_empty(&self) -> SeshatResult<bool> {
        self.len().map(|n| n == 0)
    }

    // -- assertion rendering ------------------------------------------------

    fn named(&self, iri: String) -> Result<NamedNode, MatchError> {
        NamedNode::new(iri).map_err(|e| sparql_err("invalid IRI", e))
    }

    /// Render an assertion network into quads under the given graph base.
    ///
    /// Fails fast on indefinite numbers and disjunctive types; no quads are
    /// produced on error.
    fn render_assertion(&self, network: &Network, base: &str) -> Result<Vec<Quad>, MatchError> {
        let graph = GraphName::NamedNode(self.named(base.to_string())?);
        let mut quads = Vec::new();
        let mut counter = 0usize;
        self.render_node(&network.root, base, &graph, &mut counter, &mut quads)?;
        Ok(quads)
    }

    fn render_node(
        &self,
        node: &NetworkNode,
        base: &str,
        graph: &GraphName,
        counter: &mut usize,
        quads: &mut Vec<Quad>,
    ) -> Result<NamedNode, MatchError> {
        if !node.disjunct_types.is_empty() {
            return Err(MatchError::DisjunctiveAssertion {
                count: node.disjunct_types.len() + 1,
            });
        }
        let subject = self.named(format!("{base}#n{counter}"))?;
        *counter += 1;

        let rdf_type = self.named(RDF_TYPE.to_string())?;
        let type_iri = self.named(self.constants.iri(&node.ty.id))?;
        quads.push(Quad::new(subject.clone(), rdf_type, type_iri, graph.clone()));

        for slot in &node.slots {
            let predicate = self.named(self.constants.iri(&slot.id.id))?;
            for value in &slot.values {
                let object: Term = match value {
                    NetworkValue::Node(child) => {
                        let child_node = self.render_node(child, base, graph, counter, quads)?;
                        child_node.into()
                    }
                    NetworkValue::Number(spec) => match spec.exact {
                        Some(v) => Literal::from(v).into(),
                        None => {
                            return Err(MatchError::IndefiniteNumber {
                                slot: slot.id.id.clone(),
                            });
                        }
                    },
                    NetworkValue::Text(text) => Literal::from(text.as_str()).into(),
                    NetworkValue::Reference(id) => {
                        self.named(self.constants.iri(&format!("ref:{}", id.id)))?.into()
                    }
                };
                quads.push(Quad::new(subject.clone(), predicate.clone(), object, graph.clone()));
            }
        }
        Ok(subject)
    }

    // -- query rendering ----------------------------------------------------

    /// Render a query network's graph pattern (triples plus filters).
    fn render_pattern(&self, query: &NetworkNode) -> String {
        let mut renderer = QueryRenderer {
            types: &*self.types,
            constants: &self.constants,
            next_var: 0,
            body: String::new(),
        };
        let root = renderer.fresh_var("f");
        renderer.node_pattern(query, &root);
        renderer.body
    }

    fn drop_graph(&self, base: &str) -> Result<(), MatchError> {
        self.store
            .update(&format!("DROP SILENT GRAPH <{base}>"))
            .map_err(|e| sparql_err("drop graph failed", e))
    }
}

impl Matcher for SparqlMatcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn handles_type(&self, ty: &Identity) -> bool {
        match &self.scope {
            None => true,
            Some(roots) => roots.iter().any(|root| self.types.subsumes(root, ty)),
        }
    }

    fn requires_rebuild(&self) -> bool {
        // The identity ↔ assertion-index map lives in memory.
        true
    }

    fn add(&mut self, network: Network, identity: Identity) -> SeshatResult<()> {
        // Render before touching any state so construction errors leave the
        // store unchanged.
        let probe = self.render_assertion(&network, &graph_base(0))?;
        drop(probe);

        if let Some(&stale) = self.by_identity.get(&identity) {
            self.drop_graph(&graph_base(stale))?;
            self.by_index.remove(&stale);
            self.indexes.release(stale);
        }
        let index = self.indexes.allocate();
        let base = graph_base(index);
        let quads = self.render_assertion(&network, &base)?;
        for quad in &quads {
            if let Err(e) = self.store.insert(quad) {
                // Roll back the partial graph; the assertion index goes back
                // on the free list.
                let _ = self.drop_graph(&base);
                self.indexes.release(index);
                return Err(sparql_err("insert failed", e).into());
            }
        }
        self.by_identity.insert(identity.clone(), index);
        self.by_index.insert(index, identity);
        Ok(())
    }

    fn remove(&mut self, identity: &Identity) -> SeshatResult<()> {
        let Some(index) = self.by_identity.remove(identity) else {
            return Ok(());
        };
        self.by_index.remove(&index);
        self.drop_graph(&graph_base(index))?;
        self.indexes.release(index);
        Ok(())
    }

    fn query(&self, query: &Network) -> SeshatResult<Vec<Identity>> {
        let pattern = self.render_pattern(&query.root);
        let sparql = format!("SELECT DISTINCT ?g WHERE {{ GRAPH ?g {{ {pattern} }} }}");
        tracing::debug!(query = %sparql, "executing SELECT");
        let results = self
            .store
            .query(&sparql)
            .map_err(|e| sparql_err("SELECT failed", e))?;

        let mut hits = Vec::new();
        match results {
            QueryResults::Solutions(solutions) => {
                for solution in solutions {
                    let solution = solution.map_err(|e| sparql_err("solution error", e))?;
                    if let Some(Term::NamedNode(node)) = solution.get("g") {
                        if let Some(index) = parse_graph_base(node.as_str()) {
                            // Unmapped graphs (none in steady state) are skipped.
                            if let Some(identity) = self.by_index.get(&index) {
                                hits.push(identity.clone());
                            }
                        }
                    }
                }
            }
            _ => {
                return Err(sparql_err("SELECT", "unexpected result type").into());
            }
        }
        hits.sort();
        Ok(hits)
    }

    fn matches(&self, query: &Network, identity: &Identity) -> SeshatResult<bool> {
        let Some(&index) = self.by_identity.get(identity) else {
            return Ok(false);
        };
        let pattern = self.render_pattern(&query.root);
        let base = graph_base(index);
        let sparql = format!("ASK {{ GRAPH <{base}> {{ {pattern} }} }}");
        tracing::debug!(query = %sparql, "executing ASK");
        let results = self
            .store
            .query(&sparql)
            .map_err(|e| sparql_err("ASK failed", e))?;
        match results {
            QueryResults::Boolean(b) => Ok(b),
            _ => Err(sparql_err("ASK", "expected boolean result").into()),
        }
    }

    fn stop(&mut self) {
        self.by_identity.clear();
        self.by_index.clear();
        self.indexes = AssertionIndexes::default();
    }
}

impl std::fmt::Debug for SparqlMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SparqlMatcher")
            .field("name", &self.name)
            .field("indexed", &self.by_identity.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Query pattern renderer
// ---------------------------------------------------------------------------

struct QueryRenderer<'a> {
    types: &'a dyn TypeSystem,
    constants: &'a ConstantRegistry,
    next_var: usize,
    body: String,
}

impl QueryRenderer<'_> {
    fn fresh_var(&mut self, prefix: &str) -> String {
        let var = format!("?{prefix}{}", self.next_var);
        self.next_var += 1;
        var
    }

    fn node_pattern(&mut self, node: &NetworkNode, subject: &str) {
        self.type_pattern(node, subject);
        for slot in &node.slots {
            let predicate = format!("<{}>", self.constants.iri(&slot.id.id));
            if slot.values.is_empty() {
                // Slot presence only.
                let any = self.fresh_var("v");
                self.body.push_str(&format!("{subject} {predicate} {any} . "));
                continue;
            }
            for value in &slot.values {
                match value {
                    NetworkValue::Node(child) => {
                        let child_var = self.fresh_var("f");
                        self.body.push_str(&format!("{subject} {predicate} {child_var} . "));
                        self.node_pattern(child, &child_var);
                    }
                    NetworkValue::Number(spec) => {
                        // Numbers always go through a bound variable and
                        // FILTER so value comparison applies, never literal
                        // term equality.
                        let var = self.fresh_var("v");
                        self.body.push_str(&format!("{subject} {predicate} {var} . "));
                        if let Some(exact) = spec.exact {
                            self.body.push_str(&format!("FILTER({var} = {exact}) "));
                        } else {
                            if let Some(min) = spec.min {
                                self.body.push_str(&format!("FILTER({var} >= {min}) "));
                            }
                            if let Some(max) = spec.max {
                                self.body.push_str(&format!("FILTER({var} <= {max}) "));
                            }
                        }
                    }
                    NetworkValue::Text(text) => {
                        self.body
                            .push_str(&format!("{subject} {predicate} \"{}\" . ", escape(text)));
                    }
                    NetworkValue::Reference(id) => {
                        let iri = self.constants.iri(&format!("ref:{}", id.id));
                        self.body.push_str(&format!("{subject} {predicate} <{iri}> . "));
                    }
                }
            }
        }
    }

    /// Type constraint for a query node.
    ///
    /// The stored graph carries only each frame's direct type, so every type
    /// alternative expands to itself plus its descendants; more than one
    /// resulting alternative renders as a UNION of rdf:type triples.
    fn type_pattern(&mut self, node: &NetworkNode, subject: &str) {
        let mut alternatives: Vec<String> = Vec::new();
        for ty in node.type_disjunction() {
            let mut closure = vec![ty.clone()];
            closure.extend(self.types.descendants(ty));
            for t in closure {
                let iri = self.constants.iri(&t.id);
                if !alternatives.contains(&iri) {
                    alternatives.push(iri);
                }
            }
        }
        match alternatives.len() {
            0 => {}
            1 => {
                self.body
                    .push_str(&format!("{subject} <{RDF_TYPE}> <{}> . ", alternatives[0]));
            }
            _ => {
                let blocks: Vec<String> = alternatives
                    .iter()
                    .map(|iri| format!("{{ {subject} <{RDF_TYPE}> <{iri}> . }}"))
                    .collect();
                self.body.push_str(&blocks.join(" UNION "));
                self.body.push(' ');
            }
        }
    }
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
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

    fn matcher() -> SparqlMatcher {
        SparqlMatcher::in_memory(types()).unwrap()
    }

    fn net(frame: &Frame) -> Network {
        Network::from_frame(frame)
    }

    fn patient(age: f64) -> Frame {
        Frame::assertion("Patient")
            .with_slot(Slot::new("hasAge").with_value(Value::Number(NumberSpec::exact(age))))
    }

    #[test]
    fn constant_registry_round_trips() {
        let constants = ConstantRegistry::new();
        let a = constants.intern("Patient");
        let b = constants.intern("Patient");
        assert_eq!(a, b);
        assert_eq!(constants.resolve(a).unwrap(), "Patient");
        assert_ne!(constants.intern("Address"), a);
    }

    #[test]
    fn graph_base_round_trips() {
        assert_eq!(parse_graph_base(&graph_base(17)), Some(17));
        assert_eq!(parse_graph_base("https://elsewhere/assertion/17"), None);
    }

    #[test]
    fn identical_query_matches_assertion() {
        let mut m = matcher();
        m.add(net(&patient(42.0)), Identity::new("p1")).unwrap();

        let mut query = patient(42.0);
        query.function = FrameFunction::Query;
        assert!(m.matches(&net(&query), &Identity::new("p1")).unwrap());

        m.remove(&Identity::new("p1")).unwrap();
        assert!(!m.matches(&net(&query), &Identity::new("p1")).unwrap());
    }

    #[test]
    fn range_query_uses_filter_comparison() {
        let mut m = matcher();
        m.add(net(&patient(42.0)), Identity::new("p1")).unwrap();
        m.add(net(&patient(67.0)), Identity::new("p2")).unwrap();

        let query = Frame::query("Patient").with_slot(
            Slot::new("hasAge").with_value(Value::Number(NumberSpec::range(30.0, 50.0).unwrap())),
        );
        assert_eq!(m.query(&net(&query)).unwrap(), vec![Identity::new("p1")]);

        let min_only = Frame::query("Patient")
            .with_slot(Slot::new("hasAge").with_value(Value::Number(NumberSpec::min(60.0))));
        assert_eq!(m.query(&net(&min_only)).unwrap(), vec![Identity::new("p2")]);
    }

    #[test]
    fn supertype_query_finds_subtype_instances() {
        let mut m = matcher();
        m.add(net(&patient(42.0)), Identity::new("p1")).unwrap();
        let query = Frame::query("Person");
        assert_eq!(m.query(&net(&query)).unwrap(), vec![Identity::new("p1")]);
    }

    #[test]
    fn disjunctive_query_types_render_as_union() {
        let mut m = matcher();
        m.add(net(&patient(42.0)), Identity::new("p1")).unwrap();
        m.add(net(&Frame::assertion("Address")), Identity::new("a1")).unwrap();

        let query = Frame::query("Patient").with_disjunct("Address");
        let hits = m.query(&net(&query)).unwrap();
        assert_eq!(hits, vec![Identity::new("a1"), Identity::new("p1")]);
    }

    #[test]
    fn indefinite_assertion_fails_fast() {
        let mut m = matcher();
        let bad = Frame::assertion("Patient")
            .with_slot(Slot::new("hasAge").with_value(Value::Number(NumberSpec::min(30.0))));
        let err = m.add(net(&bad), Identity::new("p1")).unwrap_err();
        assert!(format!("{err}").contains("indefinite"));
        // Nothing was indexed.
        assert!(m.is_empty().unwrap());
        assert!(m.query(&net(&Frame::query("Patient"))).unwrap().is_empty());
    }

    #[test]
    fn disjunctive_assertion_fails_fast() {
        let mut m = matcher();
        let bad = Frame::assertion("Patient").with_disjunct("Person");
        let err = m.add(net(&bad), Identity::new("p1")).unwrap_err();
        assert!(format!("{err}").contains("disjunctive"));
        assert!(m.is_empty().unwrap());
    }

    #[test]
    fn reference_values_match_by_identity() {
        let mut m = matcher();
        let inst = Frame::assertion("Patient")
            .with_slot(Slot::new("hasAddress").with_value(Value::Reference(Identity::new("addr1"))));
        m.add(net(&inst), Identity::new("p1")).unwrap();

        let query = Frame::query("Patient")
            .with_slot(Slot::new("hasAddress").with_value(Value::Reference(Identity::new("addr1"))));
        assert_eq!(m.query(&net(&query)).unwrap(), vec![Identity::new("p1")]);

        let other = Frame::query("Patient")
            .with_slot(Slot::new("hasAddress").with_value(Value::Reference(Identity::new("addr2"))));
        assert!(m.query(&net(&other)).unwrap().is_empty());
    }

    #[test]
    fn nested_frames_render_as_linked_nodes() {
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
        assert_eq!(m.query(&net(&query)).unwrap(), vec![Identity::new("p1")]);
        assert!(m.matches(&net(&query), &Identity::new("p1")).unwrap());
    }

    #[test]
    fn assertion_indices_are_reused_smallest_first() {
        let mut m = matcher();
        m.add(net(&patient(1.0)), Identity::new("a")).unwrap();
        m.add(net(&patient(2.0)), Identity::new("b")).unwrap();
        m.remove(&Identity::new("a")).unwrap();
        m.add(net(&patient(3.0)), Identity::new("c")).unwrap();
        // "c" reuses the assertion index "a" released.
        assert_eq!(m.by_identity[&Identity::new("c")], 0);
        assert_eq!(m.by_identity[&Identity::new("b")], 1);
    }

    #[test]
    fn remove_unknown_identity_is_noop() {
        let mut m = matcher();
        m.remove(&Identity::new("ghost")).unwrap();
    }
}
