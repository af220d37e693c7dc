//! Network representation: the abstracted frame graph matchers operate on.
//!
//! Matchers never see the canonical stored [`Frame`] tree. Instead a free
//! copy is projected into a [`Network`], then run through the registered
//! [`NetworkTransform`]s in registration order. Transforms are the extension
//! point for normalization steps (de-duplication, canonical ordering, ...).

use serde::{Deserialize, Serialize};

use crate::frame::{Frame, FrameFunction, NumberSpec, Value};
use crate::identity::Identity;

/// A value inside a network node's slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NetworkValue {
    /// A nested node (inline frame, or a frame spliced in by expansion).
    Node(NetworkNode),
    /// A numeric value or interval.
    Number(NumberSpec),
    /// A text value.
    Text(String),
    /// An unexpanded reference to another stored instance.
    Reference(Identity),
}

/// A slot in the network form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSlot {
    /// Slot identity.
    pub id: Identity,
    /// Slot values.
    pub values: Vec<NetworkValue>,
}

/// A node in the network form of an instance or query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkNode {
    /// Primary type identity.
    pub ty: Identity,
    /// Alternative type identities (queries only).
    pub disjunct_types: Vec<Identity>,
    /// Assertion or query.
    pub function: FrameFunction,
    /// Slots.
    pub slots: Vec<NetworkSlot>,
}

impl NetworkNode {
    fn from_frame(frame: &Frame) -> Self {
        Self {
            ty: frame.ty.clone(),
            disjunct_types: frame.disjunct_types.clone(),
            function: frame.function,
            slots: frame
                .slots
                .iter()
                .map(|slot| NetworkSlot {
                    id: slot.id.clone(),
                    values: slot.values.iter().map(NetworkValue::from_value).collect(),
                })
                .collect(),
        }
    }

    /// All type alternatives: primary plus disjuncts.
    pub fn type_disjunction(&self) -> Vec<&Identity> {
        std::iter::once(&self.ty).chain(self.disjunct_types.iter()).collect()
    }
}

impl NetworkValue {
    fn from_value(value: &Value) -> Self {
        match value {
            Value::Frame(nested) => NetworkValue::Node(NetworkNode::from_frame(nested)),
            Value::Number(spec) => NetworkValue::Number(spec.clone()),
            Value::Text(text) => NetworkValue::Text(text.clone()),
            Value::Reference(id) => NetworkValue::Reference(id.clone()),
        }
    }
}

/// The network form of one instance or query: a rooted node graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    /// The root node.
    pub root: NetworkNode,
}

impl Network {
    /// Project a frame (normally a free copy) into network form.
    pub fn from_frame(frame: &Frame) -> Self {
        Self {
            root: NetworkNode::from_frame(frame),
        }
    }
}

/// A pluggable pre-processing step applied before matching.
pub trait NetworkTransform: Send + Sync {
    /// Name for logs.
    fn name(&self) -> &str;
    /// Transform the network in place.
    fn apply(&self, network: &mut Network);
}

/// Ordered pipeline of network transforms.
///
/// Transforms run in registration order on every network handed to a
/// matcher, for both indexing and querying.
#[derive(Default)]
pub struct NetworkPipeline {
    transforms: Vec<Box<dyn NetworkTransform>>,
}

impl NetworkPipeline {
    /// An empty pipeline (identity transformation).
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transform at the end of the pipeline.
    pub fn register(&mut self, transform: Box<dyn NetworkTransform>) {
        self.transforms.push(transform);
    }

    /// Build the network form of a frame and run every registered transform.
    pub fn process(&self, frame: &Frame) -> Network {
        let mut network = Network::from_frame(frame);
        for transform in &self.transforms {
            tracing::trace!(transform = transform.name(), "applying network transform");
            transform.apply(&mut network);
        }
        network
    }
}

impl std::fmt::Debug for NetworkPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkPipeline")
            .field("transforms", &self.transforms.iter().map(|t| t.name()).collect::<Vec<_>>())
            .finish()
    }
}

/// Removes duplicate values within each slot, preserving first occurrence.
#[derive(Debug, Default)]
pub struct DedupValues;

impl NetworkTransform for DedupValues {
    fn name(&self) -> &str {
        "dedup-values"
    }

    fn apply(&self, network: &mut Network) {
        dedup_node(&mut network.root);
    }
}

fn dedup_node(node: &mut NetworkNode) {
    for slot in &mut node.slots {
        let mut seen: Vec<NetworkValue> = Vec::new();
        slot.values.retain(|v| {
            if seen.contains(v) {
                false
            } else {
                seen.push(v.clone());
                true
            }
        });
        for value in &mut slot.values {
            if let NetworkValue::Node(child) = value {
                dedup_node(child);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Slot;

    #[test]
    fn projection_preserves_structure() {
        let frame = Frame::assertion("Patient")
            .with_slot(Slot::new("hasAge").with_value(Value::Number(NumberSpec::exact(42.0))))
            .with_slot(Slot::new("hasAddress").with_value(Value::Frame(Frame::assertion("Address"))));
        let net = Network::from_frame(&frame);
        assert_eq!(net.root.ty.id, "Patient");
        assert_eq!(net.root.slots.len(), 2);
        assert!(matches!(net.root.slots[1].values[0], NetworkValue::Node(_)));
    }

    #[test]
    fn pipeline_runs_transforms_in_order() {
        struct Tag(&'static str);
        impl NetworkTransform for Tag {
            fn name(&self) -> &str {
                self.0
            }
            fn apply(&self, network: &mut Network) {
                network.root.slots.push(NetworkSlot {
                    id: Identity::new(self.0),
                    values: vec![],
                });
            }
        }

        let mut pipeline = NetworkPipeline::new();
        pipeline.register(Box::new(Tag("first")));
        pipeline.register(Box::new(Tag("second")));
        let net = pipeline.process(&Frame::query("Q"));
        let order: Vec<&str> = net.root.slots.iter().map(|s| s.id.id.as_str()).collect();
        assert_eq!(order, vec!["first", "second"]);
    }

    #[test]
    fn dedup_removes_repeated_values() {
        let frame = Frame::assertion("Patient").with_slot(
            Slot::new("tag")
                .with_value(Value::Text("a".into()))
                .with_value(Value::Text("a".into()))
                .with_value(Value::Text("b".into())),
        );
        let mut pipeline = NetworkPipeline::new();
        pipeline.register(Box::new(DedupValues));
        let net = pipeline.process(&frame);
        assert_eq!(net.root.slots[0].values.len(), 2);
    }
}
