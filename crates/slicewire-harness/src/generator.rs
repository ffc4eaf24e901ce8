//! Random object graphs.
//!
//! A [`GraphSpec`] is a registry-independent description of a graph: node
//! kinds, field contents, and links given as indices into the node list. It
//! can come from a seeded [`GraphGenerator`] or from fuzzer bytes via
//! [`arbitrary`]. [`GraphSpec::build`] turns it into a real [`Graph`] over the
//! fixture registry.

use std::fmt;

use arbitrary::{Arbitrary, Unstructured};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use slicewire_core::{
    FieldError, Graph, Instance, ObjectId, RegistryError, TypeId, TypeRegistry, Value,
};
use tracing::debug;

use crate::fixtures::{BASE, DERIVED, LEAF, NODE};

/// Nodes beyond this are ignored when building.
pub const MAX_NODES: usize = 32;
/// Links beyond this are ignored per node.
pub const MAX_LINKS: usize = 4;
/// Roots beyond this are ignored.
pub const MAX_ROOTS: usize = 4;

/// Fixture type of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
pub enum NodeKind {
    /// `::Test::Base`
    Base,
    /// `::Test::Derived`
    Derived,
    /// `::Test::Node`
    Node,
    /// `::Test::Leaf`
    Leaf,
}

impl NodeKind {
    /// Fixture type id.
    pub fn type_id(self) -> &'static str {
        match self {
            Self::Base => BASE,
            Self::Derived => DERIVED,
            Self::Node => NODE,
            Self::Leaf => LEAF,
        }
    }

    /// Type a root of this kind is decoded as.
    pub fn expected_root(self) -> &'static str {
        match self {
            Self::Derived => BASE,
            other => other.type_id(),
        }
    }
}

/// Contents of one node. Fields a kind does not have are ignored.
#[derive(Debug, Clone, PartialEq, Arbitrary)]
pub struct NodeSpec {
    /// Fixture type
    pub kind: NodeKind,
    /// `id` or `value`
    pub number: i32,
    /// `extra`
    pub wide: i64,
    /// `point`
    pub real: f32,
    /// `count`
    pub small: i16,
    /// `flag`
    pub flag: bool,
    /// `label`
    pub text: String,
    /// Optional `note`
    pub note: Option<String>,
    /// Optional `weight`
    pub weight: Option<f64>,
    /// Optional `big`
    pub big: Option<i32>,
    /// `bytes`
    pub bytes: Vec<u8>,
    /// `next`, `other` for nodes, `peers` for derived; indices wrap
    pub links: Vec<Option<u8>>,
    /// Optional `owner`: absent, null, or a link
    pub owner: Option<Option<u8>>,
}

/// Description of a whole graph.
#[derive(Debug, Clone, Default, PartialEq, Arbitrary)]
pub struct GraphSpec {
    /// Nodes in insertion order
    pub nodes: Vec<NodeSpec>,
    /// Roots as node indices; indices wrap
    pub roots: Vec<Option<u8>>,
}

/// A graph built from a [`GraphSpec`], ready to encode.
#[derive(Debug, Clone)]
pub struct BuiltGraph {
    /// The arena
    pub graph: Graph,
    /// Roots to encode
    pub roots: Vec<Option<ObjectId>>,
    /// Root types to decode against
    pub expected: Vec<TypeId>,
}

/// Failure to build a graph over a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// A fixture type is missing from the registry
    Registry(RegistryError),
    /// A field could not be set
    Field(FieldError),
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registry(e) => write!(f, "registry: {e}"),
            Self::Field(e) => write!(f, "field: {e}"),
        }
    }
}

impl std::error::Error for BuildError {}

impl From<RegistryError> for BuildError {
    fn from(e: RegistryError) -> Self {
        Self::Registry(e)
    }
}

impl From<FieldError> for BuildError {
    fn from(e: FieldError) -> Self {
        Self::Field(e)
    }
}

impl GraphSpec {
    /// Spec drawn from raw fuzzer or proptest bytes.
    pub fn from_bytes(data: &[u8]) -> arbitrary::Result<Self> {
        Self::arbitrary_take_rest(Unstructured::new(data))
    }

    /// Build the graph over `registry`, which must hold the fixture types.
    pub fn build(&self, registry: &TypeRegistry) -> Result<BuiltGraph, BuildError> {
        let nodes = &self.nodes[..self.nodes.len().min(MAX_NODES)];
        let mut graph = Graph::new();
        let mut ids = Vec::with_capacity(nodes.len());

        for spec in nodes {
            let mut instance = registry.instantiate(spec.kind.type_id())?;
            fill(&mut instance, spec)?;
            ids.push(graph.insert(instance));
        }

        let target = |link: Option<u8>| -> Option<ObjectId> {
            let link = usize::from(link?);
            ids.get(link % ids.len().max(1)).copied()
        };

        for (spec, &id) in nodes.iter().zip(&ids) {
            let Some(instance) = graph.get_mut(id) else { continue };
            let links = &spec.links[..spec.links.len().min(MAX_LINKS)];
            match spec.kind {
                NodeKind::Node => {
                    instance.set("next", target(links.first().copied().flatten()))?;
                    instance.set("other", target(links.get(1).copied().flatten()))?;
                },
                NodeKind::Derived => {
                    let peers = links.iter().map(|&l| Value::Object(target(l))).collect();
                    instance.set("peers", Value::Sequence(peers))?;
                    if let Some(owner) = spec.owner {
                        instance.set("owner", target(owner))?;
                    }
                },
                NodeKind::Base | NodeKind::Leaf => {},
            }
        }

        let mut roots = Vec::new();
        let mut expected = Vec::new();
        for &root in self.roots.iter().take(MAX_ROOTS) {
            let id = target(root);
            let kind = id.and_then(|id| nodes.get(id.index())).map_or(NodeKind::Node, |n| n.kind);
            roots.push(id);
            expected.push(TypeId::from(kind.expected_root()));
        }

        debug!(nodes = ids.len(), roots = roots.len(), "built graph");
        Ok(BuiltGraph { graph, roots, expected })
    }
}

fn fill(instance: &mut Instance, spec: &NodeSpec) -> Result<(), FieldError> {
    match spec.kind {
        NodeKind::Base | NodeKind::Derived => {
            instance.set("id", spec.number)?;
            instance.set("label", spec.text.as_str())?;
            if let Some(note) = &spec.note {
                instance.set("note", note.as_str())?;
            }
            if let Some(weight) = spec.weight {
                instance.set("weight", Value::Double(weight))?;
            }
            if spec.kind == NodeKind::Derived {
                instance.set("extra", spec.wide)?;
                let point = vec![Value::Float(spec.real), Value::Float(-spec.real)];
                instance.set("point", Value::Struct(point))?;
                if let Some(big) = spec.big {
                    instance.set("big", big)?;
                }
            }
        },
        NodeKind::Node => instance.set("value", spec.number)?,
        NodeKind::Leaf => {
            instance.set("flag", spec.flag)?;
            instance.set("count", Value::Short(spec.small))?;
            let bytes = spec.bytes.iter().map(|&b| Value::Byte(b)).collect();
            instance.set("bytes", Value::Sequence(bytes))?;
        },
    }
    Ok(())
}

/// Seeded source of [`GraphSpec`]s; the same seed always yields the same
/// sequence of graphs.
#[derive(Debug, Clone)]
pub struct GraphGenerator {
    rng: ChaCha8Rng,
}

impl GraphGenerator {
    /// Generator for `seed`.
    pub fn new(seed: u64) -> Self {
        Self { rng: ChaCha8Rng::seed_from_u64(seed) }
    }

    /// A graph of `nodes` nodes, linked at random, with up to
    /// [`MAX_ROOTS`] roots.
    pub fn spec(&mut self, nodes: usize) -> GraphSpec {
        let nodes = nodes.min(MAX_NODES);
        let node_specs = (0..nodes).map(|_| self.node(nodes)).collect();
        let root_count = self.rng.gen_range(0..=MAX_ROOTS);
        let roots = (0..root_count).map(|_| self.link(nodes)).collect();
        GraphSpec { nodes: node_specs, roots }
    }

    fn node(&mut self, nodes: usize) -> NodeSpec {
        let kind = match self.rng.gen_range(0..4) {
            0 => NodeKind::Base,
            1 => NodeKind::Derived,
            2 => NodeKind::Node,
            _ => NodeKind::Leaf,
        };
        let link_count = self.rng.gen_range(0..=MAX_LINKS);
        let byte_count = self.rng.gen_range(0..8);

        NodeSpec {
            kind,
            number: self.rng.r#gen(),
            wide: self.rng.r#gen(),
            real: self.rng.gen_range(-1.0e6..1.0e6),
            small: self.rng.r#gen(),
            flag: self.rng.gen_bool(0.5),
            text: self.text(),
            note: self.rng.gen_bool(0.5).then(|| self.text()),
            weight: self.rng.gen_bool(0.5).then(|| self.rng.r#gen()),
            big: self.rng.gen_bool(0.3).then(|| self.rng.r#gen()),
            bytes: (0..byte_count).map(|_| self.rng.r#gen()).collect(),
            links: (0..link_count).map(|_| self.link(nodes)).collect(),
            owner: self.rng.gen_bool(0.5).then(|| self.link(nodes)),
        }
    }

    fn link(&mut self, nodes: usize) -> Option<u8> {
        if nodes == 0 || self.rng.gen_bool(0.25) {
            return None;
        }
        u8::try_from(self.rng.gen_range(0..nodes)).ok()
    }

    fn text(&mut self) -> String {
        let len = self.rng.gen_range(0..12);
        (0..len).map(|_| char::from(self.rng.gen_range(b'a'..=b'z'))).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn same_seed_same_spec() {
        let a = GraphGenerator::new(7).spec(10);
        let b = GraphGenerator::new(7).spec(10);
        assert_eq!(a, b);
    }

    #[test]
    fn links_wrap_into_range() {
        let registry = fixtures::registry().unwrap();
        let spec = GraphSpec {
            nodes: vec![NodeSpec {
                kind: NodeKind::Node,
                number: 3,
                wide: 0,
                real: 0.0,
                small: 0,
                flag: false,
                text: String::new(),
                note: None,
                weight: None,
                big: None,
                bytes: Vec::new(),
                links: vec![Some(200), None],
                owner: None,
            }],
            roots: vec![Some(5)],
        };

        let built = spec.build(&registry).unwrap();
        let root = built.roots[0].unwrap();
        let node = built.graph.get(root).unwrap();
        assert_eq!(node.get("next"), Some(&Value::Object(Some(root))));
        assert_eq!(node.get("other"), Some(&Value::Object(None)));
    }

    #[test]
    fn empty_spec_has_null_roots() {
        let registry = fixtures::registry().unwrap();
        let spec = GraphSpec { nodes: Vec::new(), roots: vec![Some(1), None] };
        let built = spec.build(&registry).unwrap();
        assert!(built.graph.is_empty());
        assert_eq!(built.roots, vec![None, None]);
    }
}
