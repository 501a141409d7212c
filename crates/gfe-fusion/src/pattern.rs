//! The fusion pattern DSL.
//!
//! A [`FusionPattern`] names a handful of pattern nodes, constrains each
//! to a set of acceptable operator types, and states which pattern node
//! must feed which (optionally at a fixed input position). Exactly one
//! pattern node is the sink the matcher anchors on. Patterns are built
//! through [`PatternBuilder`] and immutable once built.

use std::fmt;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use gfe_graph::NodeId;
use gfe_index::{Idx, IndexVec};
use gfe_intern::Symbol;

/// Index of a pattern node inside its pattern.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PatternNodeId(u32);

impl Idx for PatternNodeId {
    fn new(idx: usize) -> Self {
        Self(idx as u32)
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

/// A producer constraint on a pattern node.
#[derive(Clone, Copy, Debug)]
pub struct PatternEdge {
    /// The pattern node that must produce the value.
    pub producer: PatternNodeId,
    /// Required input position on the consumer, if pinned. Unpinned
    /// edges accept the first satisfying position in anchor order.
    pub position: Option<usize>,
}

/// One named, type-constrained node of a pattern.
#[derive(Clone, Debug)]
pub struct PatternNode {
    name: Symbol,
    types: Vec<Symbol>,
    inputs: SmallVec<[PatternEdge; 2]>,
}

impl PatternNode {
    /// The pattern node's name.
    #[must_use]
    pub fn name(&self) -> Symbol {
        self.name
    }

    /// True if `op_type` is in the accepted set.
    #[must_use]
    pub fn accepts(&self, op_type: Symbol) -> bool {
        self.types.contains(&op_type)
    }

    /// The producer edges into this pattern node.
    #[must_use]
    pub fn inputs(&self) -> &[PatternEdge] {
        &self.inputs
    }
}

/// Errors from pattern construction.
///
/// A malformed pattern is caught before any graph is touched; the
/// driver responds by skipping the offending pass.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    /// Two `add_op` calls used the same name.
    #[error("pattern node {0:?} declared twice")]
    DuplicateOpName(Symbol),

    /// An edge or the output designation referenced an undeclared name.
    #[error("pattern node {0:?} is not declared")]
    UnknownOpName(Symbol),

    /// A pattern node with no acceptable operator types can never match.
    #[error("pattern node {0:?} has an empty accepted-type set")]
    EmptyTypeSet(Symbol),

    /// `set_output` was never called.
    #[error("pattern {0:?} does not designate an output node")]
    NoOutput(Symbol),

    /// The producer edges form a cycle.
    #[error("pattern {0:?} has cyclic producer edges")]
    CyclicPattern(Symbol),
}

/// An immutable, validated fusion pattern.
#[derive(Clone, Debug)]
pub struct FusionPattern {
    name: Symbol,
    nodes: IndexVec<PatternNodeId, PatternNode>,
    by_name: FxHashMap<Symbol, PatternNodeId>,
    output: PatternNodeId,
}

impl FusionPattern {
    /// The pattern's name (used in logs).
    #[must_use]
    pub fn name(&self) -> Symbol {
        self.name
    }

    /// The designated sink pattern node.
    #[must_use]
    pub fn output(&self) -> PatternNodeId {
        self.output
    }

    /// Looks up a pattern node by id.
    #[must_use]
    pub fn node(&self, id: PatternNodeId) -> &PatternNode {
        &self.nodes[id]
    }

    /// Looks up a pattern node id by name.
    #[must_use]
    pub fn node_id(&self, name: Symbol) -> Option<PatternNodeId> {
        self.by_name.get(&name).copied()
    }

    /// Number of pattern nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Iterates `(id, node)` pairs in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = (PatternNodeId, &PatternNode)> {
        self.nodes.iter_enumerated()
    }
}

/// Chainable builder for [`FusionPattern`].
///
/// ```
/// use gfe_fusion::pattern::PatternBuilder;
///
/// let pattern = PatternBuilder::new("cast_chain")
///     .add_op("cast0", &["Cast"])
///     .add_op("cast1", &["Cast"])
///     .set_inputs("cast1", &["cast0"])
///     .set_output("cast1")
///     .build()
///     .unwrap();
/// assert_eq!(pattern.node_count(), 2);
/// ```
#[derive(Debug)]
pub struct PatternBuilder {
    name: Symbol,
    ops: Vec<(Symbol, Vec<Symbol>)>,
    edges: Vec<(Symbol, Symbol, Option<usize>)>,
    output: Option<Symbol>,
}

impl PatternBuilder {
    /// Starts a new pattern.
    #[must_use]
    pub fn new(name: impl Into<Symbol>) -> Self {
        Self {
            name: name.into(),
            ops: Vec::new(),
            edges: Vec::new(),
            output: None,
        }
    }

    /// Declares a pattern node accepting any of `types`.
    #[must_use]
    pub fn add_op(mut self, name: impl Into<Symbol>, types: &[&str]) -> Self {
        let types = types.iter().map(|t| Symbol::intern(t)).collect();
        self.ops.push((name.into(), types));
        self
    }

    /// Declares that each of `producers` must feed `consumer`, at no
    /// particular input position.
    #[must_use]
    pub fn set_inputs(mut self, consumer: impl Into<Symbol>, producers: &[&str]) -> Self {
        let consumer = consumer.into();
        for producer in producers {
            self.edges.push((consumer, Symbol::intern(producer), None));
        }
        self
    }

    /// Declares that `producer` must feed `consumer` at exactly input
    /// `position`.
    #[must_use]
    pub fn set_input_at(
        mut self,
        consumer: impl Into<Symbol>,
        position: usize,
        producer: impl Into<Symbol>,
    ) -> Self {
        self.edges.push((consumer.into(), producer.into(), Some(position)));
        self
    }

    /// Designates the sink pattern node the matcher anchors on.
    #[must_use]
    pub fn set_output(mut self, name: impl Into<Symbol>) -> Self {
        self.output = Some(name.into());
        self
    }

    /// Validates and freezes the pattern.
    pub fn build(self) -> Result<FusionPattern, PatternError> {
        let mut by_name = FxHashMap::default();
        let mut nodes: IndexVec<PatternNodeId, PatternNode> =
            IndexVec::with_capacity(self.ops.len());
        for (name, types) in self.ops {
            if types.is_empty() {
                return Err(PatternError::EmptyTypeSet(name));
            }
            let id = nodes.push(PatternNode {
                name,
                types,
                inputs: SmallVec::new(),
            });
            if by_name.insert(name, id).is_some() {
                return Err(PatternError::DuplicateOpName(name));
            }
        }

        for (consumer, producer, position) in self.edges {
            let &consumer_id = by_name
                .get(&consumer)
                .ok_or(PatternError::UnknownOpName(consumer))?;
            let &producer_id = by_name
                .get(&producer)
                .ok_or(PatternError::UnknownOpName(producer))?;
            nodes[consumer_id].inputs.push(PatternEdge {
                producer: producer_id,
                position,
            });
        }

        let output_name = self.output.ok_or(PatternError::NoOutput(self.name))?;
        let &output = by_name
            .get(&output_name)
            .ok_or(PatternError::UnknownOpName(output_name))?;

        check_acyclic(self.name, &nodes)?;

        Ok(FusionPattern {
            name: self.name,
            nodes,
            by_name,
            output,
        })
    }
}

/// Depth-first cycle check over producer edges.
fn check_acyclic(
    pattern: Symbol,
    nodes: &IndexVec<PatternNodeId, PatternNode>,
) -> Result<(), PatternError> {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Unvisited,
        InProgress,
        Done,
    }

    fn visit(
        nodes: &IndexVec<PatternNodeId, PatternNode>,
        states: &mut [State],
        id: PatternNodeId,
        pattern: Symbol,
    ) -> Result<(), PatternError> {
        match states[id.index()] {
            State::Done => return Ok(()),
            State::InProgress => return Err(PatternError::CyclicPattern(pattern)),
            State::Unvisited => {}
        }
        states[id.index()] = State::InProgress;
        for edge in &nodes[id].inputs {
            visit(nodes, states, edge.producer, pattern)?;
        }
        states[id.index()] = State::Done;
        Ok(())
    }

    let mut states = vec![State::Unvisited; nodes.len()];
    for id in nodes.indices() {
        visit(nodes, &mut states, id, pattern)?;
    }
    Ok(())
}

/// The binding of one successful match: pattern-node name to concrete
/// node. Consumed exactly once by the pass's rewrite callback.
#[derive(Clone, Debug)]
pub struct Mapping {
    pattern: Symbol,
    nodes: FxHashMap<Symbol, NodeId>,
}

impl Mapping {
    pub(crate) fn new(pattern: Symbol, nodes: FxHashMap<Symbol, NodeId>) -> Self {
        Self { pattern, nodes }
    }

    /// The pattern this mapping satisfies.
    #[must_use]
    pub fn pattern(&self) -> Symbol {
        self.pattern
    }

    /// The node bound to pattern node `name`.
    #[must_use]
    pub fn get(&self, name: impl Into<Symbol>) -> Option<NodeId> {
        self.nodes.get(&name.into()).copied()
    }

    /// Iterates the bound `(pattern-node name, node)` pairs.
    pub fn bindings(&self) -> impl Iterator<Item = (Symbol, NodeId)> + '_ {
        self.nodes.iter().map(|(name, id)| (*name, *id))
    }

    /// The bound node ids (unordered).
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.values().copied()
    }
}

impl fmt::Display for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.pattern)?;
        for (i, (name, id)) in self.bindings().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}={id}")?;
        }
        write!(f, "}}")
    }
}
