//! Node and edge storage for the compute graph.

use std::fmt;

use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use gfe_index::Idx;
use gfe_intern::Symbol;

use crate::op::OpDesc;
use crate::{AnchorKind, GraphError, NodeId};

/// Operator type of subgraph input placeholder nodes.
pub const DATA_OP: &str = "Data";

/// Operator type of the subgraph output sink node.
pub const NET_OUTPUT_OP: &str = "NetOutput";

/// A producing anchor: output `index` of `node`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutAnchor {
    /// Owning node.
    pub node: NodeId,
    /// Output position on the node.
    pub index: usize,
}

impl OutAnchor {
    /// Creates an output anchor handle.
    #[must_use]
    pub fn new(node: NodeId, index: usize) -> Self {
        Self { node, index }
    }
}

impl fmt::Display for OutAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.index)
    }
}

/// A consuming anchor: input `index` of `node`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InAnchor {
    /// Owning node.
    pub node: NodeId,
    /// Input position on the node.
    pub index: usize,
}

impl InAnchor {
    /// Creates an input anchor handle.
    #[must_use]
    pub fn new(node: NodeId, index: usize) -> Self {
        Self { node, index }
    }
}

impl fmt::Display for InAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.index)
    }
}

/// A node and its peer tables.
///
/// Owned exclusively by a [`ComputeGraph`]; mutate it only through the
/// graph's checked operations (plus [`Node::op_mut`] for attribute and
/// descriptor edits that do not touch connectivity).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Node {
    id: NodeId,
    op: OpDesc,
    /// Producer per input position; at most one peer each.
    in_data: Vec<Option<OutAnchor>>,
    /// Consumers per output position; fan-out is unbounded.
    out_data: Vec<Vec<InAnchor>>,
    /// Control predecessors.
    in_ctrl: Vec<NodeId>,
    /// Control successors.
    out_ctrl: Vec<NodeId>,
}

impl Node {
    /// The node's id within its graph.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The operator descriptor.
    #[must_use]
    pub fn op(&self) -> &OpDesc {
        &self.op
    }

    /// Mutable operator descriptor (attributes, descriptors, retyping).
    #[must_use]
    pub fn op_mut(&mut self) -> &mut OpDesc {
        &mut self.op
    }

    /// The producer feeding input `index`, if bound.
    #[must_use]
    pub fn input_peer(&self, index: usize) -> Option<OutAnchor> {
        self.in_data.get(index).copied().flatten()
    }

    /// Producers per input position, in anchor order.
    #[must_use]
    pub fn input_peers(&self) -> &[Option<OutAnchor>] {
        &self.in_data
    }

    /// Consumers of output `index`.
    #[must_use]
    pub fn consumers(&self, index: usize) -> &[InAnchor] {
        const EMPTY: &[InAnchor] = &[];
        self.out_data.get(index).map_or(EMPTY, Vec::as_slice)
    }

    /// Control predecessor nodes.
    #[must_use]
    pub fn control_preds(&self) -> &[NodeId] {
        &self.in_ctrl
    }

    /// Control successor nodes.
    #[must_use]
    pub fn control_succs(&self) -> &[NodeId] {
        &self.out_ctrl
    }

    /// True if no data or control edge touches this node.
    #[must_use]
    pub fn is_unlinked(&self) -> bool {
        self.in_data.iter().all(Option::is_none)
            && self.out_data.iter().all(Vec::is_empty)
            && self.in_ctrl.is_empty()
            && self.out_ctrl.is_empty()
    }
}

/// A nested subgraph attached to a parent node.
///
/// `inputs[i]` is the subgraph's placeholder node receiving the
/// parent's argument `i`; `outputs[i]` is the subgraph anchor producing
/// the parent's result `i` (for a Cond graph, the single predicate).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubgraphBinding {
    /// The node this subgraph belongs to.
    pub parent: NodeId,
    /// Role of the subgraph on its parent (e.g. `cond`, `body`).
    pub role: Symbol,
    /// The nested graph.
    pub graph: ComputeGraph,
    /// Parent input index -> placeholder node.
    pub inputs: Vec<NodeId>,
    /// Parent output index -> producing subgraph anchor.
    pub outputs: Vec<OutAnchor>,
}

/// An owned, mutable dataflow graph.
///
/// Nodes iterate in insertion order, which is the engine's only
/// deterministic ordering guarantee; passes must not rely on id values
/// beyond identity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComputeGraph {
    name: Symbol,
    nodes: IndexMap<NodeId, Node>,
    next_node: u32,
    subgraphs: Vec<SubgraphBinding>,
}

impl ComputeGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new(name: impl Into<Symbol>) -> Self {
        Self {
            name: name.into(),
            nodes: IndexMap::new(),
            next_node: 0,
            subgraphs: Vec::new(),
        }
    }

    /// The graph's name.
    #[must_use]
    pub fn name(&self) -> Symbol {
        self.name
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// True if `id` names a node in this graph.
    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Looks up a node.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Looks up a node mutably.
    #[must_use]
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    /// Iterates nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Iterates node ids in insertion order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Adds a node; the graph takes exclusive ownership.
    ///
    /// Anchor tables are sized from the descriptor's declared
    /// input/output counts.
    pub fn add_node(&mut self, op: OpDesc) -> NodeId {
        let id = NodeId::new(self.next_node as usize);
        self.next_node += 1;
        let node = Node {
            id,
            in_data: vec![None; op.input_count()],
            out_data: vec![Vec::new(); op.output_count()],
            in_ctrl: Vec::new(),
            out_ctrl: Vec::new(),
            op,
        };
        self.nodes.insert(id, node);
        id
    }

    /// Removes a fully unlinked node, returning its descriptor.
    ///
    /// Fails with [`GraphError::NodeStillConnected`] if any anchor still
    /// has a peer; callers unlink first ([`ComputeGraph::unlink_node`]).
    /// Subgraph bindings parented on the node are detached with it.
    pub fn remove_node(&mut self, id: NodeId) -> Result<OpDesc, GraphError> {
        let node = self.nodes.get(&id).ok_or(GraphError::NodeNotFound(id))?;
        if !node.is_unlinked() {
            return Err(GraphError::NodeStillConnected { node: id });
        }
        self.subgraphs.retain(|binding| binding.parent != id);
        let node = self.nodes.shift_remove(&id).ok_or(GraphError::NodeNotFound(id))?;
        Ok(node.op)
    }

    /// Connects a data edge.
    ///
    /// Fails with [`GraphError::InputAlreadyBound`] if the consumer slot
    /// already has a producer: disconnect the prior peer first.
    pub fn connect_data(&mut self, from: OutAnchor, to: InAnchor) -> Result<(), GraphError> {
        self.check_out_anchor(from)?;
        self.check_in_anchor(to)?;
        let consumer = self.nodes.get(&to.node).ok_or(GraphError::NodeNotFound(to.node))?;
        if consumer.in_data[to.index].is_some() {
            return Err(GraphError::InputAlreadyBound {
                node: to.node,
                index: to.index,
            });
        }
        self.nodes.get_mut(&from.node).expect("checked above").out_data[from.index].push(to);
        self.nodes.get_mut(&to.node).expect("checked above").in_data[to.index] = Some(from);
        Ok(())
    }

    /// Disconnects a data edge. A no-op if the edge is absent; fails
    /// only for invalid anchor references.
    pub fn disconnect_data(&mut self, from: OutAnchor, to: InAnchor) -> Result<(), GraphError> {
        self.check_out_anchor(from)?;
        self.check_in_anchor(to)?;
        let consumer = self.nodes.get_mut(&to.node).expect("checked above");
        if consumer.in_data[to.index] == Some(from) {
            consumer.in_data[to.index] = None;
        }
        let producer = self.nodes.get_mut(&from.node).expect("checked above");
        producer.out_data[from.index].retain(|&peer| peer != to);
        Ok(())
    }

    /// Connects a control edge from `from` to `to`. Idempotent.
    pub fn connect_control(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError> {
        if !self.contains(from) {
            return Err(GraphError::NodeNotFound(from));
        }
        if !self.contains(to) {
            return Err(GraphError::NodeNotFound(to));
        }
        let src = self.nodes.get_mut(&from).expect("checked above");
        if !src.out_ctrl.contains(&to) {
            src.out_ctrl.push(to);
        }
        let dst = self.nodes.get_mut(&to).expect("checked above");
        if !dst.in_ctrl.contains(&from) {
            dst.in_ctrl.push(from);
        }
        Ok(())
    }

    /// Disconnects a control edge. A no-op if the edge is absent.
    pub fn disconnect_control(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError> {
        if !self.contains(from) {
            return Err(GraphError::NodeNotFound(from));
        }
        if !self.contains(to) {
            return Err(GraphError::NodeNotFound(to));
        }
        self.nodes.get_mut(&from).expect("checked above").out_ctrl.retain(|&n| n != to);
        self.nodes.get_mut(&to).expect("checked above").in_ctrl.retain(|&n| n != from);
        Ok(())
    }

    /// Removes every data and control edge touching `id`.
    pub fn unlink_node(&mut self, id: NodeId) -> Result<(), GraphError> {
        let node = self.nodes.get(&id).ok_or(GraphError::NodeNotFound(id))?;
        let inputs: Vec<(usize, OutAnchor)> = node
            .in_data
            .iter()
            .enumerate()
            .filter_map(|(i, peer)| peer.map(|p| (i, p)))
            .collect();
        let outputs: Vec<(usize, Vec<InAnchor>)> = node
            .out_data
            .iter()
            .enumerate()
            .map(|(i, peers)| (i, peers.clone()))
            .collect();
        let preds = node.in_ctrl.clone();
        let succs = node.out_ctrl.clone();

        for (index, peer) in inputs {
            self.disconnect_data(peer, InAnchor::new(id, index))?;
        }
        for (index, peers) in outputs {
            for peer in peers {
                self.disconnect_data(OutAnchor::new(id, index), peer)?;
            }
        }
        for pred in preds {
            self.disconnect_control(pred, id)?;
        }
        for succ in succs {
            self.disconnect_control(id, succ)?;
        }
        Ok(())
    }

    /// The producer feeding `anchor`, if the anchor exists and is bound.
    #[must_use]
    pub fn producer(&self, anchor: InAnchor) -> Option<OutAnchor> {
        self.nodes.get(&anchor.node)?.input_peer(anchor.index)
    }

    /// The consumers of `anchor` (empty for an invalid anchor).
    #[must_use]
    pub fn consumers(&self, anchor: OutAnchor) -> &[InAnchor] {
        const EMPTY: &[InAnchor] = &[];
        self.nodes
            .get(&anchor.node)
            .map_or(EMPTY, |node| node.consumers(anchor.index))
    }

    /// Number of external inputs this graph declares, i.e. its
    /// placeholder ([`DATA_OP`]) nodes.
    #[must_use]
    pub fn external_input_count(&self) -> usize {
        let data = Symbol::intern(DATA_OP);
        self.nodes.values().filter(|n| n.op.op_type() == data).count()
    }

    /// Number of external outputs this graph declares, i.e. the input
    /// arity of its [`NET_OUTPUT_OP`] sink (0 without one).
    #[must_use]
    pub fn external_output_count(&self) -> usize {
        let sink = Symbol::intern(NET_OUTPUT_OP);
        self.nodes
            .values()
            .find(|n| n.op.op_type() == sink)
            .map_or(0, |n| n.op.input_count())
    }

    /// Attaches a nested subgraph to `parent` under `role`.
    ///
    /// Fails with [`GraphError::ArityMismatch`] when the mapping sizes
    /// disagree with the subgraph's declared external input/output
    /// counts, and with [`GraphError::NodeNotFound`] /
    /// [`GraphError::AnchorNotFound`] for mappings referencing things
    /// the subgraph does not contain.
    pub fn attach_subgraph(
        &mut self,
        parent: NodeId,
        role: Symbol,
        graph: ComputeGraph,
        inputs: Vec<NodeId>,
        outputs: Vec<OutAnchor>,
    ) -> Result<(), GraphError> {
        if !self.contains(parent) {
            return Err(GraphError::NodeNotFound(parent));
        }
        let expected_inputs = graph.external_input_count();
        if inputs.len() != expected_inputs {
            return Err(GraphError::ArityMismatch {
                expected: expected_inputs,
                got: inputs.len(),
            });
        }
        let expected_outputs = graph.external_output_count();
        if outputs.len() != expected_outputs {
            return Err(GraphError::ArityMismatch {
                expected: expected_outputs,
                got: outputs.len(),
            });
        }
        for &placeholder in &inputs {
            if !graph.contains(placeholder) {
                return Err(GraphError::NodeNotFound(placeholder));
            }
        }
        for &anchor in &outputs {
            graph.check_out_anchor(anchor)?;
        }
        self.subgraphs.push(SubgraphBinding {
            parent,
            role,
            graph,
            inputs,
            outputs,
        });
        Ok(())
    }

    /// Iterates the subgraphs attached to `parent`.
    pub fn subgraphs(&self, parent: NodeId) -> impl Iterator<Item = &SubgraphBinding> {
        self.subgraphs.iter().filter(move |b| b.parent == parent)
    }

    /// All subgraph bindings in attachment order.
    #[must_use]
    pub fn all_subgraphs(&self) -> &[SubgraphBinding] {
        &self.subgraphs
    }

    /// Whole-graph integrity check: anchors reference present nodes,
    /// peer tables are symmetric, every input has at most one producer,
    /// and nested subgraphs validate recursively.
    pub fn validate(&self) -> Result<(), GraphError> {
        for (&id, node) in &self.nodes {
            if node.in_data.len() != node.op.input_count()
                || node.out_data.len() != node.op.output_count()
            {
                return Err(GraphError::ArityMismatch {
                    expected: node.op.input_count(),
                    got: node.in_data.len(),
                });
            }
            for (index, peer) in node.in_data.iter().enumerate() {
                let Some(peer) = peer else { continue };
                let producer = self
                    .nodes
                    .get(&peer.node)
                    .ok_or(GraphError::NodeNotFound(peer.node))?;
                let back = producer.out_data.get(peer.index).ok_or(GraphError::AnchorNotFound {
                    node: peer.node,
                    kind: AnchorKind::DataOut,
                    index: peer.index,
                })?;
                if !back.contains(&InAnchor::new(id, index)) {
                    return Err(GraphError::AnchorNotFound {
                        node: id,
                        kind: AnchorKind::DataIn,
                        index,
                    });
                }
            }
            for (index, consumers) in node.out_data.iter().enumerate() {
                let mut seen = FxHashSet::default();
                for peer in consumers {
                    if !seen.insert(*peer) {
                        return Err(GraphError::InputAlreadyBound {
                            node: peer.node,
                            index: peer.index,
                        });
                    }
                    let consumer = self
                        .nodes
                        .get(&peer.node)
                        .ok_or(GraphError::NodeNotFound(peer.node))?;
                    let bound = consumer.in_data.get(peer.index).copied().flatten();
                    if bound != Some(OutAnchor::new(id, index)) {
                        return Err(GraphError::AnchorNotFound {
                            node: peer.node,
                            kind: AnchorKind::DataIn,
                            index: peer.index,
                        });
                    }
                }
            }
            for &pred in &node.in_ctrl {
                let ok = self
                    .nodes
                    .get(&pred)
                    .is_some_and(|p| p.out_ctrl.contains(&id));
                if !ok {
                    return Err(GraphError::NodeNotFound(pred));
                }
            }
            for &succ in &node.out_ctrl {
                let ok = self
                    .nodes
                    .get(&succ)
                    .is_some_and(|s| s.in_ctrl.contains(&id));
                if !ok {
                    return Err(GraphError::NodeNotFound(succ));
                }
            }
        }
        for binding in &self.subgraphs {
            if !self.contains(binding.parent) {
                return Err(GraphError::NodeNotFound(binding.parent));
            }
            binding.graph.validate()?;
        }
        Ok(())
    }

    fn check_out_anchor(&self, anchor: OutAnchor) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get(&anchor.node)
            .ok_or(GraphError::NodeNotFound(anchor.node))?;
        if anchor.index >= node.out_data.len() {
            return Err(GraphError::AnchorNotFound {
                node: anchor.node,
                kind: AnchorKind::DataOut,
                index: anchor.index,
            });
        }
        Ok(())
    }

    fn check_in_anchor(&self, anchor: InAnchor) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get(&anchor.node)
            .ok_or(GraphError::NodeNotFound(anchor.node))?;
        if anchor.index >= node.in_data.len() {
            return Err(GraphError::AnchorNotFound {
                node: anchor.node,
                kind: AnchorKind::DataIn,
                index: anchor.index,
            });
        }
        Ok(())
    }
}

impl fmt::Display for ComputeGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "graph {:?} {{", self.name.as_str())?;
        for node in self.nodes.values() {
            let inputs: Vec<String> = node
                .in_data
                .iter()
                .map(|peer| peer.map_or_else(|| "_".to_owned(), |p| p.to_string()))
                .collect();
            write!(
                f,
                "  {} = {} {:?} ({})",
                node.id,
                node.op.op_type(),
                node.op.name().as_str(),
                inputs.join(", ")
            )?;
            if !node.in_ctrl.is_empty() {
                let preds: Vec<String> = node.in_ctrl.iter().map(ToString::to_string).collect();
                write!(f, " [ctrl: {}]", preds.join(", "))?;
            }
            writeln!(f)?;
        }
        for binding in &self.subgraphs {
            writeln!(f, "  subgraph {}.{}:", binding.parent, binding.role)?;
            for line in binding.graph.to_string().lines() {
                writeln!(f, "  {line}")?;
            }
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{DataType, Format, Shape, TensorDescriptor};

    fn desc() -> TensorDescriptor {
        TensorDescriptor::new(Shape::from_static([4, 4]), Format::Nd, DataType::Float32)
    }

    fn unary(name: &str, op_type: &str) -> OpDesc {
        OpDesc::new(name, op_type).with_input(desc()).with_output(desc())
    }

    fn source(name: &str) -> OpDesc {
        OpDesc::new(name, DATA_OP).with_output(desc())
    }

    #[test]
    fn test_connect_and_disconnect() {
        let mut g = ComputeGraph::new("t");
        let a = g.add_node(source("a"));
        let b = g.add_node(unary("b", "Relu"));

        g.connect_data(OutAnchor::new(a, 0), InAnchor::new(b, 0)).unwrap();
        assert_eq!(g.producer(InAnchor::new(b, 0)), Some(OutAnchor::new(a, 0)));
        assert_eq!(g.consumers(OutAnchor::new(a, 0)), &[InAnchor::new(b, 0)]);
        g.validate().unwrap();

        g.disconnect_data(OutAnchor::new(a, 0), InAnchor::new(b, 0)).unwrap();
        assert_eq!(g.producer(InAnchor::new(b, 0)), None);
        assert!(g.consumers(OutAnchor::new(a, 0)).is_empty());
        g.validate().unwrap();
    }

    #[test]
    fn test_input_already_bound() {
        let mut g = ComputeGraph::new("t");
        let a = g.add_node(source("a"));
        let b = g.add_node(source("b"));
        let c = g.add_node(unary("c", "Relu"));

        g.connect_data(OutAnchor::new(a, 0), InAnchor::new(c, 0)).unwrap();
        let err = g
            .connect_data(OutAnchor::new(b, 0), InAnchor::new(c, 0))
            .unwrap_err();
        assert_eq!(err, GraphError::InputAlreadyBound { node: c, index: 0 });
        // The original edge is untouched.
        assert_eq!(g.producer(InAnchor::new(c, 0)), Some(OutAnchor::new(a, 0)));
    }

    #[test]
    fn test_anchor_not_found() {
        let mut g = ComputeGraph::new("t");
        let a = g.add_node(source("a"));
        let b = g.add_node(unary("b", "Relu"));

        let err = g
            .connect_data(OutAnchor::new(a, 3), InAnchor::new(b, 0))
            .unwrap_err();
        assert_eq!(
            err,
            GraphError::AnchorNotFound {
                node: a,
                kind: AnchorKind::DataOut,
                index: 3
            }
        );
    }

    #[test]
    fn test_remove_requires_unlink() {
        let mut g = ComputeGraph::new("t");
        let a = g.add_node(source("a"));
        let b = g.add_node(unary("b", "Relu"));
        g.connect_data(OutAnchor::new(a, 0), InAnchor::new(b, 0)).unwrap();

        assert_eq!(
            g.remove_node(a).unwrap_err(),
            GraphError::NodeStillConnected { node: a }
        );

        g.unlink_node(a).unwrap();
        let op = g.remove_node(a).unwrap();
        assert_eq!(op.name().as_str(), "a");
        assert!(!g.contains(a));
        g.validate().unwrap();
    }

    #[test]
    fn test_control_edges_idempotent() {
        let mut g = ComputeGraph::new("t");
        let a = g.add_node(source("a"));
        let b = g.add_node(source("b"));

        g.connect_control(a, b).unwrap();
        g.connect_control(a, b).unwrap();
        assert_eq!(g.node(a).unwrap().control_succs(), &[b]);
        assert_eq!(g.node(b).unwrap().control_preds(), &[a]);

        g.disconnect_control(a, b).unwrap();
        g.disconnect_control(a, b).unwrap();
        assert!(g.node(a).unwrap().control_succs().is_empty());
        g.validate().unwrap();
    }

    #[test]
    fn test_unlink_removes_all_edges() {
        let mut g = ComputeGraph::new("t");
        let a = g.add_node(source("a"));
        let b = g.add_node(unary("b", "Relu"));
        let c = g.add_node(unary("c", "Abs"));
        let d = g.add_node(source("d"));

        g.connect_data(OutAnchor::new(a, 0), InAnchor::new(b, 0)).unwrap();
        g.connect_data(OutAnchor::new(b, 0), InAnchor::new(c, 0)).unwrap();
        g.connect_control(d, b).unwrap();
        g.connect_control(b, c).unwrap();

        g.unlink_node(b).unwrap();
        assert!(g.node(b).unwrap().is_unlinked());
        assert!(g.consumers(OutAnchor::new(a, 0)).is_empty());
        assert_eq!(g.producer(InAnchor::new(c, 0)), None);
        assert!(g.node(d).unwrap().control_succs().is_empty());
        g.validate().unwrap();
    }

    #[test]
    fn test_attach_subgraph_arity_mismatch() {
        let mut sub = ComputeGraph::new("body");
        let x = sub.add_node(source("x"));
        let y = sub.add_node(source("y"));
        let out = sub.add_node(OpDesc::new("out", NET_OUTPUT_OP).with_input(desc()));
        sub.connect_data(OutAnchor::new(x, 0), InAnchor::new(out, 0)).unwrap();

        let mut g = ComputeGraph::new("t");
        let parent = g.add_node(
            OpDesc::new("loop", "While")
                .with_input(desc())
                .with_output(desc()),
        );

        // Two placeholders declared, one mapped.
        let err = g
            .attach_subgraph(
                parent,
                Symbol::intern("body"),
                sub.clone(),
                vec![x],
                vec![OutAnchor::new(x, 0)],
            )
            .unwrap_err();
        assert_eq!(err, GraphError::ArityMismatch { expected: 2, got: 1 });
        assert!(g.subgraphs(parent).next().is_none());

        g.attach_subgraph(
            parent,
            Symbol::intern("body"),
            sub,
            vec![x, y],
            vec![OutAnchor::new(x, 0)],
        )
        .unwrap();
        let binding = g.subgraphs(parent).next().unwrap();
        assert_eq!(binding.role.as_str(), "body");
        assert_eq!(binding.inputs.len(), 2);
        g.validate().unwrap();
    }

    #[test]
    fn test_remove_node_detaches_subgraphs() {
        let mut sub = ComputeGraph::new("cond");
        let x = sub.add_node(source("x"));
        let out = sub.add_node(OpDesc::new("out", NET_OUTPUT_OP).with_input(desc()));
        sub.connect_data(OutAnchor::new(x, 0), InAnchor::new(out, 0)).unwrap();

        let mut g = ComputeGraph::new("t");
        let parent = g.add_node(OpDesc::new("loop", "While"));
        g.attach_subgraph(
            parent,
            Symbol::intern("cond"),
            sub,
            vec![x],
            vec![OutAnchor::new(x, 0)],
        )
        .unwrap();

        g.remove_node(parent).unwrap();
        assert!(g.all_subgraphs().is_empty());
    }

    #[test]
    fn test_validate_detects_broken_peer() {
        let mut g = ComputeGraph::new("t");
        let a = g.add_node(source("a"));
        let b = g.add_node(unary("b", "Relu"));
        g.connect_data(OutAnchor::new(a, 0), InAnchor::new(b, 0)).unwrap();

        // Break symmetry behind the checked API's back.
        g.nodes.get_mut(&a).unwrap().out_data[0].clear();
        assert!(g.validate().is_err());
    }

    #[test]
    fn test_serde_round_trip() {
        let mut g = ComputeGraph::new("t");
        let a = g.add_node(source("a"));
        let b = g.add_node(unary("b", "Relu"));
        g.connect_data(OutAnchor::new(a, 0), InAnchor::new(b, 0)).unwrap();
        g.connect_control(a, b).unwrap();

        let json = serde_json::to_string(&g).unwrap();
        let back: ComputeGraph = serde_json::from_str(&json).unwrap();
        back.validate().unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back.to_string(), g.to_string());
    }

    #[test]
    fn test_display() {
        let mut g = ComputeGraph::new("t");
        let a = g.add_node(source("a"));
        let b = g.add_node(unary("b", "Relu"));
        g.connect_data(OutAnchor::new(a, 0), InAnchor::new(b, 0)).unwrap();

        let dump = g.to_string();
        assert!(dump.contains("%0 = Data \"a\""));
        assert!(dump.contains("%1 = Relu \"b\" (%0:0)"));
    }
}
