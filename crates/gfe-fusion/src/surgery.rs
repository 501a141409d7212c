//! Checked graph surgery primitives.
//!
//! Every primitive is all-or-nothing: the rewiring plan is computed and
//! validated against the immutable graph before the first mutation, so
//! a failed call leaves no dangling anchor and no partial state. The
//! mutation phase only performs edits the plan has already proven
//! valid.

use tracing::debug;

use gfe_graph::{
    AnchorKind, ComputeGraph, GraphError, InAnchor, NodeId, OpDesc, OutAnchor,
};
use gfe_intern::Symbol;

/// Retypes a node in place without touching its anchors.
///
/// Used when a pass only changes semantics (e.g. lowering `OneHotD` to
/// `OneHot`).
pub fn replace_node_type(
    graph: &mut ComputeGraph,
    node: NodeId,
    new_type: Symbol,
) -> Result<(), GraphError> {
    let n = graph.node_mut(node).ok_or(GraphError::NodeNotFound(node))?;
    debug!(node = %node, from = %n.op().op_type(), to = %new_type, "retyping node");
    n.op_mut().set_op_type(new_type);
    Ok(())
}

/// Removes a single-input/single-output node, reconnecting its producer
/// directly to all of its consumers.
///
/// Control edges survive on the remaining endpoints: incoming control
/// edges re-home onto each consumer node (onto the producer if the node
/// had no consumers), outgoing control edges onto the producer node.
/// Returns the removed descriptor.
pub fn splice_out(graph: &mut ComputeGraph, node: NodeId) -> Result<OpDesc, GraphError> {
    let n = graph.node(node).ok_or(GraphError::NodeNotFound(node))?;
    if n.op().input_count() != 1 || n.op().output_count() != 1 {
        return Err(GraphError::ArityMismatch {
            expected: 1,
            got: n.op().input_count().max(n.op().output_count()),
        });
    }
    let producer = n.input_peer(0).ok_or(GraphError::AnchorNotFound {
        node,
        kind: AnchorKind::DataIn,
        index: 0,
    })?;
    let consumers: Vec<InAnchor> = n.consumers(0).to_vec();
    let ctrl_preds: Vec<NodeId> = n.control_preds().to_vec();
    let ctrl_succs: Vec<NodeId> = n.control_succs().to_vec();

    graph.unlink_node(node)?;
    for &consumer in &consumers {
        graph.connect_data(producer, consumer)?;
    }
    for &pred in &ctrl_preds {
        if consumers.is_empty() {
            if pred != producer.node {
                graph.connect_control(pred, producer.node)?;
            }
            continue;
        }
        for &consumer in &consumers {
            if pred != consumer.node {
                graph.connect_control(pred, consumer.node)?;
            }
        }
    }
    for &succ in &ctrl_succs {
        if succ != producer.node {
            graph.connect_control(producer.node, succ)?;
        }
    }
    let op = graph.remove_node(node)?;
    debug!(node = %node, op = %op.op_type(), "spliced out node");
    Ok(op)
}

/// Inserts `new_node` on the edges from `producer` to `consumers`.
///
/// Every listed consumer must currently be fed by `producer`
/// ([`GraphError::AnchorNotFound`] otherwise), and `new_node` must be a
/// fresh 1-in/1-out node with an unbound input.
pub fn insert_between(
    graph: &mut ComputeGraph,
    new_node: NodeId,
    producer: OutAnchor,
    consumers: &[InAnchor],
) -> Result<(), GraphError> {
    let n = graph.node(new_node).ok_or(GraphError::NodeNotFound(new_node))?;
    if n.op().input_count() != 1 || n.op().output_count() != 1 {
        return Err(GraphError::ArityMismatch {
            expected: 1,
            got: n.op().input_count().max(n.op().output_count()),
        });
    }
    if n.input_peer(0).is_some() {
        return Err(GraphError::InputAlreadyBound {
            node: new_node,
            index: 0,
        });
    }
    for &consumer in consumers {
        if graph.producer(consumer) != Some(producer) {
            return Err(GraphError::AnchorNotFound {
                node: consumer.node,
                kind: AnchorKind::DataIn,
                index: consumer.index,
            });
        }
    }

    for &consumer in consumers {
        graph.disconnect_data(producer, consumer)?;
    }
    graph.connect_data(producer, InAnchor::new(new_node, 0))?;
    for &consumer in consumers {
        graph.connect_data(OutAnchor::new(new_node, 0), consumer)?;
    }
    debug!(node = %new_node, producer = %producer, "inserted node on edge");
    Ok(())
}

/// Merges producer `a` into consumer `b`, replacing both with one node.
///
/// The new node's data inputs are the still-external inputs of `a` then
/// `b` in anchor order (internal `a -> b` edges drop out); its outputs
/// inherit `b`'s consumers positionally; its control peers are the
/// union of both nodes' control peers. Preconditions: `a` and `b` are
/// distinct, every data consumer of `a` is `b`
/// ([`GraphError::NodeStillConnected`] otherwise), and `new_op`'s
/// anchor counts equal the computed external arities
/// ([`GraphError::ArityMismatch`]).
pub fn merge_into(
    graph: &mut ComputeGraph,
    a: NodeId,
    b: NodeId,
    new_op: OpDesc,
) -> Result<NodeId, GraphError> {
    if a == b {
        return Err(GraphError::ArityMismatch { expected: 2, got: 1 });
    }
    let node_a = graph.node(a).ok_or(GraphError::NodeNotFound(a))?;
    let node_b = graph.node(b).ok_or(GraphError::NodeNotFound(b))?;

    for index in 0..node_a.op().output_count() {
        if node_a.consumers(index).iter().any(|peer| peer.node != b) {
            return Err(GraphError::NodeStillConnected { node: a });
        }
    }

    let mut external_inputs: Vec<OutAnchor> = Vec::new();
    external_inputs.extend(node_a.input_peers().iter().copied().flatten());
    external_inputs.extend(
        node_b
            .input_peers()
            .iter()
            .copied()
            .flatten()
            .filter(|peer| peer.node != a),
    );
    if external_inputs.len() != new_op.input_count() {
        return Err(GraphError::ArityMismatch {
            expected: external_inputs.len(),
            got: new_op.input_count(),
        });
    }
    if node_b.op().output_count() != new_op.output_count() {
        return Err(GraphError::ArityMismatch {
            expected: node_b.op().output_count(),
            got: new_op.output_count(),
        });
    }
    let consumers: Vec<Vec<InAnchor>> = (0..node_b.op().output_count())
        .map(|index| node_b.consumers(index).to_vec())
        .collect();
    let mut ctrl_preds: Vec<NodeId> = Vec::new();
    let mut ctrl_succs: Vec<NodeId> = Vec::new();
    for &pred in node_a.control_preds().iter().chain(node_b.control_preds()) {
        if pred != a && pred != b && !ctrl_preds.contains(&pred) {
            ctrl_preds.push(pred);
        }
    }
    for &succ in node_a.control_succs().iter().chain(node_b.control_succs()) {
        if succ != a && succ != b && !ctrl_succs.contains(&succ) {
            ctrl_succs.push(succ);
        }
    }

    graph.unlink_node(a)?;
    graph.unlink_node(b)?;
    graph.remove_node(a)?;
    graph.remove_node(b)?;

    let merged = graph.add_node(new_op);
    for (index, peer) in external_inputs.into_iter().enumerate() {
        graph.connect_data(peer, InAnchor::new(merged, index))?;
    }
    for (index, peers) in consumers.into_iter().enumerate() {
        for peer in peers {
            graph.connect_data(OutAnchor::new(merged, index), peer)?;
        }
    }
    for pred in ctrl_preds {
        graph.connect_control(pred, merged)?;
    }
    for succ in ctrl_succs {
        graph.connect_control(merged, succ)?;
    }
    debug!(a = %a, b = %b, merged = %merged, "merged nodes");
    Ok(merged)
}
