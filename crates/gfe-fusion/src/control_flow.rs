//! Synthesis of structured control-flow subgraphs.
//!
//! Passes that lower a conceptually-looping operator (unknown iteration
//! count, e.g. an RNN gradient over a dynamic sequence length) build the
//! loop through [`build_while_loop`] instead of wiring Cond/Body graphs
//! by hand. The builder creates placeholder inputs, runs the caller's
//! construction callbacks, and enforces the positional invariant once:
//!
//! ```text
//! loop inputs = Cond inputs = Body inputs = Body outputs = loop outputs
//! ```
//!
//! A slot whose value flows through an iteration unchanged is declared
//! `passthrough` and wired automatically; omitting it would silently
//! shift every later position.
//!
//! At execution time (external to this engine) the synthesized loop
//! steps `Init -> EvaluateCond -> {Body -> EvaluateCond} -> Exit`,
//! terminating when Cond yields false.

use tracing::debug;

use gfe_graph::{
    AnchorKind, AttrValue, ComputeGraph, DataType, GraphError, InAnchor, NodeId, OpDesc,
    OutAnchor, Shape, TensorDescriptor, DATA_OP, NET_OUTPUT_OP,
};
use gfe_intern::Symbol;

/// Operator type of the synthesized loop-control node.
pub const WHILE_OP: &str = "While";

/// One loop-carried slot: its name, descriptor, and whether the body
/// passes it through unchanged.
#[derive(Clone, Debug)]
pub struct LoopCarried {
    /// Slot name; becomes the placeholder node's instance name.
    pub name: Symbol,
    /// Descriptor of the carried value.
    pub desc: TensorDescriptor,
    /// True if the body does not recompute this slot.
    pub passthrough: bool,
}

impl LoopCarried {
    /// A slot the body recomputes each iteration.
    #[must_use]
    pub fn new(name: impl Into<Symbol>, desc: TensorDescriptor) -> Self {
        Self {
            name: name.into(),
            desc,
            passthrough: false,
        }
    }

    /// A slot whose value flows through unchanged.
    #[must_use]
    pub fn passthrough(name: impl Into<Symbol>, desc: TensorDescriptor) -> Self {
        Self {
            name: name.into(),
            desc,
            passthrough: true,
        }
    }
}

/// Errors from loop construction. All are construction-time: a failed
/// build leaves the parent graph untouched.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ControlFlowError {
    /// A loop needs at least one carried value.
    #[error("a while loop needs at least one loop-carried value")]
    NoCarriedValues,

    /// The body produced the wrong number of outputs.
    #[error("body produced {got} outputs, expected {expected}")]
    CarriedArityMismatch {
        /// Non-passthrough slot count.
        expected: usize,
        /// Outputs the body callback returned.
        got: usize,
    },

    /// A body output's origin dtype disagrees with its slot.
    #[error("slot {slot}: body output dtype {got:?}, expected {expected:?}")]
    CarriedTypeMismatch {
        /// Slot position.
        slot: usize,
        /// Declared dtype.
        expected: DataType,
        /// Dtype the body produced.
        got: DataType,
    },

    /// A body output's static origin shape disagrees with its slot.
    #[error("slot {slot}: body output shape {got:?}, expected {expected:?}")]
    CarriedShapeMismatch {
        /// Slot position.
        slot: usize,
        /// Declared origin shape.
        expected: Shape,
        /// Shape the body produced.
        got: Shape,
    },

    /// The condition output is not a scalar boolean.
    #[error("condition output must be a scalar Bool, got {dtype:?} of rank {rank}")]
    CondNotBoolean {
        /// Dtype the condition produced.
        dtype: DataType,
        /// Rank the condition produced.
        rank: usize,
    },

    /// A graph operation failed while building a subgraph.
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Builds a while loop over `carried` and adds its control node to
/// `graph`.
///
/// `cond_fn` receives the Cond graph and its placeholder nodes (one per
/// slot, in order) and returns the anchor producing the scalar Bool
/// predicate. `body_fn` receives the Body graph and its placeholders
/// and returns one anchor per *non-passthrough* slot, in slot order;
/// passthrough slots are wired automatically. Neither callback may add
/// its own placeholder ([`DATA_OP`]) or sink ([`NET_OUTPUT_OP`]) nodes.
///
/// On success the new `While` node carries both subgraphs with their
/// positional mappings. On any error nothing is added to `graph`.
pub fn build_while_loop<C, B>(
    graph: &mut ComputeGraph,
    name: impl Into<Symbol>,
    carried: &[LoopCarried],
    cond_fn: C,
    body_fn: B,
) -> Result<NodeId, ControlFlowError>
where
    C: FnOnce(&mut ComputeGraph, &[NodeId]) -> Result<OutAnchor, ControlFlowError>,
    B: FnOnce(&mut ComputeGraph, &[NodeId]) -> Result<Vec<OutAnchor>, ControlFlowError>,
{
    if carried.is_empty() {
        return Err(ControlFlowError::NoCarriedValues);
    }
    let name = name.into();

    // Cond graph: placeholders, caller dataflow, predicate sink.
    let mut cond = ComputeGraph::new(Symbol::intern(&format!("{name}_cond")));
    let cond_inputs = add_placeholders(&mut cond, carried);
    let predicate = cond_fn(&mut cond, &cond_inputs)?;
    let pred_desc = anchor_desc(&cond, predicate)?.clone();
    if pred_desc.origin_dtype() != DataType::Bool || pred_desc.origin_shape().rank() != 0 {
        return Err(ControlFlowError::CondNotBoolean {
            dtype: pred_desc.origin_dtype(),
            rank: pred_desc.origin_shape().rank(),
        });
    }
    let cond_sink = cond.add_node(OpDesc::new("output", NET_OUTPUT_OP).with_input(pred_desc));
    cond.connect_data(predicate, InAnchor::new(cond_sink, 0))
        .map_err(ControlFlowError::Graph)?;

    // Body graph: placeholders, caller dataflow, one output per slot.
    let mut body = ComputeGraph::new(Symbol::intern(&format!("{name}_body")));
    let body_inputs = add_placeholders(&mut body, carried);
    let computed = body_fn(&mut body, &body_inputs)?;
    let expected = carried.iter().filter(|slot| !slot.passthrough).count();
    if computed.len() != expected {
        return Err(ControlFlowError::CarriedArityMismatch {
            expected,
            got: computed.len(),
        });
    }
    let mut computed = computed.into_iter();
    let mut body_outputs = Vec::with_capacity(carried.len());
    for (slot, spec) in carried.iter().enumerate() {
        let anchor = if spec.passthrough {
            OutAnchor::new(body_inputs[slot], 0)
        } else {
            computed.next().expect("count checked above")
        };
        let desc = anchor_desc(&body, anchor)?;
        if desc.origin_dtype() != spec.desc.origin_dtype() {
            return Err(ControlFlowError::CarriedTypeMismatch {
                slot,
                expected: spec.desc.origin_dtype(),
                got: desc.origin_dtype(),
            });
        }
        if desc.origin_shape().is_static()
            && spec.desc.origin_shape().is_static()
            && desc.origin_shape() != spec.desc.origin_shape()
        {
            return Err(ControlFlowError::CarriedShapeMismatch {
                slot,
                expected: spec.desc.origin_shape().clone(),
                got: desc.origin_shape().clone(),
            });
        }
        body_outputs.push(anchor);
    }
    let mut sink = OpDesc::new("output", NET_OUTPUT_OP);
    for spec in carried {
        sink = sink.with_input(spec.desc.clone());
    }
    let body_sink = body.add_node(sink);
    for (slot, &anchor) in body_outputs.iter().enumerate() {
        body.connect_data(anchor, InAnchor::new(body_sink, slot))
            .map_err(ControlFlowError::Graph)?;
    }

    // Both subgraphs are complete and consistent; only now touch the
    // parent graph.
    let mut while_op = OpDesc::new(name, WHILE_OP);
    for spec in carried {
        while_op = while_op.with_input(spec.desc.clone());
        while_op = while_op.with_output(spec.desc.clone());
    }
    let while_id = graph.add_node(while_op);
    let attached = graph
        .attach_subgraph(while_id, Symbol::intern("cond"), cond, cond_inputs, vec![predicate])
        .and_then(|()| {
            graph.attach_subgraph(
                while_id,
                Symbol::intern("body"),
                body,
                body_inputs,
                body_outputs,
            )
        });
    if let Err(err) = attached {
        // The fresh loop node has no edges; removing it also detaches
        // any binding attached so far, keeping the failure atomic.
        graph.remove_node(while_id)?;
        return Err(err.into());
    }
    debug!(node = %while_id, slots = carried.len(), "built while loop");
    Ok(while_id)
}

/// Adds one placeholder node per carried slot, tagged with its argument
/// index.
fn add_placeholders(graph: &mut ComputeGraph, carried: &[LoopCarried]) -> Vec<NodeId> {
    carried
        .iter()
        .enumerate()
        .map(|(index, slot)| {
            graph.add_node(
                OpDesc::new(slot.name, DATA_OP)
                    .with_output(slot.desc.clone())
                    .with_attr("index", AttrValue::Int(index as i64)),
            )
        })
        .collect()
}

/// The descriptor behind an output anchor.
fn anchor_desc(graph: &ComputeGraph, anchor: OutAnchor) -> Result<&TensorDescriptor, GraphError> {
    graph
        .node(anchor.node)
        .ok_or(GraphError::NodeNotFound(anchor.node))?
        .op()
        .output_desc(anchor.index)
        .ok_or(GraphError::AnchorNotFound {
            node: anchor.node,
            kind: AnchorKind::DataOut,
            index: anchor.index,
        })
}
