//! Anchored pattern matching.
//!
//! Matching is anchored and local, not a subgraph-isomorphism search:
//! every node whose type the sink accepts becomes a candidate anchor,
//! and the match grows strictly backwards along the pattern's producer
//! edges. An edge with a pinned position must be satisfied by that exact
//! input anchor; an unpinned edge takes the first satisfying input
//! position in anchor order (a deterministic but arbitrary tie-break).
//! Bindings are injective: distinct pattern nodes bind distinct graph
//! nodes.

use rustc_hash::FxHashMap;
use tracing::trace;

use gfe_graph::{ComputeGraph, InAnchor, NodeId};
use gfe_index::Idx;

use crate::pattern::{FusionPattern, Mapping, PatternNodeId};

/// Runs `pattern` against every candidate anchor in `graph`.
///
/// Returns at most one [`Mapping`] per anchor node, in the graph's
/// insertion order. A graph node may appear in several mappings of the
/// same run only through different anchors; excluding already-matched
/// nodes from later rewrites is the pass's decision, not the matcher's.
#[must_use]
pub fn match_all(pattern: &FusionPattern, graph: &ComputeGraph) -> Vec<Mapping> {
    let sink = pattern.node(pattern.output());
    let mut mappings = Vec::new();

    for node in graph.nodes() {
        if !sink.accepts(node.op().op_type()) {
            continue;
        }
        let mut binding: Vec<Option<NodeId>> = vec![None; pattern.node_count()];
        if match_node(pattern, graph, pattern.output(), node.id(), &mut binding) {
            trace!(pattern = %pattern.name(), anchor = %node.id(), "pattern matched");
            let named: FxHashMap<_, _> = pattern
                .nodes()
                .filter_map(|(id, pnode)| binding[id.index()].map(|n| (pnode.name(), n)))
                .collect();
            mappings.push(Mapping::new(pattern.name(), named));
        }
    }

    mappings
}

/// Tries to bind pattern node `pid` to graph node `nid`, growing the
/// binding through the pattern's producer edges. On failure the binding
/// is left unchanged (trial bindings are cloned before recursion).
fn match_node(
    pattern: &FusionPattern,
    graph: &ComputeGraph,
    pid: PatternNodeId,
    nid: NodeId,
    binding: &mut Vec<Option<NodeId>>,
) -> bool {
    if let Some(bound) = binding[pid.index()] {
        return bound == nid;
    }
    let pnode = pattern.node(pid);
    let Some(node) = graph.node(nid) else {
        return false;
    };
    if !pnode.accepts(node.op().op_type()) {
        return false;
    }
    // Injectivity: a graph node serves at most one pattern node.
    if binding.iter().any(|b| *b == Some(nid)) {
        return false;
    }
    binding[pid.index()] = Some(nid);

    for edge in pnode.inputs() {
        let positions: Vec<usize> = match edge.position {
            Some(position) => vec![position],
            None => (0..node.op().input_count()).collect(),
        };
        let mut satisfied = false;
        for position in positions {
            let Some(producer) = graph.producer(InAnchor::new(nid, position)) else {
                continue;
            };
            let mut trial = binding.clone();
            if match_node(pattern, graph, edge.producer, producer.node, &mut trial) {
                *binding = trial;
                satisfied = true;
                break;
            }
        }
        if !satisfied {
            binding[pid.index()] = None;
            return false;
        }
    }
    true
}
