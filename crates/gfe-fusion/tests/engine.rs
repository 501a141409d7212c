//! End-to-end tests for the fusion engine.
//!
//! These drive whole registry rounds over small graphs and check the
//! scenarios the engine is specified against: cast-chain fusion,
//! self-subtraction folding, no-match rounds, loop synthesis, and
//! idempotence of a converged round.

use gfe_fusion::{
    build_while_loop, match_all, CastMergePass, ControlFlowError, FusionPass, LoopCarried,
    OneHotLoweringPass, PassRegistry, PatternBuilder, RewriteOutcome, Round, SelfSubZeroPass,
    TypeListChecker,
};
use gfe_graph::{
    AttrValue, ComputeGraph, DataType, Format, InAnchor, NodeId, OpDesc, OutAnchor, Shape,
    TensorDescriptor, DATA_OP,
};

fn desc(dtype: DataType, dims: &[u64]) -> TensorDescriptor {
    TensorDescriptor::new(
        Shape::from_static(dims.iter().copied()),
        Format::Nd,
        dtype,
    )
}

fn source(name: &str, dtype: DataType, dims: &[u64]) -> OpDesc {
    OpDesc::new(name, DATA_OP).with_output(desc(dtype, dims))
}

fn cast(name: &str, from: DataType, to: DataType, dims: &[u64]) -> OpDesc {
    OpDesc::new(name, "Cast")
        .with_input(desc(from, dims))
        .with_output(desc(to, dims))
}

fn first_round_registry() -> PassRegistry {
    let mut registry = PassRegistry::new();
    registry.register("cast_merge", Round::First, Box::new(CastMergePass));
    registry.register("self_sub_zero", Round::First, Box::new(SelfSubZeroPass));
    registry
}

// =========================================================================
// Scenario A: Cast(fp16 -> int32) -> Cast(int32 -> fp16) fuses to one Cast
// =========================================================================

#[test]
fn test_cast_chain_fuses_to_single_cast() {
    let mut g = ComputeGraph::new("main");
    let x = g.add_node(source("x", DataType::Float16, &[8]));
    let c0 = g.add_node(cast("c0", DataType::Float16, DataType::Int32, &[8]));
    let c1 = g.add_node(cast("c1", DataType::Int32, DataType::Float16, &[8]));
    let sink = g.add_node(
        OpDesc::new("sink", "NetOutput").with_input(desc(DataType::Float16, &[8])),
    );
    g.connect_data(OutAnchor::new(x, 0), InAnchor::new(c0, 0)).unwrap();
    g.connect_data(OutAnchor::new(c0, 0), InAnchor::new(c1, 0)).unwrap();
    g.connect_data(OutAnchor::new(c1, 0), InAnchor::new(sink, 0)).unwrap();

    let mut registry = first_round_registry();
    let created = registry.run_round(Round::First, &mut g);

    assert_eq!(created.len(), 1);
    let merged = g.node(created[0]).unwrap();
    assert_eq!(merged.op().op_type().as_str(), "Cast");
    // Input descriptor of the first cast, output descriptor of the second.
    assert_eq!(merged.op().input_desc(0).unwrap().dtype(), DataType::Float16);
    assert_eq!(merged.op().output_desc(0).unwrap().dtype(), DataType::Float16);
    assert!(!g.contains(c0));
    assert!(!g.contains(c1));
    assert_eq!(
        g.producer(InAnchor::new(sink, 0)),
        Some(OutAnchor::new(created[0], 0))
    );
    g.validate().unwrap();
}

// =========================================================================
// Scenario B: Sub(x, x) folds to a zero constant
// =========================================================================

#[test]
fn test_self_sub_folds_to_zero_const() {
    let mut g = ComputeGraph::new("main");
    let x = g.add_node(source("x", DataType::Float32, &[2, 3]));
    let sub = g.add_node(
        OpDesc::new("sub", "Sub")
            .with_input(desc(DataType::Float32, &[2, 3]))
            .with_input(desc(DataType::Float32, &[2, 3]))
            .with_output(desc(DataType::Float32, &[2, 3])),
    );
    g.connect_data(OutAnchor::new(x, 0), InAnchor::new(sub, 0)).unwrap();
    g.connect_data(OutAnchor::new(x, 0), InAnchor::new(sub, 1)).unwrap();

    let mut registry = first_round_registry();
    let created = registry.run_round(Round::First, &mut g);

    assert_eq!(created.len(), 1);
    let zero = g.node(created[0]).unwrap();
    assert_eq!(zero.op().op_type().as_str(), "Const");
    let out = zero.op().output_desc(0).unwrap();
    assert_eq!(out.dtype(), DataType::Float32);
    assert_eq!(out.shape(), &Shape::from_static([2, 3]));
    assert!(!g.contains(sub));
    g.validate().unwrap();
}

// =========================================================================
// Scenario C: loop construction fails atomically on body arity mismatch
// =========================================================================

#[test]
fn test_loop_arity_mismatch_is_constructive_failure() {
    let mut g = ComputeGraph::new("main");
    let carried = [
        LoopCarried::new("i", TensorDescriptor::scalar(DataType::Int32)),
        LoopCarried::new("a", desc(DataType::Float32, &[4])),
        LoopCarried::new("b", desc(DataType::Float32, &[4])),
    ];

    let err = build_while_loop(
        &mut g,
        "loop",
        &carried,
        |cond, inputs| {
            let pred = cond.add_node(
                OpDesc::new("nonzero", "NotEqual")
                    .with_input(TensorDescriptor::scalar(DataType::Int32))
                    .with_output(TensorDescriptor::scalar(DataType::Bool)),
            );
            cond.connect_data(OutAnchor::new(inputs[0], 0), InAnchor::new(pred, 0))?;
            Ok(OutAnchor::new(pred, 0))
        },
        // Only two of the three carried slots are produced.
        |_body, inputs| Ok(vec![OutAnchor::new(inputs[0], 0), OutAnchor::new(inputs[1], 0)]),
    )
    .unwrap_err();

    assert_eq!(
        err,
        ControlFlowError::CarriedArityMismatch { expected: 3, got: 2 }
    );
    // No loop node was left in the graph.
    assert!(g.is_empty());
    assert!(g.all_subgraphs().is_empty());
}

#[test]
fn test_loop_build_satisfies_arity_invariant() {
    let mut g = ComputeGraph::new("main");
    let carried = [
        LoopCarried::new("i", TensorDescriptor::scalar(DataType::Int32)),
        LoopCarried::passthrough("limit", TensorDescriptor::scalar(DataType::Int32)),
    ];

    let while_id = build_while_loop(
        &mut g,
        "loop",
        &carried,
        |cond, inputs| {
            let pred = cond.add_node(
                OpDesc::new("less", "Less")
                    .with_input(TensorDescriptor::scalar(DataType::Int32))
                    .with_input(TensorDescriptor::scalar(DataType::Int32))
                    .with_output(TensorDescriptor::scalar(DataType::Bool)),
            );
            cond.connect_data(OutAnchor::new(inputs[0], 0), InAnchor::new(pred, 0))?;
            cond.connect_data(OutAnchor::new(inputs[1], 0), InAnchor::new(pred, 1))?;
            Ok(OutAnchor::new(pred, 0))
        },
        |body, inputs| {
            let one = body.add_node(
                OpDesc::new("one", "Const")
                    .with_output(TensorDescriptor::scalar(DataType::Int32))
                    .with_attr("value", AttrValue::Int(1)),
            );
            let inc = body.add_node(
                OpDesc::new("inc", "Add")
                    .with_input(TensorDescriptor::scalar(DataType::Int32))
                    .with_input(TensorDescriptor::scalar(DataType::Int32))
                    .with_output(TensorDescriptor::scalar(DataType::Int32)),
            );
            body.connect_data(OutAnchor::new(inputs[0], 0), InAnchor::new(inc, 0))?;
            body.connect_data(OutAnchor::new(one, 0), InAnchor::new(inc, 1))?;
            Ok(vec![OutAnchor::new(inc, 0)])
        },
    )
    .unwrap();

    // loop inputs = cond inputs = body inputs = body outputs = loop outputs.
    let node = g.node(while_id).unwrap();
    let arity = carried.len();
    assert_eq!(node.op().input_count(), arity);
    assert_eq!(node.op().output_count(), arity);
    for binding in g.subgraphs(while_id) {
        assert_eq!(binding.inputs.len(), arity);
        assert_eq!(binding.graph.external_input_count(), arity);
        binding.graph.validate().unwrap();
    }
    let body = g
        .subgraphs(while_id)
        .find(|b| b.role.as_str() == "body")
        .unwrap();
    assert_eq!(body.outputs.len(), arity);
    assert_eq!(body.graph.external_output_count(), arity);
    g.validate().unwrap();
}

// =========================================================================
// Scenario D: a pattern with no matching node leaves the graph untouched
// =========================================================================

struct ReduceSumLowering;

impl FusionPass for ReduceSumLowering {
    fn patterns(
        &self,
    ) -> Result<Vec<gfe_fusion::FusionPattern>, gfe_fusion::PatternError> {
        Ok(vec![PatternBuilder::new("reduce_sum_d")
            .add_op("reduce", &["ReduceSumD"])
            .set_output("reduce")
            .build()?])
    }

    fn rewrite(&mut self, _graph: &mut ComputeGraph, _mapping: &gfe_fusion::Mapping) -> RewriteOutcome {
        RewriteOutcome::Changed(Vec::new())
    }
}

#[test]
fn test_no_match_leaves_graph_unmodified() {
    let mut g = ComputeGraph::new("main");
    let x = g.add_node(source("x", DataType::Float32, &[4]));
    let relu = g.add_node(
        OpDesc::new("relu", "Relu")
            .with_input(desc(DataType::Float32, &[4]))
            .with_output(desc(DataType::Float32, &[4])),
    );
    g.connect_data(OutAnchor::new(x, 0), InAnchor::new(relu, 0)).unwrap();
    let before = serde_json::to_value(&g).unwrap();

    let pass = ReduceSumLowering;
    let pattern = &pass.patterns().unwrap()[0];
    assert!(match_all(pattern, &g).is_empty());

    let mut registry = PassRegistry::new();
    registry.register("reduce_sum_d", Round::Second, Box::new(ReduceSumLowering));
    let (created, stats) = registry.run_round_with_stats(Round::Second, &mut g);

    assert!(created.is_empty());
    assert_eq!(stats.mappings_matched, 0);
    assert_eq!(stats.rewrites_applied, 0);
    assert_eq!(serde_json::to_value(&g).unwrap(), before);
}

// =========================================================================
// Idempotence and invariants
// =========================================================================

#[test]
fn test_converged_round_is_idempotent() {
    let mut g = ComputeGraph::new("main");
    let x = g.add_node(source("x", DataType::Float16, &[8]));
    let c0 = g.add_node(cast("c0", DataType::Float16, DataType::Int32, &[8]));
    let c1 = g.add_node(cast("c1", DataType::Int32, DataType::Float16, &[8]));
    g.connect_data(OutAnchor::new(x, 0), InAnchor::new(c0, 0)).unwrap();
    g.connect_data(OutAnchor::new(c0, 0), InAnchor::new(c1, 0)).unwrap();

    let mut registry = first_round_registry();
    let first = registry.run_round(Round::First, &mut g);
    assert_eq!(first.len(), 1);
    let converged = serde_json::to_value(&g).unwrap();

    // Re-running the round finds nothing and changes nothing.
    let (second, stats) = registry.run_round_with_stats(Round::First, &mut g);
    assert!(second.is_empty());
    assert_eq!(stats.rewrites_applied, 0);
    assert_eq!(serde_json::to_value(&g).unwrap(), converged);
}

#[test]
fn test_long_cast_chain_converges_under_repeated_rounds() {
    // Four casts collapse pairwise, then the merged pair collapses again.
    let mut g = ComputeGraph::new("main");
    let x = g.add_node(source("x", DataType::Float16, &[8]));
    let mut prev = OutAnchor::new(x, 0);
    let dtypes = [
        DataType::Float16,
        DataType::Int32,
        DataType::Float32,
        DataType::Int64,
        DataType::Float16,
    ];
    for i in 0..4 {
        let c = g.add_node(cast(&format!("c{i}"), dtypes[i], dtypes[i + 1], &[8]));
        g.connect_data(prev, InAnchor::new(c, 0)).unwrap();
        prev = OutAnchor::new(c, 0);
    }

    let mut registry = first_round_registry();
    // First round: three Cast->Cast mappings on the snapshot; merging
    // the first stales the overlapping second, the third still applies.
    let (created, stats) = registry.run_round_with_stats(Round::First, &mut g);
    assert_eq!(created.len(), 2);
    assert_eq!(stats.mappings_stale, 1);
    g.validate().unwrap();

    loop {
        let created = registry.run_round(Round::First, &mut g);
        g.validate().unwrap();
        if created.is_empty() {
            break;
        }
    }

    // One surviving Cast with the end-to-end descriptors.
    let casts: Vec<&gfe_graph::Node> = g
        .nodes()
        .filter(|n| n.op().op_type().as_str() == "Cast")
        .collect();
    assert_eq!(casts.len(), 1);
    assert_eq!(casts[0].op().input_desc(0).unwrap().dtype(), DataType::Float16);
    assert_eq!(casts[0].op().output_desc(0).unwrap().dtype(), DataType::Float16);
}

// =========================================================================
// Round ordering and target-support recovery
// =========================================================================

#[test]
fn test_second_round_sees_first_round_result() {
    let mut g = ComputeGraph::new("main");
    let idx = g.add_node(source("idx", DataType::Int32, &[8]));
    let one_hot = g.add_node(
        OpDesc::new("oh", "OneHotD")
            .with_input(desc(DataType::Int32, &[8]))
            .with_output(desc(DataType::Float32, &[8, 10]))
            .with_attr("depth", AttrValue::Int(10)),
    );
    g.connect_data(OutAnchor::new(idx, 0), InAnchor::new(one_hot, 0)).unwrap();

    let mut registry = first_round_registry();
    registry.register(
        "one_hot_lowering",
        Round::Second,
        Box::new(OneHotLoweringPass::new(TypeListChecker::new(&["OneHot"]))),
    );

    registry.run(&mut g);
    assert_eq!(g.node(one_hot).unwrap().op().op_type().as_str(), "OneHot");
    g.validate().unwrap();
}

#[test]
fn test_unsupported_target_reverts_and_continues() {
    let mut g = ComputeGraph::new("main");
    let idx = g.add_node(source("idx", DataType::Int32, &[8]));
    let one_hot = g.add_node(
        OpDesc::new("oh", "OneHotD")
            .with_input(desc(DataType::Int32, &[8]))
            .with_output(desc(DataType::Float32, &[8, 10]))
            .with_attr("depth", AttrValue::Int(10)),
    );
    g.connect_data(OutAnchor::new(idx, 0), InAnchor::new(one_hot, 0)).unwrap();
    let before = serde_json::to_value(&g).unwrap();

    let mut registry = PassRegistry::new();
    registry.register(
        "one_hot_lowering",
        Round::Second,
        Box::new(OneHotLoweringPass::new(TypeListChecker::new(&[]))),
    );

    let (created, stats) = registry.run_round_with_stats(Round::Second, &mut g);
    assert!(created.is_empty());
    assert_eq!(stats.mappings_matched, 1);
    assert_eq!(stats.rewrites_applied, 0);
    assert_eq!(stats.rewrites_failed, 0);
    assert_eq!(serde_json::to_value(&g).unwrap(), before);
}

// =========================================================================
// Post-surgery invariants
// =========================================================================

#[test]
fn test_invariants_hold_after_mixed_round() {
    let mut g = ComputeGraph::new("main");
    let x = g.add_node(source("x", DataType::Float16, &[8]));
    let c0 = g.add_node(cast("c0", DataType::Float16, DataType::Int32, &[8]));
    let c1 = g.add_node(cast("c1", DataType::Int32, DataType::Float16, &[8]));
    let sub = g.add_node(
        OpDesc::new("sub", "Sub")
            .with_input(desc(DataType::Float16, &[8]))
            .with_input(desc(DataType::Float16, &[8]))
            .with_output(desc(DataType::Float16, &[8])),
    );
    g.connect_data(OutAnchor::new(x, 0), InAnchor::new(c0, 0)).unwrap();
    g.connect_data(OutAnchor::new(c0, 0), InAnchor::new(c1, 0)).unwrap();
    g.connect_data(OutAnchor::new(c1, 0), InAnchor::new(sub, 0)).unwrap();
    g.connect_data(OutAnchor::new(c1, 0), InAnchor::new(sub, 1)).unwrap();

    let mut registry = first_round_registry();
    let created = registry.run_round(Round::First, &mut g);
    g.validate().unwrap();

    // Every reported node survived the round.
    for id in created {
        assert!(g.contains(id));
    }
    // Every input anchor still has at most one producer, referencing a
    // present node (validate checked symmetry; spot-check fan-in here).
    let ids: Vec<NodeId> = g.node_ids().collect();
    for id in ids {
        let node = g.node(id).unwrap();
        for peer in node.input_peers().iter().flatten() {
            assert!(g.contains(peer.node));
        }
    }
}
