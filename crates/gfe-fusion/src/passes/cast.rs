//! Cast chain fusion.

use gfe_graph::{ComputeGraph, OpDesc};
use gfe_intern::Symbol;

use crate::driver::{FusionPass, RewriteOutcome};
use crate::pattern::{FusionPattern, Mapping, PatternBuilder, PatternError};
use crate::surgery;

const CAST: &str = "Cast";

/// Merges `Cast -> Cast` chains into a single `Cast`.
///
/// The surviving node keeps the first cast's input descriptor and the
/// second cast's output descriptor, so `Cast(fp16 -> int32) ->
/// Cast(int32 -> fp16)` collapses to `Cast(fp16 -> fp16)`. Chains whose
/// first cast feeds more than its successor are declined.
#[derive(Clone, Copy, Debug, Default)]
pub struct CastMergePass;

impl FusionPass for CastMergePass {
    fn patterns(&self) -> Result<Vec<FusionPattern>, PatternError> {
        Ok(vec![PatternBuilder::new("cast_merge")
            .add_op("cast0", &[CAST])
            .add_op("cast1", &[CAST])
            .set_inputs("cast1", &["cast0"])
            .set_output("cast1")
            .build()?])
    }

    fn rewrite(&mut self, graph: &mut ComputeGraph, mapping: &Mapping) -> RewriteOutcome {
        let (Some(a), Some(b)) = (mapping.get("cast0"), mapping.get("cast1")) else {
            return RewriteOutcome::Unchanged;
        };
        let (Some(node_a), Some(node_b)) = (graph.node(a), graph.node(b)) else {
            return RewriteOutcome::Unchanged;
        };
        // Only fuse when the intermediate value has no other reader.
        if node_a.consumers(0).iter().any(|peer| peer.node != b) {
            return RewriteOutcome::Unchanged;
        }
        let (Some(input), Some(output)) =
            (node_a.op().input_desc(0), node_b.op().output_desc(0))
        else {
            return RewriteOutcome::Unchanged;
        };

        let mut merged = OpDesc::new(
            format!("{}_{}", node_a.op().name(), node_b.op().name()).as_str(),
            CAST,
        )
        .with_input(input.clone())
        .with_output(output.clone());
        if let Some(dst) = node_b.op().attr(Symbol::intern("dst_type")) {
            merged = merged.with_attr("dst_type", dst.clone());
        }

        match surgery::merge_into(graph, a, b, merged) {
            Ok(id) => RewriteOutcome::Changed(vec![id]),
            Err(err) => RewriteOutcome::Failed(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gfe_graph::{
        AttrValue, DataType, Format, InAnchor, OutAnchor, Shape, TensorDescriptor, DATA_OP,
    };

    fn desc(dtype: DataType) -> TensorDescriptor {
        TensorDescriptor::new(Shape::from_static([8]), Format::Nd, dtype)
    }

    fn cast(name: &str, from: DataType, to: DataType) -> OpDesc {
        OpDesc::new(name, CAST)
            .with_input(desc(from))
            .with_output(desc(to))
            .with_attr("dst_type", AttrValue::Str(format!("{to:?}")))
    }

    #[test]
    fn test_merge_cast_chain() {
        let mut g = ComputeGraph::new("t");
        let x = g.add_node(OpDesc::new("x", DATA_OP).with_output(desc(DataType::Float16)));
        let c0 = g.add_node(cast("c0", DataType::Float16, DataType::Int32));
        let c1 = g.add_node(cast("c1", DataType::Int32, DataType::Float16));
        let sink = g.add_node(
            OpDesc::new("sink", "Relu")
                .with_input(desc(DataType::Float16))
                .with_output(desc(DataType::Float16)),
        );
        g.connect_data(OutAnchor::new(x, 0), InAnchor::new(c0, 0)).unwrap();
        g.connect_data(OutAnchor::new(c0, 0), InAnchor::new(c1, 0)).unwrap();
        g.connect_data(OutAnchor::new(c1, 0), InAnchor::new(sink, 0)).unwrap();

        let mut pass = CastMergePass;
        let pattern = &pass.patterns().unwrap()[0];
        let mappings = crate::matcher::match_all(pattern, &g);
        assert_eq!(mappings.len(), 1);

        let RewriteOutcome::Changed(created) = pass.rewrite(&mut g, &mappings[0]) else {
            panic!("expected Changed");
        };
        assert_eq!(created.len(), 1);
        let merged = g.node(created[0]).unwrap();
        assert_eq!(merged.op().op_type().as_str(), CAST);
        assert_eq!(merged.op().input_desc(0).unwrap().dtype(), DataType::Float16);
        assert_eq!(merged.op().output_desc(0).unwrap().dtype(), DataType::Float16);
        assert_eq!(g.producer(InAnchor::new(sink, 0)), Some(OutAnchor::new(created[0], 0)));
        g.validate().unwrap();
    }

    #[test]
    fn test_decline_when_intermediate_has_other_reader() {
        let mut g = ComputeGraph::new("t");
        let x = g.add_node(OpDesc::new("x", DATA_OP).with_output(desc(DataType::Float16)));
        let c0 = g.add_node(cast("c0", DataType::Float16, DataType::Int32));
        let c1 = g.add_node(cast("c1", DataType::Int32, DataType::Float16));
        let spy = g.add_node(
            OpDesc::new("spy", "Abs")
                .with_input(desc(DataType::Int32))
                .with_output(desc(DataType::Int32)),
        );
        g.connect_data(OutAnchor::new(x, 0), InAnchor::new(c0, 0)).unwrap();
        g.connect_data(OutAnchor::new(c0, 0), InAnchor::new(c1, 0)).unwrap();
        g.connect_data(OutAnchor::new(c0, 0), InAnchor::new(spy, 0)).unwrap();

        let mut pass = CastMergePass;
        let pattern = &pass.patterns().unwrap()[0];
        let mappings = crate::matcher::match_all(pattern, &g);
        assert_eq!(mappings.len(), 1);
        assert_eq!(pass.rewrite(&mut g, &mappings[0]), RewriteOutcome::Unchanged);
        assert!(g.contains(c0));
        assert!(g.contains(c1));
        g.validate().unwrap();
    }
}
