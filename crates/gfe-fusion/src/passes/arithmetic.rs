//! Algebraic simplifications.

use tracing::debug;

use gfe_graph::{AttrValue, ComputeGraph, InAnchor, OpDesc, OutAnchor};

use crate::driver::{FusionPass, RewriteOutcome};
use crate::pattern::{FusionPattern, Mapping, PatternBuilder, PatternError};

const SUB: &str = "Sub";
const CONST: &str = "Const";

/// Rewrites `Sub(x, x)` (both data inputs resolving to the same
/// producer output anchor) into a zero-filled `Const` with the
/// original output descriptor. A `Sub` whose inputs differ is declined.
#[derive(Clone, Copy, Debug, Default)]
pub struct SelfSubZeroPass;

impl FusionPass for SelfSubZeroPass {
    fn patterns(&self) -> Result<Vec<FusionPattern>, PatternError> {
        Ok(vec![PatternBuilder::new("self_sub_zero")
            .add_op("sub", &[SUB])
            .set_output("sub")
            .build()?])
    }

    fn rewrite(&mut self, graph: &mut ComputeGraph, mapping: &Mapping) -> RewriteOutcome {
        let Some(sub) = mapping.get("sub") else {
            return RewriteOutcome::Unchanged;
        };
        let Some(node) = graph.node(sub) else {
            return RewriteOutcome::Unchanged;
        };
        if node.op().input_count() != 2 || node.op().output_count() != 1 {
            return RewriteOutcome::Unchanged;
        }
        let (lhs, rhs) = (node.input_peer(0), node.input_peer(1));
        if lhs.is_none() || lhs != rhs {
            return RewriteOutcome::Unchanged;
        }
        let Some(out_desc) = node.op().output_desc(0) else {
            return RewriteOutcome::Unchanged;
        };

        let fill = if out_desc.dtype().is_integer() {
            AttrValue::Int(0)
        } else {
            AttrValue::Float(0.0)
        };
        let zero_op = OpDesc::new(format!("{}_zero", node.op().name()).as_str(), CONST)
            .with_output(out_desc.clone())
            .with_attr("value", fill);

        let consumers: Vec<InAnchor> = node.consumers(0).to_vec();
        let ctrl_preds = node.control_preds().to_vec();
        let ctrl_succs = node.control_succs().to_vec();

        let result = (|| {
            graph.unlink_node(sub)?;
            graph.remove_node(sub)?;
            let zero = graph.add_node(zero_op);
            for consumer in consumers {
                graph.connect_data(OutAnchor::new(zero, 0), consumer)?;
            }
            for pred in ctrl_preds {
                graph.connect_control(pred, zero)?;
            }
            for succ in ctrl_succs {
                graph.connect_control(zero, succ)?;
            }
            Ok::<_, gfe_graph::GraphError>(zero)
        })();

        match result {
            Ok(zero) => {
                debug!(sub = %sub, zero = %zero, "folded self-subtraction to zero");
                RewriteOutcome::Changed(vec![zero])
            }
            Err(err) => RewriteOutcome::Failed(err.to_string()),
        }
    }
}
