//! Lowering of fused one-hot forms.

use tracing::{debug, warn};

use gfe_graph::{AttrValue, ComputeGraph};
use gfe_intern::Symbol;

use crate::driver::{FusionPass, RewriteOutcome};
use crate::passes::OpChecker;
use crate::pattern::{FusionPattern, Mapping, PatternBuilder, PatternError};

const ONE_HOT_D: &str = "OneHotD";
const ONE_HOT: &str = "OneHot";

/// Retypes `OneHotD` to the generic `OneHot` form.
///
/// The attribute rewrite happens before the target-support query, so a
/// rejection by the checker explicitly restores the saved descriptor
/// and reports `Unchanged`; the node is never left half-lowered.
#[derive(Clone, Debug)]
pub struct OneHotLoweringPass<C> {
    checker: C,
}

impl<C: OpChecker> OneHotLoweringPass<C> {
    /// Creates the pass with its target-support oracle.
    pub fn new(checker: C) -> Self {
        Self { checker }
    }
}

impl<C: OpChecker> FusionPass for OneHotLoweringPass<C> {
    fn patterns(&self) -> Result<Vec<FusionPattern>, PatternError> {
        Ok(vec![PatternBuilder::new("one_hot_lowering")
            .add_op("one_hot", &[ONE_HOT_D])
            .set_output("one_hot")
            .build()?])
    }

    fn rewrite(&mut self, graph: &mut ComputeGraph, mapping: &Mapping) -> RewriteOutcome {
        let Some(id) = mapping.get("one_hot") else {
            return RewriteOutcome::Unchanged;
        };
        let Some(node) = graph.node_mut(id) else {
            return RewriteOutcome::Unchanged;
        };
        let saved = node.op().clone();

        let op = node.op_mut();
        op.set_op_type(Symbol::intern(ONE_HOT));
        let axis = Symbol::intern("axis");
        if op.attr(axis).is_none() {
            op.set_attr(axis, AttrValue::Int(-1));
        }

        if !self.checker.is_supported(op) {
            // Revert before returning: the mutation must not outlive a
            // rejected lowering.
            *op = saved;
            warn!(node = %id, "target rejects OneHot form; reverted");
            return RewriteOutcome::Unchanged;
        }
        debug!(node = %id, "lowered OneHotD to OneHot");
        RewriteOutcome::Changed(Vec::new())
    }
}
