//! Built-in fusion passes.
//!
//! These are the engine's own instantiations: small, self-contained
//! passes exercising the pattern DSL, the matcher and the surgery
//! primitives. Production pass suites register through the same
//! [`FusionPass`](crate::driver::FusionPass) surface.

mod arithmetic;
mod cast;
mod one_hot;

pub use arithmetic::SelfSubZeroPass;
pub use cast::CastMergePass;
pub use one_hot::OneHotLoweringPass;

use gfe_graph::OpDesc;
use gfe_intern::Symbol;
use rustc_hash::FxHashSet;

/// Target-support oracle for rewritten operator forms.
///
/// Stands in for the downstream hardware/codegen capability query: a
/// pass that has already mutated a node consults the checker and, on
/// rejection, reverts its mutations and reports `Unchanged`.
pub trait OpChecker {
    /// True if the downstream stage accepts `op` as rewritten.
    fn is_supported(&self, op: &OpDesc) -> bool;
}

/// An [`OpChecker`] accepting a fixed set of operator types.
#[derive(Clone, Debug, Default)]
pub struct TypeListChecker {
    supported: FxHashSet<Symbol>,
}

impl TypeListChecker {
    /// Creates a checker accepting exactly `types`.
    #[must_use]
    pub fn new(types: &[&str]) -> Self {
        Self {
            supported: types.iter().map(|t| Symbol::intern(t)).collect(),
        }
    }
}

impl OpChecker for TypeListChecker {
    fn is_supported(&self, op: &OpDesc) -> bool {
        self.supported.contains(&op.op_type())
    }
}
