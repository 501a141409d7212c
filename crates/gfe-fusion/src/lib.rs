//! # GFE Fusion Engine
//!
//! Pattern-match-and-rewrite infrastructure over the `gfe-graph`
//! compute graph: a pattern DSL with an anchored matcher, checked graph
//! surgery primitives, a control-flow subgraph builder for synthesized
//! loops, and the pass driver that runs registered passes in rounds.
//!
//! ## How a pass runs
//!
//! ```text
//! PassRegistry::run_round
//!     |
//!     | for each registered pass, in registration order
//!     v
//! FusionPass::patterns  -> [FusionPattern]     (skip pass on error)
//!     |
//!     v
//! match_all(pattern, graph) -> [Mapping]       (anchored, local)
//!     |
//!     | for each mapping still fresh
//!     v
//! FusionPass::rewrite(graph, mapping)
//!     -> Changed(new nodes) | Unchanged | Failed(reason)
//! ```
//!
//! `Unchanged` is a no-op; `Failed` aborts only that pass's remaining
//! mappings and is logged, never propagated. No failure in this crate
//! is fatal to the surrounding compilation.
//!
//! ## Modules
//!
//! - [`pattern`]: [`PatternBuilder`], [`FusionPattern`], [`Mapping`]
//! - [`matcher`]: [`match_all`]
//! - [`surgery`]: `replace_node_type`, `splice_out`, `insert_between`,
//!   `merge_into`
//! - [`control_flow`]: [`build_while_loop`]
//! - [`driver`]: [`FusionPass`], [`PassRegistry`], [`Round`]
//! - [`passes`]: the built-in passes

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod control_flow;
pub mod driver;
pub mod matcher;
pub mod passes;
pub mod pattern;
pub mod surgery;

pub use control_flow::{build_while_loop, ControlFlowError, LoopCarried};
pub use driver::{FusionPass, PassRegistry, RewriteOutcome, Round, RoundStats};
pub use matcher::match_all;
pub use passes::{
    CastMergePass, OneHotLoweringPass, OpChecker, SelfSubZeroPass, TypeListChecker,
};
pub use pattern::{FusionPattern, Mapping, PatternBuilder, PatternError};
