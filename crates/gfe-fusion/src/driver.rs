//! The pass driver and registry.
//!
//! Passes register as `(name, round, pass)` and run strictly in
//! registration order within a round; rounds run in their fixed global
//! order. The driver owns the graph for the duration of a round and
//! delegates exclusive mutation access to one pass's rewrite callback
//! at a time. There is no parallelism and no speculation, so a pass
//! sees every mutation earlier passes of the same round made.
//!
//! Failure policy: a malformed pattern skips its pass; a `Failed`
//! rewrite aborts only that pass's remaining mappings; `Unchanged` is a
//! no-op. Nothing here panics on a pass's failure.

use rustc_hash::FxHashSet;
use tracing::{debug, warn};

use gfe_graph::{ComputeGraph, NodeId};
use gfe_intern::Symbol;

use crate::matcher::match_all;
use crate::pattern::{FusionPattern, Mapping, PatternError};

/// The fixed rounds passes can register into, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Round {
    /// Structural fusions running before layout decisions.
    First,
    /// Lowerings and target-dependent rewrites.
    Second,
}

impl Round {
    /// All rounds in execution order.
    pub const ALL: [Round; 2] = [Round::First, Round::Second];
}

/// What a rewrite callback did with its mapping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RewriteOutcome {
    /// The graph was mutated; the listed nodes are newly created.
    Changed(Vec<NodeId>),
    /// The pass declined the match; no side effects.
    Unchanged,
    /// The rewrite attempt failed mid-surgery; the pass's remaining
    /// mappings on this graph snapshot are abandoned.
    Failed(String),
}

/// A fusion pass: a pattern provider plus a rewrite callback.
///
/// The registry stores passes as trait objects; there is no pass
/// inheritance hierarchy, only this two-method surface.
pub trait FusionPass {
    /// The patterns this pass wants matched against the graph.
    ///
    /// An error here is a construction error: the driver logs it and
    /// skips the pass without touching the graph.
    fn patterns(&self) -> Result<Vec<FusionPattern>, PatternError>;

    /// Rewrites one match. Invoked once per fresh mapping, with
    /// exclusive access to the graph.
    fn rewrite(&mut self, graph: &mut ComputeGraph, mapping: &Mapping) -> RewriteOutcome;
}

/// Counters for one round, for reporting and tests.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoundStats {
    /// Passes whose patterns built and ran.
    pub passes_run: usize,
    /// Passes skipped over a malformed pattern.
    pub passes_skipped: usize,
    /// Mappings produced by the matcher.
    pub mappings_matched: usize,
    /// Mappings dropped because an earlier rewrite staled them.
    pub mappings_stale: usize,
    /// Rewrites that reported `Changed`.
    pub rewrites_applied: usize,
    /// Rewrites that reported `Failed`.
    pub rewrites_failed: usize,
}

struct Registration {
    name: Symbol,
    round: Round,
    pass: Box<dyn FusionPass>,
}

/// Ordered registry of fusion passes.
#[derive(Default)]
pub struct PassRegistry {
    passes: Vec<Registration>,
}

impl PassRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// Registers a pass at the end of `round`'s order.
    pub fn register(&mut self, name: impl Into<Symbol>, round: Round, pass: Box<dyn FusionPass>) {
        self.passes.push(Registration {
            name: name.into(),
            round,
            pass,
        });
    }

    /// Number of registered passes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.passes.len()
    }

    /// True if no pass is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Runs every round in order; returns all newly created nodes.
    pub fn run(&mut self, graph: &mut ComputeGraph) -> Vec<NodeId> {
        let mut created = Vec::new();
        for round in Round::ALL {
            created.extend(self.run_round(round, graph));
        }
        created
    }

    /// Runs one round; returns the nodes created by its passes.
    pub fn run_round(&mut self, round: Round, graph: &mut ComputeGraph) -> Vec<NodeId> {
        self.run_round_with_stats(round, graph).0
    }

    /// Runs one round and reports its counters.
    pub fn run_round_with_stats(
        &mut self,
        round: Round,
        graph: &mut ComputeGraph,
    ) -> (Vec<NodeId>, RoundStats) {
        let mut stats = RoundStats::default();
        let mut created = Vec::new();

        for reg in self.passes.iter_mut().filter(|reg| reg.round == round) {
            let patterns = match reg.pass.patterns() {
                Ok(patterns) => patterns,
                Err(err) => {
                    warn!(pass = %reg.name, error = %err, "skipping pass: malformed pattern");
                    stats.passes_skipped += 1;
                    continue;
                }
            };
            stats.passes_run += 1;
            debug!(pass = %reg.name, patterns = patterns.len(), "running fusion pass");

            'pass: for pattern in &patterns {
                let mappings = match_all(pattern, graph);
                stats.mappings_matched += mappings.len();

                for mapping in mappings {
                    if !is_fresh(pattern, &mapping, graph) {
                        stats.mappings_stale += 1;
                        continue;
                    }
                    match reg.pass.rewrite(graph, &mapping) {
                        RewriteOutcome::Changed(new_nodes) => {
                            stats.rewrites_applied += 1;
                            created.extend(new_nodes);
                        }
                        RewriteOutcome::Unchanged => {}
                        RewriteOutcome::Failed(reason) => {
                            warn!(
                                pass = %reg.name,
                                mapping = %mapping,
                                reason,
                                "fusion rewrite failed; abandoning pass for this snapshot"
                            );
                            stats.rewrites_failed += 1;
                            break 'pass;
                        }
                    }
                }
            }
        }

        // Rewrites later in the round may have consumed nodes created
        // earlier; report only survivors, each once.
        let mut seen = FxHashSet::default();
        created.retain(|&id| graph.contains(id) && seen.insert(id));
        (created, stats)
    }
}

/// True if every binding of `mapping` still names a node of an accepted
/// type; earlier rewrites in the same pass may have consumed or
/// retyped it.
fn is_fresh(pattern: &FusionPattern, mapping: &Mapping, graph: &ComputeGraph) -> bool {
    mapping.bindings().all(|(name, id)| {
        let Some(node) = graph.node(id) else {
            return false;
        };
        pattern
            .node_id(name)
            .is_some_and(|pid| pattern.node(pid).accepts(node.op().op_type()))
    })
}
