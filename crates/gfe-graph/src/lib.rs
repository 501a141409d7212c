//! # GFE Compute Graph
//!
//! This crate defines the mutable dataflow compute graph that the GFE
//! fusion engine rewrites, together with the tensor descriptor model
//! carried on every data anchor.
//!
//! ## Overview
//!
//! A [`ComputeGraph`] owns its [`Node`]s exclusively; everything else
//! refers to nodes through [`NodeId`] handles and to connection points
//! through [`OutAnchor`]/[`InAnchor`] index pairs. There are no
//! pointers between nodes, so graph surgery never chases or invalidates
//! references; it edits peer tables under checked operations.
//!
//! ## Pipeline position
//!
//! ```text
//! Framework import (plugins)
//!     |
//!     v
//! [Shape/type inference]   <- external: populates descriptors
//!     |
//!     v
//! [ComputeGraph]           <- this crate: nodes, anchors, subgraphs
//!     |
//!     v
//! [Fusion passes]          <- gfe-fusion: match and rewrite
//!     |
//!     v
//! [Tiling / codegen]       <- external: consumes the rewritten graph
//! ```
//!
//! ## Edge kinds
//!
//! - **Data edges** connect an output anchor to an input anchor. An
//!   input anchor has at most one producer at any time; connecting an
//!   already-bound input fails with [`GraphError::InputAlreadyBound`].
//! - **Control edges** connect nodes directly and fan in/out freely.
//!
//! ## Subgraph nesting
//!
//! A node may own named nested graphs (the Cond/Body of a `While`),
//! attached with explicit positional input/output mappings; see
//! [`ComputeGraph::attach_subgraph`].
//!
//! ## Main types
//!
//! - [`ComputeGraph`], [`Node`], [`OpDesc`], [`AttrValue`]
//! - [`TensorDescriptor`], [`Shape`], [`Format`], [`DataType`]
//! - [`GraphError`], [`TensorError`]

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod graph;
pub mod op;
pub mod tensor;

use std::fmt;

use serde::{Deserialize, Serialize};

use gfe_index::Idx;

pub use graph::{
    ComputeGraph, InAnchor, Node, OutAnchor, SubgraphBinding, DATA_OP, NET_OUTPUT_OP,
};
pub use op::{AttrValue, OpDesc};
pub use tensor::{
    derive_storage_shape, DataType, Dim, DimRange, Format, Shape, TensorDescriptor, TensorError,
};

/// A handle to a node owned by some [`ComputeGraph`].
///
/// Ids are unique within their graph and never reused after removal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u32);

impl Idx for NodeId {
    fn new(idx: usize) -> Self {
        Self(idx as u32)
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Which side of a data edge an anchor sits on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnchorKind {
    /// A data input anchor.
    DataIn,
    /// A data output anchor.
    DataOut,
}

impl fmt::Display for AnchorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataIn => f.write_str("input"),
            Self::DataOut => f.write_str("output"),
        }
    }
}

/// Errors raised by checked graph operations and by graph surgery.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum GraphError {
    /// The referenced node is not present in this graph.
    #[error("node {0} not found in graph")]
    NodeNotFound(NodeId),

    /// The referenced anchor does not exist (bad node or index), or a
    /// peer table is inconsistent with it.
    #[error("no {kind} anchor {index} on node {node}")]
    AnchorNotFound {
        /// Owning node.
        node: NodeId,
        /// Anchor side.
        kind: AnchorKind,
        /// Anchor position.
        index: usize,
    },

    /// A data input anchor already has a producer; disconnect it first.
    #[error("input anchor {index} of node {node} is already bound")]
    InputAlreadyBound {
        /// Consumer node.
        node: NodeId,
        /// Input position.
        index: usize,
    },

    /// The node still has connected anchors; unlink before removal.
    #[error("node {node} still has connected anchors")]
    NodeStillConnected {
        /// The node that was not fully unlinked.
        node: NodeId,
    },

    /// An input/output count does not match the declared mapping.
    #[error("arity mismatch: expected {expected}, got {got}")]
    ArityMismatch {
        /// Required count.
        expected: usize,
        /// Actual count.
        got: usize,
    },

    /// A descriptor operation failed mid-surgery.
    #[error(transparent)]
    Tensor(#[from] TensorError),
}
