//! Node and edge weight strategies.
//!
//! Weights are never attached to the graph types as global state. Builders
//! receive the strategies explicitly, so runs with different weighting can
//! execute side by side.

use std::fmt;

use crate::engine::graph::{Edge, Graph, Node, NodeType};

/// Scales the signal a node forwards to its successors.
pub trait NodeWeight: Send + Sync + fmt::Debug + 'static {
    /// Registry name, also part of the propagation cache key.
    fn name(&self) -> &'static str;
    fn weight(&self, node: &Node) -> f64;
}

/// Signed weight of an edge, before out-degree normalization.
pub trait EdgeWeight: Send + Sync + fmt::Debug + 'static {
    fn name(&self) -> &'static str;
    fn weight(&self, edge: &Edge, graph: &Graph) -> f64;
}

/// Every node forwards its full signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnitNodeWeight;

impl NodeWeight for UnitNodeWeight {
    fn name(&self) -> &'static str {
        "unit"
    }

    fn weight(&self, _node: &Node) -> f64 {
        1.0
    }
}

/// Damps compounds and unknown entities, which rarely carry expression signal.
#[derive(Debug, Clone, Copy)]
pub struct TypeNodeWeight {
    pub gene: f64,
    pub mirna: f64,
    pub compound: f64,
    pub other: f64,
}

impl Default for TypeNodeWeight {
    fn default() -> Self {
        Self {
            gene: 1.0,
            mirna: 1.0,
            compound: 0.5,
            other: 0.5,
        }
    }
}

impl NodeWeight for TypeNodeWeight {
    fn name(&self) -> &'static str {
        "type"
    }

    fn weight(&self, node: &Node) -> f64 {
        match node.node_type() {
            NodeType::Gene => self.gene,
            NodeType::Mirna => self.mirna,
            NodeType::Compound => self.compound,
            NodeType::Other => self.other,
        }
    }
}

/// Sum of the subtype weights of every detail on the edge.
///
/// An edge carrying both an activation and an inhibition therefore cancels out.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubtypeEdgeWeight;

impl EdgeWeight for SubtypeEdgeWeight {
    fn name(&self) -> &'static str {
        "subtype"
    }

    fn weight(&self, edge: &Edge, _graph: &Graph) -> f64 {
        edge.details().iter().map(|d| d.subtype.weight()).sum()
    }
}

/// Sign of [`SubtypeEdgeWeight`], so multi-detail edges count once.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignEdgeWeight;

impl EdgeWeight for SignEdgeWeight {
    fn name(&self) -> &'static str {
        "sign"
    }

    fn weight(&self, edge: &Edge, graph: &Graph) -> f64 {
        let w = SubtypeEdgeWeight.weight(edge, graph);
        if w > 0.0 {
            1.0
        } else if w < 0.0 {
            -1.0
        } else {
            0.0
        }
    }
}
