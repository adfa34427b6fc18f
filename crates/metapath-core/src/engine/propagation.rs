//! Propagation-matrix construction.
//!
//! ## Model
//!
//! `W[v, u] = nodeWeight(u) · edgeWeight(u → v) / outDegree(u)` is the share of
//! `u`'s perturbation that reaches `v` in one step (row = target, column =
//! source). The steady-state operator is `M = (I − W)⁺`, so that the
//! perturbation of every node for an input `x` is `M × x`.
//!
//! ## Caching
//!
//! Inversion is O(n³). [`RepositoryMatrix::build`] consults a [`MatrixCache`]
//! keyed by the metapathway digest (with the weight strategy names) and the
//! customization list before inverting, and stores fresh results. The
//! customization list is a namespace tag only; it does not alter the matrix.

use rustc_hash::FxHashMap;

use crate::engine::errors::{EngineError, StageContext};
use crate::engine::graph::{Graph, NodeKey};
use crate::engine::matrix::{Matrix, MatrixFactory, RawMatrix};
use crate::engine::metapathway::Metapathway;
use crate::engine::weights::{EdgeWeight, NodeWeight};
use crate::storage::{CachedMatrix, MatrixCache};

/// Out-degree-normalized edge weights, computed once per build.
#[derive(Debug, Clone, Default)]
pub struct WeightTable {
    weights: FxHashMap<(NodeKey, NodeKey), f64>,
}

impl WeightTable {
    pub fn build(graph: &Graph, node_weight: &dyn NodeWeight, edge_weight: &dyn EdgeWeight) -> Self {
        let mut weights = FxHashMap::default();
        for node in graph.nodes() {
            let degree = graph.out_degree(node.id());
            if degree == 0 {
                continue;
            }
            let scale = node_weight.weight(node) / degree as f64;
            for edge in graph.outgoing_edges(node.id()) {
                weights.insert(
                    (edge.source_key().clone(), edge.target_key().clone()),
                    scale * edge_weight.weight(edge, graph),
                );
            }
        }
        Self { weights }
    }

    /// Normalized weight of `source → target`, 0 for missing edges.
    pub fn get(&self, source: &str, target: &str) -> f64 {
        self.weights
            .get(&(NodeKey::from(source), NodeKey::from(target)))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeKey, &NodeKey, f64)> {
        self.weights.iter().map(|((s, t), w)| (s, t, *w))
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

/// Node index map plus the inverted propagation matrix.
#[derive(Debug)]
pub struct PathwayMatrix {
    ids: Vec<NodeKey>,
    index: FxHashMap<NodeKey, usize>,
    matrix: Box<dyn Matrix>,
}

impl PathwayMatrix {
    /// Builds `W`, then inverts `I − W` on `factory`'s backend.
    pub fn build(
        graph: &Graph,
        weights: &WeightTable,
        factory: &dyn MatrixFactory,
    ) -> Result<Self, EngineError> {
        let ids = graph.sorted_node_ids();
        let index = index_of(&ids);
        let n = ids.len();

        let mut system = RawMatrix::identity(n);
        for (source, target, w) in weights.iter() {
            if let (Some(&u), Some(&v)) = (index.get(source), index.get(target)) {
                system.add_to(v, u, -w);
            }
        }

        let system = factory.from_raw(system)?;
        let matrix = system.pseudo_inverse();

        #[cfg(feature = "tracing")]
        tracing::debug!(nodes = n, backend = factory.name(), "propagation matrix inverted");

        Ok(Self { ids, index, matrix })
    }

    /// Restores a matrix from its parts, checking the shape.
    pub fn from_parts(ids: Vec<NodeKey>, matrix: Box<dyn Matrix>) -> Result<Self, EngineError> {
        if matrix.rows() != ids.len() || matrix.columns() != ids.len() {
            return Err(EngineError::Matrix(format!(
                "propagation matrix is {}x{} for {} nodes",
                matrix.rows(),
                matrix.columns(),
                ids.len()
            )));
        }
        let index = index_of(&ids);
        Ok(Self { ids, index, matrix })
    }

    pub fn ids(&self) -> &[NodeKey] {
        &self.ids
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn matrix(&self) -> &dyn Matrix {
        self.matrix.as_ref()
    }

    /// Dense input vector in index order; unknown ids are ignored.
    pub fn input_vector<'a, I>(&self, values: I) -> Vec<f64>
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let mut out = vec![0.0; self.len()];
        for (id, value) in values {
            if let Some(i) = self.index_of(id) {
                out[i] = value;
            }
        }
        out
    }
}

fn index_of(ids: &[NodeKey]) -> FxHashMap<NodeKey, usize> {
    ids.iter().enumerate().map(|(i, id)| (id.clone(), i)).collect()
}

/// Propagation matrix plus node × pathway membership.
#[derive(Debug)]
pub struct RepositoryMatrix {
    pathway_matrix: PathwayMatrix,
    pathway_ids: Vec<String>,
    pathway_index: FxHashMap<String, usize>,
    /// Node × pathway, 1 when the node is in the virtual pathway.
    membership: Box<dyn Matrix>,
    pathway_sizes: Vec<usize>,
}

impl RepositoryMatrix {
    /// Builds (or restores from `cache`) the propagation matrix of `meta` and
    /// its membership matrix over the reported virtual pathways.
    ///
    /// `customization` selects the cache entry and nothing else.
    pub fn build(
        meta: &Metapathway,
        node_weight: &dyn NodeWeight,
        edge_weight: &dyn EdgeWeight,
        factory: &dyn MatrixFactory,
        cache: Option<&MatrixCache>,
        customization: &[String],
    ) -> Result<Self, EngineError> {
        let digest = format!(
            "{}:{}:{}",
            meta.digest(),
            node_weight.name(),
            edge_weight.name()
        );
        let key = MatrixCache::key(&digest, customization);
        let cached = cache.and_then(|c| c.load(&key));

        let pathway_matrix = match cached {
            Some(entry) if ids_match(&entry.ids, meta.graph()) => {
                #[cfg(feature = "tracing")]
                tracing::info!(key = %key, "propagation matrix cache hit");
                let ids = entry.ids.iter().map(|s| NodeKey::from(s.as_str())).collect();
                PathwayMatrix::from_parts(ids, factory.from_raw(entry.matrix)?)?
            }
            _ => {
                let weights = WeightTable::build(meta.graph(), node_weight, edge_weight);
                let pm = PathwayMatrix::build(meta.graph(), &weights, factory)
                    .stage("matrix inversion")?;
                if let Some(cache) = cache {
                    let entry = CachedMatrix {
                        ids: pm.ids().iter().map(|k| k.to_string()).collect(),
                        matrix: pm.matrix().to_raw(),
                    };
                    cache.store(&key, &entry).stage("matrix cache")?;
                }
                pm
            }
        };

        Self::with_membership(pathway_matrix, meta, factory)
    }

    /// Pairs an existing propagation matrix with the membership of `meta`.
    pub fn with_membership(
        pathway_matrix: PathwayMatrix,
        meta: &Metapathway,
        factory: &dyn MatrixFactory,
    ) -> Result<Self, EngineError> {
        let reported: Vec<_> = meta.reported_pathways().collect();
        let mut membership = RawMatrix::zeros(pathway_matrix.len(), reported.len());
        let mut pathway_sizes = Vec::with_capacity(reported.len());
        for (j, vp) in reported.iter().enumerate() {
            let mut size = 0;
            for node in &vp.nodes {
                if let Some(i) = pathway_matrix.index_of(node) {
                    membership.set(i, j, 1.0);
                    size += 1;
                }
            }
            pathway_sizes.push(size);
        }
        let pathway_ids: Vec<String> = reported.iter().map(|vp| vp.id.clone()).collect();
        let pathway_index = pathway_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();
        Ok(Self {
            membership: factory.from_raw(membership)?,
            pathway_matrix,
            pathway_ids,
            pathway_index,
            pathway_sizes,
        })
    }

    pub fn pathway_matrix(&self) -> &PathwayMatrix {
        &self.pathway_matrix
    }

    pub fn membership(&self) -> &dyn Matrix {
        self.membership.as_ref()
    }

    pub fn pathway_ids(&self) -> &[String] {
        &self.pathway_ids
    }

    pub fn pathway_index_of(&self, id: &str) -> Option<usize> {
        self.pathway_index.get(id).copied()
    }

    /// Number of metapathway nodes in each reported pathway.
    pub fn pathway_sizes(&self) -> &[usize] {
        &self.pathway_sizes
    }

    /// Node indices belonging to pathway `j`.
    pub fn pathway_members(&self, j: usize) -> Vec<usize> {
        (0..self.pathway_matrix.len())
            .filter(|&i| self.membership.get(i, j) != 0.0)
            .collect()
    }
}

fn ids_match(cached: &[String], graph: &Graph) -> bool {
    let ids = graph.sorted_node_ids();
    cached.len() == ids.len() && cached.iter().zip(&ids).all(|(a, b)| a.as_str() == b.as_ref())
}
