//! Contextualization for non-expressed nodes.
//!
//! A silenced node forwards (almost) nothing. Instead of re-inverting the
//! propagation system without it, an attenuation matrix `A` is built by
//! walking downstream from every silenced node and subtracting the share of
//! signal each reachable node received through it. The contextualized
//! operator is `A × M`.

use rustc_hash::FxHashSet;

use crate::engine::errors::EngineError;
use crate::engine::graph::{Graph, NodeKey};
use crate::engine::matrix::{Matrix, RawMatrix};
use crate::engine::propagation::{PathwayMatrix, WeightTable};

/// Either the base propagation matrix or an owned contextualized one.
#[derive(Debug)]
pub enum ContextualMatrix<'a> {
    Base(&'a dyn Matrix),
    Contextualized(Box<dyn Matrix>),
}

impl ContextualMatrix<'_> {
    pub fn is_contextualized(&self) -> bool {
        matches!(self, ContextualMatrix::Contextualized(_))
    }

    pub fn as_matrix(&self) -> &dyn Matrix {
        match self {
            ContextualMatrix::Base(m) => *m,
            ContextualMatrix::Contextualized(m) => m.as_ref(),
        }
    }
}

/// `10^(−⌈−log10 ε⌉ − 1)`: one order of magnitude below `ε`.
pub fn min_weight(epsilon: f64) -> f64 {
    // Tolerance keeps exact powers of ten from rounding up a decade.
    let decades = (-epsilon.log10() - 1e-9).ceil();
    10f64.powf(-decades - 1.0)
}

/// Builds the attenuation matrix for `sources` (indices into `pm`).
pub fn attenuation_matrix(
    graph: &Graph,
    weights: &WeightTable,
    pm: &PathwayMatrix,
    sources: &[NodeKey],
    epsilon: f64,
) -> RawMatrix {
    let n = pm.len();
    let threshold = min_weight(epsilon);
    let mut a = RawMatrix::identity(n);
    let mut source_rows = Vec::with_capacity(sources.len());

    for source in sources {
        let Some(s) = pm.index_of(source) else {
            continue;
        };
        source_rows.push(s);

        let mut visited: FxHashSet<NodeKey> = FxHashSet::default();
        visited.insert(source.clone());
        let mut stack: Vec<(NodeKey, f64)> = vec![(source.clone(), 1.0 - epsilon)];
        while let Some((current, carried)) = stack.pop() {
            let mut targets: Vec<&NodeKey> = graph
                .outgoing_edges(&current)
                .map(|e| e.target_key())
                .collect();
            targets.sort_unstable();
            for target in targets {
                let next = carried * weights.get(&current, target);
                if next.abs() < threshold || visited.contains(target) {
                    continue;
                }
                visited.insert(target.clone());
                if let Some(v) = pm.index_of(target) {
                    a.add_to(v, s, -next);
                }
                stack.push((target.clone(), next));
            }
        }
    }

    for s in source_rows {
        a.row_mut(s).fill(0.0);
        a.set(s, s, epsilon);
    }
    a
}

/// Contextualizes `pm` for `non_expressed` nodes.
///
/// Ids absent from the graph are skipped with a warning. With nothing to
/// silence the base matrix is borrowed as is.
pub fn contextualize<'a, S: AsRef<str>>(
    pm: &'a PathwayMatrix,
    graph: &Graph,
    weights: &WeightTable,
    non_expressed: &[S],
    epsilon: f64,
) -> Result<ContextualMatrix<'a>, EngineError> {
    if !(epsilon > 0.0 && epsilon < 1.0) {
        return Err(EngineError::Config(format!(
            "epsilon must lie in (0, 1), got {}",
            epsilon
        )));
    }
    let mut sources: Vec<NodeKey> = Vec::new();
    for id in non_expressed {
        let id = id.as_ref();
        match graph.node(id) {
            Some(node) if pm.index_of(id).is_some() => {
                if !sources.contains(node.key()) {
                    sources.push(node.key().clone());
                }
            }
            _ => {
                #[cfg(feature = "tracing")]
                tracing::warn!(node = id, "non-expressed node not in metapathway, skipped");
            }
        }
    }
    if sources.is_empty() {
        return Ok(ContextualMatrix::Base(pm.matrix()));
    }

    let attenuation = attenuation_matrix(graph, weights, pm, &sources, epsilon);
    let attenuation = pm.matrix().with_raw(attenuation)?;
    let contextualized = pm.matrix().pre_multiply(attenuation.as_ref())?;

    #[cfg(feature = "tracing")]
    tracing::debug!(silenced = sources.len(), "propagation matrix contextualized");

    Ok(ContextualMatrix::Contextualized(contextualized))
}
