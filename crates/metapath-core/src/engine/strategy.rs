//! Named strategy registry.
//!
//! Every pluggable piece of a run (weights, matrix backend, p-value combiner
//! and adjuster, streaming median) is looked up by name. Resolution happens
//! once, up front, so an unknown name fails before any matrix is built.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::StrategyNames;
use crate::engine::errors::EngineError;
use crate::engine::matrix::{MatrixFactory, NalgebraFactory, NdarrayFactory};
use crate::engine::weights::{
    EdgeWeight, NodeWeight, SignEdgeWeight, SubtypeEdgeWeight, TypeNodeWeight, UnitNodeWeight,
};
use crate::stats::adjust::{
    BenjaminiHochberg, BenjaminiYekutieli, Bonferroni, Hochberg, Holm, NoAdjustment,
    PValueAdjuster,
};
use crate::stats::combine::{Fisher, PValueCombiner, Stouffer, VoteCounting, Wilkinson};
use crate::stats::median::{ExactMedianFactory, MedianFactory, P2MedianFactory};

type CombinerResult = Result<Arc<dyn PValueCombiner>, EngineError>;
/// Combiners may read parameters from the strategy section.
type CombinerBuilder = Arc<dyn Fn(&StrategyNames) -> CombinerResult + Send + Sync>;

/// Strategies selected for one run.
#[derive(Debug, Clone)]
pub struct ResolvedStrategies {
    pub node_weight: Arc<dyn NodeWeight>,
    pub edge_weight: Arc<dyn EdgeWeight>,
    pub backend: Arc<dyn MatrixFactory>,
    pub combiner: Arc<dyn PValueCombiner>,
    pub adjuster: Arc<dyn PValueAdjuster>,
    pub median: Arc<dyn MedianFactory>,
}

#[derive(Clone, Default)]
pub struct StrategyRegistry {
    node_weights: BTreeMap<String, Arc<dyn NodeWeight>>,
    edge_weights: BTreeMap<String, Arc<dyn EdgeWeight>>,
    backends: BTreeMap<String, Arc<dyn MatrixFactory>>,
    combiners: BTreeMap<String, CombinerBuilder>,
    adjusters: BTreeMap<String, Arc<dyn PValueAdjuster>>,
    medians: BTreeMap<String, Arc<dyn MedianFactory>>,
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("node_weights", &self.node_weights.keys().collect::<Vec<_>>())
            .field("edge_weights", &self.edge_weights.keys().collect::<Vec<_>>())
            .field("backends", &self.backends.keys().collect::<Vec<_>>())
            .field("combiners", &self.combiners.keys().collect::<Vec<_>>())
            .field("adjusters", &self.adjusters.keys().collect::<Vec<_>>())
            .field("medians", &self.medians.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut r = Self::new();
        r.register_node_weight("unit", Arc::new(UnitNodeWeight));
        r.register_node_weight("type", Arc::new(TypeNodeWeight::default()));
        r.register_edge_weight("subtype", Arc::new(SubtypeEdgeWeight));
        r.register_edge_weight("sign", Arc::new(SignEdgeWeight));

        r.register_backend("nalgebra", Arc::new(NalgebraFactory::new()));
        r.register_backend("ndarray", Arc::new(NdarrayFactory::new()));

        r.register_combiner("fisher", Arc::new(Fisher));
        r.register_combiner("stouffer", Arc::new(Stouffer));
        r.register_combiner("wilkinson", Arc::new(Wilkinson));
        r.register_combiner("min", Arc::new(Wilkinson));
        r.combiners.insert(
            "vote-counting".into(),
            Arc::new(|names: &StrategyNames| -> CombinerResult {
                Ok(Arc::new(VoteCounting::new(names.vote_counting_threshold)?))
            }),
        );

        r.register_adjuster("none", Arc::new(NoAdjustment));
        r.register_adjuster("bonferroni", Arc::new(Bonferroni));
        r.register_adjuster("holm", Arc::new(Holm));
        r.register_adjuster("hochberg", Arc::new(Hochberg));
        r.register_adjuster("bh", Arc::new(BenjaminiHochberg));
        r.register_adjuster("fdr", Arc::new(BenjaminiHochberg));
        r.register_adjuster("by", Arc::new(BenjaminiYekutieli));

        r.register_median("exact", Arc::new(ExactMedianFactory));
        r.register_median("p2", Arc::new(P2MedianFactory));
        r
    }

    pub fn register_node_weight(&mut self, name: &str, w: Arc<dyn NodeWeight>) {
        self.node_weights.insert(name.to_string(), w);
    }

    pub fn register_edge_weight(&mut self, name: &str, w: Arc<dyn EdgeWeight>) {
        self.edge_weights.insert(name.to_string(), w);
    }

    pub fn register_backend(&mut self, name: &str, f: Arc<dyn MatrixFactory>) {
        self.backends.insert(name.to_string(), f);
    }

    pub fn register_combiner(&mut self, name: &str, c: Arc<dyn PValueCombiner>) {
        self.combiners.insert(
            name.to_string(),
            Arc::new(move |_: &StrategyNames| -> CombinerResult { Ok(Arc::clone(&c)) }),
        );
    }

    pub fn register_adjuster(&mut self, name: &str, a: Arc<dyn PValueAdjuster>) {
        self.adjusters.insert(name.to_string(), a);
    }

    pub fn register_median(&mut self, name: &str, m: Arc<dyn MedianFactory>) {
        self.medians.insert(name.to_string(), m);
    }

    pub fn backend(&self, name: &str) -> Option<Arc<dyn MatrixFactory>> {
        self.backends.get(name).cloned()
    }

    pub fn adjuster(&self, name: &str) -> Option<Arc<dyn PValueAdjuster>> {
        self.adjusters.get(name).cloned()
    }

    /// Resolves every name or fails on the first unknown one.
    pub fn resolve(&self, names: &StrategyNames) -> Result<ResolvedStrategies, EngineError> {
        fn find<T: Clone>(
            map: &BTreeMap<String, T>,
            kind: &'static str,
            name: &str,
        ) -> Result<T, EngineError> {
            map.get(name).cloned().ok_or_else(|| EngineError::StrategyNotFound {
                kind,
                name: name.to_string(),
            })
        }

        let combiner = find(&self.combiners, "combiner", &names.combiner)?;
        Ok(ResolvedStrategies {
            node_weight: find(&self.node_weights, "node weight", &names.node_weight)?,
            edge_weight: find(&self.edge_weights, "edge weight", &names.edge_weight)?,
            backend: find(&self.backends, "matrix backend", &names.backend)?,
            combiner: (combiner.as_ref())(names)?,
            adjuster: find(&self.adjusters, "adjuster", &names.adjuster)?,
            median: find(&self.medians, "median", &names.median)?,
        })
    }
}
