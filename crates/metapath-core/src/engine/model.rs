//! Shared, read-only propagation substrate.
//!
//! A [`PropagationModel`] bundles everything a simulation needs and never
//! mutates: the metapathway, its propagation and membership matrices, the
//! memoised edge weights and the resolved strategies. It is `Sync` and is
//! borrowed by concurrent experiments.

use crate::config::EngineConfig;
use crate::engine::context::{contextualize, ContextualMatrix};
use crate::engine::errors::{EngineError, StageContext};
use crate::engine::graph::Graph;
use crate::engine::metapathway::Metapathway;
use crate::engine::pathway::Repository;
use crate::engine::propagation::{PathwayMatrix, RepositoryMatrix, WeightTable};
use crate::engine::strategy::{ResolvedStrategies, StrategyRegistry};
use crate::storage::MatrixCache;

#[derive(Debug)]
pub struct PropagationModel {
    metapathway: Metapathway,
    matrix: RepositoryMatrix,
    weights: WeightTable,
    strategies: ResolvedStrategies,
}

impl PropagationModel {
    /// Resolves strategies, merges the metapathway and builds (or restores)
    /// its propagation matrix.
    pub fn build(
        repository: &Repository,
        config: &EngineConfig,
        registry: &StrategyRegistry,
    ) -> Result<Self, EngineError> {
        let strategies = registry.resolve(&config.strategies)?;
        let section = &config.metapathway;
        let metapathway = Metapathway::build(repository, &section.filter(), section.merge_options())
            .stage("metapathway")?;
        let cache = match &config.runtime.cache_dir {
            Some(dir) => Some(MatrixCache::open(dir.clone()).stage("matrix cache")?),
            None => None,
        };
        Self::from_metapathway(metapathway, strategies, cache.as_ref(), &section.customization)
    }

    pub fn from_metapathway(
        metapathway: Metapathway,
        strategies: ResolvedStrategies,
        cache: Option<&MatrixCache>,
        customization: &[String],
    ) -> Result<Self, EngineError> {
        let weights = WeightTable::build(
            metapathway.graph(),
            strategies.node_weight.as_ref(),
            strategies.edge_weight.as_ref(),
        );
        let matrix = RepositoryMatrix::build(
            &metapathway,
            strategies.node_weight.as_ref(),
            strategies.edge_weight.as_ref(),
            strategies.backend.as_ref(),
            cache,
            customization,
        )?;

        #[cfg(feature = "tracing")]
        tracing::info!(
            nodes = matrix.pathway_matrix().len(),
            pathways = matrix.pathway_ids().len(),
            backend = strategies.backend.name(),
            "propagation model ready"
        );

        Ok(Self {
            metapathway,
            matrix,
            weights,
            strategies,
        })
    }

    pub fn metapathway(&self) -> &Metapathway {
        &self.metapathway
    }

    pub fn graph(&self) -> &Graph {
        self.metapathway.graph()
    }

    pub fn matrix(&self) -> &RepositoryMatrix {
        &self.matrix
    }

    pub fn pathway_matrix(&self) -> &PathwayMatrix {
        self.matrix.pathway_matrix()
    }

    pub fn weights(&self) -> &WeightTable {
        &self.weights
    }

    pub fn strategies(&self) -> &ResolvedStrategies {
        &self.strategies
    }

    /// Propagation operator with `non_expressed` nodes silenced.
    pub fn contextualize<S: AsRef<str>>(
        &self,
        non_expressed: &[S],
        epsilon: f64,
    ) -> Result<ContextualMatrix<'_>, EngineError> {
        contextualize(
            self.matrix.pathway_matrix(),
            self.graph(),
            &self.weights,
            non_expressed,
            epsilon,
        )
        .stage("contextualization")
    }
}
