//! # Metapath Core
//!
//! Perturbation propagation over merged pathway graphs, bootstrap impact
//! analysis, phenotype simulation and reverse simulation.

pub mod config;
pub mod engine;
pub mod stats;
pub mod storage;

// Re-export commonly used types
pub use config::EngineConfig;
pub use engine::errors::EngineError;
pub use engine::graph::{Edge, EdgeDetail, EdgeSubtype, EdgeType, Graph, Node, NodeType};
pub use engine::impact::{ImpactAnalysis, ImpactInput, ImpactResult};
pub use engine::model::PropagationModel;
pub use engine::pathway::{Pathway, Repository};
pub use engine::phensim::{Constraint, PhenotypeSimulation, PhensimInput, PhensimResult};
pub use engine::reverse::{ReverseInput, ReverseOutcome, ReverseSimulation};
pub use engine::strategy::StrategyRegistry;

/// Builds the propagation model for `repository` with the built-in strategies.
pub fn build_model(repository: &Repository, config: &EngineConfig) -> Result<PropagationModel, EngineError> {
    PropagationModel::build(repository, config, &StrategyRegistry::with_builtins())
}
