//! The propagation and simulation engine.
//!
//! This module provides:
//! - **errors**: Error types and stage annotation
//! - **graph**: Directed multigraph with alias lookup and traversal
//! - **pathway**: Pathways and the pathway repository
//! - **metapathway**: Filtered merge of a repository with virtual pathways
//! - **weights**: Node and edge weight strategies
//! - **matrix**: Backend-agnostic dense matrices (`nalgebra`, `ndarray`)
//! - **propagation**: Propagation and membership matrices, with caching
//! - **context**: Attenuation for non-expressed nodes
//! - **strategy**: Named strategy registry
//! - **model**: Shared read-only propagation substrate
//! - **bootstrap**: Batched propagation with streaming column reduction
//! - **impact**: Impact analysis
//! - **phensim**: Constraint-driven phenotype simulation
//! - **setcover**: Branch-and-bound minimum set cover
//! - **reverse**: Reverse simulation over single-shot responses
//! - **experiments**: Concurrent impact experiments

pub mod bootstrap;
pub mod context;
pub mod errors;
pub mod experiments;
pub mod graph;
pub mod impact;
pub mod matrix;
pub mod metapathway;
pub mod model;
pub mod pathway;
pub mod phensim;
pub mod propagation;
pub mod reverse;
pub mod setcover;
pub mod strategy;
pub mod weights;
