//! Run configuration.
//!
//! [`EngineConfig`] is read from TOML. Every field has a default, so an empty
//! document is a valid configuration:
//!
//! ```toml
//! [strategies]
//! node_weight = "unit"
//! edge_weight = "subtype"
//! backend = "nalgebra"
//! combiner = "fisher"
//! adjuster = "bh"
//! median = "exact"
//!
//! [impact]
//! repetitions = 1000
//!
//! [phensim]
//! simulations = 100
//! significance = "normal-difference"
//!
//! [reverse]
//! max_expansions = 100000
//!
//! [runtime]
//! threads = 4
//! ```
//!
//! [`EngineConfig::validate`] rejects bad ranges before any computation runs.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::engine::errors::EngineError;
use crate::engine::metapathway::{MergeOptions, PathwayFilter};
use crate::engine::phensim::{ActivityMethod, SignificanceMethod};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub strategies: StrategyNames,
    pub metapathway: MetapathwayConfig,
    pub impact: ImpactConfig,
    pub phensim: PhensimConfig,
    pub reverse: ReverseConfig,
    pub runtime: RuntimeConfig,
}

/// Names resolved through the strategy registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StrategyNames {
    pub node_weight: String,
    pub edge_weight: String,
    pub backend: String,
    pub combiner: String,
    pub adjuster: String,
    pub median: String,
    /// Only read by the `vote-counting` combiner.
    pub vote_counting_threshold: f64,
}

impl Default for StrategyNames {
    fn default() -> Self {
        Self {
            node_weight: "unit".into(),
            edge_weight: "subtype".into(),
            backend: "nalgebra".into(),
            combiner: "fisher".into(),
            adjuster: "bh".into(),
            median: "exact".into(),
            vote_counting_threshold: 0.05,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetapathwayConfig {
    pub include_pathways: Vec<String>,
    pub exclude_pathways: Vec<String>,
    pub include_categories: Vec<String>,
    pub exclude_categories: Vec<String>,
    pub use_priority: bool,
    pub allow_duplicates: bool,
    /// Customization tag: a node list that only namespaces the propagation
    /// cache. Matrices built under different lists are stored apart but are
    /// otherwise identical; the list never changes graph or weights.
    pub customization: Vec<String>,
}

impl Default for MetapathwayConfig {
    fn default() -> Self {
        let merge = MergeOptions::default();
        Self {
            include_pathways: Vec::new(),
            exclude_pathways: Vec::new(),
            include_categories: Vec::new(),
            exclude_categories: Vec::new(),
            use_priority: merge.use_priority,
            allow_duplicates: merge.allow_duplicates,
            customization: Vec::new(),
        }
    }
}

impl MetapathwayConfig {
    pub fn filter(&self) -> PathwayFilter {
        PathwayFilter::all()
            .include_pathways(self.include_pathways.iter().cloned())
            .exclude_pathways(self.exclude_pathways.iter().cloned())
            .include_categories(self.include_categories.iter().cloned())
            .exclude_categories(self.exclude_categories.iter().cloned())
    }

    pub fn merge_options(&self) -> MergeOptions {
        MergeOptions {
            use_priority: self.use_priority,
            allow_duplicates: self.allow_duplicates,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImpactConfig {
    /// Random permutations; 0 disables p-values.
    pub repetitions: usize,
    pub batch_size: usize,
    pub seed: u64,
    /// Residual signal of non-expressed nodes.
    pub epsilon: f64,
}

impl Default for ImpactConfig {
    fn default() -> Self {
        Self {
            repetitions: 1000,
            batch_size: 1000,
            seed: 42,
            epsilon: 0.001,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PhensimConfig {
    /// Resampled constraint sets compared against the reference one.
    pub simulations: usize,
    /// Bootstrap columns per simulation.
    pub repetitions: usize,
    pub batch_size: usize,
    pub seed: u64,
    /// Dead-zone around zero; also the silenced-node residual.
    pub epsilon: f64,
    pub min_magnitude: f64,
    pub max_magnitude: f64,
    pub activity: ActivityMethod,
    pub significance: SignificanceMethod,
}

impl Default for PhensimConfig {
    fn default() -> Self {
        Self {
            simulations: 100,
            repetitions: 1000,
            batch_size: 1000,
            seed: 42,
            epsilon: 0.001,
            min_magnitude: 0.0,
            max_magnitude: 10.0,
            activity: ActivityMethod::LogOdds,
            significance: SignificanceMethod::NormalDifference,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReverseConfig {
    /// Smallest single-shot perturbation that counts as reaching a target.
    pub epsilon: f64,
    /// Search-node budget for the set-cover search; `None` is unbounded.
    pub max_expansions: Option<usize>,
}

impl Default for ReverseConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.001,
            max_expansions: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Column-reduction workers; `None` uses the global rayon pool.
    pub threads: Option<usize>,
    /// Concurrent experiments in a multi-experiment run.
    pub experiment_threads: usize,
    /// Propagation-matrix cache directory; `None` disables caching.
    pub cache_dir: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            threads: None,
            experiment_threads: 1,
            cache_dir: None,
        }
    }
}

fn open_unit(value: f64) -> bool {
    value > 0.0 && value < 1.0
}

impl EngineConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = toml::from_str(source)?;
        config.validate()
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("cannot read config {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&source)
    }

    /// Checks every numeric range. Strategy names are checked by the registry.
    pub fn validate(self) -> Result<Self, EngineError> {
        if !open_unit(self.strategies.vote_counting_threshold) {
            return Err(EngineError::Config(
                "strategies.vote_counting_threshold must be in (0, 1)".into(),
            ));
        }
        if self.impact.batch_size == 0 {
            return Err(EngineError::Config("impact.batch_size must be > 0".into()));
        }
        if !open_unit(self.impact.epsilon) {
            return Err(EngineError::Config("impact.epsilon must be in (0, 1)".into()));
        }
        let p = &self.phensim;
        if p.batch_size == 0 {
            return Err(EngineError::Config("phensim.batch_size must be > 0".into()));
        }
        if p.repetitions == 0 {
            return Err(EngineError::Config("phensim.repetitions must be > 0".into()));
        }
        if p.simulations == 0 {
            return Err(EngineError::Config("phensim.simulations must be > 0".into()));
        }
        if !open_unit(p.epsilon) {
            return Err(EngineError::Config("phensim.epsilon must be in (0, 1)".into()));
        }
        if !(p.min_magnitude.is_finite() && p.max_magnitude.is_finite())
            || p.min_magnitude < 0.0
            || p.max_magnitude <= p.min_magnitude.max(p.epsilon)
        {
            return Err(EngineError::Config(
                "phensim: need 0 <= min_magnitude and max(min_magnitude, epsilon) < max_magnitude"
                    .into(),
            ));
        }
        if !open_unit(self.reverse.epsilon) {
            return Err(EngineError::Config("reverse.epsilon must be in (0, 1)".into()));
        }
        if self.runtime.threads == Some(0) {
            return Err(EngineError::Config("runtime.threads must be > 0".into()));
        }
        if self.runtime.experiment_threads == 0 {
            return Err(EngineError::Config(
                "runtime.experiment_threads must be > 0".into(),
            ));
        }
        Ok(self)
    }
}
