//! Several impact experiments against one shared propagation model.
//!
//! Experiments run on a bounded rayon pool of `experiment_threads` workers.
//! Experiment `i` is seeded with `seed + i`, so results do not depend on
//! scheduling. A failing experiment is reported with its name and does not
//! affect the others.

use std::path::Path;

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{ImpactConfig, RuntimeConfig};
use crate::engine::errors::{EngineError, StageContext};
use crate::engine::impact::{ImpactAnalysis, ImpactInput, ImpactResult};
use crate::engine::model::PropagationModel;
use crate::storage::write_json_result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub name: String,
    pub input: ImpactInput,
}

impl Experiment {
    pub fn new(name: impl Into<String>, input: ImpactInput) -> Self {
        Self {
            name: name.into(),
            input,
        }
    }
}

#[derive(Debug)]
pub struct ExperimentReport {
    pub name: String,
    pub result: Result<ImpactResult, EngineError>,
}

#[derive(Debug)]
pub struct ExperimentRunner<'m> {
    model: &'m PropagationModel,
    impact: ImpactConfig,
    runtime: RuntimeConfig,
}

impl<'m> ExperimentRunner<'m> {
    pub fn new(model: &'m PropagationModel, impact: &ImpactConfig, runtime: &RuntimeConfig) -> Self {
        Self {
            model,
            impact: impact.clone(),
            runtime: runtime.clone(),
        }
    }

    fn run_one(&self, index: usize, experiment: &Experiment) -> ExperimentReport {
        let analysis = ImpactAnalysis::new(self.model, &self.impact, &self.runtime);
        let seed = self.impact.seed.wrapping_add(index as u64);
        let result = analysis
            .run_seeded(&experiment.input, seed)
            .stage_with(|| format!("experiment '{}'", experiment.name));

        #[cfg(feature = "tracing")]
        match &result {
            Ok(_) => tracing::info!(experiment = %experiment.name, "experiment finished"),
            Err(e) => tracing::warn!(experiment = %experiment.name, error = %e, "experiment failed"),
        }

        ExperimentReport {
            name: experiment.name.clone(),
            result,
        }
    }

    /// Runs every experiment; reports keep the input order.
    #[cfg(feature = "parallel")]
    pub fn run(&self, experiments: &[Experiment]) -> Result<Vec<ExperimentReport>, EngineError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.runtime.experiment_threads)
            .build()
            .map_err(|e| EngineError::Internal(format!("experiment pool: {}", e)))?;
        Ok(pool.install(|| {
            experiments
                .par_iter()
                .enumerate()
                .map(|(i, e)| self.run_one(i, e))
                .collect()
        }))
    }

    #[cfg(not(feature = "parallel"))]
    pub fn run(&self, experiments: &[Experiment]) -> Result<Vec<ExperimentReport>, EngineError> {
        Ok(experiments
            .iter()
            .enumerate()
            .map(|(i, e)| self.run_one(i, e))
            .collect())
    }
}

/// Writes every successful report to `<dir>/<name>.json`. Returns the number
/// of files written.
pub fn save_results(reports: &[ExperimentReport], dir: impl AsRef<Path>) -> Result<usize, EngineError> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)
        .map_err(|e| EngineError::Storage(format!("cannot create {}: {}", dir.display(), e)))?;
    let mut written = 0;
    for report in reports {
        if let Ok(result) = &report.result {
            write_json_result(dir.join(format!("{}.json", report.name)), result)?;
            written += 1;
        }
    }
    Ok(written)
}
