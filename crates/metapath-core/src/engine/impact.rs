//! Impact analysis over a metapathway.
//!
//! ## Pipeline
//!
//! 1. The observed log-fold-changes form column 0.
//! 2. Every random column places the same values, shuffled, on distinct random
//!    nodes of the whole metapathway.
//! 3. Columns are propagated in batches (see [`crate::engine::bootstrap`]).
//!    Random pathway accumulators feed one streaming median per pathway, and
//!    every random column that is at least as extreme as the observation, with
//!    the same sign, counts as an exceedance.
//! 4. Finalization derives empirical p-values, adjusts node and pathway
//!    p-values independently, combines the pathway p-value with the
//!    hypergeometric enrichment probability and computes the impact factor.
//!
//! With zero repetitions only the observed column is propagated and every
//! p-value is absent.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rand::seq::{index, SliceRandom};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::config::{ImpactConfig, RuntimeConfig};
use crate::engine::bootstrap::{
    BatchOutput, BootstrapEngine, ColumnGenerator, ColumnReducer, PropagationOperators,
};
use crate::engine::errors::EngineError;
use crate::engine::model::PropagationModel;
use crate::stats::distributions::hypergeometric_upper_tail;
use crate::stats::{empirical_p_value, StreamingMedian};

/// Observed expression for one impact run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImpactInput {
    /// Node id → log-fold-change. Ids missing from the metapathway are ignored.
    pub expression: BTreeMap<String, f64>,
    /// Nodes silenced through contextualization.
    #[serde(default)]
    pub non_expressed: Vec<String>,
}

impl ImpactInput {
    pub fn new<I, S>(expression: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self {
            expression: expression.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            non_expressed: Vec::new(),
        }
    }

    pub fn with_non_expressed<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.non_expressed = ids.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeImpact {
    pub id: String,
    pub perturbation: f64,
    pub accumulator: f64,
    pub p_value: Option<f64>,
    pub adjusted_p_value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathwayImpact {
    pub id: String,
    pub name: String,
    /// Metapathway nodes in the pathway.
    pub size: usize,
    /// Differentially expressed nodes in the pathway.
    pub de_nodes: usize,
    pub accumulator: f64,
    /// `accumulator − median(random accumulators)`.
    pub corrected_accumulator: f64,
    pub impact_factor: f64,
    pub enrichment_p_value: f64,
    pub p_value: Option<f64>,
    pub adjusted_p_value: Option<f64>,
    pub combined_p_value: Option<f64>,
    pub adjusted_combined_p_value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactResult {
    pub repetitions: usize,
    pub seed: u64,
    pub nodes: Vec<NodeImpact>,
    pub pathways: Vec<PathwayImpact>,
}

impl ImpactResult {
    pub fn node(&self, id: &str) -> Option<&NodeImpact> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn pathway(&self, id: &str) -> Option<&PathwayImpact> {
        self.pathways.iter().find(|p| p.id == id)
    }
}

/// Impact analysis bound to one propagation model.
#[derive(Debug)]
pub struct ImpactAnalysis<'m> {
    model: &'m PropagationModel,
    config: ImpactConfig,
    threads: Option<usize>,
}

impl<'m> ImpactAnalysis<'m> {
    pub fn new(model: &'m PropagationModel, config: &ImpactConfig, runtime: &RuntimeConfig) -> Self {
        Self {
            model,
            config: config.clone(),
            threads: runtime.threads,
        }
    }

    pub fn run(&self, input: &ImpactInput) -> Result<ImpactResult, EngineError> {
        self.run_seeded(input, self.config.seed)
    }

    /// Same as [`ImpactAnalysis::run`] with an explicit RNG seed.
    pub fn run_seeded(&self, input: &ImpactInput, seed: u64) -> Result<ImpactResult, EngineError> {
        let pm = self.model.pathway_matrix();
        let rm = self.model.matrix();
        let observed = self.observed_column(input)?;
        let de: Vec<usize> = (0..observed.len()).filter(|&i| observed[i] != 0.0).collect();
        let repetitions = self.config.repetitions;

        let context = self.model.contextualize(&input.non_expressed, self.config.epsilon)?;
        let operators = PropagationOperators::new(context.as_matrix(), rm.membership())?;
        let engine = BootstrapEngine::new(operators, self.config.batch_size, self.threads)?;

        let median = &self.model.strategies().median;
        let mut generator = PermutedColumns {
            values: de.iter().map(|&i| observed[i]).collect(),
            observed,
            rng: ChaCha8Rng::seed_from_u64(seed),
        };
        let mut reducer = ImpactReducer {
            observed: None,
            node_exceedances: (0..pm.len()).map(|_| AtomicU64::new(0)).collect(),
            pathway_exceedances: (0..rm.pathway_ids().len()).map(|_| AtomicU64::new(0)).collect(),
            medians: (0..rm.pathway_ids().len())
                .map(|_| Mutex::new(median.create()))
                .collect(),
        };

        #[cfg(feature = "tracing")]
        tracing::info!(
            de = de.len(),
            repetitions,
            silenced = input.non_expressed.len(),
            "impact analysis started"
        );

        engine.run(1 + repetitions, &mut generator, &mut reducer)?;
        drop(engine);
        drop(context);

        let observed_input = generator.observed;
        self.finalize(reducer, &observed_input, &de, repetitions, seed)
    }

    fn observed_column(&self, input: &ImpactInput) -> Result<Vec<f64>, EngineError> {
        let pm = self.model.pathway_matrix();
        let mut column = vec![0.0; pm.len()];
        for (id, &value) in &input.expression {
            if !value.is_finite() {
                return Err(EngineError::Config(format!(
                    "expression value for '{}' is not finite",
                    id
                )));
            }
            match pm.index_of(id) {
                Some(i) => column[i] = value,
                None => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(node = %id, "expressed node not in metapathway, skipped");
                }
            }
        }
        Ok(column)
    }

    fn finalize(
        &self,
        reducer: ImpactReducer,
        input: &[f64],
        de: &[usize],
        repetitions: usize,
        seed: u64,
    ) -> Result<ImpactResult, EngineError> {
        let strategies = self.model.strategies();
        let pm = self.model.pathway_matrix();
        let rm = self.model.matrix();
        let observed = reducer
            .observed
            .ok_or_else(|| EngineError::Internal("observed column never propagated".into()))?;

        let p_values = |counts: &[AtomicU64]| -> Result<Option<Vec<f64>>, EngineError> {
            if repetitions == 0 {
                return Ok(None);
            }
            counts
                .iter()
                .map(|c| empirical_p_value(c.load(Ordering::Relaxed), repetitions))
                .collect::<Result<Vec<_>, _>>()
                .map(Some)
        };

        let node_p = p_values(&reducer.node_exceedances)?;
        let node_adjusted = node_p.as_deref().map(|p| strategies.adjuster.adjust(p));
        let nodes = pm
            .ids()
            .iter()
            .enumerate()
            .map(|(i, id)| NodeImpact {
                id: id.to_string(),
                perturbation: observed.perturbation[i],
                accumulator: observed.accumulator[i],
                p_value: node_p.as_ref().map(|p| p[i]),
                adjusted_p_value: node_adjusted.as_ref().map(|p| p[i]),
            })
            .collect();

        let population = pm.len() as u64;
        let de_total = de.len() as u64;
        let pathway_p = p_values(&reducer.pathway_exceedances)?;
        let mut pathways = Vec::with_capacity(rm.pathway_ids().len());
        let mut combined = Vec::with_capacity(rm.pathway_ids().len());

        for (j, id) in rm.pathway_ids().iter().enumerate() {
            let members = rm.pathway_members(j);
            let de_members: Vec<usize> = members.iter().copied().filter(|&i| input[i] != 0.0).collect();
            let enrichment = hypergeometric_upper_tail(
                de_members.len() as u64,
                population,
                de_total,
                members.len() as u64,
            );
            let raw = observed.pathway[j];
            let median = reducer.medians[j].lock().median();
            let corrected = if median.is_nan() { raw } else { raw - median };

            let count = de_members.len() as f64;
            let mean_de = if de_members.is_empty() {
                0.0
            } else {
                de_members.iter().map(|&i| input[i]).sum::<f64>() / count
            };
            let scale = mean_de * count;
            // A zero product means no DE node, or DE values that cancel out.
            let impact_factor = if scale == 0.0 {
                0.0
            } else {
                raw.abs() / scale.abs() - enrichment.log2()
            };

            let p = pathway_p.as_ref().map(|p| p[j]);
            combined.push(p.map(|p| strategies.combiner.combine(&[p, enrichment])));
            pathways.push(PathwayImpact {
                id: id.clone(),
                name: self
                    .model
                    .metapathway()
                    .virtual_pathway(id)
                    .map(|vp| vp.name.clone())
                    .unwrap_or_else(|| id.clone()),
                size: rm.pathway_sizes()[j],
                de_nodes: de_members.len(),
                accumulator: raw,
                corrected_accumulator: corrected,
                impact_factor,
                enrichment_p_value: enrichment,
                p_value: p,
                adjusted_p_value: None,
                combined_p_value: None,
                adjusted_combined_p_value: None,
            });
        }

        if let Some(p) = &pathway_p {
            let adjusted = strategies.adjuster.adjust(p);
            let combined: Vec<f64> = combined.iter().map(|c| c.unwrap_or(f64::NAN)).collect();
            let combined_adjusted = strategies.adjuster.adjust(&combined);
            for (j, pathway) in pathways.iter_mut().enumerate() {
                pathway.adjusted_p_value = Some(adjusted[j]);
                pathway.combined_p_value = Some(combined[j]);
                pathway.adjusted_combined_p_value = Some(combined_adjusted[j]);
            }
        }

        #[cfg(feature = "tracing")]
        tracing::info!(
            nodes = pm.len(),
            pathways = pathways.len(),
            "impact analysis finished"
        );

        Ok(ImpactResult {
            repetitions,
            seed,
            nodes,
            pathways,
        })
    }
}

struct PermutedColumns {
    observed: Vec<f64>,
    values: Vec<f64>,
    rng: ChaCha8Rng,
}

impl ColumnGenerator for PermutedColumns {
    fn generate(&mut self, column: usize) -> Result<Vec<f64>, EngineError> {
        if column == 0 {
            return Ok(self.observed.clone());
        }
        let n = self.observed.len();
        let mut out = vec![0.0; n];
        self.values.shuffle(&mut self.rng);
        let positions = index::sample(&mut self.rng, n, self.values.len());
        for (position, value) in positions.iter().zip(&self.values) {
            out[position] = *value;
        }
        Ok(out)
    }
}

#[derive(Debug)]
struct Observed {
    perturbation: Vec<f64>,
    accumulator: Vec<f64>,
    pathway: Vec<f64>,
}

struct ImpactReducer {
    observed: Option<Observed>,
    node_exceedances: Vec<AtomicU64>,
    pathway_exceedances: Vec<AtomicU64>,
    medians: Vec<Mutex<Box<dyn StreamingMedian>>>,
}

/// Same sign and at least as extreme. A zero observation is always exceeded.
fn exceeds(observed: f64, random: f64) -> bool {
    observed == 0.0 || (random * observed > 0.0 && random.abs() >= observed.abs())
}

impl ColumnReducer for ImpactReducer {
    fn observe(&mut self, batch: &BatchOutput) -> Result<(), EngineError> {
        self.observed = Some(Observed {
            perturbation: batch.node_perturbation[0].clone(),
            accumulator: batch.node_accumulator[0].clone(),
            pathway: batch.pathway_accumulator[0].clone(),
        });
        Ok(())
    }

    fn reduce(&self, batch: &BatchOutput, local: usize) -> Result<(), EngineError> {
        if batch.global(local) == 0 {
            return Ok(());
        }
        let observed = self
            .observed
            .as_ref()
            .ok_or_else(|| EngineError::Internal("random column reduced before observation".into()))?;

        for (i, &random) in batch.node_accumulator[local].iter().enumerate() {
            if exceeds(observed.accumulator[i], random) {
                self.node_exceedances[i].fetch_add(1, Ordering::Relaxed);
            }
        }
        for (j, &random) in batch.pathway_accumulator[local].iter().enumerate() {
            self.medians[j].lock().push(random);
            if exceeds(observed.pathway[j], random) {
                self.pathway_exceedances[j].fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::graph::{Edge, EdgeDetail, EdgeSubtype, EdgeType, Graph, Node, NodeType};
    use crate::engine::pathway::{Pathway, Repository};
    use crate::engine::strategy::StrategyRegistry;

    fn chain_model(config: &EngineConfig) -> PropagationModel {
        let mut g = Graph::new();
        for id in ["a", "b", "c"] {
            g.add_node(Node::new(id, id, NodeType::Gene));
        }
        for (s, t) in [("a", "b"), ("b", "c")] {
            g.add_edge(Edge::new(s, t, EdgeDetail::new(EdgeType::Pprel, EdgeSubtype::Activation)))
                .unwrap();
        }
        let mut repo = Repository::new();
        repo.add(Pathway::new("p", "Chain", g)).unwrap();
        PropagationModel::build(&repo, config, &StrategyRegistry::with_builtins()).unwrap()
    }

    fn config(repetitions: usize) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.impact.repetitions = repetitions;
        config.impact.batch_size = 16;
        config
    }

    #[test]
    fn exceedance_needs_same_sign() {
        assert!(exceeds(1.0, 2.0));
        assert!(exceeds(1.0, 1.0));
        assert!(!exceeds(1.0, 0.5));
        assert!(!exceeds(1.0, -3.0));
        assert!(!exceeds(-1.0, 0.0));
        assert!(exceeds(0.0, 0.0));
    }

    #[test]
    fn zero_repetitions_report_no_p_values() {
        let config = config(0);
        let model = chain_model(&config);
        let result = ImpactAnalysis::new(&model, &config.impact, &config.runtime)
            .run(&ImpactInput::new([("a", 2.0)]))
            .unwrap();
        let c = result.node("c").unwrap();
        assert!((c.perturbation - 2.0).abs() < 1e-9);
        assert!((c.accumulator - 2.0).abs() < 1e-9);
        assert!(c.p_value.is_none());

        let p = result.pathway("p").unwrap();
        assert_eq!(p.name, "Chain");
        assert!((p.accumulator - 4.0).abs() < 1e-9);
        assert_eq!(p.corrected_accumulator, p.accumulator);
        assert!(p.p_value.is_none() && p.combined_p_value.is_none());
        // Every node is in the pathway: enrichment is certain.
        assert!((p.enrichment_p_value - 1.0).abs() < 1e-12);
        assert!((p.impact_factor - 2.0).abs() < 1e-9);
    }

    #[test]
    fn no_de_nodes_gives_zero_impact_factor() {
        let config = config(0);
        let model = chain_model(&config);
        let result = ImpactAnalysis::new(&model, &config.impact, &config.runtime)
            .run(&ImpactInput::new([("missing", 2.0)]))
            .unwrap();
        assert_eq!(result.pathways[0].impact_factor, 0.0);
        assert_eq!(result.pathways[0].de_nodes, 0);
    }

    #[test]
    fn cancelling_de_values_give_zero_impact_factor() {
        let config = config(0);
        let model = chain_model(&config);
        let result = ImpactAnalysis::new(&model, &config.impact, &config.runtime)
            .run(&ImpactInput::new([("a", 1.0), ("b", -1.0)]))
            .unwrap();
        let p = result.pathway("p").unwrap();
        assert_eq!(p.de_nodes, 2);
        assert_eq!(p.impact_factor, 0.0);
    }

    #[test]
    fn p_values_are_bounded_and_reproducible() {
        let config = config(200);
        let model = chain_model(&config);
        let analysis = ImpactAnalysis::new(&model, &config.impact, &config.runtime);
        let input = ImpactInput::new([("a", 1.0)]);
        let first = analysis.run(&input).unwrap();
        let second = analysis.run(&input).unwrap();
        assert_eq!(first, second);

        let floor = 1.0 / (200.0 * 100.0);
        for node in &first.nodes {
            let p = node.p_value.unwrap();
            assert!((floor..=1.0).contains(&p), "{} has p {}", node.id, p);
        }
        // Observed accumulator of `a` is zero, so every column exceeds it.
        assert_eq!(first.node("a").unwrap().p_value, Some(1.0));
        let pathway = &first.pathways[0];
        assert!(pathway.combined_p_value.is_some());
        assert!(pathway.adjusted_combined_p_value.unwrap() <= 1.0);
    }

    #[test]
    fn runs_release_every_matrix() {
        let config = config(20);
        let model = chain_model(&config);
        let backend = model.strategies().backend.clone();
        let baseline = backend.live_matrices();
        ImpactAnalysis::new(&model, &config.impact, &config.runtime)
            .run(&ImpactInput::new([("a", 1.0)]).with_non_expressed(["b"]))
            .unwrap();
        assert_eq!(backend.live_matrices(), baseline);
    }

    #[test]
    fn non_finite_expression_is_rejected() {
        let config = config(0);
        let model = chain_model(&config);
        let err = ImpactAnalysis::new(&model, &config.impact, &config.runtime)
            .run(&ImpactInput::new([("a", f64::NAN)]))
            .unwrap_err();
        assert!(err.to_string().contains("'a'"));
    }
}
