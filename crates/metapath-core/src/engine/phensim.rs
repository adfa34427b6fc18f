//! Constraint-driven phenotype simulation.
//!
//! ## Pipeline
//!
//! Simulation 0 applies the given constraints; simulations `1..=S` place the
//! same constraints (directions and magnitudes kept) on random compatible
//! nodes. Every simulation is bootstrapped over `repetitions` columns, global
//! column `c` belonging to simulation `c / repetitions`. Each column draws the
//! missing magnitudes uniformly from `[max(min_magnitude, ε), max_magnitude]`.
//!
//! Per simulation and per node (perturbation) or pathway (accumulator) the
//! reducer keeps Welford moments and activation/inhibition/no-change counts.
//!
//! ## Scores
//!
//! - **Activity** of the reference simulation: Laplace-smoothed log-odds of the
//!   dominant sign bucket, or the signed `−log10 p` of a two-sided mean test.
//! - **Significance**: normal difference tests against every resampled
//!   simulation combined with Fisher's method, or exceedance counting over the
//!   resampled activities. Both are adjusted per entity kind.
//!
//! Nodes and pathways not reachable from any constrained node are reported
//! with activity, mean and variance 0 and p-value 1.

use rand::distributions::Uniform;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use parking_lot::Mutex;

use crate::config::{PhensimConfig, RuntimeConfig};
use crate::engine::bootstrap::{
    BatchOutput, BootstrapEngine, ColumnGenerator, ColumnReducer, PropagationOperators,
};
use crate::engine::errors::EngineError;
use crate::engine::graph::{Graph, NodeKey};
use crate::engine::model::PropagationModel;
use crate::stats::combine::{Fisher, PValueCombiner};
use crate::stats::distributions::normal_two_sided;
use crate::stats::{empirical_p_value, p_value_floor, OnlineMoments, SignBuckets};

/// Degree relaxations tried before falling back to every eligible node.
pub const MAX_RELAXATIONS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivityMethod {
    /// `±log2(p_dominant / p_runner_up)` over Laplace-smoothed sign buckets.
    LogOdds,
    /// `sign(mean) · −log10(p)` of a two-sided normal mean test.
    Normal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignificanceMethod {
    NormalDifference,
    Fast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConstraintDirection {
    Over,
    Under,
}

impl ConstraintDirection {
    pub fn sign(self) -> f64 {
        match self {
            ConstraintDirection::Over => 1.0,
            ConstraintDirection::Under => -1.0,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            ConstraintDirection::Over => ConstraintDirection::Under,
            ConstraintDirection::Under => ConstraintDirection::Over,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub node: String,
    pub direction: ConstraintDirection,
    /// Fixed magnitude; drawn per column when absent.
    #[serde(default)]
    pub magnitude: Option<f64>,
}

impl Constraint {
    pub fn over(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            direction: ConstraintDirection::Over,
            magnitude: None,
        }
    }

    pub fn under(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            direction: ConstraintDirection::Under,
            magnitude: None,
        }
    }

    pub fn with_magnitude(mut self, magnitude: f64) -> Self {
        self.magnitude = Some(magnitude);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhensimInput {
    pub constraints: Vec<Constraint>,
    #[serde(default)]
    pub non_expressed: Vec<String>,
}

/// Reference-simulation statistics of one node or pathway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityReport {
    pub id: String,
    /// Hops from the closest constrained node, `None` when unreachable.
    pub distance: Option<usize>,
    pub mean: f64,
    pub variance: f64,
    pub activation: u64,
    pub inhibition: u64,
    pub no_change: u64,
    /// `NaN` when no direction can be determined.
    pub activity: f64,
    pub p_value: f64,
    pub adjusted_p_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhensimResult {
    pub simulations: usize,
    pub repetitions: usize,
    pub seed: u64,
    /// Constraints that matched a metapathway node.
    pub constraints: Vec<Constraint>,
    pub nodes: Vec<ActivityReport>,
    pub pathways: Vec<ActivityReport>,
}

impl PhensimResult {
    pub fn node(&self, id: &str) -> Option<&ActivityReport> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn pathway(&self, id: &str) -> Option<&ActivityReport> {
        self.pathways.iter().find(|p| p.id == id)
    }
}

/// Laplace-smoothed log-odds activity of a bucket count.
///
/// Positive for activation, negative for inhibition, 0 when no-change
/// dominates and `NaN` when the two largest buckets tie.
pub fn log_odds_activity(buckets: &SignBuckets) -> f64 {
    let n = buckets.total() as f64;
    let smoothed = |count: u64| (count as f64 + 1.0) / (n + 3.0);
    let mut ranked = [
        (1.0, buckets.activation),
        (-1.0, buckets.inhibition),
        (0.0, buckets.no_change),
    ];
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    let (sign, top) = ranked[0];
    let runner_up = ranked[1].1;
    if top == runner_up {
        return f64::NAN;
    }
    if sign == 0.0 {
        return 0.0;
    }
    sign * (smoothed(top) / smoothed(runner_up)).log2()
}

/// Two-sided p-value of `mean = 0`, floored at `floor`.
fn mean_test_p(moments: &OnlineMoments, floor: f64) -> f64 {
    if moments.count() == 0 {
        return 1.0;
    }
    let se = (moments.variance() / moments.count() as f64).sqrt();
    if se == 0.0 {
        return if moments.mean() == 0.0 { 1.0 } else { floor };
    }
    normal_two_sided(moments.mean() / se).max(floor)
}

/// `sign(mean) · −log10(p)` of the two-sided mean test.
pub fn normal_activity(moments: &OnlineMoments, floor: f64) -> f64 {
    let p = mean_test_p(moments, floor);
    let sign = if moments.mean() > 0.0 {
        1.0
    } else if moments.mean() < 0.0 {
        -1.0
    } else {
        0.0
    };
    sign * -p.log10()
}

/// Two-sided Welch-style z test of equal means, floored at `floor`.
fn difference_p(a: &OnlineMoments, b: &OnlineMoments, floor: f64) -> f64 {
    if a.count() == 0 || b.count() == 0 {
        return 1.0;
    }
    let se = (a.variance() / a.count() as f64 + b.variance() / b.count() as f64).sqrt();
    let diff = a.mean() - b.mean();
    if se == 0.0 {
        return if diff == 0.0 { 1.0 } else { floor };
    }
    normal_two_sided(diff / se).max(floor)
}

fn activity_exceeds(observed: f64, random: f64) -> bool {
    observed == 0.0
        || observed.is_nan()
        || (random * observed > 0.0 && random.abs() >= observed.abs())
}

/// Nodes eligible to carry resampled constraints.
///
/// Starts from the minimum in-degree of the constrained nodes and lowers it by
/// one until at least `needed` nodes qualify, at most [`MAX_RELAXATIONS`]
/// times. Then every node not in `excluded` qualifies.
pub fn compatible_nodes<S: AsRef<str>>(
    graph: &Graph,
    constrained: &[S],
    excluded: &FxHashSet<NodeKey>,
    needed: usize,
) -> Vec<NodeKey> {
    let eligible: Vec<NodeKey> = graph
        .sorted_node_ids()
        .into_iter()
        .filter(|id| !excluded.contains(id))
        .collect();
    let mut threshold = constrained
        .iter()
        .map(|id| graph.in_degree(id.as_ref()))
        .min()
        .unwrap_or(0);

    for _ in 0..=MAX_RELAXATIONS {
        let found: Vec<NodeKey> = eligible
            .iter()
            .filter(|id| graph.in_degree(id) >= threshold)
            .cloned()
            .collect();
        if found.len() >= needed {
            return found;
        }
        if threshold == 0 {
            break;
        }
        threshold -= 1;
    }

    #[cfg(feature = "tracing")]
    tracing::debug!(needed, "degree relaxation exhausted, using every eligible node");
    eligible
}

/// Constraint placed on a propagation-matrix index.
#[derive(Debug, Clone, Copy)]
struct Placed {
    index: usize,
    sign: f64,
    magnitude: Option<f64>,
}

/// Phenotype simulation bound to one propagation model.
#[derive(Debug)]
pub struct PhenotypeSimulation<'m> {
    model: &'m PropagationModel,
    config: PhensimConfig,
    threads: Option<usize>,
}

impl<'m> PhenotypeSimulation<'m> {
    pub fn new(model: &'m PropagationModel, config: &PhensimConfig, runtime: &RuntimeConfig) -> Self {
        Self {
            model,
            config: config.clone(),
            threads: runtime.threads,
        }
    }

    pub fn run(&self, input: &PhensimInput) -> Result<PhensimResult, EngineError> {
        self.run_seeded(input, self.config.seed)
    }

    pub fn run_seeded(&self, input: &PhensimInput, seed: u64) -> Result<PhensimResult, EngineError> {
        let cfg = &self.config;
        let pm = self.model.pathway_matrix();
        let rm = self.model.matrix();
        let lower = cfg.min_magnitude.max(cfg.epsilon);
        if !(lower < cfg.max_magnitude) || cfg.simulations == 0 || cfg.repetitions == 0 {
            return Err(EngineError::Config(
                "phensim: need simulations > 0, repetitions > 0 and max(min_magnitude, epsilon) < max_magnitude"
                    .into(),
            ));
        }

        let (constraints, reference) = self.place_constraints(input)?;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut sets = Vec::with_capacity(cfg.simulations + 1);
        sets.push(reference.clone());
        sets.extend(self.resample(&constraints, &reference, &input.non_expressed, &mut rng)?);

        let context = self.model.contextualize(&input.non_expressed, cfg.epsilon)?;
        let operators = PropagationOperators::new(context.as_matrix(), rm.membership())?;
        let engine = BootstrapEngine::new(operators, cfg.batch_size, self.threads)?;

        let mut generator = SimulatedColumns {
            sets,
            repetitions: cfg.repetitions,
            nodes: pm.len(),
            magnitude: Uniform::new_inclusive(lower, cfg.max_magnitude),
            rng,
        };
        let mut reducer = PhensimReducer {
            repetitions: cfg.repetitions,
            epsilon: cfg.epsilon,
            slots: (0..=cfg.simulations)
                .map(|_| {
                    Mutex::new(SimulationStats {
                        nodes: vec![Slot::default(); pm.len()],
                        pathways: vec![Slot::default(); rm.pathway_ids().len()],
                    })
                })
                .collect(),
        };

        #[cfg(feature = "tracing")]
        tracing::info!(
            constraints = constraints.len(),
            simulations = cfg.simulations,
            repetitions = cfg.repetitions,
            "phenotype simulation started"
        );

        engine.run((cfg.simulations + 1) * cfg.repetitions, &mut generator, &mut reducer)?;
        drop(engine);
        drop(context);

        let stats: Vec<SimulationStats> = reducer.slots.into_iter().map(Mutex::into_inner).collect();
        self.finalize(&stats, constraints, seed)
    }

    /// Keeps constraints on metapathway nodes, warning about the rest.
    fn place_constraints(
        &self,
        input: &PhensimInput,
    ) -> Result<(Vec<Constraint>, Vec<Placed>), EngineError> {
        let pm = self.model.pathway_matrix();
        let mut kept = Vec::new();
        let mut placed = Vec::new();
        for c in &input.constraints {
            if let Some(m) = c.magnitude {
                if !(m.is_finite() && m > 0.0) {
                    return Err(EngineError::Config(format!(
                        "magnitude of constraint on '{}' must be finite and > 0",
                        c.node
                    )));
                }
            }
            match pm.index_of(&c.node) {
                Some(index) => {
                    placed.push(Placed {
                        index,
                        sign: c.direction.sign(),
                        magnitude: c.magnitude,
                    });
                    kept.push(c.clone());
                }
                None => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(node = %c.node, "constrained node not in metapathway, skipped");
                }
            }
        }
        if placed.is_empty() {
            return Err(EngineError::Config(
                "phensim: no constrained node is part of the metapathway".into(),
            ));
        }
        Ok((kept, placed))
    }

    fn resample<R: Rng>(
        &self,
        constraints: &[Constraint],
        reference: &[Placed],
        non_expressed: &[String],
        rng: &mut R,
    ) -> Result<Vec<Vec<Placed>>, EngineError> {
        let graph = self.model.graph();
        let pm = self.model.pathway_matrix();
        let excluded: FxHashSet<NodeKey> = non_expressed
            .iter()
            .filter_map(|id| graph.node(id).map(|n| n.key().clone()))
            .collect();
        let constrained: Vec<&str> = constraints.iter().map(|c| c.node.as_str()).collect();
        let pool: Vec<usize> = compatible_nodes(graph, &constrained, &excluded, reference.len())
            .iter()
            .filter_map(|id| pm.index_of(id))
            .collect();
        // Random sets must be as large as the reference set.
        if pool.len() < reference.len() {
            return Err(EngineError::Config(format!(
                "phensim: {} constraints but only {} expressed nodes to resample from",
                reference.len(),
                pool.len()
            )));
        }

        Ok((0..self.config.simulations)
            .map(|_| {
                index::sample(&mut *rng, pool.len(), reference.len())
                    .iter()
                    .zip(reference)
                    .map(|(k, original)| Placed {
                        index: pool[k],
                        ..*original
                    })
                    .collect()
            })
            .collect())
    }

    fn finalize(
        &self,
        stats: &[SimulationStats],
        constraints: Vec<Constraint>,
        seed: u64,
    ) -> Result<PhensimResult, EngineError> {
        let pm = self.model.pathway_matrix();
        let rm = self.model.matrix();
        let graph = self.model.graph();

        let distances = graph.distances_from(constraints.iter().map(|c| c.node.as_str()));
        let node_distance: Vec<Option<usize>> =
            pm.ids().iter().map(|id| distances.get(id).copied()).collect();
        let pathway_distance: Vec<Option<usize>> = (0..rm.pathway_ids().len())
            .map(|j| {
                rm.pathway_members(j)
                    .into_iter()
                    .filter_map(|i| node_distance[i])
                    .min()
            })
            .collect();

        let node_ids: Vec<String> = pm.ids().iter().map(|id| id.to_string()).collect();
        let nodes = self.reports(stats, |s| &s.nodes, &node_ids, &node_distance)?;
        let pathways = self.reports(stats, |s| &s.pathways, rm.pathway_ids(), &pathway_distance)?;

        #[cfg(feature = "tracing")]
        {
            let unreachable = node_distance.iter().filter(|d| d.is_none()).count();
            tracing::info!(nodes = nodes.len(), unreachable, "phenotype simulation finished");
        }

        Ok(PhensimResult {
            simulations: self.config.simulations,
            repetitions: self.config.repetitions,
            seed,
            constraints,
            nodes,
            pathways,
        })
    }

    fn activity(&self, slot: &Slot) -> f64 {
        match self.config.activity {
            ActivityMethod::LogOdds => log_odds_activity(&slot.buckets),
            ActivityMethod::Normal => {
                normal_activity(&slot.moments, p_value_floor(self.config.repetitions))
            }
        }
    }

    fn reports<F>(
        &self,
        stats: &[SimulationStats],
        slots: F,
        ids: &[String],
        distances: &[Option<usize>],
    ) -> Result<Vec<ActivityReport>, EngineError>
    where
        F: Fn(&SimulationStats) -> &Vec<Slot>,
    {
        let floor = p_value_floor(self.config.repetitions);
        let reference = slots(&stats[0]);
        let resampled = &stats[1..];

        let mut p_values = Vec::with_capacity(ids.len());
        let mut activities = Vec::with_capacity(ids.len());
        for e in 0..ids.len() {
            let observed = &reference[e];
            let activity = self.activity(observed);
            let p = match self.config.significance {
                SignificanceMethod::NormalDifference => {
                    let pairwise: Vec<f64> = resampled
                        .iter()
                        .map(|s| difference_p(&observed.moments, &slots(s)[e].moments, floor))
                        .collect();
                    Fisher.combine(&pairwise).clamp(floor, 1.0)
                }
                SignificanceMethod::Fast => {
                    let count = resampled
                        .iter()
                        .filter(|s| activity_exceeds(activity, self.activity(&slots(s)[e])))
                        .count();
                    empirical_p_value(count as u64, resampled.len())?
                }
            };
            activities.push(activity);
            p_values.push(if distances[e].is_some() { p } else { 1.0 });
        }

        let adjusted = self.model.strategies().adjuster.adjust(&p_values);
        Ok(ids
            .iter()
            .enumerate()
            .map(|(e, id)| {
                let slot = &reference[e];
                let reachable = distances[e].is_some();
                ActivityReport {
                    id: id.clone(),
                    distance: distances[e],
                    mean: if reachable { slot.moments.mean() } else { 0.0 },
                    variance: if reachable { slot.moments.variance() } else { 0.0 },
                    activation: slot.buckets.activation,
                    inhibition: slot.buckets.inhibition,
                    no_change: slot.buckets.no_change,
                    activity: if reachable { activities[e] } else { 0.0 },
                    p_value: p_values[e],
                    adjusted_p_value: if reachable { adjusted[e] } else { 1.0 },
                }
            })
            .collect())
    }
}

struct SimulatedColumns {
    sets: Vec<Vec<Placed>>,
    repetitions: usize,
    nodes: usize,
    magnitude: Uniform<f64>,
    rng: ChaCha8Rng,
}

impl ColumnGenerator for SimulatedColumns {
    fn generate(&mut self, column: usize) -> Result<Vec<f64>, EngineError> {
        let set = self
            .sets
            .get(column / self.repetitions)
            .ok_or_else(|| EngineError::Internal(format!("column {} past the last simulation", column)))?;
        let mut out = vec![0.0; self.nodes];
        for placed in set {
            let magnitude = match placed.magnitude {
                Some(m) => m,
                None => self.rng.sample(self.magnitude),
            };
            out[placed.index] = placed.sign * magnitude;
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    moments: OnlineMoments,
    buckets: SignBuckets,
}

impl Slot {
    fn push(&mut self, value: f64, epsilon: f64) {
        self.moments.push(value);
        self.buckets.push(value, epsilon);
    }
}

#[derive(Debug)]
struct SimulationStats {
    nodes: Vec<Slot>,
    pathways: Vec<Slot>,
}

struct PhensimReducer {
    repetitions: usize,
    epsilon: f64,
    slots: Vec<Mutex<SimulationStats>>,
}

impl ColumnReducer for PhensimReducer {
    // Column 0 is an ordinary reference-simulation column.
    fn observe(&mut self, _batch: &BatchOutput) -> Result<(), EngineError> {
        Ok(())
    }

    fn reduce(&self, batch: &BatchOutput, local: usize) -> Result<(), EngineError> {
        let simulation = batch.global(local) / self.repetitions;
        let slot = self
            .slots
            .get(simulation)
            .ok_or_else(|| EngineError::Internal(format!("no simulation {}", simulation)))?;
        let mut stats = slot.lock();
        for (s, &v) in stats.nodes.iter_mut().zip(&batch.node_perturbation[local]) {
            s.push(v, self.epsilon);
        }
        for (s, &v) in stats.pathways.iter_mut().zip(&batch.pathway_accumulator[local]) {
            s.push(v, self.epsilon);
        }
        Ok(())
    }
}
