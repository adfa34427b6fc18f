//! Reverse simulation: smallest sets of source perturbations that reproduce
//! the desired direction on every target.
//!
//! Each candidate source is perturbed once in each direction. The single-shot
//! response `M × (±e_c)` is column `c` of the propagation operator, so no
//! matrix product is needed. A response covers target `t` (element
//! `±(t + 1)`) when it moves `t` past `ε` in that direction. The minimum set
//! cover of `{sign(desired_t) · (t + 1)}` over those responses gives the
//! solutions.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::config::ReverseConfig;
use crate::engine::errors::EngineError;
use crate::engine::graph::{NodeKey, TraversalAction};
use crate::engine::model::PropagationModel;
use crate::engine::phensim::{Constraint, ConstraintDirection};
use crate::engine::setcover::{CoverOptions, SetCover};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReverseInput {
    /// Desired direction per target node. Magnitudes are ignored.
    pub targets: Vec<Constraint>,
    /// Explicit candidate sources; every upstream node of a target when absent.
    #[serde(default)]
    pub candidates: Option<Vec<String>>,
    #[serde(default)]
    pub non_expressed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub node: String,
    pub direction: ConstraintDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReverseOutcome {
    /// Every minimum solution found.
    pub solutions: Vec<Vec<Source>>,
    /// Targets no candidate can move in the desired direction.
    pub uncoverable: Vec<Constraint>,
    pub candidates_evaluated: usize,
    /// The set-cover search hit its expansion budget.
    pub truncated: bool,
}

#[derive(Debug)]
pub struct ReverseSimulation<'m> {
    model: &'m PropagationModel,
    config: ReverseConfig,
}

impl<'m> ReverseSimulation<'m> {
    pub fn new(model: &'m PropagationModel, config: &ReverseConfig) -> Self {
        Self {
            model,
            config: config.clone(),
        }
    }

    pub fn run(&self, input: &ReverseInput) -> Result<ReverseOutcome, EngineError> {
        let pm = self.model.pathway_matrix();
        let epsilon = self.config.epsilon;

        let mut targets: Vec<(usize, &Constraint)> = Vec::new();
        for t in &input.targets {
            match pm.index_of(&t.node) {
                Some(i) => targets.push((i, t)),
                None => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(node = %t.node, "reverse target not in metapathway, skipped");
                }
            }
        }
        if targets.is_empty() {
            return Err(EngineError::Config(
                "reverse: no target node is part of the metapathway".into(),
            ));
        }

        let candidates = self.candidates(input, &targets);
        let context = self.model.contextualize(&input.non_expressed, epsilon)?;
        let operator = context.as_matrix();

        let mut sources = Vec::with_capacity(candidates.len() * 2);
        let mut coverage = Vec::with_capacity(candidates.len() * 2);
        for candidate in &candidates {
            let Some(c) = pm.index_of(candidate) else {
                continue;
            };
            let response = operator.column(c);
            for direction in [ConstraintDirection::Over, ConstraintDirection::Under] {
                let covered: Vec<i64> = targets
                    .iter()
                    .enumerate()
                    .filter_map(|(k, (row, _))| {
                        let value = direction.sign() * response[*row];
                        let element = k as i64 + 1;
                        if value > epsilon {
                            Some(element)
                        } else if value < -epsilon {
                            Some(-element)
                        } else {
                            None
                        }
                    })
                    .collect();
                sources.push(Source {
                    node: candidate.to_string(),
                    direction,
                });
                coverage.push(covered);
            }
        }
        drop(context);

        let universe = targets
            .iter()
            .enumerate()
            .map(|(k, (_, t))| t.direction.sign() as i64 * (k as i64 + 1));
        let outcome = SetCover::new(universe, coverage).solve(CoverOptions {
            max_expansions: self.config.max_expansions,
        });

        #[cfg(feature = "tracing")]
        tracing::info!(
            targets = targets.len(),
            candidates = candidates.len(),
            solutions = outcome.solutions.len(),
            "reverse simulation finished"
        );

        Ok(ReverseOutcome {
            solutions: outcome
                .solutions
                .iter()
                .map(|s| s.iter().map(|&i| sources[i].clone()).collect())
                .collect(),
            uncoverable: outcome
                .uncoverable
                .iter()
                .map(|e| targets[(e.unsigned_abs() - 1) as usize].1.clone())
                .collect(),
            candidates_evaluated: sources.len(),
            truncated: outcome.truncated,
        })
    }

    /// Explicit candidates, or every node upstream of a target.
    fn candidates(&self, input: &ReverseInput, targets: &[(usize, &Constraint)]) -> Vec<NodeKey> {
        if let Some(explicit) = &input.candidates {
            let graph = self.model.graph();
            let found: BTreeSet<NodeKey> = explicit
                .iter()
                .filter_map(|id| graph.node(id).map(|n| n.key().clone()))
                .collect();
            return found.into_iter().collect();
        }
        let inverted = self.model.metapathway().inverted();
        let mut found = BTreeSet::new();
        for (_, t) in targets {
            found.extend(
                inverted
                    .graph()
                    .downstream(&t.node, true, |_, _| TraversalAction::Continue),
            );
        }
        found.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::graph::{Edge, EdgeDetail, EdgeSubtype, EdgeType, Graph, Node, NodeType};
    use crate::engine::pathway::{Pathway, Repository};
    use crate::engine::strategy::StrategyRegistry;

    fn model() -> PropagationModel {
        let mut g = Graph::new();
        for id in ["a", "b", "c", "z"] {
            g.add_node(Node::new(id, id, NodeType::Gene));
        }
        g.add_edge(Edge::new("a", "b", EdgeDetail::new(EdgeType::Pprel, EdgeSubtype::Activation)))
            .unwrap();
        g.add_edge(Edge::new("b", "c", EdgeDetail::new(EdgeType::Pprel, EdgeSubtype::Inhibition)))
            .unwrap();
        let mut repo = Repository::new();
        repo.add(Pathway::new("p", "p", g)).unwrap();
        PropagationModel::build(&repo, &EngineConfig::default(), &StrategyRegistry::with_builtins())
            .unwrap()
    }

    fn source(node: &str, direction: ConstraintDirection) -> Source {
        Source {
            node: node.into(),
            direction,
        }
    }

    #[test]
    fn upstream_sources_reach_the_target() {
        let model = model();
        let outcome = ReverseSimulation::new(&model, &ReverseConfig::default())
            .run(&ReverseInput {
                targets: vec![Constraint::under("c")],
                ..ReverseInput::default()
            })
            .unwrap();
        assert_eq!(outcome.candidates_evaluated, 4);
        assert_eq!(
            outcome.solutions,
            vec![
                vec![source("a", ConstraintDirection::Over)],
                vec![source("b", ConstraintDirection::Over)],
            ]
        );
        assert!(outcome.uncoverable.is_empty());
    }

    #[test]
    fn unreachable_targets_are_reported() {
        let model = model();
        let outcome = ReverseSimulation::new(&model, &ReverseConfig::default())
            .run(&ReverseInput {
                targets: vec![Constraint::over("b"), Constraint::over("z")],
                candidates: Some(vec!["a".into(), "unknown".into()]),
                non_expressed: Vec::new(),
            })
            .unwrap();
        assert_eq!(outcome.candidates_evaluated, 2);
        assert_eq!(
            outcome.solutions,
            vec![vec![source("a", ConstraintDirection::Over)]]
        );
        assert_eq!(outcome.uncoverable, vec![Constraint::over("z")]);
    }

    #[test]
    fn disconnected_candidate_covers_nothing() {
        let model = model();
        let backend = model.strategies().backend.clone();
        let baseline = backend.live_matrices();
        let outcome = ReverseSimulation::new(&model, &ReverseConfig::default())
            .run(&ReverseInput {
                targets: vec![Constraint::under("c")],
                candidates: Some(vec!["z".into()]),
                non_expressed: vec!["b".into()],
            })
            .unwrap();
        assert!(outcome.solutions.is_empty());
        assert_eq!(outcome.uncoverable, vec![Constraint::under("c")]);
        assert_eq!(backend.live_matrices(), baseline);
    }
}
