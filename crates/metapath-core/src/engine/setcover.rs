//! Exact minimum set cover by branch and bound.
//!
//! Elements are signed integers (`±(target + 1)` in reverse simulation).
//! Construction drops universe elements no candidate covers and candidate
//! members outside the remaining universe.
//!
//! The search expands, at every step, all candidates tied for the largest
//! number of newly covered elements, so every minimum solution reachable
//! through greedy-optimal choices is enumerated. Branches deeper than the best
//! known size are cut; a strictly smaller solution discards the recorded ones.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoverOptions {
    /// Stop after this many search-node expansions.
    pub max_expansions: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverOutcome {
    /// Candidate indices of every minimum solution, each ascending.
    pub solutions: Vec<Vec<usize>>,
    /// Universe elements no candidate covers.
    pub uncoverable: Vec<i64>,
    /// `true` when the expansion budget ran out before the search finished.
    pub truncated: bool,
    pub expansions: usize,
}

impl CoverOutcome {
    pub fn minimum_size(&self) -> Option<usize> {
        self.solutions.first().map(Vec::len)
    }
}

#[derive(Debug, Clone)]
pub struct SetCover {
    elements: Vec<i64>,
    uncoverable: Vec<i64>,
    /// Per candidate, indices into `elements`.
    candidates: Vec<Vec<usize>>,
}

struct Search {
    best: usize,
    solutions: BTreeSet<Vec<usize>>,
    expansions: usize,
    budget: Option<usize>,
    truncated: bool,
}

impl SetCover {
    pub fn new<U, C, S>(universe: U, candidates: C) -> Self
    where
        U: IntoIterator<Item = i64>,
        C: IntoIterator<Item = S>,
        S: IntoIterator<Item = i64>,
    {
        let universe: BTreeSet<i64> = universe.into_iter().collect();
        let candidates: Vec<BTreeSet<i64>> = candidates
            .into_iter()
            .map(|c| c.into_iter().filter(|e| universe.contains(e)).collect())
            .collect();
        let coverable: BTreeSet<i64> = candidates.iter().flatten().copied().collect();
        let (elements, uncoverable): (Vec<i64>, Vec<i64>) =
            universe.iter().partition(|&&e| coverable.contains(&e));

        let candidates = candidates
            .iter()
            .map(|c| {
                c.iter()
                    .filter_map(|e| elements.binary_search(e).ok())
                    .collect()
            })
            .collect();
        Self {
            elements,
            uncoverable,
            candidates,
        }
    }

    /// Universe after pruning.
    pub fn elements(&self) -> &[i64] {
        &self.elements
    }

    pub fn uncoverable(&self) -> &[i64] {
        &self.uncoverable
    }

    pub fn solve(&self, options: CoverOptions) -> CoverOutcome {
        let mut search = Search {
            best: usize::MAX,
            solutions: BTreeSet::new(),
            expansions: 0,
            budget: options.max_expansions,
            truncated: false,
        };
        if !self.elements.is_empty() {
            let mut covered = vec![0u32; self.elements.len()];
            self.expand(&mut Vec::new(), &mut covered, 0, &mut search);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            elements = self.elements.len(),
            candidates = self.candidates.len(),
            solutions = search.solutions.len(),
            expansions = search.expansions,
            truncated = search.truncated,
            "set cover search finished"
        );

        CoverOutcome {
            solutions: search.solutions.into_iter().collect(),
            uncoverable: self.uncoverable.clone(),
            truncated: search.truncated,
            expansions: search.expansions,
        }
    }

    /// `covered[e]` counts chosen candidates covering element `e`.
    fn expand(
        &self,
        chosen: &mut Vec<usize>,
        covered: &mut [u32],
        covered_count: usize,
        search: &mut Search,
    ) {
        if covered_count == self.elements.len() {
            let mut solution = chosen.clone();
            solution.sort_unstable();
            if solution.len() < search.best {
                search.best = solution.len();
                search.solutions.clear();
            }
            search.solutions.insert(solution);
            return;
        }
        if chosen.len() + 1 > search.best || search.truncated {
            return;
        }
        search.expansions += 1;
        if search.budget.is_some_and(|max| search.expansions > max) {
            search.truncated = true;
            return;
        }

        let gain = |i: usize, covered: &[u32]| {
            self.candidates[i].iter().filter(|&&e| covered[e] == 0).count()
        };
        let gains: Vec<usize> = (0..self.candidates.len())
            .map(|i| if chosen.contains(&i) { 0 } else { gain(i, covered) })
            .collect();
        let Some(&max_gain) = gains.iter().max() else {
            return;
        };
        if max_gain == 0 {
            return;
        }

        for (i, _) in gains.iter().enumerate().filter(|(_, &g)| g == max_gain) {
            for &e in &self.candidates[i] {
                covered[e] += 1;
            }
            chosen.push(i);
            self.expand(chosen, covered, covered_count + max_gain, search);
            chosen.pop();
            for &e in &self.candidates[i] {
                covered[e] -= 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario() -> SetCover {
        SetCover::new(
            1..=6,
            vec![vec![1, 2, 3], vec![4, 5], vec![1, 4], vec![2, 3, 5]],
        )
    }

    #[test]
    fn prunes_uncoverable_elements() {
        let cover = scenario();
        assert_eq!(cover.elements(), &[1, 2, 3, 4, 5]);
        assert_eq!(cover.uncoverable(), &[6]);
    }

    #[test]
    fn finds_every_minimum_solution() {
        let outcome = scenario().solve(CoverOptions::default());
        assert_eq!(outcome.solutions, vec![vec![0, 1], vec![2, 3]]);
        assert_eq!(outcome.minimum_size(), Some(2));
        assert!(!outcome.truncated);
    }

    #[test]
    fn single_covering_set_wins() {
        let outcome = SetCover::new(
            1..=4,
            vec![vec![1, 2], vec![3], vec![4], vec![1, 2, 3, 4]],
        )
        .solve(CoverOptions::default());
        assert_eq!(outcome.solutions, vec![vec![3]]);
    }

    #[test]
    fn members_outside_universe_are_ignored() {
        let outcome = SetCover::new([1, -2], vec![vec![1, 2, 9], vec![-2]])
            .solve(CoverOptions::default());
        assert_eq!(outcome.solutions, vec![vec![0, 1]]);
    }

    #[test]
    fn nothing_coverable_yields_no_solution() {
        let outcome = SetCover::new([1, 2], Vec::<Vec<i64>>::new()).solve(CoverOptions::default());
        assert!(outcome.solutions.is_empty());
        assert_eq!(outcome.uncoverable, vec![1, 2]);
    }

    #[test]
    fn expansion_budget_truncates() {
        let outcome = scenario().solve(CoverOptions {
            max_expansions: Some(1),
        });
        assert!(outcome.truncated);
        assert!(outcome.solutions.is_empty());
    }
}
