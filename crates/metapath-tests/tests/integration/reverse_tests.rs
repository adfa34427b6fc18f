use metapath_core::engine::phensim::ConstraintDirection;
use metapath_core::engine::reverse::Source;
use metapath_core::engine::setcover::{CoverOptions, SetCover};
use metapath_core::{build_model, Constraint, EngineConfig, ReverseInput, ReverseSimulation};
use metapath_tests::toy_with_island;

fn source(node: &str, direction: ConstraintDirection) -> Source {
    Source {
        node: node.into(),
        direction,
    }
}

#[test]
fn set_cover_returns_only_minimum_solutions() {
    let outcome = SetCover::new(
        1..=6,
        vec![vec![1, 2, 3], vec![4, 5], vec![1, 4], vec![2, 3, 5]],
    )
    .solve(CoverOptions::default());
    assert_eq!(outcome.solutions, vec![vec![0, 1], vec![2, 3]]);
    assert!(outcome.solutions.iter().all(|s| s.len() == 2));
    assert_eq!(outcome.uncoverable, vec![6]);
}

#[test]
fn every_upstream_node_can_inhibit_the_sink() {
    let config = EngineConfig::default();
    let model = build_model(&toy_with_island().unwrap(), &config).unwrap();
    let outcome = ReverseSimulation::new(&model, &config.reverse)
        .run(&ReverseInput {
            targets: vec![Constraint::under("f")],
            ..ReverseInput::default()
        })
        .unwrap();
    assert_eq!(outcome.candidates_evaluated, 8);
    assert_eq!(
        outcome.solutions,
        ["a", "b", "c", "d"]
            .iter()
            .map(|n| vec![source(n, ConstraintDirection::Under)])
            .collect::<Vec<_>>()
    );
}

#[test]
fn shared_source_covers_both_targets() {
    let config = EngineConfig::default();
    let model = build_model(&toy_with_island().unwrap(), &config).unwrap();
    let outcome = ReverseSimulation::new(&model, &config.reverse)
        .run(&ReverseInput {
            targets: vec![Constraint::over("e"), Constraint::over("f"), Constraint::over("z")],
            ..ReverseInput::default()
        })
        .unwrap();
    assert_eq!(
        outcome.solutions,
        vec![
            vec![source("a", ConstraintDirection::Over)],
            vec![source("b", ConstraintDirection::Over)],
        ]
    );
    assert_eq!(outcome.uncoverable, vec![Constraint::over("z")]);
    assert!(!outcome.truncated);
}
