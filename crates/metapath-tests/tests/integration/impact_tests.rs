use metapath_core::engine::experiments::{Experiment, ExperimentRunner};
use metapath_core::{build_model, EngineConfig, ImpactAnalysis, ImpactInput};
use metapath_tests::{assert_close, small_config, toy_repository, toy_with_island};

fn scenario_input() -> ImpactInput {
    ImpactInput::new([("a", 2.0), ("d", 1.0)])
}

#[test]
fn zero_repetitions_give_hand_computed_accumulators() {
    let mut config = EngineConfig::default();
    config.impact.repetitions = 0;
    let model = build_model(&toy_repository().unwrap(), &config).unwrap();
    let result = ImpactAnalysis::new(&model, &config.impact, &config.runtime)
        .run(&scenario_input())
        .unwrap();

    let expected = [
        ("a", 0.0),
        ("b", 1.0),
        ("c", 1.0),
        ("d", 1.5),
        ("e", 0.5),
        ("f", 2.5),
    ];
    for (id, acc) in expected {
        let node = result.node(id).unwrap();
        assert_close(node.accumulator, acc, 1e-1);
        assert!(node.p_value.is_none());
    }
    assert_close(result.node("d").unwrap().perturbation, 2.5, 1e-9);

    let toy = result.pathway("toy").unwrap();
    assert_close(toy.accumulator, 6.5, 1e-9);
    assert_eq!((toy.size, toy.de_nodes), (6, 2));
    assert!(toy.p_value.is_none());
    assert!(toy.combined_p_value.is_none());
}

#[test]
fn backends_agree() {
    let mut nalgebra = small_config();
    nalgebra.impact.repetitions = 50;
    let mut ndarray = nalgebra.clone();
    ndarray.strategies.backend = "ndarray".into();

    let repo = toy_with_island().unwrap();
    let input = scenario_input();
    let left_model = build_model(&repo, &nalgebra).unwrap();
    let right_model = build_model(&repo, &ndarray).unwrap();
    let left = ImpactAnalysis::new(&left_model, &nalgebra.impact, &nalgebra.runtime)
        .run(&input)
        .unwrap();
    let right = ImpactAnalysis::new(&right_model, &ndarray.impact, &ndarray.runtime)
        .run(&input)
        .unwrap();

    for (l, r) in left.nodes.iter().zip(&right.nodes) {
        assert_eq!(l.id, r.id);
        assert_close(l.perturbation, r.perturbation, 1e-9);
        assert_close(l.accumulator, r.accumulator, 1e-9);
    }
    for (l, r) in left.pathways.iter().zip(&right.pathways) {
        assert_close(l.accumulator, r.accumulator, 1e-9);
        assert_close(l.impact_factor, r.impact_factor, 1e-9);
    }
}

#[test]
fn p_values_are_bounded_and_runs_release_matrices() {
    let config = small_config();
    let model = build_model(&toy_with_island().unwrap(), &config).unwrap();
    let backend = model.strategies().backend.clone();
    let baseline = backend.live_matrices();

    let analysis = ImpactAnalysis::new(&model, &config.impact, &config.runtime);
    let result = analysis
        .run(&scenario_input().with_non_expressed(["c"]))
        .unwrap();
    let floor = 1.0 / (config.impact.repetitions as f64 * 100.0);
    for node in &result.nodes {
        let p = node.p_value.unwrap();
        assert!((floor..=1.0).contains(&p), "{}: {}", node.id, p);
        assert!(node.adjusted_p_value.unwrap() >= p - 1e-12);
    }
    for pathway in &result.pathways {
        assert!((0.0..=1.0).contains(&pathway.combined_p_value.unwrap()));
        assert!((0.0..=1.0).contains(&pathway.enrichment_p_value));
    }
    assert_eq!(backend.live_matrices(), baseline);
}

#[test]
fn experiments_share_one_model() {
    let mut config = small_config();
    config.runtime.experiment_threads = 2;
    let model = build_model(&toy_repository().unwrap(), &config).unwrap();
    let reports = ExperimentRunner::new(&model, &config.impact, &config.runtime)
        .run(&[
            Experiment::new("up", ImpactInput::new([("a", 1.0)])),
            Experiment::new("down", ImpactInput::new([("a", -1.0)])),
        ])
        .unwrap();
    let up = reports[0].result.as_ref().unwrap();
    let down = reports[1].result.as_ref().unwrap();
    assert_close(
        up.node("f").unwrap().accumulator,
        -down.node("f").unwrap().accumulator,
        1e-9,
    );
}
