use metapath_core::engine::phensim::SignificanceMethod;
use metapath_core::{build_model, Constraint, PhenotypeSimulation, PhensimInput};
use metapath_tests::{small_config, toy_with_island};

#[test]
fn unreachable_nodes_have_zero_activity() {
    let config = small_config();
    let model = build_model(&toy_with_island().unwrap(), &config).unwrap();
    let result = PhenotypeSimulation::new(&model, &config.phensim, &config.runtime)
        .run(&PhensimInput {
            constraints: vec![Constraint::over("a")],
            non_expressed: Vec::new(),
        })
        .unwrap();

    let z = result.node("z").unwrap();
    assert_eq!(z.distance, None);
    assert_eq!(z.activity, 0.0);
    assert_eq!(z.mean, 0.0);
    assert_eq!(result.pathway("island").unwrap().activity, 0.0);

    for id in ["b", "c", "d", "e", "f"] {
        let node = result.node(id).unwrap();
        assert!(node.distance.is_some(), "{} should be reachable", id);
        assert!(node.activity > 0.0, "{} should be activated", id);
        assert!(node.mean > 0.0);
    }
    assert_eq!(result.node("f").unwrap().distance, Some(3));
}

#[test]
fn inhibiting_the_source_flips_every_sign() {
    let mut config = small_config();
    config.phensim.significance = SignificanceMethod::Fast;
    let model = build_model(&toy_with_island().unwrap(), &config).unwrap();
    let sim = PhenotypeSimulation::new(&model, &config.phensim, &config.runtime);
    let result = sim
        .run(&PhensimInput {
            constraints: vec![Constraint::under("a").with_magnitude(1.0)],
            non_expressed: Vec::new(),
        })
        .unwrap();
    for id in ["b", "c", "d", "e", "f"] {
        assert!(result.node(id).unwrap().activity < 0.0, "{}", id);
    }
    for report in result.nodes.iter().chain(&result.pathways) {
        assert!((0.0..=1.0).contains(&report.p_value), "{:?}", report);
        assert!((0.0..=1.0).contains(&report.adjusted_p_value), "{:?}", report);
    }
}

#[test]
fn silenced_nodes_stop_the_signal() {
    let config = small_config();
    let model = build_model(&toy_with_island().unwrap(), &config).unwrap();
    let backend = model.strategies().backend.clone();
    let baseline = backend.live_matrices();
    let result = PhenotypeSimulation::new(&model, &config.phensim, &config.runtime)
        .run(&PhensimInput {
            constraints: vec![Constraint::over("b").with_magnitude(2.0)],
            non_expressed: vec!["e".into()],
        })
        .unwrap();
    let e = result.node("e").unwrap();
    assert!(e.mean.abs() < result.node("d").unwrap().mean.abs());
    assert_eq!(backend.live_matrices(), baseline);
}
