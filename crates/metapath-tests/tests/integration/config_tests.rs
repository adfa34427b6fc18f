use metapath_core::storage::write_json_result;
use metapath_core::{build_model, EngineConfig, EngineError, ImpactAnalysis, ImpactInput};
use metapath_tests::{small_config, toy_repository};

#[test]
fn config_file_round_trips_through_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.toml");
    std::fs::write(
        &path,
        "[strategies]\nadjuster = \"holm\"\n\n[impact]\nrepetitions = 10\nseed = 7\n",
    )
    .unwrap();
    let config = EngineConfig::from_path(&path).unwrap();
    assert_eq!(config.strategies.adjuster, "holm");
    assert_eq!((config.impact.repetitions, config.impact.seed), (10, 7));

    assert!(matches!(
        EngineConfig::from_path(dir.path().join("missing.toml")),
        Err(EngineError::Config(_))
    ));
}

#[test]
fn invalid_ranges_fail_before_building() {
    let err = EngineConfig::from_toml_str("[impact]\nepsilon = 1.5").unwrap_err();
    assert!(err.to_string().contains("impact.epsilon"));
    let err = EngineConfig::from_toml_str("[runtime]\nthreads = 0").unwrap_err();
    assert!(err.to_string().contains("runtime.threads"));
}

#[test]
fn unknown_strategy_is_named() {
    let mut config = EngineConfig::default();
    config.strategies.backend = "gpu".into();
    let err = build_model(&toy_repository().unwrap(), &config).unwrap_err();
    assert!(matches!(
        err,
        EngineError::StrategyNotFound { kind: "matrix backend", ref name } if name == "gpu"
    ));
}

#[test]
fn empty_selection_reports_its_stage() {
    let mut config = EngineConfig::default();
    config.metapathway.include_pathways = vec!["absent".into()];
    let err = build_model(&toy_repository().unwrap(), &config).unwrap_err();
    assert!(err.to_string().starts_with("metapathway: "));
    assert!(matches!(err.root(), EngineError::Config(_)));
}

#[test]
fn cached_matrix_is_reused() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = small_config();
    config.runtime.cache_dir = Some(dir.path().join("cache"));
    let repo = toy_repository().unwrap();

    let first = build_model(&repo, &config).unwrap();
    assert_eq!(std::fs::read_dir(dir.path().join("cache")).unwrap().count(), 1);
    let second = build_model(&repo, &config).unwrap();
    assert_eq!(
        first.pathway_matrix().matrix().to_raw(),
        second.pathway_matrix().matrix().to_raw()
    );

    // Customization only namespaces the cache: a new entry, the same matrix.
    config.metapathway.customization = vec!["a".into()];
    let tagged = build_model(&repo, &config).unwrap();
    assert_eq!(std::fs::read_dir(dir.path().join("cache")).unwrap().count(), 2);
    assert_eq!(
        first.pathway_matrix().matrix().to_raw(),
        tagged.pathway_matrix().matrix().to_raw()
    );
}

#[test]
fn results_are_written_as_json() {
    let config = small_config();
    let model = build_model(&toy_repository().unwrap(), &config).unwrap();
    let result = ImpactAnalysis::new(&model, &config.impact, &config.runtime)
        .run(&ImpactInput::new([("a", 1.0)]))
        .unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out").join("impact.json");
    write_json_result(&path, &result).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["repetitions"], 100);
    assert_eq!(value["pathways"][0]["id"], "toy");
}
