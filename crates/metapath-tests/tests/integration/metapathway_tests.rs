use metapath_core::engine::metapathway::{MergeOptions, Metapathway, PathwayFilter};
use metapath_core::{build_model, EngineConfig};
use metapath_tests::{assert_close, toy_repository, toy_with_island};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

#[test]
fn toy_metapathway_has_six_nodes_and_six_edges() {
    let repo = toy_repository().unwrap();
    let meta = Metapathway::build(&repo, &PathwayFilter::all(), MergeOptions::default()).unwrap();
    assert_eq!(meta.graph().node_count(), 6);
    assert_eq!(meta.graph().edge_count(), 6);
    let mut endpoints: Vec<&str> = meta.graph().endpoints().iter().map(|k| &**k).collect();
    endpoints.sort_unstable();
    assert_eq!(endpoints, ["e", "f"]);
    assert_eq!(meta.virtual_pathways().len(), 1);
    assert_eq!(meta.virtual_pathways()[0].edges.len(), 6);
}

#[test]
fn building_twice_is_idempotent() {
    let repo = toy_with_island().unwrap();
    let filter = PathwayFilter::all();
    let first = Metapathway::build(&repo, &filter, MergeOptions::default()).unwrap();
    let second = Metapathway::build(&repo, &filter, MergeOptions::default()).unwrap();
    assert_eq!(first.graph().node_count(), second.graph().node_count());
    assert_eq!(first.graph().edge_count(), second.graph().edge_count());
    assert_eq!(first.graph().endpoints(), second.graph().endpoints());
    assert_eq!(first.digest(), second.digest());
}

#[test]
fn self_coefficients_are_one_on_an_acyclic_graph() {
    let model = build_model(&toy_repository().unwrap(), &EngineConfig::default()).unwrap();
    let pm = model.pathway_matrix();
    for i in 0..pm.len() {
        let mut unit = vec![0.0; pm.len()];
        unit[i] = 1.0;
        let response = pm.matrix().post_multiply_vector(&unit).unwrap();
        assert_close(response[i], 1.0, 1e-9);
    }
}

#[test]
fn category_filter_drops_pathways() {
    let repo = toy_with_island().unwrap();
    let filter = PathwayFilter::all().exclude_categories(["metabolism"]);
    let meta = Metapathway::build(&repo, &filter, MergeOptions::default()).unwrap();
    assert_eq!(meta.graph().node_count(), 6);
    assert!(meta.virtual_pathway("island").is_none());

    let only_island = PathwayFilter::all().include_pathways(["island"]);
    let meta = Metapathway::build(&repo, &only_island, MergeOptions::default()).unwrap();
    assert_eq!(meta.graph().node_count(), 1);
}

#[test]
fn decoys_preserve_pathway_size() {
    let repo = toy_with_island().unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let decoys = repo.decoys(&mut rng).unwrap();
    assert_eq!(decoys.len(), repo.len());
    for original in repo.pathways() {
        let decoy = decoys.get(original.id()).unwrap();
        assert_eq!(decoy.graph().node_count(), original.graph().node_count());
        assert_eq!(decoy.graph().edge_count(), original.graph().edge_count());
        assert_eq!(decoy.categories(), original.categories());
    }
    assert_ne!(decoys.digest(), repo.digest());
}

#[test]
fn inverted_repository_flips_every_edge() {
    let repo = toy_repository().unwrap();
    let inverted = repo.inverted();
    let graph = inverted.get("toy").unwrap().graph();
    assert_eq!(graph.edge_count(), 6);
    assert!(graph.edge("b", "a").is_some());
    assert!(graph.edge("a", "b").is_none());
}
