//! Shared fixtures for the integration and property tests.

use metapath_core::engine::errors::EngineError;
use metapath_core::{
    Edge, EdgeDetail, EdgeSubtype, EdgeType, EngineConfig, Graph, Node, NodeType, Pathway,
    Repository,
};

/// Builds a graph of gene nodes from `(source, target, subtype)` triples.
pub fn graph(nodes: &[&str], edges: &[(&str, &str, EdgeSubtype)]) -> Result<Graph, EngineError> {
    let mut g = Graph::new();
    for id in nodes {
        g.add_node(Node::new(*id, id.to_uppercase(), NodeType::Gene));
    }
    for (source, target, subtype) in edges {
        g.add_edge(Edge::new(
            *source,
            *target,
            EdgeDetail::new(EdgeType::Pprel, *subtype),
        ))?;
    }
    Ok(g)
}

/// Six-node branching pathway: a→b, a→c, c→d, b→e, b→d, d→f with endpoints {e, f}.
pub fn toy_pathway() -> Result<Pathway, EngineError> {
    use EdgeSubtype::Activation;
    let mut g = graph(
        &["a", "b", "c", "d", "e", "f"],
        &[
            ("a", "b", Activation),
            ("a", "c", Activation),
            ("c", "d", Activation),
            ("b", "e", Activation),
            ("b", "d", Activation),
            ("d", "f", Activation),
        ],
    )?;
    g.add_endpoint("e")?;
    g.add_endpoint("f")?;
    Ok(Pathway::new("toy", "Toy pathway", g).with_categories(["signaling"]))
}

pub fn toy_repository() -> Result<Repository, EngineError> {
    let mut repo = Repository::new();
    repo.add(toy_pathway()?)?;
    Ok(repo)
}

/// Toy pathway plus a disconnected single-node pathway `island` holding `z`.
pub fn toy_with_island() -> Result<Repository, EngineError> {
    let mut repo = toy_repository()?;
    let island = graph(&["z"], &[])?;
    repo.add(Pathway::new("island", "Island", island).with_categories(["metabolism"]))?;
    Ok(repo)
}

/// Defaults shrunk to sizes that keep test runs short.
pub fn small_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.impact.repetitions = 100;
    config.impact.batch_size = 32;
    config.phensim.simulations = 5;
    config.phensim.repetitions = 40;
    config.phensim.batch_size = 64;
    config
}

pub fn assert_close(actual: f64, expected: f64, tolerance: f64) {
    assert!(
        (actual - expected).abs() <= tolerance,
        "expected {} within {} of {}",
        actual,
        tolerance,
        expected
    );
}
