//! # Metapath Performance Benchmarks
//!
//! Covers the two hot paths:
//! - Propagation-matrix inversion per backend
//! - Bootstrap impact analysis (batched propagation and reduction)

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use metapath_core::engine::matrix::{MatrixFactory, NalgebraFactory, NdarrayFactory};
use metapath_core::engine::metapathway::{MergeOptions, Metapathway, PathwayFilter};
use metapath_core::engine::propagation::{PathwayMatrix, WeightTable};
use metapath_core::engine::weights::{SubtypeEdgeWeight, UnitNodeWeight};
use metapath_core::{
    build_model, Edge, EdgeDetail, EdgeSubtype, EdgeType, EngineConfig, Graph, ImpactAnalysis,
    ImpactInput, Node, NodeType, Pathway, Repository,
};

/// Layered synthetic repository.
///
/// Each node links to the next two, alternating activation and inhibition,
/// split into pathways of 50 nodes. Deterministic for reproducibility.
fn synthetic_repository(num_nodes: usize) -> Repository {
    let mut repo = Repository::new();
    for (p, chunk) in (0..num_nodes).collect::<Vec<_>>().chunks(50).enumerate() {
        let mut g = Graph::new();
        let last = (chunk[chunk.len() - 1] + 2).min(num_nodes - 1);
        for i in chunk[0]..=last {
            g.add_node(Node::new(format!("n{}", i), format!("N{}", i), NodeType::Gene));
        }
        for &i in chunk {
            for step in 1..=2 {
                let j = i + step;
                if j > last {
                    continue;
                }
                let subtype = if (i + step) % 2 == 0 {
                    EdgeSubtype::Activation
                } else {
                    EdgeSubtype::Inhibition
                };
                let _ = g.add_edge(Edge::new(
                    format!("n{}", i),
                    format!("n{}", j),
                    EdgeDetail::new(EdgeType::Pprel, subtype),
                ));
            }
        }
        let _ = repo.add(Pathway::new(format!("p{}", p), format!("Pathway {}", p), g));
    }
    repo
}

fn bench_inversion(c: &mut Criterion) {
    let mut group = c.benchmark_group("matrix_inversion");
    group.sample_size(10);

    for size in [100, 400].iter() {
        let repo = synthetic_repository(*size);
        let meta = Metapathway::build(&repo, &PathwayFilter::all(), MergeOptions::default())
            .expect("synthetic metapathway");
        let weights = WeightTable::build(meta.graph(), &UnitNodeWeight, &SubtypeEdgeWeight);
        let factories: [Box<dyn MatrixFactory>; 2] =
            [Box::new(NalgebraFactory::new()), Box::new(NdarrayFactory::new())];

        group.throughput(Throughput::Elements(*size as u64));
        for factory in &factories {
            group.bench_with_input(BenchmarkId::new(factory.name(), size), size, |b, _| {
                b.iter(|| {
                    let pm = PathwayMatrix::build(meta.graph(), &weights, factory.as_ref())
                        .expect("inversion");
                    black_box(pm.len())
                });
            });
        }
    }
    group.finish();
}

fn bench_impact(c: &mut Criterion) {
    let mut group = c.benchmark_group("impact_bootstrap");
    group.sample_size(10);

    for size in [100, 400].iter() {
        let repo = synthetic_repository(*size);
        let mut config = EngineConfig::default();
        config.impact.repetitions = 200;
        config.impact.batch_size = 100;
        let model = build_model(&repo, &config).expect("synthetic model");
        let input = ImpactInput::new((0..*size).step_by(10).map(|i| (format!("n{}", i), 1.5)));

        group.throughput(Throughput::Elements(config.impact.repetitions as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            let analysis = ImpactAnalysis::new(&model, &config.impact, &config.runtime);
            b.iter(|| black_box(analysis.run(&input).expect("impact run")));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_inversion, bench_impact);
criterion_main!(benches);
