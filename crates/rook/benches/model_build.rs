// model_build.rs - Benchmarks for parsing, lowering and model building
//
// Run with: cargo bench --bench model_build --features test-support
// Compare baselines: cargo bench --bench model_build -- --baseline before

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};

use rook::ast::Ast;
use rook::lower;
use rook::model::{AnalyzerContext, ModelRegistry, SourceAnalyzer};
use rook::test_utils::fixture_workspace::{unit_source, FixtureConfig};

// ---------------------------------------------------------------------------
// Benchmark: parse + lower one generated unit
// ---------------------------------------------------------------------------

fn bench_lowering(c: &mut Criterion) {
    let mut group = c.benchmark_group("model_lowering");
    group.sample_size(30);

    for (label, config) in [
        ("small", FixtureConfig::small()),
        ("medium", FixtureConfig::medium()),
    ] {
        let source = unit_source(0, &config);
        group.bench_with_input(
            BenchmarkId::new("parse_and_lower", label),
            &source,
            |b, source| b.iter(|| black_box(lower::parse_source(black_box(source)))),
        );
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark: build the model for one pre-lowered unit
// ---------------------------------------------------------------------------

fn bench_single_unit(c: &mut Criterion) {
    let mut group = c.benchmark_group("model_single_unit");
    group.sample_size(30);

    for (label, config) in [
        ("small", FixtureConfig::small()),
        ("medium", FixtureConfig::medium()),
    ] {
        let ast = lower::parse_source(&unit_source(0, &config));
        let analyzer = SourceAnalyzer::new(AnalyzerContext::default());
        group.bench_with_input(BenchmarkId::new("analyze", label), &ast, |b, ast| {
            b.iter_batched(
                || ast.clone(),
                |ast| black_box(analyzer.update("file:///bench/unit_0.R", ast)),
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark: analyze a whole generated workspace into a registry
// ---------------------------------------------------------------------------

fn bench_workspace(c: &mut Criterion) {
    let mut group = c.benchmark_group("model_workspace");
    group.sample_size(10);

    for (label, config) in [
        ("small", FixtureConfig::small()),
        ("medium", FixtureConfig::medium()),
    ] {
        let units: Vec<(String, Ast)> = (0..config.file_count)
            .map(|index| {
                let ast = lower::parse_source(&unit_source(index, &config));
                (format!("file:///bench/unit_{}.R", index), ast)
            })
            .collect();
        let analyzer = SourceAnalyzer::new(AnalyzerContext::default());
        group.bench_with_input(BenchmarkId::new("analyze_all", label), &units, |b, units| {
            b.iter_batched(
                || units.clone(),
                |units| {
                    let registry = ModelRegistry::new();
                    for (unit_id, ast) in units {
                        if let Some(model) = analyzer.update(&unit_id, ast) {
                            registry.insert(model);
                        }
                    }
                    black_box(registry.len())
                },
                BatchSize::LargeInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_lowering, bench_single_unit, bench_workspace);
criterion_main!(benches);
