//! Benchmarks for the planner pipeline.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use indexmap::IndexMap;
use kgraph_planner::store::InMemoryGraphStore;
use kgraph_planner::value::{EdgeValue, NodeValue};
use kgraph_planner::{optimize, Executor, ExecutorConfig, OptimizerConfig, PlanBuilder, QueryParser};

fn benchmark_query_parsing(c: &mut Criterion) {
    let parser = QueryParser::new();

    let queries = vec![
        ("simple", "MATCH (n:Person) RETURN n"),
        (
            "with_edge",
            "MATCH (a:Person)-[:KNOWS]->(b:Person) RETURN a, b",
        ),
        (
            "with_where",
            "MATCH (n:Person) WHERE n.age > 25 AND n.name CONTAINS 'Alice' RETURN n",
        ),
        (
            "complex",
            "MATCH (p:Person)-[:WORKS_AT]->(c:Company) WHERE p.salary > 50000 RETURN p, c ORDER BY p.name DESC LIMIT 100",
        ),
    ];

    let mut group = c.benchmark_group("query_parsing");

    for (name, query) in queries {
        group.throughput(Throughput::Bytes(query.len() as u64));
        group.bench_with_input(BenchmarkId::new("parse", name), query, |b, q| {
            b.iter(|| parser.parse(black_box(q)).unwrap());
        });
    }

    group.finish();
}

fn benchmark_planning(c: &mut Criterion) {
    let parser = QueryParser::new();
    let ast = parser
        .parse("MATCH (a:Person)-[:KNOWS]->(b:Person) WHERE a.age > 25 RETURN a, b")
        .unwrap();

    c.bench_function("plan_build", |b| {
        b.iter(|| PlanBuilder::build(black_box(&ast)).unwrap());
    });
}

fn benchmark_optimization(c: &mut Criterion) {
    let parser = QueryParser::new();
    let store = InMemoryGraphStore::new();
    let ast = parser
        .parse("MATCH (a:A)-[:R]->(c)<-[:R]-(b:B) WHERE a.age > 25 RETURN a, b, c")
        .unwrap();

    c.bench_function("optimize_diamond_plan", |b| {
        b.iter_batched(
            || PlanBuilder::build(&ast).unwrap().0,
            |mut p| optimize(black_box(&mut p), &store, &OptimizerConfig::default()),
            criterion::BatchSize::SmallInput,
        );
    });
}

fn seeded_store(node_count: u64) -> InMemoryGraphStore {
    let mut store = InMemoryGraphStore::new();
    for id in 1..=node_count {
        store.add_node(NodeValue {
            id,
            labels: smallvec::smallvec!["Person".to_string()],
            properties: IndexMap::from([("age".to_string(), kgraph_planner::value::Value::Int(
                20 + (id % 50) as i64,
            ))]),
        });
        if id > 1 {
            store.add_edge(EdgeValue {
                id,
                rel_type: "KNOWS".to_string(),
                source: id - 1,
                target: id,
                properties: IndexMap::new(),
            });
        }
    }
    store
}

fn benchmark_execution(c: &mut Criterion) {
    let mut group = c.benchmark_group("execute");

    for size in [10u64, 100, 1000] {
        let store = seeded_store(size);
        let ast = QueryParser::new()
            .parse("MATCH (a:Person)-[:KNOWS]->(b:Person) WHERE a.age > 30 RETURN a, b")
            .unwrap();

        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::new("scan_expand_filter", size), &store, |b, s| {
            b.iter_batched(
                || PlanBuilder::build(&ast).unwrap(),
                |(mut plan, pattern_graph)| {
                    optimize(&mut plan, s, &OptimizerConfig::default());
                    Executor::new()
                        .execute(
                            black_box(&mut plan),
                            s,
                            &pattern_graph,
                            &ExecutorConfig::default(),
                        )
                        .unwrap()
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_query_parsing,
    benchmark_planning,
    benchmark_optimization,
    benchmark_execution,
);

criterion_main!(benches);
