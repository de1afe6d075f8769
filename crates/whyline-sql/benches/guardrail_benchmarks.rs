//! Benchmarks for the guardrail pipeline
//!
//! Measures sanitize + adapt on wide generated queries, with and without
//! the tokenizer-backed lexical scan.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use whyline_core::{Engine, ModelCatalog, ModelInfo, WarehouseTarget};
use whyline_sql::{adapt_sql_for_engine, sanitize_sql, GuardrailConfig};

/// Generate a catalog with N marts
fn generate_catalog(num_models: usize) -> ModelCatalog {
    (0..num_models)
        .map(|i| {
            let name = format!("mart_{}", i);
            let info = ModelInfo::new(name.clone()).with_fq_name(format!("whyline-denver.mart_denver.{}", name));
            (name, info)
        })
        .collect()
}

/// Generate a SELECT with N columns joining N marts
fn generate_query(num_joins: usize) -> String {
    let mut select_cols = Vec::new();
    let mut joins = Vec::new();

    for i in 0..num_joins {
        select_cols.push(format!("    t{}.stop_id AS stop_{}", i, i));
        if i > 0 {
            joins.push(format!("JOIN mart_{} t{} ON t0.stop_id = t{}.stop_id", i, i, i));
        }
    }

    format!(
        "WITH recent AS (SELECT * FROM mart_0 WHERE service_date_mst >= DATE_SUB(CURRENT_DATE(), INTERVAL 30 DAY))\n\
         SELECT\n{}\nFROM recent t0\n{}\nWHERE t0.note <> 'no; drop'",
        select_cols.join(",\n"),
        joins.join("\n")
    )
}

fn bench_sanitize(c: &mut Criterion) {
    let mut group = c.benchmark_group("sanitize_sql");
    let target = WarehouseTarget::default();

    for num_joins in [1, 10, 50].iter() {
        let models = generate_catalog(*num_joins);
        let sql = generate_query(*num_joins).replace("'no; drop'", "'ok'");

        for engine in Engine::all() {
            let config = GuardrailConfig::for_engine(engine, &models, &target, &Default::default());
            group.bench_with_input(BenchmarkId::new(engine.as_str(), num_joins), num_joins, |b, _| {
                b.iter(|| black_box(sanitize_sql(&sql, &config)))
            });
        }
    }

    group.finish();
}

fn bench_lexical_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("lexical_scan");

    for num_joins in [1, 10, 50].iter() {
        let models = generate_catalog(*num_joins);
        let sql = generate_query(*num_joins);
        let config = GuardrailConfig::new(models.keys().cloned(), Engine::DuckDb).with_lexical_scan(true);

        group.bench_with_input(BenchmarkId::from_parameter(num_joins), num_joins, |b, _| {
            b.iter(|| black_box(sanitize_sql(&sql, &config)))
        });
    }

    group.finish();
}

fn bench_adapt(c: &mut Criterion) {
    let mut group = c.benchmark_group("adapt_sql_for_engine");
    let target = WarehouseTarget::default();
    let models = generate_catalog(50);
    let sql = generate_query(50);

    group.bench_function("duckdb", |b| {
        b.iter(|| black_box(adapt_sql_for_engine(&sql, Engine::DuckDb, None, &target)))
    });
    group.bench_function("bigquery", |b| {
        b.iter(|| black_box(adapt_sql_for_engine(&sql, Engine::BigQuery, Some(&models), &target)))
    });

    group.finish();
}

criterion_group!(benches, bench_sanitize, bench_lexical_scan, bench_adapt);
criterion_main!(benches);
