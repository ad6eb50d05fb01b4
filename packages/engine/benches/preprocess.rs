use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use strata_engine::sql::{parse_statements, tokenize};
use strata_engine::{
    boot, BootArgs, CreateVersionOptions, Engine, EngineConfig, ExecuteOptions, SqliteBackend,
    StrataError, Value,
};
use tokio::runtime::Runtime;

const ROW_COUNT: usize = 2_000;

const JOIN_SQL: &str = "SELECT f.name, d.name, json_extract(s.snapshot_content, '$.value') \
     FROM file f JOIN directory d ON d.id = f.directory_id \
     LEFT JOIN state s ON s.entity_id = f.id AND s.schema_key = 'key_value' \
     WHERE f.name LIKE ? ORDER BY f.name LIMIT 50";

fn bench_tokenize(c: &mut Criterion) {
    c.bench_function("tokenize_join", |b| {
        b.iter(|| black_box(tokenize(black_box(JOIN_SQL))));
    });
}

fn bench_parse(c: &mut Criterion) {
    c.bench_function("parse_join", |b| {
        b.iter(|| {
            let statements =
                parse_statements(black_box(JOIN_SQL)).expect("bench SQL should parse");
            black_box(statements);
        });
    });
}

fn bench_key_value_count(c: &mut Criterion, bench_name: &str, inherited: bool) {
    let runtime = Runtime::new().expect("failed to build tokio runtime");
    let engine = runtime
        .block_on(seed_engine(inherited))
        .expect("failed to seed benchmark engine");

    c.bench_function(bench_name, |b| {
        b.iter(|| {
            let result = runtime
                .block_on(engine.execute(
                    "SELECT count(*) FROM key_value WHERE key LIKE 'bench_%'",
                    &[],
                    ExecuteOptions::default(),
                ))
                .expect("count query should succeed");
            black_box(result.rows.first().and_then(|row| row.first()).cloned());
        });
    });
}

fn bench_key_value_count_local(c: &mut Criterion) {
    bench_key_value_count(c, "key_value_count_local", false);
}

fn bench_key_value_count_inherited(c: &mut Criterion) {
    bench_key_value_count(c, "key_value_count_inherited", true);
}

async fn seed_engine(inherited: bool) -> Result<Engine, StrataError> {
    let mut args = BootArgs::new(Box::new(SqliteBackend::in_memory()?));
    args.config = EngineConfig {
        deterministic: true,
        ..EngineConfig::default()
    };
    let engine = boot(args);
    engine.init().await?;

    let mut tx = engine.begin_transaction(ExecuteOptions::default()).await?;
    for index in 0..ROW_COUNT {
        tx.execute(
            "INSERT INTO key_value (key, value) VALUES (?1, ?2)",
            &[
                Value::Text(format!("bench_{index}")),
                Value::Text(index.to_string()),
            ],
        )
        .await?;
    }
    tx.commit().await?;

    if inherited {
        engine
            .create_version(CreateVersionOptions {
                id: Some("bench_child".to_string()),
                ..CreateVersionOptions::default()
            })
            .await?;
        engine.switch_version("bench_child").await?;
    }
    Ok(engine)
}

criterion_group!(
    benches,
    bench_tokenize,
    bench_parse,
    bench_key_value_count_local,
    bench_key_value_count_inherited
);
criterion_main!(benches);
