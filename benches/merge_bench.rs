use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

use dvtable::delta::table::Table;
use dvtable::delta::TableConfig;
use dvtable::engine::{MergeEngine, MergeSpec};
use dvtable::{Record, RowID, TableSchema, TypeID, Value};
use rand::distributions::{Distribution, Uniform};
use rand::prelude::StdRng;
use rand::{thread_rng, RngCore, SeedableRng};
use std::path::PathBuf;
use uuid::Uuid;

const FILE_ROWS: usize = 10_000;
const NUM_FILES: usize = 10;
const SOURCE_ROWS: usize = 500;

fn bench_schema() -> TableSchema {
    TableSchema::new(vec![TypeID::RowID, TypeID::Varchar], 0).expect("valid schema")
}

fn row(id: u64, name: String) -> Record {
    Record::new(vec![Value::RowID(RowID(id)), Value::from(name)])
}

fn fresh_root() -> PathBuf {
    PathBuf::from("./target/dvtable-bench").join(Uuid::new_v4().simple().to_string())
}

/// A table of NUM_FILES data files with FILE_ROWS rows each, ids dense from 0.
fn create_bench_table(config: TableConfig) -> Table {
    let batches: Vec<Vec<Record>> = (0..NUM_FILES)
        .map(|file| {
            (0..FILE_ROWS)
                .map(|i| {
                    let id = (file * FILE_ROWS + i) as u64;
                    row(id, format!("acct-{id}"))
                })
                .collect()
        })
        .collect();
    Table::create(&fresh_root(), bench_schema(), config, batches).expect("bench table")
}

/// Update SOURCE_ROWS random existing keys, so every file is likely affected.
fn random_update_source() -> Vec<Record> {
    let mut seed_rng = thread_rng();
    let mut seed = [0u8; 32];
    seed_rng.fill_bytes(&mut seed);
    let mut rng = StdRng::from_seed(seed);

    let keydist = Uniform::from(0..(NUM_FILES * FILE_ROWS) as u64);
    let mut keys: Vec<u64> = (0..SOURCE_ROWS).map(|_| keydist.sample(&mut rng)).collect();
    keys.sort_unstable();
    keys.dedup();
    keys.into_iter()
        .map(|id| row(id, format!("acct-{id}-v2")))
        .collect()
}

fn bench_merge(c: &mut Criterion) {
    let engine = MergeEngine::default();
    let mut group = c.benchmark_group("merge");

    group.bench_function("dv_mode", |b| {
        b.iter_batched(
            || (create_bench_table(TableConfig::default()), random_update_source()),
            |(mut table, source)| {
                let metrics = engine
                    .merge(&mut table, &source, &MergeSpec::upsert())
                    .expect("merge");
                black_box(metrics);
            },
            BatchSize::PerIteration,
        )
    });

    group.bench_function("legacy_mode", |b| {
        b.iter_batched(
            || (create_bench_table(TableConfig::legacy()), random_update_source()),
            |(mut table, source)| {
                let metrics = engine
                    .merge(&mut table, &source, &MergeSpec::upsert())
                    .expect("merge");
                black_box(metrics);
            },
            BatchSize::PerIteration,
        )
    });

    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .warm_up_time(std::time::Duration::from_secs(3))
        .measurement_time(std::time::Duration::from_secs(30))
        .sample_size(20);
    targets = bench_merge
}
criterion_main!(benches);
