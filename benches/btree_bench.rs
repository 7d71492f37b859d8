// B+ tree index benchmarks: insert, point search, and range scan
// against a page-backed tree under a real buffer pool.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use qindb::buffer::BufferPool;
use qindb::common::{DataType, Value};
use qindb::index::BPlusTree;
use qindb::storage::disk::DiskManager;
use std::sync::Arc;
use tempfile::TempDir;

fn new_pool(pool_size: usize) -> (Arc<BufferPool>, TempDir) {
    let dir = TempDir::new().unwrap();
    let disk = Arc::new(DiskManager::open(dir.path().join("bench.db"), false, false).unwrap());
    (Arc::new(BufferPool::new(disk, pool_size)), dir)
}

fn bench_btree_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree_insert");

    for size in [100_i64, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let (pool, _dir) = new_pool(128);
                let tree = BPlusTree::create(pool, DataType::Int);
                for i in 0..size {
                    tree.insert(black_box(&Value::Int(i)), i as u64).unwrap();
                }
            });
        });
    }

    group.finish();
}

fn bench_btree_search(c: &mut Criterion) {
    let (pool, _dir) = new_pool(128);
    let tree = BPlusTree::create(pool, DataType::Int);
    for i in 0..10_000_i64 {
        tree.insert(&Value::Int(i), i as u64).unwrap();
    }

    c.bench_function("btree_search", |b| {
        b.iter(|| {
            for i in (0..10_000_i64).step_by(100) {
                black_box(tree.search(&Value::Int(i)).unwrap());
            }
        });
    });
}

fn bench_btree_range_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree_range_scan");

    let (pool, _dir) = new_pool(128);
    let tree = BPlusTree::create(pool, DataType::Int);
    for i in 0..10_000_i64 {
        tree.insert(&Value::Int(i), i as u64).unwrap();
    }

    for width in [10_i64, 100, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, &width| {
            b.iter(|| {
                black_box(tree.range(&Value::Int(0), &Value::Int(width)).unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_btree_insert, bench_btree_search, bench_btree_range_scan);
criterion_main!(benches);
