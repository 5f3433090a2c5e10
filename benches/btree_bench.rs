use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use tempfile::NamedTempFile;

use cinderdb::common::types::Rid;
use cinderdb::index::btree::BPlusTree;
use cinderdb::storage::buffer::BufferPoolManager;
use cinderdb::transaction::Transaction;

fn bench_insert(c: &mut Criterion) {
    c.bench_function("btree_insert_1k", |b| {
        b.iter_with_setup(
            || {
                let file = NamedTempFile::new().unwrap();
                let pool =
                    Arc::new(BufferPoolManager::new(256, file.path()).unwrap());
                let tree = BPlusTree::<i64>::new("bench", pool).unwrap();
                (tree, file)
            },
            |(tree, _file)| {
                let mut txn = Transaction::new(1);
                for key in 0..1000i64 {
                    tree.insert(&key, Rid::new(1, key as u32), &mut txn).unwrap();
                }
            },
        );
    });
}

fn bench_point_lookup(c: &mut Criterion) {
    let file = NamedTempFile::new().unwrap();
    let pool = Arc::new(BufferPoolManager::new(256, file.path()).unwrap());
    let tree = BPlusTree::<i64>::new("bench", pool).unwrap();
    let mut txn = Transaction::new(1);
    for key in 0..10_000i64 {
        tree.insert(&key, Rid::new(1, key as u32), &mut txn).unwrap();
    }

    c.bench_function("btree_lookup", |b| {
        let mut key = 0i64;
        b.iter(|| {
            key = (key + 7919) % 10_000;
            tree.get_value(&key, None).unwrap().unwrap()
        });
    });
}

fn bench_range_scan(c: &mut Criterion) {
    let file = NamedTempFile::new().unwrap();
    let pool = Arc::new(BufferPoolManager::new(256, file.path()).unwrap());
    let tree = BPlusTree::<i64>::new("bench", pool).unwrap();
    let mut txn = Transaction::new(1);
    for key in 0..10_000i64 {
        tree.insert(&key, Rid::new(1, key as u32), &mut txn).unwrap();
    }

    c.bench_function("btree_scan_1k", |b| {
        b.iter(|| {
            tree.iter_from(&4000)
                .unwrap()
                .take(1000)
                .map(|(k, _)| k)
                .sum::<i64>()
        });
    });
}

criterion_group!(benches, bench_insert, bench_point_lookup, bench_range_scan);
criterion_main!(benches);
