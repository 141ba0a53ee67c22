//! Benchmarks for spark-observables
//!
//! Run with: cargo bench

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use spark_observables::combinators::SourceSet;
use spark_observables::{
    ListChangeEvent, SetChangeEvent, ThreadRealm, UnionSet, ValueChangeEvent, WritableList,
    WritableSet, WritableValue, compute_list_diff, compute_map_diff, compute_set_diff, listener,
};

// =============================================================================
// DIFF BENCHMARKS
// =============================================================================

fn bench_list_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("list_diff");
    for size in [10usize, 100, 1000] {
        let old: Vec<usize> = (0..size).collect();

        let mut rotated = old.clone();
        rotated.rotate_left(size / 3);
        group.bench_with_input(BenchmarkId::new("rotate", size), &rotated, |b, new| {
            b.iter(|| black_box(compute_list_diff(&old, new).entries().len()))
        });

        let reversed: Vec<usize> = old.iter().rev().copied().collect();
        group.bench_with_input(BenchmarkId::new("reverse", size), &reversed, |b, new| {
            b.iter(|| black_box(compute_list_diff(&old, new).entries().len()))
        });

        let appended: Vec<usize> = (0..size + size / 10).collect();
        group.bench_with_input(BenchmarkId::new("append", size), &appended, |b, new| {
            b.iter(|| black_box(compute_list_diff(&old, new).entries().len()))
        });
    }
    group.finish();
}

fn bench_set_diff(c: &mut Criterion) {
    let old: HashSet<u32> = (0..1000).collect();
    let new: HashSet<u32> = (500..1500).collect();
    c.bench_function("set_diff_half_overlap", |b| {
        b.iter(|| black_box(compute_set_diff(&old, &new)))
    });
}

fn bench_map_diff(c: &mut Criterion) {
    let old: HashMap<u32, u32> = (0..1000).map(|k| (k, k)).collect();
    let new: HashMap<u32, u32> = (0..1000).map(|k| (k, if k % 10 == 0 { k + 1 } else { k })).collect();
    c.bench_function("map_diff_ten_percent_changed", |b| {
        b.iter(|| black_box(compute_map_diff(&old, &new)))
    });
}

// =============================================================================
// CONTAINER BENCHMARKS
// =============================================================================

fn bench_value_set(c: &mut Criterion) {
    let realm = ThreadRealm::current();
    let value = WritableValue::new(&realm, 0u64);
    let _ = value.add_value_change_listener(listener(|e: &ValueChangeEvent<u64>| {
        black_box(e.diff.new_value());
    }));

    let mut next = 0u64;
    c.bench_function("value_set_one_listener", |b| {
        b.iter(|| {
            next += 1;
            value.set(black_box(next))
        })
    });
}

fn bench_list_push(c: &mut Criterion) {
    let realm = ThreadRealm::current();
    c.bench_function("list_push_100_observed", |b| {
        b.iter(|| {
            let list = WritableList::new(&realm);
            let _ = list.add_list_change_listener(listener(|e: &ListChangeEvent<u32>| {
                black_box(e.diff.entries().len());
            }));
            for i in 0..100u32 {
                let _ = list.push(i);
            }
            list
        })
    });
}

fn bench_union_update(c: &mut Criterion) {
    let realm = ThreadRealm::current();
    let first = WritableSet::from_set(&realm, (0..500u32).collect::<HashSet<_>>());
    let second = WritableSet::from_set(&realm, (250..750u32).collect::<HashSet<_>>());
    let sources: Vec<SourceSet<u32>> = vec![Arc::new(first.clone()), Arc::new(second)];
    let union = UnionSet::new(&realm, sources);
    let _ = union.add_set_change_listener(listener(|e: &SetChangeEvent<u32>| {
        black_box(e.diff.is_empty());
    }));

    c.bench_function("union_toggle_shared_element", |b| {
        b.iter(|| {
            let _ = first.remove(&300);
            let _ = first.insert(300);
        })
    });
}

criterion_group!(
    benches,
    bench_list_diff,
    bench_set_diff,
    bench_map_diff,
    bench_value_set,
    bench_list_push,
    bench_union_update,
);
criterion_main!(benches);
