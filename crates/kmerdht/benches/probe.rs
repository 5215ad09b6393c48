// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::cast_possible_truncation)]

//! Probe engine throughput benchmarks.
//!
//! Measures `insert`/`find` throughput over [`ThreadSubstrate`] at a fixed
//! 0.5 load factor (the load factor the original driver always builds the
//! table at, per `spec.md` §3).

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kmerdht::kmer::{Key, KmerRecord};
use kmerdht::substrate::thread::ThreadCluster;
use kmerdht::table::Table;

fn bases_for(i: u64) -> String {
    // Deterministic, distinct 21-base strings: base-4 encode `i` over ACGT.
    const ALPHABET: [char; 4] = ['A', 'C', 'G', 'T'];
    let mut n = i;
    let mut s = String::with_capacity(kmerdht::KMER_LEN);
    for _ in 0..kmerdht::KMER_LEN {
        s.push(ALPHABET[(n & 0b11) as usize]);
        n >>= 2;
    }
    s
}

fn records(n: u64) -> Vec<KmerRecord> {
    (0..n)
        .map(|i| {
            let key = Key::parse(bases_for(i).as_bytes()).unwrap();
            KmerRecord::new(key, b'A', b'F')
        })
        .collect()
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    for &n in &[1_000u64, 10_000] {
        group.throughput(Throughput::Elements(n));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let recs = records(n);
            let capacity = (n as f64 / 0.5).ceil() as usize;
            b.iter(|| {
                let cluster = ThreadCluster::new(1);
                let recs = recs.clone();
                cluster.run(move |s| {
                    let mut table = Table::new(s, capacity);
                    table.open_for_insert();
                    for r in &recs {
                        black_box(table.insert(*r));
                    }
                });
            });
        });
    }
    group.finish();
}

fn bench_find(c: &mut Criterion) {
    let mut group = c.benchmark_group("find");
    for &n in &[1_000u64, 10_000] {
        group.throughput(Throughput::Elements(n));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let recs = records(n);
            let capacity = (n as f64 / 0.5).ceil() as usize;
            b.iter(|| {
                let cluster = ThreadCluster::new(1);
                let recs = recs.clone();
                cluster.run(move |s| {
                    let mut table = Table::new(s, capacity);
                    table.open_for_insert();
                    for r in &recs {
                        table.insert(*r);
                    }
                    table.open_for_find();
                    let mut out = KmerRecord::default();
                    for r in &recs {
                        black_box(table.find(&r.key, &mut out));
                    }
                });
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_insert, bench_find);
criterion_main!(benches);
