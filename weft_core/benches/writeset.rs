//! Write-set hot path benchmarks.
//!
//! The write set sits on every transactional store and every read-after-write
//! lookup, so insert/find/reset throughput bounds redo-log commit cost.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use weft_core::word::FULL_MASK;
use weft_core::{Word, WriteSet, WriteSetEntry};

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("writeset_insert");

    for size in [16usize, 256, 4096] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let mut words: Vec<Word> = vec![0; size];
            b.iter(|| {
                let mut ws = WriteSet::new(64);
                for w in words.iter_mut() {
                    ws.insert(WriteSetEntry {
                        addr: w,
                        value: 1,
                        mask: FULL_MASK,
                    });
                }
                black_box(ws.len())
            })
        });
    }
    group.finish();
}

fn bench_raw_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("writeset_find");

    // Hit: the address is buffered.
    group.bench_function("hit", |b| {
        let mut word: Word = 0;
        let mut ws = WriteSet::new(64);
        ws.insert(WriteSetEntry {
            addr: &mut word,
            value: 7,
            mask: FULL_MASK,
        });
        let addr = &word as *const Word;
        b.iter(|| black_box(ws.find(addr)))
    });

    // Miss: the common case on the read path.
    group.bench_function("miss", |b| {
        let mut words: Vec<Word> = vec![0; 64];
        let mut ws = WriteSet::new(64);
        for w in words.iter_mut() {
            ws.insert(WriteSetEntry {
                addr: w,
                value: 1,
                mask: FULL_MASK,
            });
        }
        let other: Word = 0;
        let addr = &other as *const Word;
        b.iter(|| black_box(ws.find(addr)))
    });

    group.finish();
}

fn bench_reset(c: &mut Criterion) {
    c.bench_function("writeset_reset", |b| {
        let mut words: Vec<Word> = vec![0; 256];
        let mut ws = WriteSet::new(64);
        b.iter(|| {
            for w in words.iter_mut() {
                ws.insert(WriteSetEntry {
                    addr: w,
                    value: 1,
                    mask: FULL_MASK,
                });
            }
            ws.reset();
        })
    });
}

criterion_group!(benches, bench_insert, bench_raw_lookup, bench_reset);
criterion_main!(benches);
