//! 🏎️ How fast can we turn lines into documents and documents into statistics?
//! The network will be slower. It is always slower. But we should not be the bottleneck.

use std::hint::black_box;
use std::time::Duration;

use couchload::common::{Batch, DocResult, WriteOutcome};
use couchload::parser::parse_line;
use couchload::stats::AggregatedStats;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};

fn sample_lines(count: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|n| {
            format!(
                "{{\"_id\":\"movie-{n}\",\"title\":\"Movie number {n}\",\"year\":{},\"tags\":[\"drama\",\"couch\"]}}\n",
                1950 + n % 70
            )
            .into_bytes()
        })
        .collect()
}

fn bench_parse_into_batches(c: &mut Criterion) {
    let lines = sample_lines(500);
    let mut group = c.benchmark_group("parse");
    group.throughput(Throughput::Elements(lines.len() as u64));
    group.bench_function("500 lines into one batch", |b| {
        b.iter(|| {
            let docs = lines.iter().filter_map(|line| parse_line(black_box(line))).collect();
            black_box(Batch::new(docs))
        })
    });
    group.finish();
}

fn bench_record_outcomes(c: &mut Criterion) {
    let outcome = WriteOutcome {
        status_code: 201,
        latency: Duration::from_millis(12),
        results: (0..500)
            .map(|i| {
                if i % 50 == 0 {
                    DocResult::failure(format!("doc-{i}"), "conflict")
                } else {
                    DocResult::success(format!("doc-{i}"))
                }
            })
            .collect(),
    };
    c.bench_function("record one 500-doc outcome", |b| {
        let mut stats = AggregatedStats::new();
        b.iter(|| black_box(stats.record(black_box(&outcome))))
    });
}

criterion_group!(benches, bench_parse_into_batches, bench_record_outcomes);
criterion_main!(benches);
