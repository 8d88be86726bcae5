use common::{Record, Snapshot};
use criterion::{Criterion, criterion_group, criterion_main};
use live_refresh::{AggregateView, EventCoalescer, HistogramConfig};

const COUNTRIES: [&str; 8] = ["US", "CA", "MX", "BR", "AR", "CL", "PE", "CO"];

fn make_snapshot(n: usize) -> Snapshot {
    (0..n)
        .map(|i| {
            Record::new()
                .with("name", format!("user-{i}"))
                .with("age", 18 + (i % 60) as i64)
                .with("country", COUNTRIES[i % COUNTRIES.len()])
        })
        .collect()
}

fn bench_aggregate_1000_users(c: &mut Criterion) {
    let snapshot = make_snapshot(1_000);
    let config = HistogramConfig::default();

    c.bench_function("aggregate/1000_users", |b| {
        b.iter(|| AggregateView::from_snapshot(&snapshot, &config));
    });
}

fn bench_aggregate_100000_users(c: &mut Criterion) {
    let snapshot = make_snapshot(100_000);
    let config = HistogramConfig::default();

    c.bench_function("aggregate/100000_users", |b| {
        b.iter(|| AggregateView::from_snapshot(&snapshot, &config));
    });
}

fn bench_coalescer_mark_and_take(c: &mut Criterion) {
    let coalescer = EventCoalescer::new();

    c.bench_function("coalescer/100_marks_then_take", |b| {
        b.iter(|| {
            for _ in 0..100 {
                coalescer.mark_dirty();
            }
            coalescer.take_dirty()
        });
    });
}

criterion_group!(
    benches,
    bench_aggregate_1000_users,
    bench_aggregate_100000_users,
    bench_coalescer_mark_and_take,
);
criterion_main!(benches);
