use criterion::{black_box, criterion_group, criterion_main, Criterion};

use aerostat::aggregate::{LatencyAggregator, ThroughputAccumulator, DEFAULT_LATENCY_BUCKETS};
use aerostat::source::{LatencyRecord, LatencySample, NodeId, StatMap, ThroughputRecord, TpsPair};

fn latency_input(nodes: usize) -> Vec<(NodeId, bool, Vec<LatencySample>)> {
    (0..nodes)
        .map(|i| {
            let capable = i % 2 == 0;
            let mut samples = Vec::new();
            for category in ["read", "write", "query", "udf"] {
                let category = if capable {
                    format!("ns{}-{category}", i % 4)
                } else {
                    category.to_string()
                };
                for bucket in DEFAULT_LATENCY_BUCKETS {
                    samples.push(LatencySample::new(category.clone(), bucket, 1.5, 0.2));
                }
            }
            (NodeId::new(format!("10.0.0.{i}:3000")), capable, samples)
        })
        .collect()
}

fn raw_statistics() -> Vec<(String, String)> {
    (0..400)
        .map(|i| {
            let value = match i % 5 {
                0 => "n/s".to_string(),
                1 => "true".to_string(),
                _ => (i * 1_024).to_string(),
            };
            (format!("stat_{i}"), value)
        })
        .collect()
}

fn bench_latency(c: &mut Criterion) {
    let input = latency_input(32);
    let buckets: Vec<String> = DEFAULT_LATENCY_BUCKETS
        .iter()
        .map(|b| (*b).to_string())
        .collect();
    let mut agg = LatencyAggregator::new(buckets);

    c.bench_function("latency/absorb_32_nodes", |b| {
        b.iter(|| {
            agg.reset();
            for (id, capable, samples) in &input {
                agg.absorb(id, *capable, black_box(samples));
            }
            black_box(agg.cluster_wide_totals().overall.len())
        })
    });

    let json = serde_json::json!({
        "read": { ">1ms": "1.25;0.4", ">8ms": "0.50;0.1", ">64ms": "0.00;0.0" },
        "ns1-write": { ">1ms": "3.00;0.9", ">8ms": "bogus" },
    });
    c.bench_function("latency/record_from_json", |b| {
        b.iter(|| black_box(LatencyRecord::from_json(black_box(&json))))
    });
}

fn bench_throughput(c: &mut Criterion) {
    let records: Vec<ThroughputRecord> = (0..256)
        .map(|i| ThroughputRecord {
            reads: Some(TpsPair {
                success: Some(i as f64),
                total: Some(i as f64 + 0.5),
            }),
            writes: Some(TpsPair {
                success: None,
                total: Some(4.0),
            }),
        })
        .collect();
    let mut acc = ThroughputAccumulator::new();

    c.bench_function("throughput/absorb_256_nodes", |b| {
        b.iter(|| {
            acc.reset();
            for record in &records {
                black_box(acc.absorb(black_box(record)));
            }
            black_box(acc.totals())
        })
    });
}

fn bench_stat_map(c: &mut Criterion) {
    let raw = raw_statistics();

    c.bench_function("stat_map/from_raw_400", |b| {
        b.iter(|| {
            let stats = StatMap::from_raw(raw.iter().map(|(k, v)| (k.as_str(), v.as_str())));
            black_box(stats.len())
        })
    });
}

fn bench_suite(c: &mut Criterion) {
    bench_latency(c);
    bench_throughput(c);
    bench_stat_map(c);
}

criterion_group!(benches, bench_suite);
criterion_main!(benches);
