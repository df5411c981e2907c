use std::alloc::System;
use std::hint::black_box;

use aerostat::aggregate::{LatencyAggregator, ThroughputAccumulator, DEFAULT_LATENCY_BUCKETS};
use aerostat::source::{LatencySample, NodeId, ThroughputRecord, TpsPair};
use serial_test::serial;
use stats_alloc::{Region, StatsAlloc, INSTRUMENTED_SYSTEM};

#[global_allocator]
static GLOBAL: &StatsAlloc<System> = &INSTRUMENTED_SYSTEM;

fn measure_alloc_counts<T>(f: impl FnOnce() -> T) -> (T, usize, usize) {
    // Calibrate for ambient allocator activity in the test harness process.
    let idle_region = Region::new(&GLOBAL);
    black_box(());
    let idle = idle_region.change();

    let region = Region::new(&GLOBAL);
    let output = f();
    let used = region.change();

    let allocations = used.allocations.saturating_sub(idle.allocations);
    let deallocations = used.deallocations.saturating_sub(idle.deallocations);
    (output, allocations, deallocations)
}

fn node_samples(node: usize) -> Vec<LatencySample> {
    let mut samples = Vec::new();
    for ns in ["test", "bar"] {
        for category in ["read", "write", "query"] {
            for bucket in DEFAULT_LATENCY_BUCKETS {
                samples.push(LatencySample::new(
                    format!("{ns}-{category}"),
                    bucket,
                    (node + 1) as f64 * 0.25,
                    1.0,
                ));
            }
        }
    }
    samples
}

fn buckets() -> Vec<String> {
    DEFAULT_LATENCY_BUCKETS
        .iter()
        .map(|b| (*b).to_string())
        .collect()
}

#[test]
#[serial]
fn latency_absorb_steady_state_allocates_zero() {
    let nodes: Vec<(NodeId, Vec<LatencySample>)> = (0..16)
        .map(|i| (NodeId::new(format!("10.0.0.{i}:3000")), node_samples(i)))
        .collect();

    let mut agg = LatencyAggregator::new(buckets());
    // Warm up: the first cycle creates every category entry.
    for (id, samples) in &nodes {
        agg.absorb(id, true, samples);
    }

    let ((), allocations, _deallocations) = measure_alloc_counts(|| {
        for _ in 0..64 {
            for (id, samples) in &nodes {
                agg.absorb(id, true, samples);
            }
        }
        black_box(agg.cluster_wide_totals().overall.len());
    });

    assert_eq!(
        allocations, 0,
        "latency absorb allocated on existing categories: {}",
        allocations
    );
}

#[test]
#[serial]
fn latency_absorb_first_cycle_allocation_budget() {
    let samples = node_samples(0);
    let id = NodeId::new("10.0.0.1:3000");

    let ((), allocations, _deallocations) = measure_alloc_counts(|| {
        let mut agg = LatencyAggregator::new(buckets());
        agg.absorb(&id, true, &samples);
        black_box(agg.cluster_wide_totals().namespace_scoped.len());
    });

    // Six namespace-scoped and three overall categories, each seeding three
    // buckets plus map nodes.
    assert!(
        allocations <= 128,
        "first-cycle latency allocation budget exceeded: {}",
        allocations
    );
}

#[test]
#[serial]
fn throughput_absorb_allocates_zero() {
    let records: Vec<ThroughputRecord> = (0..64)
        .map(|i| ThroughputRecord {
            reads: Some(TpsPair {
                success: Some(i as f64),
                total: Some(i as f64 + 1.0),
            }),
            writes: (i % 3 != 0).then_some(TpsPair {
                success: None,
                total: Some(2.0),
            }),
        })
        .collect();

    let mut acc = ThroughputAccumulator::new();

    let ((), allocations, deallocations) = measure_alloc_counts(|| {
        for _ in 0..256 {
            acc.reset();
            for record in &records {
                black_box(acc.absorb(record));
            }
        }
        black_box(acc.totals());
    });

    assert_eq!(allocations, 0, "throughput absorb allocated: {}", allocations);
    assert_eq!(deallocations, 0, "throughput absorb deallocated: {}", deallocations);
}
