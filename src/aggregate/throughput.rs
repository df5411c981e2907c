use crate::source::{ThroughputRecord, TpsPair};

/// Running success/total sums for one direction.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TpsCounter {
    pub success: f64,
    pub total: f64,
}

impl TpsCounter {
    fn add(&mut self, other: TpsCounter) {
        self.success += other.success;
        self.total += other.total;
    }
}

impl From<TpsPair> for TpsCounter {
    /// Absent figures count as zero.
    fn from(pair: TpsPair) -> Self {
        Self {
            success: pair.success.unwrap_or(0.0),
            total: pair.total.unwrap_or(0.0),
        }
    }
}

/// Cluster-wide throughput for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ThroughputTotals {
    pub reads: TpsCounter,
    pub writes: TpsCounter,
}

/// Per-node figures to emit, with missing sub-counters already defaulted to
/// zero. A direction the node did not report at all stays `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NodeThroughput {
    pub reads: Option<TpsCounter>,
    pub writes: Option<TpsCounter>,
}

/// Sums per-node read/write throughput into cluster totals.
#[derive(Debug, Default)]
pub struct ThroughputAccumulator {
    totals: ThroughputTotals,
}

impl ThroughputAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.totals = ThroughputTotals::default();
    }

    /// Adds one node's snapshot and returns the node-level figures to emit.
    pub fn absorb(&mut self, record: &ThroughputRecord) -> NodeThroughput {
        let reads = record.reads.map(TpsCounter::from);
        let writes = record.writes.map(TpsCounter::from);

        if let Some(r) = reads {
            self.totals.reads.add(r);
        }
        if let Some(w) = writes {
            self.totals.writes.add(w);
        }

        NodeThroughput { reads, writes }
    }

    pub fn totals(&self) -> ThroughputTotals {
        self.totals
    }
}
