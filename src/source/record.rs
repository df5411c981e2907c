use std::collections::BTreeMap;

/// Parsed numeric statistics for one node or namespace, ordered by name.
///
/// Values that could not be parsed never make it into the map, so a lookup
/// miss means "absent" regardless of whether the gateway omitted the key or
/// reported garbage for it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatMap {
    values: BTreeMap<String, f64>,
}

impl StatMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value for `name`, if present and numeric.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates statistics in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for StatMap {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Resource figures reported directly by nodes with the newer accounting format.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceRecord {
    pub used_bytes_memory: Option<f64>,
    pub used_bytes_disk: Option<f64>,
}

impl ResourceRecord {
    pub const USED_BYTES_MEMORY: &'static str = "used_bytes_memory";
    pub const USED_BYTES_DISK: &'static str = "used_bytes_disk";

    /// Picks the used-bytes figures out of the memory and disk stat maps.
    pub fn from_stats(memory: &StatMap, disk: &StatMap) -> Self {
        Self {
            used_bytes_memory: memory.get(Self::USED_BYTES_MEMORY),
            used_bytes_disk: disk.get(Self::USED_BYTES_DISK),
        }
    }
}

/// One direction's throughput: successful and total operations per second.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TpsPair {
    pub success: Option<f64>,
    pub total: Option<f64>,
}

/// Per-node throughput snapshot. A direction the node did not report is `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ThroughputRecord {
    pub reads: Option<TpsPair>,
    pub writes: Option<TpsPair>,
}

/// A latency bucket reading with its percentile companion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyReading {
    pub value: f64,
    pub percentile: f64,
}

/// One `(category, bucket, reading)` sample from a node.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencySample {
    pub category: String,
    pub bucket: String,
    pub reading: LatencyReading,
}

impl LatencySample {
    pub fn new(
        category: impl Into<String>,
        bucket: impl Into<String>,
        value: f64,
        percentile: f64,
    ) -> Self {
        Self {
            category: category.into(),
            bucket: bucket.into(),
            reading: LatencyReading { value, percentile },
        }
    }
}

/// All latency samples reported by one node in one cycle, ordered by
/// category then bucket.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatencyRecord {
    pub samples: Vec<LatencySample>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stat_map_iterates_in_name_order() {
        let stats: StatMap = [("zeta", 1.0), ("alpha", 2.0), ("mid", 3.0)]
            .into_iter()
            .collect();

        let names: Vec<&str> = stats.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
        assert_eq!(stats.get("mid"), Some(3.0));
        assert_eq!(stats.get("missing"), None);
    }

    #[test]
    fn test_resource_record_from_stats() {
        let memory: StatMap = [("used_bytes_memory", 1024.0)].into_iter().collect();
        let disk = StatMap::new();

        let rec = ResourceRecord::from_stats(&memory, &disk);
        assert_eq!(rec.used_bytes_memory, Some(1024.0));
        assert_eq!(rec.used_bytes_disk, None);
    }
}
