use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use thiserror::Error;

use super::record::{LatencyReading, LatencyRecord, LatencySample, StatMap, TpsPair};

/// Sentinel the server uses for "not supported".
const NOT_SUPPORTED: &str = "n/s";

/// Separator inside a latency reading string.
const READING_SEPARATOR: char = ';';

/// Parses one raw statistic value.
///
/// Returns `None` for anything that is not a finite number, including the
/// `n/s` sentinel and boolean-like values.
pub fn parse_stat_value(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() || raw == NOT_SUPPORTED {
        return None;
    }
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parses a JSON scalar as a statistic value.
pub fn stat_value_from_json(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => parse_stat_value(s),
        _ => None,
    }
}

impl StatMap {
    /// Builds a map from raw string pairs, keeping only numeric values.
    pub fn from_raw<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        pairs
            .into_iter()
            .filter_map(|(k, v)| parse_stat_value(v).map(|v| (k, v)))
            .collect()
    }

    /// Builds a map from a JSON object, keeping only numeric values.
    /// Non-object input yields an empty map.
    pub fn from_json(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::new();
        };

        obj.iter()
            .filter_map(|(k, v)| stat_value_from_json(v).map(|v| (k.as_str(), v)))
            .collect()
    }
}

/// Error parsing a `value;percentile` latency reading.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LatencyParseError {
    #[error("latency reading {0:?} has no ';' separator")]
    MissingSeparator(String),
    #[error("latency reading {raw:?} has non-numeric {field}")]
    NotNumeric { raw: String, field: &'static str },
}

impl FromStr for LatencyReading {
    type Err = LatencyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (value, percentile) = s
            .split_once(READING_SEPARATOR)
            .ok_or_else(|| LatencyParseError::MissingSeparator(s.to_string()))?;

        let value = parse_stat_value(value).ok_or_else(|| LatencyParseError::NotNumeric {
            raw: s.to_string(),
            field: "value",
        })?;
        let percentile =
            parse_stat_value(percentile).ok_or_else(|| LatencyParseError::NotNumeric {
                raw: s.to_string(),
                field: "percentile",
            })?;

        Ok(Self { value, percentile })
    }
}

impl LatencyRecord {
    /// Builds a record from `{category: {bucket: "value;pct"}}`.
    ///
    /// Malformed readings are skipped and logged at debug; they never fail the
    /// whole record.
    pub fn from_json(value: &Value) -> Self {
        let mut samples = Vec::new();

        let Some(categories) = value.as_object() else {
            return Self { samples };
        };

        for (category, buckets) in categories {
            let Some(buckets) = buckets.as_object() else {
                tracing::debug!(category = %category, "latency category is not an object");
                continue;
            };

            for (bucket, raw) in buckets {
                let Some(raw) = raw.as_str() else {
                    tracing::debug!(category = %category, bucket = %bucket, "latency reading is not a string");
                    continue;
                };

                match raw.parse::<LatencyReading>() {
                    Ok(reading) => samples.push(LatencySample {
                        category: category.clone(),
                        bucket: bucket.clone(),
                        reading,
                    }),
                    Err(e) => {
                        tracing::debug!(category = %category, bucket = %bucket, error = %e, "skipping latency reading");
                    }
                }
            }
        }

        samples.sort_by(|a, b| {
            a.category
                .cmp(&b.category)
                .then_with(|| a.bucket.cmp(&b.bucket))
        });

        Self { samples }
    }
}

impl TpsPair {
    pub const SUCCESS_KEY: &'static str = "successTps";
    pub const TOTAL_KEY: &'static str = "totalTps";

    /// Builds a pair from `{"successTps": .., "totalTps": ..}`. Returns `None`
    /// when the value is not an object at all.
    pub fn from_json(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        Some(Self {
            success: obj.get(Self::SUCCESS_KEY).and_then(stat_value_from_json),
            total: obj.get(Self::TOTAL_KEY).and_then(stat_value_from_json),
        })
    }
}

/// Error parsing a server build version.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid build version {0:?}")]
pub struct VersionParseError(pub String);

/// Dotted server build version, e.g. `4.9.0.3`.
#[derive(Debug, Clone)]
pub struct BuildVersion {
    parts: Vec<u32>,
}

impl BuildVersion {
    /// Parses a dotted version. Trailing non-digit suffixes on the last
    /// segment (`3.9.1-rc2`) are ignored.
    pub fn parse(raw: &str) -> Result<Self, VersionParseError> {
        let raw = raw.trim();
        let core = raw.split(['-', '+', ' ']).next().unwrap_or_default();

        let parts = core
            .split('.')
            .map(|p| p.parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| VersionParseError(raw.to_string()))?;

        if parts.is_empty() {
            return Err(VersionParseError(raw.to_string()));
        }

        Ok(Self { parts })
    }

    /// Whether this version is at least `min`, padding missing segments with zero.
    pub fn at_least(&self, min: &BuildVersion) -> bool {
        self.cmp(min) != Ordering::Less
    }
}

impl Ord for BuildVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        for i in 0..len {
            let a = self.parts.get(i).copied().unwrap_or(0);
            let b = other.parts.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

// `3.9` and `3.9.0` compare equal, so equality goes through `cmp`.
impl PartialEq for BuildVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for BuildVersion {}

impl PartialOrd for BuildVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for BuildVersion {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for BuildVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{part}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stat_value() {
        assert_eq!(parse_stat_value("42"), Some(42.0));
        assert_eq!(parse_stat_value(" 1.5 "), Some(1.5));
        assert_eq!(parse_stat_value("n/s"), None);
        assert_eq!(parse_stat_value(""), None);
        assert_eq!(parse_stat_value("true"), None);
        assert_eq!(parse_stat_value("abc"), None);
        assert_eq!(parse_stat_value("NaN"), None);
        assert_eq!(parse_stat_value("inf"), None);
    }

    #[test]
    fn test_stat_map_from_raw_drops_non_numeric() {
        let stats = StatMap::from_raw([
            ("cluster_size", "3"),
            ("paxos_principal", "BB9"),
            ("stop_writes", "false"),
            ("used_bytes_memory", "n/s"),
        ]);

        assert_eq!(stats.len(), 1);
        assert_eq!(stats.get("cluster_size"), Some(3.0));
        assert_eq!(stats.get("used_bytes_memory"), None);
    }

    #[test]
    fn test_stat_map_from_json_mixed_types() {
        let value = serde_json::json!({
            "objects": "100",
            "uptime": 3600,
            "enabled": true,
            "nested": {"a": 1},
        });

        let stats = StatMap::from_json(&value);
        assert_eq!(stats.get("objects"), Some(100.0));
        assert_eq!(stats.get("uptime"), Some(3600.0));
        assert_eq!(stats.get("enabled"), None);
        assert_eq!(stats.get("nested"), None);

        assert!(StatMap::from_json(&serde_json::json!([1, 2])).is_empty());
    }

    #[test]
    fn test_latency_reading_from_str() {
        let reading: LatencyReading = "12.5;3.2".parse().expect("should parse");
        assert_eq!(reading.value, 12.5);
        assert_eq!(reading.percentile, 3.2);

        assert_eq!(
            "12.5".parse::<LatencyReading>(),
            Err(LatencyParseError::MissingSeparator("12.5".to_string()))
        );
        assert!(matches!(
            "x;1".parse::<LatencyReading>(),
            Err(LatencyParseError::NotNumeric { field: "value", .. })
        ));
        assert!(matches!(
            "1;n/s".parse::<LatencyReading>(),
            Err(LatencyParseError::NotNumeric {
                field: "percentile",
                ..
            })
        ));
    }

    #[test]
    fn test_latency_record_from_json_skips_malformed() {
        let value = serde_json::json!({
            "writes": {">1ms": "2;0.5", ">8ms": "bad"},
            "ns1-query": {">1ms": "5;1.0"},
            "reads": 7,
        });

        let rec = LatencyRecord::from_json(&value);
        assert_eq!(rec.samples.len(), 2);
        assert_eq!(rec.samples[0].category, "ns1-query");
        assert_eq!(rec.samples[1].category, "writes");
        assert_eq!(rec.samples[1].reading.value, 2.0);
    }

    #[test]
    fn test_tps_pair_from_json() {
        let pair = TpsPair::from_json(&serde_json::json!({"successTps": "10"}))
            .expect("object should parse");
        assert_eq!(pair.success, Some(10.0));
        assert_eq!(pair.total, None);

        assert!(TpsPair::from_json(&serde_json::Value::Null).is_none());
    }

    #[test]
    fn test_build_version_compare() {
        let min = BuildVersion::parse("3.9").expect("valid");

        assert!(BuildVersion::parse("3.9").expect("valid").at_least(&min));
        assert!(BuildVersion::parse("3.9.0.0").expect("valid").at_least(&min));
        assert!(BuildVersion::parse("3.10.1").expect("valid").at_least(&min));
        assert!(BuildVersion::parse("4.0").expect("valid").at_least(&min));
        assert!(!BuildVersion::parse("3.8.4").expect("valid").at_least(&min));
        assert!(BuildVersion::parse("3.9.1-rc2").expect("valid").at_least(&min));
    }

    #[test]
    fn test_build_version_eq_consistent_with_ord() {
        let short = BuildVersion::parse("3.9").expect("valid");
        let padded = BuildVersion::parse("3.9.0").expect("valid");
        assert_eq!(short, padded);
        assert_eq!(short.cmp(&padded), Ordering::Equal);
        assert_ne!(short, BuildVersion::parse("3.9.1").expect("valid"));
    }

    #[test]
    fn test_build_version_invalid() {
        assert!(BuildVersion::parse("").is_err());
        assert!(BuildVersion::parse("abc").is_err());
        assert!(BuildVersion::parse("3..9").is_err());
    }

    #[test]
    fn test_build_version_display() {
        let v = BuildVersion::parse("4.9.0.3").expect("valid");
        assert_eq!(v.to_string(), "4.9.0.3");
    }
}
