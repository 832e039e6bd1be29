use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

/// Accumulated time charged against one tag.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Bucket {
    pub total: Duration,
    pub starts: u32,
}

/// Named time buckets. Buckets only ever grow; nothing is reset.
#[derive(Debug, Default, Clone)]
pub struct Stopwatch {
    buckets: BTreeMap<String, Bucket>,
}

impl Stopwatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, tag: &str, elapsed: Duration) {
        let bucket = self.buckets.entry(tag.to_string()).or_default();
        bucket.total += elapsed;
        bucket.starts += 1;
    }

    /// Time an async block and charge it against `tag`.
    pub async fn time<T>(&mut self, tag: &str, fut: impl Future<Output = T>) -> T {
        let start = tokio::time::Instant::now();
        let out = fut.await;
        self.record(tag, start.elapsed());
        out
    }

    pub fn get(&self, tag: &str) -> Option<Bucket> {
        self.buckets.get(tag).copied()
    }

    /// Fold another stopwatch's buckets into this one.
    pub fn merge(&mut self, other: &Stopwatch) {
        for (tag, b) in &other.buckets {
            let bucket = self.buckets.entry(tag.clone()).or_default();
            bucket.total += b.total;
            bucket.starts += b.starts;
        }
    }

    /// Snapshot the buckets as a persisted performance record.
    pub fn to_record(&self, activity: &str) -> PerfRecord {
        PerfRecord {
            activity: activity.to_string(),
            timings: self
                .buckets
                .iter()
                .map(|(name, b)| Timing {
                    name: name.clone(),
                    accumulated_ms: u64::try_from(b.total.as_millis()).unwrap_or(u64::MAX),
                    starts: b.starts,
                })
                .collect(),
        }
    }

    pub fn log_summary(&self, activity: &str) {
        for (tag, b) in &self.buckets {
            info!(activity, tag, total_ms = b.total.as_millis(), starts = b.starts, "timing");
        }
    }
}

/// Performance data kept alongside the boot metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerfRecord {
    pub activity: String,
    pub timings: Vec<Timing>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    pub name: String,
    pub accumulated_ms: u64,
    pub starts: u32,
}
