use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::client::Status;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum OpKind {
    Insert,
    Read,
    Update,
    Scan,
    ReadModifyWrite,
    Delete,
}

impl OpKind {
    fn label(self) -> &'static str {
        match self {
            OpKind::Insert => "Inserts",
            OpKind::Read => "Reads",
            OpKind::Update => "Updates",
            OpKind::Scan => "Scans",
            OpKind::ReadModifyWrite => "Read-Modify",
            OpKind::Delete => "Deletes",
        }
    }
}

#[derive(Debug, Default, Clone)]
struct OpSamples {
    latencies: Vec<Duration>,
    errors: u64,
}

#[derive(Debug, Default, Clone)]
pub struct Metrics {
    ops: BTreeMap<OpKind, OpSamples>,
}

#[derive(Default, Clone)]
pub struct ConcurrentMetrics {
    metrics: Arc<Mutex<Metrics>>,
}

impl ConcurrentMetrics {
    pub async fn record(&self, kind: OpKind, duration: Duration, status: Status) {
        self.metrics.lock().await.record(kind, duration, status);
    }

    /// Fold a task-local batch in with a single lock acquisition.
    pub async fn merge(&self, other: Metrics) {
        let mut guard = self.metrics.lock().await;
        for (kind, samples) in other.ops {
            let entry = guard.ops.entry(kind).or_default();
            entry.latencies.extend(samples.latencies);
            entry.errors += samples.errors;
        }
    }

    pub async fn get_metrics(&self) -> Metrics {
        self.metrics.lock().await.clone()
    }
}

/// Latency summary of one operation type, in nanoseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpSummary {
    pub operation: OpKind,
    pub count: u64,
    pub errors: u64,
    pub min_ns: u64,
    pub max_ns: u64,
    pub avg_ns: f64,
    pub p50_ns: u64,
    pub p95_ns: u64,
    pub p99_ns: u64,
}

impl Metrics {
    pub fn record(&mut self, kind: OpKind, duration: Duration, status: Status) {
        let samples = self.ops.entry(kind).or_default();
        samples.latencies.push(duration);
        if !status.is_ok() {
            samples.errors += 1;
        }
    }

    pub fn total_operations(&self) -> u64 {
        self.ops.values().map(|s| s.latencies.len() as u64).sum()
    }

    pub fn total_errors(&self) -> u64 {
        self.ops.values().map(|s| s.errors).sum()
    }

    pub fn summaries(&self) -> Vec<OpSummary> {
        self.ops
            .iter()
            .filter(|(_, samples)| !samples.latencies.is_empty())
            .map(|(kind, samples)| Self::calculate_stats(*kind, samples))
            .collect()
    }

    fn format_duration(nanos: f64) -> String {
        if nanos < 1_000.0 {
            format!("{:.2} ns", nanos)
        } else if nanos < 1_000_000.0 {
            format!("{:.2} µs", nanos / 1_000.0)
        } else if nanos < 1_000_000_000.0 {
            format!("{:.2} ms", nanos / 1_000_000.0)
        } else {
            format!("{:.2} s", nanos / 1_000_000_000.0)
        }
    }

    fn calculate_stats(kind: OpKind, samples: &OpSamples) -> OpSummary {
        let count = samples.latencies.len() as u64;

        // Streaming mean to avoid overflow
        let mut avg = 0.0;
        for (i, d) in samples.latencies.iter().enumerate() {
            let delta = (d.as_nanos() as f64 - avg) / (i + 1) as f64;
            avg += delta;
        }

        let mut sorted: Vec<_> = samples.latencies.clone();
        sorted.sort_unstable();

        let at = |pct: u64| sorted[((count - 1) * pct / 100) as usize].as_nanos() as u64;

        OpSummary {
            operation: kind,
            count,
            errors: samples.errors,
            min_ns: sorted[0].as_nanos() as u64,
            max_ns: sorted[sorted.len() - 1].as_nanos() as u64,
            avg_ns: avg,
            p50_ns: at(50),
            p95_ns: at(95),
            p99_ns: at(99),
        }
    }
}

impl Display for Metrics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\nDetailed Latency Statistics:")?;
        writeln!(
            f,
            "{:<15} {:<12} {:<12} {:<12} {:<12} {:<12} {:<12} {:<12}",
            "Operation", "Count", "Errors", "Min", "Max", "Median", "P95", "P99"
        )?;
        writeln!(f, "{:-<100}", "")?;

        for summary in self.summaries() {
            writeln!(
                f,
                "{:<15} {:<12} {:<12} {:<12} {:<12} {:<12} {:<12} {:<12}",
                summary.operation.label(),
                summary.count,
                summary.errors,
                Self::format_duration(summary.min_ns as f64),
                Self::format_duration(summary.max_ns as f64),
                Self::format_duration(summary.p50_ns as f64),
                Self::format_duration(summary.p95_ns as f64),
                Self::format_duration(summary.p99_ns as f64),
            )?;
        }

        Ok(())
    }
}
