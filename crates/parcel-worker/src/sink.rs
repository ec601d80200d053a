//! Per-call metrics.

use metrics::{counter, gauge};

/// Counter incremented once per dispatched call.
pub const COUNT: &str = "Count";

/// Gauge set to the invocation budget left after a call.
pub const REMAINING_MILLISECONDS: &str = "RemainingMilliseconds";

/// Dimensions attached to every metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tags<'a> {
    pub function: &'a str,
    pub worker: &'a str,
}

/// Destination for per-call metrics. Emission is best-effort and cannot
/// fail a call.
pub trait MetricsSink: Send + Sync {
    fn increment_counter(&self, name: &'static str, value: u64, tags: Tags<'_>);
    fn set_gauge(&self, name: &'static str, value: f64, tags: Tags<'_>);
}

/// Forwards to the `metrics` facade and whichever recorder is installed.
#[derive(Debug, Clone, Copy, Default)]
pub struct FacadeSink;

impl MetricsSink for FacadeSink {
    fn increment_counter(&self, name: &'static str, value: u64, tags: Tags<'_>) {
        counter!(
            name,
            "function" => tags.function.to_owned(),
            "worker" => tags.worker.to_owned()
        )
        .increment(value);
    }

    fn set_gauge(&self, name: &'static str, value: f64, tags: Tags<'_>) {
        gauge!(
            name,
            "function" => tags.function.to_owned(),
            "worker" => tags.worker.to_owned()
        )
        .set(value);
    }
}

/// Drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn increment_counter(&self, _: &'static str, _: u64, _: Tags<'_>) {}
    fn set_gauge(&self, _: &'static str, _: f64, _: Tags<'_>) {}
}
