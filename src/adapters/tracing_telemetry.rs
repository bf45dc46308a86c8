//! Telemetry sink that forwards every event to `tracing`.

use crate::domain::cache::CacheOutcome;
use crate::domain::engine::BatchSummary;
use crate::domain::error::ErrorKind;
use crate::ports::telemetry_port::TelemetryPort;
use std::time::Duration;

const TARGET: &str = "quantexpr::telemetry";

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetryPort for TracingTelemetry {
    fn cache_lookup(&self, indicator: &str, outcome: CacheOutcome) {
        tracing::debug!(target: TARGET, indicator, outcome = %outcome, "cache lookup");
    }

    fn evaluation_latency(&self, indicator: &str, elapsed: Duration) {
        tracing::debug!(
            target: TARGET,
            indicator,
            elapsed_us = elapsed.as_micros() as u64,
            "evaluation latency"
        );
    }

    fn error(&self, indicator: &str, kind: ErrorKind) {
        tracing::info!(target: TARGET, indicator, kind = %kind, "indicator error");
    }

    fn lookback_shortfall(&self, indicator: &str, declared: usize, required: usize) {
        tracing::info!(target: TARGET, indicator, declared, required, "lookback shortfall");
    }

    fn batch_completed(&self, summary: &BatchSummary) {
        tracing::info!(
            target: TARGET,
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            hits = summary.cache_hits,
            misses = summary.cache_misses,
            joined = summary.cache_joined,
            "batch completed"
        );
    }
}
