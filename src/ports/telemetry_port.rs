//! Telemetry sink port.
//!
//! Fire-and-forget events emitted by the engine while it runs a batch. Sinks
//! must be cheap and must not fail.

use crate::domain::cache::CacheOutcome;
use crate::domain::engine::BatchSummary;
use crate::domain::error::ErrorKind;
use std::time::Duration;

pub trait TelemetryPort: Send + Sync {
    fn cache_lookup(&self, indicator: &str, outcome: CacheOutcome);

    fn evaluation_latency(&self, indicator: &str, elapsed: Duration);

    fn error(&self, indicator: &str, kind: ErrorKind);

    fn lookback_shortfall(&self, indicator: &str, declared: usize, required: usize);

    /// Default implementation ignores batch summaries.
    fn batch_completed(&self, _summary: &BatchSummary) {}
}
