//! Prometheus metrics for the indicator engine.
//!
//! All metrics use the `quantexpr_` prefix. The CLI reads its batch summary
//! back from these counters and can dump the registry in text format.

use crate::domain::cache::CacheOutcome;
use crate::domain::engine::BatchSummary;
use crate::domain::error::ErrorKind;
use crate::ports::telemetry_port::TelemetryPort;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;
use std::time::Duration;

const OUTCOMES: [CacheOutcome; 3] = [CacheOutcome::Hit, CacheOutcome::Miss, CacheOutcome::Joined];

#[derive(Clone)]
pub struct PrometheusTelemetry {
    registry: Arc<Registry>,
    /// Cache lookups by outcome (hit, miss, joined)
    pub cache_lookups_total: IntCounterVec,
    /// Indicator failures by error kind
    pub indicator_errors_total: IntCounterVec,
    /// Evaluation latency per indicator, cache lookups included
    pub evaluation_seconds: HistogramVec,
    /// Indicators whose declared lookback was too short
    pub lookback_shortfalls_total: IntCounterVec,
    pub batches_total: IntCounter,
}

impl PrometheusTelemetry {
    /// Create the metrics on a fresh registry.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let cache_lookups_total = IntCounterVec::new(
            Opts::new("quantexpr_cache_lookups_total", "Fingerprint cache lookups by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(cache_lookups_total.clone()))?;

        let indicator_errors_total = IntCounterVec::new(
            Opts::new("quantexpr_indicator_errors_total", "Indicator failures by error kind"),
            &["kind"],
        )?;
        registry.register(Box::new(indicator_errors_total.clone()))?;

        let evaluation_seconds = HistogramVec::new(
            HistogramOpts::new(
                "quantexpr_evaluation_seconds",
                "Indicator evaluation latency in seconds",
            )
            .buckets(vec![
                0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0,
            ]),
            &["indicator"],
        )?;
        registry.register(Box::new(evaluation_seconds.clone()))?;

        let lookback_shortfalls_total = IntCounterVec::new(
            Opts::new(
                "quantexpr_lookback_shortfalls_total",
                "Indicators whose declared lookback is shorter than required",
            ),
            &["indicator"],
        )?;
        registry.register(Box::new(lookback_shortfalls_total.clone()))?;

        let batches_total = IntCounter::with_opts(Opts::new(
            "quantexpr_batches_total",
            "Completed batches",
        ))?;
        registry.register(Box::new(batches_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            cache_lookups_total,
            indicator_errors_total,
            evaluation_seconds,
            lookback_shortfalls_total,
            batches_total,
        })
    }

    /// Render all metrics in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }

    pub fn cache_lookups(&self, outcome: CacheOutcome) -> u64 {
        self.cache_lookups_total
            .with_label_values(&[outcome.to_string().as_str()])
            .get()
    }

    /// Lookup counts in hit, miss, joined order.
    pub fn cache_outcomes(&self) -> [u64; 3] {
        OUTCOMES.map(|outcome| self.cache_lookups(outcome))
    }

    pub fn errors(&self, kind: ErrorKind) -> u64 {
        self.indicator_errors_total
            .with_label_values(&[kind.to_string().as_str()])
            .get()
    }

    pub fn error_count(&self) -> u64 {
        ErrorKind::ALL.iter().map(|&kind| self.errors(kind)).sum()
    }

    /// Evaluations observed for `indicator` and their summed latency.
    pub fn evaluations(&self, indicator: &str) -> (u64, Duration) {
        let histogram = self.evaluation_seconds.with_label_values(&[indicator]);
        (
            histogram.get_sample_count(),
            Duration::from_secs_f64(histogram.get_sample_sum().max(0.0)),
        )
    }

    pub fn shortfalls(&self, indicator: &str) -> u64 {
        self.lookback_shortfalls_total
            .with_label_values(&[indicator])
            .get()
    }
}

impl TelemetryPort for PrometheusTelemetry {
    fn cache_lookup(&self, _indicator: &str, outcome: CacheOutcome) {
        self.cache_lookups_total
            .with_label_values(&[outcome.to_string().as_str()])
            .inc();
    }

    fn evaluation_latency(&self, indicator: &str, elapsed: Duration) {
        self.evaluation_seconds
            .with_label_values(&[indicator])
            .observe(elapsed.as_secs_f64());
    }

    fn error(&self, _indicator: &str, kind: ErrorKind) {
        self.indicator_errors_total
            .with_label_values(&[kind.to_string().as_str()])
            .inc();
    }

    fn lookback_shortfall(&self, indicator: &str, _declared: usize, _required: usize) {
        self.lookback_shortfalls_total
            .with_label_values(&[indicator])
            .inc();
    }

    fn batch_completed(&self, _summary: &BatchSummary) {
        self.batches_total.inc();
    }
}
