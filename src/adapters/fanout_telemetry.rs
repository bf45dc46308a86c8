//! In-process telemetry sinks: a no-op sink and a fan-out that forwards to
//! several sinks.

use crate::domain::cache::CacheOutcome;
use crate::domain::engine::BatchSummary;
use crate::domain::error::ErrorKind;
use crate::ports::telemetry_port::TelemetryPort;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetryPort for NoopTelemetry {
    fn cache_lookup(&self, _indicator: &str, _outcome: CacheOutcome) {}
    fn evaluation_latency(&self, _indicator: &str, _elapsed: Duration) {}
    fn error(&self, _indicator: &str, _kind: ErrorKind) {}
    fn lookback_shortfall(&self, _indicator: &str, _declared: usize, _required: usize) {}
}

/// Forwards every event to each sink in order.
#[derive(Default, Clone)]
pub struct FanoutTelemetry {
    sinks: Vec<Arc<dyn TelemetryPort>>,
}

impl FanoutTelemetry {
    pub fn new(sinks: Vec<Arc<dyn TelemetryPort>>) -> Self {
        Self { sinks }
    }
}

impl TelemetryPort for FanoutTelemetry {
    fn cache_lookup(&self, indicator: &str, outcome: CacheOutcome) {
        self.sinks.iter().for_each(|s| s.cache_lookup(indicator, outcome));
    }

    fn evaluation_latency(&self, indicator: &str, elapsed: Duration) {
        self.sinks.iter().for_each(|s| s.evaluation_latency(indicator, elapsed));
    }

    fn error(&self, indicator: &str, kind: ErrorKind) {
        self.sinks.iter().for_each(|s| s.error(indicator, kind));
    }

    fn lookback_shortfall(&self, indicator: &str, declared: usize, required: usize) {
        self.sinks
            .iter()
            .for_each(|s| s.lookback_shortfall(indicator, declared, required));
    }

    fn batch_completed(&self, summary: &BatchSummary) {
        self.sinks.iter().for_each(|s| s.batch_completed(summary));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::prometheus_telemetry::PrometheusTelemetry;

    #[test]
    fn fanout_reaches_every_sink() {
        let a = Arc::new(PrometheusTelemetry::new().unwrap());
        let b = Arc::new(PrometheusTelemetry::new().unwrap());
        let sinks: Vec<Arc<dyn TelemetryPort>> = vec![a.clone(), b.clone(), Arc::new(NoopTelemetry)];
        let fan = FanoutTelemetry::new(sinks);
        fan.cache_lookup("x", CacheOutcome::Miss);
        fan.error("x", ErrorKind::Syntax);
        fan.lookback_shortfall("x", 1, 3);
        fan.batch_completed(&BatchSummary::default());
        for sink in [&a, &b] {
            assert_eq!(sink.cache_lookups(CacheOutcome::Miss), 1);
            assert_eq!(sink.error_count(), 1);
            assert_eq!(sink.shortfalls("x"), 1);
            assert_eq!(sink.batches_total.get(), 1);
        }
    }

    #[test]
    fn empty_fanout_accepts_events() {
        let fan = FanoutTelemetry::default();
        fan.cache_lookup("x", CacheOutcome::Hit);
        fan.evaluation_latency("x", Duration::from_millis(1));
    }
}
