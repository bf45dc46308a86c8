//! Batch orchestration.
//!
//! A batch runs in five steps: reject duplicate names, parse and validate
//! each request, order the valid ones by dependency, then evaluate them in
//! that order through the shared cache. Per-indicator failures are collected
//! and reported alongside the successes. A dependency cycle or a misaligned
//! frame aborts the whole batch.

use crate::domain::cache::{CacheOutcome, FingerprintCache};
use crate::domain::definition::{IndicatorOutput, IndicatorRequest, IndicatorSpec};
use crate::domain::error::IndicatorError;
use crate::domain::evaluator::evaluate_in;
use crate::domain::fingerprint::Fingerprint;
use crate::domain::limits::EngineLimits;
use crate::domain::resolver::resolve;
use crate::domain::series::{DataIdentity, Series, TimeSeriesFrame};
use crate::ports::telemetry_port::TelemetryPort;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Counts for one finished batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub cache_joined: usize,
    pub elapsed: Duration,
}

/// Outcome of a batch that was not aborted.
#[derive(Debug, Clone)]
pub struct BatchResult {
    /// Request names in submission order.
    pub submitted: Vec<String>,
    /// Names in the order they were evaluated.
    pub evaluation_order: Vec<String>,
    pub outputs: BTreeMap<String, IndicatorOutput>,
    pub failures: BTreeMap<String, IndicatorError>,
    pub summary: BatchSummary,
}

impl BatchResult {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn series(&self, name: &str) -> Option<&Arc<Series>> {
        self.outputs.get(name).map(|o| &o.series)
    }

    /// Successful outputs in submission order.
    pub fn ordered_outputs(&self) -> impl Iterator<Item = (&str, &IndicatorOutput)> {
        self.submitted
            .iter()
            .filter_map(|name| self.outputs.get(name).map(|out| (name.as_str(), out)))
    }
}

pub struct IndicatorEngine {
    limits: EngineLimits,
    cache: Arc<FingerprintCache>,
    telemetry: Arc<dyn TelemetryPort>,
}

impl IndicatorEngine {
    pub fn new(
        limits: EngineLimits,
        cache: Arc<FingerprintCache>,
        telemetry: Arc<dyn TelemetryPort>,
    ) -> Self {
        Self {
            limits,
            cache,
            telemetry,
        }
    }

    /// Engine with a private cache sized from `limits`.
    pub fn with_limits(limits: EngineLimits, telemetry: Arc<dyn TelemetryPort>) -> Self {
        let cache = Arc::new(FingerprintCache::new(limits.cache_ttl, limits.cache_capacity));
        Self::new(limits, cache, telemetry)
    }

    pub fn limits(&self) -> &EngineLimits {
        &self.limits
    }

    pub fn cache(&self) -> &Arc<FingerprintCache> {
        &self.cache
    }

    /// Run one batch against `frame`. `identity` names the data window and
    /// becomes part of every fingerprint.
    pub fn run(
        &self,
        requests: &[IndicatorRequest],
        frame: &TimeSeriesFrame,
        identity: &DataIdentity,
    ) -> Result<BatchResult, IndicatorError> {
        let started = Instant::now();
        if let Err(err) = frame
            .check_alignment()
            .and_then(|()| frame.check_identity(identity))
        {
            tracing::error!(error = %err, "batch aborted");
            return Err(err);
        }

        let mut failures: BTreeMap<String, IndicatorError> = BTreeMap::new();
        let submitted: Vec<String> = requests.iter().map(|r| r.name.clone()).collect();
        let known: BTreeSet<String> = submitted.iter().cloned().collect();

        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for name in &submitted {
            *counts.entry(name.as_str()).or_default() += 1;
        }

        let mut specs = Vec::new();
        for request in requests {
            if counts.get(request.name.as_str()).copied().unwrap_or(0) > 1 {
                if !failures.contains_key(&request.name) {
                    let err = IndicatorError::DuplicateIndicator {
                        name: request.name.clone(),
                    };
                    self.fail(&mut failures, &request.name, err);
                }
                continue;
            }
            match IndicatorSpec::from_request(request, &known, &self.limits) {
                Ok(spec) => specs.push(spec),
                Err(err) => self.fail(&mut failures, &request.name, err),
            }
        }

        let ordered = match resolve(specs) {
            Ok(ordered) => ordered,
            Err(err) => {
                if let IndicatorError::CycleError { members } = &err {
                    let unique: BTreeSet<&String> = members.iter().collect();
                    for name in unique {
                        self.telemetry.error(name, err.kind());
                    }
                }
                tracing::error!(error = %err, "batch aborted");
                return Err(err);
            }
        };

        let mut view = frame.view();
        let mut outputs: BTreeMap<String, IndicatorOutput> = BTreeMap::new();
        let mut evaluation_order = Vec::with_capacity(ordered.len());
        let mut summary = BatchSummary {
            total: requests.len(),
            ..BatchSummary::default()
        };

        for spec in &ordered {
            evaluation_order.push(spec.name.clone());

            if let Some(dep) = spec.dependencies().iter().find(|d| !outputs.contains_key(*d)) {
                let err = IndicatorError::DependencyFailed {
                    dependency: dep.clone(),
                };
                self.fail(&mut failures, &spec.name, err);
                continue;
            }

            let required = spec
                .expression
                .lookback(&|dep| outputs.get(dep).map(|o| o.required_lookback).unwrap_or(0));
            let dependencies: BTreeMap<String, Fingerprint> = spec
                .dependencies()
                .iter()
                .filter_map(|d| outputs.get(d).map(|o| (d.clone(), o.fingerprint)))
                .collect();
            let fingerprint = Fingerprint::compute(
                spec.expression.canonical(),
                &spec.parameters,
                &dependencies,
                identity,
            );

            let timer = Instant::now();
            let (result, outcome) = self
                .cache
                .get_or_compute(fingerprint, || evaluate_in(&spec.expression, &view));
            let elapsed = timer.elapsed();
            self.telemetry.cache_lookup(&spec.name, outcome);
            self.telemetry.evaluation_latency(&spec.name, elapsed);
            match outcome {
                CacheOutcome::Hit => summary.cache_hits += 1,
                CacheOutcome::Miss => summary.cache_misses += 1,
                CacheOutcome::Joined => summary.cache_joined += 1,
            }

            let series = match result {
                Ok(series) => series,
                Err(err) => {
                    self.fail(&mut failures, &spec.name, err);
                    continue;
                }
            };
            if let Err(err) = view.insert(&spec.name, Arc::clone(&series)) {
                self.cache.invalidate(&fingerprint);
                self.fail(&mut failures, &spec.name, err);
                continue;
            }

            let shortfall = spec
                .lookback
                .map(|declared| required.saturating_sub(declared))
                .unwrap_or(0);
            if let Some(declared) = spec.lookback.filter(|_| shortfall > 0) {
                tracing::warn!(
                    indicator = %spec.name,
                    declared,
                    required,
                    "declared lookback is shorter than the expression needs"
                );
                self.telemetry.lookback_shortfall(&spec.name, declared, required);
            }

            tracing::debug!(
                indicator = %spec.name,
                fingerprint = %fingerprint.short(),
                cache = %outcome,
                elapsed_us = elapsed.as_micros() as u64,
                "indicator evaluated"
            );
            outputs.insert(
                spec.name.clone(),
                IndicatorOutput {
                    first_valid: series.first_valid(),
                    series,
                    fingerprint,
                    cache: outcome,
                    required_lookback: required,
                    declared_lookback: spec.lookback,
                    lookback_shortfall: shortfall,
                },
            );
        }

        summary.succeeded = outputs.len();
        summary.failed = failures.len();
        summary.elapsed = started.elapsed();
        tracing::info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            cache_hits = summary.cache_hits,
            cache_misses = summary.cache_misses,
            "batch complete"
        );
        self.telemetry.batch_completed(&summary);

        Ok(BatchResult {
            submitted,
            evaluation_order,
            outputs,
            failures,
            summary,
        })
    }

    fn fail(&self, failures: &mut BTreeMap<String, IndicatorError>, name: &str, err: IndicatorError) {
        if err.is_internal() {
            tracing::error!(indicator = %name, error = %err, "indicator failed");
        } else {
            tracing::warn!(indicator = %name, error = %err, "indicator failed");
        }
        self.telemetry.error(name, err.kind());
        failures.insert(name.to_string(), err);
    }
}
