#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use quantexpr::domain::cache::CacheOutcome;
use quantexpr::domain::engine::BatchSummary;
use quantexpr::domain::error::{ErrorKind, QuantexprError};
use quantexpr::domain::expr::Field;
use quantexpr::domain::series::{Series, TimeSeriesFrame};
use quantexpr::ports::data_port::DataPort;
use quantexpr::ports::telemetry_port::TelemetryPort;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub struct MockDataPort {
    pub frames: HashMap<String, TimeSeriesFrame>,
    pub errors: HashMap<String, String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            frames: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_frame(mut self, symbol: &str, frame: TimeSeriesFrame) -> Self {
        self.frames.insert(symbol.to_string(), frame);
        self
    }

    pub fn with_error(mut self, symbol: &str, reason: &str) -> Self {
        self.errors.insert(symbol.to_string(), reason.to_string());
        self
    }
}

impl DataPort for MockDataPort {
    fn fetch_frame(&self, symbol: &str, _interval: &str) -> Result<TimeSeriesFrame, QuantexprError> {
        if let Some(reason) = self.errors.get(symbol) {
            return Err(QuantexprError::Data {
                reason: reason.clone(),
            });
        }
        self.frames
            .get(symbol)
            .cloned()
            .ok_or_else(|| QuantexprError::Data {
                reason: format!("no data for {}", symbol),
            })
    }
}

pub fn day(n: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        + chrono::Duration::days(n as i64)
}

/// Daily frame with the given closes; open/high/low are derived from close.
pub fn make_frame(closes: &[f64]) -> TimeSeriesFrame {
    let timestamps = (0..closes.len() as u32).map(day).collect();
    TimeSeriesFrame::new(
        timestamps,
        vec![
            (Field::Open, Series::from_f64(&closes.iter().map(|c| c - 1.0).collect::<Vec<_>>())),
            (Field::High, Series::from_f64(&closes.iter().map(|c| c + 1.0).collect::<Vec<_>>())),
            (Field::Low, Series::from_f64(&closes.iter().map(|c| c - 2.0).collect::<Vec<_>>())),
            (Field::Close, Series::from_f64(closes)),
            (Field::Volume, Series::from_f64(&vec![1000.0; closes.len()])),
        ],
    )
    .unwrap()
}

pub fn close_frame(closes: &[Option<f64>]) -> TimeSeriesFrame {
    let timestamps = (0..closes.len() as u32).map(day).collect();
    TimeSeriesFrame::new(timestamps, vec![(Field::Close, Series::new(closes.to_vec()))]).unwrap()
}

pub fn csv_text(closes: &[f64]) -> String {
    let mut out = String::from("timestamp,open,high,low,close,volume\n");
    for (i, c) in closes.iter().enumerate() {
        out.push_str(&format!(
            "{},{},{},{},{},1000\n",
            day(i as u32).format("%Y-%m-%d"),
            c - 1.0,
            c + 1.0,
            c - 2.0,
            c
        ));
    }
    out
}

/// Point-in-time copy of the recorded telemetry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub cache_joined: usize,
    pub evaluations: usize,
    pub errors: BTreeMap<ErrorKind, usize>,
    /// Indicator name to (declared, required) lookback.
    pub shortfalls: BTreeMap<String, (usize, usize)>,
    pub batches: usize,
}

impl TelemetrySnapshot {
    pub fn error_count(&self) -> usize {
        self.errors.values().sum()
    }
}

/// Telemetry sink that keeps every event in memory for assertions.
#[derive(Debug, Default)]
pub struct MemoryTelemetry {
    hits: AtomicUsize,
    misses: AtomicUsize,
    joined: AtomicUsize,
    evaluations: AtomicUsize,
    batches: AtomicUsize,
    errors: Mutex<BTreeMap<ErrorKind, usize>>,
    shortfalls: Mutex<BTreeMap<String, (usize, usize)>>,
}

impl MemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            cache_hits: self.hits.load(Ordering::Relaxed),
            cache_misses: self.misses.load(Ordering::Relaxed),
            cache_joined: self.joined.load(Ordering::Relaxed),
            evaluations: self.evaluations.load(Ordering::Relaxed),
            errors: self.errors.lock().unwrap().clone(),
            shortfalls: self.shortfalls.lock().unwrap().clone(),
            batches: self.batches.load(Ordering::Relaxed),
        }
    }
}

impl TelemetryPort for MemoryTelemetry {
    fn cache_lookup(&self, _indicator: &str, outcome: CacheOutcome) {
        let counter = match outcome {
            CacheOutcome::Hit => &self.hits,
            CacheOutcome::Miss => &self.misses,
            CacheOutcome::Joined => &self.joined,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn evaluation_latency(&self, _indicator: &str, _elapsed: Duration) {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
    }

    fn error(&self, _indicator: &str, kind: ErrorKind) {
        *self.errors.lock().unwrap().entry(kind).or_default() += 1;
    }

    fn lookback_shortfall(&self, indicator: &str, declared: usize, required: usize) {
        self.shortfalls
            .lock()
            .unwrap()
            .insert(indicator.to_string(), (declared, required));
    }

    fn batch_completed(&self, _summary: &BatchSummary) {
        self.batches.fetch_add(1, Ordering::Relaxed);
    }
}
