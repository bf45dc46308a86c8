//! Aligned time-series columns.
//!
//! - `Series`: one column of optional values; `None` is the undefined marker
//! - `TimeSeriesFrame`: strictly increasing timestamps plus the base OHLCV columns
//! - `FrameView`: a frame plus indicator columns computed during one batch
//! - `DataIdentity`: identity token of the source window, folded into fingerprints

use crate::domain::error::IndicatorError;
use crate::domain::expr::Field;
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Numeric column where `None` marks an undefined sample.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Series {
    values: Vec<Option<f64>>,
}

impl Series {
    /// Non-finite results are stored as undefined.
    pub fn new(values: Vec<Option<f64>>) -> Self {
        Self {
            values: values.into_iter().map(|v| v.and_then(defined)).collect(),
        }
    }

    /// Plain floats, with NaN and infinities mapped to undefined.
    pub fn from_f64(values: &[f64]) -> Self {
        Self {
            values: values.iter().map(|&v| defined(v)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied().flatten()
    }

    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Option<f64>> {
        self.values
    }

    /// Index of the first defined sample.
    pub fn first_valid(&self) -> Option<usize> {
        self.values.iter().position(Option::is_some)
    }

    pub fn defined_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    /// Bitwise equality, distinguishing e.g. `0.0` from `-0.0`.
    pub fn bit_identical(&self, other: &Series) -> bool {
        self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .zip(&other.values)
                .all(|(a, b)| a.map(f64::to_bits) == b.map(f64::to_bits))
    }
}

impl From<Vec<Option<f64>>> for Series {
    fn from(values: Vec<Option<f64>>) -> Self {
        Series::new(values)
    }
}

/// `Some(v)` for finite `v`, otherwise the undefined marker.
pub fn defined(value: f64) -> Option<f64> {
    if value.is_finite() { Some(value) } else { None }
}

/// Timestamps plus aligned base columns.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimeSeriesFrame {
    timestamps: Vec<NaiveDateTime>,
    columns: BTreeMap<Field, Arc<Series>>,
}

impl TimeSeriesFrame {
    /// Build a frame, rejecting non-increasing timestamps and columns whose
    /// length differs from the timestamp column.
    pub fn new(
        timestamps: Vec<NaiveDateTime>,
        columns: Vec<(Field, Series)>,
    ) -> Result<Self, IndicatorError> {
        let mut map = BTreeMap::new();
        for (field, series) in columns {
            if field == Field::Timestamp {
                return Err(IndicatorError::MisalignedFrame {
                    reason: "timestamp column is derived from the frame index".to_string(),
                });
            }
            map.insert(field, Arc::new(series));
        }
        let frame = Self {
            timestamps,
            columns: map,
        };
        frame.check_alignment()?;
        Ok(frame)
    }

    /// Verify the frame invariants. Frames built through [`TimeSeriesFrame::new`]
    /// always pass; deserialized frames may not.
    pub fn check_alignment(&self) -> Result<(), IndicatorError> {
        if let Some(i) = self
            .timestamps
            .windows(2)
            .position(|pair| pair[1] <= pair[0])
        {
            return Err(IndicatorError::MisalignedFrame {
                reason: format!(
                    "timestamps not strictly increasing at row {}: {} then {}",
                    i + 1,
                    self.timestamps[i],
                    self.timestamps[i + 1]
                ),
            });
        }
        for (field, series) in &self.columns {
            if series.len() != self.timestamps.len() {
                return Err(IndicatorError::MisalignedFrame {
                    reason: format!(
                        "column '{}' has {} rows, frame has {}",
                        field,
                        series.len(),
                        self.timestamps.len()
                    ),
                });
            }
        }
        Ok(())
    }

    /// Checks that `identity` describes this frame's rows and time range.
    pub fn check_identity(&self, identity: &DataIdentity) -> Result<(), IndicatorError> {
        if identity.rows != self.len() {
            return Err(IndicatorError::MisalignedFrame {
                reason: format!(
                    "data identity {} has {} rows, frame has {}",
                    identity,
                    identity.rows,
                    self.len()
                ),
            });
        }
        if identity.start != self.timestamps.first().copied()
            || identity.end != self.timestamps.last().copied()
        {
            return Err(IndicatorError::MisalignedFrame {
                reason: format!("data identity {} does not cover the frame's time range", identity),
            });
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[NaiveDateTime] {
        &self.timestamps
    }

    /// Base column, or the timestamp column as seconds since the epoch.
    pub fn column(&self, field: Field) -> Option<Arc<Series>> {
        match field {
            Field::Timestamp => Some(Arc::new(Series::new(
                self.timestamps
                    .iter()
                    .map(|ts| Some(ts.and_utc().timestamp() as f64))
                    .collect(),
            ))),
            other => self.columns.get(&other).cloned(),
        }
    }

    pub fn identity(&self, symbol: &str, interval: &str) -> DataIdentity {
        DataIdentity {
            symbol: symbol.to_string(),
            interval: interval.to_string(),
            start: self.timestamps.first().copied(),
            end: self.timestamps.last().copied(),
            rows: self.timestamps.len(),
        }
    }

    /// A view for one batch; the frame itself is never modified.
    pub fn view(&self) -> FrameView<'_> {
        FrameView {
            frame: self,
            derived: BTreeMap::new(),
        }
    }
}

/// Base frame plus indicator columns computed so far in a batch.
#[derive(Debug, Clone)]
pub struct FrameView<'a> {
    frame: &'a TimeSeriesFrame,
    derived: BTreeMap<String, Arc<Series>>,
}

impl<'a> FrameView<'a> {
    pub fn len(&self) -> usize {
        self.frame.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.is_empty()
    }

    pub fn field(&self, field: Field) -> Option<Arc<Series>> {
        self.frame.column(field)
    }

    pub fn indicator(&self, name: &str) -> Option<Arc<Series>> {
        self.derived.get(name).cloned()
    }

    /// Append an indicator column. Length must match the frame.
    pub fn insert(&mut self, name: &str, series: Arc<Series>) -> Result<(), IndicatorError> {
        if series.len() != self.frame.len() {
            return Err(IndicatorError::MisalignedFrame {
                reason: format!(
                    "indicator '{}' has {} rows, frame has {}",
                    name,
                    series.len(),
                    self.frame.len()
                ),
            });
        }
        self.derived.insert(name.to_string(), series);
        Ok(())
    }
}

/// Identity of the data window a frame was fetched for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DataIdentity {
    pub symbol: String,
    pub interval: String,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    pub rows: usize,
}

impl fmt::Display for DataIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ts = |t: &Option<NaiveDateTime>| {
            t.map(|t| t.format("%Y-%m-%dT%H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string())
        };
        write!(
            f,
            "{}|{}|{}|{}|{}",
            self.symbol,
            self.interval,
            ts(&self.start),
            ts(&self.end),
            self.rows
        )
    }
}
