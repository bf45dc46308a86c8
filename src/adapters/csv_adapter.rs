//! CSV file data adapter.
//!
//! Expected header: `timestamp,open,high,low,close,volume` (a `date` column is
//! accepted in place of `timestamp`; price columns may be omitted). Empty
//! cells and `NaN` become undefined samples. Rows are sorted by timestamp;
//! duplicate timestamps are rejected.

use crate::domain::error::QuantexprError;
use crate::domain::expr::Field;
use crate::domain::series::{Series, TimeSeriesFrame};
use crate::ports::data_port::DataPort;
use chrono::{NaiveDate, NaiveDateTime};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

const VALUE_FIELDS: [Field; 5] = [Field::Open, Field::High, Field::Low, Field::Close, Field::Volume];

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    /// `base_path` is either a single CSV file or a directory holding
    /// `{symbol}_{interval}.csv` files.
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, symbol: &str, interval: &str) -> PathBuf {
        if self.base_path.is_dir() {
            self.base_path.join(format!("{}_{}.csv", symbol, interval))
        } else {
            self.base_path.clone()
        }
    }
}

impl DataPort for CsvAdapter {
    fn fetch_frame(&self, symbol: &str, interval: &str) -> Result<TimeSeriesFrame, QuantexprError> {
        let path = self.csv_path(symbol, interval);
        let frame = read_frame_file(&path)?;
        tracing::debug!(path = %path.display(), rows = frame.len(), "loaded frame");
        Ok(frame)
    }
}

pub fn read_frame_file(path: &Path) -> Result<TimeSeriesFrame, QuantexprError> {
    let file = fs::File::open(path).map_err(|e| QuantexprError::Data {
        reason: format!("failed to read {}: {}", path.display(), e),
    })?;
    read_frame(file)
}

pub fn read_frame<R: Read>(reader: R) -> Result<TimeSeriesFrame, QuantexprError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = rdr.headers()?.clone();

    let position = |names: &[&str]| {
        headers
            .iter()
            .position(|h| names.iter().any(|n| h.eq_ignore_ascii_case(n)))
    };
    let ts_col = position(&["timestamp", "date"]).ok_or_else(|| QuantexprError::Data {
        reason: "missing timestamp column".into(),
    })?;
    let value_cols: Vec<(Field, usize)> = VALUE_FIELDS
        .iter()
        .filter_map(|&field| position(&[field.name()]).map(|i| (field, i)))
        .collect();

    let mut rows: Vec<(NaiveDateTime, Vec<Option<f64>>)> = Vec::new();
    for (line, result) in rdr.records().enumerate() {
        let record = result?;
        // header is line 1
        let line = line + 2;
        let raw_ts = record.get(ts_col).unwrap_or_default();
        let ts = parse_timestamp(raw_ts).ok_or_else(|| QuantexprError::Data {
            reason: format!("line {}: invalid timestamp '{}'", line, raw_ts),
        })?;
        let mut values = Vec::with_capacity(value_cols.len());
        for &(field, col) in &value_cols {
            let cell = record.get(col).unwrap_or_default();
            values.push(parse_value(cell).map_err(|_| QuantexprError::Data {
                reason: format!("line {}: invalid {} value '{}'", line, field, cell),
            })?);
        }
        rows.push((ts, values));
    }

    rows.sort_by_key(|(ts, _)| *ts);

    let timestamps: Vec<NaiveDateTime> = rows.iter().map(|(ts, _)| *ts).collect();
    let columns = value_cols
        .iter()
        .enumerate()
        .map(|(i, &(field, _))| {
            let values = rows.iter().map(|(_, v)| v[i]).collect();
            (field, Series::new(values))
        })
        .collect();

    TimeSeriesFrame::new(timestamps, columns).map_err(|e| QuantexprError::Data {
        reason: e.to_string(),
    })
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .or_else(|| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?.and_hms_opt(0, 0, 0))
}

fn parse_value(cell: &str) -> Result<Option<f64>, std::num::ParseFloatError> {
    if cell.is_empty() || cell.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    cell.parse::<f64>().map(|v| v.is_finite().then_some(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const BHP: &str = "timestamp,open,high,low,close,volume\n\
        2024-01-15,100.0,110.0,90.0,105.0,50000\n\
        2024-01-16,105.0,115.0,100.0,110.0,60000\n\
        2024-01-17,110.0,120.0,105.0,115.0,55000\n";

    #[test]
    fn reads_all_columns() {
        let frame = read_frame(BHP.as_bytes()).unwrap();
        assert_eq!(frame.len(), 3);
        assert_eq!(
            frame.timestamps()[0],
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap().and_hms_opt(0, 0, 0).unwrap()
        );
        assert_eq!(frame.column(Field::Open).unwrap().get(0), Some(100.0));
        assert_eq!(frame.column(Field::Close).unwrap().get(2), Some(115.0));
        assert_eq!(frame.column(Field::Volume).unwrap().get(1), Some(60000.0));
    }

    #[test]
    fn empty_and_nan_cells_are_undefined() {
        let csv = "timestamp,close\n2024-01-01,1.0\n2024-01-02,\n2024-01-03,NaN\n";
        let frame = read_frame(csv.as_bytes()).unwrap();
        assert_eq!(frame.column(Field::Close).unwrap().values(), &[Some(1.0), None, None]);
        assert!(frame.column(Field::Open).is_none());
    }

    #[test]
    fn intraday_timestamps_and_date_header() {
        let csv = "Date,Close\n2024-01-01 09:30:00,1\n2024-01-01 09:31:00,2\n";
        let frame = read_frame(csv.as_bytes()).unwrap();
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.column(Field::Close).unwrap().get(1), Some(2.0));
    }

    #[test]
    fn rows_are_sorted() {
        let csv = "timestamp,close\n2024-01-03,3\n2024-01-01,1\n2024-01-02,2\n";
        let frame = read_frame(csv.as_bytes()).unwrap();
        assert_eq!(frame.column(Field::Close).unwrap().values(), &[Some(1.0), Some(2.0), Some(3.0)]);
    }

    #[test]
    fn duplicate_timestamps_are_rejected() {
        let csv = "timestamp,close\n2024-01-01,1\n2024-01-01,2\n";
        let err = read_frame(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, QuantexprError::Data { ref reason } if reason.contains("strictly increasing")));
    }

    #[test]
    fn bad_cells_report_line_numbers() {
        let csv = "timestamp,close\n2024-01-01,1\n2024-01-02,abc\n";
        let err = read_frame(csv.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 3: invalid close value 'abc'"));

        let csv = "timestamp,close\n01/02/2024,1\n";
        let err = read_frame(csv.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 2: invalid timestamp"));
    }

    #[test]
    fn missing_timestamp_column_fails() {
        let err = read_frame("close\n1\n".as_bytes()).unwrap_err();
        assert!(matches!(err, QuantexprError::Data { .. }));
    }

    #[test]
    fn fetch_from_directory_and_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("BHP_1d.csv"), BHP).unwrap();

        let adapter = CsvAdapter::new(dir.path().to_path_buf());
        assert_eq!(adapter.fetch_frame("BHP", "1d").unwrap().len(), 3);
        assert!(adapter.fetch_frame("CBA", "1d").is_err());

        let adapter = CsvAdapter::new(dir.path().join("BHP_1d.csv"));
        assert_eq!(adapter.fetch_frame("ignored", "ignored").unwrap().len(), 3);
    }
}
