//! CSV report adapter implementing ReportPort.
//!
//! One row per frame timestamp, one column per successful indicator in
//! submission order. Undefined samples are written as empty cells.

use crate::domain::engine::BatchResult;
use crate::domain::error::QuantexprError;
use crate::domain::series::TimeSeriesFrame;
use crate::ports::report_port::ReportPort;
use chrono::{NaiveDateTime, NaiveTime};
use std::io::Write;

#[derive(Debug, Default)]
pub struct CsvReportAdapter;

impl CsvReportAdapter {
    pub fn new() -> Self {
        Self
    }
}

fn timestamp_format(frame: &TimeSeriesFrame) -> &'static str {
    let daily = frame
        .timestamps()
        .iter()
        .all(|ts| ts.time() == NaiveTime::MIN);
    if daily { "%Y-%m-%d" } else { "%Y-%m-%d %H:%M:%S" }
}

fn format_timestamp(ts: &NaiveDateTime, format: &str) -> String {
    ts.format(format).to_string()
}

impl ReportPort for CsvReportAdapter {
    fn write(
        &self,
        frame: &TimeSeriesFrame,
        result: &BatchResult,
        out: &mut dyn Write,
    ) -> Result<(), QuantexprError> {
        let columns: Vec<_> = result.ordered_outputs().collect();
        let mut writer = csv::Writer::from_writer(out);

        let mut header = vec!["timestamp"];
        header.extend(columns.iter().map(|(name, _)| *name));
        writer.write_record(&header)?;

        let format = timestamp_format(frame);
        for (row, ts) in frame.timestamps().iter().enumerate() {
            let mut record = Vec::with_capacity(columns.len() + 1);
            record.push(format_timestamp(ts, format));
            for (_, output) in &columns {
                record.push(output.series.get(row).map(|v| v.to_string()).unwrap_or_default());
            }
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }
}
