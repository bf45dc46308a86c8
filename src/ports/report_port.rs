//! Report output port trait.

use crate::domain::engine::BatchResult;
use crate::domain::error::QuantexprError;
use crate::domain::series::TimeSeriesFrame;
use std::io::Write;

/// Port for writing computed indicator columns.
pub trait ReportPort {
    fn write(
        &self,
        frame: &TimeSeriesFrame,
        result: &BatchResult,
        out: &mut dyn Write,
    ) -> Result<(), QuantexprError>;
}
