//! Data access port trait.

use crate::domain::error::QuantexprError;
use crate::domain::series::TimeSeriesFrame;

/// Supplies complete frames before evaluation starts.
pub trait DataPort {
    fn fetch_frame(&self, symbol: &str, interval: &str) -> Result<TimeSeriesFrame, QuantexprError>;
}
