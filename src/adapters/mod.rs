//! Concrete adapter implementations for ports.

pub mod csv_adapter;
pub mod csv_report_adapter;
pub mod fanout_telemetry;
pub mod file_config_adapter;
pub mod prometheus_telemetry;
pub mod tracing_telemetry;
