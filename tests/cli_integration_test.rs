//! CLI integration tests.
//!
//! Tests cover:
//! - Argument parsing for each subcommand
//! - Data source resolution from config
//! - Full eval pipeline with INI and CSV files on disk
//! - Single-expression checks

mod common;

use clap::Parser;
use common::*;
use quantexpr::adapters::file_config_adapter::FileConfigAdapter;
use quantexpr::adapters::fanout_telemetry::NoopTelemetry;
use quantexpr::adapters::prometheus_telemetry::PrometheusTelemetry;
use quantexpr::cli::{self, Cli, Command};
use quantexpr::domain::cache::CacheOutcome;
use quantexpr::domain::error::{IndicatorError, QuantexprError};
use quantexpr::domain::limits::EngineLimits;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    path
}

fn config_for(data_path: &Path, indicators: &str) -> String {
    format!(
        "[data]\npath = {}\nsymbol = BHP\ninterval = 1d\n\n[engine]\ncache_ttl_secs = 60\n\n{}",
        data_path.display(),
        indicators
    )
}

mod args {
    use super::*;

    #[test]
    fn eval_arguments() {
        let cli = Cli::try_parse_from([
            "quantexpr", "eval", "--config", "a.ini", "--data", "prices.csv", "-o", "out.csv", "-v",
            "--metrics", "metrics.prom",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Command::Eval {
                config,
                data,
                output,
                metrics,
            } => {
                assert_eq!(config, PathBuf::from("a.ini"));
                assert_eq!(data, Some(PathBuf::from("prices.csv")));
                assert_eq!(output, Some(PathBuf::from("out.csv")));
                assert_eq!(metrics, Some(PathBuf::from("metrics.prom")));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn check_arguments() {
        let cli = Cli::try_parse_from([
            "quantexpr", "check", "fast - slow", "--known", "fast,slow", "-p", "n=3",
        ])
        .unwrap();
        match cli.command {
            Command::Check {
                expression,
                known,
                param,
            } => {
                assert_eq!(expression, "fast - slow");
                assert_eq!(known, vec!["fast", "slow"]);
                assert_eq!(param, vec!["n=3"]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn eval_requires_config() {
        assert!(Cli::try_parse_from(["quantexpr", "eval"]).is_err());
    }
}

mod data_source {
    use super::*;

    #[test]
    fn defaults_from_path() {
        let config = FileConfigAdapter::from_string("[data]\npath = /tmp/prices/BHP.csv\n").unwrap();
        let source = cli::build_data_source(&config, None).unwrap();
        assert_eq!(source.path, PathBuf::from("/tmp/prices/BHP.csv"));
        assert_eq!(source.symbol, "BHP");
        assert_eq!(source.interval, "1d");
    }

    #[test]
    fn override_skips_data_section() {
        let config = FileConfigAdapter::from_string("[engine]\n").unwrap();
        let source = cli::build_data_source(&config, Some(Path::new("x/CBA.csv"))).unwrap();
        assert_eq!(source.symbol, "CBA");
    }

    #[test]
    fn missing_path_is_a_config_error() {
        let config = FileConfigAdapter::from_string("[data]\nsymbol = BHP\n").unwrap();
        let err = cli::build_data_source(&config, None).unwrap_err();
        assert!(matches!(err, QuantexprError::ConfigMissing { .. }));
    }
}

mod eval_pipeline {
    use super::*;

    #[test]
    fn writes_report_for_config_on_disk() {
        let dir = TempDir::new().unwrap();
        let data = write_file(&dir, "bhp.csv", &csv_text(&[10.0, 12.0, 14.0, 16.0, 18.0]));
        let ini = write_file(
            &dir,
            "batch.ini",
            &config_for(
                &data,
                "[batch]\nindicators = sma, spread\n\n\
                 [indicator.sma]\nexpression = rolling_mean(close, window=n)\nparams = n=3\n\n\
                 [indicator.spread]\nexpression = close - sma\n",
            ),
        );

        let config = cli::load_config(&ini).unwrap();
        let telemetry = Arc::new(PrometheusTelemetry::new().unwrap());
        let mut out = Vec::new();
        let (requests, result) =
            cli::evaluate_config(&config, None, telemetry.clone(), &mut out).unwrap();

        assert_eq!(requests.len(), 2);
        assert!(result.is_success());
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "timestamp,sma,spread");
        assert_eq!(lines[1], "2024-01-01,,");
        assert_eq!(lines[3], "2024-01-03,12,2");
        assert_eq!(lines.len(), 6);
        assert_eq!(telemetry.cache_lookups(CacheOutcome::Miss), 2);
        assert_eq!(telemetry.evaluations("sma").0, 1);
        assert_eq!(telemetry.batches_total.get(), 1);
    }

    #[test]
    fn eval_command_writes_report_and_metrics() {
        let dir = TempDir::new().unwrap();
        let data = write_file(&dir, "bhp.csv", &csv_text(&[1.0, 2.0, 3.0]));
        let ini = write_file(
            &dir,
            "batch.ini",
            &config_for(&data, "[indicator.a]\nexpression = close * 2\n\n[indicator.b]\nexpression = a + 1\n"),
        );
        let report = dir.path().join("report.csv");
        let metrics = dir.path().join("metrics.prom");
        let cli = Cli::try_parse_from([
            "quantexpr",
            "eval",
            "--config",
            ini.to_str().unwrap(),
            "-o",
            report.to_str().unwrap(),
            "--metrics",
            metrics.to_str().unwrap(),
        ])
        .unwrap();

        assert_eq!(cli::run(cli), std::process::ExitCode::SUCCESS);
        let report = std::fs::read_to_string(&report).unwrap();
        assert!(report.starts_with("timestamp,a,b\n"));
        let text = std::fs::read_to_string(&metrics).unwrap();
        assert!(text.contains("quantexpr_cache_lookups_total{outcome=\"miss\"} 2"));
        assert!(text.contains("quantexpr_evaluation_seconds_count{indicator=\"b\"} 1"));
        assert!(text.contains("quantexpr_batches_total 1"));
    }

    #[test]
    fn indicator_failures_do_not_fail_the_pipeline() {
        let dir = TempDir::new().unwrap();
        let data = write_file(&dir, "bhp.csv", &csv_text(&[1.0, 2.0, 3.0]));
        let ini = write_file(
            &dir,
            "batch.ini",
            &config_for(
                &data,
                "[indicator.good]\nexpression = close * 2\n\n[indicator.broken]\nexpression = close +\n",
            ),
        );
        let config = cli::load_config(&ini).unwrap();
        let mut out = Vec::new();
        let (_, result) =
            cli::evaluate_config(&config, None, Arc::new(NoopTelemetry), &mut out).unwrap();
        assert_eq!(result.summary.failed, 1);
        assert!(matches!(result.failures["broken"], IndicatorError::Syntax(_)));
        assert!(String::from_utf8(out).unwrap().starts_with("timestamp,good\n"));
    }

    #[test]
    fn cycle_aborts_the_pipeline() {
        let dir = TempDir::new().unwrap();
        let data = write_file(&dir, "bhp.csv", &csv_text(&[1.0, 2.0]));
        let ini = write_file(
            &dir,
            "batch.ini",
            &config_for(&data, "[indicator.a]\nexpression = b\n\n[indicator.b]\nexpression = a\n"),
        );
        let config = cli::load_config(&ini).unwrap();
        let err = cli::evaluate_config(&config, None, Arc::new(NoopTelemetry), &mut Vec::<u8>::new())
            .unwrap_err();
        assert!(matches!(
            err,
            QuantexprError::Indicator(IndicatorError::CycleError { .. })
        ));
    }

    #[test]
    fn missing_data_file_is_a_data_error() {
        let dir = TempDir::new().unwrap();
        let ini = write_file(
            &dir,
            "batch.ini",
            &config_for(&dir.path().join("nope.csv"), "[indicator.a]\nexpression = close\n"),
        );
        let config = cli::load_config(&ini).unwrap();
        let err = cli::evaluate_config(&config, None, Arc::new(NoopTelemetry), &mut Vec::<u8>::new())
            .unwrap_err();
        assert!(matches!(err, QuantexprError::Data { .. }));
    }

    #[test]
    fn bad_engine_section_is_rejected() {
        let dir = TempDir::new().unwrap();
        let ini = write_file(
            &dir,
            "batch.ini",
            "[engine]\nmax_depth = 999\n\n[indicator.a]\nexpression = close\n",
        );
        let config = cli::load_config(&ini).unwrap();
        let err = cli::evaluate_config(&config, None, Arc::new(NoopTelemetry), &mut Vec::<u8>::new())
            .unwrap_err();
        assert!(matches!(err, QuantexprError::ConfigInvalid { .. }));
    }

    #[test]
    fn missing_config_file_fails_to_load() {
        assert!(cli::load_config(Path::new("/nonexistent/batch.ini")).is_err());
    }
}

mod check {
    use super::*;

    #[test]
    fn reports_canonical_form() {
        let spec = cli::check_expression(
            "rolling_mean(close, window=n) + 1",
            &[],
            &["n=5".to_string()],
            &EngineLimits::default(),
        )
        .unwrap();
        assert_eq!(spec.expression.lookback(&|_: &str| 0), 4);
        assert!(spec.expression.references().is_empty());
    }

    #[test]
    fn known_names_become_references() {
        let spec = cli::check_expression(
            "fast - slow",
            &["fast".to_string(), "slow".to_string()],
            &[],
            &EngineLimits::default(),
        )
        .unwrap();
        assert_eq!(spec.expression.references().len(), 2);
    }

    #[test]
    fn errors_surface_as_indicator_errors() {
        let limits = EngineLimits::default();
        let err = cli::check_expression("fast - 1", &[], &[], &limits).unwrap_err();
        assert!(matches!(
            err,
            QuantexprError::Indicator(IndicatorError::UnknownReference { .. })
        ));
        let err = cli::check_expression("close", &[], &["n".to_string()], &limits).unwrap_err();
        assert!(matches!(err, QuantexprError::ConfigInvalid { .. }));
    }
}
