//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::csv_report_adapter::CsvReportAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::fanout_telemetry::FanoutTelemetry;
use crate::adapters::prometheus_telemetry::PrometheusTelemetry;
use crate::adapters::tracing_telemetry::TracingTelemetry;
use crate::domain::config_validation::{
    build_engine_limits, build_requests, parse_params, validate_data_config,
};
use crate::domain::definition::{IndicatorRequest, IndicatorSpec};
use crate::domain::engine::{BatchResult, IndicatorEngine};
use crate::domain::error::{IndicatorError, QuantexprError};
use crate::domain::functions::FUNCTIONS;
use crate::domain::limits::EngineLimits;
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;
use crate::ports::report_port::ReportPort;
use crate::ports::telemetry_port::TelemetryPort;

#[derive(Parser, Debug)]
#[command(name = "quantexpr", about = "Custom indicator expression engine")]
pub struct Cli {
    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Evaluate the indicators in a config file against a CSV frame
    Eval {
        #[arg(short, long)]
        config: PathBuf,
        /// Overrides `[data] path`
        #[arg(short, long)]
        data: Option<PathBuf>,
        /// Report destination; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Write Prometheus text-format metrics here after the batch
        #[arg(long)]
        metrics: Option<PathBuf>,
    },
    /// Parse and validate a single expression
    Check {
        expression: String,
        /// Indicator names the expression may reference
        #[arg(long, value_delimiter = ',')]
        known: Vec<String>,
        /// Parameter binding, `name=value`
        #[arg(short, long)]
        param: Vec<String>,
    },
    /// List the callable functions
    Functions,
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Eval {
            config,
            data,
            output,
            metrics,
        } => run_eval(&config, data.as_deref(), output.as_deref(), metrics.as_deref()),
        Command::Check {
            expression,
            known,
            param,
        } => run_check(&expression, &known, &param),
        Command::Functions => run_functions(),
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| {
        let err = QuantexprError::ConfigParse {
            file: path.display().to_string(),
            reason: e.to_string(),
        };
        eprintln!("error: {err}");
        ExitCode::from(&err)
    })
}

/// Data source for a run: `[data] path` unless overridden, plus the symbol
/// and interval that name the data window.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSource {
    pub path: PathBuf,
    pub symbol: String,
    pub interval: String,
}

pub fn build_data_source(
    config: &dyn ConfigPort,
    override_path: Option<&Path>,
) -> Result<DataSource, QuantexprError> {
    let path = match override_path {
        Some(p) => p.to_path_buf(),
        None => {
            validate_data_config(config)?;
            PathBuf::from(config.get_string("data", "path").unwrap_or_default().trim())
        }
    };
    let symbol = config
        .get_string("data", "symbol")
        .filter(|s| !s.trim().is_empty())
        .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "UNKNOWN".to_string());
    let interval = config
        .get_string("data", "interval")
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "1d".to_string());
    Ok(DataSource {
        path,
        symbol,
        interval,
    })
}

/// Evaluate every configured indicator and write the report to `out`.
/// Per-indicator failures are in the returned result; only config, data and
/// batch-fatal errors are returned as `Err`.
pub fn evaluate_config(
    config: &dyn ConfigPort,
    data_override: Option<&Path>,
    telemetry: Arc<dyn TelemetryPort>,
    out: &mut dyn Write,
) -> Result<(Vec<IndicatorRequest>, BatchResult), QuantexprError> {
    let limits = build_engine_limits(config)?;
    let requests = build_requests(config)?;
    let source = build_data_source(config, data_override)?;

    let frame = CsvAdapter::new(source.path.clone()).fetch_frame(&source.symbol, &source.interval)?;
    let identity = frame.identity(&source.symbol, &source.interval);

    let engine = IndicatorEngine::with_limits(limits, telemetry);
    let result = engine.run(&requests, &frame, &identity)?;
    CsvReportAdapter::new().write(&frame, &result, out)?;
    Ok((requests, result))
}

fn run_eval(
    config_path: &Path,
    data: Option<&Path>,
    output: Option<&Path>,
    metrics_path: Option<&Path>,
) -> ExitCode {
    // Stage 1: Load config
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    // Stage 2: Open the report destination
    let mut sink: Box<dyn Write> = match output {
        Some(path) => match fs::File::create(path) {
            Ok(f) => Box::new(io::BufWriter::new(f)),
            Err(e) => {
                let err = QuantexprError::Io(e);
                eprintln!("error: {}: {err}", path.display());
                return (&err).into();
            }
        },
        None => Box::new(io::stdout().lock()),
    };

    // Stage 3: Evaluate and write
    let metrics = match PrometheusTelemetry::new() {
        Ok(m) => Arc::new(m),
        Err(e) => {
            let err = QuantexprError::Metrics(e);
            eprintln!("error: {err}");
            return (&err).into();
        }
    };
    let telemetry = Arc::new(FanoutTelemetry::new(vec![
        metrics.clone() as Arc<dyn TelemetryPort>,
        Arc::new(TracingTelemetry),
    ]));
    let (requests, result) = match evaluate_config(&adapter, data, telemetry, &mut sink) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };
    if let Err(e) = sink.flush() {
        let err = QuantexprError::Io(e);
        eprintln!("error: {err}");
        return (&err).into();
    }
    if let Some(path) = output {
        eprintln!("Report written to {}", path.display());
    }

    // Stage 4: Summary
    let mut reported = BTreeSet::new();
    for request in &requests {
        if let Some(err) = result.failures.get(&request.name) {
            if reported.insert(request.name.as_str()) {
                report_failure(&request.name, &request.expression, err);
            }
        }
    }
    for (name, out) in result.ordered_outputs() {
        if out.has_shortfall() {
            eprintln!(
                "warning: {name}: declared lookback {} but expression needs {}",
                out.declared_lookback.unwrap_or(0),
                out.required_lookback
            );
        }
    }
    print_summary(&result, &metrics);
    if let Some(path) = metrics_path {
        if let Err(e) = fs::write(path, metrics.render()) {
            let err = QuantexprError::Io(e);
            eprintln!("error: {}: {err}", path.display());
            return (&err).into();
        }
        eprintln!("Metrics written to {}", path.display());
    }

    if result.is_success() {
        ExitCode::SUCCESS
    } else {
        (&QuantexprError::Batch {
            failed: result.summary.failed,
            total: result.summary.total,
        })
            .into()
    }
}

fn report_failure(name: &str, expression: &str, err: &IndicatorError) {
    match err {
        IndicatorError::Syntax(e) => {
            eprintln!("error: {name}:\n{}", e.display_with_context(expression));
        }
        other => eprintln!("error: {name}: {other}"),
    }
}

fn print_summary(result: &BatchResult, metrics: &PrometheusTelemetry) {
    let summary = &result.summary;
    let [hits, misses, joined] = metrics.cache_outcomes();
    let eval_time: Duration = result
        .evaluation_order
        .iter()
        .map(|name| metrics.evaluations(name).1)
        .sum();
    let shortfalls: u64 = result
        .evaluation_order
        .iter()
        .map(|name| metrics.shortfalls(name))
        .sum();
    eprintln!("\n=== Batch Summary ===");
    eprintln!("Indicators:    {}", summary.total);
    eprintln!("Succeeded:     {}", summary.succeeded);
    eprintln!("Failed:        {}", summary.failed);
    eprintln!("Errors:        {}", metrics.error_count());
    eprintln!("Cache:         {} hit / {} miss / {} joined", hits, misses, joined);
    eprintln!("Shortfalls:    {}", shortfalls);
    eprintln!("Eval time:     {:.3} ms", eval_time.as_secs_f64() * 1000.0);
    eprintln!("Elapsed:       {:.3} ms", summary.elapsed.as_secs_f64() * 1000.0);
    if !result.evaluation_order.is_empty() {
        eprintln!("Order:         {}", result.evaluation_order.join(", "));
    }
}

/// Validate one expression the way a batch would, with `known` as the other
/// indicator names in scope.
pub fn check_expression(
    expression: &str,
    known: &[String],
    params: &[String],
    limits: &EngineLimits,
) -> Result<IndicatorSpec, QuantexprError> {
    let mut request = IndicatorRequest::new("check", expression);
    for raw in params {
        let parsed = parse_params(raw).map_err(|reason| QuantexprError::ConfigInvalid {
            section: "check".to_string(),
            key: "param".to_string(),
            reason,
        })?;
        request.parameters.extend(parsed);
    }
    let known = known.iter().cloned().collect();
    Ok(IndicatorSpec::from_request(&request, &known, limits)?)
}

fn run_check(expression: &str, known: &[String], params: &[String]) -> ExitCode {
    match check_expression(expression, known, params, &EngineLimits::default()) {
        Ok(spec) => {
            let expr = &spec.expression;
            println!("Canonical:  {}", expr.canonical());
            println!("Nodes:      {}", expr.nodes());
            println!("Depth:      {}", expr.depth());
            println!("Lookback:   {}", expr.lookback(&|_: &str| 0));
            if !expr.references().is_empty() {
                let refs: Vec<&str> = expr.references().iter().map(String::as_str).collect();
                println!("References: {}", refs.join(", "));
            }
            ExitCode::SUCCESS
        }
        Err(QuantexprError::Indicator(IndicatorError::Syntax(e))) => {
            eprintln!("error:\n{}", e.display_with_context(expression));
            (&QuantexprError::Indicator(IndicatorError::Syntax(e))).into()
        }
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

fn run_functions() -> ExitCode {
    for spec in FUNCTIONS {
        println!("{:<40} {}", spec.signature(), spec.summary);
    }
    ExitCode::SUCCESS
}
