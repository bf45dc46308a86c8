//! Vectorized evaluator.
//!
//! Walks a [`ValidatedExpr`] once per node, producing whole columns. Literals
//! stay scalar until they meet a column and are then broadcast. Any operation
//! that touches an undefined sample, or whose result is not finite, yields
//! undefined at that position.

use crate::domain::error::IndicatorError;
use crate::domain::expr::{BinaryOp, UnaryOp};
use crate::domain::functions::Function;
use crate::domain::series::{FrameView, Series, TimeSeriesFrame, defined};
use crate::domain::validator::{Node, ValidatedExpr};
use crate::domain::window;
use std::borrow::Cow;
use std::sync::Arc;

enum Value {
    Scalar(Option<f64>),
    Column(Arc<Series>),
    Owned(Vec<Option<f64>>),
}

impl Value {
    fn at(&self, index: usize) -> Option<f64> {
        match self {
            Value::Scalar(v) => *v,
            Value::Column(series) => series.get(index),
            Value::Owned(values) => values.get(index).copied().flatten(),
        }
    }

    fn as_column(&self, len: usize) -> Cow<'_, [Option<f64>]> {
        match self {
            Value::Scalar(v) => Cow::Owned(vec![*v; len]),
            Value::Column(series) => Cow::Borrowed(series.values()),
            Value::Owned(values) => Cow::Borrowed(values),
        }
    }

    fn into_series(self, len: usize) -> Series {
        match self {
            Value::Scalar(v) => Series::new(vec![v; len]),
            Value::Column(series) => Arc::unwrap_or_clone(series),
            Value::Owned(values) => Series::new(values),
        }
    }
}

/// Evaluate against a bare frame. Expressions that reference other
/// indicators need [`evaluate_in`] with those columns present.
pub fn evaluate(expr: &ValidatedExpr, frame: &TimeSeriesFrame) -> Result<Series, IndicatorError> {
    frame.check_alignment()?;
    evaluate_in(expr, &frame.view())
}

/// Evaluate against a frame view that may carry earlier indicator columns.
pub fn evaluate_in(expr: &ValidatedExpr, view: &FrameView<'_>) -> Result<Series, IndicatorError> {
    let len = view.len();
    let value = Evaluator { view, len }.eval(expr.root())?;
    let series = value.into_series(len);
    if series.len() != len {
        return Err(IndicatorError::internal(format!(
            "result has {} rows, frame has {}",
            series.len(),
            len
        )));
    }
    Ok(series)
}

type Kernel = fn(&[Option<f64>], usize) -> Vec<Option<f64>>;

struct Evaluator<'v, 'f> {
    view: &'v FrameView<'f>,
    len: usize,
}

impl Evaluator<'_, '_> {
    fn eval(&self, node: &Node) -> Result<Value, IndicatorError> {
        match node {
            Node::Const(v) => Ok(Value::Scalar(defined(*v))),
            Node::Field(field) => self.view.field(*field).map(Value::Column).ok_or_else(|| {
                IndicatorError::UnknownReference {
                    name: field.name().to_string(),
                }
            }),
            Node::Indicator(name) => self.view.indicator(name).map(Value::Column).ok_or_else(|| {
                IndicatorError::UnknownReference { name: name.clone() }
            }),
            Node::Unary { op, operand } => {
                let value = self.eval(operand)?;
                Ok(match op {
                    UnaryOp::Neg => self.map(&value, |x| Some(-x)),
                    UnaryOp::Not => self.map(&value, |x| Some(truth(x == 0.0))),
                })
            }
            Node::Binary { op, left, right } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                Ok(self.zip(&l, &r, binary(*op)))
            }
            Node::Call { function, args } => self.call(function, args),
        }
    }

    fn call(&self, function: &Function, args: &[Node]) -> Result<Value, IndicatorError> {
        if args.len() != function.series_arity() {
            return Err(IndicatorError::internal(format!(
                "{} called with {} series arguments",
                function,
                args.len()
            )));
        }
        let x = self.eval(&args[0])?;
        let value = match *function {
            Function::RollingMean { window } => self.windowed(&x, window::rolling_mean, window),
            Function::RollingSum { window } => self.windowed(&x, window::rolling_sum, window),
            Function::RollingStd { window } => self.windowed(&x, window::rolling_std, window),
            Function::RollingMin { window } => self.windowed(&x, window::rolling_min, window),
            Function::RollingMax { window } => self.windowed(&x, window::rolling_max, window),
            Function::Wma { window } => self.windowed(&x, window::wma, window),
            Function::EwmMean { window } => self.windowed(&x, window::ewm_mean, window),
            Function::Rsi { window } => self.windowed(&x, window::rsi, window),
            Function::Roc { period } => self.windowed(&x, window::roc, period),
            Function::Shift { periods } => self.windowed(&x, window::shift, periods),
            Function::Diff { periods } => self.windowed(&x, window::diff, periods),
            Function::Clamp { lower, upper } => self.map(&x, |v| Some(v.clamp(lower, upper))),
            Function::Abs => self.map(&x, |v| Some(v.abs())),
            Function::Log => self.map(&x, |v| if v > 0.0 { Some(v.ln()) } else { None }),
            Function::Sqrt => self.map(&x, |v| if v >= 0.0 { Some(v.sqrt()) } else { None }),
            Function::Exp => self.map(&x, |v| Some(v.exp())),
            Function::Min => {
                let y = self.eval(&args[1])?;
                self.zip(&x, &y, |a, b| Some(a.min(b)))
            }
            Function::Max => {
                let y = self.eval(&args[1])?;
                self.zip(&x, &y, |a, b| Some(a.max(b)))
            }
        };
        Ok(value)
    }

    fn windowed(&self, value: &Value, kernel: Kernel, size: usize) -> Value {
        Value::Owned(kernel(&value.as_column(self.len), size))
    }

    fn map<F>(&self, value: &Value, f: F) -> Value
    where
        F: Fn(f64) -> Option<f64>,
    {
        let apply = |v: Option<f64>| v.and_then(&f).and_then(defined);
        match value {
            Value::Scalar(v) => Value::Scalar(apply(*v)),
            other => Value::Owned((0..self.len).map(|i| apply(other.at(i))).collect()),
        }
    }

    fn zip<F>(&self, left: &Value, right: &Value, f: F) -> Value
    where
        F: Fn(f64, f64) -> Option<f64>,
    {
        let apply = |a: Option<f64>, b: Option<f64>| {
            a.zip(b).and_then(|(a, b)| f(a, b)).and_then(defined)
        };
        match (left, right) {
            (Value::Scalar(a), Value::Scalar(b)) => Value::Scalar(apply(*a, *b)),
            _ => Value::Owned(
                (0..self.len)
                    .map(|i| apply(left.at(i), right.at(i)))
                    .collect(),
            ),
        }
    }
}

fn truth(condition: bool) -> f64 {
    if condition { 1.0 } else { 0.0 }
}

fn binary(op: BinaryOp) -> fn(f64, f64) -> Option<f64> {
    match op {
        BinaryOp::Add => |a, b| Some(a + b),
        BinaryOp::Sub => |a, b| Some(a - b),
        BinaryOp::Mul => |a, b| Some(a * b),
        BinaryOp::Div => |a, b| if b == 0.0 { None } else { Some(a / b) },
        BinaryOp::Pow => |a, b| Some(a.powf(b)),
        BinaryOp::Lt => |a, b| Some(truth(a < b)),
        BinaryOp::Le => |a, b| Some(truth(a <= b)),
        BinaryOp::Gt => |a, b| Some(truth(a > b)),
        BinaryOp::Ge => |a, b| Some(truth(a >= b)),
        BinaryOp::Eq => |a, b| Some(truth(a == b)),
        BinaryOp::Ne => |a, b| Some(truth(a != b)),
        BinaryOp::And => |a, b| Some(truth(a != 0.0 && b != 0.0)),
        BinaryOp::Or => |a, b| Some(truth(a != 0.0 || b != 0.0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::expr::Field;
    use crate::domain::expr_parser::parse;
    use crate::domain::validator::validate;
    use approx::assert_relative_eq;
    use chrono::{NaiveDate, NaiveDateTime};
    use std::collections::BTreeSet;

    fn ts(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn frame(close: &[f64]) -> TimeSeriesFrame {
        let timestamps = (0..close.len()).map(|i| ts(i as u32 + 1)).collect();
        let open: Vec<f64> = close.iter().map(|c| c - 1.0).collect();
        TimeSeriesFrame::new(
            timestamps,
            vec![
                (Field::Close, Series::from_f64(close)),
                (Field::Open, Series::from_f64(&open)),
            ],
        )
        .unwrap()
    }

    fn expr(src: &str, known: &[&str]) -> ValidatedExpr {
        let known: BTreeSet<String> = known.iter().map(|s| s.to_string()).collect();
        validate(&parse(src).unwrap(), &known).unwrap()
    }

    fn run(src: &str, close: &[f64]) -> Vec<Option<f64>> {
        evaluate(&expr(src, &[]), &frame(close)).unwrap().into_values()
    }

    #[test]
    fn rolling_mean_over_close() {
        let out = run("rolling_mean(close, window=3)", &[10.0, 12.0, 14.0, 16.0, 18.0]);
        assert_eq!(out, vec![None, None, Some(12.0), Some(14.0), Some(16.0)]);
    }

    #[test]
    fn arithmetic_is_element_wise() {
        let out = run("close - open + 2 * close", &[1.0, 2.0]);
        assert_eq!(out, vec![Some(3.0), Some(5.0)]);
    }

    #[test]
    fn division_by_zero_is_undefined() {
        assert_eq!(run("close / 0", &[1.0, 2.0]), vec![None, None]);
        assert_eq!(run("close / (close - 2)", &[1.0, 2.0]), vec![Some(-1.0), None]);
    }

    #[test]
    fn non_finite_results_are_undefined() {
        assert_eq!(run("log(close)", &[0.0, 1.0]), vec![None, Some(0.0)]);
        assert_eq!(run("sqrt(close - 2)", &[1.0, 6.0]), vec![None, Some(2.0)]);
        assert_eq!(run("(close - 2) ** 0.5", &[1.0]), vec![None]);
        assert_eq!(run("exp(close)", &[1000.0]), vec![None]);
    }

    #[test]
    fn comparisons_and_logic_yield_flags() {
        let out = run("close > 1 and not (close == 3)", &[1.0, 2.0, 3.0]);
        assert_eq!(out, vec![Some(0.0), Some(1.0), Some(0.0)]);
        let out = run("close < 2 or close >= 3", &[1.0, 2.0, 3.0]);
        assert_eq!(out, vec![Some(1.0), Some(0.0), Some(1.0)]);
    }

    #[test]
    fn undefined_propagates_through_operators() {
        let out = run("shift(close, 1) + close", &[1.0, 2.0, 3.0]);
        assert_eq!(out, vec![None, Some(3.0), Some(5.0)]);
        let out = run("shift(close, 1) > 0 or 1", &[1.0, 2.0]);
        assert_eq!(out[0], None);
    }

    #[test]
    fn constant_expression_is_broadcast() {
        assert_eq!(run("1 + 2", &[5.0, 6.0, 7.0]), vec![Some(3.0); 3]);
        assert_eq!(run("rolling_sum(1, 2)", &[5.0, 6.0, 7.0]), vec![None, Some(2.0), Some(2.0)]);
    }

    #[test]
    fn clamp_abs_min_max() {
        let close = [-3.0, 0.5, 4.0];
        assert_eq!(
            run("clamp(close, lower=-1, upper=1)", &close),
            vec![Some(-1.0), Some(0.5), Some(1.0)]
        );
        assert_eq!(run("abs(close)", &close), vec![Some(3.0), Some(0.5), Some(4.0)]);
        assert_eq!(run("min(close, 0)", &close), vec![Some(-3.0), Some(0.0), Some(0.0)]);
        assert_eq!(run("max(close, open)", &close), vec![Some(-3.0), Some(0.5), Some(4.0)]);
    }

    #[test]
    fn nested_windows_compose_lookback() {
        let close: Vec<f64> = (1..=8).map(f64::from).collect();
        let v = expr("rolling_mean(rolling_mean(close, 3), 3)", &[]);
        let out = evaluate(&v, &frame(&close)).unwrap();
        assert_eq!(out.first_valid(), Some(v.lookback(&|_| 0)));
        assert_relative_eq!(out.get(4).unwrap(), 3.0, epsilon = 1e-12);
    }

    #[test]
    fn indicator_reference_reads_view_column() {
        let f = frame(&[1.0, 2.0, 3.0]);
        let mut view = f.view();
        view.insert("base", Arc::new(Series::from_f64(&[10.0, 20.0, 30.0])))
            .unwrap();
        let out = evaluate_in(&expr("base / close", &["base"]), &view).unwrap();
        assert_eq!(out.values(), &[Some(10.0), Some(10.0), Some(10.0)]);
    }

    #[test]
    fn missing_columns_are_unknown_references() {
        let err = evaluate(&expr("volume * 2", &[]), &frame(&[1.0])).unwrap_err();
        assert_eq!(
            err,
            IndicatorError::UnknownReference {
                name: "volume".into()
            }
        );
        let err = evaluate(&expr("base + 1", &["base"]), &frame(&[1.0])).unwrap_err();
        assert!(matches!(err, IndicatorError::UnknownReference { ref name } if name == "base"));
    }

    #[test]
    fn timestamp_is_numeric() {
        let out = run("diff(timestamp)", &[1.0, 2.0]);
        assert_eq!(out, vec![None, Some(86_400.0)]);
    }

    #[test]
    fn evaluation_is_deterministic_and_leaves_frame_untouched() {
        let f = frame(&[3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0]);
        let before = f.clone();
        let v = expr("rsi(close, 3) * ewm_mean(close, 2) / rolling_std(close, 4)", &[]);
        let a = evaluate(&v, &f).unwrap();
        let b = evaluate(&v, &f).unwrap();
        assert!(a.bit_identical(&b));
        assert_eq!(f, before);
    }

    #[test]
    fn empty_frame_yields_empty_series() {
        let f = TimeSeriesFrame::new(vec![], vec![(Field::Close, Series::default())]).unwrap();
        let out = evaluate(&expr("rolling_mean(close, 3) + 1", &[]), &f).unwrap();
        assert!(out.is_empty());
    }
}
