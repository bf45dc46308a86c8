//! The closed whitelist of callable functions.
//!
//! Each entry declares an ordered parameter schema. Series slots take any
//! sub-expression; constant slots take a literal (after parameter
//! substitution) and are range-checked. A validated call is lowered into the
//! [`Function`] enum, which is the only thing the evaluator dispatches on.

use crate::domain::error::IndicatorError;
use crate::domain::expr::format_number;
use crate::domain::limits::EngineLimits;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamKind {
    /// Any series-valued sub-expression.
    Series,
    /// Integer window length in `1..=max_window`.
    Window,
    /// Integer offset in `0..=max_window`.
    Periods,
    /// Any finite constant.
    Number,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub default: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FunctionSpec {
    pub name: &'static str,
    pub params: &'static [ParamSpec],
    pub summary: &'static str,
}

impl FunctionSpec {
    pub fn min_arity(&self) -> usize {
        self.params.iter().filter(|p| p.default.is_none()).count()
    }

    pub fn max_arity(&self) -> usize {
        self.params.len()
    }

    pub fn param(&self, name: &str) -> Option<(usize, &ParamSpec)> {
        self.params.iter().enumerate().find(|(_, p)| p.name == name)
    }

    /// Signature line, e.g. `rolling_mean(x, window)`.
    pub fn signature(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| match p.default {
                Some(d) => format!("{}={}", p.name, format_number(d)),
                None => p.name.to_string(),
            })
            .collect();
        format!("{}({})", self.name, params.join(", "))
    }
}

const fn series(name: &'static str) -> ParamSpec {
    ParamSpec {
        name,
        kind: ParamKind::Series,
        default: None,
    }
}

const fn window(name: &'static str) -> ParamSpec {
    ParamSpec {
        name,
        kind: ParamKind::Window,
        default: None,
    }
}

const fn number(name: &'static str) -> ParamSpec {
    ParamSpec {
        name,
        kind: ParamKind::Number,
        default: None,
    }
}

pub static FUNCTIONS: &[FunctionSpec] = &[
    FunctionSpec {
        name: "rolling_mean",
        params: &[series("x"), window("window")],
        summary: "simple moving average over `window` samples",
    },
    FunctionSpec {
        name: "rolling_sum",
        params: &[series("x"), window("window")],
        summary: "sum over the last `window` samples",
    },
    FunctionSpec {
        name: "rolling_std",
        params: &[series("x"), window("window")],
        summary: "population standard deviation over `window` samples",
    },
    FunctionSpec {
        name: "rolling_min",
        params: &[series("x"), window("window")],
        summary: "minimum over the last `window` samples",
    },
    FunctionSpec {
        name: "rolling_max",
        params: &[series("x"), window("window")],
        summary: "maximum over the last `window` samples",
    },
    FunctionSpec {
        name: "wma",
        params: &[series("x"), window("window")],
        summary: "linearly weighted moving average",
    },
    FunctionSpec {
        name: "ewm_mean",
        params: &[series("x"), window("window")],
        summary: "exponential moving average, alpha = 2/(window+1), seeded with the first SMA",
    },
    FunctionSpec {
        name: "rsi",
        params: &[series("x"), window("window")],
        summary: "relative strength index with Wilder smoothing",
    },
    FunctionSpec {
        name: "roc",
        params: &[series("x"), window("period")],
        summary: "rate of change in percent over `period` samples",
    },
    FunctionSpec {
        name: "shift",
        params: &[
            series("x"),
            ParamSpec {
                name: "periods",
                kind: ParamKind::Periods,
                default: None,
            },
        ],
        summary: "value `periods` samples earlier",
    },
    FunctionSpec {
        name: "diff",
        params: &[
            series("x"),
            ParamSpec {
                name: "periods",
                kind: ParamKind::Window,
                default: Some(1.0),
            },
        ],
        summary: "difference from the value `periods` samples earlier",
    },
    FunctionSpec {
        name: "clamp",
        params: &[series("x"), number("lower"), number("upper")],
        summary: "limit values to [lower, upper]",
    },
    FunctionSpec {
        name: "abs",
        params: &[series("x")],
        summary: "absolute value",
    },
    FunctionSpec {
        name: "log",
        params: &[series("x")],
        summary: "natural logarithm, undefined for non-positive input",
    },
    FunctionSpec {
        name: "sqrt",
        params: &[series("x")],
        summary: "square root, undefined for negative input",
    },
    FunctionSpec {
        name: "exp",
        params: &[series("x")],
        summary: "e raised to x",
    },
    FunctionSpec {
        name: "min",
        params: &[series("a"), series("b")],
        summary: "element-wise minimum",
    },
    FunctionSpec {
        name: "max",
        params: &[series("a"), series("b")],
        summary: "element-wise maximum",
    },
];

pub fn lookup(name: &str) -> Option<&'static FunctionSpec> {
    FUNCTIONS.iter().find(|f| f.name == name)
}

/// A whitelisted function with its constant parameters resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Function {
    RollingMean { window: usize },
    RollingSum { window: usize },
    RollingStd { window: usize },
    RollingMin { window: usize },
    RollingMax { window: usize },
    Wma { window: usize },
    EwmMean { window: usize },
    Rsi { window: usize },
    Roc { period: usize },
    Shift { periods: usize },
    Diff { periods: usize },
    Clamp { lower: f64, upper: f64 },
    Abs,
    Log,
    Sqrt,
    Exp,
    Min,
    Max,
}

impl Function {
    /// Build from a whitelist entry and its bound constants (schema order,
    /// series slots excluded). Constants have already been range-checked.
    pub(crate) fn build(spec: &FunctionSpec, consts: &[f64]) -> Result<Function, IndicatorError> {
        let int = |i: usize| -> Result<usize, IndicatorError> {
            consts
                .get(i)
                .map(|v| *v as usize)
                .ok_or_else(|| IndicatorError::internal(format!("{}: missing constant {}", spec.name, i)))
        };
        let float = |i: usize| -> Result<f64, IndicatorError> {
            consts
                .get(i)
                .copied()
                .ok_or_else(|| IndicatorError::internal(format!("{}: missing constant {}", spec.name, i)))
        };
        let function = match spec.name {
            "rolling_mean" => Function::RollingMean { window: int(0)? },
            "rolling_sum" => Function::RollingSum { window: int(0)? },
            "rolling_std" => Function::RollingStd { window: int(0)? },
            "rolling_min" => Function::RollingMin { window: int(0)? },
            "rolling_max" => Function::RollingMax { window: int(0)? },
            "wma" => Function::Wma { window: int(0)? },
            "ewm_mean" => Function::EwmMean { window: int(0)? },
            "rsi" => Function::Rsi { window: int(0)? },
            "roc" => Function::Roc { period: int(0)? },
            "shift" => Function::Shift { periods: int(0)? },
            "diff" => Function::Diff { periods: int(0)? },
            "clamp" => {
                let lower = float(0)?;
                let upper = float(1)?;
                if lower > upper {
                    return Err(IndicatorError::invalid_parameter(
                        "lower",
                        format!("{} is greater than upper {}", format_number(lower), format_number(upper)),
                    ));
                }
                Function::Clamp { lower, upper }
            }
            "abs" => Function::Abs,
            "log" => Function::Log,
            "sqrt" => Function::Sqrt,
            "exp" => Function::Exp,
            "min" => Function::Min,
            "max" => Function::Max,
            other => {
                return Err(IndicatorError::DisallowedFunction {
                    name: other.to_string(),
                });
            }
        };
        Ok(function)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Function::RollingMean { .. } => "rolling_mean",
            Function::RollingSum { .. } => "rolling_sum",
            Function::RollingStd { .. } => "rolling_std",
            Function::RollingMin { .. } => "rolling_min",
            Function::RollingMax { .. } => "rolling_max",
            Function::Wma { .. } => "wma",
            Function::EwmMean { .. } => "ewm_mean",
            Function::Rsi { .. } => "rsi",
            Function::Roc { .. } => "roc",
            Function::Shift { .. } => "shift",
            Function::Diff { .. } => "diff",
            Function::Clamp { .. } => "clamp",
            Function::Abs => "abs",
            Function::Log => "log",
            Function::Sqrt => "sqrt",
            Function::Exp => "exp",
            Function::Min => "min",
            Function::Max => "max",
        }
    }

    /// Number of series arguments the function consumes.
    pub fn series_arity(&self) -> usize {
        match self {
            Function::Min | Function::Max => 2,
            _ => 1,
        }
    }

    /// Leading samples this function leaves undefined on top of its input's.
    pub fn lookback(&self) -> usize {
        match *self {
            Function::RollingMean { window }
            | Function::RollingSum { window }
            | Function::RollingStd { window }
            | Function::RollingMin { window }
            | Function::RollingMax { window }
            | Function::Wma { window }
            | Function::EwmMean { window } => window - 1,
            Function::Rsi { window } => window,
            Function::Roc { period } => period,
            Function::Shift { periods } | Function::Diff { periods } => periods,
            Function::Clamp { .. }
            | Function::Abs
            | Function::Log
            | Function::Sqrt
            | Function::Exp
            | Function::Min
            | Function::Max => 0,
        }
    }

    /// True when the series arguments may be reordered freely.
    pub fn is_commutative(&self) -> bool {
        matches!(self, Function::Min | Function::Max)
    }

    /// Constant parameters in schema order, as `name=value` pairs.
    pub fn constants(&self) -> Vec<(&'static str, f64)> {
        match *self {
            Function::RollingMean { window }
            | Function::RollingSum { window }
            | Function::RollingStd { window }
            | Function::RollingMin { window }
            | Function::RollingMax { window }
            | Function::Wma { window }
            | Function::EwmMean { window }
            | Function::Rsi { window } => vec![("window", window as f64)],
            Function::Roc { period } => vec![("period", period as f64)],
            Function::Shift { periods } | Function::Diff { periods } => {
                vec![("periods", periods as f64)]
            }
            Function::Clamp { lower, upper } => vec![("lower", lower), ("upper", upper)],
            Function::Abs
            | Function::Log
            | Function::Sqrt
            | Function::Exp
            | Function::Min
            | Function::Max => vec![],
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Range-check a constant against its slot.
pub(crate) fn check_constant(
    param: &ParamSpec,
    value: f64,
    limits: &EngineLimits,
) -> Result<f64, IndicatorError> {
    let reject = |reason: String| Err(IndicatorError::invalid_parameter(param.name, reason));
    if !value.is_finite() {
        return reject(format!("{} is not finite", value));
    }
    match param.kind {
        ParamKind::Series => reject("expected a series, found a constant".to_string()),
        ParamKind::Number => Ok(value),
        ParamKind::Window | ParamKind::Periods => {
            let min = if param.kind == ParamKind::Window { 1.0 } else { 0.0 };
            if value.fract() != 0.0 {
                return reject(format!("{} must be an integer", format_number(value)));
            }
            if value < min || value > limits.max_window as f64 {
                return reject(format!(
                    "{} is outside {}..={}",
                    format_number(value),
                    min,
                    limits.max_window
                ));
            }
            Ok(value)
        }
    }
}
