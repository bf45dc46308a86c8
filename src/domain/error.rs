//! Domain error types.

use std::fmt;

/// A syntax error with the byte offset where parsing stopped.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("syntax error at position {position}: {message}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    pub fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }

    /// Format the error with a caret pointing at the error position in the input.
    pub fn display_with_context(&self, input: &str) -> String {
        let column = input
            .get(..self.position.min(input.len()))
            .map(|prefix| prefix.chars().count())
            .unwrap_or(self.position);
        let caret = " ".repeat(column) + "^";
        format!(
            "{input}\n{caret}\n{err}",
            input = input,
            caret = caret,
            err = self
        )
    }
}

/// Per-indicator failure reasons.
///
/// Everything except `CycleError` and `MisalignedFrame` is scoped to a single
/// indicator; those two abort the whole batch.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IndicatorError {
    #[error(transparent)]
    Syntax(#[from] ParseError),

    #[error("unknown reference '{name}'")]
    UnknownReference { name: String },

    #[error("function '{name}' is not allowed")]
    DisallowedFunction { name: String },

    #[error("invalid parameter '{name}': {value}")]
    InvalidParameter { name: String, value: String },

    #[error("expression too complex: {reason}")]
    ExpressionTooComplex { reason: String },

    #[error("dependency cycle between indicators: {}", members.join(" -> "))]
    CycleError { members: Vec<String> },

    #[error("misaligned frame: {reason}")]
    MisalignedFrame { reason: String },

    #[error("computation failed: {reason}")]
    ComputationFailed { reason: String },

    #[error("dependency '{dependency}' failed")]
    DependencyFailed { dependency: String },

    #[error("indicator '{name}' is defined more than once")]
    DuplicateIndicator { name: String },
}

/// Stable classification used for telemetry error counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorKind {
    Syntax,
    UnknownReference,
    DisallowedFunction,
    InvalidParameter,
    ExpressionTooComplex,
    Cycle,
    MisalignedFrame,
    ComputationFailed,
    DependencyFailed,
    DuplicateIndicator,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 10] = [
        ErrorKind::Syntax,
        ErrorKind::UnknownReference,
        ErrorKind::DisallowedFunction,
        ErrorKind::InvalidParameter,
        ErrorKind::ExpressionTooComplex,
        ErrorKind::Cycle,
        ErrorKind::MisalignedFrame,
        ErrorKind::ComputationFailed,
        ErrorKind::DependencyFailed,
        ErrorKind::DuplicateIndicator,
    ];
}

impl IndicatorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IndicatorError::Syntax(_) => ErrorKind::Syntax,
            IndicatorError::UnknownReference { .. } => ErrorKind::UnknownReference,
            IndicatorError::DisallowedFunction { .. } => ErrorKind::DisallowedFunction,
            IndicatorError::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            IndicatorError::ExpressionTooComplex { .. } => ErrorKind::ExpressionTooComplex,
            IndicatorError::CycleError { .. } => ErrorKind::Cycle,
            IndicatorError::MisalignedFrame { .. } => ErrorKind::MisalignedFrame,
            IndicatorError::ComputationFailed { .. } => ErrorKind::ComputationFailed,
            IndicatorError::DependencyFailed { .. } => ErrorKind::DependencyFailed,
            IndicatorError::DuplicateIndicator { .. } => ErrorKind::DuplicateIndicator,
        }
    }

    /// True for failures that signal a broken internal guarantee rather than
    /// bad user input.
    pub fn is_internal(&self) -> bool {
        matches!(self, IndicatorError::ComputationFailed { .. })
    }

    /// True for failures that abort every indicator in the batch.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(
            self,
            IndicatorError::CycleError { .. } | IndicatorError::MisalignedFrame { .. }
        )
    }

    pub(crate) fn invalid_parameter(name: &str, value: impl fmt::Display) -> Self {
        IndicatorError::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    pub(crate) fn internal(reason: impl Into<String>) -> Self {
        IndicatorError::ComputationFailed {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Syntax => "syntax",
            ErrorKind::UnknownReference => "unknown_reference",
            ErrorKind::DisallowedFunction => "disallowed_function",
            ErrorKind::InvalidParameter => "invalid_parameter",
            ErrorKind::ExpressionTooComplex => "expression_too_complex",
            ErrorKind::Cycle => "cycle",
            ErrorKind::MisalignedFrame => "misaligned_frame",
            ErrorKind::ComputationFailed => "computation_failed",
            ErrorKind::DependencyFailed => "dependency_failed",
            ErrorKind::DuplicateIndicator => "duplicate_indicator",
        };
        f.write_str(name)
    }
}

/// Top-level error type for quantexpr.
#[derive(Debug, thiserror::Error)]
pub enum QuantexprError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("data error: {reason}")]
    Data { reason: String },

    #[error(transparent)]
    Indicator(#[from] IndicatorError),

    #[error("{failed} of {total} indicators failed")]
    Batch { failed: usize, total: usize },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl From<&QuantexprError> for std::process::ExitCode {
    fn from(err: &QuantexprError) -> Self {
        let code: u8 = match err {
            QuantexprError::Io(_) | QuantexprError::Csv(_) | QuantexprError::Metrics(_) => 1,
            QuantexprError::ConfigParse { .. }
            | QuantexprError::ConfigMissing { .. }
            | QuantexprError::ConfigInvalid { .. } => 2,
            QuantexprError::Data { .. } => 3,
            QuantexprError::Indicator(_) => 4,
            QuantexprError::Batch { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}
