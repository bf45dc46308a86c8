//! Indicator requests, validated specs and per-indicator outputs.

use crate::domain::cache::CacheOutcome;
use crate::domain::error::IndicatorError;
use crate::domain::expr_parser::parse_with_limits;
use crate::domain::fingerprint::Fingerprint;
use crate::domain::limits::EngineLimits;
use crate::domain::series::Series;
use crate::domain::validator::{ValidatedExpr, Validator};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// One indicator as submitted by a caller: raw expression text plus named
/// constants.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorRequest {
    pub name: String,
    pub expression: String,
    pub parameters: BTreeMap<String, f64>,
    /// Lookback the caller has budgeted for, if any.
    pub lookback: Option<usize>,
}

impl IndicatorRequest {
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expression: expression.into(),
            parameters: BTreeMap::new(),
            lookback: None,
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: f64) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    pub fn with_lookback(mut self, lookback: usize) -> Self {
        self.lookback = Some(lookback);
        self
    }
}

/// A request whose expression parsed and validated.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSpec {
    pub name: String,
    pub expression: ValidatedExpr,
    pub parameters: BTreeMap<String, f64>,
    pub lookback: Option<usize>,
}

impl IndicatorSpec {
    /// Parse and validate `request`. `known` holds the indicator names the
    /// expression may refer to.
    pub fn from_request(
        request: &IndicatorRequest,
        known: &BTreeSet<String>,
        limits: &EngineLimits,
    ) -> Result<IndicatorSpec, IndicatorError> {
        let expr = parse_with_limits(&request.expression, limits)?;
        let expression = Validator::new(limits)
            .with_parameters(&request.parameters)
            .validate(&expr, known)?;
        Ok(IndicatorSpec {
            name: request.name.clone(),
            expression,
            parameters: request.parameters.clone(),
            lookback: request.lookback,
        })
    }

    /// Other indicators this one reads.
    pub fn dependencies(&self) -> &BTreeSet<String> {
        self.expression.references()
    }
}

/// A computed indicator column with its lookback accounting.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorOutput {
    pub series: Arc<Series>,
    pub fingerprint: Fingerprint,
    pub cache: CacheOutcome,
    /// Leading samples undefined on gap-free input.
    pub required_lookback: usize,
    pub declared_lookback: Option<usize>,
    pub first_valid: Option<usize>,
    /// How far the declared lookback falls short of the required one.
    pub lookback_shortfall: usize,
}

impl IndicatorOutput {
    pub fn has_shortfall(&self) -> bool {
        self.lookback_shortfall > 0
    }
}
