//! Capability validator.
//!
//! Lowers a parsed [`Expr`] into a [`Node`] tree that can only contain
//! constants, base fields, references to known indicators, the fixed operator
//! set and whitelisted functions. Anything else is rejected here, so the
//! evaluator never sees input it was not built for.

use crate::domain::error::IndicatorError;
use crate::domain::expr::{BinaryOp, Expr, Field, KeywordArg, UnaryOp, format_number};
use crate::domain::functions::{self, Function, ParamKind};
use crate::domain::limits::EngineLimits;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Validated expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Const(f64),
    Field(Field),
    Indicator(String),
    Unary {
        op: UnaryOp,
        operand: Box<Node>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Node>,
        right: Box<Node>,
    },
    Call {
        function: Function,
        args: Vec<Node>,
    },
}

impl Node {
    /// Leading samples left undefined on gap-free input. `dependency` gives
    /// the lookback of a referenced indicator.
    pub fn lookback(&self, dependency: &dyn Fn(&str) -> usize) -> usize {
        match self {
            Node::Const(_) | Node::Field(_) => 0,
            Node::Indicator(name) => dependency(name),
            Node::Unary { operand, .. } => operand.lookback(dependency),
            Node::Binary { left, right, .. } => {
                left.lookback(dependency).max(right.lookback(dependency))
            }
            Node::Call { function, args } => {
                let inner = args
                    .iter()
                    .map(|a| a.lookback(dependency))
                    .max()
                    .unwrap_or(0);
                inner + function.lookback()
            }
        }
    }

    /// Canonical text: keyword arguments in schema order, commutative
    /// operands sorted, fully parenthesised.
    pub fn canonical(&self) -> String {
        match self {
            Node::Const(v) => literal(*v),
            Node::Field(field) => field.name().to_string(),
            Node::Indicator(name) => name.clone(),
            Node::Unary {
                op: UnaryOp::Neg,
                operand,
            } => format!("(-{})", operand.canonical()),
            Node::Unary {
                op: UnaryOp::Not,
                operand,
            } => format!("(not {})", operand.canonical()),
            Node::Binary { op, left, right } => {
                let mut l = left.canonical();
                let mut r = right.canonical();
                if op.is_commutative() && r < l {
                    std::mem::swap(&mut l, &mut r);
                }
                format!("({} {} {})", l, op, r)
            }
            Node::Call { function, args } => {
                let mut parts: Vec<String> = args.iter().map(Node::canonical).collect();
                if function.is_commutative() {
                    parts.sort();
                }
                for (name, value) in function.constants() {
                    parts.push(format!("{}={}", name, literal(value)));
                }
                format!("{}({})", function.name(), parts.join(", "))
            }
        }
    }

    fn collect_references(&self, out: &mut BTreeSet<String>) {
        match self {
            Node::Const(_) | Node::Field(_) => {}
            Node::Indicator(name) => {
                out.insert(name.clone());
            }
            Node::Unary { operand, .. } => operand.collect_references(out),
            Node::Binary { left, right, .. } => {
                left.collect_references(out);
                right.collect_references(out);
            }
            Node::Call { args, .. } => {
                for arg in args {
                    arg.collect_references(out);
                }
            }
        }
    }
}

fn literal(value: f64) -> String {
    if value < 0.0 {
        format!("(-{})", format_number(-value))
    } else {
        format_number(value)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// An expression that passed validation. Only the validator can build one.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedExpr {
    root: Node,
    references: BTreeSet<String>,
    canonical: String,
    nodes: usize,
    depth: usize,
}

impl ValidatedExpr {
    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Names of other indicators this expression reads.
    pub fn references(&self) -> &BTreeSet<String> {
        &self.references
    }

    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    pub fn nodes(&self) -> usize {
        self.nodes
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn lookback(&self, dependency: &dyn Fn(&str) -> usize) -> usize {
        self.root.lookback(dependency)
    }
}

/// Validate with default limits and no parameters.
pub fn validate(
    expr: &Expr,
    known_indicators: &BTreeSet<String>,
) -> Result<ValidatedExpr, IndicatorError> {
    Validator::new(&EngineLimits::default()).validate(expr, known_indicators)
}

pub struct Validator<'a> {
    limits: &'a EngineLimits,
    parameters: Option<&'a BTreeMap<String, f64>>,
}

impl<'a> Validator<'a> {
    pub fn new(limits: &'a EngineLimits) -> Self {
        Self {
            limits,
            parameters: None,
        }
    }

    /// Named constants that identifiers may refer to.
    pub fn with_parameters(mut self, parameters: &'a BTreeMap<String, f64>) -> Self {
        self.parameters = Some(parameters);
        self
    }

    pub fn validate(
        &self,
        expr: &Expr,
        known_indicators: &BTreeSet<String>,
    ) -> Result<ValidatedExpr, IndicatorError> {
        let shape = expr.shape();
        if shape.depth > self.limits.max_depth {
            return Err(IndicatorError::ExpressionTooComplex {
                reason: format!(
                    "depth {} exceeds limit {}",
                    shape.depth, self.limits.max_depth
                ),
            });
        }
        if shape.nodes > self.limits.max_nodes {
            return Err(IndicatorError::ExpressionTooComplex {
                reason: format!(
                    "{} nodes exceeds limit {}",
                    shape.nodes, self.limits.max_nodes
                ),
            });
        }
        self.check_parameters()?;

        let root = self.lower(expr, known_indicators)?;
        let mut references = BTreeSet::new();
        root.collect_references(&mut references);
        let canonical = root.canonical();
        Ok(ValidatedExpr {
            root,
            references,
            canonical,
            nodes: shape.nodes,
            depth: shape.depth,
        })
    }

    fn check_parameters(&self) -> Result<(), IndicatorError> {
        for (name, value) in self.parameters.into_iter().flatten() {
            if Field::from_name(name).is_some() {
                return Err(IndicatorError::invalid_parameter(
                    name,
                    "parameter name shadows a base field",
                ));
            }
            if !value.is_finite() {
                return Err(IndicatorError::invalid_parameter(name, value));
            }
        }
        Ok(())
    }

    fn parameter(&self, name: &str) -> Option<f64> {
        self.parameters.and_then(|p| p.get(name).copied())
    }

    fn lower(&self, expr: &Expr, known: &BTreeSet<String>) -> Result<Node, IndicatorError> {
        match expr {
            Expr::Literal(v) => Ok(Node::Const(*v)),
            Expr::Ident(name) => self.resolve_ident(name, known),
            Expr::Unary { op, operand } => Ok(Node::Unary {
                op: *op,
                operand: Box::new(self.lower(operand, known)?),
            }),
            Expr::Binary { op, left, right } => Ok(Node::Binary {
                op: *op,
                left: Box::new(self.lower(left, known)?),
                right: Box::new(self.lower(right, known)?),
            }),
            Expr::Call { name, args, kwargs } => self.lower_call(name, args, kwargs, known),
        }
    }

    fn resolve_ident(&self, name: &str, known: &BTreeSet<String>) -> Result<Node, IndicatorError> {
        if let Some(value) = self.parameter(name) {
            return Ok(Node::Const(value));
        }
        if let Some(field) = Field::from_name(name) {
            return Ok(Node::Field(field));
        }
        if known.contains(name) {
            return Ok(Node::Indicator(name.to_string()));
        }
        Err(IndicatorError::UnknownReference {
            name: name.to_string(),
        })
    }

    fn lower_call(
        &self,
        name: &str,
        args: &[Expr],
        kwargs: &[KeywordArg],
        known: &BTreeSet<String>,
    ) -> Result<Node, IndicatorError> {
        let spec = functions::lookup(name).ok_or_else(|| IndicatorError::DisallowedFunction {
            name: name.to_string(),
        })?;

        let supplied = args.len() + kwargs.len();
        if supplied > spec.max_arity() || args.len() > spec.max_arity() {
            return Err(IndicatorError::DisallowedFunction {
                name: format!(
                    "{} with {} arguments (signature {})",
                    name,
                    supplied,
                    spec.signature()
                ),
            });
        }

        let mut slots: Vec<Option<&Expr>> = vec![None; spec.params.len()];
        for (i, arg) in args.iter().enumerate() {
            slots[i] = Some(arg);
        }
        for kw in kwargs {
            let (index, _) = spec.param(&kw.name).ok_or_else(|| {
                IndicatorError::invalid_parameter(
                    &kw.name,
                    format!("not a parameter of {}", spec.signature()),
                )
            })?;
            if slots[index].is_some() {
                return Err(IndicatorError::invalid_parameter(
                    &kw.name,
                    "bound more than once",
                ));
            }
            slots[index] = Some(&kw.value);
        }

        let mut series_args = Vec::new();
        let mut consts = Vec::new();
        for (param, slot) in spec.params.iter().zip(&slots) {
            match (param.kind, slot) {
                (ParamKind::Series, Some(expr)) => series_args.push(self.lower(expr, known)?),
                (ParamKind::Series, None) => {
                    return Err(IndicatorError::DisallowedFunction {
                        name: format!("{} without argument '{}' (signature {})", name, param.name, spec.signature()),
                    });
                }
                (_, Some(expr)) => {
                    let value = self.constant(expr).ok_or_else(|| {
                        IndicatorError::invalid_parameter(param.name, format!("'{}' is not a constant", expr))
                    })?;
                    consts.push(functions::check_constant(param, value, self.limits)?);
                }
                (_, None) => match param.default {
                    Some(default) => consts.push(default),
                    None => {
                        return Err(IndicatorError::invalid_parameter(param.name, "missing required value"));
                    }
                },
            }
        }

        let function = Function::build(spec, &consts)?;
        Ok(Node::Call {
            function,
            args: series_args,
        })
    }

    /// Literal value of a constant slot: a number, a negated number, or a
    /// parameter name.
    fn constant(&self, expr: &Expr) -> Option<f64> {
        match expr {
            Expr::Literal(v) => Some(*v),
            Expr::Ident(name) => self.parameter(name),
            Expr::Unary {
                op: UnaryOp::Neg,
                operand,
            } => self.constant(operand).map(|v| -v),
            _ => None,
        }
    }
}
