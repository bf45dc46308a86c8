//! Expression syntax tree.
//!
//! This is the tree the parser produces. Identifiers are left unresolved
//! (`Ident`); the validator decides whether each one is a base field, a
//! parameter or another indicator and lowers the tree into
//! [`Node`](crate::domain::validator::Node).

use std::fmt;

/// Base OHLCV columns plus the timestamp column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Field {
    Open,
    High,
    Low,
    Close,
    Volume,
    Timestamp,
}

impl Field {
    pub const ALL: [Field; 6] = [
        Field::Open,
        Field::High,
        Field::Low,
        Field::Close,
        Field::Volume,
        Field::Timestamp,
    ];

    pub fn from_name(name: &str) -> Option<Field> {
        match name {
            "open" => Some(Field::Open),
            "high" => Some(Field::High),
            "low" => Some(Field::Low),
            "close" => Some(Field::Close),
            "volume" => Some(Field::Volume),
            "timestamp" => Some(Field::Timestamp),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Field::Open => "open",
            Field::High => "high",
            Field::Low => "low",
            Field::Close => "close",
            Field::Volume => "volume",
            Field::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Pow => "**",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }

    /// Operators whose operands may be swapped without changing the result.
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            BinaryOp::Add
                | BinaryOp::Mul
                | BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::And
                | BinaryOp::Or
        )
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A keyword argument in a call, e.g. `window=20`.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordArg {
    pub name: String,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(f64),
    Ident(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
        kwargs: Vec<KeywordArg>,
    },
}

/// Size metrics of a tree, gathered without recursion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExprShape {
    pub nodes: usize,
    pub depth: usize,
}

impl Expr {
    pub fn unary(op: UnaryOp, operand: Expr) -> Expr {
        Expr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Node count and depth. Uses an explicit stack so that hand-built trees
    /// of any depth can be measured safely before a recursive walk.
    pub fn shape(&self) -> ExprShape {
        let mut nodes = 0;
        let mut depth = 0;
        let mut stack = vec![(self, 1usize)];
        while let Some((expr, level)) = stack.pop() {
            nodes += 1;
            depth = depth.max(level);
            match expr {
                Expr::Literal(_) | Expr::Ident(_) => {}
                Expr::Unary { operand, .. } => stack.push((operand, level + 1)),
                Expr::Binary { left, right, .. } => {
                    stack.push((left, level + 1));
                    stack.push((right, level + 1));
                }
                Expr::Call { args, kwargs, .. } => {
                    stack.extend(args.iter().map(|a| (a, level + 1)));
                    stack.extend(kwargs.iter().map(|kw| (&kw.value, level + 1)));
                }
            }
        }
        ExprShape { nodes, depth }
    }

    /// All identifiers in the tree, in first-seen order.
    pub fn identifiers(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        let mut stack = vec![self];
        while let Some(expr) = stack.pop() {
            match expr {
                Expr::Literal(_) => {}
                Expr::Ident(name) => {
                    if !out.contains(&name.as_str()) {
                        out.push(name);
                    }
                }
                Expr::Unary { operand, .. } => stack.push(operand),
                Expr::Binary { left, right, .. } => {
                    stack.push(right);
                    stack.push(left);
                }
                Expr::Call { args, kwargs, .. } => {
                    stack.extend(kwargs.iter().rev().map(|kw| &kw.value));
                    stack.extend(args.iter().rev());
                }
            }
        }
        out
    }
}

/// Shortest decimal text that parses back to the same value.
pub fn format_number(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    format!("{}", value)
}

/// Fully parenthesised source text; parsing it yields an equivalent tree.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(v) if *v < 0.0 => write!(f, "(-{})", format_number(-v)),
            Expr::Literal(v) => f.write_str(&format_number(*v)),
            Expr::Ident(name) => f.write_str(name),
            Expr::Unary {
                op: UnaryOp::Neg,
                operand,
            } => write!(f, "(-{})", operand),
            Expr::Unary {
                op: UnaryOp::Not,
                operand,
            } => write!(f, "(not {})", operand),
            Expr::Binary { op, left, right } => write!(f, "({} {} {})", left, op, right),
            Expr::Call { name, args, kwargs } => {
                write!(f, "{}(", name)?;
                let mut first = true;
                for arg in args {
                    if !first {
                        f.write_str(", ")?;
                    }
                    first = false;
                    write!(f, "{}", arg)?;
                }
                for kw in kwargs {
                    if !first {
                        f.write_str(", ")?;
                    }
                    first = false;
                    write!(f, "{}={}", kw.name, kw.value)?;
                }
                f.write_str(")")
            }
        }
    }
}
