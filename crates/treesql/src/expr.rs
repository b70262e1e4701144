//! Compiled expressions and their row-at-a-time evaluation.
use std::cmp::Ordering;
use std::fmt;

use indexmap::IndexMap;
use treestore::ScalarValue;

use crate::errors::{Result, TreeSqlError, internal};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Plus,
    Minus,
    Not,
}

impl fmt::Display for UnaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plus => write!(f, "+"),
            Self::Minus => write!(f, "-"),
            Self::Not => write!(f, "NOT "),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    /// Right side must evaluate to a tuple.
    In,
    NotIn,
}

impl BinaryOperator {
    pub const fn is_comparison(&self) -> bool {
        matches!(
            self,
            Self::Eq | Self::NotEq | Self::Lt | Self::LtEq | Self::Gt | Self::GtEq
        )
    }

    pub const fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            Self::Plus | Self::Minus | Self::Multiply | Self::Divide | Self::Modulo
        )
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eq => write!(f, "="),
            Self::NotEq => write!(f, "!="),
            Self::Lt => write!(f, "<"),
            Self::LtEq => write!(f, "<="),
            Self::Gt => write!(f, ">"),
            Self::GtEq => write!(f, ">="),
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
            Self::Plus => write!(f, "+"),
            Self::Minus => write!(f, "-"),
            Self::Multiply => write!(f, "*"),
            Self::Divide => write!(f, "/"),
            Self::Modulo => write!(f, "%"),
            Self::In => write!(f, "IN"),
            Self::NotIn => write!(f, "NOT IN"),
        }
    }
}

/// An immutable expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Reference to a column of the current row.
    Column(String),
    /// Zero-based index into the bound arguments.
    Placeholder(usize),
    Unary {
        op: UnaryOperator,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOperator,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Tuple(Vec<Expr>),
}

impl Expr {
    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn column(name: impl Into<String>) -> Self {
        Expr::Column(name.into())
    }

    pub fn unary(op: UnaryOperator, expr: Expr) -> Self {
        Expr::Unary {
            op,
            expr: Box::new(expr),
        }
    }

    pub fn binary(op: BinaryOperator, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Evaluate this expression against a row.
    ///
    /// Both sides of a binary expression are always evaluated, left first.
    pub fn eval(&self, row: &RowContext, args: &[Value]) -> Result<Value> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Column(name) => row
                .get(name)
                .cloned()
                .ok_or_else(|| internal!("column {name:?} missing from row context")),
            Expr::Placeholder(idx) => args.get(*idx).cloned().ok_or_else(|| {
                TreeSqlError::InvalidArgument(format!(
                    "missing bound argument {} (got {} arguments)",
                    idx + 1,
                    args.len()
                ))
            }),
            Expr::Unary { op, expr } => {
                let v = expr.eval(row, args)?;
                eval_unary(*op, v)
            }
            Expr::Binary { op, left, right } => {
                let l = left.eval(row, args)?;
                let r = right.eval(row, args)?;
                eval_binary(*op, l, r)
            }
            Expr::Tuple(exprs) => {
                let vals = exprs
                    .iter()
                    .map(|e| e.eval(row, args))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::Tuple(vals))
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::Column(name) => write!(f, "{name}"),
            Expr::Placeholder(idx) => write!(f, "${}", idx + 1),
            Expr::Unary { op, expr } => write!(f, "{op}{expr}"),
            Expr::Binary { op, left, right } => write!(f, "({left} {op} {right})"),
            Expr::Tuple(exprs) => {
                write!(f, "(")?;
                for (i, e) in exprs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Decoded values of the current row, keyed by column name.
///
/// Columns keep their insertion order, which matches the order they were
/// requested from storage.
#[derive(Debug, Clone, Default)]
pub struct RowContext {
    values: IndexMap<String, Value>,
}

impl RowContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Replace the row's values with freshly decoded storage values.
    ///
    /// Names are only copied the first time, later rows overwrite values in
    /// place.
    pub fn fill(&mut self, names: &[String], values: &[ScalarValue]) -> Result<()> {
        if names.len() != values.len() {
            return Err(internal!(
                "scan produced {} values for {} columns",
                values.len(),
                names.len()
            ));
        }

        let reuse = self.values.len() == names.len()
            && self.values.keys().zip(names).all(|(a, b)| a == b);
        if !reuse {
            self.values.clear();
            for (name, value) in names.iter().zip(values) {
                self.values.insert(name.clone(), Value::from(value));
            }
            return Ok(());
        }

        for (slot, value) in self.values.values_mut().zip(values) {
            *slot = Value::from(value);
        }
        Ok(())
    }
}

fn type_error(op: impl fmt::Display, l: &Value, r: &Value) -> TreeSqlError {
    TreeSqlError::Type(format!(
        "operator {op} not defined for {} and {}",
        l.type_name(),
        r.type_name()
    ))
}

fn eval_unary(op: UnaryOperator, v: Value) -> Result<Value> {
    match (op, v) {
        (UnaryOperator::Not, Value::Boolean(b)) => Ok(Value::Boolean(!b)),
        (UnaryOperator::Plus, v) if v.is_numeric() => Ok(v),
        (UnaryOperator::Minus, Value::Int64(v)) => v
            .checked_neg()
            .map(Value::Int64)
            .ok_or_else(|| TreeSqlError::Eval(format!("integer overflow negating {v}"))),
        (UnaryOperator::Minus, Value::UInt64(v)) => i64::try_from(-(v as i128))
            .map(Value::Int64)
            .map_err(|_| TreeSqlError::Eval(format!("integer overflow negating {v}"))),
        (UnaryOperator::Minus, Value::Float64(v)) => Ok(Value::Float64(-v)),
        (op, v) => Err(TreeSqlError::Type(format!(
            "operator {op} not defined for {}",
            v.type_name()
        ))),
    }
}

fn eval_binary(op: BinaryOperator, l: Value, r: Value) -> Result<Value> {
    match op {
        BinaryOperator::And | BinaryOperator::Or => match (&l, &r) {
            (Value::Boolean(a), Value::Boolean(b)) => Ok(Value::Boolean(if op == BinaryOperator::And {
                *a && *b
            } else {
                *a || *b
            })),
            _ => Err(type_error(op, &l, &r)),
        },
        BinaryOperator::In | BinaryOperator::NotIn => {
            let Value::Tuple(list) = &r else {
                return Err(TreeSqlError::Eval(format!(
                    "right side of {op} must be a list, got {}",
                    r.type_name()
                )));
            };
            let mut found = false;
            for item in list {
                if compare(BinaryOperator::Eq, &l, item)? {
                    found = true;
                    break;
                }
            }
            Ok(Value::Boolean(found == (op == BinaryOperator::In)))
        }
        op if op.is_comparison() => compare(op, &l, &r).map(Value::Boolean),
        op => arithmetic(op, l, r),
    }
}

fn compare(op: BinaryOperator, l: &Value, r: &Value) -> Result<bool> {
    let comparable = match (l, r) {
        (Value::Utf8(_), Value::Utf8(_)) | (Value::Binary(_), Value::Binary(_)) => true,
        (Value::Boolean(_), Value::Boolean(_)) => {
            matches!(op, BinaryOperator::Eq | BinaryOperator::NotEq)
        }
        (l, r) => l.is_numeric() && r.is_numeric(),
    };
    if !comparable {
        return Err(type_error(op, l, r));
    }

    // `None` only happens for NaN at this point.
    let ord = l.partial_compare(r);
    Ok(match op {
        BinaryOperator::Eq => ord == Some(Ordering::Equal),
        BinaryOperator::NotEq => ord != Some(Ordering::Equal),
        BinaryOperator::Lt => ord == Some(Ordering::Less),
        BinaryOperator::LtEq => matches!(ord, Some(Ordering::Less | Ordering::Equal)),
        BinaryOperator::Gt => ord == Some(Ordering::Greater),
        BinaryOperator::GtEq => matches!(ord, Some(Ordering::Greater | Ordering::Equal)),
        other => return Err(internal!("{other} is not a comparison operator")),
    })
}

fn arithmetic(op: BinaryOperator, l: Value, r: Value) -> Result<Value> {
    if !op.is_arithmetic() {
        return Err(internal!("{op} is not an arithmetic operator"));
    }
    if !l.is_numeric() || !r.is_numeric() {
        return Err(type_error(op, &l, &r));
    }

    let overflow = || TreeSqlError::Eval(format!("integer overflow evaluating {l} {op} {r}"));

    match (&l, &r) {
        (Value::Float64(_), _) | (_, Value::Float64(_)) => {
            // Checked above, both sides convert.
            let (a, b) = (l.as_f64().unwrap_or_default(), r.as_f64().unwrap_or_default());
            Ok(Value::Float64(match op {
                BinaryOperator::Plus => a + b,
                BinaryOperator::Minus => a - b,
                BinaryOperator::Multiply => a * b,
                BinaryOperator::Divide => a / b,
                _ => a % b,
            }))
        }
        (Value::UInt64(a), Value::UInt64(b)) => {
            let (a, b) = (*a, *b);
            if b == 0 && matches!(op, BinaryOperator::Divide | BinaryOperator::Modulo) {
                return Err(TreeSqlError::Eval("integer division by zero".to_string()));
            }
            let v = match op {
                BinaryOperator::Plus => a.checked_add(b),
                BinaryOperator::Minus => a.checked_sub(b),
                BinaryOperator::Multiply => a.checked_mul(b),
                BinaryOperator::Divide => a.checked_div(b),
                _ => a.checked_rem(b),
            };
            v.map(Value::UInt64).ok_or_else(overflow)
        }
        _ => {
            let a = to_i64(&l).ok_or_else(overflow)?;
            let b = to_i64(&r).ok_or_else(overflow)?;
            if b == 0 && matches!(op, BinaryOperator::Divide | BinaryOperator::Modulo) {
                return Err(TreeSqlError::Eval("integer division by zero".to_string()));
            }
            let v = match op {
                BinaryOperator::Plus => a.checked_add(b),
                BinaryOperator::Minus => a.checked_sub(b),
                BinaryOperator::Multiply => a.checked_mul(b),
                BinaryOperator::Divide => a.checked_div(b),
                _ => a.checked_rem(b),
            };
            v.map(Value::Int64).ok_or_else(overflow)
        }
    }
}

fn to_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Int64(v) => Some(*v),
        Value::UInt64(v) => i64::try_from(*v).ok(),
        _ => None,
    }
}
