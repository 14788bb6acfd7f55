//! Backend-neutral predicate trees.
//!
//! A [`Predicate`] is evaluated in memory by [`Predicate::matches`] and
//! translated into native queries by backends that push filtering down.
//! Both paths must agree on the semantics below:
//!
//! - a missing property reads as `null`
//! - equality compares JSON values, with numbers compared numerically
//! - ordering comparisons hold only between two numbers or two strings
//! - every predicate evaluates to `true` or `false`, never "unknown"

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ArgumentError, RepositoryResult};
use crate::model::{FieldValues, lookup_path};

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    /// Equal.
    Eq,
    /// Not equal. Also matches absent and null values.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
}

impl CompareOp {
    /// Returns the SQL spelling of ordering operators.
    pub fn as_sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

/// A composable, side-effect-free condition over an aggregate's fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// Matches everything.
    #[default]
    True,
    /// Matches nothing.
    False,
    /// Compares the value at `path` with a constant.
    Compare {
        path: String,
        cmp: CompareOp,
        value: Value,
    },
    /// Matches when the value at `path` equals any of the given values.
    In { path: String, values: Vec<Value> },
    /// Matches when the value at `path` is null or absent.
    IsNull { path: String },
    /// Matches when the value at `path` is a string containing `needle`.
    Contains { path: String, needle: String },
    /// All children match.
    And(Vec<Predicate>),
    /// At least one child matches.
    Or(Vec<Predicate>),
    /// The child does not match.
    Not(Box<Predicate>),
}

impl Predicate {
    fn compare(path: impl Into<String>, cmp: CompareOp, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            path: path.into(),
            cmp,
            value: value.into(),
        }
    }

    /// `path == value`
    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(path, CompareOp::Eq, value)
    }

    /// `path != value`
    pub fn ne(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(path, CompareOp::Ne, value)
    }

    /// `path < value`
    pub fn lt(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(path, CompareOp::Lt, value)
    }

    /// `path <= value`
    pub fn le(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(path, CompareOp::Le, value)
    }

    /// `path > value`
    pub fn gt(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(path, CompareOp::Gt, value)
    }

    /// `path >= value`
    pub fn ge(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(path, CompareOp::Ge, value)
    }

    /// Membership in a fixed set of values.
    pub fn is_in<I, V>(path: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Predicate::In {
            path: path.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Null or absent.
    pub fn is_null(path: impl Into<String>) -> Self {
        Predicate::IsNull { path: path.into() }
    }

    /// Substring match on string values.
    pub fn contains(path: impl Into<String>, needle: impl Into<String>) -> Self {
        Predicate::Contains {
            path: path.into(),
            needle: needle.into(),
        }
    }

    /// Conjunction, folding constant operands.
    pub fn and(self, other: Predicate) -> Predicate {
        match (self, other) {
            (Predicate::True, p) | (p, Predicate::True) => p,
            (Predicate::False, _) | (_, Predicate::False) => Predicate::False,
            (Predicate::And(mut left), Predicate::And(right)) => {
                left.extend(right);
                Predicate::And(left)
            }
            (Predicate::And(mut left), p) => {
                left.push(p);
                Predicate::And(left)
            }
            (p, Predicate::And(mut right)) => {
                right.insert(0, p);
                Predicate::And(right)
            }
            (left, right) => Predicate::And(vec![left, right]),
        }
    }

    /// Disjunction, folding constant operands.
    pub fn or(self, other: Predicate) -> Predicate {
        match (self, other) {
            (Predicate::False, p) | (p, Predicate::False) => p,
            (Predicate::True, _) | (_, Predicate::True) => Predicate::True,
            (Predicate::Or(mut left), Predicate::Or(right)) => {
                left.extend(right);
                Predicate::Or(left)
            }
            (Predicate::Or(mut left), p) => {
                left.push(p);
                Predicate::Or(left)
            }
            (p, Predicate::Or(mut right)) => {
                right.insert(0, p);
                Predicate::Or(right)
            }
            (left, right) => Predicate::Or(vec![left, right]),
        }
    }

    /// Negation, folding constants and double negation.
    pub fn negate(self) -> Predicate {
        match self {
            Predicate::True => Predicate::False,
            Predicate::False => Predicate::True,
            Predicate::Not(inner) => *inner,
            p => Predicate::Not(Box::new(p)),
        }
    }

    /// Returns true if this predicate matches everything.
    pub fn is_trivial(&self) -> bool {
        matches!(self, Predicate::True)
    }

    /// Checks that every property path is well formed.
    pub fn validate(&self) -> RepositoryResult<()> {
        match self {
            Predicate::True | Predicate::False => Ok(()),
            Predicate::Compare { path, .. }
            | Predicate::In { path, .. }
            | Predicate::IsNull { path }
            | Predicate::Contains { path, .. } => validate_path(path, "predicate"),
            Predicate::And(children) | Predicate::Or(children) => {
                children.iter().try_for_each(Predicate::validate)
            }
            Predicate::Not(inner) => inner.validate(),
        }
    }

    /// Evaluates the predicate against field values.
    pub fn matches(&self, fields: &FieldValues) -> bool {
        match self {
            Predicate::True => true,
            Predicate::False => false,
            Predicate::Compare { path, cmp, value } => {
                let actual = lookup_path(fields, path).unwrap_or(&Value::Null);
                compare_matches(actual, *cmp, value)
            }
            Predicate::In { path, values } => {
                let actual = lookup_path(fields, path).unwrap_or(&Value::Null);
                values.iter().any(|v| json_equal(actual, v))
            }
            Predicate::IsNull { path } => {
                matches!(lookup_path(fields, path), None | Some(Value::Null))
            }
            Predicate::Contains { path, needle } => matches!(
                lookup_path(fields, path),
                Some(Value::String(s)) if s.contains(needle.as_str())
            ),
            Predicate::And(children) => children.iter().all(|c| c.matches(fields)),
            Predicate::Or(children) => children.iter().any(|c| c.matches(fields)),
            Predicate::Not(inner) => !inner.matches(fields),
        }
    }
}

/// Rejects empty paths and empty path segments.
pub(crate) fn validate_path(path: &str, context: &str) -> RepositoryResult<()> {
    if path.is_empty() || path.split('.').any(str::is_empty) {
        return Err(ArgumentError::EmptyProperty {
            context: format!("{} path '{}'", context, path),
        }
        .into());
    }
    Ok(())
}

fn compare_matches(actual: &Value, cmp: CompareOp, expected: &Value) -> bool {
    match cmp {
        CompareOp::Eq => json_equal(actual, expected),
        CompareOp::Ne => !json_equal(actual, expected),
        CompareOp::Lt => ordering(actual, expected) == Some(Ordering::Less),
        CompareOp::Le => matches!(
            ordering(actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        CompareOp::Gt => ordering(actual, expected) == Some(Ordering::Greater),
        CompareOp::Ge => matches!(
            ordering(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
    }
}

/// JSON equality with numbers compared by value (`50 == 50.0`).
pub(crate) fn json_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            number_ordering(x, y) == Some(Ordering::Equal)
        }
        _ => a == b,
    }
}

/// Ordering between two numbers or two strings; `None` for any other pairing.
fn ordering(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => number_ordering(x, y),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn number_ordering(x: &serde_json::Number, y: &serde_json::Number) -> Option<Ordering> {
    match (x.as_i64(), y.as_i64()) {
        (Some(a), Some(b)) => Some(a.cmp(&b)),
        _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
    }
}

/// Total order used for sorting.
///
/// Nulls sort first, then booleans and numbers (booleans as 0/1), then
/// strings; arrays and objects sort as their JSON text among the strings.
pub(crate) fn sort_ordering(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) | Value::Number(_) => 1,
            _ => 2,
        }
    }

    fn numeric(v: &Value) -> f64 {
        match v {
            Value::Bool(true) => 1.0,
            Value::Number(n) => n.as_f64().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    fn text(v: &Value) -> String {
        match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    match rank(a).cmp(&rank(b)) {
        Ordering::Equal => match rank(a) {
            0 => Ordering::Equal,
            1 => match (a, b) {
                (Value::Number(x), Value::Number(y)) => {
                    number_ordering(x, y).unwrap_or(Ordering::Equal)
                }
                _ => numeric(a).total_cmp(&numeric(b)),
            },
            _ => text(a).cmp(&text(b)),
        },
        other => other,
    }
}
