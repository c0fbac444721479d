//! Typed queries: a predicate tree plus sort, offset and limit.
//!
//! Predicates are evaluated per record in memory; the planner in
//! [`plan`] decides which conjuncts can be served by an index scan
//! instead, and [`exec`] runs whichever path wins and finishes the job
//! with the in-memory pipeline.

use std::cmp::Ordering;
use std::marker::PhantomData;

use lodestone_core::tuple::order_values;
use lodestone_core::{KeyPath, Record, StoreError, Value};

pub mod exec;
pub mod plan;

pub use plan::Bound;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    True,
    False,
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    Compare {
        path: KeyPath,
        op: CompareOp,
        value: Value,
    },
    In {
        path: KeyPath,
        values: Vec<Value>,
    },
    Contains {
        path: KeyPath,
        value: Value,
    },
    HasPrefix {
        path: KeyPath,
        prefix: String,
    },
    HasSuffix {
        path: KeyPath,
        suffix: String,
    },
    IsNull {
        path: KeyPath,
    },
    IsNotNull {
        path: KeyPath,
    },
}

impl Predicate {
    pub fn eq(path: KeyPath, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            path,
            op: CompareOp::Eq,
            value: value.into(),
        }
    }

    pub fn ne(path: KeyPath, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            path,
            op: CompareOp::Ne,
            value: value.into(),
        }
    }

    pub fn lt(path: KeyPath, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            path,
            op: CompareOp::Lt,
            value: value.into(),
        }
    }

    pub fn le(path: KeyPath, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            path,
            op: CompareOp::Le,
            value: value.into(),
        }
    }

    pub fn gt(path: KeyPath, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            path,
            op: CompareOp::Gt,
            value: value.into(),
        }
    }

    pub fn ge(path: KeyPath, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            path,
            op: CompareOp::Ge,
            value: value.into(),
        }
    }

    pub fn is_in(path: KeyPath, values: Vec<Value>) -> Self {
        Predicate::In { path, values }
    }

    pub fn contains(path: KeyPath, value: impl Into<Value>) -> Self {
        Predicate::Contains {
            path,
            value: value.into(),
        }
    }

    pub fn has_prefix(path: KeyPath, prefix: impl Into<String>) -> Self {
        Predicate::HasPrefix {
            path,
            prefix: prefix.into(),
        }
    }

    pub fn has_suffix(path: KeyPath, suffix: impl Into<String>) -> Self {
        Predicate::HasSuffix {
            path,
            suffix: suffix.into(),
        }
    }

    pub fn is_null(path: KeyPath) -> Self {
        Predicate::IsNull { path }
    }

    pub fn is_not_null(path: KeyPath) -> Self {
        Predicate::IsNotNull { path }
    }

    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And(mut children) => {
                children.push(other);
                Predicate::And(children)
            }
            first => Predicate::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Or(mut children) => {
                children.push(other);
                Predicate::Or(children)
            }
            first => Predicate::Or(vec![first, other]),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    /// Evaluate against one record.
    pub fn matches<R: Record>(&self, record: &R) -> Result<bool, StoreError> {
        match self {
            Predicate::True => Ok(true),
            Predicate::False => Ok(false),
            Predicate::And(children) => {
                for child in children {
                    if !child.matches(record)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Predicate::Or(children) => {
                for child in children {
                    if child.matches(record)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Predicate::Not(child) => Ok(!child.matches(record)?),
            Predicate::Compare { path, op, value } => {
                let field = field_value(record, path)?;
                Ok(match op {
                    CompareOp::Eq => values_equal(&field, value),
                    CompareOp::Ne => !values_equal(&field, value),
                    CompareOp::Lt => {
                        matches!(compare_values(&field, value), Some(Ordering::Less))
                    }
                    CompareOp::Le => matches!(
                        compare_values(&field, value),
                        Some(Ordering::Less | Ordering::Equal)
                    ),
                    CompareOp::Gt => {
                        matches!(compare_values(&field, value), Some(Ordering::Greater))
                    }
                    CompareOp::Ge => matches!(
                        compare_values(&field, value),
                        Some(Ordering::Greater | Ordering::Equal)
                    ),
                })
            }
            Predicate::In { path, values } => {
                let field = field_value(record, path)?;
                Ok(values.iter().any(|value| values_equal(&field, value)))
            }
            Predicate::Contains { path, value } => {
                let field = field_value(record, path)?;
                Ok(match (&field, value) {
                    (Value::Tuple(elements), needle) => {
                        elements.iter().any(|element| values_equal(element, needle))
                    }
                    (Value::Text(haystack), Value::Text(needle)) => haystack.contains(needle),
                    _ => false,
                })
            }
            Predicate::HasPrefix { path, prefix } => {
                Ok(matches!(field_value(record, path)?, Value::Text(text) if text.starts_with(prefix)))
            }
            Predicate::HasSuffix { path, suffix } => {
                Ok(matches!(field_value(record, path)?, Value::Text(text) if text.ends_with(suffix)))
            }
            Predicate::IsNull { path } => Ok(matches!(field_value(record, path)?, Value::Null)),
            Predicate::IsNotNull { path } => Ok(!matches!(field_value(record, path)?, Value::Null)),
        }
    }
}

fn field_value<R: Record>(record: &R, path: &str) -> Result<Value, StoreError> {
    record
        .extract(path)
        .ok_or_else(|| StoreError::validation(format!("{} has no field named {path}", R::TYPE)))
}

/// Ordering between two field values: null sorts smallest, numerics compare
/// across int/double, mismatched types are incomparable.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Null, _) => Some(Ordering::Less),
        (_, Value::Null) => Some(Ordering::Greater),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Int(_) | Value::Double(_), Value::Int(_) | Value::Double(_)) => {
            let x = as_double(a);
            let y = as_double(b);
            Some(order_doubles(x, y))
        }
        (Value::Bytes(x), Value::Bytes(y)) => Some(x.cmp(y)),
        (Value::Text(x), Value::Text(y)) => Some(x.cmp(y)),
        (Value::Tuple(_), Value::Tuple(_)) => Some(order_values(a, b)),
        _ => None,
    }
}

fn as_double(value: &Value) -> f64 {
    match value {
        Value::Int(v) => *v as f64,
        Value::Double(v) => *v,
        _ => unreachable!("caller checked the variant"),
    }
}

/// Total order on doubles matching the tuple encoding (negative NaN first,
/// positive NaN last).
fn order_doubles(a: f64, b: f64) -> Ordering {
    lodestone_core::tuple::transform_double(a).cmp(&lodestone_core::tuple::transform_double(b))
}

pub fn values_equal(a: &Value, b: &Value) -> bool {
    compare_values(a, b) == Some(Ordering::Equal)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortDescriptor {
    pub path: KeyPath,
    pub ascending: bool,
}

impl SortDescriptor {
    pub fn ascending(path: KeyPath) -> Self {
        Self {
            path,
            ascending: true,
        }
    }

    pub fn descending(path: KeyPath) -> Self {
        Self {
            path,
            ascending: false,
        }
    }
}

/// A typed query over records of `R`.
#[derive(Debug, Clone)]
pub struct Query<R> {
    pub(crate) predicate: Predicate,
    pub(crate) sorts: Vec<SortDescriptor>,
    pub(crate) offset: usize,
    pub(crate) limit: Option<usize>,
    _marker: PhantomData<fn() -> R>,
}

impl<R: Record> Default for Query<R> {
    fn default() -> Self {
        Self::all()
    }
}

impl<R: Record> Query<R> {
    pub fn all() -> Self {
        Self::filter(Predicate::True)
    }

    pub fn filter(predicate: Predicate) -> Self {
        Self {
            predicate,
            sorts: Vec::new(),
            offset: 0,
            limit: None,
            _marker: PhantomData,
        }
    }

    pub fn sort_by(mut self, sort: SortDescriptor) -> Self {
        self.sorts.push(sort);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }
}
