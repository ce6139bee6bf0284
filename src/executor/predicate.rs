//! Row predicates evaluated by the filtering operators.

use crate::access::Value;
use anyhow::{bail, Result};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    fn matches(&self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::NotEq => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::LtEq => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::GtEq => ordering != Ordering::Less,
        }
    }
}

/// A boolean expression over a row. Comparisons involving NULL or
/// mismatched types evaluate to false, never to an error.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// column <op> constant
    Compare {
        column: usize,
        op: CompareOp,
        value: Value,
    },
    /// column <op> column, both indexes into the same row (a join row is
    /// the left tuple's columns followed by the right tuple's).
    ColumnCompare {
        left: usize,
        op: CompareOp,
        right: usize,
    },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
}

impl Predicate {
    pub fn evaluate(&self, values: &[Value]) -> Result<bool> {
        match self {
            Predicate::Compare { column, op, value } => {
                let lhs = column_value(values, *column)?;
                Ok(lhs.compare(value).is_some_and(|o| op.matches(o)))
            }
            Predicate::ColumnCompare { left, op, right } => {
                let lhs = column_value(values, *left)?;
                let rhs = column_value(values, *right)?;
                Ok(lhs.compare(rhs).is_some_and(|o| op.matches(o)))
            }
            Predicate::And(a, b) => Ok(a.evaluate(values)? && b.evaluate(values)?),
            Predicate::Or(a, b) => Ok(a.evaluate(values)? || b.evaluate(values)?),
        }
    }
}

fn column_value(values: &[Value], column: usize) -> Result<&Value> {
    match values.get(column) {
        Some(value) => Ok(value),
        None => bail!(
            "Column index {} out of range for a {}-column row",
            column,
            values.len()
        ),
    }
}
