//! Hash aggregation with GROUP BY and an optional HAVING filter.
//!
//! The first `next()` drains the child into a hash table keyed by the
//! group-by tuple; output rows are the group-by values followed by one
//! column per aggregate, emitted in the hash table's iteration order
//! (unspecified to the caller).

use crate::access::{serialize_values, DataType, Tuple, Value};
use crate::executor::predicate::Predicate;
use crate::executor::{ColumnInfo, Executor};
use anyhow::{bail, Result};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    /// COUNT(expr); counts non-NULL values.
    Count,
    Sum,
    Min,
    Max,
}

impl AggregateFunction {
    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
        }
    }

    pub fn output_type(&self, input_type: DataType) -> DataType {
        match self {
            AggregateFunction::Count => DataType::Int32,
            _ => input_type,
        }
    }
}

/// One aggregate computation over a child column.
#[derive(Debug, Clone)]
pub struct AggregateSpec {
    pub function: AggregateFunction,
    pub column: usize,
}

impl AggregateSpec {
    pub fn new(function: AggregateFunction, column: usize) -> Self {
        Self { function, column }
    }
}

/// Running state for one aggregate within one group.
#[derive(Debug, Clone, Default)]
struct AggregateState {
    count: i32,
    sum: Option<i32>,
    min: Option<Value>,
    max: Option<Value>,
}

impl AggregateState {
    fn update(&mut self, value: &Value) {
        if matches!(value, Value::Null) {
            return;
        }
        self.count += 1;
        if let Value::Int32(n) = value {
            self.sum = Some(self.sum.unwrap_or(0) + n);
        }
        match &self.min {
            Some(current) if value.compare(current) != Some(std::cmp::Ordering::Less) => {}
            _ => self.min = Some(value.clone()),
        }
        match &self.max {
            Some(current) if value.compare(current) != Some(std::cmp::Ordering::Greater) => {}
            _ => self.max = Some(value.clone()),
        }
    }

    fn finalize(&self, function: AggregateFunction) -> Value {
        match function {
            AggregateFunction::Count => Value::Int32(self.count),
            AggregateFunction::Sum => self.sum.map(Value::Int32).unwrap_or(Value::Null),
            AggregateFunction::Min => self.min.clone().unwrap_or(Value::Null),
            AggregateFunction::Max => self.max.clone().unwrap_or(Value::Null),
        }
    }
}

pub struct HashAggregateExecutor {
    child: Box<dyn Executor>,
    group_by: Vec<usize>,
    aggregates: Vec<AggregateSpec>,
    /// Evaluated over the output row (group-by values then aggregates).
    having: Option<Predicate>,
    output_schema: Vec<ColumnInfo>,
    results: Option<std::vec::IntoIter<Vec<Value>>>,
}

impl HashAggregateExecutor {
    pub fn new(
        child: Box<dyn Executor>,
        group_by: Vec<usize>,
        aggregates: Vec<AggregateSpec>,
        having: Option<Predicate>,
    ) -> Self {
        Self {
            child,
            group_by,
            aggregates,
            having,
            output_schema: Vec::new(),
            results: None,
        }
    }

    fn build(&mut self) -> Result<std::vec::IntoIter<Vec<Value>>> {
        let mut groups: HashMap<Vec<u8>, (Vec<Value>, Vec<AggregateState>)> = HashMap::new();

        while let Some(tuple) = self.child.next()? {
            let group_values: Vec<Value> = self
                .group_by
                .iter()
                .map(|&column| tuple.values[column].clone())
                .collect();
            let group_key = serialize_values(&group_values)?;
            let entry = groups.entry(group_key).or_insert_with(|| {
                (
                    group_values,
                    vec![AggregateState::default(); self.aggregates.len()],
                )
            });
            for (state, spec) in entry.1.iter_mut().zip(self.aggregates.iter()) {
                state.update(&tuple.values[spec.column]);
            }
        }

        // A global aggregation over zero rows still produces one row.
        if groups.is_empty() && self.group_by.is_empty() {
            groups.insert(
                serialize_values(&[])?,
                (Vec::new(), vec![AggregateState::default(); self.aggregates.len()]),
            );
        }

        let mut output = Vec::with_capacity(groups.len());
        for (_, (group_values, states)) in groups {
            let mut row = group_values;
            for (state, spec) in states.iter().zip(self.aggregates.iter()) {
                row.push(state.finalize(spec.function));
            }
            if let Some(having) = &self.having {
                if !having.evaluate(&row)? {
                    continue;
                }
            }
            output.push(row);
        }
        Ok(output.into_iter())
    }
}

impl Executor for HashAggregateExecutor {
    fn init(&mut self) -> Result<()> {
        self.child.init()?;

        let child_schema = self.child.output_schema();
        self.output_schema = Vec::with_capacity(self.group_by.len() + self.aggregates.len());
        for &column in &self.group_by {
            let Some(column_info) = child_schema.get(column) else {
                bail!("Group-by column {} out of range", column);
            };
            self.output_schema.push(column_info.clone());
        }
        for spec in &self.aggregates {
            let Some(column_info) = child_schema.get(spec.column) else {
                bail!("Aggregate column {} out of range", spec.column);
            };
            self.output_schema.push(ColumnInfo::new(
                format!("{}({})", spec.function.name(), column_info.name),
                spec.function.output_type(column_info.data_type),
            ));
        }

        self.results = None;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        if self.results.is_none() {
            self.results = Some(self.build()?);
        }
        Ok(self
            .results
            .as_mut()
            .and_then(|results| results.next())
            .map(Tuple::from_values))
    }

    fn output_schema(&self) -> &[ColumnInfo] {
        &self.output_schema
    }
}
