//! Filtered projection: applies an optional predicate to the child's
//! rows and narrows them to the selected columns.

use crate::access::Tuple;
use crate::executor::predicate::Predicate;
use crate::executor::{ColumnInfo, Executor};
use anyhow::{bail, Result};

pub struct ProjectionExecutor {
    child: Box<dyn Executor>,
    predicate: Option<Predicate>,
    /// Child column indexes making up the output row, in order.
    columns: Vec<usize>,
    output_schema: Vec<ColumnInfo>,
}

impl ProjectionExecutor {
    pub fn new(child: Box<dyn Executor>, predicate: Option<Predicate>, columns: Vec<usize>) -> Self {
        Self {
            child,
            predicate,
            columns,
            output_schema: Vec::new(),
        }
    }
}

impl Executor for ProjectionExecutor {
    fn init(&mut self) -> Result<()> {
        self.child.init()?;
        let child_schema = self.child.output_schema();
        self.output_schema = Vec::with_capacity(self.columns.len());
        for &column in &self.columns {
            let Some(column_info) = child_schema.get(column) else {
                bail!("Projected column {} out of range", column);
            };
            self.output_schema.push(column_info.clone());
        }
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        while let Some(tuple) = self.child.next()? {
            // The filter sees the full child row; projection follows.
            if let Some(predicate) = &self.predicate {
                if !predicate.evaluate(&tuple.values)? {
                    continue;
                }
            }
            let projected = self
                .columns
                .iter()
                .map(|&column| tuple.values[column].clone())
                .collect();
            return Ok(Some(Tuple::new(tuple.tuple_id, projected)));
        }
        Ok(None)
    }

    fn output_schema(&self) -> &[ColumnInfo] {
        &self.output_schema
    }
}
