//! Sequential scan executor.

use crate::access::heap::TableIterator;
use crate::access::Tuple;
use crate::catalog::TableInfo;
use crate::executor::predicate::Predicate;
use crate::executor::{ColumnInfo, ExecutionContext, Executor};
use anyhow::{bail, Result};
use std::sync::Arc;

/// Full-table scan with an optional filter, projecting through the
/// table's schema.
pub struct SeqScanExecutor {
    table_name: String,
    predicate: Option<Predicate>,
    context: ExecutionContext,
    table: Option<Arc<TableInfo>>,
    iterator: Option<TableIterator>,
    output_schema: Vec<ColumnInfo>,
}

impl SeqScanExecutor {
    pub fn new(
        table_name: impl Into<String>,
        predicate: Option<Predicate>,
        context: ExecutionContext,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            predicate,
            context,
            table: None,
            iterator: None,
            output_schema: Vec::new(),
        }
    }
}

impl Executor for SeqScanExecutor {
    fn init(&mut self) -> Result<()> {
        let table = self
            .context
            .catalog
            .get_table(&self.table_name)
            .ok_or_else(|| anyhow::anyhow!("Table '{}' not found", self.table_name))?;
        self.output_schema = table.schema.clone();
        self.iterator = Some(table.heap.iter());
        self.table = Some(table);
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        let Some(iterator) = self.iterator.as_mut() else {
            bail!("Executor not initialized. Call init() first.");
        };

        while let Some((tuple_id, data)) = iterator.next()? {
            let tuple = Tuple::from_bytes(tuple_id, &data)?;
            if let Some(predicate) = &self.predicate {
                if !predicate.evaluate(&tuple.values)? {
                    continue;
                }
            }
            return Ok(Some(tuple));
        }
        Ok(None)
    }

    fn output_schema(&self) -> &[ColumnInfo] {
        &self.output_schema
    }
}
