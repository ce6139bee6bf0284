//! Delete executor: marks the child's rows deleted in the heap and
//! removes their derived keys from every index.

use crate::access::{Tuple, Value};
use crate::catalog::{IndexInfo, TableInfo};
use crate::executor::{ColumnInfo, ExecutionContext, Executor};
use crate::storage::error::EngineError;
use anyhow::{bail, Result};
use std::sync::Arc;

pub struct DeleteExecutor {
    table_name: String,
    child: Box<dyn Executor>,
    context: ExecutionContext,
    table: Option<Arc<TableInfo>>,
    indexes: Vec<Arc<IndexInfo>>,
    output_schema: Vec<ColumnInfo>,
    done: bool,
}

impl DeleteExecutor {
    pub fn new(
        table_name: impl Into<String>,
        child: Box<dyn Executor>,
        context: ExecutionContext,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            child,
            context,
            table: None,
            indexes: Vec::new(),
            output_schema: vec![ColumnInfo::new("count", crate::access::DataType::Int32)],
            done: false,
        }
    }
}

impl Executor for DeleteExecutor {
    fn init(&mut self) -> Result<()> {
        let table = self
            .context
            .catalog
            .get_table(&self.table_name)
            .ok_or_else(|| anyhow::anyhow!("Table '{}' not found", self.table_name))?;
        self.child.init()?;
        self.indexes = self.context.catalog.table_indexes(&self.table_name);
        self.table = Some(table);
        self.done = false;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        let Some(table) = self.table.as_ref() else {
            bail!("Executor not initialized. Call init() first.");
        };
        if self.done {
            return Ok(None);
        }
        self.done = true;

        let mut count = 0;
        while let Some(tuple) = self.child.next()? {
            // The child handed us this row, so it must still exist.
            if !table.heap.mark_delete(tuple.tuple_id)? {
                return Err(EngineError::NotFound(format!(
                    "tuple {:?} vanished before delete",
                    tuple.tuple_id
                ))
                .into());
            }
            for index in &self.indexes {
                let key = index.build_key(&tuple.values)?;
                index
                    .index
                    .delete_entry(&key, &self.context.transaction)?;
            }
            count += 1;
        }

        Ok(Some(Tuple::from_values(vec![Value::Int32(count)])))
    }

    fn output_schema(&self) -> &[ColumnInfo] {
        &self.output_schema
    }
}
