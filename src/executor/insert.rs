//! Insert executor: writes rows into the table heap and derives an entry
//! for every index declared over the table.

use crate::access::{serialize_values, Tuple, Value};
use crate::catalog::{IndexInfo, TableInfo};
use crate::executor::{ColumnInfo, ExecutionContext, Executor};
use anyhow::{bail, Result};
use std::sync::Arc;

enum InsertSource {
    Rows(Vec<Vec<Value>>),
    Child(Box<dyn Executor>),
}

pub struct InsertExecutor {
    table_name: String,
    source: InsertSource,
    context: ExecutionContext,
    table: Option<Arc<TableInfo>>,
    indexes: Vec<Arc<IndexInfo>>,
    output_schema: Vec<ColumnInfo>,
    done: bool,
}

impl InsertExecutor {
    /// Insert raw value rows.
    pub fn new(
        table_name: impl Into<String>,
        rows: Vec<Vec<Value>>,
        context: ExecutionContext,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            source: InsertSource::Rows(rows),
            context,
            table: None,
            indexes: Vec::new(),
            output_schema: vec![ColumnInfo::new("count", crate::access::DataType::Int32)],
            done: false,
        }
    }

    /// Insert the rows produced by a child executor.
    pub fn from_child(
        table_name: impl Into<String>,
        child: Box<dyn Executor>,
        context: ExecutionContext,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            source: InsertSource::Child(child),
            context,
            table: None,
            indexes: Vec::new(),
            output_schema: vec![ColumnInfo::new("count", crate::access::DataType::Int32)],
            done: false,
        }
    }

    fn insert_row(&self, values: &[Value]) -> Result<()> {
        let table = self.table.as_ref().expect("table resolved at init");
        let data = serialize_values(values)?;
        let tuple_id = table.heap.insert(&data)?;
        for index in &self.indexes {
            let key = index.build_key(values)?;
            index
                .index
                .insert_entry(&key, tuple_id, &self.context.transaction)?;
        }
        Ok(())
    }
}

impl Executor for InsertExecutor {
    fn init(&mut self) -> Result<()> {
        let table = self
            .context
            .catalog
            .get_table(&self.table_name)
            .ok_or_else(|| anyhow::anyhow!("Table '{}' not found", self.table_name))?;

        if let InsertSource::Rows(rows) = &self.source {
            for (i, row) in rows.iter().enumerate() {
                if row.len() != table.schema.len() {
                    bail!(
                        "Row {} has {} values but table has {} columns",
                        i,
                        row.len(),
                        table.schema.len()
                    );
                }
                for (value, column) in row.iter().zip(table.schema.iter()) {
                    if !value.is_compatible_with(column.data_type) {
                        bail!(
                            "Row {}: value {:?} is not compatible with column '{}' ({:?})",
                            i,
                            value,
                            column.name,
                            column.data_type
                        );
                    }
                }
            }
        }

        if let InsertSource::Child(child) = &mut self.source {
            child.init()?;
        }
        self.indexes = self.context.catalog.table_indexes(&self.table_name);
        self.table = Some(table);
        self.done = false;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        if self.table.is_none() {
            bail!("Executor not initialized. Call init() first.");
        }
        if self.done {
            return Ok(None);
        }
        self.done = true;

        let rows = match &mut self.source {
            InsertSource::Rows(rows) => std::mem::take(rows),
            InsertSource::Child(child) => {
                let mut buffered = Vec::new();
                while let Some(tuple) = child.next()? {
                    buffered.push(tuple.values);
                }
                buffered
            }
        };

        let mut count = 0;
        for row in &rows {
            self.insert_row(row)?;
            count += 1;
        }

        Ok(Some(Tuple::from_values(vec![Value::Int32(count)])))
    }

    fn output_schema(&self) -> &[ColumnInfo] {
        &self.output_schema
    }
}
