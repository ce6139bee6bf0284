//! Update executor: rewrites the child's rows, preferring an in-place
//! heap update and falling back to mark-delete plus insert when the row
//! grew, maintaining every index either way.

use crate::access::{Tuple, Value};
use crate::catalog::{IndexInfo, TableInfo};
use crate::executor::{ColumnInfo, ExecutionContext, Executor};
use anyhow::{bail, Result};
use std::sync::Arc;

pub struct UpdateExecutor {
    table_name: String,
    child: Box<dyn Executor>,
    /// (column, new value) assignments applied to each matching row.
    assignments: Vec<(usize, Value)>,
    context: ExecutionContext,
    table: Option<Arc<TableInfo>>,
    indexes: Vec<Arc<IndexInfo>>,
    output_schema: Vec<ColumnInfo>,
    done: bool,
}

impl UpdateExecutor {
    pub fn new(
        table_name: impl Into<String>,
        child: Box<dyn Executor>,
        assignments: Vec<(usize, Value)>,
        context: ExecutionContext,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            child,
            assignments,
            context,
            table: None,
            indexes: Vec::new(),
            output_schema: vec![ColumnInfo::new("count", crate::access::DataType::Int32)],
            done: false,
        }
    }
}

impl Executor for UpdateExecutor {
    fn init(&mut self) -> Result<()> {
        let table = self
            .context
            .catalog
            .get_table(&self.table_name)
            .ok_or_else(|| anyhow::anyhow!("Table '{}' not found", self.table_name))?;
        for (column, value) in &self.assignments {
            let Some(column_info) = table.schema.get(*column) else {
                bail!("Assignment column {} out of range", column);
            };
            if !value.is_compatible_with(column_info.data_type) {
                bail!(
                    "Value {:?} is not compatible with column '{}' ({:?})",
                    value,
                    column_info.name,
                    column_info.data_type
                );
            }
        }
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
            let mut new_values = tuple.values.clone();
            for (column, value) in &self.assignments {
                new_values[*column] = value.clone();
            }
            let new_tuple = Tuple::new(tuple.tuple_id, new_values);
            let data = new_tuple.to_bytes()?;

            // In-place first; a grown row moves to a fresh slot.
            let new_tuple_id = if table.heap.update_in_place(tuple.tuple_id, &data)? {
                tuple.tuple_id
            } else {
                table.heap.mark_delete(tuple.tuple_id)?;
                table.heap.insert(&data)?
            };

            for index in &self.indexes {
                let old_key = index.build_key(&tuple.values)?;
                let new_key = index.build_key(&new_tuple.values)?;
                index
                    .index
                    .delete_entry(&old_key, &self.context.transaction)?;
                index
                    .index
                    .insert_entry(&new_key, new_tuple_id, &self.context.transaction)?;
            }
            count += 1;
        }

        Ok(Some(Tuple::from_values(vec![Value::Int32(count)])))
    }

    fn output_schema(&self) -> &[ColumnInfo] {
        &self.output_schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::btree::key::IndexKey;
    use crate::access::DataType;
    use crate::executor::predicate::{CompareOp, Predicate};
    use crate::executor::seq_scan::SeqScanExecutor;
    use crate::executor::test_util::{collect, create_context};
    use crate::executor::InsertExecutor;

    #[test]
    fn test_update_in_place_and_growth() -> Result<()> {
        let (context, _dir) = create_context()?;
        context.catalog.create_table(
            "users",
            vec![
                ColumnInfo::new("id", DataType::Int32),
                ColumnInfo::new("name", DataType::Varchar),
            ],
        )?;
        context
            .catalog
            .create_index_with_sizes("users_pk", "users", vec![0], 4, 4)?;

        let rows = (1..=3)
            .map(|id| vec![Value::Int32(id), Value::String(format!("u{id}"))])
            .collect();
        let mut insert = InsertExecutor::new("users", rows, context.clone());
        insert.init()?;
        insert.next()?;

        // UPDATE users SET name = <long string> WHERE id = 2; the longer
        // payload forces the delete-and-reinsert path.
        let scan = SeqScanExecutor::new(
            "users",
            Some(Predicate::Compare {
                column: 0,
                op: CompareOp::Eq,
                value: Value::Int32(2),
            }),
            context.clone(),
        );
        let mut update = UpdateExecutor::new(
            "users",
            Box::new(scan),
            vec![(1, Value::String("a considerably longer name".into()))],
            context.clone(),
        );
        update.init()?;
        assert_eq!(update.next()?.unwrap().values, vec![Value::Int32(1)]);

        let mut scan = SeqScanExecutor::new("users", None, context.clone());
        scan.init()?;
        let rows = collect(&mut scan)?;
        assert_eq!(rows.len(), 3);
        let updated = rows.iter().find(|r| r[0] == Value::Int32(2)).unwrap();
        assert_eq!(
            updated[1],
            Value::String("a considerably longer name".into())
        );

        // The index still resolves id=2 to a live tuple.
        let index = context.catalog.get_index("users_pk").unwrap();
        let key = IndexKey::from_values(&[Value::Int32(2)])?;
        let tuple_id = index.index.scan_key(&key)?.expect("key present");
        let table = context.catalog.get_table("users").unwrap();
        assert!(table.heap.get(tuple_id)?.is_some());

        Ok(())
    }
}
