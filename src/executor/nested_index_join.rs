//! Index nested-loop join: drives the outer child and probes a unique
//! inner index for at most one match per outer row.

use crate::access::btree::key::IndexKey;
use crate::access::btree::BPlusTree;
use crate::access::Tuple;
use crate::catalog::{IndexInfo, TableInfo};
use crate::executor::{ColumnInfo, ExecutionContext, Executor};
use crate::storage::error::EngineError;
use anyhow::{bail, Result};
use std::sync::Arc;

pub struct NestedIndexJoinExecutor {
    outer: Box<dyn Executor>,
    index_name: String,
    /// Outer columns identified by the equality predicate, forming the
    /// probe key in key-column order.
    outer_key_columns: Vec<usize>,
    context: ExecutionContext,
    index_info: Option<Arc<IndexInfo>>,
    inner_table: Option<Arc<TableInfo>>,
    output_schema: Vec<ColumnInfo>,
}

impl NestedIndexJoinExecutor {
    pub fn new(
        outer: Box<dyn Executor>,
        index_name: impl Into<String>,
        outer_key_columns: Vec<usize>,
        context: ExecutionContext,
    ) -> Self {
        Self {
            outer,
            index_name: index_name.into(),
            outer_key_columns,
            context,
            index_info: None,
            inner_table: None,
            output_schema: Vec::new(),
        }
    }
}

impl Executor for NestedIndexJoinExecutor {
    fn init(&mut self) -> Result<()> {
        self.outer.init()?;

        let index_info = self
            .context
            .catalog
            .get_index(&self.index_name)
            .ok_or_else(|| anyhow::anyhow!("Index '{}' not found", self.index_name))?;
        if index_info
            .index
            .as_any()
            .downcast_ref::<BPlusTree>()
            .is_none()
        {
            return Err(EngineError::TypeMismatch(format!(
                "index '{}' is not a B+Tree index",
                self.index_name
            ))
            .into());
        }
        if self.outer_key_columns.len() != index_info.key_columns.len() {
            return Err(EngineError::TypeMismatch(format!(
                "index '{}' has {} key columns but the join provides {}",
                self.index_name,
                index_info.key_columns.len(),
                self.outer_key_columns.len()
            ))
            .into());
        }

        let inner_table = self
            .context
            .catalog
            .get_table(&index_info.table_name)
            .ok_or_else(|| anyhow::anyhow!("Table '{}' not found", index_info.table_name))?;

        self.output_schema = self
            .outer
            .output_schema()
            .iter()
            .cloned()
            .chain(inner_table.schema.iter().cloned())
            .collect();
        self.index_info = Some(index_info);
        self.inner_table = Some(inner_table);
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        let Some(index_info) = self.index_info.as_ref() else {
            bail!("Executor not initialized. Call init() first.");
        };
        let inner_table = self.inner_table.as_ref().expect("table resolved at init");

        while let Some(outer_tuple) = self.outer.next()? {
            let mut key_values = Vec::with_capacity(self.outer_key_columns.len());
            for &column in &self.outer_key_columns {
                let Some(value) = outer_tuple.values.get(column) else {
                    bail!("Outer key column {} out of range", column);
                };
                key_values.push(value.clone());
            }
            let key = IndexKey::from_values(&key_values)?;

            // Unique index: at most one matching RID.
            let Some(tuple_id) = index_info.index.scan_key(&key)? else {
                continue;
            };
            let Some(data) = inner_table.heap.get(tuple_id)? else {
                continue;
            };
            let inner_tuple = Tuple::from_bytes(tuple_id, &data)?;

            let mut combined = outer_tuple.values;
            combined.extend(inner_tuple.values);
            return Ok(Some(Tuple::from_values(combined)));
        }
        Ok(None)
    }

    fn output_schema(&self) -> &[ColumnInfo] {
        &self.output_schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::serialize_values;
    use crate::access::{DataType, Value};
    use crate::executor::test_util::{collect, create_context, ValuesExecutor};

    #[test]
    fn test_probe_joins_matching_rows() -> Result<()> {
        let (context, _dir) = create_context()?;
        let table = context.catalog.create_table(
            "items",
            vec![
                ColumnInfo::new("id", DataType::Int32),
                ColumnInfo::new("label", DataType::Varchar),
            ],
        )?;
        for id in [10, 20, 30] {
            let data = serialize_values(&[Value::Int32(id), Value::String(format!("i{id}"))])?;
            table.heap.insert(&data)?;
        }
        context
            .catalog
            .create_index_with_sizes("items_pk", "items", vec![0], 4, 4)?;

        let outer = Box::new(ValuesExecutor::new(
            vec![ColumnInfo::new("item_id", DataType::Int32)],
            vec![
                vec![Value::Int32(20)],
                vec![Value::Int32(99)],
                vec![Value::Int32(10)],
            ],
        ));
        let mut executor =
            NestedIndexJoinExecutor::new(outer, "items_pk", vec![0], context.clone());
        executor.init()?;
        assert_eq!(executor.output_schema().len(), 3);

        let rows = collect(&mut executor)?;
        assert_eq!(
            rows,
            vec![
                vec![
                    Value::Int32(20),
                    Value::Int32(20),
                    Value::String("i20".into())
                ],
                vec![
                    Value::Int32(10),
                    Value::Int32(10),
                    Value::String("i10".into())
                ],
            ]
        );

        Ok(())
    }

    #[test]
    fn test_key_arity_mismatch_fails_at_init() -> Result<()> {
        let (context, _dir) = create_context()?;
        let table = context.catalog.create_table(
            "items",
            vec![ColumnInfo::new("id", DataType::Int32)],
        )?;
        let data = serialize_values(&[Value::Int32(1)])?;
        table.heap.insert(&data)?;
        context
            .catalog
            .create_index_with_sizes("items_pk", "items", vec![0], 4, 4)?;

        let outer = Box::new(ValuesExecutor::new(
            vec![ColumnInfo::new("a", DataType::Int32)],
            vec![],
        ));
        let mut executor =
            NestedIndexJoinExecutor::new(outer, "items_pk", vec![0, 0], context.clone());
        let err = executor.init().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::TypeMismatch(_))
        ));

        Ok(())
    }
}
