//! Index scan executor: ordered traversal of a B+Tree index, loading the
//! backing tuple for every entry.

use crate::access::btree::{BPlusTree, BTreeIterator};
use crate::access::Tuple;
use crate::catalog::TableInfo;
use crate::executor::predicate::Predicate;
use crate::executor::{ColumnInfo, ExecutionContext, Executor};
use crate::storage::error::EngineError;
use anyhow::{bail, Result};
use std::sync::Arc;

pub struct IndexScanExecutor {
    index_name: String,
    predicate: Option<Predicate>,
    context: ExecutionContext,
    table: Option<Arc<TableInfo>>,
    iterator: Option<BTreeIterator>,
    output_schema: Vec<ColumnInfo>,
}

impl IndexScanExecutor {
    pub fn new(
        index_name: impl Into<String>,
        predicate: Option<Predicate>,
        context: ExecutionContext,
    ) -> Self {
        Self {
            index_name: index_name.into(),
            predicate,
            context,
            table: None,
            iterator: None,
            output_schema: Vec::new(),
        }
    }
}

impl Executor for IndexScanExecutor {
    fn init(&mut self) -> Result<()> {
        let index_info = self
            .context
            .catalog
            .get_index(&self.index_name)
            .ok_or_else(|| anyhow::anyhow!("Index '{}' not found", self.index_name))?;

        // Ordered iteration needs the concrete tree, not just the probe
        // capability.
        let tree = index_info
            .index
            .as_any()
            .downcast_ref::<BPlusTree>()
            .ok_or_else(|| {
                EngineError::TypeMismatch(format!(
                    "index '{}' is not a B+Tree index",
                    self.index_name
                ))
            })?;
        self.iterator = Some(tree.iter()?);

        let table = self
            .context
            .catalog
            .get_table(&index_info.table_name)
            .ok_or_else(|| anyhow::anyhow!("Table '{}' not found", index_info.table_name))?;
        self.output_schema = table.schema.clone();
        self.table = Some(table);
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        let Some(iterator) = self.iterator.as_mut() else {
            bail!("Executor not initialized. Call init() first.");
        };
        let table = self.table.as_ref().expect("table resolved at init");

        while let Some((_key, tuple_id)) = iterator.advance()? {
            let Some(data) = table.heap.get(tuple_id)? else {
                // The heap slot vanished under the entry; skip it.
                continue;
            };
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::serialize_values;
    use crate::access::{DataType, Value};
    use crate::executor::predicate::CompareOp;
    use crate::executor::test_util::{collect, create_context};

    fn seed(context: &ExecutionContext) -> Result<()> {
        let table = context.catalog.create_table(
            "users",
            vec![
                ColumnInfo::new("id", DataType::Int32),
                ColumnInfo::new("name", DataType::Varchar),
            ],
        )?;
        // Insert out of order; the index scan must come back sorted.
        for id in [4, 1, 5, 2, 3] {
            let data = serialize_values(&[Value::Int32(id), Value::String(format!("u{id}"))])?;
            table.heap.insert(&data)?;
        }
        context
            .catalog
            .create_index_with_sizes("users_pk", "users", vec![0], 4, 4)?;
        Ok(())
    }

    #[test]
    fn test_scan_is_key_ordered() -> Result<()> {
        let (context, _dir) = create_context()?;
        seed(&context)?;

        let mut executor = IndexScanExecutor::new("users_pk", None, context);
        executor.init()?;
        let rows = collect(&mut executor)?;
        let ids: Vec<_> = rows.iter().map(|r| r[0].clone()).collect();
        assert_eq!(
            ids,
            (1..=5).map(Value::Int32).collect::<Vec<_>>()
        );

        Ok(())
    }

    #[test]
    fn test_scan_with_filter() -> Result<()> {
        let (context, _dir) = create_context()?;
        seed(&context)?;

        let predicate = Predicate::Compare {
            column: 0,
            op: CompareOp::Lt,
            value: Value::Int32(3),
        };
        let mut executor = IndexScanExecutor::new("users_pk", Some(predicate), context);
        executor.init()?;
        let rows = collect(&mut executor)?;
        assert_eq!(rows.len(), 2);

        Ok(())
    }

    #[test]
    fn test_missing_index_fails_at_init() -> Result<()> {
        let (context, _dir) = create_context()?;
        let mut executor = IndexScanExecutor::new("nope", None, context);
        assert!(executor.init().is_err());
        Ok(())
    }
}
