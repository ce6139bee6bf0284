//! Shared fixtures for executor unit tests.

use crate::access::{Tuple, Value};
use crate::catalog::Catalog;
use crate::executor::{ColumnInfo, ExecutionContext, Executor};
use crate::storage::buffer::lru::LruReplacer;
use crate::storage::buffer::BufferPoolManager;
use crate::storage::PageManager;
use anyhow::Result;
use std::sync::Arc;
use tempfile::TempDir;

/// Executor emitting a fixed list of synthetic rows.
pub struct ValuesExecutor {
    rows: Vec<Vec<Value>>,
    schema: Vec<ColumnInfo>,
    cursor: usize,
}

impl ValuesExecutor {
    pub fn new(schema: Vec<ColumnInfo>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            rows,
            schema,
            cursor: 0,
        }
    }
}

impl Executor for ValuesExecutor {
    fn init(&mut self) -> Result<()> {
        self.cursor = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        match self.rows.get(self.cursor) {
            Some(row) => {
                self.cursor += 1;
                Ok(Some(Tuple::from_values(row.clone())))
            }
            None => Ok(None),
        }
    }

    fn output_schema(&self) -> &[ColumnInfo] {
        &self.schema
    }
}

pub fn create_context() -> Result<(ExecutionContext, TempDir)> {
    let dir = TempDir::new()?;
    let page_manager = PageManager::create(&dir.path().join("test.db"))?;
    let replacer = Box::new(LruReplacer::new(128));
    let buffer_pool = BufferPoolManager::new(page_manager, replacer, 128);
    let catalog = Arc::new(Catalog::new(buffer_pool.clone())?);
    Ok((ExecutionContext::new(catalog, buffer_pool), dir))
}

/// Drain an executor into a vector of value rows.
pub fn collect(executor: &mut dyn Executor) -> Result<Vec<Vec<Value>>> {
    let mut rows = Vec::new();
    while let Some(tuple) = executor.next()? {
        rows.push(tuple.values);
    }
    Ok(rows)
}
