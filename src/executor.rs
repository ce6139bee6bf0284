//! Volcano-style executor layer.
//!
//! Every operator exposes `init()` and `next()`, producing tuples one at
//! a time. Calling `init()` again rewinds an executor to its first row;
//! the block nested-loop join relies on this to rescan its right child.

use crate::access::Tuple;
use crate::catalog::Catalog;
use crate::storage::buffer::BufferPoolManager;
use crate::transaction::Transaction;
use anyhow::Result;
use std::sync::Arc;

pub mod aggregate;
pub mod delete;
pub mod index_scan;
pub mod insert;
pub mod limit;
pub mod nested_index_join;
pub mod nested_loop_join;
pub mod predicate;
pub mod projection;
pub mod seq_scan;
pub mod update;

#[cfg(test)]
pub mod test_util;

pub use aggregate::{AggregateFunction, AggregateSpec, HashAggregateExecutor};
pub use delete::DeleteExecutor;
pub use index_scan::IndexScanExecutor;
pub use insert::InsertExecutor;
pub use limit::LimitExecutor;
pub use nested_index_join::NestedIndexJoinExecutor;
pub use nested_loop_join::NestedLoopJoinExecutor;
pub use predicate::{CompareOp, Predicate};
pub use projection::ProjectionExecutor;
pub use seq_scan::SeqScanExecutor;
pub use update::UpdateExecutor;

pub use crate::catalog::ColumnInfo;

/// Tuples buffered per side by the block nested-loop join.
pub const JOIN_BLOCK_SIZE: usize = 64;

/// Trait for all query executors.
pub trait Executor: Send {
    /// (Re)initialize the executor. Must be called before `next()`.
    fn init(&mut self) -> Result<()>;

    /// Get the next tuple, or None when exhausted.
    fn next(&mut self) -> Result<Option<Tuple>>;

    /// The schema of the tuples this executor produces.
    fn output_schema(&self) -> &[ColumnInfo];
}

/// Shared resources threaded through an executor tree.
#[derive(Clone)]
pub struct ExecutionContext {
    pub catalog: Arc<Catalog>,
    pub buffer_pool: BufferPoolManager,
    pub transaction: Arc<Transaction>,
}

impl ExecutionContext {
    pub fn new(catalog: Arc<Catalog>, buffer_pool: BufferPoolManager) -> Self {
        Self {
            catalog,
            buffer_pool,
            transaction: Arc::new(Transaction::new()),
        }
    }
}
