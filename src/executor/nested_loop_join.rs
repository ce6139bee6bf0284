//! Block nested-loop join.
//!
//! Buffers up to `JOIN_BLOCK_SIZE` left tuples, then streams the right
//! side in blocks of the same size, emitting every cross pair that
//! satisfies the predicate. When the right side exhausts while the left
//! has more rows, the right child is re-initialized for another pass.

use crate::access::Tuple;
use crate::executor::predicate::Predicate;
use crate::executor::{ColumnInfo, Executor, JOIN_BLOCK_SIZE};
use anyhow::Result;
use std::collections::VecDeque;

pub struct NestedLoopJoinExecutor {
    left: Box<dyn Executor>,
    right: Box<dyn Executor>,
    /// Evaluated over the combined row: left columns then right columns.
    predicate: Predicate,
    output_schema: Vec<ColumnInfo>,
    left_block: Vec<Tuple>,
    left_exhausted: bool,
    output_buffer: VecDeque<Tuple>,
}

impl NestedLoopJoinExecutor {
    pub fn new(left: Box<dyn Executor>, right: Box<dyn Executor>, predicate: Predicate) -> Self {
        Self {
            left,
            right,
            predicate,
            output_schema: Vec::new(),
            left_block: Vec::new(),
            left_exhausted: false,
            output_buffer: VecDeque::new(),
        }
    }

    fn fill_left_block(&mut self) -> Result<()> {
        self.left_block.clear();
        while self.left_block.len() < JOIN_BLOCK_SIZE {
            match self.left.next()? {
                Some(tuple) => self.left_block.push(tuple),
                None => {
                    self.left_exhausted = true;
                    break;
                }
            }
        }
        Ok(())
    }

    fn fill_right_block(&mut self) -> Result<Vec<Tuple>> {
        let mut block = Vec::with_capacity(JOIN_BLOCK_SIZE);
        while block.len() < JOIN_BLOCK_SIZE {
            match self.right.next()? {
                Some(tuple) => block.push(tuple),
                None => break,
            }
        }
        Ok(block)
    }
}

impl Executor for NestedLoopJoinExecutor {
    fn init(&mut self) -> Result<()> {
        self.left.init()?;
        self.right.init()?;
        self.output_schema = self
            .left
            .output_schema()
            .iter()
            .cloned()
            .chain(self.right.output_schema().iter().cloned())
            .collect();
        self.left_block.clear();
        self.left_exhausted = false;
        self.output_buffer.clear();
        self.fill_left_block()?;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        loop {
            if let Some(tuple) = self.output_buffer.pop_front() {
                return Ok(Some(tuple));
            }
            if self.left_block.is_empty() {
                return Ok(None);
            }

            let right_block = self.fill_right_block()?;
            if right_block.is_empty() {
                // Right side drained for this left block.
                if self.left_exhausted {
                    self.left_block.clear();
                    return Ok(None);
                }
                self.fill_left_block()?;
                if self.left_block.is_empty() {
                    return Ok(None);
                }
                self.right.init()?;
                continue;
            }

            for left_tuple in &self.left_block {
                for right_tuple in &right_block {
                    let mut combined = left_tuple.values.clone();
                    combined.extend(right_tuple.values.iter().cloned());
                    if self.predicate.evaluate(&combined)? {
                        self.output_buffer.push_back(Tuple::from_values(combined));
                    }
                }
            }
        }
    }

    fn output_schema(&self) -> &[ColumnInfo] {
        &self.output_schema
    }
}
