//! Limit executor: skips `offset` child rows, then emits up to `limit`.

use crate::access::Tuple;
use crate::executor::{ColumnInfo, Executor};
use anyhow::Result;

pub struct LimitExecutor {
    child: Box<dyn Executor>,
    limit: usize,
    offset: usize,
    skipped: usize,
    returned: usize,
    output_schema: Vec<ColumnInfo>,
}

impl LimitExecutor {
    pub fn new(child: Box<dyn Executor>, limit: usize) -> Self {
        Self::with_offset(child, limit, 0)
    }

    pub fn with_offset(child: Box<dyn Executor>, limit: usize, offset: usize) -> Self {
        Self {
            child,
            limit,
            offset,
            skipped: 0,
            returned: 0,
            output_schema: Vec::new(),
        }
    }
}

impl Executor for LimitExecutor {
    fn init(&mut self) -> Result<()> {
        self.child.init()?;
        self.output_schema = self.child.output_schema().to_vec();
        self.skipped = 0;
        self.returned = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        if self.returned >= self.limit {
            return Ok(None);
        }

        while self.skipped < self.offset {
            match self.child.next()? {
                Some(_) => self.skipped += 1,
                None => return Ok(None),
            }
        }

        match self.child.next()? {
            Some(tuple) => {
                self.returned += 1;
                Ok(Some(tuple))
            }
            None => Ok(None),
        }
    }

    fn output_schema(&self) -> &[ColumnInfo] {
        &self.output_schema
    }
}
