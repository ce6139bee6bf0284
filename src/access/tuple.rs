use crate::access::value::{deserialize_values, serialize_values, Value};
use crate::storage::page::{PageId, INVALID_PAGE_ID};
use anyhow::Result;
use std::cmp::Ordering;

/// Unique identifier for a tuple: the heap page it lives on plus its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TupleId {
    pub page_id: PageId,
    pub slot_id: u16,
}

/// Sentinel for tuples that are not backed by the heap (synthetic rows
/// produced mid-pipeline).
pub const INVALID_TUPLE_ID: TupleId = TupleId {
    page_id: INVALID_PAGE_ID,
    slot_id: 0,
};

impl TupleId {
    pub fn new(page_id: PageId, slot_id: u16) -> Self {
        Self { page_id, slot_id }
    }
}

impl PartialOrd for TupleId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TupleId {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.page_id.0.cmp(&other.page_id.0) {
            Ordering::Equal => self.slot_id.cmp(&other.slot_id),
            other => other,
        }
    }
}

/// A row flowing through the executor pipeline.
#[derive(Debug, Clone)]
pub struct Tuple {
    pub tuple_id: TupleId,
    pub values: Vec<Value>,
}

impl Tuple {
    pub fn new(tuple_id: TupleId, values: Vec<Value>) -> Self {
        Self { tuple_id, values }
    }

    /// A synthetic tuple with no heap identity.
    pub fn from_values(values: Vec<Value>) -> Self {
        Self {
            tuple_id: INVALID_TUPLE_ID,
            values,
        }
    }

    pub fn from_bytes(tuple_id: TupleId, data: &[u8]) -> Result<Self> {
        Ok(Self {
            tuple_id,
            values: deserialize_values(data)?,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serialize_values(&self.values)
    }
}
