//! Access layer for tuple- and index-oriented operations.
//!
//! - **TableHeap**: a table spanning a chain of slotted heap pages
//! - **BPlusTree**: the concurrent clustered-page index
//! - **Tuple** / **Value**: logical records over raw page bytes

pub mod btree;
pub mod heap;
pub mod tuple;
pub mod value;

pub use btree::{BPlusTree, BTreeIterator, Index};
pub use heap::{TableHeap, TableIterator};
pub use tuple::{Tuple, TupleId};
pub use value::{deserialize_values, serialize_values, DataType, Value};
