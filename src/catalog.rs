//! In-memory catalog resolving table and index names to their heap and
//! index handles. Index roots persist through the header page; table and
//! schema metadata live for the lifetime of the catalog.

use crate::access::btree::key::{IndexKey, LexicographicKeyComparator};
use crate::access::btree::{BPlusTree, Index};
use crate::access::value::{DataType, Value};
use crate::access::{TableHeap, Tuple};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::btree_internal_page::INTERNAL_CAPACITY;
use crate::storage::page::btree_leaf_page::LEAF_CAPACITY;
use crate::storage::page::header_page;
use crate::transaction::Transaction;
use anyhow::{bail, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub type TableId = u32;
pub type IndexId = u32;

/// One column of a table schema, also used as executor output schema
/// elements.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: DataType,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

pub struct TableInfo {
    pub table_id: TableId,
    pub name: String,
    pub schema: Vec<ColumnInfo>,
    pub heap: TableHeap,
}

pub struct IndexInfo {
    pub index_id: IndexId,
    pub name: String,
    pub table_name: String,
    /// Table columns forming the key, in key order.
    pub key_columns: Vec<usize>,
    pub index: Arc<dyn Index>,
}

impl IndexInfo {
    /// Derive the index key for a table row.
    pub fn build_key(&self, values: &[Value]) -> Result<IndexKey> {
        let mut key_values = Vec::with_capacity(self.key_columns.len());
        for &column in &self.key_columns {
            let value = values
                .get(column)
                .ok_or_else(|| anyhow::anyhow!("Key column {} out of range", column))?;
            key_values.push(value.clone());
        }
        IndexKey::from_values(&key_values)
    }
}

pub struct Catalog {
    buffer_pool: BufferPoolManager,
    tables: RwLock<HashMap<String, Arc<TableInfo>>>,
    indexes: RwLock<HashMap<String, Arc<IndexInfo>>>,
    table_indexes: RwLock<HashMap<String, Vec<Arc<IndexInfo>>>>,
    next_table_id: AtomicU32,
    next_index_id: AtomicU32,
}

impl Catalog {
    pub fn new(buffer_pool: BufferPoolManager) -> Result<Self> {
        header_page::ensure_initialized(&buffer_pool)?;
        Ok(Self {
            buffer_pool,
            tables: RwLock::new(HashMap::new()),
            indexes: RwLock::new(HashMap::new()),
            table_indexes: RwLock::new(HashMap::new()),
            next_table_id: AtomicU32::new(0),
            next_index_id: AtomicU32::new(0),
        })
    }

    pub fn create_table(
        &self,
        name: impl Into<String>,
        schema: Vec<ColumnInfo>,
    ) -> Result<Arc<TableInfo>> {
        let name = name.into();
        let mut tables = self.tables.write();
        if tables.contains_key(&name) {
            bail!("Table '{}' already exists", name);
        }
        let heap = TableHeap::create(self.buffer_pool.clone())?;
        let info = Arc::new(TableInfo {
            table_id: self.next_table_id.fetch_add(1, Ordering::SeqCst),
            name: name.clone(),
            schema,
            heap,
        });
        tables.insert(name, info.clone());
        Ok(info)
    }

    pub fn get_table(&self, name: &str) -> Option<Arc<TableInfo>> {
        self.tables.read().get(name).cloned()
    }

    /// Create a B+Tree index over `key_columns` of an existing table and
    /// backfill it from the table's current rows.
    pub fn create_index(
        &self,
        index_name: impl Into<String>,
        table_name: &str,
        key_columns: Vec<usize>,
    ) -> Result<Arc<IndexInfo>> {
        self.create_index_with_sizes(
            index_name,
            table_name,
            key_columns,
            LEAF_CAPACITY - 1,
            INTERNAL_CAPACITY - 1,
        )
    }

    /// As `create_index`, with explicit node fanout bounds. Small bounds
    /// keep trees deep enough to exercise splits in tests.
    pub fn create_index_with_sizes(
        &self,
        index_name: impl Into<String>,
        table_name: &str,
        key_columns: Vec<usize>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Arc<IndexInfo>> {
        let index_name = index_name.into();
        let table = self
            .get_table(table_name)
            .ok_or_else(|| anyhow::anyhow!("Table '{}' not found", table_name))?;
        for &column in &key_columns {
            if column >= table.schema.len() {
                bail!("Key column {} out of range for '{}'", column, table_name);
            }
        }

        let mut indexes = self.indexes.write();
        if indexes.contains_key(&index_name) {
            bail!("Index '{}' already exists", index_name);
        }

        let tree = BPlusTree::new(
            index_name.clone(),
            self.buffer_pool.clone(),
            Box::new(LexicographicKeyComparator),
            leaf_max_size,
            internal_max_size,
        )?;
        let info = Arc::new(IndexInfo {
            index_id: self.next_index_id.fetch_add(1, Ordering::SeqCst),
            name: index_name.clone(),
            table_name: table_name.to_string(),
            key_columns,
            index: Arc::new(tree),
        });

        // Backfill from the rows already in the heap.
        let transaction = Transaction::new();
        let mut iter = table.heap.iter();
        while let Some((tuple_id, data)) = iter.next()? {
            let tuple = Tuple::from_bytes(tuple_id, &data)?;
            let key = info.build_key(&tuple.values)?;
            info.index.insert_entry(&key, tuple_id, &transaction)?;
        }
        transaction.commit(&self.buffer_pool)?;

        indexes.insert(index_name, info.clone());
        self.table_indexes
            .write()
            .entry(table_name.to_string())
            .or_default()
            .push(info.clone());
        Ok(info)
    }

    pub fn get_index(&self, name: &str) -> Option<Arc<IndexInfo>> {
        self.indexes.read().get(name).cloned()
    }

    /// Every index declared over a table.
    pub fn table_indexes(&self, table_name: &str) -> Vec<Arc<IndexInfo>> {
        self.table_indexes
            .read()
            .get(table_name)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::buffer::lru::LruReplacer;
    use crate::storage::PageManager;
    use tempfile::tempdir;

    fn create_catalog() -> Result<(Arc<Catalog>, tempfile::TempDir)> {
        let dir = tempdir()?;
        let page_manager = PageManager::create(&dir.path().join("test.db"))?;
        let replacer = Box::new(LruReplacer::new(64));
        let buffer_pool = BufferPoolManager::new(page_manager, replacer, 64);
        Ok((Arc::new(Catalog::new(buffer_pool)?), dir))
    }

    fn users_schema() -> Vec<ColumnInfo> {
        vec![
            ColumnInfo::new("id", DataType::Int32),
            ColumnInfo::new("name", DataType::Varchar),
        ]
    }

    #[test]
    fn test_create_and_get_table() -> Result<()> {
        let (catalog, _dir) = create_catalog()?;

        let info = catalog.create_table("users", users_schema())?;
        assert_eq!(info.name, "users");
        assert_eq!(info.schema.len(), 2);

        assert!(catalog.get_table("users").is_some());
        assert!(catalog.get_table("missing").is_none());
        assert!(catalog.create_table("users", users_schema()).is_err());

        Ok(())
    }

    #[test]
    fn test_create_index_backfills_existing_rows() -> Result<()> {
        use crate::access::serialize_values;

        let (catalog, _dir) = create_catalog()?;
        let table = catalog.create_table("users", users_schema())?;

        let mut tuple_ids = Vec::new();
        for id in [3, 1, 2] {
            let data = serialize_values(&[Value::Int32(id), Value::String(format!("u{id}"))])?;
            tuple_ids.push(table.heap.insert(&data)?);
        }

        let index = catalog.create_index("users_pk", "users", vec![0])?;
        let key = IndexKey::from_values(&[Value::Int32(3)])?;
        assert_eq!(index.index.scan_key(&key)?, Some(tuple_ids[0]));

        assert_eq!(catalog.table_indexes("users").len(), 1);
        assert!(catalog.table_indexes("orders").is_empty());

        Ok(())
    }

    #[test]
    fn test_bad_key_column_rejected() -> Result<()> {
        let (catalog, _dir) = create_catalog()?;
        catalog.create_table("users", users_schema())?;
        assert!(catalog.create_index("bad", "users", vec![9]).is_err());
        Ok(())
    }
}
