//! End-to-end executor pipeline tests over real tables and indexes.

use anyhow::Result;
use burrowdb::access::Value;
use burrowdb::access::{serialize_values, DataType};
use burrowdb::catalog::{Catalog, ColumnInfo};
use burrowdb::executor::{
    AggregateFunction, AggregateSpec, CompareOp, DeleteExecutor, ExecutionContext, Executor,
    HashAggregateExecutor, IndexScanExecutor, InsertExecutor, LimitExecutor,
    NestedIndexJoinExecutor, NestedLoopJoinExecutor, Predicate, ProjectionExecutor,
    SeqScanExecutor, UpdateExecutor,
};
use burrowdb::storage::buffer::lru::LruReplacer;
use burrowdb::storage::buffer::BufferPoolManager;
use burrowdb::storage::PageManager;
use std::sync::Arc;
use tempfile::TempDir;

fn create_context() -> Result<(ExecutionContext, TempDir)> {
    let dir = TempDir::new()?;
    let page_manager = PageManager::create(&dir.path().join("test.db"))?;
    let replacer = Box::new(LruReplacer::new(256));
    let buffer_pool = BufferPoolManager::new(page_manager, replacer, 256);
    let catalog = Arc::new(Catalog::new(buffer_pool.clone())?);
    Ok((ExecutionContext::new(catalog, buffer_pool), dir))
}

fn collect(executor: &mut dyn Executor) -> Result<Vec<Vec<Value>>> {
    let mut rows = Vec::new();
    while let Some(tuple) = executor.next()? {
        rows.push(tuple.values);
    }
    Ok(rows)
}

fn seed_table(
    context: &ExecutionContext,
    name: &str,
    schema: Vec<ColumnInfo>,
    rows: Vec<Vec<Value>>,
) -> Result<()> {
    let table = context.catalog.create_table(name, schema)?;
    for row in rows {
        table.heap.insert(&serialize_values(&row)?)?;
    }
    Ok(())
}

#[test]
fn test_aggregation_with_group_by() -> Result<()> {
    let (context, _dir) = create_context()?;
    seed_table(
        &context,
        "sales",
        vec![
            ColumnInfo::new("region", DataType::Varchar),
            ColumnInfo::new("amount", DataType::Int32),
        ],
        vec![
            vec![Value::String("a".into()), Value::Int32(1)],
            vec![Value::String("a".into()), Value::Int32(2)],
            vec![Value::String("b".into()), Value::Int32(3)],
        ],
    )?;

    let scan = SeqScanExecutor::new("sales", None, context.clone());
    let mut aggregate = HashAggregateExecutor::new(
        Box::new(scan),
        vec![0],
        vec![AggregateSpec::new(AggregateFunction::Sum, 1)],
        None,
    );
    aggregate.init()?;

    // Emission order is the hash table's; compare as sets.
    let mut rows = collect(&mut aggregate)?;
    rows.sort_by(|a, b| format!("{a:?}").cmp(&format!("{b:?}")));
    assert_eq!(
        rows,
        vec![
            vec![Value::String("a".into()), Value::Int32(3)],
            vec![Value::String("b".into()), Value::Int32(3)],
        ]
    );
    Ok(())
}

#[test]
fn test_block_nested_loop_join_on_equality() -> Result<()> {
    let (context, _dir) = create_context()?;
    seed_table(
        &context,
        "left_side",
        vec![ColumnInfo::new("l", DataType::Int32)],
        vec![
            vec![Value::Int32(1)],
            vec![Value::Int32(2)],
            vec![Value::Int32(3)],
        ],
    )?;
    seed_table(
        &context,
        "right_side",
        vec![ColumnInfo::new("r", DataType::Int32)],
        vec![
            vec![Value::Int32(2)],
            vec![Value::Int32(3)],
            vec![Value::Int32(4)],
        ],
    )?;

    let left = SeqScanExecutor::new("left_side", None, context.clone());
    let right = SeqScanExecutor::new("right_side", None, context.clone());
    let mut join = NestedLoopJoinExecutor::new(
        Box::new(left),
        Box::new(right),
        Predicate::ColumnCompare {
            left: 0,
            op: CompareOp::Eq,
            right: 1,
        },
    );
    join.init()?;

    let mut rows = collect(&mut join)?;
    rows.sort_by(|a, b| format!("{a:?}").cmp(&format!("{b:?}")));
    assert_eq!(
        rows,
        vec![
            vec![Value::Int32(2), Value::Int32(2)],
            vec![Value::Int32(3), Value::Int32(3)],
        ]
    );
    Ok(())
}

#[test]
fn test_insert_index_scan_limit_pipeline() -> Result<()> {
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

    // Insert ids shuffled; the index scan returns them sorted.
    let rows: Vec<Vec<Value>> = [7, 2, 9, 4, 1, 8, 3, 6, 5, 10]
        .iter()
        .map(|&id| vec![Value::Int32(id), Value::String(format!("u{id}"))])
        .collect();
    let mut insert = InsertExecutor::new("users", rows, context.clone());
    insert.init()?;
    assert_eq!(insert.next()?.unwrap().values, vec![Value::Int32(10)]);

    let scan = IndexScanExecutor::new("users_pk", None, context.clone());
    let mut limit = LimitExecutor::with_offset(Box::new(scan), 3, 2);
    limit.init()?;
    let rows = collect(&mut limit)?;
    let ids: Vec<_> = rows.iter().map(|r| r[0].clone()).collect();
    assert_eq!(
        ids,
        vec![Value::Int32(3), Value::Int32(4), Value::Int32(5)]
    );
    Ok(())
}

#[test]
fn test_update_then_delete_keeps_index_consistent() -> Result<()> {
    let (context, _dir) = create_context()?;
    context.catalog.create_table(
        "users",
        vec![
            ColumnInfo::new("id", DataType::Int32),
            ColumnInfo::new("score", DataType::Int32),
        ],
    )?;
    context
        .catalog
        .create_index_with_sizes("users_pk", "users", vec![0], 4, 4)?;

    let rows: Vec<Vec<Value>> = (1..=8)
        .map(|id| vec![Value::Int32(id), Value::Int32(id * 10)])
        .collect();
    let mut insert = InsertExecutor::new("users", rows, context.clone());
    insert.init()?;
    insert.next()?;

    // UPDATE users SET score = 0 WHERE id > 6
    let scan = SeqScanExecutor::new(
        "users",
        Some(Predicate::Compare {
            column: 0,
            op: CompareOp::Gt,
            value: Value::Int32(6),
        }),
        context.clone(),
    );
    let mut update = UpdateExecutor::new(
        "users",
        Box::new(scan),
        vec![(1, Value::Int32(0))],
        context.clone(),
    );
    update.init()?;
    assert_eq!(update.next()?.unwrap().values, vec![Value::Int32(2)]);

    // DELETE FROM users WHERE id < 3
    let scan = SeqScanExecutor::new(
        "users",
        Some(Predicate::Compare {
            column: 0,
            op: CompareOp::Lt,
            value: Value::Int32(3),
        }),
        context.clone(),
    );
    let mut delete = DeleteExecutor::new("users", Box::new(scan), context.clone());
    delete.init()?;
    assert_eq!(delete.next()?.unwrap().values, vec![Value::Int32(2)]);

    // The index scan agrees with the heap on the surviving rows.
    let mut scan = IndexScanExecutor::new("users_pk", None, context.clone());
    scan.init()?;
    let rows = collect(&mut scan)?;
    assert_eq!(
        rows.iter().map(|r| r[0].clone()).collect::<Vec<_>>(),
        (3..=8).map(Value::Int32).collect::<Vec<_>>()
    );
    assert_eq!(rows[5], vec![Value::Int32(8), Value::Int32(0)]);
    Ok(())
}

#[test]
fn test_nested_index_join_pipeline() -> Result<()> {
    let (context, _dir) = create_context()?;
    seed_table(
        &context,
        "orders",
        vec![
            ColumnInfo::new("order_id", DataType::Int32),
            ColumnInfo::new("item_id", DataType::Int32),
        ],
        vec![
            vec![Value::Int32(100), Value::Int32(2)],
            vec![Value::Int32(101), Value::Int32(9)],
            vec![Value::Int32(102), Value::Int32(1)],
        ],
    )?;
    context.catalog.create_table(
        "items",
        vec![
            ColumnInfo::new("id", DataType::Int32),
            ColumnInfo::new("label", DataType::Varchar),
        ],
    )?;
    let items: Vec<Vec<Value>> = (1..=3)
        .map(|id| vec![Value::Int32(id), Value::String(format!("item{id}"))])
        .collect();
    let mut insert = InsertExecutor::new("items", items, context.clone());
    insert.init()?;
    insert.next()?;
    context
        .catalog
        .create_index_with_sizes("items_pk", "items", vec![0], 4, 4)?;

    // Join each order to its item through the unique index; order 101
    // has no matching item and drops out.
    let outer = SeqScanExecutor::new("orders", None, context.clone());
    let join = NestedIndexJoinExecutor::new(Box::new(outer), "items_pk", vec![1], context.clone());
    let mut projection = ProjectionExecutor::new(Box::new(join), None, vec![0, 3]);
    projection.init()?;

    let rows = collect(&mut projection)?;
    assert_eq!(
        rows,
        vec![
            vec![Value::Int32(100), Value::String("item2".into())],
            vec![Value::Int32(102), Value::String("item1".into())],
        ]
    );
    Ok(())
}

#[test]
fn test_filtered_projection_over_seq_scan() -> Result<()> {
    let (context, _dir) = create_context()?;
    seed_table(
        &context,
        "users",
        vec![
            ColumnInfo::new("id", DataType::Int32),
            ColumnInfo::new("name", DataType::Varchar),
            ColumnInfo::new("active", DataType::Boolean),
        ],
        (1..=6)
            .map(|id| {
                vec![
                    Value::Int32(id),
                    Value::String(format!("u{id}")),
                    Value::Boolean(id % 2 == 0),
                ]
            })
            .collect(),
    )?;

    let scan = SeqScanExecutor::new("users", None, context.clone());
    let mut projection = ProjectionExecutor::new(
        Box::new(scan),
        Some(Predicate::Compare {
            column: 2,
            op: CompareOp::Eq,
            value: Value::Boolean(true),
        }),
        vec![1],
    );
    projection.init()?;

    let rows = collect(&mut projection)?;
    assert_eq!(
        rows,
        vec![
            vec![Value::String("u2".into())],
            vec![Value::String("u4".into())],
            vec![Value::String("u6".into())],
        ]
    );
    Ok(())
}

#[test]
fn test_aggregate_having_over_table() -> Result<()> {
    let (context, _dir) = create_context()?;
    seed_table(
        &context,
        "sales",
        vec![
            ColumnInfo::new("region", DataType::Varchar),
            ColumnInfo::new("amount", DataType::Int32),
        ],
        vec![
            vec![Value::String("a".into()), Value::Int32(10)],
            vec![Value::String("b".into()), Value::Int32(1)],
            vec![Value::String("a".into()), Value::Int32(5)],
            vec![Value::String("c".into()), Value::Int32(7)],
        ],
    )?;

    // SELECT region, SUM(amount), COUNT(amount) FROM sales
    // GROUP BY region HAVING SUM(amount) > 5
    let scan = SeqScanExecutor::new("sales", None, context.clone());
    let mut aggregate = HashAggregateExecutor::new(
        Box::new(scan),
        vec![0],
        vec![
            AggregateSpec::new(AggregateFunction::Sum, 1),
            AggregateSpec::new(AggregateFunction::Count, 1),
        ],
        Some(Predicate::Compare {
            column: 1,
            op: CompareOp::Gt,
            value: Value::Int32(5),
        }),
    );
    aggregate.init()?;

    let mut rows = collect(&mut aggregate)?;
    rows.sort_by(|a, b| format!("{a:?}").cmp(&format!("{b:?}")));
    assert_eq!(
        rows,
        vec![
            vec![Value::String("a".into()), Value::Int32(15), Value::Int32(2)],
            vec![Value::String("c".into()), Value::Int32(7), Value::Int32(1)],
        ]
    );
    Ok(())
}
