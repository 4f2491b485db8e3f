use heapdb::access::{Field, HeapFile, Tuple, TupleDesc, Type};
use heapdb::storage::{BufferPool, PageId, Permissions, StorageError};
use heapdb::transaction::Transaction;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

// 100 ints = 400 bytes per tuple, 10 slots per 4096-byte page
const COLUMNS: usize = 100;

fn desc() -> TupleDesc {
    TupleDesc::from_types(vec![Type::Int; COLUMNS])
}

fn row(file: &HeapFile, value: i32) -> Tuple {
    Tuple::new(Arc::clone(file.tuple_desc()), vec![Field::Int(value); COLUMNS]).unwrap()
}

fn first_values(file: &HeapFile, pool: &BufferPool) -> Vec<i32> {
    let txn = Transaction::begin(pool);
    let values = file
        .iter(pool, txn.id())
        .unwrap()
        .map(|t| match t.unwrap().fields()[0] {
            Field::Int(v) => v,
            ref other => panic!("unexpected field {:?}", other),
        })
        .collect();
    txn.commit().unwrap();
    values
}

fn create(dir: &TempDir, pool: &BufferPool) -> Arc<HeapFile> {
    pool.register_table(HeapFile::create(&dir.path().join("t.dat"), desc()).unwrap())
}

fn reopen(path: &Path) -> (BufferPool, Arc<HeapFile>) {
    let pool = BufferPool::new(50);
    let file = pool.register_table(HeapFile::open(path, desc()).unwrap());
    (pool, file)
}

#[test]
fn test_committed_records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let pool = BufferPool::new(50);
    let file = create(&dir, &pool);

    let txn = Transaction::begin(&pool);
    for i in 0..15 {
        pool.insert_tuple(txn.id(), file.id(), &mut row(&file, i)).unwrap();
    }
    txn.commit().unwrap();

    let (pool2, file2) = reopen(file.path());
    assert_eq!(file2.id(), file.id());
    assert_eq!(file2.num_pages().unwrap(), 2);
    assert_eq!(first_values(&file2, &pool2), (0..15).collect::<Vec<_>>());
}

#[test]
fn test_aborted_records_never_reach_disk() {
    let dir = TempDir::new().unwrap();
    let pool = BufferPool::new(50);
    let file = create(&dir, &pool);

    let setup = Transaction::begin(&pool);
    pool.insert_tuple(setup.id(), file.id(), &mut row(&file, 1)).unwrap();
    setup.commit().unwrap();

    let txn = Transaction::begin(&pool);
    pool.insert_tuple(txn.id(), file.id(), &mut row(&file, 2)).unwrap();
    txn.abort().unwrap();

    assert_eq!(first_values(&file, &pool), vec![1]);
    let (pool2, file2) = reopen(file.path());
    assert_eq!(first_values(&file2, &pool2), vec![1]);
}

#[test]
fn test_cache_holds_most_recent_pages_up_to_capacity() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("t.dat");
    {
        let pool = BufferPool::new(50);
        let file = pool.register_table(HeapFile::create(&path, desc()).unwrap());
        let txn = Transaction::begin(&pool);
        for i in 0..30 {
            pool.insert_tuple(txn.id(), file.id(), &mut row(&file, i)).unwrap();
        }
        txn.commit().unwrap();
    }

    let pool = BufferPool::new(2);
    let file = pool.register_table(HeapFile::open(&path, desc()).unwrap());
    let a = PageId::new(file.id(), 0);
    let b = PageId::new(file.id(), 1);
    let c = PageId::new(file.id(), 2);

    for pid in [a, b, c] {
        let txn = Transaction::begin(&pool);
        pool.get_page(txn.id(), pid, Permissions::ReadOnly).unwrap();
        txn.commit().unwrap();
    }

    assert_eq!(pool.cached_pages(), 2);
    assert!(pool.is_cached(c));
    assert!(pool.is_cached(a) != pool.is_cached(b));
}

#[test]
fn test_dirty_pages_are_not_evicted() {
    let dir = TempDir::new().unwrap();
    let pool = BufferPool::new(2);
    let file = create(&dir, &pool);

    // fill two pages inside one transaction; both stay dirty
    let txn = Transaction::begin(&pool);
    for i in 0..20 {
        pool.insert_tuple(txn.id(), file.id(), &mut row(&file, i)).unwrap();
    }

    let result = pool.insert_tuple(txn.id(), file.id(), &mut row(&file, 20));
    assert!(matches!(result, Err(StorageError::BufferPoolFull { capacity: 2 })));
    txn.abort().unwrap();

    assert_eq!(first_values(&file, &pool), Vec::<i32>::new());
}

#[test]
fn test_delete_then_reinsert_across_transactions() {
    let dir = TempDir::new().unwrap();
    let pool = BufferPool::new(50);
    let file = create(&dir, &pool);

    let txn = Transaction::begin(&pool);
    let mut tuples: Vec<_> = (0..3).map(|i| row(&file, i)).collect();
    for tuple in &mut tuples {
        pool.insert_tuple(txn.id(), file.id(), tuple).unwrap();
    }
    txn.commit().unwrap();

    let txn = Transaction::begin(&pool);
    pool.delete_tuple(txn.id(), &tuples[1]).unwrap();
    txn.commit().unwrap();
    assert_eq!(first_values(&file, &pool), vec![0, 2]);

    let txn = Transaction::begin(&pool);
    let rid = pool.insert_tuple(txn.id(), file.id(), &mut row(&file, 9)).unwrap();
    txn.commit().unwrap();
    assert_eq!(Some(rid), tuples[1].record_id());
    assert_eq!(first_values(&file, &pool), vec![0, 9, 2]);
}

#[test]
fn test_deleting_twice_fails() {
    let dir = TempDir::new().unwrap();
    let pool = BufferPool::new(50);
    let file = create(&dir, &pool);

    let txn = Transaction::begin(&pool);
    let mut tuple = row(&file, 5);
    pool.insert_tuple(txn.id(), file.id(), &mut tuple).unwrap();
    pool.delete_tuple(txn.id(), &tuple).unwrap();
    assert!(matches!(
        pool.delete_tuple(txn.id(), &tuple),
        Err(StorageError::SlotEmpty { .. })
    ));
}

#[test]
fn test_locks_held_until_transaction_ends() {
    let dir = TempDir::new().unwrap();
    let pool = BufferPool::new(50);
    let file = create(&dir, &pool);

    let setup = Transaction::begin(&pool);
    for i in 0..25 {
        pool.insert_tuple(setup.id(), file.id(), &mut row(&file, i)).unwrap();
    }
    setup.commit().unwrap();

    let txn = Transaction::begin(&pool);
    let id = txn.id();
    assert_eq!(first_values_in(&file, &pool, &txn).len(), 25);
    let pages: Vec<_> = (0..3).map(|n| PageId::new(file.id(), n)).collect();
    assert_eq!(pool.lock_manager().pages_locked_by(id), pages);

    txn.commit().unwrap();
    assert!(pool.lock_manager().pages_locked_by(id).is_empty());
    for pid in pages {
        assert!(!pool.holds_lock(id, pid));
    }
}

fn first_values_in(file: &HeapFile, pool: &BufferPool, txn: &Transaction) -> Vec<Tuple> {
    file.iter(pool, txn.id())
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap()
}

#[test]
fn test_dropped_transaction_is_rolled_back() {
    let dir = TempDir::new().unwrap();
    let pool = BufferPool::new(50);
    let file = create(&dir, &pool);

    let result: Result<(), StorageError> = (|| {
        let txn = Transaction::begin(&pool);
        pool.insert_tuple(txn.id(), file.id(), &mut row(&file, 1))?;
        Err(StorageError::MissingRecordId)
    })();
    assert!(result.is_err());

    assert_eq!(first_values(&file, &pool), Vec::<i32>::new());
    assert!(pool.lock_manager().holders(PageId::new(file.id(), 0)).is_empty());
}

#[test]
fn test_tables_are_independent() {
    let dir = TempDir::new().unwrap();
    let pool = BufferPool::new(50);
    let left = pool.register_table(HeapFile::create(&dir.path().join("l.dat"), desc()).unwrap());
    let right = pool.register_table(HeapFile::create(&dir.path().join("r.dat"), desc()).unwrap());
    assert_ne!(left.id(), right.id());

    let txn = Transaction::begin(&pool);
    pool.insert_tuple(txn.id(), left.id(), &mut row(&left, 1)).unwrap();
    pool.insert_tuple(txn.id(), right.id(), &mut row(&right, 2)).unwrap();
    pool.insert_tuple(txn.id(), right.id(), &mut row(&right, 3)).unwrap();
    txn.commit().unwrap();

    assert_eq!(first_values(&left, &pool), vec![1]);
    assert_eq!(first_values(&right, &pool), vec![2, 3]);
}
