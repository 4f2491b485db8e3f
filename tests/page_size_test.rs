//! Runs in its own binary: the page size is process-wide.

use heapdb::access::{Field, HeapFile, Tuple, TupleDesc, Type};
use heapdb::config;
use heapdb::storage::{BufferPool, PageId};
use heapdb::transaction::Transaction;
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn test_page_size_override_applies_to_new_files() {
    let dir = TempDir::new().unwrap();
    let desc = || TupleDesc::from_types(vec![Type::Int; 2]);

    let default_file = HeapFile::create(&dir.path().join("default.dat"), desc()).unwrap();
    assert_eq!(default_file.page_size(), config::DEFAULT_PAGE_SIZE);
    // 4096 * 8 / (8 * 8 + 1)
    assert_eq!(default_file.slots_per_page(), 504);

    config::set_page_size(1024);
    let small = HeapFile::create(&dir.path().join("small.dat"), desc()).unwrap();
    assert_eq!(small.page_size(), 1024);
    assert_eq!(small.slots_per_page(), 126);
    // files opened earlier keep their size
    assert_eq!(default_file.page_size(), config::DEFAULT_PAGE_SIZE);

    let pool = BufferPool::new(4);
    let small = pool.register_table(small);
    let txn = Transaction::begin(&pool);
    for i in 0..127 {
        let mut tuple = Tuple::new(Arc::clone(small.tuple_desc()), vec![Field::Int(i); 2]).unwrap();
        pool.insert_tuple(txn.id(), small.id(), &mut tuple).unwrap();
    }
    txn.commit().unwrap();

    assert_eq!(small.num_pages().unwrap(), 2);
    assert_eq!(std::fs::metadata(small.path()).unwrap().len(), 2048);
    assert_eq!(small.read_page(PageId::new(small.id(), 1)).unwrap().iter().count(), 1);

    config::reset_page_size();
    assert_eq!(config::page_size(), config::DEFAULT_PAGE_SIZE);
}
