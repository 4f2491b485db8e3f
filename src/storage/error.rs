//! Storage layer error types.

use crate::concurrency::lock::LockError;
use crate::storage::page::{PageId, TableId};
use crate::transaction::TransactionId;
use thiserror::Error;

/// Errors surfaced by the page store, lock table and buffer pool.
///
/// None of these are retried internally. A caller that receives
/// [`StorageError::TransactionAborted`] is expected to abort the transaction.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("{txn} aborted: lock wait on {page_id} timed out")]
    TransactionAborted { txn: TransactionId, page_id: PageId },

    #[error("Buffer pool is full: none of {capacity} cached pages can be evicted")]
    BufferPoolFull { capacity: usize },

    #[error("Record belongs to {actual}, not {expected}")]
    TableMismatch { expected: TableId, actual: TableId },

    #[error("Record {record_page} is not stored on {page_id}")]
    WrongPage { page_id: PageId, record_page: PageId },

    #[error("Tuple does not match the table schema")]
    SchemaMismatch,

    #[error("Tuples of {tuple_size} bytes do not fit a {page_size}-byte page")]
    RecordTooLarge { tuple_size: usize, page_size: usize },

    #[error("{0} is not registered with the buffer pool")]
    UnknownTable(TableId),

    #[error("Page not found: {0}")]
    PageNotFound(PageId),

    #[error("Page {page_number} is past the end of the file ({num_pages} pages)")]
    PageOutOfRange { page_number: u32, num_pages: u32 },

    #[error("Slot {slot} on {page_id} is empty")]
    SlotEmpty { page_id: PageId, slot: usize },

    #[error("Invalid slot {slot} (page has {num_slots} slots)")]
    InvalidSlot { slot: usize, num_slots: usize },

    #[error("{0} has no empty slot")]
    PageFull(PageId),

    #[error("Tuple has no record id")]
    MissingRecordId,

    #[error("Corrupt page data: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LockError> for StorageError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Timeout { txn, page_id, .. } => StorageError::TransactionAborted { txn, page_id },
        }
    }
}

impl StorageError {
    /// True when the error means the transaction should be aborted and may be
    /// retried from scratch.
    pub fn is_abort(&self) -> bool {
        matches!(self, StorageError::TransactionAborted { .. })
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
