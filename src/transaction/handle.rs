use crate::storage::buffer::BufferPool;
use crate::storage::error::StorageResult;
use crate::transaction::id::TransactionId;
use log::warn;

/// RAII handle for a transaction against one buffer pool.
///
/// Dropping a handle that was neither committed nor aborted aborts it, so an
/// early return through `?` never leaves locks or dirty pages behind.
pub struct Transaction {
    id: TransactionId,
    pool: BufferPool,
    finished: bool,
}

impl Transaction {
    pub fn begin(pool: &BufferPool) -> Self {
        Self {
            id: pool.begin_transaction(),
            pool: pool.clone(),
            finished: false,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn commit(mut self) -> StorageResult<()> {
        self.finished = true;
        self.pool.commit(self.id)
    }

    pub fn abort(mut self) -> StorageResult<()> {
        self.finished = true;
        self.pool.abort(self.id)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.pool.abort(self.id) {
                warn!("abort of dropped {} failed: {}", self.id, e);
            }
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("finished", &self.finished)
            .finish()
    }
}
