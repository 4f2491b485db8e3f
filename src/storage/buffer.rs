use crate::access::heap::HeapFile;
use crate::access::tuple::{RecordId, Tuple};
use crate::concurrency::lock::LockManager;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{HeapPage, PageId, Permissions, TableId};
use crate::transaction::{TransactionId, TransactionIdGenerator};
use dashmap::DashMap;
use log::{debug, error, trace, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// A cached page. Callers mutate it in place through the write guard.
pub type PageRef = Arc<RwLock<HeapPage>>;

/// Bounded page cache shared by all transactions.
///
/// Pages are handed out only after the matching page lock is granted
/// (read-only maps to shared, read-write to exclusive). Durability follows
/// no-steal/force: dirty pages are never evicted, they are written at commit
/// and dropped at abort.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<BufferPoolInner>,
}

struct BufferPoolInner {
    pages: Mutex<HashMap<PageId, PageRef>>,
    tables: DashMap<TableId, Arc<HeapFile>>,
    lock_manager: LockManager,
    txn_ids: TransactionIdGenerator,
    capacity: usize,
}

impl BufferPool {
    /// Creates a pool that caches up to `capacity` pages.
    pub fn new(capacity: usize) -> Self {
        Self::with_lock_manager(capacity, LockManager::new())
    }

    pub fn with_lock_manager(capacity: usize, lock_manager: LockManager) -> Self {
        Self {
            inner: Arc::new(BufferPoolInner {
                pages: Mutex::new(HashMap::with_capacity(capacity)),
                tables: DashMap::new(),
                lock_manager,
                txn_ids: TransactionIdGenerator::new(),
                capacity,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.inner.lock_manager
    }

    /// Hands out a fresh transaction id.
    pub fn begin_transaction(&self) -> TransactionId {
        self.inner.txn_ids.next()
    }

    /// Makes `file` reachable by its table id.
    pub fn register_table(&self, file: HeapFile) -> Arc<HeapFile> {
        let file = Arc::new(file);
        debug!("registered {} at {}", file.id(), file.path().display());
        self.inner.tables.insert(file.id(), Arc::clone(&file));
        file
    }

    pub fn table(&self, table_id: TableId) -> StorageResult<Arc<HeapFile>> {
        self.inner
            .tables
            .get(&table_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(StorageError::UnknownTable(table_id))
    }

    /// Returns the page after locking it for `txn` under `perm`. May block on
    /// the lock and fails with [`StorageError::TransactionAborted`] if the
    /// wait times out. On a miss with a full cache, one clean page is evicted
    /// first.
    ///
    /// A clean page may be evicted while the caller still holds its handle.
    /// Changes made through such a handle reach the cache again only through
    /// [`BufferPool::insert_tuple`] / [`BufferPool::delete_tuple`], which mark
    /// the page dirty and reinstall it.
    pub fn get_page(
        &self,
        txn: TransactionId,
        pid: PageId,
        perm: Permissions,
    ) -> StorageResult<PageRef> {
        self.inner.lock_manager.acquire(txn, pid, perm.into())?;

        let mut pages = self.inner.pages.lock();
        if let Some(page) = pages.get(&pid) {
            trace!("cache hit {}", pid);
            return Ok(Arc::clone(page));
        }

        let file = self.table(pid.table_id)?;
        if pages.len() >= self.inner.capacity {
            Self::evict_from(&mut pages, self.inner.capacity)?;
        }
        let page = Arc::new(RwLock::new(file.read_page(pid)?));
        pages.insert(pid, Arc::clone(&page));
        trace!("loaded {}", pid);
        Ok(page)
    }

    /// Releases `txn`'s lock on one page.
    ///
    /// Releasing before the transaction ends breaks two-phase locking; only
    /// transaction-end logic and code that can prove the page was never read
    /// should call this.
    pub fn release_page(&self, txn: TransactionId, pid: PageId) {
        self.inner.lock_manager.release(txn, pid);
    }

    pub fn holds_lock(&self, txn: TransactionId, pid: PageId) -> bool {
        self.inner.lock_manager.holds_lock(txn, pid)
    }

    /// Inserts `tuple` into the table on behalf of `txn` and returns its
    /// record id. The modified page is marked dirty and (re)installed in the
    /// cache so later readers see it before commit.
    pub fn insert_tuple(
        &self,
        txn: TransactionId,
        table_id: TableId,
        tuple: &mut Tuple,
    ) -> StorageResult<RecordId> {
        let file = self.table(table_id)?;
        let dirtied = file.insert_tuple(self, txn, tuple)?;
        self.install_dirty(txn, dirtied)?;
        tuple.record_id().ok_or(StorageError::MissingRecordId)
    }

    /// Deletes `tuple` (located by its record id) on behalf of `txn`.
    pub fn delete_tuple(&self, txn: TransactionId, tuple: &Tuple) -> StorageResult<()> {
        let record_id = tuple.record_id().ok_or(StorageError::MissingRecordId)?;
        let file = self.table(record_id.page_id.table_id)?;
        let dirtied = file.delete_tuple(self, txn, tuple)?;
        self.install_dirty(txn, dirtied)
    }

    fn install_dirty(&self, txn: TransactionId, dirtied: Vec<PageRef>) -> StorageResult<()> {
        let dirtied: Vec<(PageId, PageRef)> = dirtied
            .into_iter()
            .map(|page| {
                let pid = {
                    let mut guard = page.write();
                    guard.mark_dirty(Some(txn));
                    guard.id()
                };
                (pid, page)
            })
            .collect();

        let mut pages = self.inner.pages.lock();
        for (pid, page) in dirtied {
            if !pages.contains_key(&pid) && pages.len() >= self.inner.capacity {
                Self::evict_from(&mut pages, self.inner.capacity)?;
            }
            pages.insert(pid, page);
        }
        Ok(())
    }

    /// Writes every dirty page of `txn` and releases all of its locks.
    pub fn commit(&self, txn: TransactionId) -> StorageResult<()> {
        self.transaction_complete(txn, true)
    }

    /// Drops every dirty page of `txn` from the cache and releases all of its
    /// locks. The next access reloads the last committed state from disk.
    pub fn abort(&self, txn: TransactionId) -> StorageResult<()> {
        self.transaction_complete(txn, false)
    }

    fn transaction_complete(&self, txn: TransactionId, commit: bool) -> StorageResult<()> {
        let mut first_error = None;

        for pid in self.inner.lock_manager.pages_locked_by(txn) {
            // The page lock is still held here, so no other transaction can
            // load or touch the page until it has been flushed or discarded.
            // No blocking page guard is taken under the cache mutex.
            let cached = self.inner.pages.lock().get(&pid).cloned();
            let dirty = cached.filter(|page| page.read().is_dirty().is_some());

            if let Some(page) = dirty {
                if commit {
                    if let Err(e) = self.flush_page(&page) {
                        error!("{} failed to flush {}: {}", txn, pid, e);
                        self.inner.pages.lock().remove(&pid);
                        first_error.get_or_insert(e);
                    }
                } else {
                    self.inner.pages.lock().remove(&pid);
                    debug!("{} discarded {}", txn, pid);
                }
            }

            self.inner.lock_manager.release(txn, pid);
        }
        self.inner.lock_manager.release_all(txn);

        debug!("{} {}", txn, if commit { "committed" } else { "aborted" });
        first_error.map_or(Ok(()), Err)
    }

    /// Writes the page through to its table file if it is dirty, then clears
    /// the dirty flag and refreshes the before-image.
    fn flush_page(&self, page: &PageRef) -> StorageResult<()> {
        let mut page = page.write();
        if page.is_dirty().is_none() {
            return Ok(());
        }
        let file = self.table(page.id().table_id)?;
        file.write_page(&page)?;
        page.mark_dirty(None);
        page.set_before_image()?;
        debug!("flushed {}", page.id());
        Ok(())
    }

    /// Writes every dirty page of `txn` without releasing any lock.
    pub fn flush_pages(&self, txn: TransactionId) -> StorageResult<()> {
        for pid in self.inner.lock_manager.pages_locked_by(txn) {
            let page = self.inner.pages.lock().get(&pid).cloned();
            if let Some(page) = page {
                self.flush_page(&page)?;
            }
        }
        Ok(())
    }

    /// Writes every dirty cached page to disk without releasing locks.
    ///
    /// This makes uncommitted changes durable and so defeats abort. It exists
    /// for utilities that need durability outside a transaction boundary.
    pub fn flush_all_pages(&self) -> StorageResult<()> {
        let pages: Vec<PageRef> = self.inner.pages.lock().values().cloned().collect();
        for page in &pages {
            self.flush_page(page)?;
        }
        Ok(())
    }

    /// Drops a page from the cache without writing it.
    pub fn discard_page(&self, pid: PageId) {
        if self.inner.pages.lock().remove(&pid).is_some() {
            debug!("discarded {}", pid);
        }
    }

    /// Evicts one clean page. Fails with [`StorageError::BufferPoolFull`] when
    /// every cached page is dirty.
    pub fn evict_page(&self) -> StorageResult<()> {
        let mut pages = self.inner.pages.lock();
        Self::evict_from(&mut pages, self.inner.capacity)
    }

    // The first clean page found is the victim; there is no recency ordering.
    // Dirty pages hold the only copy of uncommitted work. A page whose write
    // guard is held is mid-update by its lock owner and is skipped.
    fn evict_from(pages: &mut HashMap<PageId, PageRef>, capacity: usize) -> StorageResult<()> {
        let victim = pages.iter().find_map(|(pid, page)| {
            let page = page.try_read()?;
            page.is_dirty().is_none().then_some(*pid)
        });

        match victim {
            Some(pid) => {
                pages.remove(&pid);
                debug!("evicted {}", pid);
                Ok(())
            }
            None => {
                warn!("buffer pool saturated: {} pages, none clean", pages.len());
                Err(StorageError::BufferPoolFull { capacity })
            }
        }
    }

    pub fn cached_pages(&self) -> usize {
        self.inner.pages.lock().len()
    }

    pub fn is_cached(&self, pid: PageId) -> bool {
        self.inner.pages.lock().contains_key(&pid)
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("capacity", &self.inner.capacity)
            .field("cached", &self.cached_pages())
            .field("tables", &self.inner.tables.len())
            .finish()
    }
}
