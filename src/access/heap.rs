use crate::access::scan::HeapFileIterator;
use crate::access::tuple::{RecordId, Tuple, TupleDesc};
use crate::config;
use crate::storage::buffer::{BufferPool, PageRef};
use crate::storage::disk::PageManager;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{HeapPage, PageId, Permissions, TableId};
use crate::transaction::TransactionId;
use log::debug;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Unordered tuple storage for one table: a file of slotted heap pages.
///
/// Reads and writes here go straight to disk. Transactional access goes
/// through the [`BufferPool`], which calls back into `read_page` on a miss
/// and `write_page` on commit.
pub struct HeapFile {
    id: TableId,
    path: PathBuf,
    desc: Arc<TupleDesc>,
    page_size: usize,
    disk: Mutex<PageManager>,
}

impl HeapFile {
    /// Creates an empty table file at `path`, truncating any existing one.
    pub fn create(path: &Path, desc: TupleDesc) -> StorageResult<Self> {
        let page_size = config::page_size();
        let disk = PageManager::create(path, page_size)?;
        Self::build(path, desc, disk)
    }

    /// Opens an existing table file.
    pub fn open(path: &Path, desc: TupleDesc) -> StorageResult<Self> {
        let page_size = config::page_size();
        let disk = PageManager::open(path, page_size)?;
        Self::build(path, desc, disk)
    }

    fn build(path: &Path, desc: TupleDesc, disk: PageManager) -> StorageResult<Self> {
        let path = path.canonicalize()?;
        Ok(Self {
            id: Self::table_id_for(&path),
            page_size: disk.page_size(),
            path,
            desc: Arc::new(desc),
            disk: Mutex::new(disk),
        })
    }

    /// Table id for a canonical file path: the leading four bytes of the
    /// path's SHA-256 digest.
    pub fn table_id_for(canonical_path: &Path) -> TableId {
        let digest = Sha256::digest(canonical_path.to_string_lossy().as_bytes());
        TableId(u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]))
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn slots_per_page(&self) -> usize {
        HeapPage::num_slots(self.page_size, self.desc.byte_size())
    }

    pub fn num_pages(&self) -> StorageResult<u32> {
        self.disk.lock().num_pages()
    }

    pub fn read_page(&self, pid: PageId) -> StorageResult<HeapPage> {
        self.check_table(pid)?;
        let mut buf = vec![0u8; self.page_size];
        match self.disk.lock().read_page(pid.page_number, &mut buf) {
            Err(StorageError::PageOutOfRange { .. }) => return Err(StorageError::PageNotFound(pid)),
            other => other?,
        }
        HeapPage::from_bytes(pid, Arc::clone(&self.desc), &buf)
    }

    /// Overwrites the page's slot on disk with its current content.
    pub fn write_page(&self, page: &HeapPage) -> StorageResult<()> {
        self.check_table(page.id())?;
        let data = page.page_data()?;
        self.disk.lock().write_page(page.id().page_number, &data)
    }

    /// Stores `tuple` in the first page with a free slot, appending a page
    /// when every existing page is full. Sets the tuple's record id and
    /// returns the page that was modified.
    pub fn insert_tuple(
        &self,
        pool: &BufferPool,
        txn: TransactionId,
        tuple: &mut Tuple,
    ) -> StorageResult<Vec<PageRef>> {
        if self.slots_per_page() == 0 {
            return Err(StorageError::RecordTooLarge {
                tuple_size: self.desc.byte_size(),
                page_size: self.page_size,
            });
        }
        if **tuple.desc() != *self.desc {
            return Err(StorageError::SchemaMismatch);
        }

        let num_pages = self.num_pages()?;
        for page_number in 0..num_pages {
            let pid = PageId::new(self.id, page_number);
            let page = pool.get_page(txn, pid, Permissions::ReadWrite)?;
            if let Some(record_id) = Self::try_insert(&page, tuple)? {
                tuple.set_record_id(Some(record_id));
                return Ok(vec![page]);
            }
        }

        // Every page is full. The new page goes to disk empty so the file
        // grows durably while the record itself only lands at commit.
        loop {
            let page_number = self.disk.lock().allocate_page()?;
            let pid = PageId::new(self.id, page_number);
            debug!("{} appended {}", txn, pid);

            let page = pool.get_page(txn, pid, Permissions::ReadWrite)?;
            if let Some(record_id) = Self::try_insert(&page, tuple)? {
                tuple.set_record_id(Some(record_id));
                return Ok(vec![page]);
            }
            // another inserter filled the fresh page before we locked it
        }
    }

    fn try_insert(page: &PageRef, tuple: &Tuple) -> StorageResult<Option<RecordId>> {
        let mut page = page.write();
        if page.num_empty_slots() == 0 {
            return Ok(None);
        }
        page.insert_tuple(tuple.clone()).map(Some)
    }

    /// Clears the tuple's slot and returns the page that was modified.
    pub fn delete_tuple(
        &self,
        pool: &BufferPool,
        txn: TransactionId,
        tuple: &Tuple,
    ) -> StorageResult<Vec<PageRef>> {
        let record_id = tuple.record_id().ok_or(StorageError::MissingRecordId)?;
        self.check_table(record_id.page_id)?;

        let page = pool.get_page(txn, record_id.page_id, Permissions::ReadWrite)?;
        page.write().delete_tuple(&record_id)?;
        Ok(vec![page])
    }

    /// Scans every stored tuple in page and slot order on behalf of `txn`.
    pub fn iter<'a>(
        &'a self,
        pool: &'a BufferPool,
        txn: TransactionId,
    ) -> StorageResult<HeapFileIterator<'a>> {
        HeapFileIterator::new(self, pool, txn)
    }

    fn check_table(&self, pid: PageId) -> StorageResult<()> {
        if pid.table_id != self.id {
            return Err(StorageError::TableMismatch {
                expected: self.id,
                actual: pid.table_id,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for HeapFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapFile")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("page_size", &self.page_size)
            .finish()
    }
}
