use crate::access::heap::HeapFile;
use crate::access::tuple::Tuple;
use crate::storage::buffer::BufferPool;
use crate::storage::error::StorageResult;
use crate::storage::page::{PageId, Permissions};
use crate::transaction::TransactionId;

/// Sequential scan over a heap file.
///
/// Pages are visited in page-number order under a shared lock, and the
/// occupied tuples of each page are yielded in slot order. The page count is
/// sampled when the scan starts or is rewound. After an error the iterator
/// is exhausted.
pub struct HeapFileIterator<'a> {
    file: &'a HeapFile,
    pool: &'a BufferPool,
    txn: TransactionId,
    next_page: u32,
    num_pages: u32,
    buffered: std::vec::IntoIter<Tuple>,
}

impl<'a> HeapFileIterator<'a> {
    pub fn new(file: &'a HeapFile, pool: &'a BufferPool, txn: TransactionId) -> StorageResult<Self> {
        Ok(Self {
            file,
            pool,
            txn,
            next_page: 0,
            num_pages: file.num_pages()?,
            buffered: Vec::new().into_iter(),
        })
    }

    /// Restarts the scan from the first page.
    pub fn rewind(&mut self) -> StorageResult<()> {
        self.num_pages = self.file.num_pages()?;
        self.next_page = 0;
        self.buffered = Vec::new().into_iter();
        Ok(())
    }

    fn load_next_page(&mut self) -> StorageResult<()> {
        let pid = PageId::new(self.file.id(), self.next_page);
        self.next_page += 1;
        let page = self.pool.get_page(self.txn, pid, Permissions::ReadOnly)?;
        let tuples: Vec<Tuple> = page.read().iter().cloned().collect();
        self.buffered = tuples.into_iter();
        Ok(())
    }
}

impl Iterator for HeapFileIterator<'_> {
    type Item = StorageResult<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(tuple) = self.buffered.next() {
                return Some(Ok(tuple));
            }
            if self.next_page >= self.num_pages {
                return None;
            }
            if let Err(e) = self.load_next_page() {
                self.next_page = self.num_pages;
                return Some(Err(e));
            }
        }
    }
}
