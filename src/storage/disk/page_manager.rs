use crate::storage::error::{StorageError, StorageResult};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Page-addressed access to one file. The file is a flat sequence of
/// `page_size`-byte pages with no file-level header.
#[derive(Debug)]
pub struct PageManager {
    file: File,
    page_size: usize,
}

impl PageManager {
    /// Creates (or truncates) the file at `path`.
    pub fn create(path: &Path, page_size: usize) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        Ok(Self { file, page_size })
    }

    /// Opens an existing file. A missing file is an error.
    pub fn open(path: &Path, page_size: usize) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        Ok(Self { file, page_size })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn read_page(&mut self, page_number: u32, buf: &mut [u8]) -> StorageResult<()> {
        self.check_buffer(buf.len())?;

        let num_pages = self.num_pages()?;
        if page_number >= num_pages {
            return Err(StorageError::PageOutOfRange {
                page_number,
                num_pages,
            });
        }

        self.file.seek(SeekFrom::Start(self.page_offset(page_number)))?;
        self.file.read_exact(buf)?;

        Ok(())
    }

    /// Overwrites one whole page, extending the file if needed, and syncs.
    pub fn write_page(&mut self, page_number: u32, data: &[u8]) -> StorageResult<()> {
        self.check_buffer(data.len())?;

        self.file.seek(SeekFrom::Start(self.page_offset(page_number)))?;
        self.file.write_all(data)?;
        self.file.sync_all()?;

        Ok(())
    }

    pub fn num_pages(&self) -> StorageResult<u32> {
        let file_size = self.file.metadata()?.len();
        Ok((file_size / self.page_size as u64) as u32)
    }

    /// Appends a zero-filled page and returns its page number. A zeroed page
    /// decodes as an empty heap page.
    pub fn allocate_page(&mut self) -> StorageResult<u32> {
        let page_number = self.num_pages()?;
        let zeroes = vec![0u8; self.page_size];
        self.write_page(page_number, &zeroes)?;
        Ok(page_number)
    }

    fn check_buffer(&self, len: usize) -> StorageResult<()> {
        if len != self.page_size {
            return Err(StorageError::Corrupt(format!(
                "buffer size must be {} bytes, got {}",
                self.page_size, len
            )));
        }
        Ok(())
    }

    fn page_offset(&self, page_number: u32) -> u64 {
        page_number as u64 * self.page_size as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    const PAGE_SIZE: usize = 4096;

    #[test]
    fn test_create_and_open() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("table.dat");

        {
            let pm = PageManager::create(&file_path, PAGE_SIZE)?;
            assert_eq!(pm.num_pages()?, 0);
        }

        let pm = PageManager::open(&file_path, PAGE_SIZE)?;
        assert_eq!(pm.num_pages()?, 0);
        Ok(())
    }

    #[test]
    fn test_open_missing_file() -> Result<()> {
        let dir = tempdir()?;
        let result = PageManager::open(&dir.path().join("missing.dat"), PAGE_SIZE);
        assert!(matches!(result, Err(StorageError::Io(_))));
        Ok(())
    }

    #[test]
    fn test_pages_do_not_overlap() -> Result<()> {
        let dir = tempdir()?;
        let mut pm = PageManager::create(&dir.path().join("table.dat"), PAGE_SIZE)?;

        pm.write_page(0, &vec![1u8; PAGE_SIZE])?;
        pm.write_page(1, &vec![2u8; PAGE_SIZE])?;
        assert_eq!(pm.num_pages()?, 2);

        let mut buf = vec![0u8; PAGE_SIZE];
        pm.read_page(0, &mut buf)?;
        assert!(buf.iter().all(|&b| b == 1));
        pm.read_page(1, &mut buf)?;
        assert!(buf.iter().all(|&b| b == 2));

        pm.write_page(0, &vec![3u8; PAGE_SIZE])?;
        pm.read_page(0, &mut buf)?;
        assert!(buf.iter().all(|&b| b == 3));
        Ok(())
    }

    #[test]
    fn test_read_past_end() -> Result<()> {
        let dir = tempdir()?;
        let mut pm = PageManager::create(&dir.path().join("table.dat"), PAGE_SIZE)?;
        pm.allocate_page()?;

        let mut buf = vec![0u8; PAGE_SIZE];
        let result = pm.read_page(1, &mut buf);
        assert!(matches!(
            result,
            Err(StorageError::PageOutOfRange {
                page_number: 1,
                num_pages: 1
            })
        ));
        Ok(())
    }

    #[test]
    fn test_wrong_buffer_size() -> Result<()> {
        let dir = tempdir()?;
        let mut pm = PageManager::create(&dir.path().join("table.dat"), PAGE_SIZE)?;

        assert!(pm.write_page(0, &[0u8; 100]).is_err());
        let mut small = vec![0u8; 100];
        assert!(pm.read_page(0, &mut small).is_err());
        Ok(())
    }

    #[test]
    fn test_allocate_appends_zeroed_pages() -> Result<()> {
        let dir = tempdir()?;
        let mut pm = PageManager::create(&dir.path().join("table.dat"), PAGE_SIZE)?;

        pm.write_page(0, &vec![9u8; PAGE_SIZE])?;
        assert_eq!(pm.allocate_page()?, 1);
        assert_eq!(pm.allocate_page()?, 2);
        assert_eq!(pm.num_pages()?, 3);

        let mut buf = vec![1u8; PAGE_SIZE];
        pm.read_page(2, &mut buf)?;
        assert!(buf.iter().all(|&b| b == 0));
        Ok(())
    }

    #[test]
    fn test_persistence() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("table.dat");

        {
            let mut pm = PageManager::create(&file_path, PAGE_SIZE)?;
            pm.write_page(0, &vec![99u8; PAGE_SIZE])?;
        }

        let mut pm = PageManager::open(&file_path, PAGE_SIZE)?;
        let mut buf = vec![0u8; PAGE_SIZE];
        pm.read_page(0, &mut buf)?;
        assert_eq!(buf[0], 99);
        Ok(())
    }
}
