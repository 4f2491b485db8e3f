pub mod heap_page;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use heap_page::HeapPage;

/// Identifies a table file. Derived from the file's canonical path, so the
/// same physical file gets the same id across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableId(pub u32);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table-{:08x}", self.0)
    }
}

/// A page within a table file: `(table, zero-based page number)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageId {
    pub table_id: TableId,
    pub page_number: u32,
}

impl PageId {
    pub fn new(table_id: TableId, page_number: u32) -> Self {
        Self {
            table_id,
            page_number,
        }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/page-{}", self.table_id, self.page_number)
    }
}

/// Access level requested when fetching a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permissions {
    ReadOnly,
    ReadWrite,
}
