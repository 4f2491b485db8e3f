//! Storage layer.
//!
//! - **PageManager**: page-granular reads and writes against one file
//! - **HeapPage**: slotted page holding fixed-width tuples
//! - **BufferPool**: bounded, lock-aware page cache with no-steal/force
//!   transaction completion

pub mod buffer;
pub mod disk;
pub mod error;
pub mod page;

pub use buffer::{BufferPool, PageRef};
pub use disk::PageManager;
pub use error::{StorageError, StorageResult};
pub use page::{HeapPage, PageId, Permissions, TableId};
