//! Access layer for tuple-oriented operations.
//!
//! - **HeapFile**: a table stored as a file of heap pages
//! - **Tuple** / **TupleDesc**: records and their fixed-width schema
//! - **Field** / **Type**: column values and their on-page encoding

pub mod heap;
pub mod scan;
pub mod tuple;
pub mod value;

pub use heap::HeapFile;
pub use scan::HeapFileIterator;
pub use tuple::{RecordId, Tuple, TupleDesc};
pub use value::{Field, Type};
