//! Concurrency control.
//!
//! Strict two-phase locking at page granularity: transactions take shared or
//! exclusive page locks as they touch pages and give all of them back only at
//! commit or abort. See [`lock::LockManager`].

pub mod lock;

pub use lock::{LockError, LockManager, LockMode};
