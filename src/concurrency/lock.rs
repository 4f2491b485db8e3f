//! Page-level two-phase lock table.
//!
//! Every page has at most one lock record, either shared by a set of
//! transactions or held exclusively by one. A sole shared holder may upgrade
//! in place. Deadlocks are avoided rather than detected: each blocked
//! `acquire` draws a random wait bound and fails with [`LockError::Timeout`]
//! once that much time has passed, so every member of a wait cycle eventually
//! gives up.
//!
//! All state sits behind one mutex. Waiters park on a per-page condition
//! variable that is signalled whenever the page's lock record changes; the
//! mutex is never held while a thread is parked.

use crate::config::LockWaitRange;
use crate::storage::page::{PageId, Permissions};
use crate::transaction::TransactionId;
use log::{debug, warn};
use parking_lot::{Condvar, Mutex};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Lock modes supported by the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Shared lock for read operations.
    Shared,
    /// Exclusive lock for write operations.
    Exclusive,
}

impl From<Permissions> for LockMode {
    fn from(perm: Permissions) -> Self {
        match perm {
            Permissions::ReadOnly => LockMode::Shared,
            Permissions::ReadWrite => LockMode::Exclusive,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("{txn} gave up on {page_id} after {waited:?}")]
    Timeout {
        txn: TransactionId,
        page_id: PageId,
        waited: Duration,
    },
}

/// The lock record of one page.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LockState {
    Shared(HashSet<TransactionId>),
    Exclusive(TransactionId),
}

impl LockState {
    fn mode(&self) -> LockMode {
        match self {
            LockState::Shared(_) => LockMode::Shared,
            LockState::Exclusive(_) => LockMode::Exclusive,
        }
    }

    fn holds(&self, txn: TransactionId) -> bool {
        match self {
            LockState::Shared(holders) => holders.contains(&txn),
            LockState::Exclusive(holder) => *holder == txn,
        }
    }

    /// Drops `txn` from the record. Returns true when nobody holds it anymore.
    fn remove(&mut self, txn: TransactionId) -> bool {
        match self {
            LockState::Shared(holders) => {
                holders.remove(&txn);
                holders.is_empty()
            }
            LockState::Exclusive(holder) => *holder == txn,
        }
    }
}

#[derive(Debug)]
struct PageWaiters {
    cv: Arc<Condvar>,
    count: usize,
}

#[derive(Debug, Default)]
struct LockTable {
    locks: HashMap<PageId, LockState>,
    /// Reverse index: transaction -> pages it holds in any mode.
    held: HashMap<TransactionId, HashSet<PageId>>,
    waiters: HashMap<PageId, PageWaiters>,
}

impl LockTable {
    /// Grants the lock if the current record allows it. Covers re-entry,
    /// first acquisition, joining a shared record and the sole-holder upgrade.
    fn try_grant(&mut self, txn: TransactionId, page_id: PageId, mode: LockMode) -> bool {
        let granted = match self.locks.get_mut(&page_id) {
            None => {
                let state = match mode {
                    LockMode::Shared => LockState::Shared(HashSet::from([txn])),
                    LockMode::Exclusive => LockState::Exclusive(txn),
                };
                self.locks.insert(page_id, state);
                true
            }
            Some(LockState::Exclusive(holder)) => *holder == txn,
            Some(LockState::Shared(holders)) if mode == LockMode::Shared => {
                holders.insert(txn);
                true
            }
            Some(state) => {
                let sole_holder = matches!(
                    state,
                    LockState::Shared(holders) if holders.len() == 1 && holders.contains(&txn)
                );
                if sole_holder {
                    debug!("{} upgrading {} to exclusive", txn, page_id);
                    *state = LockState::Exclusive(txn);
                }
                sole_holder
            }
        };

        if granted {
            self.held.entry(txn).or_default().insert(page_id);
        }
        granted
    }

    fn release(&mut self, txn: TransactionId, page_id: PageId) {
        if let Some(pages) = self.held.get_mut(&txn) {
            pages.remove(&page_id);
            if pages.is_empty() {
                self.held.remove(&txn);
            }
        }
        self.remove_holder(txn, page_id);
    }

    fn remove_holder(&mut self, txn: TransactionId, page_id: PageId) {
        let Some(state) = self.locks.get_mut(&page_id) else {
            return;
        };
        if !state.holds(txn) {
            return;
        }
        if state.remove(txn) {
            self.locks.remove(&page_id);
        }
        if let Some(waiters) = self.waiters.get(&page_id) {
            waiters.cv.notify_all();
        }
    }

    fn register_waiter(&mut self, page_id: PageId) -> Arc<Condvar> {
        let waiters = self.waiters.entry(page_id).or_insert_with(|| PageWaiters {
            cv: Arc::new(Condvar::new()),
            count: 0,
        });
        waiters.count += 1;
        Arc::clone(&waiters.cv)
    }

    fn unregister_waiter(&mut self, page_id: PageId) {
        if let Some(waiters) = self.waiters.get_mut(&page_id) {
            waiters.count -= 1;
            if waiters.count == 0 {
                self.waiters.remove(&page_id);
            }
        }
    }
}

/// Shared/exclusive page locks with timeout-based deadlock avoidance.
#[derive(Debug)]
pub struct LockManager {
    table: Mutex<LockTable>,
    wait_range: LockWaitRange,
}

impl LockManager {
    pub fn new() -> Self {
        Self::with_wait_range(LockWaitRange::default())
    }

    pub fn with_wait_range(wait_range: LockWaitRange) -> Self {
        Self {
            table: Mutex::new(LockTable::default()),
            wait_range,
        }
    }

    /// Acquires `mode` on `page_id` for `txn`, blocking while the lock is
    /// incompatible. Returns immediately if `txn` already holds an equal or
    /// stronger lock. Fails once the randomly drawn wait bound has elapsed.
    pub fn acquire(
        &self,
        txn: TransactionId,
        page_id: PageId,
        mode: LockMode,
    ) -> Result<(), LockError> {
        let mut table = self.table.lock();
        if table.try_grant(txn, page_id, mode) {
            debug!("{} granted {:?} on {}", txn, mode, page_id);
            return Ok(());
        }

        let start = Instant::now();
        let bound = self.draw_wait_bound();
        let deadline = start + bound;
        debug!(
            "{} waiting up to {:?} for {:?} on {}",
            txn, bound, mode, page_id
        );

        let cv = table.register_waiter(page_id);
        let result = loop {
            cv.wait_until(&mut table, deadline);
            if table.try_grant(txn, page_id, mode) {
                debug!(
                    "{} granted {:?} on {} after {:?}",
                    txn,
                    mode,
                    page_id,
                    start.elapsed()
                );
                break Ok(());
            }
            if Instant::now() >= deadline {
                warn!(
                    "{} timed out waiting for {:?} on {} ({:?})",
                    txn, mode, page_id, bound
                );
                break Err(LockError::Timeout {
                    txn,
                    page_id,
                    waited: start.elapsed(),
                });
            }
        };
        table.unregister_waiter(page_id);
        result
    }

    /// Releases whatever lock `txn` holds on `page_id`. No-op if it holds none.
    pub fn release(&self, txn: TransactionId, page_id: PageId) {
        self.table.lock().release(txn, page_id);
    }

    /// Releases every lock held by `txn`.
    pub fn release_all(&self, txn: TransactionId) {
        let mut table = self.table.lock();
        if let Some(pages) = table.held.remove(&txn) {
            debug!("{} releasing {} locks", txn, pages.len());
            for page_id in pages {
                table.remove_holder(txn, page_id);
            }
        }
    }

    pub fn holds_lock(&self, txn: TransactionId, page_id: PageId) -> bool {
        self.table
            .lock()
            .locks
            .get(&page_id)
            .is_some_and(|state| state.holds(txn))
    }

    /// Pages `txn` currently holds in any mode, in page order.
    pub fn pages_locked_by(&self, txn: TransactionId) -> Vec<PageId> {
        let table = self.table.lock();
        let mut pages: Vec<_> = table
            .held
            .get(&txn)
            .map(|pages| pages.iter().copied().collect())
            .unwrap_or_default();
        pages.sort();
        pages
    }

    pub fn lock_mode(&self, page_id: PageId) -> Option<LockMode> {
        self.table.lock().locks.get(&page_id).map(LockState::mode)
    }

    /// Current holders of `page_id`, sorted.
    pub fn holders(&self, page_id: PageId) -> Vec<TransactionId> {
        let table = self.table.lock();
        let mut holders: Vec<_> = match table.locks.get(&page_id) {
            Some(LockState::Shared(holders)) => holders.iter().copied().collect(),
            Some(LockState::Exclusive(holder)) => vec![*holder],
            None => Vec::new(),
        };
        holders.sort();
        holders
    }

    fn draw_wait_bound(&self) -> Duration {
        let min = self.wait_range.min.as_nanos() as u64;
        let max = self.wait_range.max.as_nanos() as u64;
        Duration::from_nanos(rand::thread_rng().gen_range(min..=max))
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}
