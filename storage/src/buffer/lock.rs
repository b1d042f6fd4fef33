//! Page-level shared/exclusive locks keyed by page id.
//!
//! Each page has its own holder list and condition variable. The table-wide
//! mutex only guards the map from page id to slot and is never held while
//! waiting.

use heapdb_core::{PageId, TransactionId};
use log::trace;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Shared => write!(f, "shared"),
            LockMode::Exclusive => write!(f, "exclusive"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockEntry {
    pub mode: LockMode,
    pub tid: TransactionId,
}

/// The caller waited `waited` without the lock becoming available.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LockTimeout {
    pub waited: Duration,
}

#[derive(Debug, Default)]
struct LockSlot {
    // Either any number of shared entries from distinct transactions, or a
    // single exclusive entry.
    holders: Mutex<Vec<LockEntry>>,
    released: Condvar,
}

#[derive(Debug)]
pub(crate) struct LockTable {
    slots: Mutex<HashMap<PageId, Arc<LockSlot>>>,
    timeout: Duration,
    wait_slice: Duration,
}

impl LockTable {
    pub fn new(timeout: Duration, wait_slice: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            timeout,
            wait_slice,
        }
    }

    /// Blocks until `tid` holds `pid` in `mode`, or the deadlock timeout runs
    /// out. A shared lock held alone by `tid` is upgraded in place.
    pub fn acquire(&self, tid: TransactionId, pid: PageId, mode: LockMode) -> Result<(), LockTimeout> {
        let slot = Arc::clone(self.slots.lock().entry(pid).or_default());
        let mut holders = slot.holders.lock();

        let started = Instant::now();
        loop {
            if try_grant(&mut holders, tid, mode) {
                trace!("{} acquired {} lock on {}", tid, mode, pid);
                return Ok(());
            }

            let waited = started.elapsed();
            if waited >= self.timeout {
                return Err(LockTimeout { waited });
            }

            trace!("{} waiting for {} lock on {}: {:?}", tid, mode, pid, *holders);
            let slice = self.wait_slice.min(self.timeout - waited);
            slot.released.wait_for(&mut holders, slice);
        }
    }

    pub fn release(&self, tid: TransactionId, pid: PageId) {
        let slot = self.slots.lock().get(&pid).cloned();
        if let Some(slot) = slot {
            slot.holders.lock().retain(|e| e.tid != tid);
            slot.released.notify_all();
        }
    }

    /// Drops every lock `tid` holds and forgets pages nobody is using.
    pub fn release_all(&self, tid: TransactionId) {
        let mut slots = self.slots.lock();
        for slot in slots.values() {
            let mut holders = slot.holders.lock();
            let before = holders.len();
            holders.retain(|e| e.tid != tid);
            if holders.len() != before {
                slot.released.notify_all();
            }
        }
        slots.retain(|_, slot| Arc::strong_count(slot) > 1 || !slot.holders.lock().is_empty());
    }

    pub fn holds_lock(&self, tid: TransactionId, pid: PageId) -> bool {
        self.lock_mode(tid, pid).is_some()
    }

    pub fn lock_mode(&self, tid: TransactionId, pid: PageId) -> Option<LockMode> {
        self.holders(pid)
            .into_iter()
            .find(|e| e.tid == tid)
            .map(|e| e.mode)
    }

    pub fn holders(&self, pid: PageId) -> Vec<LockEntry> {
        let slot = self.slots.lock().get(&pid).cloned();
        slot.map(|slot| slot.holders.lock().clone()).unwrap_or_default()
    }

    pub fn locked_pages(&self, tid: TransactionId) -> Vec<PageId> {
        let slots = self.slots.lock();
        let mut pages: Vec<_> = slots
            .iter()
            .filter(|(_, slot)| slot.holders.lock().iter().any(|e| e.tid == tid))
            .map(|(pid, _)| *pid)
            .collect();
        pages.sort();
        pages
    }
}

fn try_grant(holders: &mut Vec<LockEntry>, tid: TransactionId, mode: LockMode) -> bool {
    match mode {
        LockMode::Shared => {
            if holders
                .iter()
                .any(|e| e.mode == LockMode::Exclusive && e.tid != tid)
            {
                return false;
            }
            if !holders.iter().any(|e| e.tid == tid) {
                holders.push(LockEntry { mode, tid });
            }
            true
        }
        LockMode::Exclusive => {
            if holders.iter().any(|e| e.tid != tid) {
                return false;
            }
            if !holders.iter().any(|e| e.mode == LockMode::Exclusive) {
                holders.clear();
                holders.push(LockEntry { mode, tid });
            }
            true
        }
    }
}
