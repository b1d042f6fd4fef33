//! Bounded page cache with per-page transaction locks.
//!
//! Pages are handed out as [`PageRef`]s. Holding a `PageRef` pins the page:
//! it cannot be evicted until every clone is dropped. Never call back into
//! the pool while holding a page's read or write guard.

mod lock;

pub use lock::{LockEntry, LockMode};

use crate::catalog::Catalog;
use crate::config::StorageConfig;
use crate::page::HeapPage;
use crate::{Result, StorageError};
use heapdb_core::{PageId, TableId, TransactionId, Tuple};
use lock::LockTable;
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// A cached page shared between the pool and its current users.
pub type PageRef = Arc<RwLock<HeapPage>>;

pub struct BufferPool {
    catalog: Arc<Catalog>,
    capacity: usize,
    locks: LockTable,
    // Insertion order doubles as the eviction scan order.
    pages: Mutex<Vec<(PageId, PageRef)>>,
}

impl BufferPool {
    /// Fails with [`StorageError::InvalidConfig`] if `config` does not pass
    /// [`StorageConfig::validate`].
    pub fn new(catalog: Arc<Catalog>, config: &StorageConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            catalog,
            capacity: config.pool_capacity,
            locks: LockTable::new(config.deadlock_timeout(), config.lock_wait_slice()),
            pages: Mutex::new(Vec::with_capacity(config.pool_capacity)),
        })
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Locks `pid` for `tid` in `mode`, then returns the cached page, loading
    /// it from its heap file on a miss.
    ///
    /// If the lock cannot be granted within the deadlock timeout, `tid` is
    /// aborted (its dirty pages reverted and all its locks released) before
    /// [`StorageError::TransactionAborted`] is returned.
    pub fn get_page(&self, tid: TransactionId, pid: PageId, mode: LockMode) -> Result<PageRef> {
        if let Err(timeout) = self.locks.acquire(tid, pid, mode) {
            warn!(
                "{} gave up waiting for {} lock on {} after {:?}, aborting",
                tid, mode, pid, timeout.waited
            );
            if let Err(e) = self.transaction_complete(tid, false) {
                error!("failed to abort {}: {}", tid, e);
            }
            return Err(StorageError::TransactionAborted(tid));
        }

        let mut pages = self.pages.lock();
        if let Some((_, page)) = pages.iter().find(|(id, _)| *id == pid) {
            return Ok(Arc::clone(page));
        }

        if pages.len() >= self.capacity {
            self.evict(&mut pages)?;
        }

        let page = self.catalog.file(pid.table_id())?.read_page(pid)?;
        debug!("loaded {} for {}", pid, tid);

        let page = Arc::new(RwLock::new(page));
        pages.push((pid, Arc::clone(&page)));
        Ok(page)
    }

    /// Drops `tid`'s lock on `pid` before the transaction ends. This gives up
    /// two-phase locking for that page; only use it for pages the transaction
    /// has not read anything from that it depends on.
    pub fn release_page(&self, tid: TransactionId, pid: PageId) {
        self.locks.release(tid, pid);
    }

    pub fn holds_lock(&self, tid: TransactionId, pid: PageId) -> bool {
        self.locks.holds_lock(tid, pid)
    }

    pub fn lock_holders(&self, pid: PageId) -> Vec<LockEntry> {
        self.locks.holders(pid)
    }

    pub fn locked_pages(&self, tid: TransactionId) -> Vec<PageId> {
        self.locks.locked_pages(tid)
    }

    /// Inserts `tuple` into table `table_id` on behalf of `tid` and returns
    /// the page it landed on.
    pub fn insert_tuple(
        &self,
        tid: TransactionId,
        table_id: TableId,
        tuple: &mut Tuple,
    ) -> Result<PageRef> {
        self.catalog.file(table_id)?.insert_tuple(self, tid, tuple)
    }

    /// Deletes `tuple` from the table its record id points into.
    pub fn delete_tuple(&self, tid: TransactionId, tuple: &mut Tuple) -> Result<PageRef> {
        let rid = tuple.record_id().ok_or(StorageError::MissingRecordId)?;
        self.catalog
            .file(rid.page_id().table_id())?
            .delete_tuple(self, tid, tuple)
    }

    /// Ends `tid`. On commit its dirty pages are written and synced; on abort
    /// they are replaced in place by their on-disk contents. Either way every
    /// lock `tid` holds is released, even if the flush or reload fails.
    pub fn transaction_complete(&self, tid: TransactionId, commit: bool) -> Result<()> {
        let result = if commit {
            self.flush_pages(tid)
        } else {
            self.revert_pages(tid)
        };
        self.locks.release_all(tid);

        match &result {
            Ok(()) if commit => info!("committed {}", tid),
            Ok(()) => info!("aborted {}", tid),
            Err(e) => error!("completing {} (commit: {}) failed: {}", tid, commit, e),
        }
        result
    }

    /// Writes `pid` to disk if it is cached and dirty.
    pub fn flush_page(&self, pid: PageId) -> Result<()> {
        let page = self
            .pages
            .lock()
            .iter()
            .find(|(id, page)| *id == pid && page.read().is_dirty().is_some())
            .map(|(_, page)| Arc::clone(page));
        match page {
            Some(page) => self.write_back(&page),
            None => Ok(()),
        }
    }

    /// Writes every dirty page, whichever transaction dirtied it. Meant for
    /// shutdown and tests; flushing uncommitted changes defeats abort.
    pub fn flush_all_pages(&self) -> Result<()> {
        // Clean pages are left uncloned so they stay evictable meanwhile.
        let pages: Vec<_> = self
            .pages
            .lock()
            .iter()
            .filter(|(_, page)| page.read().is_dirty().is_some())
            .map(|(_, page)| Arc::clone(page))
            .collect();
        for page in &pages {
            self.write_back(page)?;
        }
        Ok(())
    }

    /// Writes the pages `tid` dirtied and syncs the files they belong to.
    pub fn flush_pages(&self, tid: TransactionId) -> Result<()> {
        let pages = self.dirtied_by(tid);

        let mut tables = Vec::new();
        for page in &pages {
            let table_id = page.read().id().table_id();
            self.write_back(page)?;
            if !tables.contains(&table_id) {
                tables.push(table_id);
            }
        }

        for table_id in tables {
            self.catalog.file(table_id)?.sync()?;
        }
        debug!("flushed {} pages for {}", pages.len(), tid);
        Ok(())
    }

    /// Drops `pid` from the cache without writing it.
    pub fn discard_page(&self, pid: PageId) {
        self.pages.lock().retain(|(id, _)| *id != pid);
    }

    /// Cached page ids in eviction scan order.
    pub fn cached_pages(&self) -> Vec<PageId> {
        self.pages.lock().iter().map(|(id, _)| *id).collect()
    }

    pub fn is_cached(&self, pid: PageId) -> bool {
        self.pages.lock().iter().any(|(id, _)| *id == pid)
    }

    fn dirtied_by(&self, tid: TransactionId) -> Vec<PageRef> {
        self.pages
            .lock()
            .iter()
            .filter(|(_, page)| page.read().is_dirty() == Some(tid))
            .map(|(_, page)| Arc::clone(page))
            .collect()
    }

    fn revert_pages(&self, tid: TransactionId) -> Result<()> {
        for page in self.dirtied_by(tid) {
            let mut page = page.write();
            let pid = page.id();
            *page = self.catalog.file(pid.table_id())?.read_page(pid)?;
            debug!("reverted {} for {}", pid, tid);
        }
        Ok(())
    }

    fn write_back(&self, page: &PageRef) -> Result<()> {
        let mut page = page.write();
        let Some(dirtier) = page.is_dirty() else {
            return Ok(());
        };

        self.catalog.file(page.id().table_id())?.write_page(&page)?;
        page.mark_dirty(false, dirtier);
        page.set_before_image()?;
        Ok(())
    }

    /// Removes the oldest page that is clean and not pinned. Dirty pages are
    /// never written out to make room.
    fn evict(&self, pages: &mut Vec<(PageId, PageRef)>) -> Result<()> {
        // With the cache mutex held, a strong count of one means nobody else
        // can hold or acquire a guard on the page.
        let victim = pages.iter().position(|(_, page)| {
            Arc::strong_count(page) == 1 && page.read().is_dirty().is_none()
        });

        match victim {
            Some(index) => {
                let (pid, _) = pages.remove(index);
                debug!("evicted {}", pid);
                Ok(())
            }
            None => Err(StorageError::BufferPoolExhausted {
                capacity: self.capacity,
            }),
        }
    }
}
