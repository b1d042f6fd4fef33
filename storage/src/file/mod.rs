// storage/src/file/mod.rs

use crate::buffer::{BufferPool, LockMode, PageRef};
use crate::page::{HeapPage, PAGE_SIZE};
use crate::{Result, StorageError};
use heapdb_core::{PageId, TableId, TransactionId, Tuple, TupleDesc};
use log::debug;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// An unordered table stored as a gap-free run of fixed-size pages.
///
/// Page `n` lives at byte offset `n * PAGE_SIZE`; there is no file header.
pub struct HeapFile {
    id: TableId,
    path: PathBuf,
    desc: Arc<TupleDesc>,
    file: Mutex<File>,
}

impl HeapFile {
    /// Opens the heap file at `path`, creating an empty one if needed.
    pub fn open(path: &Path, desc: Arc<TupleDesc>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let len = file.metadata()?.len();
        if len % PAGE_SIZE as u64 != 0 {
            return Err(StorageError::InvalidFileLength(len));
        }

        let path = path.canonicalize()?;
        let id = TableId(crc32fast::hash(path.to_string_lossy().as_bytes()));
        debug!("opened heap file {} as {} ({} pages)", path.display(), id, len / PAGE_SIZE as u64);

        Ok(Self {
            id,
            path,
            desc,
            file: Mutex::new(file),
        })
    }

    /// Stable for a given absolute path, across processes.
    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn num_pages(&self) -> Result<u32> {
        let len = self.file.lock().metadata()?.len();
        Ok((len / PAGE_SIZE as u64) as u32)
    }

    pub fn read_page(&self, pid: PageId) -> Result<HeapPage> {
        self.check_table(pid)?;

        let mut buffer = [0u8; PAGE_SIZE];
        {
            let mut file = self.file.lock();
            let num_pages = file.metadata()?.len() / PAGE_SIZE as u64;
            if pid.page_no() as u64 >= num_pages {
                return Err(StorageError::PageNotFound(pid));
            }

            file.seek(SeekFrom::Start(offset_of(pid)))?;
            file.read_exact(&mut buffer)?;
        }

        HeapPage::from_bytes(pid, Arc::clone(&self.desc), &buffer)
    }

    /// Writes `page` at its offset. The page may replace an existing page or
    /// extend the file by exactly one page.
    pub fn write_page(&self, page: &HeapPage) -> Result<()> {
        let pid = page.id();
        self.check_table(pid)?;
        let bytes = page.to_bytes()?;

        let mut file = self.file.lock();
        let num_pages = file.metadata()?.len() / PAGE_SIZE as u64;
        if pid.page_no() as u64 > num_pages {
            return Err(StorageError::PageNotFound(pid));
        }

        file.seek(SeekFrom::Start(offset_of(pid)))?;
        file.write_all(&bytes)?;
        Ok(())
    }

    /// Grows the file by one zeroed page and returns its id.
    pub fn append_empty_page(&self) -> Result<PageId> {
        let mut file = self.file.lock();
        let page_no = (file.metadata()?.len() / PAGE_SIZE as u64) as u32;
        let pid = PageId::new(self.id, page_no);

        file.seek(SeekFrom::Start(offset_of(pid)))?;
        file.write_all(&HeapPage::empty_page_bytes())?;
        debug!("appended {}", pid);

        Ok(pid)
    }

    pub fn sync(&self) -> Result<()> {
        self.file.lock().sync_all().map_err(StorageError::Io)
    }

    /// Adds `tuple` to the first page with a free slot, appending a page when
    /// all are full. Returns the one page that was modified, already marked
    /// dirty by `tid`.
    pub fn insert_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: &mut Tuple,
    ) -> Result<PageRef> {
        if tuple.desc().as_ref() != self.desc.as_ref() {
            return Err(StorageError::SchemaMismatch(PageId::new(self.id, 0)));
        }

        for page_no in 0..self.num_pages()? {
            let pid = PageId::new(self.id, page_no);
            let held_before = pool.holds_lock(tid, pid);

            let has_room = pool.get_page(tid, pid, LockMode::Shared)?.read().num_empty_slots() > 0;
            if !has_room {
                // Nothing was read that the transaction depends on.
                if !held_before {
                    pool.release_page(tid, pid);
                }
                continue;
            }

            let page = pool.get_page(tid, pid, LockMode::Exclusive)?;
            Self::insert_into(&page, tid, tuple)?;
            return Ok(page);
        }

        let pid = self.append_empty_page()?;
        let page = pool.get_page(tid, pid, LockMode::Exclusive)?;
        Self::insert_into(&page, tid, tuple)?;
        Ok(page)
    }

    fn insert_into(page: &PageRef, tid: TransactionId, tuple: &mut Tuple) -> Result<()> {
        let mut page = page.write();
        page.insert_tuple(tuple)?;
        page.mark_dirty(true, tid);
        Ok(())
    }

    /// Removes `tuple` from the page its record id points at.
    pub fn delete_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: &mut Tuple,
    ) -> Result<PageRef> {
        let rid = tuple.record_id().ok_or(StorageError::MissingRecordId)?;
        let pid = rid.page_id();
        if pid.table_id() != self.id {
            return Err(StorageError::ForeignRecordId {
                expected: PageId::new(self.id, pid.page_no()),
                found: pid,
            });
        }

        let page = pool.get_page(tid, pid, LockMode::Exclusive)?;
        {
            let mut guard = page.write();
            guard.delete_tuple(tuple)?;
            guard.mark_dirty(true, tid);
        }
        Ok(page)
    }

    /// Scans every tuple in page order, reading pages through `pool` under
    /// shared locks.
    pub fn iter<'a>(self: &Arc<Self>, pool: &'a BufferPool, tid: TransactionId) -> HeapFileIter<'a> {
        HeapFileIter {
            file: Arc::clone(self),
            pool,
            tid,
            next_page: 0,
            buffered: Vec::new().into_iter(),
            done: false,
        }
    }

    fn check_table(&self, pid: PageId) -> Result<()> {
        if pid.table_id() != self.id {
            return Err(StorageError::PageNotFound(pid));
        }
        Ok(())
    }
}

fn offset_of(pid: PageId) -> u64 {
    pid.page_no() as u64 * PAGE_SIZE as u64
}

/// Lazy tuple scan over a [`HeapFile`]. A page is fetched only once the
/// tuples of the previous one are exhausted.
pub struct HeapFileIter<'a> {
    file: Arc<HeapFile>,
    pool: &'a BufferPool,
    tid: TransactionId,
    next_page: u32,
    buffered: std::vec::IntoIter<Tuple>,
    done: bool,
}

impl HeapFileIter<'_> {
    /// Restarts the scan from page 0.
    pub fn rewind(&mut self) {
        self.next_page = 0;
        self.buffered = Vec::new().into_iter();
        self.done = false;
    }

    fn fail(&mut self, err: StorageError) -> Option<Result<Tuple>> {
        self.done = true;
        self.buffered = Vec::new().into_iter();
        Some(Err(err))
    }
}

impl Iterator for HeapFileIter<'_> {
    type Item = Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(tuple) = self.buffered.next() {
                return Some(Ok(tuple));
            }
            if self.done {
                return None;
            }

            let num_pages = match self.file.num_pages() {
                Ok(n) => n,
                Err(e) => return self.fail(e),
            };
            if self.next_page >= num_pages {
                self.done = true;
                return None;
            }

            let pid = PageId::new(self.file.id(), self.next_page);
            let page = match self.pool.get_page(self.tid, pid, LockMode::Shared) {
                Ok(page) => page,
                Err(e) => return self.fail(e),
            };
            self.buffered = page.read().iter().cloned().collect::<Vec<_>>().into_iter();
            self.next_page += 1;
        }
    }
}
