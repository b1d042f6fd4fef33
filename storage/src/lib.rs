//! Storage engine for heapdb
//!
//! This crate provides the heap page format, heap files, the catalog that
//! maps table ids to files, and the buffer pool with its page lock table.

pub mod buffer;
pub mod catalog;
pub mod config;
pub mod file;
pub mod page;

pub use buffer::{BufferPool, LockEntry, LockMode, PageRef};
pub use catalog::Catalog;
pub use config::StorageConfig;
pub use file::{HeapFile, HeapFileIter};
pub use page::{HeapPage, PAGE_SIZE};

use heapdb_core::{PageId, SchemaError, TableId, TransactionId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Page {0} has no empty slots")]
    PageFull(PageId),

    #[error("Tuple schema does not match the schema of {0}")]
    SchemaMismatch(PageId),

    #[error("Slot {slot} of page {page_id} is already empty")]
    SlotEmpty { page_id: PageId, slot: usize },

    #[error("Invalid slot index {slot} for page {page_id}")]
    InvalidSlot { page_id: PageId, slot: usize },

    #[error("Tuple has no record id")]
    MissingRecordId,

    #[error("Tuple belongs to {found}, not {expected}")]
    ForeignRecordId { expected: PageId, found: PageId },

    #[error("Page {0} not found")]
    PageNotFound(PageId),

    #[error("Page buffer is {0} bytes, expected {size}", size = PAGE_SIZE)]
    InvalidPageSize(usize),

    #[error("Corrupt page {page_id}: {source}")]
    CorruptPage {
        page_id: PageId,
        #[source]
        source: SchemaError,
    },

    #[error("File length {0} is not a multiple of the page size")]
    InvalidFileLength(u64),

    #[error("Transaction {0} aborted")]
    TransactionAborted(TransactionId),

    #[error("All {capacity} cached pages are dirty or in use; nothing to evict")]
    BufferPoolExhausted { capacity: usize },

    #[error("Table {0} not found")]
    UnknownTable(TableId),

    #[error("Table '{0}' not found")]
    UnknownTableName(String),

    #[error("Invalid catalog schema: {0}")]
    InvalidSchema(String),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl StorageError {
    /// Only an aborted transaction is worth running again; every other error
    /// is either a caller bug or an environment failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::TransactionAborted(_))
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
