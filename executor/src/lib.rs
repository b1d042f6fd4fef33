//! Query operators for heapdb
//!
//! Operators form a pull-based tree: each call to [`Operator::next_tuple`]
//! pulls from its children until it can produce a tuple. Table access goes
//! through a [`heapdb_storage::BufferPool`] under a caller-supplied
//! transaction.

pub mod aggregate;
pub mod filter;
pub mod modify;
pub mod scan;
pub mod stats;

pub use aggregate::{Aggregate, AggregateOp};
pub use filter::{CompareOp, Filter, Predicate};
pub use modify::{Delete, Insert};
pub use scan::SeqScan;
pub use stats::{IntHistogram, StringHistogram, TableStats};

use heapdb_core::{DataType, SchemaError, Tuple, TupleDesc};
use heapdb_storage::StorageError;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Field index {0} out of range")]
    FieldOutOfRange(usize),

    #[error("Aggregate {op} is not supported on {data_type} fields")]
    UnsupportedAggregate { op: AggregateOp, data_type: DataType },

    #[error("Aggregate {0} overflowed")]
    AggregateOverflow(AggregateOp),

    #[error("Row count {0} does not fit in an integer field")]
    CountOverflow(usize),

    #[error("Child schema [{found}] does not match table schema [{expected}]")]
    SchemaMismatch { expected: String, found: String },
}

impl ExecError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecError::Storage(e) if e.is_retryable())
    }
}

pub type Result<T> = std::result::Result<T, ExecError>;

pub trait Operator {
    /// Schema of every tuple this operator produces.
    fn tuple_desc(&self) -> &Arc<TupleDesc>;

    /// The next tuple, or `None` once the operator is exhausted.
    fn next_tuple(&mut self) -> Result<Option<Tuple>>;

    /// Restarts the operator from its first tuple.
    fn rewind(&mut self) -> Result<()>;

    /// Drains the remaining tuples.
    fn collect_tuples(&mut self) -> Result<Vec<Tuple>> {
        let mut tuples = Vec::new();
        while let Some(tuple) = self.next_tuple()? {
            tuples.push(tuple);
        }
        Ok(tuples)
    }
}

impl<O: Operator + ?Sized> Operator for Box<O> {
    fn tuple_desc(&self) -> &Arc<TupleDesc> {
        (**self).tuple_desc()
    }

    fn next_tuple(&mut self) -> Result<Option<Tuple>> {
        (**self).next_tuple()
    }

    fn rewind(&mut self) -> Result<()> {
        (**self).rewind()
    }
}

/// Yields a fixed list of tuples.
pub struct TupleIterator {
    desc: Arc<TupleDesc>,
    tuples: Vec<Tuple>,
    position: usize,
}

impl TupleIterator {
    /// Every tuple must match `desc`.
    pub fn new(desc: Arc<TupleDesc>, tuples: Vec<Tuple>) -> Result<Self> {
        if let Some(bad) = tuples.iter().find(|t| **t.desc() != *desc) {
            return Err(ExecError::SchemaMismatch {
                expected: desc.to_string(),
                found: bad.desc().to_string(),
            });
        }
        Ok(Self {
            desc,
            tuples,
            position: 0,
        })
    }
}

impl Operator for TupleIterator {
    fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    fn next_tuple(&mut self) -> Result<Option<Tuple>> {
        let tuple = self.tuples.get(self.position).cloned();
        if tuple.is_some() {
            self.position += 1;
        }
        Ok(tuple)
    }

    fn rewind(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }
}
