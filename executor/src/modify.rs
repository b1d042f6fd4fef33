use crate::{ExecError, Operator, Result};
use heapdb_core::{DataType, TableId, TransactionId, Tuple, TupleDesc, Value};
use heapdb_storage::BufferPool;
use log::debug;
use std::sync::Arc;

fn count_desc() -> Arc<TupleDesc> {
    Arc::new(TupleDesc::named([(DataType::Integer, "count")]))
}

fn count_tuple(desc: &Arc<TupleDesc>, count: usize) -> Result<Tuple> {
    let count = i32::try_from(count).map_err(|_| ExecError::CountOverflow(count))?;
    Ok(Tuple::new(Arc::clone(desc), vec![Value::Integer(count)])?)
}

/// Inserts every tuple of its child into a table, then yields one tuple
/// holding the number of rows inserted.
pub struct Insert<'a> {
    pool: &'a BufferPool,
    tid: TransactionId,
    child: Box<dyn Operator + 'a>,
    table_id: TableId,
    desc: Arc<TupleDesc>,
    done: bool,
}

impl<'a> Insert<'a> {
    pub fn new(
        pool: &'a BufferPool,
        tid: TransactionId,
        child: Box<dyn Operator + 'a>,
        table_id: TableId,
    ) -> Result<Self> {
        let expected = pool.catalog().tuple_desc(table_id)?;
        if **child.tuple_desc() != *expected {
            return Err(ExecError::SchemaMismatch {
                expected: expected.to_string(),
                found: child.tuple_desc().to_string(),
            });
        }

        Ok(Self {
            pool,
            tid,
            child,
            table_id,
            desc: count_desc(),
            done: false,
        })
    }
}

impl Operator for Insert<'_> {
    fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    fn next_tuple(&mut self) -> Result<Option<Tuple>> {
        if self.done {
            return Ok(None);
        }

        let mut count = 0;
        while let Some(mut tuple) = self.child.next_tuple()? {
            self.pool.insert_tuple(self.tid, self.table_id, &mut tuple)?;
            count += 1;
        }
        self.done = true;

        debug!("{} inserted {} tuples into {}", self.tid, count, self.table_id);
        count_tuple(&self.desc, count).map(Some)
    }

    fn rewind(&mut self) -> Result<()> {
        self.child.rewind()?;
        self.done = false;
        Ok(())
    }
}

/// Deletes every tuple its child yields, locating each by record id, then
/// yields one tuple holding the number of rows deleted.
pub struct Delete<'a> {
    pool: &'a BufferPool,
    tid: TransactionId,
    child: Box<dyn Operator + 'a>,
    desc: Arc<TupleDesc>,
    done: bool,
}

impl<'a> Delete<'a> {
    pub fn new(pool: &'a BufferPool, tid: TransactionId, child: Box<dyn Operator + 'a>) -> Self {
        Self {
            pool,
            tid,
            child,
            desc: count_desc(),
            done: false,
        }
    }
}

impl Operator for Delete<'_> {
    fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    fn next_tuple(&mut self) -> Result<Option<Tuple>> {
        if self.done {
            return Ok(None);
        }

        let mut count = 0;
        while let Some(mut tuple) = self.child.next_tuple()? {
            self.pool.delete_tuple(self.tid, &mut tuple)?;
            count += 1;
        }
        self.done = true;

        debug!("{} deleted {} tuples", self.tid, count);
        count_tuple(&self.desc, count).map(Some)
    }

    fn rewind(&mut self) -> Result<()> {
        self.child.rewind()?;
        self.done = false;
        Ok(())
    }
}
