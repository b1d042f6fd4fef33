use crate::{Operator, Result};
use heapdb_core::{FieldDef, TableId, TransactionId, Tuple, TupleDesc};
use heapdb_storage::{BufferPool, HeapFileIter};
use std::sync::Arc;

/// Full scan of one table, in page and slot order.
pub struct SeqScan<'a> {
    table_id: TableId,
    alias: String,
    desc: Arc<TupleDesc>,
    iter: HeapFileIter<'a>,
}

impl<'a> SeqScan<'a> {
    /// Field names of the output schema are prefixed with `alias.`.
    pub fn new(pool: &'a BufferPool, tid: TransactionId, table_id: TableId, alias: &str) -> Result<Self> {
        let file = pool.catalog().file(table_id)?;
        let desc = Arc::new(aliased(file.desc(), alias));
        Ok(Self {
            table_id,
            alias: alias.to_string(),
            desc,
            iter: file.iter(pool, tid),
        })
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }
}

fn aliased(desc: &TupleDesc, alias: &str) -> TupleDesc {
    TupleDesc::new(
        desc.fields()
            .iter()
            .map(|f| {
                FieldDef::new(
                    f.data_type,
                    f.name.as_ref().map(|name| format!("{alias}.{name}")),
                )
            })
            .collect(),
    )
}

impl Operator for SeqScan<'_> {
    fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    fn next_tuple(&mut self) -> Result<Option<Tuple>> {
        let Some(stored) = self.iter.next().transpose()? else {
            return Ok(None);
        };

        let mut tuple = Tuple::new(Arc::clone(&self.desc), stored.values().to_vec())?;
        tuple.set_record_id(stored.record_id());
        Ok(Some(tuple))
    }

    fn rewind(&mut self) -> Result<()> {
        self.iter.rewind();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::people;
    use heapdb_core::{TableId, Value};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_scan_prefixes_names_and_keeps_record_ids() {
        let table = people(&[(1, "ann", 30), (2, "bob", 41)]);
        let tid = TransactionId::new();
        let mut scan = SeqScan::new(&table.pool, tid, table.table_id, "p").unwrap();

        assert_eq!(scan.tuple_desc().field_name(1), Some("p.name"));
        assert_eq!(scan.alias(), "p");

        let tuples = scan.collect_tuples().unwrap();
        assert_eq!(tuples.len(), 2);
        assert_eq!(tuples[1].value(1), Some(&Value::from("bob")));
        assert_eq!(tuples[0].record_id().unwrap().slot(), 0);
        assert_eq!(tuples[1].record_id().unwrap().slot(), 1);
    }

    #[test]
    fn test_scan_rewinds() {
        let table = people(&[(1, "ann", 30), (2, "bob", 41), (3, "cy", 19)]);
        let tid = TransactionId::new();
        let mut scan = SeqScan::new(&table.pool, tid, table.table_id, "p").unwrap();

        scan.next_tuple().unwrap();
        scan.rewind().unwrap();
        assert_eq!(scan.collect_tuples().unwrap().len(), 3);
    }

    #[test]
    fn test_scan_of_unknown_table_fails() {
        let table = people(&[]);
        let result = SeqScan::new(&table.pool, TransactionId::new(), TableId(7), "x");
        assert!(result.is_err());
    }
}
