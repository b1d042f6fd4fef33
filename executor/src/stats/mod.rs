//! Per-table statistics for cost estimation.

mod histogram;

pub use histogram::{IntHistogram, StringHistogram};

use crate::filter::CompareOp;
use crate::{ExecError, Result};
use heapdb_core::{DataType, SchemaError, TableId, TransactionId, TupleDesc, Value};
use heapdb_storage::BufferPool;
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;

/// Cost of reading one page, in arbitrary units.
pub const IO_COST_PER_PAGE: f64 = 1000.0;

/// Buckets per column histogram.
pub const NUM_HIST_BINS: usize = 100;

#[derive(Debug, Clone)]
enum ColumnHistogram {
    Int(IntHistogram),
    Str(StringHistogram),
}

#[derive(Debug, Clone)]
pub struct TableStats {
    table_id: TableId,
    desc: Arc<TupleDesc>,
    io_cost_per_page: f64,
    num_pages: u32,
    num_tuples: usize,
    histograms: Vec<ColumnHistogram>,
}

impl TableStats {
    /// Scans the table twice in a transaction of its own: once for each
    /// integer column's bounds, once to fill the histograms.
    pub fn compute(pool: &BufferPool, table_id: TableId, io_cost_per_page: f64) -> Result<Self> {
        let tid = TransactionId::new();
        match Self::scan(pool, tid, table_id, io_cost_per_page) {
            Ok(stats) => {
                pool.transaction_complete(tid, true)?;
                Ok(stats)
            }
            Err(e) => {
                if let Err(abort) = pool.transaction_complete(tid, false) {
                    warn!("failed to abort statistics scan {}: {}", tid, abort);
                }
                Err(e)
            }
        }
    }

    /// Statistics for every table in the pool's catalog, keyed by table name.
    pub fn compute_all(pool: &BufferPool) -> Result<HashMap<String, TableStats>> {
        let catalog = pool.catalog();
        let mut all = HashMap::new();
        for table_id in catalog.table_ids() {
            let stats = Self::compute(pool, table_id, IO_COST_PER_PAGE)?;
            all.insert(catalog.table_name(table_id)?, stats);
        }
        info!("computed statistics for {} tables", all.len());
        Ok(all)
    }

    fn scan(
        pool: &BufferPool,
        tid: TransactionId,
        table_id: TableId,
        io_cost_per_page: f64,
    ) -> Result<Self> {
        let file = pool.catalog().file(table_id)?;
        let desc = Arc::clone(file.desc());

        let mut bounds: Vec<Option<(i32, i32)>> = vec![None; desc.num_fields()];
        let mut num_tuples = 0;
        for tuple in file.iter(pool, tid) {
            let tuple = tuple?;
            num_tuples += 1;
            for (bound, value) in bounds.iter_mut().zip(tuple.values()) {
                if let Some(v) = value.as_int() {
                    *bound = Some(match *bound {
                        Some((lo, hi)) => (lo.min(v), hi.max(v)),
                        None => (v, v),
                    });
                }
            }
        }

        let mut histograms: Vec<_> = desc
            .types()
            .zip(&bounds)
            .map(|(data_type, bound)| match data_type {
                DataType::Integer => {
                    let (lo, hi) = bound.unwrap_or((0, 0));
                    ColumnHistogram::Int(IntHistogram::new(NUM_HIST_BINS, lo, hi))
                }
                DataType::Char(_) => ColumnHistogram::Str(StringHistogram::new(NUM_HIST_BINS)),
            })
            .collect();

        for tuple in file.iter(pool, tid) {
            let tuple = tuple?;
            for (histogram, value) in histograms.iter_mut().zip(tuple.values()) {
                match (histogram, value) {
                    (ColumnHistogram::Int(h), Value::Integer(v)) => h.add_value(*v),
                    (ColumnHistogram::Str(h), Value::Char(s)) => h.add_value(s),
                    _ => {}
                }
            }
        }

        let num_pages = file.num_pages()?;
        info!(
            "{}: {} tuples on {} pages",
            table_id, num_tuples, num_pages
        );

        Ok(Self {
            table_id,
            desc,
            io_cost_per_page,
            num_pages,
            num_tuples,
            histograms,
        })
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    /// Cost of a full sequential scan: every page is read once.
    pub fn estimate_scan_cost(&self) -> f64 {
        self.num_pages as f64 * self.io_cost_per_page
    }

    /// Tuples expected to survive a predicate of the given selectivity.
    pub fn estimate_table_cardinality(&self, selectivity: f64) -> usize {
        (self.num_tuples as f64 * selectivity) as usize
    }

    /// Estimated selectivity of `field op constant`.
    pub fn estimate_selectivity(&self, field: usize, op: CompareOp, constant: &Value) -> Result<f64> {
        match (self.histogram(field)?, constant) {
            (ColumnHistogram::Int(h), Value::Integer(v)) => Ok(h.estimate_selectivity(op, *v)),
            (ColumnHistogram::Str(h), Value::Char(s)) => Ok(h.estimate_selectivity(op, s)),
            (_, value) => Err(ExecError::Schema(SchemaError::Incompatible {
                data_type: self.desc.field_type(field).ok_or(ExecError::FieldOutOfRange(field))?,
                value: value.clone(),
            })),
        }
    }

    /// Expected selectivity of `field op c` for a constant `c` taken from the
    /// column itself.
    pub fn avg_selectivity(&self, field: usize, op: CompareOp) -> Result<f64> {
        Ok(match self.histogram(field)? {
            ColumnHistogram::Int(h) => h.avg_selectivity(op),
            ColumnHistogram::Str(h) => h.avg_selectivity(op),
        })
    }

    pub fn total_tuples(&self) -> usize {
        self.num_tuples
    }

    fn histogram(&self, field: usize) -> Result<&ColumnHistogram> {
        self.histograms
            .get(field)
            .ok_or(ExecError::FieldOutOfRange(field))
    }
}
