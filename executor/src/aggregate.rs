use crate::{ExecError, Operator, Result};
use heapdb_core::{DataType, FieldDef, Tuple, TupleDesc, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateOp {
    Min,
    Max,
    Sum,
    Avg,
    Count,
}

impl AggregateOp {
    pub fn supports(&self, data_type: DataType) -> bool {
        data_type.is_numeric() || *self == AggregateOp::Count
    }
}

impl fmt::Display for AggregateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggregateOp::Min => "min",
            AggregateOp::Max => "max",
            AggregateOp::Sum => "sum",
            AggregateOp::Avg => "avg",
            AggregateOp::Count => "count",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
struct Accumulator {
    count: i64,
    sum: i64,
    min: Option<i32>,
    max: Option<i32>,
}

impl Accumulator {
    fn add(&mut self, value: &Value) {
        self.count += 1;
        if let Some(v) = value.as_int() {
            self.sum += v as i64;
            self.min = Some(self.min.map_or(v, |m| m.min(v)));
            self.max = Some(self.max.map_or(v, |m| m.max(v)));
        }
    }

    fn finish(&self, op: AggregateOp) -> Result<i32> {
        let result = match op {
            AggregateOp::Min => self.min.map(i64::from),
            AggregateOp::Max => self.max.map(i64::from),
            AggregateOp::Sum => Some(self.sum),
            // Integer division, truncating toward zero.
            AggregateOp::Avg => Some(self.sum / self.count.max(1)),
            AggregateOp::Count => Some(self.count),
        };
        result
            .and_then(|v| i32::try_from(v).ok())
            .ok_or(ExecError::AggregateOverflow(op))
    }
}

/// Computes one aggregate over its child, optionally grouped by one field.
///
/// Output tuples are `(group, aggregate)` or just `(aggregate)`, one per
/// group in the order groups were first seen. Empty input yields nothing.
pub struct Aggregate<'a> {
    child: Box<dyn Operator + 'a>,
    agg_field: usize,
    group_field: Option<usize>,
    op: AggregateOp,
    desc: Arc<TupleDesc>,
    results: Option<Vec<Tuple>>,
    position: usize,
}

impl<'a> Aggregate<'a> {
    pub fn new(
        child: Box<dyn Operator + 'a>,
        agg_field: usize,
        group_field: Option<usize>,
        op: AggregateOp,
    ) -> Result<Self> {
        let child_desc = child.tuple_desc();
        let agg_type = child_desc
            .field_type(agg_field)
            .ok_or(ExecError::FieldOutOfRange(agg_field))?;
        if !op.supports(agg_type) {
            return Err(ExecError::UnsupportedAggregate {
                op,
                data_type: agg_type,
            });
        }

        let agg_name = match child_desc.field_name(agg_field) {
            Some(name) => format!("({op}) {name}"),
            None => format!("({op})"),
        };
        let mut fields = Vec::with_capacity(2);
        if let Some(group) = group_field {
            let group_type = child_desc
                .field_type(group)
                .ok_or(ExecError::FieldOutOfRange(group))?;
            fields.push(FieldDef::new(
                group_type,
                child_desc.field_name(group).map(str::to_string),
            ));
        }
        fields.push(FieldDef::new(DataType::Integer, Some(agg_name)));

        Ok(Self {
            child,
            agg_field,
            group_field,
            op,
            desc: Arc::new(TupleDesc::new(fields)),
            results: None,
            position: 0,
        })
    }

    pub fn op(&self) -> AggregateOp {
        self.op
    }

    pub fn group_field(&self) -> Option<usize> {
        self.group_field
    }

    pub fn agg_field(&self) -> usize {
        self.agg_field
    }

    fn compute(&mut self) -> Result<Vec<Tuple>> {
        let mut index: HashMap<Option<Value>, usize> = HashMap::new();
        let mut groups: Vec<(Option<Value>, Accumulator)> = Vec::new();

        while let Some(tuple) = self.child.next_tuple()? {
            let key = match self.group_field {
                Some(g) => Some(tuple.value(g).cloned().ok_or(ExecError::FieldOutOfRange(g))?),
                None => None,
            };
            let value = tuple
                .value(self.agg_field)
                .ok_or(ExecError::FieldOutOfRange(self.agg_field))?;

            let slot = *index.entry(key.clone()).or_insert_with(|| {
                groups.push((key, Accumulator::default()));
                groups.len() - 1
            });
            groups[slot].1.add(value);
        }

        groups
            .into_iter()
            .map(|(key, acc)| -> Result<Tuple> {
                let mut values: Vec<_> = key.into_iter().collect();
                values.push(Value::Integer(acc.finish(self.op)?));
                Ok(Tuple::new(Arc::clone(&self.desc), values)?)
            })
            .collect()
    }
}

impl Operator for Aggregate<'_> {
    fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    fn next_tuple(&mut self) -> Result<Option<Tuple>> {
        if self.results.is_none() {
            self.results = Some(self.compute()?);
        }

        let tuple = self
            .results
            .as_ref()
            .and_then(|results| results.get(self.position))
            .cloned();
        if tuple.is_some() {
            self.position += 1;
        }
        Ok(tuple)
    }

    /// Replays the computed groups without re-reading the child.
    fn rewind(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }
}
