use crate::{Operator, Result};
use heapdb_core::{Tuple, TupleDesc, Value};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Equals,
    GreaterThan,
    LessThan,
    LessThanOrEq,
    GreaterThanOrEq,
    /// Substring match on strings, equality on integers.
    Like,
    NotEquals,
}

impl CompareOp {
    /// `lhs op rhs`. Values of different types never compare true, not even
    /// under `NotEquals`.
    pub fn apply(&self, lhs: &Value, rhs: &Value) -> bool {
        if let (CompareOp::Like, Value::Char(a), Value::Char(b)) = (self, lhs, rhs) {
            return a.contains(b.as_str());
        }

        let Some(ordering) = lhs.partial_cmp(rhs) else {
            return false;
        };
        match self {
            CompareOp::Equals | CompareOp::Like => ordering == Ordering::Equal,
            CompareOp::NotEquals => ordering != Ordering::Equal,
            CompareOp::GreaterThan => ordering == Ordering::Greater,
            CompareOp::LessThan => ordering == Ordering::Less,
            CompareOp::LessThanOrEq => ordering != Ordering::Greater,
            CompareOp::GreaterThanOrEq => ordering != Ordering::Less,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            CompareOp::Equals => "=",
            CompareOp::GreaterThan => ">",
            CompareOp::LessThan => "<",
            CompareOp::LessThanOrEq => "<=",
            CompareOp::GreaterThanOrEq => ">=",
            CompareOp::Like => "LIKE",
            CompareOp::NotEquals => "<>",
        };
        f.write_str(symbol)
    }
}

/// Compares one field of a tuple against a constant.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    field: usize,
    op: CompareOp,
    operand: Value,
}

impl Predicate {
    pub fn new(field: usize, op: CompareOp, operand: Value) -> Self {
        Self { field, op, operand }
    }

    pub fn field(&self) -> usize {
        self.field
    }

    pub fn op(&self) -> CompareOp {
        self.op
    }

    pub fn operand(&self) -> &Value {
        &self.operand
    }

    /// False when `tuple` has no such field.
    pub fn matches(&self, tuple: &Tuple) -> bool {
        tuple
            .value(self.field)
            .is_some_and(|value| self.op.apply(value, &self.operand))
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{} {} {}", self.field, self.op, self.operand)
    }
}

/// Passes through the child's tuples that satisfy a predicate.
pub struct Filter<'a> {
    predicate: Predicate,
    child: Box<dyn Operator + 'a>,
}

impl<'a> Filter<'a> {
    pub fn new(predicate: Predicate, child: Box<dyn Operator + 'a>) -> Self {
        Self { predicate, child }
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }
}

impl Operator for Filter<'_> {
    fn tuple_desc(&self) -> &Arc<TupleDesc> {
        self.child.tuple_desc()
    }

    fn next_tuple(&mut self) -> Result<Option<Tuple>> {
        while let Some(tuple) = self.child.next_tuple()? {
            if self.predicate.matches(&tuple) {
                return Ok(Some(tuple));
            }
        }
        Ok(None)
    }

    fn rewind(&mut self) -> Result<()> {
        self.child.rewind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::SeqScan;
    use crate::test_util::people;
    use heapdb_core::TransactionId;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_compare_ops_on_integers() {
        let (one, two) = (Value::Integer(1), Value::Integer(2));
        assert!(CompareOp::LessThan.apply(&one, &two));
        assert!(CompareOp::LessThanOrEq.apply(&two, &two));
        assert!(CompareOp::GreaterThanOrEq.apply(&two, &one));
        assert!(!CompareOp::GreaterThan.apply(&one, &one));
        assert!(CompareOp::NotEquals.apply(&one, &two));
        assert!(CompareOp::Like.apply(&one, &one));
        assert!(!CompareOp::Like.apply(&one, &two));
    }

    #[test]
    fn test_like_is_substring_on_strings() {
        let name = Value::from("margaret");
        assert!(CompareOp::Like.apply(&name, &Value::from("gar")));
        assert!(!CompareOp::Like.apply(&name, &Value::from("bob")));
        assert!(CompareOp::LessThan.apply(&Value::from("ann"), &Value::from("bob")));
    }

    #[test]
    fn test_mismatched_types_never_match() {
        let (int, text) = (Value::Integer(1), Value::from("1"));
        for op in [CompareOp::Equals, CompareOp::NotEquals, CompareOp::Like, CompareOp::LessThan] {
            assert!(!op.apply(&int, &text), "{op} matched");
        }
    }

    #[test]
    fn test_filter_over_scan() {
        let table = people(&[(1, "ann", 30), (2, "bob", 41), (3, "cy", 19), (4, "di", 41)]);
        let tid = TransactionId::new();
        let scan = SeqScan::new(&table.pool, tid, table.table_id, "p").unwrap();
        let mut filter = Filter::new(
            Predicate::new(2, CompareOp::GreaterThanOrEq, Value::Integer(30)),
            Box::new(scan),
        );

        let ids: Vec<_> = filter
            .collect_tuples()
            .unwrap()
            .iter()
            .map(|t| t.value(0).cloned().unwrap())
            .collect();
        assert_eq!(ids, vec![1.into(), 2.into(), 4.into()]);

        filter.rewind().unwrap();
        assert_eq!(filter.collect_tuples().unwrap().len(), 3);
        assert_eq!(filter.tuple_desc().field_name(0), Some("p.id"));
    }

    #[test]
    fn test_predicate_on_missing_field() {
        let table = people(&[(1, "ann", 30)]);
        let tid = TransactionId::new();
        let mut scan = SeqScan::new(&table.pool, tid, table.table_id, "p").unwrap();
        let tuple = scan.next_tuple().unwrap().unwrap();
        assert!(!Predicate::new(9, CompareOp::Equals, 1.into()).matches(&tuple));
        assert_eq!(
            Predicate::new(1, CompareOp::Like, "an".into()).to_string(),
            "f1 LIKE an"
        );
    }
}
