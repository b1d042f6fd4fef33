use crate::filter::CompareOp;

/// Equal-width histogram over an integer column.
///
/// Values between `min` and `max` (inclusive) are counted in `buckets`
/// buckets; values outside the range are counted in the nearest end bucket.
/// Selectivities assume values are spread uniformly within a bucket.
#[derive(Debug, Clone)]
pub struct IntHistogram {
    counts: Vec<u64>,
    min: i32,
    max: i32,
    width: f64,
    total: u64,
}

impl IntHistogram {
    /// # Panics
    ///
    /// If `buckets` is zero or `min > max`.
    pub fn new(buckets: usize, min: i32, max: i32) -> Self {
        assert!(buckets > 0, "histogram needs at least one bucket");
        assert!(min <= max, "histogram range is empty: {min} > {max}");

        let span = max as f64 - min as f64 + 1.0;
        Self {
            counts: vec![0; buckets],
            min,
            max,
            width: (span / buckets as f64).max(1.0),
            total: 0,
        }
    }

    pub fn num_buckets(&self) -> usize {
        self.counts.len()
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn add_value(&mut self, v: i32) {
        let bucket = self.bucket_of(v.clamp(self.min, self.max));
        self.counts[bucket] += 1;
        self.total += 1;
    }

    /// Estimated fraction of counted values `x` for which `x op v` holds.
    pub fn estimate_selectivity(&self, op: CompareOp, v: i32) -> f64 {
        if self.total == 0 {
            return 0.0;
        }

        let selectivity = match op {
            CompareOp::Equals | CompareOp::Like => self.equal_fraction(v),
            CompareOp::NotEquals => 1.0 - self.equal_fraction(v),
            CompareOp::LessThan => self.less_fraction(v),
            CompareOp::LessThanOrEq => self.less_fraction(v) + self.equal_fraction(v),
            CompareOp::GreaterThan => 1.0 - self.less_fraction(v) - self.equal_fraction(v),
            CompareOp::GreaterThanOrEq => 1.0 - self.less_fraction(v),
        };
        selectivity.clamp(0.0, 1.0)
    }

    /// Expected selectivity of `x op c` when `c` is drawn from the counted
    /// values themselves.
    pub fn avg_selectivity(&self, op: CompareOp) -> f64 {
        if self.total == 0 {
            return 0.0;
        }

        let total = self.total as f64;
        let equal: f64 = self
            .counts
            .iter()
            .map(|&h| {
                let share = h as f64 / total;
                share * share / self.width
            })
            .sum();

        let selectivity = match op {
            CompareOp::Equals | CompareOp::Like => equal,
            CompareOp::NotEquals => 1.0 - equal,
            CompareOp::LessThan | CompareOp::GreaterThan => (1.0 - equal) / 2.0,
            CompareOp::LessThanOrEq | CompareOp::GreaterThanOrEq => (1.0 + equal) / 2.0,
        };
        selectivity.clamp(0.0, 1.0)
    }

    fn bucket_of(&self, v: i32) -> usize {
        let offset = ((v as f64 - self.min as f64) / self.width).floor() as usize;
        offset.min(self.counts.len() - 1)
    }

    fn in_range(&self, v: i32) -> bool {
        (self.min..=self.max).contains(&v)
    }

    fn equal_fraction(&self, v: i32) -> f64 {
        if !self.in_range(v) {
            return 0.0;
        }
        let h = self.counts[self.bucket_of(v)] as f64;
        (h / self.width) / self.total as f64
    }

    fn less_fraction(&self, v: i32) -> f64 {
        if v <= self.min {
            return 0.0;
        }
        if v > self.max {
            return 1.0;
        }

        let bucket = self.bucket_of(v);
        let below: u64 = self.counts[..bucket].iter().sum();
        let left = self.min as f64 + bucket as f64 * self.width;
        let part = ((v as f64 - left) / self.width).clamp(0.0, 1.0);

        (below as f64 + self.counts[bucket] as f64 * part) / self.total as f64
    }
}

/// Histogram over a string column, keyed on each string's first four bytes.
#[derive(Debug, Clone)]
pub struct StringHistogram {
    inner: IntHistogram,
}

impl StringHistogram {
    pub fn new(buckets: usize) -> Self {
        Self {
            inner: IntHistogram::new(buckets, string_key(""), string_key("zzzz")),
        }
    }

    pub fn add_value(&mut self, s: &str) {
        self.inner.add_value(string_key(s));
    }

    /// `Like` is estimated as equality on the four-byte prefix.
    pub fn estimate_selectivity(&self, op: CompareOp, s: &str) -> f64 {
        self.inner.estimate_selectivity(op, string_key(s))
    }

    pub fn avg_selectivity(&self, op: CompareOp) -> f64 {
        self.inner.avg_selectivity(op)
    }

    pub fn total(&self) -> u64 {
        self.inner.total()
    }
}

/// Order-preserving map from a string's first four bytes to an integer.
fn string_key(s: &str) -> i32 {
    let mut prefix = [0u8; 4];
    for (dst, src) in prefix.iter_mut().zip(s.bytes()) {
        *dst = src;
    }
    (u32::from_be_bytes(prefix) >> 1) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const OPS: [CompareOp; 7] = [
        CompareOp::Equals,
        CompareOp::GreaterThan,
        CompareOp::LessThan,
        CompareOp::LessThanOrEq,
        CompareOp::GreaterThanOrEq,
        CompareOp::Like,
        CompareOp::NotEquals,
    ];

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_exact_buckets() {
        // Ten buckets over 1..=10, one value per bucket.
        let mut h = IntHistogram::new(10, 1, 10);
        for v in 1..=10 {
            h.add_value(v);
        }

        assert!(approx(h.estimate_selectivity(CompareOp::Equals, 3), 0.1));
        assert!(approx(h.estimate_selectivity(CompareOp::LessThan, 3), 0.2));
        assert!(approx(h.estimate_selectivity(CompareOp::LessThanOrEq, 3), 0.3));
        assert!(approx(h.estimate_selectivity(CompareOp::GreaterThan, 3), 0.7));
        assert!(approx(h.estimate_selectivity(CompareOp::GreaterThanOrEq, 3), 0.8));
        assert!(approx(h.estimate_selectivity(CompareOp::NotEquals, 3), 0.9));
    }

    #[test]
    fn test_out_of_range_constants() {
        let mut h = IntHistogram::new(5, 0, 99);
        for v in 0..100 {
            h.add_value(v);
        }

        assert_eq!(h.estimate_selectivity(CompareOp::Equals, -5), 0.0);
        assert_eq!(h.estimate_selectivity(CompareOp::Equals, 500), 0.0);
        assert_eq!(h.estimate_selectivity(CompareOp::LessThan, -5), 0.0);
        assert_eq!(h.estimate_selectivity(CompareOp::GreaterThan, -5), 1.0);
        assert_eq!(h.estimate_selectivity(CompareOp::LessThan, 500), 1.0);
        assert_eq!(h.estimate_selectivity(CompareOp::GreaterThan, 500), 0.0);
        assert_eq!(h.estimate_selectivity(CompareOp::NotEquals, 500), 1.0);
    }

    #[test]
    fn test_skew_is_reflected() {
        let mut h = IntHistogram::new(10, 0, 99);
        for _ in 0..90 {
            h.add_value(5);
        }
        for v in 50..60 {
            h.add_value(v);
        }

        assert!(h.estimate_selectivity(CompareOp::LessThan, 10) > 0.85);
        assert!(h.estimate_selectivity(CompareOp::GreaterThan, 50) < 0.15);
        assert!(h.avg_selectivity(CompareOp::Equals) > 0.05);
    }

    #[test]
    fn test_empty_histogram_selects_nothing() {
        let h = IntHistogram::new(10, 0, 0);
        for op in OPS {
            assert_eq!(h.estimate_selectivity(op, 0), 0.0);
            assert_eq!(h.avg_selectivity(op), 0.0);
        }
    }

    #[test]
    fn test_out_of_range_values_land_in_end_buckets() {
        let mut h = IntHistogram::new(4, 0, 3);
        h.add_value(-100);
        h.add_value(100);
        assert_eq!(h.total(), 2);
        assert!(approx(h.estimate_selectivity(CompareOp::Equals, 0), 0.5));
        assert!(approx(h.estimate_selectivity(CompareOp::Equals, 3), 0.5));
    }

    #[test]
    fn test_string_keys_preserve_prefix_order() {
        assert!(string_key("") < string_key("a"));
        assert!(string_key("apple") < string_key("banana"));
        assert_eq!(string_key("zzzz"), string_key("zzzzzz"));

        let mut h = StringHistogram::new(100);
        for s in ["ant", "bee", "cat", "dog"] {
            h.add_value(s);
        }
        assert_eq!(h.total(), 4);
        assert!(h.estimate_selectivity(CompareOp::LessThan, "c") > 0.4);
        assert_eq!(h.estimate_selectivity(CompareOp::GreaterThan, "zzzz"), 0.0);
    }

    proptest! {
        #[test]
        fn prop_selectivities_are_fractions(
            values in prop::collection::vec(-1_000i32..1_000, 1..200),
            buckets in 1usize..50,
            probe in -1_500i32..1_500,
        ) {
            let mut h = IntHistogram::new(buckets, -1_000, 999);
            for v in &values {
                h.add_value(*v);
            }

            for op in OPS {
                let s = h.estimate_selectivity(op, probe);
                prop_assert!((0.0..=1.0).contains(&s), "{} {} -> {}", op, probe, s);
            }
            let lt = h.estimate_selectivity(CompareOp::LessThan, probe);
            let ge = h.estimate_selectivity(CompareOp::GreaterThanOrEq, probe);
            prop_assert!((lt + ge - 1.0).abs() < 1e-9);
        }
    }
}
