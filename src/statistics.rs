//! Column statistics and naive selectivity estimation.
//!
//! The planner retrieves a [`ValueStatistics`] object for any column and
//! feeds it to the [`NaiveSelectivityCalculator`], which maps boolean
//! predicates to output-size estimates under the usual independence
//! assumptions.

use std::collections::HashMap;

use crate::expr::{BooleanPredicate, ComparisonOperator};
use crate::types::{ColumnDef, DataType, Value};

/// Statistics describing the value distribution of one column.
#[derive(Debug, Clone)]
pub struct ValueStatistics {
    /// Data type of the column
    pub data_type: DataType,
    /// Smallest non-null value seen
    pub min: Option<Value>,
    /// Largest non-null value seen
    pub max: Option<Value>,
    /// Number of distinct non-null values
    pub number_of_distinct_entries: u64,
    /// Number of non-null entries
    pub number_of_non_null_entries: u64,
    /// Number of null entries
    pub number_of_null_entries: u64,
    /// Average width of one value in bytes
    pub avg_width: usize,
    /// Representative length for vector columns
    pub representative_length: Option<usize>,
}

impl ValueStatistics {
    /// Create empty statistics for a column of the given type.
    pub fn new(data_type: DataType) -> Self {
        Self {
            data_type,
            min: None,
            max: None,
            number_of_distinct_entries: 0,
            number_of_non_null_entries: 0,
            number_of_null_entries: 0,
            avg_width: data_type.physical_size(),
            representative_length: data_type
                .is_vector()
                .then(|| data_type.logical_size()),
        }
    }

    /// Set the observed value range.
    pub fn with_range(mut self, min: Value, max: Value) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    /// Set the number of distinct entries.
    pub fn with_distinct_entries(mut self, count: u64) -> Self {
        self.number_of_distinct_entries = count;
        self
    }

    /// Set the null/non-null counts.
    pub fn with_entries(mut self, non_null: u64, null: u64) -> Self {
        self.number_of_non_null_entries = non_null;
        self.number_of_null_entries = null;
        self
    }

    /// Set the average value width.
    pub fn with_avg_width(mut self, width: usize) -> Self {
        self.avg_width = width;
        self
    }

    /// Total number of entries, null or not.
    pub fn number_of_entries(&self) -> u64 {
        self.number_of_non_null_entries + self.number_of_null_entries
    }

    /// Fraction of entries that are null.
    pub fn null_fraction(&self) -> f64 {
        let total = self.number_of_entries();
        if total == 0 {
            return 0.0;
        }
        self.number_of_null_entries as f64 / total as f64
    }
}

/// A selectivity in `[0, 1]` that maps input row counts to expected output
/// sizes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Selectivity(f64);

impl Selectivity {
    pub const ALL: Selectivity = Selectivity(1.0);

    pub fn new(value: f64) -> Self {
        Selectivity(value.clamp(0.0, 1.0))
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    /// Expected output size for `rows` input rows.
    pub fn apply(&self, rows: u64) -> u64 {
        (rows as f64 * self.0).ceil() as u64
    }
}

/// Default selectivity of an equality comparison without statistics.
const DEFAULT_EQUALITY_SELECTIVITY: f64 = 0.1;

/// Default selectivity of a range comparison without statistics.
const DEFAULT_RANGE_SELECTIVITY: f64 = 0.33;

/// Naive, independence-assuming selectivity estimation.
///
/// Conjunctions multiply their operand selectivities; disjunctions combine
/// as `1 − Π(1 − s_i)`, clamped to `[0, 1]`.
pub struct NaiveSelectivityCalculator;

impl NaiveSelectivityCalculator {
    /// Estimate the selectivity of a predicate given per-column statistics.
    pub fn estimate(
        predicate: &BooleanPredicate,
        statistics: &HashMap<ColumnDef, ValueStatistics>,
    ) -> Selectivity {
        match predicate {
            BooleanPredicate::Atomic(atomic) => {
                let stats = atomic
                    .left
                    .column()
                    .and_then(|column| statistics.get(column));
                let selectivity = Self::atomic(atomic.op, atomic.right.len(), stats);
                if atomic.negated {
                    Selectivity::new(1.0 - selectivity.value())
                } else {
                    selectivity
                }
            }
            BooleanPredicate::Conjunction(left, right) => {
                let l = Self::estimate(left, statistics);
                let r = Self::estimate(right, statistics);
                Selectivity::new(l.value() * r.value())
            }
            BooleanPredicate::Disjunction(left, right) => {
                let l = Self::estimate(left, statistics);
                let r = Self::estimate(right, statistics);
                Selectivity::new(1.0 - (1.0 - l.value()) * (1.0 - r.value()))
            }
        }
    }

    fn atomic(
        op: ComparisonOperator,
        operands: usize,
        stats: Option<&ValueStatistics>,
    ) -> Selectivity {
        match op {
            ComparisonOperator::Equal => Selectivity::new(
                stats
                    .filter(|s| s.number_of_distinct_entries > 0)
                    .map(|s| 1.0 / s.number_of_distinct_entries as f64)
                    .unwrap_or(DEFAULT_EQUALITY_SELECTIVITY),
            ),
            ComparisonOperator::NotEqual => Selectivity::new(
                1.0 - stats
                    .filter(|s| s.number_of_distinct_entries > 0)
                    .map(|s| 1.0 / s.number_of_distinct_entries as f64)
                    .unwrap_or(DEFAULT_EQUALITY_SELECTIVITY),
            ),
            ComparisonOperator::Greater
            | ComparisonOperator::GreaterEqual
            | ComparisonOperator::Less
            | ComparisonOperator::LessEqual
            | ComparisonOperator::Between => Selectivity::new(DEFAULT_RANGE_SELECTIVITY),
            ComparisonOperator::In => Selectivity::new(
                stats
                    .filter(|s| s.number_of_distinct_entries > 0)
                    .map(|s| operands as f64 / s.number_of_distinct_entries as f64)
                    .unwrap_or(DEFAULT_EQUALITY_SELECTIVITY * operands as f64),
            ),
            ComparisonOperator::IsNull => Selectivity::new(
                stats.map(|s| s.null_fraction()).unwrap_or(0.01),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{AtomicPredicate, Binding, BindingContext};
    use crate::types::Name;

    fn column(name: &str) -> ColumnDef {
        ColumnDef::new(
            Name::column("main", "features", name).unwrap(),
            DataType::Long,
            true,
        )
        .unwrap()
    }

    fn equality(ctx: &BindingContext, name: &str) -> BooleanPredicate {
        BooleanPredicate::Atomic(AtomicPredicate::new(
            Binding::Column(column(name)),
            ComparisonOperator::Equal,
            vec![ctx.bind(Value::Long(1))],
        ))
    }

    #[test]
    fn test_equality_uses_distinct_count() {
        let ctx = BindingContext::new();
        let mut stats = HashMap::new();
        stats.insert(
            column("a"),
            ValueStatistics::new(DataType::Long).with_distinct_entries(100),
        );

        let s = NaiveSelectivityCalculator::estimate(&equality(&ctx, "a"), &stats);
        assert!((s.value() - 0.01).abs() < 1e-9);
        assert_eq!(s.apply(1_000), 10);
    }

    #[test]
    fn test_conjunction_multiplies() {
        let ctx = BindingContext::new();
        let stats = HashMap::new();
        let pred = equality(&ctx, "a").and(equality(&ctx, "b"));
        let s = NaiveSelectivityCalculator::estimate(&pred, &stats);
        assert!((s.value() - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_disjunction_complements() {
        let ctx = BindingContext::new();
        let stats = HashMap::new();
        let pred = equality(&ctx, "a").or(equality(&ctx, "b"));
        let s = NaiveSelectivityCalculator::estimate(&pred, &stats);
        assert!((s.value() - 0.19).abs() < 1e-9);
    }

    #[test]
    fn test_selectivity_is_clamped() {
        assert_eq!(Selectivity::new(1.7).value(), 1.0);
        assert_eq!(Selectivity::new(-0.2).value(), 0.0);
    }

    #[test]
    fn test_null_fraction() {
        let stats = ValueStatistics::new(DataType::Long).with_entries(75, 25);
        assert!((stats.null_fraction() - 0.25).abs() < 1e-9);
    }
}
