//! Boolean and proximity predicates.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use super::binding::{Binding, BindingContext, GroupId};
use crate::error::{QuiverError, Result};
use crate::types::{ColumnDef, DataType, Name, Record, Value};

/// Comparison operators usable in atomic boolean predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonOperator {
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    /// `left BETWEEN right[0] AND right[1]`
    Between,
    /// `left IN (right...)`
    In,
    /// `left IS NULL`; takes no right operand
    IsNull,
}

impl ComparisonOperator {
    /// Whether this operator compares against exactly one right operand.
    pub fn is_binary(&self) -> bool {
        matches!(
            self,
            ComparisonOperator::Equal
                | ComparisonOperator::NotEqual
                | ComparisonOperator::Greater
                | ComparisonOperator::GreaterEqual
                | ComparisonOperator::Less
                | ComparisonOperator::LessEqual
        )
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComparisonOperator::Equal => write!(f, "="),
            ComparisonOperator::NotEqual => write!(f, "!="),
            ComparisonOperator::Greater => write!(f, ">"),
            ComparisonOperator::GreaterEqual => write!(f, ">="),
            ComparisonOperator::Less => write!(f, "<"),
            ComparisonOperator::LessEqual => write!(f, "<="),
            ComparisonOperator::Between => write!(f, "BETWEEN"),
            ComparisonOperator::In => write!(f, "IN"),
            ComparisonOperator::IsNull => write!(f, "IS NULL"),
        }
    }
}

/// An atomic comparison between a left operand and zero or more right
/// operands, optionally negated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AtomicPredicate {
    pub left: Binding,
    pub op: ComparisonOperator,
    pub right: Vec<Binding>,
    pub negated: bool,
}

impl AtomicPredicate {
    pub fn new(left: Binding, op: ComparisonOperator, right: Vec<Binding>) -> Self {
        Self {
            left,
            op,
            right,
            negated: false,
        }
    }

    pub fn negated(mut self) -> Self {
        self.negated = !self.negated;
        self
    }

    /// All bindings referenced by this atomic, left operand first.
    pub fn bindings(&self) -> impl Iterator<Item = &Binding> {
        std::iter::once(&self.left).chain(self.right.iter())
    }

    /// Evaluate this atomic against a record.
    pub fn is_match(&self, record: &Record, ctx: &BindingContext) -> Result<bool> {
        let left = self.left.value(Some(record), ctx)?;
        let result = match self.op {
            ComparisonOperator::IsNull => left.is_null(),
            ComparisonOperator::Equal => !left.is_null() && left == self.operand(0, record, ctx)?,
            ComparisonOperator::NotEqual => {
                !left.is_null() && left != self.operand(0, record, ctx)?
            }
            ComparisonOperator::Greater => {
                !left.is_null() && left.compare(&self.operand(0, record, ctx)?)?.is_gt()
            }
            ComparisonOperator::GreaterEqual => {
                !left.is_null() && left.compare(&self.operand(0, record, ctx)?)?.is_ge()
            }
            ComparisonOperator::Less => {
                !left.is_null() && left.compare(&self.operand(0, record, ctx)?)?.is_lt()
            }
            ComparisonOperator::LessEqual => {
                !left.is_null() && left.compare(&self.operand(0, record, ctx)?)?.is_le()
            }
            ComparisonOperator::Between => {
                let low = self.operand(0, record, ctx)?;
                let high = self.operand(1, record, ctx)?;
                !left.is_null()
                    && left.compare(&low)?.is_ge()
                    && left.compare(&high)?.is_le()
            }
            ComparisonOperator::In => {
                let mut found = false;
                for operand in &self.right {
                    for value in operand.values(Some(record), ctx)? {
                        if !value.is_null() && value == left {
                            found = true;
                            break;
                        }
                    }
                    if found {
                        break;
                    }
                }
                !left.is_null() && found
            }
        };
        Ok(result != self.negated)
    }

    fn operand(&self, index: usize, record: &Record, ctx: &BindingContext) -> Result<Value> {
        self.right
            .get(index)
            .ok_or_else(|| {
                QuiverError::plan(format!(
                    "operator {} requires operand {index} but none was bound",
                    self.op
                ))
            })?
            .value(Some(record), ctx)
    }
}

impl fmt::Display for AtomicPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            write!(f, "NOT ")?;
        }
        write!(f, "{} {}", self.left, self.op)?;
        for operand in &self.right {
            write!(f, " {operand}")?;
        }
        Ok(())
    }
}

/// A boolean predicate: an atomic, or a conjunction/disjunction of two
/// sub-predicates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BooleanPredicate {
    Atomic(AtomicPredicate),
    Conjunction(Box<BooleanPredicate>, Box<BooleanPredicate>),
    Disjunction(Box<BooleanPredicate>, Box<BooleanPredicate>),
}

impl BooleanPredicate {
    /// The set of columns this predicate reads.
    pub fn columns(&self) -> Vec<ColumnDef> {
        let mut columns = Vec::new();
        self.collect_columns(&mut columns);
        columns.dedup();
        columns
    }

    fn collect_columns(&self, columns: &mut Vec<ColumnDef>) {
        match self {
            BooleanPredicate::Atomic(atomic) => {
                for binding in atomic.bindings() {
                    if let Some(column) = binding.column() {
                        if !columns.contains(column) {
                            columns.push(column.clone());
                        }
                    }
                }
            }
            BooleanPredicate::Conjunction(left, right)
            | BooleanPredicate::Disjunction(left, right) => {
                left.collect_columns(columns);
                right.collect_columns(columns);
            }
        }
    }

    /// All atomics in this predicate, left to right.
    pub fn atomics(&self) -> Vec<&AtomicPredicate> {
        let mut out = Vec::new();
        self.collect_atomics(&mut out);
        out
    }

    fn collect_atomics<'a>(&'a self, out: &mut Vec<&'a AtomicPredicate>) {
        match self {
            BooleanPredicate::Atomic(atomic) => out.push(atomic),
            BooleanPredicate::Conjunction(left, right)
            | BooleanPredicate::Disjunction(left, right) => {
                left.collect_atomics(out);
                right.collect_atomics(out);
            }
        }
    }

    /// Sub-plan groups this predicate depends on through subquery bindings.
    pub fn depends_on(&self) -> Vec<GroupId> {
        let mut groups: Vec<GroupId> = self
            .atomics()
            .iter()
            .flat_map(|a| a.bindings())
            .filter_map(|b| b.depends_on())
            .collect();
        groups.sort();
        groups.dedup();
        groups
    }

    /// A stable, structure-sensitive digest of this predicate.
    pub fn digest(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }

    /// Evaluate this predicate against a record.
    pub fn is_match(&self, record: &Record, ctx: &BindingContext) -> Result<bool> {
        match self {
            BooleanPredicate::Atomic(atomic) => atomic.is_match(record, ctx),
            BooleanPredicate::Conjunction(left, right) => {
                Ok(left.is_match(record, ctx)? && right.is_match(record, ctx)?)
            }
            BooleanPredicate::Disjunction(left, right) => {
                Ok(left.is_match(record, ctx)? || right.is_match(record, ctx)?)
            }
        }
    }

    /// Combine with another predicate into a conjunction.
    pub fn and(self, other: BooleanPredicate) -> BooleanPredicate {
        BooleanPredicate::Conjunction(Box::new(self), Box::new(other))
    }

    /// Combine with another predicate into a disjunction.
    pub fn or(self, other: BooleanPredicate) -> BooleanPredicate {
        BooleanPredicate::Disjunction(Box::new(self), Box::new(other))
    }
}

impl fmt::Display for BooleanPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BooleanPredicate::Atomic(atomic) => write!(f, "{atomic}"),
            BooleanPredicate::Conjunction(left, right) => write!(f, "({left} AND {right})"),
            BooleanPredicate::Disjunction(left, right) => write!(f, "({left} OR {right})"),
        }
    }
}

/// Distance metric used by proximity predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DistanceMetric {
    Euclidean,
    SquaredEuclidean,
    Manhattan,
    Cosine,
    InnerProduct,
}

impl DistanceMetric {
    /// The registry name of the function implementing this metric.
    pub fn function_name(&self) -> &'static str {
        match self {
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::SquaredEuclidean => "squaredeuclidean",
            DistanceMetric::Manhattan => "manhattan",
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::InnerProduct => "innerproduct",
        }
    }

    /// Compute the distance between two equally long vectors.
    pub fn compute(&self, a: &[f64], b: &[f64]) -> Result<f64> {
        if a.len() != b.len() {
            return Err(QuiverError::type_error(format!(
                "vector dimensions do not match: {} vs {}",
                a.len(),
                b.len()
            )));
        }
        let distance = match self {
            DistanceMetric::Euclidean => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f64>()
                .sqrt(),
            DistanceMetric::SquaredEuclidean => {
                a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
            }
            DistanceMetric::Manhattan => a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum(),
            DistanceMetric::Cosine => {
                let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
                let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
                if norm_a == 0.0 || norm_b == 0.0 {
                    1.0
                } else {
                    1.0 - dot / (norm_a * norm_b)
                }
            }
            DistanceMetric::InnerProduct => -a.iter().zip(b).map(|(x, y)| x * y).sum::<f64>(),
        };
        Ok(distance)
    }

    /// Floating-point operations needed for one distance computation.
    pub fn flops(&self, dimension: usize) -> f32 {
        match self {
            DistanceMetric::Euclidean | DistanceMetric::SquaredEuclidean => {
                (3 * dimension) as f32
            }
            DistanceMetric::Manhattan => (2 * dimension) as f32,
            DistanceMetric::Cosine => (6 * dimension) as f32,
            DistanceMetric::InnerProduct => (2 * dimension) as f32,
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.function_name())
    }
}

/// A proximity predicate: nearest- or farthest-neighbour search on a vector
/// column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProximityPredicate {
    /// k-nearest-neighbour search
    Nns {
        column: ColumnDef,
        k: u64,
        distance: DistanceMetric,
        query: Binding,
    },
    /// k-farthest-neighbour search
    Fns {
        column: ColumnDef,
        k: u64,
        distance: DistanceMetric,
        query: Binding,
    },
}

impl ProximityPredicate {
    /// The vector column searched by this predicate.
    pub fn column(&self) -> &ColumnDef {
        match self {
            ProximityPredicate::Nns { column, .. } | ProximityPredicate::Fns { column, .. } => {
                column
            }
        }
    }

    /// The number of neighbours to return.
    pub fn k(&self) -> u64 {
        match self {
            ProximityPredicate::Nns { k, .. } | ProximityPredicate::Fns { k, .. } => *k,
        }
    }

    /// The distance metric in use.
    pub fn distance(&self) -> DistanceMetric {
        match self {
            ProximityPredicate::Nns { distance, .. }
            | ProximityPredicate::Fns { distance, .. } => *distance,
        }
    }

    /// The query-vector binding.
    pub fn query(&self) -> &Binding {
        match self {
            ProximityPredicate::Nns { query, .. } | ProximityPredicate::Fns { query, .. } => query,
        }
    }

    /// The synthetic column carrying the computed distance.
    pub fn distance_column(&self) -> ColumnDef {
        let column = self.column();
        let name = match &column.name {
            Name::Column { schema, entity, .. } => Name::Column {
                schema: schema.clone(),
                entity: entity.clone(),
                column: "distance".to_string(),
            },
            other => other.clone(),
        };
        ColumnDef {
            name,
            data_type: DataType::Double,
            nullable: false,
        }
    }

    /// The set of columns this predicate reads.
    pub fn columns(&self) -> Vec<ColumnDef> {
        let mut columns = vec![self.column().clone()];
        if let Some(column) = self.query().column() {
            columns.push(column.clone());
        }
        columns
    }

    /// A stable, structure-sensitive digest of this predicate.
    pub fn digest(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

impl fmt::Display for ProximityPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProximityPredicate::Nns {
                column,
                k,
                distance,
                query,
            } => write!(f, "NNS({}, k={k}, {distance}, {query})", column.name),
            ProximityPredicate::Fns {
                column,
                k,
                distance,
                query,
            } => write!(f, "FNS({}, k={k}, {distance}, {query})", column.name),
        }
    }
}

/// Any predicate an index may be asked to process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Predicate {
    Boolean(BooleanPredicate),
    Proximity(ProximityPredicate),
}

impl Predicate {
    /// The set of columns this predicate reads.
    pub fn columns(&self) -> Vec<ColumnDef> {
        match self {
            Predicate::Boolean(p) => p.columns(),
            Predicate::Proximity(p) => p.columns(),
        }
    }

    /// A stable, structure-sensitive digest of this predicate.
    pub fn digest(&self) -> u64 {
        match self {
            Predicate::Boolean(p) => p.digest(),
            Predicate::Proximity(p) => p.digest(),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Boolean(p) => write!(f, "{p}"),
            Predicate::Proximity(p) => write!(f, "{p}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TupleId;
    use std::sync::Arc;

    fn column(name: &str) -> ColumnDef {
        ColumnDef::new(
            Name::column("main", "features", name).unwrap(),
            DataType::Long,
            true,
        )
        .unwrap()
    }

    fn record(values: Vec<Value>) -> Record {
        let columns: Arc<[ColumnDef]> = vec![column("a"), column("b")].into();
        Record::new(TupleId(0), columns, values).unwrap()
    }

    #[test]
    fn test_atomic_comparison() {
        let ctx = BindingContext::new();
        let pred = AtomicPredicate::new(
            Binding::Column(column("a")),
            ComparisonOperator::Greater,
            vec![ctx.bind(Value::Long(5))],
        );

        assert!(pred
            .is_match(&record(vec![Value::Long(7), Value::Null]), &ctx)
            .unwrap());
        assert!(!pred
            .is_match(&record(vec![Value::Long(3), Value::Null]), &ctx)
            .unwrap());
    }

    #[test]
    fn test_null_never_matches_comparison() {
        let ctx = BindingContext::new();
        let pred = AtomicPredicate::new(
            Binding::Column(column("a")),
            ComparisonOperator::Equal,
            vec![ctx.bind(Value::Long(1))],
        );
        assert!(!pred
            .is_match(&record(vec![Value::Null, Value::Null]), &ctx)
            .unwrap());
    }

    #[test]
    fn test_negation() {
        let ctx = BindingContext::new();
        let pred = AtomicPredicate::new(
            Binding::Column(column("a")),
            ComparisonOperator::IsNull,
            vec![],
        )
        .negated();

        assert!(pred
            .is_match(&record(vec![Value::Long(1), Value::Null]), &ctx)
            .unwrap());
        assert!(!pred
            .is_match(&record(vec![Value::Null, Value::Null]), &ctx)
            .unwrap());
    }

    #[test]
    fn test_in_skips_nulls() {
        let ctx = BindingContext::new();
        let sub = ctx.bind_subquery(GroupId(9), column("b"));
        ctx.append_subquery_value(&sub, Value::Null).unwrap();
        ctx.append_subquery_value(&sub, Value::Long(2)).unwrap();

        let pred = AtomicPredicate::new(
            Binding::Column(column("a")),
            ComparisonOperator::In,
            vec![sub],
        );
        assert!(pred
            .is_match(&record(vec![Value::Long(2), Value::Null]), &ctx)
            .unwrap());
        assert!(!pred
            .is_match(&record(vec![Value::Long(3), Value::Null]), &ctx)
            .unwrap());
    }

    #[test]
    fn test_conjunction_and_disjunction() {
        let ctx = BindingContext::new();
        let gt = BooleanPredicate::Atomic(AtomicPredicate::new(
            Binding::Column(column("a")),
            ComparisonOperator::Greater,
            vec![ctx.bind(Value::Long(0))],
        ));
        let lt = BooleanPredicate::Atomic(AtomicPredicate::new(
            Binding::Column(column("a")),
            ComparisonOperator::Less,
            vec![ctx.bind(Value::Long(10))],
        ));

        let both = gt.clone().and(lt.clone());
        assert!(both
            .is_match(&record(vec![Value::Long(5), Value::Null]), &ctx)
            .unwrap());
        assert!(!both
            .is_match(&record(vec![Value::Long(11), Value::Null]), &ctx)
            .unwrap());

        let either = gt.and(lt.clone()).or(lt);
        assert!(either
            .is_match(&record(vec![Value::Long(-3), Value::Null]), &ctx)
            .unwrap());
    }

    #[test]
    fn test_digest_is_structure_sensitive() {
        let ctx = BindingContext::new();
        let base = BooleanPredicate::Atomic(AtomicPredicate::new(
            Binding::Column(column("a")),
            ComparisonOperator::Equal,
            vec![ctx.bind(Value::Long(1))],
        ));
        let other = BooleanPredicate::Atomic(AtomicPredicate::new(
            Binding::Column(column("b")),
            ComparisonOperator::Equal,
            vec![ctx.bind(Value::Long(1))],
        ));

        assert_eq!(base.digest(), base.clone().digest());
        assert_ne!(base.digest(), other.digest());
    }

    #[test]
    fn test_distance_metrics() {
        let a = [0.0, 0.0];
        let b = [3.0, 4.0];
        assert!((DistanceMetric::Euclidean.compute(&a, &b).unwrap() - 5.0).abs() < 1e-9);
        assert!(
            (DistanceMetric::SquaredEuclidean.compute(&a, &b).unwrap() - 25.0).abs() < 1e-9
        );
        assert!((DistanceMetric::Manhattan.compute(&a, &b).unwrap() - 7.0).abs() < 1e-9);
        assert!(DistanceMetric::Euclidean.compute(&a, &[1.0]).is_err());
    }
}
