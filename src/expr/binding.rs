//! Late-bound value references.
//!
//! A [`Binding`] is a placeholder inside a predicate or function argument
//! list that resolves at execution time to a column value, a literal, or a
//! subquery result. Literal and subquery bindings point into a shared
//! [`BindingContext`] that is filled immediately before execution; column
//! bindings resolve against the record currently flowing through the
//! operator.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{QuiverError, Result};
use crate::types::{ColumnDef, Record, Value};

/// Identifier of an independent sub-plan, used to route subquery results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub u64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

#[derive(Debug, Default)]
struct ContextInner {
    /// Literal slots; `None` until late binding fills them.
    literals: Vec<Option<Value>>,
    /// Subquery slots; filled by the filter-on-subselect operator.
    subqueries: Vec<Option<Vec<Value>>>,
}

/// The single-writer store of late-bound values for one query.
///
/// The context lives for one execution; handles are cheap clones of a shared
/// reference. It is passed as an explicit argument through planning and
/// execution, never held as a module-level singleton.
#[derive(Debug, Clone, Default)]
pub struct BindingContext {
    inner: Arc<Mutex<ContextInner>>,
}

impl BindingContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a literal value and return the binding that refers to it.
    pub fn bind(&self, value: Value) -> Binding {
        let mut inner = self.inner.lock();
        inner.literals.push(Some(value));
        Binding::Literal {
            slot: inner.literals.len() - 1,
        }
    }

    /// Register an empty literal slot, to be filled during late binding.
    pub fn bind_empty(&self) -> Binding {
        let mut inner = self.inner.lock();
        inner.literals.push(None);
        Binding::Literal {
            slot: inner.literals.len() - 1,
        }
    }

    /// Register a subquery slot fed by the sub-plan `group`.
    pub fn bind_subquery(&self, group: GroupId, column: ColumnDef) -> Binding {
        let mut inner = self.inner.lock();
        inner.subqueries.push(None);
        Binding::Subquery {
            depends_on: group,
            column,
            slot: inner.subqueries.len() - 1,
        }
    }

    /// Replace the value in a literal slot.
    pub fn update(&self, binding: &Binding, value: Value) -> Result<()> {
        match binding {
            Binding::Literal { slot } => {
                let mut inner = self.inner.lock();
                let entry = inner.literals.get_mut(*slot).ok_or_else(|| {
                    QuiverError::unbound(format!("literal slot {slot} does not exist"))
                })?;
                *entry = Some(value);
                Ok(())
            }
            other => Err(QuiverError::internal(format!(
                "cannot update non-literal binding {other}"
            ))),
        }
    }

    /// Append one value to a subquery slot.
    pub fn append_subquery_value(&self, binding: &Binding, value: Value) -> Result<()> {
        match binding {
            Binding::Subquery { slot, .. } => {
                let mut inner = self.inner.lock();
                let entry = inner.subqueries.get_mut(*slot).ok_or_else(|| {
                    QuiverError::unbound(format!("subquery slot {slot} does not exist"))
                })?;
                entry.get_or_insert_with(Vec::new).push(value);
                Ok(())
            }
            other => Err(QuiverError::internal(format!(
                "cannot append to non-subquery binding {other}"
            ))),
        }
    }

    fn literal(&self, slot: usize) -> Result<Value> {
        self.inner
            .lock()
            .literals
            .get(slot)
            .and_then(|v| v.clone())
            .ok_or_else(|| QuiverError::unbound(format!("literal slot {slot} was never filled")))
    }

    fn subquery(&self, slot: usize) -> Result<Vec<Value>> {
        self.inner
            .lock()
            .subqueries
            .get(slot)
            .and_then(|v| v.clone())
            .ok_or_else(|| {
                QuiverError::unbound(format!("subquery slot {slot} was never filled"))
            })
    }
}

/// A placeholder that resolves at execution time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Binding {
    /// The value of a column in the record under evaluation
    Column(ColumnDef),
    /// A literal value held in the binding context
    Literal { slot: usize },
    /// The result of a subquery, routed by group id
    Subquery {
        depends_on: GroupId,
        column: ColumnDef,
        slot: usize,
    },
}

impl Binding {
    /// Resolve this binding to a single value.
    ///
    /// A subquery binding resolves to its first collected value; comparison
    /// operators use this after the filter-on-subselect operator has taken
    /// exactly one record from the subquery.
    pub fn value(&self, record: Option<&Record>, ctx: &BindingContext) -> Result<Value> {
        match self {
            Binding::Column(column) => record
                .ok_or_else(|| {
                    QuiverError::unbound(format!(
                        "column binding {} evaluated without a record",
                        column.name
                    ))
                })?
                .value(column)
                .cloned(),
            Binding::Literal { slot } => ctx.literal(*slot),
            Binding::Subquery { slot, .. } => {
                let values = ctx.subquery(*slot)?;
                values.into_iter().next().ok_or_else(|| {
                    QuiverError::execution("subquery produced no record for comparison")
                })
            }
        }
    }

    /// Resolve this binding to a list of values.
    ///
    /// Column and literal bindings yield a single-element list; subquery
    /// bindings yield every collected value. Used by the `IN` operator.
    pub fn values(&self, record: Option<&Record>, ctx: &BindingContext) -> Result<Vec<Value>> {
        match self {
            Binding::Subquery { slot, .. } => ctx.subquery(*slot),
            other => Ok(vec![other.value(record, ctx)?]),
        }
    }

    /// The column this binding reads, if any.
    pub fn column(&self) -> Option<&ColumnDef> {
        match self {
            Binding::Column(column) => Some(column),
            _ => None,
        }
    }

    /// The sub-plan group this binding depends on, if any.
    pub fn depends_on(&self) -> Option<GroupId> {
        match self {
            Binding::Subquery { depends_on, .. } => Some(*depends_on),
            _ => None,
        }
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Column(column) => write!(f, "{}", column.name),
            Binding::Literal { slot } => write!(f, "?{slot}"),
            Binding::Subquery {
                depends_on, slot, ..
            } => write!(f, "subquery({depends_on}, ?{slot})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataType, Name, TupleId};

    fn column() -> ColumnDef {
        ColumnDef::new(
            Name::column("main", "features", "id").unwrap(),
            DataType::Long,
            false,
        )
        .unwrap()
    }

    #[test]
    fn test_literal_roundtrip() {
        let ctx = BindingContext::new();
        let binding = ctx.bind(Value::Long(42));
        assert_eq!(binding.value(None, &ctx).unwrap(), Value::Long(42));
    }

    #[test]
    fn test_empty_slot_is_unbound() {
        let ctx = BindingContext::new();
        let binding = ctx.bind_empty();
        assert!(matches!(
            binding.value(None, &ctx),
            Err(QuiverError::BindingNotBound { .. })
        ));

        ctx.update(&binding, Value::Int(1)).unwrap();
        assert_eq!(binding.value(None, &ctx).unwrap(), Value::Int(1));
    }

    #[test]
    fn test_column_binding_reads_record() {
        let ctx = BindingContext::new();
        let col = column();
        let record = Record::new(
            TupleId(1),
            vec![col.clone()].into(),
            vec![Value::Long(9)],
        )
        .unwrap();

        let binding = Binding::Column(col);
        assert_eq!(binding.value(Some(&record), &ctx).unwrap(), Value::Long(9));
        assert!(binding.value(None, &ctx).is_err());
    }

    #[test]
    fn test_subquery_collects_values() {
        let ctx = BindingContext::new();
        let binding = ctx.bind_subquery(GroupId(1), column());

        ctx.append_subquery_value(&binding, Value::Long(2)).unwrap();
        ctx.append_subquery_value(&binding, Value::Long(4)).unwrap();

        assert_eq!(binding.value(None, &ctx).unwrap(), Value::Long(2));
        assert_eq!(
            binding.values(None, &ctx).unwrap(),
            vec![Value::Long(2), Value::Long(4)]
        );
    }
}
