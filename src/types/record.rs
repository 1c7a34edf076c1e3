//! Records, tuple identifiers and column definitions.

use std::fmt;
use std::sync::Arc;

use super::{DataType, Name, Value};
use crate::error::{QuiverError, Result};

/// Stable identifier of a record within an entity.
///
/// Tuple ids are assigned by the storage layer and survive in transit, so
/// partition boundaries and back-fetches can address records directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TupleId(pub u64);

impl fmt::Display for TupleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A half-open range of tuple ids, used as a partition boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TupleIdRange {
    pub start: TupleId,
    pub end: TupleId,
}

impl TupleIdRange {
    pub fn new(start: TupleId, end: TupleId) -> Self {
        Self { start, end }
    }

    /// Whether this range contains the given tuple id.
    pub fn contains(&self, tuple_id: TupleId) -> bool {
        tuple_id >= self.start && tuple_id < self.end
    }
}

/// The definition of a column: qualified name, element type, nullability.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnDef {
    pub name: Name,
    pub data_type: DataType,
    pub nullable: bool,
}

impl ColumnDef {
    /// Create a new column definition. The name must be a column name.
    pub fn new(name: Name, data_type: DataType, nullable: bool) -> Result<Self> {
        if !matches!(name, Name::Column { .. }) {
            return Err(QuiverError::schema(format!(
                "'{name}' is not a column name"
            )));
        }
        Ok(Self {
            name,
            data_type,
            nullable,
        })
    }
}

impl fmt::Display for ColumnDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.data_type)
    }
}

/// An ordered tuple of typed values with a stable [`TupleId`].
///
/// The column layout is shared between all records emitted by one operator,
/// so cloning a record only clones its values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    tuple_id: TupleId,
    columns: Arc<[ColumnDef]>,
    values: Box<[Value]>,
}

impl Record {
    /// Create a new record. The number of values must match the layout.
    pub fn new(tuple_id: TupleId, columns: Arc<[ColumnDef]>, values: Vec<Value>) -> Result<Self> {
        if columns.len() != values.len() {
            return Err(QuiverError::internal(format!(
                "record has {} values for {} columns",
                values.len(),
                columns.len()
            )));
        }
        Ok(Self {
            tuple_id,
            columns,
            values: values.into_boxed_slice(),
        })
    }

    pub fn tuple_id(&self) -> TupleId {
        self.tuple_id
    }

    pub fn columns(&self) -> &Arc<[ColumnDef]> {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// The position of `column` in this record's layout.
    pub fn index_of(&self, column: &ColumnDef) -> Option<usize> {
        self.columns.iter().position(|c| c.name.matches(&column.name))
    }

    /// The value of `column`, or an error if the record does not carry it.
    pub fn value(&self, column: &ColumnDef) -> Result<&Value> {
        self.index_of(column)
            .map(|i| &self.values[i])
            .ok_or_else(|| {
                QuiverError::schema_with_suggestions(
                    column.name.simple(),
                    &self
                        .columns
                        .iter()
                        .map(|c| c.name.simple().to_string())
                        .collect::<Vec<_>>(),
                    "Column",
                )
            })
    }

    /// Assemble a new record carrying only the given columns, in order.
    pub fn project(&self, columns: &Arc<[ColumnDef]>) -> Result<Record> {
        let values = columns
            .iter()
            .map(|c| self.value(c).cloned())
            .collect::<Result<Vec<_>>>()?;
        Record::new(self.tuple_id, columns.clone(), values)
    }

    /// Assemble a new record extending this one with additional columns.
    pub fn extend(&self, columns: &[ColumnDef], values: Vec<Value>) -> Result<Record> {
        let mut all_columns: Vec<ColumnDef> = self.columns.to_vec();
        all_columns.extend_from_slice(columns);
        let mut all_values: Vec<Value> = self.values.to_vec();
        all_values.extend(values);
        Record::new(self.tuple_id, all_columns.into(), all_values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> Arc<[ColumnDef]> {
        vec![
            ColumnDef::new(
                Name::column("main", "features", "id").unwrap(),
                DataType::Long,
                false,
            )
            .unwrap(),
            ColumnDef::new(
                Name::column("main", "features", "label").unwrap(),
                DataType::String,
                true,
            )
            .unwrap(),
        ]
        .into()
    }

    #[test]
    fn test_record_value_lookup() {
        let columns = layout();
        let record = Record::new(
            TupleId(7),
            columns.clone(),
            vec![Value::Long(7), Value::String("a".into())],
        )
        .unwrap();

        assert_eq!(record.value(&columns[0]).unwrap(), &Value::Long(7));
        assert_eq!(
            record.value(&columns[1]).unwrap(),
            &Value::String("a".into())
        );
    }

    #[test]
    fn test_record_projection_preserves_tuple_id() {
        let columns = layout();
        let record = Record::new(
            TupleId(3),
            columns.clone(),
            vec![Value::Long(3), Value::String("b".into())],
        )
        .unwrap();

        let narrow: Arc<[ColumnDef]> = vec![columns[1].clone()].into();
        let projected = record.project(&narrow).unwrap();
        assert_eq!(projected.tuple_id(), TupleId(3));
        assert_eq!(projected.values(), &[Value::String("b".into())]);
    }

    #[test]
    fn test_arity_mismatch_is_rejected() {
        let columns = layout();
        assert!(Record::new(TupleId(0), columns, vec![Value::Long(1)]).is_err());
    }

    #[test]
    fn test_range_contains() {
        let range = TupleIdRange::new(TupleId(10), TupleId(20));
        assert!(range.contains(TupleId(10)));
        assert!(range.contains(TupleId(19)));
        assert!(!range.contains(TupleId(20)));
    }
}
