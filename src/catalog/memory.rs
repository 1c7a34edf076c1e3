//! In-memory reference implementations of the catalogue contracts.
//!
//! [`MemoryEntity`] stores row tuples in a B-tree keyed by tuple id and
//! computes statistics on demand. [`BruteForceIndex`] answers proximity
//! predicates by exhaustive distance computation; it is exact, so its cost
//! carries no accuracy penalty. Both serve as reference collaborators for
//! the planner and the integration tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::{Catalog, Cursor, Entity, Index};
use crate::cost::Cost;
use crate::error::{QuiverError, Result};
use crate::expr::{BindingContext, Predicate, ProximityPredicate};
use crate::plan::traits::{PlanTrait, SortDirection, TraitMap};
use crate::statistics::ValueStatistics;
use crate::types::{ColumnDef, Name, Record, TupleId, TupleIdRange, Value};

/// An in-memory catalogue of registered entities.
#[derive(Default)]
pub struct MemoryCatalog {
    entities: RwLock<BTreeMap<Name, Arc<dyn Entity>>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity under its name.
    pub fn register(&self, entity: Arc<dyn Entity>) {
        self.entities
            .write()
            .insert(entity.name().clone(), entity);
    }
}

impl Catalog for MemoryCatalog {
    fn entity(&self, name: &Name) -> Result<Arc<dyn Entity>> {
        self.entities.read().get(name).cloned().ok_or_else(|| {
            QuiverError::schema_with_suggestions(
                name.simple(),
                &self
                    .entities
                    .read()
                    .keys()
                    .map(|n| n.simple().to_string())
                    .collect::<Vec<_>>(),
                "Entity",
            )
        })
    }

    fn entity_names(&self) -> Vec<Name> {
        self.entities.read().keys().cloned().collect()
    }
}

/// An in-memory entity over row tuples.
pub struct MemoryEntity {
    name: Name,
    columns: Vec<ColumnDef>,
    rows: RwLock<BTreeMap<u64, Box<[Value]>>>,
    next_tuple_id: AtomicU64,
    indexes: RwLock<Vec<Arc<dyn Index>>>,
}

impl MemoryEntity {
    /// Create an empty entity with the given layout.
    pub fn new(name: Name, columns: Vec<ColumnDef>) -> Arc<Self> {
        Arc::new(Self {
            name,
            columns,
            rows: RwLock::new(BTreeMap::new()),
            next_tuple_id: AtomicU64::new(0),
            indexes: RwLock::new(Vec::new()),
        })
    }

    /// Attach an index to this entity.
    pub fn add_index(&self, index: Arc<dyn Index>) {
        self.indexes.write().push(index);
    }

    fn record(&self, tuple_id: u64, values: &[Value], columns: &[ColumnDef]) -> Result<Record> {
        let layout: Arc<[ColumnDef]> = columns.to_vec().into();
        let projected = columns
            .iter()
            .map(|column| {
                self.position(column)
                    .map(|i| values[i].clone())
            })
            .collect::<Result<Vec<_>>>()?;
        Record::new(TupleId(tuple_id), layout, projected)
    }

    fn position(&self, column: &ColumnDef) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name.matches(&column.name))
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
}

impl Entity for MemoryEntity {
    fn name(&self) -> &Name {
        &self.name
    }

    fn columns(&self) -> Vec<ColumnDef> {
        self.columns.clone()
    }

    fn column_for_name(&self, name: &str) -> Result<ColumnDef> {
        let lowered = name.to_lowercase();
        self.columns
            .iter()
            .find(|c| c.name.simple() == lowered)
            .cloned()
            .ok_or_else(|| {
                QuiverError::schema_with_suggestions(
                    name,
                    &self
                        .columns
                        .iter()
                        .map(|c| c.name.simple().to_string())
                        .collect::<Vec<_>>(),
                    "Column",
                )
            })
    }

    fn count(&self) -> Result<u64> {
        Ok(self.rows.read().len() as u64)
    }

    fn scan(
        &self,
        columns: &[ColumnDef],
        range: Option<TupleIdRange>,
    ) -> Result<Box<dyn Cursor>> {
        let rows = self.rows.read();
        let records = rows
            .iter()
            .filter(|(tid, _)| range.map_or(true, |r| r.contains(TupleId(**tid))))
            .map(|(tid, values)| self.record(*tid, values, columns))
            .collect::<Result<Vec<_>>>()?;
        Ok(Box::new(MemoryCursor::new(records)))
    }

    fn fetch(&self, tuple_id: TupleId, columns: &[ColumnDef]) -> Result<Record> {
        let rows = self.rows.read();
        let values = rows.get(&tuple_id.0).ok_or_else(|| {
            QuiverError::execution(format!("tuple {tuple_id} does not exist in {}", self.name))
        })?;
        self.record(tuple_id.0, values, columns)
    }

    fn partition_for(&self, i: usize, n: usize) -> Result<TupleIdRange> {
        if n == 0 || i >= n {
            return Err(QuiverError::internal(format!(
                "invalid partition {i} of {n}"
            )));
        }
        let upper = self.next_tuple_id.load(Ordering::SeqCst);
        let width = upper.div_ceil(n as u64).max(1);
        let start = (i as u64 * width).min(upper);
        let end = ((i as u64 + 1) * width).min(upper);
        Ok(TupleIdRange::new(TupleId(start), TupleId(end)))
    }

    fn statistics(&self, column: &ColumnDef) -> Result<ValueStatistics> {
        let position = self.position(column)?;
        let rows = self.rows.read();

        let mut stats = ValueStatistics::new(column.data_type);
        let mut distinct = HashSet::new();
        for values in rows.values() {
            let value = &values[position];
            if value.is_null() {
                stats.number_of_null_entries += 1;
                continue;
            }
            stats.number_of_non_null_entries += 1;
            distinct.insert(value.clone());
            stats.min = match stats.min.take() {
                Some(min) if min.compare(value)?.is_le() => Some(min),
                _ => Some(value.clone()),
            };
            stats.max = match stats.max.take() {
                Some(max) if max.compare(value)?.is_ge() => Some(max),
                _ => Some(value.clone()),
            };
        }
        stats.number_of_distinct_entries = distinct.len() as u64;
        Ok(stats)
    }

    fn indexes(&self) -> Vec<Arc<dyn Index>> {
        self.indexes.read().clone()
    }

    fn insert(&self, values: Vec<Value>) -> Result<TupleId> {
        if values.len() != self.columns.len() {
            return Err(QuiverError::schema(format!(
                "insert into {} carries {} values for {} columns",
                self.name,
                values.len(),
                self.columns.len()
            )));
        }
        for (column, value) in self.columns.iter().zip(&values) {
            if value.is_null() && !column.nullable {
                return Err(QuiverError::schema(format!(
                    "column {} is not nullable",
                    column.name
                )));
            }
        }
        let tuple_id = self.next_tuple_id.fetch_add(1, Ordering::SeqCst);
        self.rows
            .write()
            .insert(tuple_id, values.into_boxed_slice());
        Ok(TupleId(tuple_id))
    }

    fn update(&self, tuple_id: TupleId, updates: &[(ColumnDef, Value)]) -> Result<()> {
        let positions = updates
            .iter()
            .map(|(column, _)| self.position(column))
            .collect::<Result<Vec<_>>>()?;
        let mut rows = self.rows.write();
        let values = rows.get_mut(&tuple_id.0).ok_or_else(|| {
            QuiverError::execution(format!("tuple {tuple_id} does not exist in {}", self.name))
        })?;
        for (position, (_, value)) in positions.into_iter().zip(updates) {
            values[position] = value.clone();
        }
        Ok(())
    }

    fn delete(&self, tuple_id: TupleId) -> Result<bool> {
        Ok(self.rows.write().remove(&tuple_id.0).is_some())
    }
}

/// A cursor over a materialised snapshot of records.
pub struct MemoryCursor {
    records: std::vec::IntoIter<Record>,
    closed: bool,
}

impl MemoryCursor {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records: records.into_iter(),
            closed: false,
        }
    }
}

impl Cursor for MemoryCursor {
    fn next(&mut self) -> Result<Option<Record>> {
        if self.closed {
            return Ok(None);
        }
        Ok(self.records.next())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// A brute-force proximity index: exhaustive, exact nearest/farthest
/// neighbour search over one vector column.
pub struct BruteForceIndex {
    name: Name,
    column: ColumnDef,
    entity: Weak<MemoryEntity>,
}

impl BruteForceIndex {
    /// Create an index on `column` and attach it to the entity.
    pub fn create(entity: &Arc<MemoryEntity>, index: &str, column: ColumnDef) -> Result<Arc<Self>> {
        let Name::Entity { schema, entity: entity_name } = entity.name().clone() else {
            return Err(QuiverError::internal("entity carries a non-entity name"));
        };
        let created = Arc::new(Self {
            name: Name::index(&schema, &entity_name, index)?,
            column,
            entity: Arc::downgrade(entity),
        });
        entity.add_index(created.clone());
        Ok(created)
    }

    fn proximity<'a>(&self, predicate: &'a Predicate) -> Option<&'a ProximityPredicate> {
        match predicate {
            Predicate::Proximity(p) if p.column().name.matches(&self.column.name) => Some(p),
            _ => None,
        }
    }

    fn entity(&self) -> Result<Arc<MemoryEntity>> {
        self.entity
            .upgrade()
            .ok_or_else(|| QuiverError::execution(format!("entity of index {} is gone", self.name)))
    }
}

impl Index for BruteForceIndex {
    fn name(&self) -> &Name {
        &self.name
    }

    fn can_process(&self, predicate: &Predicate) -> bool {
        self.proximity(predicate).is_some()
    }

    fn cost(&self, predicate: &Predicate) -> Cost {
        let Some(proximity) = self.proximity(predicate) else {
            return Cost::INVALID;
        };
        let rows = self
            .entity()
            .and_then(|e| e.count())
            .unwrap_or(0) as f32;
        let dimension = self.column.data_type.logical_size();
        Cost {
            io: rows * self.column.data_type.physical_size() as f32,
            cpu: rows * proximity.distance().flops(dimension),
            memory: proximity.k() as f32 * self.column.data_type.physical_size() as f32,
            accuracy: 0.0,
        }
    }

    fn columns_for(&self, predicate: &Predicate) -> Vec<ColumnDef> {
        match self.proximity(predicate) {
            Some(proximity) => vec![proximity.distance_column()],
            None => Vec::new(),
        }
    }

    fn traits_for(&self, predicate: &Predicate) -> TraitMap {
        let Some(proximity) = self.proximity(predicate) else {
            return TraitMap::new();
        };
        let direction = match proximity {
            ProximityPredicate::Nns { .. } => SortDirection::Ascending,
            ProximityPredicate::Fns { .. } => SortDirection::Descending,
        };
        [
            PlanTrait::Order(vec![(proximity.distance_column(), direction)]),
            PlanTrait::Limit(proximity.k()),
        ]
        .into_iter()
        .collect()
    }

    fn filter(
        &self,
        predicate: &Predicate,
        ctx: &BindingContext,
        partition: Option<TupleIdRange>,
    ) -> Result<Box<dyn Cursor>> {
        let proximity = self.proximity(predicate).ok_or_else(|| {
            QuiverError::not_supported(format!(
                "index {} cannot process predicate {predicate}",
                self.name
            ))
        })?;
        let query = proximity.query().value(None, ctx)?.try_as_f64_vector()?;
        let metric = proximity.distance();
        let entity = self.entity()?;

        let mut scored: Vec<(f64, TupleId)> = Vec::new();
        let mut cursor = entity.scan(&[self.column.clone()], partition)?;
        while let Some(record) = cursor.next()? {
            let probe = record.value(&self.column)?.try_as_f64_vector()?;
            scored.push((metric.compute(&probe, &query)?, record.tuple_id()));
        }
        cursor.close();

        match proximity {
            ProximityPredicate::Nns { .. } => {
                scored.sort_by(|a, b| a.0.total_cmp(&b.0));
            }
            ProximityPredicate::Fns { .. } => {
                scored.sort_by(|a, b| b.0.total_cmp(&a.0));
            }
        }
        scored.truncate(proximity.k() as usize);

        let layout: Arc<[ColumnDef]> = vec![proximity.distance_column()].into();
        let records = scored
            .into_iter()
            .map(|(distance, tuple_id)| {
                Record::new(tuple_id, layout.clone(), vec![Value::Double(distance)])
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Box::new(MemoryCursor::new(records)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::DistanceMetric;
    use crate::types::DataType;

    fn vector_entity() -> Arc<MemoryEntity> {
        let name = Name::entity("main", "features").unwrap();
        let columns = vec![ColumnDef::new(
            Name::column("main", "features", "v").unwrap(),
            DataType::FloatVector(2),
            false,
        )
        .unwrap()];
        let entity = MemoryEntity::new(name, columns);
        for i in 0..4 {
            entity
                .insert(vec![Value::FloatVector(vec![i as f32, i as f32])])
                .unwrap();
        }
        entity
    }

    #[test]
    fn test_scan_and_count() {
        let entity = vector_entity();
        assert_eq!(entity.count().unwrap(), 4);

        let mut cursor = entity.scan(&entity.columns(), None).unwrap();
        let mut seen = 0;
        while cursor.next().unwrap().is_some() {
            seen += 1;
        }
        assert_eq!(seen, 4);
    }

    #[test]
    fn test_partitions_cover_all_tuples() {
        let entity = vector_entity();
        let mut total = 0;
        for i in 0..3 {
            let range = entity.partition_for(i, 3).unwrap();
            let mut cursor = entity.scan(&entity.columns(), Some(range)).unwrap();
            while cursor.next().unwrap().is_some() {
                total += 1;
            }
        }
        assert_eq!(total, 4);
    }

    #[test]
    fn test_statistics() {
        let name = Name::entity("main", "labels").unwrap();
        let column = ColumnDef::new(
            Name::column("main", "labels", "x").unwrap(),
            DataType::Long,
            true,
        )
        .unwrap();
        let entity = MemoryEntity::new(name, vec![column.clone()]);
        for v in [Value::Long(1), Value::Long(1), Value::Long(5), Value::Null] {
            entity.insert(vec![v]).unwrap();
        }

        let stats = entity.statistics(&column).unwrap();
        assert_eq!(stats.number_of_distinct_entries, 2);
        assert_eq!(stats.number_of_non_null_entries, 3);
        assert_eq!(stats.number_of_null_entries, 1);
        assert_eq!(stats.min, Some(Value::Long(1)));
        assert_eq!(stats.max, Some(Value::Long(5)));
    }

    #[test]
    fn test_brute_force_knn() {
        let entity = vector_entity();
        let column = entity.column_for_name("v").unwrap();
        let index = BruteForceIndex::create(&entity, "knn", column.clone()).unwrap();

        let ctx = BindingContext::new();
        let predicate = Predicate::Proximity(ProximityPredicate::Nns {
            column,
            k: 3,
            distance: DistanceMetric::Euclidean,
            query: ctx.bind(Value::FloatVector(vec![0.0, 0.0])),
        });

        assert!(index.can_process(&predicate));
        assert!(!index.cost(&predicate).is_invalid());

        let mut cursor = index.filter(&predicate, &ctx, None).unwrap();
        let mut tuple_ids = Vec::new();
        let mut distances = Vec::new();
        while let Some(record) = cursor.next().unwrap() {
            tuple_ids.push(record.tuple_id());
            distances.push(record.values()[0].try_as_f64().unwrap());
        }
        assert_eq!(tuple_ids, vec![TupleId(0), TupleId(1), TupleId(2)]);
        assert!(distances.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_non_proximity_predicate_is_rejected() {
        let entity = vector_entity();
        let column = entity.column_for_name("v").unwrap();
        let index = BruteForceIndex::create(&entity, "knn", column).unwrap();

        use crate::expr::{AtomicPredicate, BooleanPredicate, ComparisonOperator};
        let ctx = BindingContext::new();
        let boolean = Predicate::Boolean(BooleanPredicate::Atomic(AtomicPredicate::new(
            ctx.bind(Value::Long(1)),
            ComparisonOperator::Equal,
            vec![ctx.bind(Value::Long(1))],
        )));
        assert!(!index.can_process(&boolean));
        assert!(index.cost(&boolean).is_invalid());
    }
}
