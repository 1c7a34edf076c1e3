//! Catalogue contracts: the narrow interfaces through which the query core
//! consumes entities, columns and indexes.
//!
//! The on-disk storage engine, the concrete index structures and the
//! catalogue persistence live behind these traits; the core never prescribes
//! their internals. [`memory`] provides in-memory reference implementations
//! used by tests.

pub mod functions;
pub mod memory;
pub mod transaction;

use std::sync::Arc;

use crate::cost::Cost;
use crate::error::Result;
use crate::expr::{BindingContext, Predicate};
use crate::plan::traits::TraitMap;
use crate::statistics::ValueStatistics;
use crate::types::{ColumnDef, Name, Record, TupleId, TupleIdRange, Value};

/// A cursor over records produced by a scan or an index lookup.
///
/// Cursors must be closed deterministically at stream completion or
/// cancellation; `close` is idempotent.
pub trait Cursor: Send {
    /// Produce the next record, or `None` when exhausted.
    fn next(&mut self) -> Result<Option<Record>>;

    /// Release any resources held by this cursor.
    fn close(&mut self) {}
}

/// An entity (table) exposed to the query core.
pub trait Entity: Send + Sync {
    /// The fully qualified name of this entity.
    fn name(&self) -> &Name;

    /// All columns of this entity.
    fn columns(&self) -> Vec<ColumnDef>;

    /// Resolve a column by its simple name.
    fn column_for_name(&self, name: &str) -> Result<ColumnDef>;

    /// Number of records in this entity.
    fn count(&self) -> Result<u64>;

    /// Scan the given columns, optionally restricted to a tuple-id range.
    fn scan(&self, columns: &[ColumnDef], range: Option<TupleIdRange>)
        -> Result<Box<dyn Cursor>>;

    /// Fetch the given columns of a single record by tuple id.
    fn fetch(&self, tuple_id: TupleId, columns: &[ColumnDef]) -> Result<Record>;

    /// The tuple-id boundary of partition `i` out of `n`.
    fn partition_for(&self, i: usize, n: usize) -> Result<TupleIdRange>;

    /// Statistics for one column of this entity.
    fn statistics(&self, column: &ColumnDef) -> Result<ValueStatistics>;

    /// The indexes defined on this entity.
    fn indexes(&self) -> Vec<Arc<dyn Index>>;

    /// Insert a record; returns the assigned tuple id.
    fn insert(&self, values: Vec<Value>) -> Result<TupleId>;

    /// Overwrite the given columns of a record.
    fn update(&self, tuple_id: TupleId, updates: &[(ColumnDef, Value)]) -> Result<()>;

    /// Delete a record; returns whether it existed.
    fn delete(&self, tuple_id: TupleId) -> Result<bool>;
}

/// An index on an entity, consumed by the planner as an access path.
pub trait Index: Send + Sync {
    /// The fully qualified name of this index.
    fn name(&self) -> &Name;

    /// Whether this index can process the given predicate.
    fn can_process(&self, predicate: &Predicate) -> bool;

    /// The cost of processing the predicate through this index.
    ///
    /// Returns [`Cost::INVALID`] for predicates the index cannot process.
    fn cost(&self, predicate: &Predicate) -> Cost;

    /// The columns produced when filtering with the predicate.
    fn columns_for(&self, predicate: &Predicate) -> Vec<ColumnDef>;

    /// The traits the index-scan output carries for the predicate.
    fn traits_for(&self, predicate: &Predicate) -> TraitMap;

    /// Filter the index with a predicate, optionally within a partition.
    fn filter(
        &self,
        predicate: &Predicate,
        ctx: &BindingContext,
        partition: Option<TupleIdRange>,
    ) -> Result<Box<dyn Cursor>>;
}

/// The catalogue: resolves entity names to live entities.
pub trait Catalog: Send + Sync {
    /// Resolve an entity by name.
    fn entity(&self, name: &Name) -> Result<Arc<dyn Entity>>;

    /// Names of all registered entities.
    fn entity_names(&self) -> Vec<Name>;
}
