//! The streaming execution runtime.
//!
//! A physical tree converts into a graph of streaming operators that emit
//! records lazily. Scheduling is cooperative and single-threaded per
//! operator: every operator pulls from its inputs and emits when ready.
//! Parallelism exists only between independent partitions; a partitioned
//! subtree runs as its own task and a merge operator joins the partitions.
//!
//! Pipeline breakers (sort, aggregations, distinct, filter-on-subselect
//! with respect to its subqueries) consume their input fully before
//! emitting. All operators observe the transaction's cancellation token
//! between records and close their cursors deterministically on completion,
//! failure or cancellation.

mod breaker;
mod dml;
mod merge;
mod source;
mod transform;

use std::sync::Arc;

use crate::catalog::transaction::TransactionContext;
use crate::error::Result;
use crate::expr::BindingContext;
use crate::plan::physical::PhysicalPlan;
use crate::types::{ColumnDef, Record};

/// Runtime context shared by all operators of one execution.
#[derive(Clone)]
pub struct ExecutionContext {
    /// The transaction this execution runs under
    pub transaction: Arc<TransactionContext>,
    /// Late-bound values for the query
    pub bindings: BindingContext,
    /// Bound of the channels joining partitioned subtrees
    pub channel_capacity: usize,
}

impl ExecutionContext {
    pub fn new(transaction: Arc<TransactionContext>, bindings: BindingContext) -> Self {
        Self {
            transaction,
            bindings,
            channel_capacity: 1_024,
        }
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }
}

/// A pull-based stream of records with explicit suspension at input-fetch
/// boundaries.
pub trait RecordStream: Send {
    /// The columns of the records this stream emits.
    fn columns(&self) -> &[ColumnDef];

    /// Produce the next record, or `None` once exhausted.
    fn next(&mut self) -> Result<Option<Record>>;

    /// Release held resources. Idempotent.
    fn close(&mut self) {}
}

/// Convert a physical tree into its executor tree.
///
/// Fails with [`crate::error::QuiverError::DisconnectedPlan`] when the tree
/// is not executable.
pub fn to_operator_tree(
    plan: &PhysicalPlan,
    ctx: &ExecutionContext,
) -> Result<Box<dyn RecordStream>> {
    plan.validate()?;
    build(plan, ctx)
}

/// Build the operator for one node. Callers have validated the tree.
pub(crate) fn build(
    plan: &PhysicalPlan,
    ctx: &ExecutionContext,
) -> Result<Box<dyn RecordStream>> {
    match plan {
        PhysicalPlan::EntityScan {
            entity,
            columns,
            partition,
            ..
        } => source::scan(entity, columns, *partition, ctx),
        PhysicalPlan::EntitySample {
            entity,
            columns,
            probability,
            seed,
            partition,
            ..
        } => source::sample(entity, columns, *probability, *seed, *partition, ctx),
        PhysicalPlan::IndexScan {
            index,
            predicate,
            partition,
            ..
        } => source::index_scan(index, predicate, *partition, ctx),
        PhysicalPlan::CountEntity { entity, out, .. } => source::count_entity(entity, out, ctx),
        PhysicalPlan::Fetch {
            input,
            entity,
            columns,
        } => {
            let input = build(input, ctx)?;
            transform::fetch(input, entity, columns, ctx)
        }
        PhysicalPlan::Filter {
            input, predicate, ..
        } => {
            let input = build(input, ctx)?;
            Ok(transform::filter(input, predicate.clone(), ctx))
        }
        PhysicalPlan::FilterOnSubSelect {
            input,
            subqueries,
            predicate,
            ..
        } => {
            let input = build(input, ctx)?;
            let subqueries = subqueries
                .iter()
                .map(|s| Ok((s.group(), build(s, ctx)?)))
                .collect::<Result<Vec<_>>>()?;
            Ok(breaker::filter_on_subselect(
                input,
                subqueries,
                predicate.clone(),
                ctx,
            ))
        }
        PhysicalPlan::Function {
            input,
            function,
            arguments,
            out,
        } => {
            let input = build(input, ctx)?;
            Ok(transform::function(
                input,
                function.clone(),
                arguments.clone(),
                out.clone(),
                ctx,
            ))
        }
        PhysicalPlan::NestedFunction {
            input,
            function,
            arguments,
            out,
        } => {
            let input = build(input, ctx)?;
            Ok(transform::nested_function(
                input,
                function.clone(),
                arguments.clone(),
                out.clone(),
                ctx,
            ))
        }
        PhysicalPlan::Select { input, fields } => {
            let input = build(input, ctx)?;
            Ok(transform::select(input, fields.clone()))
        }
        PhysicalPlan::SelectDistinct { input, fields } => {
            let input = build(input, ctx)?;
            Ok(breaker::select_distinct(input, fields.clone(), ctx))
        }
        PhysicalPlan::Count { input, out } => {
            let input = build(input, ctx)?;
            Ok(breaker::count(input, out.clone(), ctx))
        }
        PhysicalPlan::Exists { input, out } => {
            let input = build(input, ctx)?;
            Ok(breaker::exists(input, out.clone(), ctx))
        }
        PhysicalPlan::Aggregate {
            input,
            function,
            columns,
        } => {
            let input = build(input, ctx)?;
            Ok(breaker::aggregate(
                input,
                *function,
                columns.clone(),
                plan.columns(),
                ctx,
            ))
        }
        PhysicalPlan::Limit { input, limit } => {
            let input = build(input, ctx)?;
            Ok(transform::limit(input, *limit))
        }
        PhysicalPlan::Skip { input, skip } => {
            let input = build(input, ctx)?;
            Ok(transform::skip(input, *skip))
        }
        PhysicalPlan::Sort { input, order } => {
            let input = build(input, ctx)?;
            Ok(breaker::sort(input, order.clone(), ctx))
        }
        PhysicalPlan::Merge { inputs, order } => {
            merge::merge(inputs.clone(), order.clone(), plan.columns(), ctx)
        }
        PhysicalPlan::MergeLimitingSort {
            inputs,
            order,
            limit,
        } => merge::merge_limiting_sort(inputs.clone(), order.clone(), *limit, plan.columns(), ctx),
        PhysicalPlan::Insert { entity, rows, .. } => {
            dml::insert(entity, rows.clone(), plan.columns(), ctx)
        }
        PhysicalPlan::Update {
            input,
            entity,
            values,
        } => {
            let input = build(input, ctx)?;
            dml::update(input, entity, values.clone(), plan.columns(), ctx)
        }
        PhysicalPlan::Delete { input, entity } => {
            let input = build(input, ctx)?;
            dml::delete(input, entity, plan.columns(), ctx)
        }
    }
}

/// Drive an operator tree as a standard iterator.
///
/// The iterator closes the stream at exhaustion, on the first error, and on
/// drop, so cursors are released deterministically.
pub fn run(stream: Box<dyn RecordStream>) -> RecordIterator {
    RecordIterator {
        stream: Some(stream),
    }
}

/// Iterator adapter over a [`RecordStream`].
pub struct RecordIterator {
    stream: Option<Box<dyn RecordStream>>,
}

impl Iterator for RecordIterator {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        let stream = self.stream.as_mut()?;
        match stream.next() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.finish();
                None
            }
            Err(error) => {
                self.finish();
                Some(Err(error))
            }
        }
    }
}

impl RecordIterator {
    fn finish(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.close();
        }
    }

    /// Collect all records, failing on the first error.
    pub fn collect_records(self) -> Result<Vec<Record>> {
        self.collect()
    }
}

impl Drop for RecordIterator {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Resolve an entity through the transaction, acquiring its sub-transaction.
pub(crate) fn entity_tx(
    entity: &Arc<dyn crate::catalog::Entity>,
    ctx: &ExecutionContext,
) -> Result<Arc<dyn crate::catalog::Entity>> {
    ctx.transaction.get_tx(entity.name())
}

/// Compare two records under an order specification.
pub(crate) fn compare_records(
    a: &Record,
    b: &Record,
    order: &crate::plan::traits::OrderSpec,
) -> std::cmp::Ordering {
    use crate::plan::traits::SortDirection;
    for (column, direction) in order {
        let (Ok(left), Ok(right)) = (a.value(column), b.value(column)) else {
            continue;
        };
        let ordering = left.compare(right).unwrap_or(std::cmp::Ordering::Equal);
        let ordering = match direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        };
        if ordering != std::cmp::Ordering::Equal {
            return ordering;
        }
    }
    std::cmp::Ordering::Equal
}
