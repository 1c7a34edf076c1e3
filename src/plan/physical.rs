//! The physical operator tree.
//!
//! Physical nodes carry everything the runtime needs: resolved functions,
//! selectivity estimates, partition bounds and cost estimates. A physical
//! plan is executable iff every leaf is executable and every intermediate
//! operator finds its required columns among its inputs; [`PhysicalPlan::validate`]
//! checks this before the tree is converted to an executor.
//!
//! Cost convention: [`crate::catalog::Index::cost`] reports abstract units
//! (bytes read, floating-point operations, bytes held); node costs convert
//! them to comparable figures through the policy's unit costs.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use super::logical::{synthetic_column, AggregateFunction};
use super::traits::{OrderSpec, PlanTrait, TraitMap, TraitType};
use super::{Arity, GroupIdGenerator};
use crate::catalog::functions::RecordFunction;
use crate::catalog::{Entity, Index};
use crate::cost::{Cost, CostPolicy};
use crate::error::{QuiverError, Result};
use crate::expr::{Binding, BooleanPredicate, GroupId, Predicate};
use crate::statistics::Selectivity;
use crate::types::{ColumnDef, DataType, Value};

/// A physical query plan node.
#[derive(Clone)]
pub enum PhysicalPlan {
    EntityScan {
        group: GroupId,
        entity: Arc<dyn Entity>,
        columns: Vec<ColumnDef>,
        /// Row count of the entity at planning time
        rows: u64,
        /// `(index, of)` partition bounds, set by the partitioner
        partition: Option<(usize, usize)>,
    },

    EntitySample {
        group: GroupId,
        entity: Arc<dyn Entity>,
        columns: Vec<ColumnDef>,
        probability: f32,
        seed: u64,
        rows: u64,
        partition: Option<(usize, usize)>,
    },

    IndexScan {
        group: GroupId,
        index: Arc<dyn Index>,
        predicate: Predicate,
        /// Estimated output rows
        rows: u64,
        partition: Option<(usize, usize)>,
    },

    CountEntity {
        group: GroupId,
        entity: Arc<dyn Entity>,
        out: ColumnDef,
    },

    Fetch {
        input: Arc<PhysicalPlan>,
        entity: Arc<dyn Entity>,
        columns: Vec<ColumnDef>,
    },

    Filter {
        input: Arc<PhysicalPlan>,
        predicate: BooleanPredicate,
        selectivity: Selectivity,
    },

    FilterOnSubSelect {
        input: Arc<PhysicalPlan>,
        subqueries: Vec<Arc<PhysicalPlan>>,
        predicate: BooleanPredicate,
        selectivity: Selectivity,
    },

    Function {
        input: Arc<PhysicalPlan>,
        function: Arc<dyn RecordFunction>,
        arguments: Vec<Binding>,
        out: ColumnDef,
    },

    NestedFunction {
        input: Arc<PhysicalPlan>,
        function: Arc<dyn RecordFunction>,
        arguments: Vec<Binding>,
        out: Binding,
    },

    Select {
        input: Arc<PhysicalPlan>,
        fields: Vec<ColumnDef>,
    },

    SelectDistinct {
        input: Arc<PhysicalPlan>,
        fields: Vec<ColumnDef>,
    },

    Count {
        input: Arc<PhysicalPlan>,
        out: ColumnDef,
    },

    Exists {
        input: Arc<PhysicalPlan>,
        out: ColumnDef,
    },

    Aggregate {
        input: Arc<PhysicalPlan>,
        function: AggregateFunction,
        columns: Vec<ColumnDef>,
    },

    Limit {
        input: Arc<PhysicalPlan>,
        limit: u64,
    },

    Skip {
        input: Arc<PhysicalPlan>,
        skip: u64,
    },

    Sort {
        input: Arc<PhysicalPlan>,
        order: OrderSpec,
    },

    /// Re-unify partitioned groups; interleaving when `order` is `None`,
    /// heap-merging when an ordering must be preserved
    Merge {
        inputs: Vec<Arc<PhysicalPlan>>,
        order: Option<OrderSpec>,
    },

    /// Ordered merge emitting only the top `limit` records
    MergeLimitingSort {
        inputs: Vec<Arc<PhysicalPlan>>,
        order: OrderSpec,
        limit: u64,
    },

    Insert {
        group: GroupId,
        entity: Arc<dyn Entity>,
        rows: Vec<Vec<Value>>,
    },

    Update {
        input: Arc<PhysicalPlan>,
        entity: Arc<dyn Entity>,
        values: Vec<(ColumnDef, Binding)>,
    },

    Delete {
        input: Arc<PhysicalPlan>,
        entity: Arc<dyn Entity>,
    },
}

/// Estimated bytes of one record over the given columns.
fn row_bytes(columns: &[ColumnDef]) -> f32 {
    columns.iter().map(|c| c.data_type.physical_size() as f32).sum()
}

impl PhysicalPlan {
    /// The arity class of this node.
    pub fn arity(&self) -> Arity {
        match self {
            PhysicalPlan::EntityScan { .. }
            | PhysicalPlan::EntitySample { .. }
            | PhysicalPlan::IndexScan { .. }
            | PhysicalPlan::CountEntity { .. }
            | PhysicalPlan::Insert { .. } => Arity::Nullary,
            PhysicalPlan::FilterOnSubSelect { .. }
            | PhysicalPlan::Merge { .. }
            | PhysicalPlan::MergeLimitingSort { .. } => Arity::Nary,
            _ => Arity::Unary,
        }
    }

    /// The group this node belongs to.
    pub fn group(&self) -> GroupId {
        match self {
            PhysicalPlan::EntityScan { group, .. }
            | PhysicalPlan::EntitySample { group, .. }
            | PhysicalPlan::IndexScan { group, .. }
            | PhysicalPlan::CountEntity { group, .. }
            | PhysicalPlan::Insert { group, .. } => *group,
            other => other
                .children()
                .first()
                .map(|c| c.group())
                .unwrap_or(GroupId(0)),
        }
    }

    /// The inputs of this node. The main input comes first.
    pub fn children(&self) -> Vec<&PhysicalPlan> {
        match self {
            PhysicalPlan::EntityScan { .. }
            | PhysicalPlan::EntitySample { .. }
            | PhysicalPlan::IndexScan { .. }
            | PhysicalPlan::CountEntity { .. }
            | PhysicalPlan::Insert { .. } => vec![],
            PhysicalPlan::FilterOnSubSelect {
                input, subqueries, ..
            } => {
                let mut children = vec![input.as_ref()];
                children.extend(subqueries.iter().map(|s| s.as_ref()));
                children
            }
            PhysicalPlan::Merge { inputs, .. }
            | PhysicalPlan::MergeLimitingSort { inputs, .. } => {
                inputs.iter().map(|i| i.as_ref()).collect()
            }
            PhysicalPlan::Fetch { input, .. }
            | PhysicalPlan::Filter { input, .. }
            | PhysicalPlan::Function { input, .. }
            | PhysicalPlan::NestedFunction { input, .. }
            | PhysicalPlan::Select { input, .. }
            | PhysicalPlan::SelectDistinct { input, .. }
            | PhysicalPlan::Count { input, .. }
            | PhysicalPlan::Exists { input, .. }
            | PhysicalPlan::Aggregate { input, .. }
            | PhysicalPlan::Limit { input, .. }
            | PhysicalPlan::Skip { input, .. }
            | PhysicalPlan::Sort { input, .. }
            | PhysicalPlan::Update { input, .. }
            | PhysicalPlan::Delete { input, .. } => vec![input.as_ref()],
        }
    }

    /// The columns this node produces.
    pub fn columns(&self) -> Vec<ColumnDef> {
        match self {
            PhysicalPlan::EntityScan { columns, .. }
            | PhysicalPlan::EntitySample { columns, .. } => columns.clone(),
            PhysicalPlan::IndexScan {
                index, predicate, ..
            } => index.columns_for(predicate),
            PhysicalPlan::CountEntity { out, .. }
            | PhysicalPlan::Count { out, .. }
            | PhysicalPlan::Exists { out, .. } => vec![out.clone()],
            PhysicalPlan::Fetch { input, columns, .. } => {
                let mut all = input.columns();
                all.extend(columns.iter().cloned());
                all
            }
            PhysicalPlan::Filter { input, .. }
            | PhysicalPlan::FilterOnSubSelect { input, .. }
            | PhysicalPlan::NestedFunction { input, .. }
            | PhysicalPlan::Limit { input, .. }
            | PhysicalPlan::Skip { input, .. }
            | PhysicalPlan::Sort { input, .. } => input.columns(),
            PhysicalPlan::Function { input, out, .. } => {
                let mut all = input.columns();
                all.push(out.clone());
                all
            }
            PhysicalPlan::Select { fields, .. }
            | PhysicalPlan::SelectDistinct { fields, .. } => fields.clone(),
            PhysicalPlan::Aggregate {
                function, columns, ..
            } => columns
                .iter()
                .map(|c| {
                    let data_type = match function {
                        AggregateFunction::Min | AggregateFunction::Max => c.data_type,
                        _ => DataType::Double,
                    };
                    ColumnDef {
                        name: c.name.clone(),
                        data_type,
                        nullable: true,
                    }
                })
                .collect(),
            PhysicalPlan::Merge { inputs, .. }
            | PhysicalPlan::MergeLimitingSort { inputs, .. } => inputs
                .first()
                .map(|i| i.columns())
                .unwrap_or_default(),
            PhysicalPlan::Insert { entity, .. }
            | PhysicalPlan::Update { entity, .. }
            | PhysicalPlan::Delete { entity, .. } => {
                vec![synthetic_column(entity.name(), "rows", DataType::Long)]
            }
        }
    }

    /// The columns this node requires from its inputs.
    pub fn requires(&self) -> Vec<ColumnDef> {
        match self {
            PhysicalPlan::Filter { predicate, .. }
            | PhysicalPlan::FilterOnSubSelect { predicate, .. } => predicate.columns(),
            PhysicalPlan::Function { arguments, .. }
            | PhysicalPlan::NestedFunction { arguments, .. } => arguments
                .iter()
                .filter_map(|b| b.column().cloned())
                .collect(),
            PhysicalPlan::Select { fields, .. }
            | PhysicalPlan::SelectDistinct { fields, .. } => fields.clone(),
            PhysicalPlan::Aggregate { columns, .. } => columns.clone(),
            PhysicalPlan::Sort { order, .. } => order.iter().map(|(c, _)| c.clone()).collect(),
            PhysicalPlan::MergeLimitingSort { order, .. } => {
                order.iter().map(|(c, _)| c.clone()).collect()
            }
            PhysicalPlan::Update { values, .. } => values
                .iter()
                .flat_map(|(_, b)| b.column().cloned())
                .collect(),
            _ => vec![],
        }
    }

    /// The physical columns accessed at the source of this node's group.
    pub fn physical_columns(&self) -> Vec<ColumnDef> {
        match self {
            PhysicalPlan::EntityScan { columns, .. }
            | PhysicalPlan::EntitySample { columns, .. } => columns.clone(),
            PhysicalPlan::IndexScan { predicate, .. } => predicate.columns(),
            other => other
                .children()
                .first()
                .map(|c| c.physical_columns())
                .unwrap_or_default(),
        }
    }

    /// Estimated number of records this node emits.
    pub fn output_size(&self) -> u64 {
        match self {
            PhysicalPlan::EntityScan {
                rows, partition, ..
            } => partitioned_rows(*rows, *partition),
            PhysicalPlan::EntitySample {
                rows,
                probability,
                partition,
                ..
            } => {
                let base = partitioned_rows(*rows, *partition);
                (base as f64 * *probability as f64).ceil() as u64
            }
            PhysicalPlan::IndexScan {
                rows, partition, ..
            } => partitioned_rows(*rows, *partition),
            PhysicalPlan::CountEntity { .. }
            | PhysicalPlan::Count { .. }
            | PhysicalPlan::Exists { .. }
            | PhysicalPlan::Aggregate { .. }
            | PhysicalPlan::Insert { .. }
            | PhysicalPlan::Update { .. }
            | PhysicalPlan::Delete { .. } => 1,
            PhysicalPlan::Fetch { input, .. }
            | PhysicalPlan::Function { input, .. }
            | PhysicalPlan::NestedFunction { input, .. }
            | PhysicalPlan::Select { input, .. }
            | PhysicalPlan::SelectDistinct { input, .. }
            | PhysicalPlan::Sort { input, .. } => input.output_size(),
            PhysicalPlan::Filter {
                input, selectivity, ..
            }
            | PhysicalPlan::FilterOnSubSelect {
                input, selectivity, ..
            } => selectivity.apply(input.output_size()),
            PhysicalPlan::Limit { input, limit } => input.output_size().min(*limit),
            PhysicalPlan::Skip { input, skip } => input.output_size().saturating_sub(*skip),
            PhysicalPlan::Merge { inputs, .. } => {
                inputs.iter().map(|i| i.output_size()).sum()
            }
            PhysicalPlan::MergeLimitingSort { inputs, limit, .. } => inputs
                .iter()
                .map(|i| i.output_size())
                .sum::<u64>()
                .min(*limit),
        }
    }

    /// The cost of this node alone, excluding its inputs.
    pub fn cost(&self, policy: &CostPolicy) -> Cost {
        match self {
            PhysicalPlan::EntityScan { columns, .. } => {
                let rows = self.output_size() as f32;
                Cost {
                    io: rows * row_bytes(columns) * policy.disk_access_read,
                    cpu: rows * columns.len() as f32 * policy.memory_access,
                    memory: 0.0,
                    accuracy: 0.0,
                }
            }
            PhysicalPlan::EntitySample {
                columns,
                rows,
                partition,
                ..
            } => {
                // Sampling reads everything and discards records.
                let scanned = partitioned_rows(*rows, *partition) as f32;
                Cost {
                    io: scanned * row_bytes(columns) * policy.disk_access_read,
                    cpu: scanned * policy.flop,
                    memory: 0.0,
                    accuracy: 0.0,
                }
            }
            PhysicalPlan::IndexScan {
                index, predicate, ..
            } => {
                let units = index.cost(predicate);
                if units.is_invalid() {
                    return Cost::INVALID;
                }
                Cost {
                    io: units.io * policy.disk_access_read,
                    cpu: units.cpu * policy.flop,
                    memory: units.memory * policy.memory_access,
                    accuracy: units.accuracy,
                }
            }
            PhysicalPlan::CountEntity { .. } => Cost {
                io: policy.disk_access_read,
                cpu: policy.memory_access,
                memory: 0.0,
                accuracy: 0.0,
            },
            PhysicalPlan::Fetch { input, columns, .. } => {
                let rows = input.output_size() as f32;
                Cost {
                    io: rows * row_bytes(columns) * policy.disk_access_read,
                    cpu: rows * policy.memory_access,
                    memory: 0.0,
                    accuracy: 0.0,
                }
            }
            PhysicalPlan::Filter {
                input, predicate, ..
            } => {
                let rows = input.output_size() as f32;
                Cost::cpu(rows * predicate.atomics().len() as f32 * policy.flop)
            }
            PhysicalPlan::FilterOnSubSelect {
                input,
                predicate,
                subqueries,
                ..
            } => {
                let rows = input.output_size() as f32;
                let collected: u64 = subqueries.iter().map(|s| s.output_size()).sum();
                Cost {
                    cpu: rows * predicate.atomics().len() as f32 * policy.flop,
                    memory: collected as f32 * policy.memory_access,
                    ..Cost::ZERO
                }
            }
            PhysicalPlan::Function {
                input,
                function,
                out,
                ..
            } => {
                let rows = input.output_size() as f32;
                Cost {
                    cpu: rows * function.cost().cpu * policy.flop,
                    memory: rows
                        * out.data_type.physical_size() as f32
                        * policy.memory_access,
                    ..Cost::ZERO
                }
            }
            PhysicalPlan::NestedFunction {
                input, function, ..
            } => Cost::cpu(input.output_size() as f32 * function.cost().cpu * policy.flop),
            PhysicalPlan::Select { input, fields } => Cost::cpu(
                input.output_size() as f32 * fields.len() as f32 * policy.memory_access,
            ),
            PhysicalPlan::SelectDistinct { input, fields } => {
                let rows = input.output_size() as f32;
                Cost {
                    cpu: rows * (fields.len() as f32 * policy.memory_access + policy.flop),
                    memory: rows * row_bytes(fields) * policy.memory_access,
                    ..Cost::ZERO
                }
            }
            PhysicalPlan::Count { input, .. } | PhysicalPlan::Exists { input, .. } => {
                Cost::cpu(input.output_size() as f32 * policy.memory_access)
            }
            PhysicalPlan::Aggregate { input, columns, .. } => Cost::cpu(
                input.output_size() as f32 * columns.len() as f32 * policy.flop,
            ),
            PhysicalPlan::Limit { input, .. } | PhysicalPlan::Skip { input, .. } => {
                Cost::cpu(input.output_size() as f32 * policy.memory_access)
            }
            PhysicalPlan::Sort { input, order } => {
                let rows = input.output_size() as f32;
                let comparisons = rows * rows.max(2.0).log2() * order.len() as f32;
                Cost {
                    cpu: comparisons * policy.flop,
                    memory: rows * row_bytes(&input.columns()) * policy.memory_access,
                    ..Cost::ZERO
                }
            }
            PhysicalPlan::Merge { inputs, order } => {
                let rows: u64 = inputs.iter().map(|i| i.output_size()).sum();
                let per_record = match order {
                    Some(_) => (inputs.len().max(2) as f32).log2() * policy.flop,
                    None => policy.memory_access,
                };
                Cost::cpu(rows as f32 * per_record)
            }
            PhysicalPlan::MergeLimitingSort { inputs, limit, .. } => {
                let rows: u64 = inputs.iter().map(|i| i.output_size()).sum();
                let heap = (*limit).max(2) as f32;
                Cost {
                    cpu: rows as f32 * heap.log2() * policy.flop,
                    memory: *limit as f32
                        * row_bytes(&self.columns())
                        * policy.memory_access,
                    ..Cost::ZERO
                }
            }
            PhysicalPlan::Insert { entity, rows, .. } => {
                let bytes = row_bytes(&entity.columns());
                Cost::io(rows.len() as f32 * bytes * policy.disk_access_write)
            }
            PhysicalPlan::Update {
                input, values, ..
            } => {
                let bytes: f32 = values
                    .iter()
                    .map(|(c, _)| c.data_type.physical_size() as f32)
                    .sum();
                Cost::io(input.output_size() as f32 * bytes * policy.disk_access_write)
            }
            PhysicalPlan::Delete { input, .. } => {
                Cost::io(input.output_size() as f32 * policy.disk_access_write)
            }
        }
    }

    /// The cost of this subtree: own cost plus all input costs.
    pub fn total_cost(&self, policy: &CostPolicy) -> Cost {
        let mut total = self.cost(policy);
        for child in self.children() {
            total += child.total_cost(policy);
        }
        total
    }

    /// The portion of this subtree's cost that partitioning can spread.
    ///
    /// A subtree free of `NotPartitionable` nodes spreads entirely; the
    /// serial I/O fraction is modelled by the policy.
    pub fn parallelisable_cost(&self, policy: &CostPolicy) -> Cost {
        if self.traits().not_partitionable() {
            return Cost::ZERO;
        }
        self.total_cost(policy)
    }

    /// The traits carried by this node, combined with its inputs' traits.
    pub fn traits(&self) -> TraitMap {
        let inherited = |child: Option<&&PhysicalPlan>| {
            child.map(|c| c.traits()).unwrap_or_default()
        };
        let children = self.children();
        let mut traits = match self {
            PhysicalPlan::EntityScan { .. }
            | PhysicalPlan::EntitySample { .. }
            | PhysicalPlan::CountEntity { .. } => TraitMap::new(),
            PhysicalPlan::IndexScan {
                index, predicate, ..
            } => index.traits_for(predicate),
            PhysicalPlan::Fetch { .. }
            | PhysicalPlan::Function { .. }
            | PhysicalPlan::NestedFunction { .. }
            | PhysicalPlan::Select { .. } => inherited(children.first()),
            PhysicalPlan::Filter { .. } => {
                // Order survives; any limit proof does not.
                let mut t = inherited(children.first());
                t.remove(TraitType::Limit);
                t
            }
            PhysicalPlan::SelectDistinct { .. } => {
                // Distinct across partitions is not distinct per partition.
                let mut t = inherited(children.first());
                t.remove(TraitType::Limit);
                t.insert(PlanTrait::NotPartitionable);
                t
            }
            PhysicalPlan::FilterOnSubSelect { .. } => {
                let mut t = inherited(children.first());
                t.remove(TraitType::Limit);
                t.insert(PlanTrait::NotPartitionable);
                t
            }
            PhysicalPlan::Count { .. }
            | PhysicalPlan::Exists { .. }
            | PhysicalPlan::Aggregate { .. } => {
                let mut t = TraitMap::new();
                t.insert(PlanTrait::NotPartitionable);
                t
            }
            PhysicalPlan::Limit { limit, .. } => {
                let mut t = inherited(children.first());
                t.insert(PlanTrait::Limit(*limit));
                t.insert(PlanTrait::NotPartitionable);
                t
            }
            PhysicalPlan::Skip { .. } => {
                let mut t = inherited(children.first());
                t.insert(PlanTrait::NotPartitionable);
                t
            }
            PhysicalPlan::Sort { order, .. } => {
                let mut t = inherited(children.first());
                t.insert(PlanTrait::Order(order.clone()));
                t
            }
            PhysicalPlan::Merge { order, .. } => {
                let mut t = TraitMap::new();
                if let Some(order) = order {
                    t.insert(PlanTrait::Order(order.clone()));
                }
                t
            }
            PhysicalPlan::MergeLimitingSort { order, limit, .. } => {
                let mut t = TraitMap::new();
                t.insert(PlanTrait::Order(order.clone()));
                t.insert(PlanTrait::Limit(*limit));
                t
            }
            PhysicalPlan::Insert { .. }
            | PhysicalPlan::Update { .. }
            | PhysicalPlan::Delete { .. } => {
                let mut t = TraitMap::new();
                t.insert(PlanTrait::NotPartitionable);
                t
            }
        };
        // Downstream of a non-partitionable node everything stays
        // non-partitionable.
        if children.iter().any(|c| c.traits().not_partitionable()) {
            traits.insert(PlanTrait::NotPartitionable);
        }
        traits
    }

    /// Create partition `i` of `p` of this subtree.
    ///
    /// Sources receive partition bounds and a fresh group id; operators
    /// tagged `NotPartitionable` refuse.
    pub fn partition(
        &self,
        p: usize,
        i: usize,
        groups: &GroupIdGenerator,
    ) -> Result<PhysicalPlan> {
        match self {
            PhysicalPlan::EntityScan {
                entity,
                columns,
                rows,
                partition,
                ..
            } => {
                if partition.is_some() {
                    return Err(QuiverError::not_supported(
                        "entity scan is already partitioned",
                    ));
                }
                Ok(PhysicalPlan::EntityScan {
                    group: groups.next(),
                    entity: entity.clone(),
                    columns: columns.clone(),
                    rows: *rows,
                    partition: Some((i, p)),
                })
            }
            PhysicalPlan::EntitySample {
                entity,
                columns,
                probability,
                seed,
                rows,
                partition,
                ..
            } => {
                if partition.is_some() {
                    return Err(QuiverError::not_supported(
                        "entity sample is already partitioned",
                    ));
                }
                Ok(PhysicalPlan::EntitySample {
                    group: groups.next(),
                    entity: entity.clone(),
                    columns: columns.clone(),
                    probability: *probability,
                    seed: *seed,
                    rows: *rows,
                    partition: Some((i, p)),
                })
            }
            PhysicalPlan::IndexScan {
                index,
                predicate,
                rows,
                partition,
                ..
            } => {
                if partition.is_some() {
                    return Err(QuiverError::not_supported(
                        "index scan is already partitioned",
                    ));
                }
                Ok(PhysicalPlan::IndexScan {
                    group: groups.next(),
                    index: index.clone(),
                    predicate: predicate.clone(),
                    rows: *rows,
                    partition: Some((i, p)),
                })
            }
            PhysicalPlan::Fetch {
                input,
                entity,
                columns,
            } => Ok(PhysicalPlan::Fetch {
                input: Arc::new(input.partition(p, i, groups)?),
                entity: entity.clone(),
                columns: columns.clone(),
            }),
            PhysicalPlan::Filter {
                input,
                predicate,
                selectivity,
            } => Ok(PhysicalPlan::Filter {
                input: Arc::new(input.partition(p, i, groups)?),
                predicate: predicate.clone(),
                selectivity: *selectivity,
            }),
            PhysicalPlan::Function {
                input,
                function,
                arguments,
                out,
            } => Ok(PhysicalPlan::Function {
                input: Arc::new(input.partition(p, i, groups)?),
                function: function.clone(),
                arguments: arguments.clone(),
                out: out.clone(),
            }),
            PhysicalPlan::NestedFunction {
                input,
                function,
                arguments,
                out,
            } => Ok(PhysicalPlan::NestedFunction {
                input: Arc::new(input.partition(p, i, groups)?),
                function: function.clone(),
                arguments: arguments.clone(),
                out: out.clone(),
            }),
            PhysicalPlan::Select { input, fields } => Ok(PhysicalPlan::Select {
                input: Arc::new(input.partition(p, i, groups)?),
                fields: fields.clone(),
            }),
            PhysicalPlan::Sort { input, order } => Ok(PhysicalPlan::Sort {
                input: Arc::new(input.partition(p, i, groups)?),
                order: order.clone(),
            }),
            other => Err(QuiverError::not_supported(format!(
                "operator {} cannot be partitioned",
                other.label()
            ))),
        }
    }

    /// Rebuild this node with new children, in `children()` order.
    pub fn with_children(&self, mut children: Vec<PhysicalPlan>) -> PhysicalPlan {
        let mut next = || Arc::new(children.remove(0));
        match self {
            PhysicalPlan::EntityScan { .. }
            | PhysicalPlan::EntitySample { .. }
            | PhysicalPlan::IndexScan { .. }
            | PhysicalPlan::CountEntity { .. }
            | PhysicalPlan::Insert { .. } => self.clone(),
            PhysicalPlan::Fetch {
                entity, columns, ..
            } => PhysicalPlan::Fetch {
                input: next(),
                entity: entity.clone(),
                columns: columns.clone(),
            },
            PhysicalPlan::Filter {
                predicate,
                selectivity,
                ..
            } => PhysicalPlan::Filter {
                input: next(),
                predicate: predicate.clone(),
                selectivity: *selectivity,
            },
            PhysicalPlan::FilterOnSubSelect {
                subqueries,
                predicate,
                selectivity,
                ..
            } => PhysicalPlan::FilterOnSubSelect {
                input: next(),
                subqueries: subqueries.iter().map(|_| next()).collect(),
                predicate: predicate.clone(),
                selectivity: *selectivity,
            },
            PhysicalPlan::Function {
                function,
                arguments,
                out,
                ..
            } => PhysicalPlan::Function {
                input: next(),
                function: function.clone(),
                arguments: arguments.clone(),
                out: out.clone(),
            },
            PhysicalPlan::NestedFunction {
                function,
                arguments,
                out,
                ..
            } => PhysicalPlan::NestedFunction {
                input: next(),
                function: function.clone(),
                arguments: arguments.clone(),
                out: out.clone(),
            },
            PhysicalPlan::Select { fields, .. } => PhysicalPlan::Select {
                input: next(),
                fields: fields.clone(),
            },
            PhysicalPlan::SelectDistinct { fields, .. } => PhysicalPlan::SelectDistinct {
                input: next(),
                fields: fields.clone(),
            },
            PhysicalPlan::Count { out, .. } => PhysicalPlan::Count {
                input: next(),
                out: out.clone(),
            },
            PhysicalPlan::Exists { out, .. } => PhysicalPlan::Exists {
                input: next(),
                out: out.clone(),
            },
            PhysicalPlan::Aggregate {
                function, columns, ..
            } => PhysicalPlan::Aggregate {
                input: next(),
                function: *function,
                columns: columns.clone(),
            },
            PhysicalPlan::Limit { limit, .. } => PhysicalPlan::Limit {
                input: next(),
                limit: *limit,
            },
            PhysicalPlan::Skip { skip, .. } => PhysicalPlan::Skip {
                input: next(),
                skip: *skip,
            },
            PhysicalPlan::Sort { order, .. } => PhysicalPlan::Sort {
                input: next(),
                order: order.clone(),
            },
            PhysicalPlan::Merge { inputs, order } => PhysicalPlan::Merge {
                inputs: inputs.iter().map(|_| next()).collect(),
                order: order.clone(),
            },
            PhysicalPlan::MergeLimitingSort {
                inputs,
                order,
                limit,
            } => PhysicalPlan::MergeLimitingSort {
                inputs: inputs.iter().map(|_| next()).collect(),
                order: order.clone(),
                limit: *limit,
            },
            PhysicalPlan::Update {
                entity, values, ..
            } => PhysicalPlan::Update {
                input: next(),
                entity: entity.clone(),
                values: values.clone(),
            },
            PhysicalPlan::Delete { entity, .. } => PhysicalPlan::Delete {
                input: next(),
                entity: entity.clone(),
            },
        }
    }

    /// Check that this tree is executable.
    pub fn validate(&self) -> Result<()> {
        let children = self.children();
        if self.arity() != Arity::Nullary && children.is_empty() {
            return Err(QuiverError::disconnected(format!(
                "operator {} is missing its input",
                self.label()
            )));
        }
        let provided: Vec<ColumnDef> =
            children.iter().flat_map(|c| c.columns()).collect();
        for required in self.requires() {
            if !provided.iter().any(|c| c.name.matches(&required.name)) {
                return Err(QuiverError::disconnected(format!(
                    "operator {} requires column {} which no input produces",
                    self.label(),
                    required.name
                )));
            }
        }
        for child in children {
            child.validate()?;
        }
        Ok(())
    }

    /// The display label of this operator.
    pub fn label(&self) -> &'static str {
        match self {
            PhysicalPlan::EntityScan { .. } => "EntityScan",
            PhysicalPlan::EntitySample { .. } => "EntitySample",
            PhysicalPlan::IndexScan { .. } => "IndexScan",
            PhysicalPlan::CountEntity { .. } => "CountEntity",
            PhysicalPlan::Fetch { .. } => "Fetch",
            PhysicalPlan::Filter { .. } => "Filter",
            PhysicalPlan::FilterOnSubSelect { .. } => "FilterOnSubSelect",
            PhysicalPlan::Function { .. } => "Function",
            PhysicalPlan::NestedFunction { .. } => "NestedFunction",
            PhysicalPlan::Select { .. } => "Select",
            PhysicalPlan::SelectDistinct { .. } => "SelectDistinct",
            PhysicalPlan::Count { .. } => "Count",
            PhysicalPlan::Exists { .. } => "Exists",
            PhysicalPlan::Aggregate { .. } => "Aggregate",
            PhysicalPlan::Limit { .. } => "Limit",
            PhysicalPlan::Skip { .. } => "Skip",
            PhysicalPlan::Sort { .. } => "Sort",
            PhysicalPlan::Merge { .. } => "Merge",
            PhysicalPlan::MergeLimitingSort { .. } => "MergeLimitingSort",
            PhysicalPlan::Insert { .. } => "Insert",
            PhysicalPlan::Update { .. } => "Update",
            PhysicalPlan::Delete { .. } => "Delete",
        }
    }

    /// A stable digest over this physical tree.
    pub fn digest(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash_into(&mut hasher);
        hasher.finish()
    }

    fn hash_into(&self, state: &mut DefaultHasher) {
        std::mem::discriminant(self).hash(state);
        match self {
            PhysicalPlan::EntityScan {
                entity,
                columns,
                partition,
                ..
            } => {
                entity.name().hash(state);
                columns.hash(state);
                partition.hash(state);
            }
            PhysicalPlan::EntitySample {
                entity,
                columns,
                probability,
                seed,
                partition,
                ..
            } => {
                entity.name().hash(state);
                columns.hash(state);
                probability.to_bits().hash(state);
                seed.hash(state);
                partition.hash(state);
            }
            PhysicalPlan::IndexScan {
                index,
                predicate,
                partition,
                ..
            } => {
                index.name().hash(state);
                predicate.digest().hash(state);
                partition.hash(state);
            }
            PhysicalPlan::CountEntity { entity, out, .. } => {
                entity.name().hash(state);
                out.hash(state);
            }
            PhysicalPlan::Fetch {
                entity, columns, ..
            } => {
                entity.name().hash(state);
                columns.hash(state);
            }
            PhysicalPlan::Filter { predicate, .. }
            | PhysicalPlan::FilterOnSubSelect { predicate, .. } => {
                predicate.digest().hash(state);
            }
            PhysicalPlan::Function {
                function,
                arguments,
                out,
                ..
            } => {
                function.signature().hash(state);
                arguments.hash(state);
                out.hash(state);
            }
            PhysicalPlan::NestedFunction {
                function,
                arguments,
                out,
                ..
            } => {
                function.signature().hash(state);
                arguments.hash(state);
                out.hash(state);
            }
            PhysicalPlan::Select { fields, .. }
            | PhysicalPlan::SelectDistinct { fields, .. } => fields.hash(state),
            PhysicalPlan::Count { out, .. } | PhysicalPlan::Exists { out, .. } => {
                out.hash(state)
            }
            PhysicalPlan::Aggregate {
                function, columns, ..
            } => {
                function.hash(state);
                columns.hash(state);
            }
            // Skip and Limit hash strictly by their own value; their shared
            // shape must never make them collide.
            PhysicalPlan::Limit { limit, .. } => limit.hash(state),
            PhysicalPlan::Skip { skip, .. } => skip.hash(state),
            PhysicalPlan::Sort { order, .. } => hash_order(order, state),
            PhysicalPlan::Merge { order, .. } => {
                if let Some(order) = order {
                    hash_order(order, state);
                }
            }
            PhysicalPlan::MergeLimitingSort { order, limit, .. } => {
                hash_order(order, state);
                limit.hash(state);
            }
            PhysicalPlan::Insert { entity, rows, .. } => {
                entity.name().hash(state);
                rows.hash(state);
            }
            PhysicalPlan::Update {
                entity, values, ..
            } => {
                entity.name().hash(state);
                values.hash(state);
            }
            PhysicalPlan::Delete { entity, .. } => entity.name().hash(state),
        }
        for child in self.children() {
            child.hash_into(state);
        }
    }

    /// Display the plan with indentation.
    pub fn display_indent(&self, indent: usize) -> String {
        let mut out = String::new();
        self.format_indent(&mut out, indent);
        out
    }

    fn format_indent(&self, f: &mut String, indent: usize) {
        let prefix = "  ".repeat(indent);
        match self {
            PhysicalPlan::EntityScan {
                entity, partition, ..
            } => {
                f.push_str(&format!("{prefix}EntityScan: {}", entity.name()));
                if let Some((i, p)) = partition {
                    f.push_str(&format!(" partition={}/{}", i + 1, p));
                }
                f.push('\n');
            }
            PhysicalPlan::EntitySample {
                entity,
                probability,
                seed,
                ..
            } => {
                f.push_str(&format!(
                    "{prefix}EntitySample: {} p={probability} seed={seed}\n",
                    entity.name()
                ));
            }
            PhysicalPlan::IndexScan {
                index,
                predicate,
                partition,
                ..
            } => {
                f.push_str(&format!("{prefix}IndexScan: {} {predicate}", index.name()));
                if let Some((i, p)) = partition {
                    f.push_str(&format!(" partition={}/{}", i + 1, p));
                }
                f.push('\n');
            }
            PhysicalPlan::Filter { predicate, .. } => {
                f.push_str(&format!("{prefix}Filter: {predicate}\n"));
            }
            PhysicalPlan::Limit { limit, .. } => {
                f.push_str(&format!("{prefix}Limit: {limit}\n"));
            }
            PhysicalPlan::Skip { skip, .. } => {
                f.push_str(&format!("{prefix}Skip: {skip}\n"));
            }
            PhysicalPlan::MergeLimitingSort { limit, .. } => {
                f.push_str(&format!("{prefix}MergeLimitingSort: limit={limit}\n"));
            }
            other => {
                f.push_str(&format!("{prefix}{}\n", other.label()));
            }
        }
        for child in self.children() {
            child.format_indent(f, indent + 1);
        }
    }
}

fn hash_order(order: &OrderSpec, state: &mut DefaultHasher) {
    for (column, direction) in order {
        column.hash(state);
        std::mem::discriminant(direction).hash(state);
    }
}

fn partitioned_rows(rows: u64, partition: Option<(usize, usize)>) -> u64 {
    match partition {
        Some((_, p)) if p > 0 => rows.div_ceil(p as u64),
        _ => rows,
    }
}

impl PartialEq for PhysicalPlan {
    fn eq(&self, other: &Self) -> bool {
        self.digest() == other.digest()
    }
}

impl Eq for PhysicalPlan {}

impl fmt::Debug for PhysicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_indent(0))
    }
}

impl fmt::Display for PhysicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_indent(0))
    }
}
