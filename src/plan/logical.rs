//! The logical operator tree.
//!
//! Logical nodes are created by the binder, rewritten freely by the planner
//! and implemented into physical candidates. Each node has a single output
//! (its parent) and zero or more inputs; parents hold their children, so the
//! tree is free of back-references. Structural equality and the digest are
//! defined over each node's class, its key attributes, and recursively over
//! its inputs.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use super::traits::OrderSpec;
use super::Arity;
use crate::catalog::functions::Signature;
use crate::catalog::{Entity, Index};
use crate::expr::{Binding, BooleanPredicate, GroupId, Predicate};
use crate::types::{ColumnDef, DataType, Name, Value};

/// Aggregation functions over numeric columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateFunction {
    Sum,
    Mean,
    Min,
    Max,
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateFunction::Sum => write!(f, "SUM"),
            AggregateFunction::Mean => write!(f, "MEAN"),
            AggregateFunction::Min => write!(f, "MIN"),
            AggregateFunction::Max => write!(f, "MAX"),
        }
    }
}

/// Synthesise the output column of a counting or status projection.
pub(crate) fn synthetic_column(entity: &Name, column: &str, data_type: DataType) -> ColumnDef {
    let name = match entity {
        Name::Entity { schema, entity } => Name::Column {
            schema: schema.clone(),
            entity: entity.clone(),
            column: column.to_string(),
        },
        _ => Name::Column {
            schema: "main".to_string(),
            entity: "query".to_string(),
            column: column.to_string(),
        },
    };
    ColumnDef {
        name,
        data_type,
        nullable: false,
    }
}

/// A logical query plan node.
#[derive(Clone)]
pub enum LogicalPlan {
    /// Full scan over an entity
    EntityScan {
        group: GroupId,
        entity: Arc<dyn Entity>,
        columns: Vec<ColumnDef>,
    },

    /// Bernoulli-sampled scan; the seed is part of the operator's identity
    EntitySample {
        group: GroupId,
        entity: Arc<dyn Entity>,
        columns: Vec<ColumnDef>,
        probability: f32,
        seed: u64,
    },

    /// Index lookup with a predicate
    IndexScan {
        group: GroupId,
        index: Arc<dyn Index>,
        predicate: Predicate,
    },

    /// Metadata count of an entity; the count-pushdown target
    CountEntity {
        group: GroupId,
        entity: Arc<dyn Entity>,
        out: ColumnDef,
    },

    /// Fetch additional columns from the entity by tuple id
    Fetch {
        input: Arc<LogicalPlan>,
        entity: Arc<dyn Entity>,
        columns: Vec<ColumnDef>,
    },

    /// Filter by a boolean predicate
    Filter {
        input: Arc<LogicalPlan>,
        predicate: BooleanPredicate,
    },

    /// Filter whose predicate depends on subquery results
    FilterOnSubSelect {
        input: Arc<LogicalPlan>,
        subqueries: Vec<Arc<LogicalPlan>>,
        predicate: BooleanPredicate,
    },

    /// Function application materialising its result as a new column
    Function {
        input: Arc<LogicalPlan>,
        signature: Signature,
        arguments: Vec<Binding>,
        out: ColumnDef,
    },

    /// Function application writing into a binding instead of a column
    NestedFunction {
        input: Arc<LogicalPlan>,
        signature: Signature,
        arguments: Vec<Binding>,
        out: Binding,
    },

    /// Projection to a list of columns
    Select {
        input: Arc<LogicalPlan>,
        fields: Vec<ColumnDef>,
    },

    /// Projection with duplicate elimination
    SelectDistinct {
        input: Arc<LogicalPlan>,
        fields: Vec<ColumnDef>,
    },

    /// Count of the input records
    Count {
        input: Arc<LogicalPlan>,
        out: ColumnDef,
    },

    /// Whether the input produces any record
    Exists {
        input: Arc<LogicalPlan>,
        out: ColumnDef,
    },

    /// Aggregation over numeric columns
    Aggregate {
        input: Arc<LogicalPlan>,
        function: AggregateFunction,
        columns: Vec<ColumnDef>,
    },

    /// Emit at most `limit` records
    Limit {
        input: Arc<LogicalPlan>,
        limit: u64,
    },

    /// Drop the first `skip` records
    Skip {
        input: Arc<LogicalPlan>,
        skip: u64,
    },

    /// Sort by a list of columns
    Sort {
        input: Arc<LogicalPlan>,
        order: OrderSpec,
    },

    /// Insert literal rows into an entity
    Insert {
        group: GroupId,
        entity: Arc<dyn Entity>,
        rows: Vec<Vec<Value>>,
    },

    /// Update columns of the records produced by the input
    Update {
        input: Arc<LogicalPlan>,
        entity: Arc<dyn Entity>,
        values: Vec<(ColumnDef, Binding)>,
    },

    /// Delete the records produced by the input
    Delete {
        input: Arc<LogicalPlan>,
        entity: Arc<dyn Entity>,
    },
}

impl LogicalPlan {
    /// The arity class of this node.
    pub fn arity(&self) -> Arity {
        match self {
            LogicalPlan::EntityScan { .. }
            | LogicalPlan::EntitySample { .. }
            | LogicalPlan::IndexScan { .. }
            | LogicalPlan::CountEntity { .. }
            | LogicalPlan::Insert { .. } => Arity::Nullary,
            LogicalPlan::FilterOnSubSelect { .. } => Arity::Nary,
            _ => Arity::Unary,
        }
    }

    /// The group this node belongs to.
    pub fn group(&self) -> GroupId {
        match self {
            LogicalPlan::EntityScan { group, .. }
            | LogicalPlan::EntitySample { group, .. }
            | LogicalPlan::IndexScan { group, .. }
            | LogicalPlan::CountEntity { group, .. }
            | LogicalPlan::Insert { group, .. } => *group,
            other => other
                .children()
                .first()
                .map(|c| c.group())
                .unwrap_or(GroupId(0)),
        }
    }

    /// The inputs of this node. The main input comes first.
    pub fn children(&self) -> Vec<&LogicalPlan> {
        match self {
            LogicalPlan::EntityScan { .. }
            | LogicalPlan::EntitySample { .. }
            | LogicalPlan::IndexScan { .. }
            | LogicalPlan::CountEntity { .. }
            | LogicalPlan::Insert { .. } => vec![],
            LogicalPlan::FilterOnSubSelect {
                input, subqueries, ..
            } => {
                let mut children = vec![input.as_ref()];
                children.extend(subqueries.iter().map(|s| s.as_ref()));
                children
            }
            LogicalPlan::Fetch { input, .. }
            | LogicalPlan::Filter { input, .. }
            | LogicalPlan::Function { input, .. }
            | LogicalPlan::NestedFunction { input, .. }
            | LogicalPlan::Select { input, .. }
            | LogicalPlan::SelectDistinct { input, .. }
            | LogicalPlan::Count { input, .. }
            | LogicalPlan::Exists { input, .. }
            | LogicalPlan::Aggregate { input, .. }
            | LogicalPlan::Limit { input, .. }
            | LogicalPlan::Skip { input, .. }
            | LogicalPlan::Sort { input, .. }
            | LogicalPlan::Update { input, .. }
            | LogicalPlan::Delete { input, .. } => vec![input.as_ref()],
        }
    }

    /// The columns this node produces.
    pub fn columns(&self) -> Vec<ColumnDef> {
        match self {
            LogicalPlan::EntityScan { columns, .. }
            | LogicalPlan::EntitySample { columns, .. } => columns.clone(),
            LogicalPlan::IndexScan {
                index, predicate, ..
            } => index.columns_for(predicate),
            LogicalPlan::CountEntity { out, .. }
            | LogicalPlan::Count { out, .. }
            | LogicalPlan::Exists { out, .. } => vec![out.clone()],
            LogicalPlan::Fetch { input, columns, .. } => {
                let mut all = input.columns();
                all.extend(columns.iter().cloned());
                all
            }
            LogicalPlan::Filter { input, .. }
            | LogicalPlan::FilterOnSubSelect { input, .. }
            | LogicalPlan::NestedFunction { input, .. }
            | LogicalPlan::Limit { input, .. }
            | LogicalPlan::Skip { input, .. }
            | LogicalPlan::Sort { input, .. } => input.columns(),
            LogicalPlan::Function { input, out, .. } => {
                let mut all = input.columns();
                all.push(out.clone());
                all
            }
            LogicalPlan::Select { fields, .. } | LogicalPlan::SelectDistinct { fields, .. } => {
                fields.clone()
            }
            LogicalPlan::Aggregate {
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
            LogicalPlan::Insert { entity, .. }
            | LogicalPlan::Update { entity, .. }
            | LogicalPlan::Delete { entity, .. } => {
                vec![synthetic_column(entity.name(), "rows", DataType::Long)]
            }
        }
    }

    /// The columns this node requires from its inputs.
    pub fn requires(&self) -> Vec<ColumnDef> {
        match self {
            LogicalPlan::Filter { predicate, .. }
            | LogicalPlan::FilterOnSubSelect { predicate, .. } => predicate.columns(),
            LogicalPlan::Function { arguments, .. }
            | LogicalPlan::NestedFunction { arguments, .. } => arguments
                .iter()
                .filter_map(|b| b.column().cloned())
                .collect(),
            LogicalPlan::Select { fields, .. } | LogicalPlan::SelectDistinct { fields, .. } => {
                fields.clone()
            }
            LogicalPlan::Aggregate { columns, .. } => columns.clone(),
            LogicalPlan::Sort { order, .. } => order.iter().map(|(c, _)| c.clone()).collect(),
            LogicalPlan::Update { values, .. } => values
                .iter()
                .flat_map(|(_, b)| b.column().cloned())
                .collect(),
            _ => vec![],
        }
    }

    /// The physical columns accessed at the source of this node's group.
    pub fn physical_columns(&self) -> Vec<ColumnDef> {
        match self {
            LogicalPlan::EntityScan { columns, .. }
            | LogicalPlan::EntitySample { columns, .. } => columns.clone(),
            LogicalPlan::IndexScan { predicate, .. } => predicate.columns(),
            other => other
                .children()
                .first()
                .map(|c| c.physical_columns())
                .unwrap_or_default(),
        }
    }

    /// A stable digest over the canonical form of this tree.
    ///
    /// The digest keys the plan cache: it covers each node's class and key
    /// attributes (including predicate digests) plus the digests of its
    /// inputs. Group ids are excluded so that equivalent trees bound in
    /// different sessions collide.
    pub fn digest(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash_into(&mut hasher);
        hasher.finish()
    }

    fn hash_into(&self, state: &mut DefaultHasher) {
        std::mem::discriminant(self).hash(state);
        match self {
            LogicalPlan::EntityScan {
                entity, columns, ..
            } => {
                entity.name().hash(state);
                columns.hash(state);
            }
            LogicalPlan::EntitySample {
                entity,
                columns,
                probability,
                seed,
                ..
            } => {
                entity.name().hash(state);
                columns.hash(state);
                probability.to_bits().hash(state);
                seed.hash(state);
            }
            LogicalPlan::IndexScan {
                index, predicate, ..
            } => {
                index.name().hash(state);
                predicate.digest().hash(state);
            }
            LogicalPlan::CountEntity { entity, out, .. } => {
                entity.name().hash(state);
                out.hash(state);
            }
            LogicalPlan::Fetch {
                entity, columns, ..
            } => {
                entity.name().hash(state);
                columns.hash(state);
            }
            LogicalPlan::Filter { predicate, .. }
            | LogicalPlan::FilterOnSubSelect { predicate, .. } => {
                predicate.digest().hash(state);
            }
            LogicalPlan::Function {
                signature,
                arguments,
                out,
                ..
            } => {
                signature.hash(state);
                arguments.hash(state);
                out.hash(state);
            }
            LogicalPlan::NestedFunction {
                signature,
                arguments,
                out,
                ..
            } => {
                signature.hash(state);
                arguments.hash(state);
                out.hash(state);
            }
            LogicalPlan::Select { fields, .. } | LogicalPlan::SelectDistinct { fields, .. } => {
                fields.hash(state);
            }
            LogicalPlan::Count { out, .. } | LogicalPlan::Exists { out, .. } => {
                out.hash(state);
            }
            LogicalPlan::Aggregate {
                function, columns, ..
            } => {
                function.hash(state);
                columns.hash(state);
            }
            LogicalPlan::Limit { limit, .. } => limit.hash(state),
            LogicalPlan::Skip { skip, .. } => skip.hash(state),
            LogicalPlan::Sort { order, .. } => {
                for (column, direction) in order {
                    column.hash(state);
                    std::mem::discriminant(direction).hash(state);
                }
            }
            LogicalPlan::Insert { entity, rows, .. } => {
                entity.name().hash(state);
                rows.hash(state);
            }
            LogicalPlan::Update {
                entity, values, ..
            } => {
                entity.name().hash(state);
                values.hash(state);
            }
            LogicalPlan::Delete { entity, .. } => {
                entity.name().hash(state);
            }
        }
        for child in self.children() {
            child.hash_into(state);
        }
    }

    /// Rebuild this node with new children, in `children()` order.
    pub fn with_children(&self, mut children: Vec<LogicalPlan>) -> LogicalPlan {
        let mut next = || Arc::new(children.remove(0));
        match self {
            LogicalPlan::EntityScan { .. }
            | LogicalPlan::EntitySample { .. }
            | LogicalPlan::IndexScan { .. }
            | LogicalPlan::CountEntity { .. }
            | LogicalPlan::Insert { .. } => self.clone(),
            LogicalPlan::Fetch {
                entity, columns, ..
            } => LogicalPlan::Fetch {
                input: next(),
                entity: entity.clone(),
                columns: columns.clone(),
            },
            LogicalPlan::Filter { predicate, .. } => LogicalPlan::Filter {
                input: next(),
                predicate: predicate.clone(),
            },
            LogicalPlan::FilterOnSubSelect {
                subqueries,
                predicate,
                ..
            } => LogicalPlan::FilterOnSubSelect {
                input: next(),
                subqueries: subqueries.iter().map(|_| next()).collect(),
                predicate: predicate.clone(),
            },
            LogicalPlan::Function {
                signature,
                arguments,
                out,
                ..
            } => LogicalPlan::Function {
                input: next(),
                signature: signature.clone(),
                arguments: arguments.clone(),
                out: out.clone(),
            },
            LogicalPlan::NestedFunction {
                signature,
                arguments,
                out,
                ..
            } => LogicalPlan::NestedFunction {
                input: next(),
                signature: signature.clone(),
                arguments: arguments.clone(),
                out: out.clone(),
            },
            LogicalPlan::Select { fields, .. } => LogicalPlan::Select {
                input: next(),
                fields: fields.clone(),
            },
            LogicalPlan::SelectDistinct { fields, .. } => LogicalPlan::SelectDistinct {
                input: next(),
                fields: fields.clone(),
            },
            LogicalPlan::Count { out, .. } => LogicalPlan::Count {
                input: next(),
                out: out.clone(),
            },
            LogicalPlan::Exists { out, .. } => LogicalPlan::Exists {
                input: next(),
                out: out.clone(),
            },
            LogicalPlan::Aggregate {
                function, columns, ..
            } => LogicalPlan::Aggregate {
                input: next(),
                function: *function,
                columns: columns.clone(),
            },
            LogicalPlan::Limit { limit, .. } => LogicalPlan::Limit {
                input: next(),
                limit: *limit,
            },
            LogicalPlan::Skip { skip, .. } => LogicalPlan::Skip {
                input: next(),
                skip: *skip,
            },
            LogicalPlan::Sort { order, .. } => LogicalPlan::Sort {
                input: next(),
                order: order.clone(),
            },
            LogicalPlan::Update {
                entity, values, ..
            } => LogicalPlan::Update {
                input: next(),
                entity: entity.clone(),
                values: values.clone(),
            },
            LogicalPlan::Delete { entity, .. } => LogicalPlan::Delete {
                input: next(),
                entity: entity.clone(),
            },
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
        let describe = |columns: &[ColumnDef]| {
            columns
                .iter()
                .map(|c| c.name.simple().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        match self {
            LogicalPlan::EntityScan {
                entity, columns, ..
            } => {
                f.push_str(&format!(
                    "{prefix}EntityScan: {} [{}]\n",
                    entity.name(),
                    describe(columns)
                ));
            }
            LogicalPlan::EntitySample {
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
            LogicalPlan::IndexScan {
                index, predicate, ..
            } => {
                f.push_str(&format!(
                    "{prefix}IndexScan: {} {predicate}\n",
                    index.name()
                ));
            }
            LogicalPlan::CountEntity { entity, .. } => {
                f.push_str(&format!("{prefix}CountEntity: {}\n", entity.name()));
            }
            LogicalPlan::Fetch { columns, .. } => {
                f.push_str(&format!("{prefix}Fetch: [{}]\n", describe(columns)));
            }
            LogicalPlan::Filter { predicate, .. } => {
                f.push_str(&format!("{prefix}Filter: {predicate}\n"));
            }
            LogicalPlan::FilterOnSubSelect { predicate, .. } => {
                f.push_str(&format!("{prefix}FilterOnSubSelect: {predicate}\n"));
            }
            LogicalPlan::Function { signature, out, .. } => {
                f.push_str(&format!(
                    "{prefix}Function: {signature} -> {}\n",
                    out.name.simple()
                ));
            }
            LogicalPlan::NestedFunction { signature, .. } => {
                f.push_str(&format!("{prefix}NestedFunction: {signature}\n"));
            }
            LogicalPlan::Select { fields, .. } => {
                f.push_str(&format!("{prefix}Select: [{}]\n", describe(fields)));
            }
            LogicalPlan::SelectDistinct { fields, .. } => {
                f.push_str(&format!("{prefix}SelectDistinct: [{}]\n", describe(fields)));
            }
            LogicalPlan::Count { .. } => f.push_str(&format!("{prefix}Count\n")),
            LogicalPlan::Exists { .. } => f.push_str(&format!("{prefix}Exists\n")),
            LogicalPlan::Aggregate {
                function, columns, ..
            } => {
                f.push_str(&format!(
                    "{prefix}Aggregate: {function}([{}])\n",
                    describe(columns)
                ));
            }
            LogicalPlan::Limit { limit, .. } => {
                f.push_str(&format!("{prefix}Limit: {limit}\n"));
            }
            LogicalPlan::Skip { skip, .. } => {
                f.push_str(&format!("{prefix}Skip: {skip}\n"));
            }
            LogicalPlan::Sort { order, .. } => {
                let spec = order
                    .iter()
                    .map(|(c, d)| format!("{} {d}", c.name.simple()))
                    .collect::<Vec<_>>()
                    .join(", ");
                f.push_str(&format!("{prefix}Sort: [{spec}]\n"));
            }
            LogicalPlan::Insert { entity, rows, .. } => {
                f.push_str(&format!(
                    "{prefix}Insert: {} {} row(s)\n",
                    entity.name(),
                    rows.len()
                ));
            }
            LogicalPlan::Update { entity, .. } => {
                f.push_str(&format!("{prefix}Update: {}\n", entity.name()));
            }
            LogicalPlan::Delete { entity, .. } => {
                f.push_str(&format!("{prefix}Delete: {}\n", entity.name()));
            }
        }
        for child in self.children() {
            child.format_indent(f, indent + 1);
        }
    }
}

impl PartialEq for LogicalPlan {
    fn eq(&self, other: &Self) -> bool {
        // Class, key attributes and inputs all feed the digest, so digest
        // equality is structural equality up to hashing.
        self.digest() == other.digest()
    }
}

impl Eq for LogicalPlan {}

impl fmt::Debug for LogicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_indent(0))
    }
}

impl fmt::Display for LogicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_indent(0))
    }
}

/// Builder for logical plans.
pub struct LogicalPlanBuilder {
    plan: LogicalPlan,
}

impl LogicalPlanBuilder {
    /// Create a builder from an existing plan.
    pub fn from(plan: LogicalPlan) -> Self {
        Self { plan }
    }

    /// Scan all columns of an entity.
    pub fn scan(group: GroupId, entity: Arc<dyn Entity>) -> Self {
        let columns = entity.columns();
        Self {
            plan: LogicalPlan::EntityScan {
                group,
                entity,
                columns,
            },
        }
    }

    /// Scan a subset of columns of an entity.
    pub fn scan_columns(group: GroupId, entity: Arc<dyn Entity>, columns: Vec<ColumnDef>) -> Self {
        Self {
            plan: LogicalPlan::EntityScan {
                group,
                entity,
                columns,
            },
        }
    }

    /// Sample an entity with the given probability and seed.
    pub fn sample(group: GroupId, entity: Arc<dyn Entity>, probability: f32, seed: u64) -> Self {
        let columns = entity.columns();
        Self {
            plan: LogicalPlan::EntitySample {
                group,
                entity,
                columns,
                probability,
                seed,
            },
        }
    }

    /// Scan an index with a predicate.
    pub fn index_scan(group: GroupId, index: Arc<dyn Index>, predicate: Predicate) -> Self {
        Self {
            plan: LogicalPlan::IndexScan {
                group,
                index,
                predicate,
            },
        }
    }

    pub fn filter(self, predicate: BooleanPredicate) -> Self {
        Self {
            plan: LogicalPlan::Filter {
                input: Arc::new(self.plan),
                predicate,
            },
        }
    }

    pub fn filter_on_subselect(
        self,
        predicate: BooleanPredicate,
        subqueries: Vec<LogicalPlan>,
    ) -> Self {
        Self {
            plan: LogicalPlan::FilterOnSubSelect {
                input: Arc::new(self.plan),
                subqueries: subqueries.into_iter().map(Arc::new).collect(),
                predicate,
            },
        }
    }

    pub fn function(self, signature: Signature, arguments: Vec<Binding>, out: ColumnDef) -> Self {
        Self {
            plan: LogicalPlan::Function {
                input: Arc::new(self.plan),
                signature,
                arguments,
                out,
            },
        }
    }

    pub fn select(self, fields: Vec<ColumnDef>) -> Self {
        Self {
            plan: LogicalPlan::Select {
                input: Arc::new(self.plan),
                fields,
            },
        }
    }

    pub fn select_distinct(self, fields: Vec<ColumnDef>) -> Self {
        Self {
            plan: LogicalPlan::SelectDistinct {
                input: Arc::new(self.plan),
                fields,
            },
        }
    }

    pub fn count(self) -> Self {
        let out = synthetic_column(
            &self.plan.group_entity_name(),
            "count",
            DataType::Long,
        );
        Self {
            plan: LogicalPlan::Count {
                input: Arc::new(self.plan),
                out,
            },
        }
    }

    pub fn exists(self) -> Self {
        let out = synthetic_column(
            &self.plan.group_entity_name(),
            "exists",
            DataType::Boolean,
        );
        Self {
            plan: LogicalPlan::Exists {
                input: Arc::new(self.plan),
                out,
            },
        }
    }

    pub fn aggregate(self, function: AggregateFunction, columns: Vec<ColumnDef>) -> Self {
        Self {
            plan: LogicalPlan::Aggregate {
                input: Arc::new(self.plan),
                function,
                columns,
            },
        }
    }

    pub fn limit(self, limit: u64) -> Self {
        Self {
            plan: LogicalPlan::Limit {
                input: Arc::new(self.plan),
                limit,
            },
        }
    }

    pub fn skip(self, skip: u64) -> Self {
        Self {
            plan: LogicalPlan::Skip {
                input: Arc::new(self.plan),
                skip,
            },
        }
    }

    pub fn sort(self, order: OrderSpec) -> Self {
        Self {
            plan: LogicalPlan::Sort {
                input: Arc::new(self.plan),
                order,
            },
        }
    }

    pub fn build(self) -> LogicalPlan {
        self.plan
    }
}

impl LogicalPlan {
    /// The entity name anchoring synthetic output columns of this subtree.
    fn group_entity_name(&self) -> Name {
        match self {
            LogicalPlan::EntityScan { entity, .. }
            | LogicalPlan::EntitySample { entity, .. }
            | LogicalPlan::CountEntity { entity, .. }
            | LogicalPlan::Fetch { entity, .. }
            | LogicalPlan::Insert { entity, .. }
            | LogicalPlan::Update { entity, .. }
            | LogicalPlan::Delete { entity, .. } => entity.name().clone(),
            LogicalPlan::IndexScan { index, .. } => index
                .name()
                .entity_name()
                .unwrap_or(Name::Root),
            other => other
                .children()
                .first()
                .map(|c| c.group_entity_name())
                .unwrap_or(Name::Root),
        }
    }
}
