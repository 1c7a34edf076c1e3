//! Deferred-fetch rewrites.
//!
//! Scanning fewer columns and back-fetching the rest once filters have
//! discarded most records is almost always cheaper than scanning wide rows.
//! [`DeferFetchOnScan`] narrows a scan to the columns required by the
//! selective operators above it and introduces a `Fetch` right before the
//! first use of the deferred columns. [`DeferFetchOnFetch`] then migrates an
//! existing `Fetch` further downstream, shrinks it to the columns actually
//! used, or eliminates it entirely.

use std::sync::Arc;

use super::{is_projection, RewriteRule};
use crate::error::Result;
use crate::plan::logical::LogicalPlan;
use crate::types::ColumnDef;

/// Narrow an `EntityScan` and defer the unused columns into a `Fetch`.
pub struct DeferFetchOnScan;

impl DeferFetchOnScan {
    /// Decompose a unary chain from `plan` down to an `EntityScan`.
    ///
    /// Returns the chain ordered top-down (starting at `plan`) and the scan.
    /// Chains that already contain a `Fetch` belong to [`DeferFetchOnFetch`].
    fn chain<'a>(plan: &'a LogicalPlan) -> Option<(Vec<&'a LogicalPlan>, &'a LogicalPlan)> {
        let mut ops = Vec::new();
        let mut current = plan;
        loop {
            match current {
                LogicalPlan::EntityScan { .. } => {
                    return if ops.is_empty() { None } else { Some((ops, current)) };
                }
                LogicalPlan::Fetch { .. } => return None,
                _ if matches!(current.arity(), crate::plan::Arity::Unary) => {
                    ops.push(current);
                    current = current.children()[0];
                }
                _ => return None,
            }
        }
    }

    fn rewrite(plan: &LogicalPlan) -> Option<LogicalPlan> {
        let (ops_top_down, scan) = Self::chain(plan)?;
        let LogicalPlan::EntityScan {
            group,
            entity,
            columns: scan_columns,
        } = scan
        else {
            return None;
        };

        let in_scan = |c: &ColumnDef| scan_columns.iter().any(|s| s.name.matches(&c.name));

        // Walk bottom-up: selective operators accumulate the columns that
        // must be scanned; the first projection marks the fetch point.
        let mut scanned: Vec<ColumnDef> = Vec::new();
        let mut prefix: Vec<&LogicalPlan> = Vec::new();
        let mut suffix: Vec<&LogicalPlan> = Vec::new();
        for &op in ops_top_down.iter().rev() {
            if suffix.is_empty() && !is_projection(op) {
                for required in op.requires() {
                    if in_scan(&required) && !scanned.contains(&required) {
                        scanned.push(required);
                    }
                }
                prefix.push(op);
            } else {
                suffix.push(op);
            }
        }
        if scanned.is_empty() {
            return None;
        }

        // Everything used at or above the fetch point must be fetched.
        let mut fetched: Vec<ColumnDef> = Vec::new();
        let used_later = suffix
            .iter()
            .flat_map(|op| op.requires())
            .chain(plan.columns());
        for column in used_later {
            if in_scan(&column)
                && !scanned.contains(&column)
                && !fetched.contains(&column)
            {
                fetched.push(column);
            }
        }

        // No-op when the scan is already minimal.
        if scanned.len() == scan_columns.len() {
            return None;
        }

        // Preserve the original column order of the entity.
        let ordered = |subset: &[ColumnDef]| -> Vec<ColumnDef> {
            scan_columns
                .iter()
                .filter(|c| subset.iter().any(|s| s.name.matches(&c.name)))
                .cloned()
                .collect()
        };

        let mut rebuilt = LogicalPlan::EntityScan {
            group: *group,
            entity: entity.clone(),
            columns: ordered(&scanned),
        };
        for op in &prefix {
            rebuilt = op.with_children(vec![rebuilt]);
        }
        if !fetched.is_empty() {
            rebuilt = LogicalPlan::Fetch {
                input: Arc::new(rebuilt),
                entity: entity.clone(),
                columns: ordered(&fetched),
            };
        }
        for op in &suffix {
            rebuilt = op.with_children(vec![rebuilt]);
        }
        Some(rebuilt)
    }
}

impl RewriteRule for DeferFetchOnScan {
    fn name(&self) -> &'static str {
        "DeferFetchOnScan"
    }

    fn can_be_applied(&self, plan: &LogicalPlan) -> bool {
        Self::chain(plan).is_some()
    }

    fn apply(&self, plan: &LogicalPlan) -> Result<Option<LogicalPlan>> {
        Ok(Self::rewrite(plan))
    }
}

/// Move an existing `Fetch` further downstream, or eliminate it.
pub struct DeferFetchOnFetch;

impl RewriteRule for DeferFetchOnFetch {
    fn name(&self) -> &'static str {
        "DeferFetchOnFetch"
    }

    fn can_be_applied(&self, plan: &LogicalPlan) -> bool {
        matches!(plan.arity(), crate::plan::Arity::Unary)
            && matches!(
                plan.children().first(),
                Some(LogicalPlan::Fetch { .. })
            )
    }

    fn apply(&self, plan: &LogicalPlan) -> Result<Option<LogicalPlan>> {
        if !self.can_be_applied(plan) {
            return Ok(None);
        }
        let children = plan.children();
        let LogicalPlan::Fetch {
            input: fetch_input,
            entity,
            columns: fetched,
        } = children[0]
        else {
            return Ok(None);
        };

        // Two fetches in a row collapse into one.
        if let LogicalPlan::Fetch { columns, .. } = plan {
            let mut combined = fetched.clone();
            combined.extend(
                columns
                    .iter()
                    .filter(|c| !fetched.iter().any(|f| f.name.matches(&c.name)))
                    .cloned(),
            );
            return Ok(Some(LogicalPlan::Fetch {
                input: fetch_input.clone(),
                entity: entity.clone(),
                columns: combined,
            }));
        }

        if is_projection(plan) {
            // Shrink the fetch to the columns the projection reads, or
            // eliminate it when none are used.
            let required = plan.requires();
            let keep: Vec<ColumnDef> = fetched
                .iter()
                .filter(|c| required.iter().any(|r| r.name.matches(&c.name)))
                .cloned()
                .collect();
            if keep.len() == fetched.len() {
                return Ok(None);
            }
            let new_input = if keep.is_empty() {
                fetch_input.as_ref().clone()
            } else {
                LogicalPlan::Fetch {
                    input: fetch_input.clone(),
                    entity: entity.clone(),
                    columns: keep,
                }
            };
            return Ok(Some(plan.with_children(vec![new_input])));
        }

        // Move the fetch past an operator that does not read its columns;
        // the fewer records survive, the fewer fetches happen.
        let required = plan.requires();
        if required
            .iter()
            .any(|r| fetched.iter().any(|f| f.name.matches(&r.name)))
        {
            return Ok(None);
        }
        let moved_inner = plan.with_children(vec![fetch_input.as_ref().clone()]);
        Ok(Some(LogicalPlan::Fetch {
            input: Arc::new(moved_inner),
            entity: entity.clone(),
            columns: fetched.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::memory::MemoryEntity;
    use crate::catalog::Entity;
    use crate::expr::{
        AtomicPredicate, Binding, BindingContext, BooleanPredicate, ComparisonOperator, GroupId,
    };
    use crate::plan::logical::LogicalPlanBuilder;
    use crate::types::{DataType, Name, Value};

    fn entity() -> Arc<MemoryEntity> {
        let name = Name::entity("main", "features").unwrap();
        let columns = ["a", "b", "c", "d"]
            .iter()
            .map(|c| {
                ColumnDef::new(
                    Name::column("main", "features", c).unwrap(),
                    DataType::Long,
                    true,
                )
                .unwrap()
            })
            .collect();
        MemoryEntity::new(name, columns)
    }

    fn names(columns: &[ColumnDef]) -> Vec<&str> {
        columns.iter().map(|c| c.name.simple()).collect()
    }

    #[test]
    fn test_defer_fetch_on_scan_shape() {
        let entity = entity();
        let ctx = BindingContext::new();
        let c = entity.column_for_name("c").unwrap();
        let a = entity.column_for_name("a").unwrap();
        let b = entity.column_for_name("b").unwrap();

        let plan = LogicalPlanBuilder::scan(GroupId(0), entity)
            .filter(BooleanPredicate::Atomic(AtomicPredicate::new(
                Binding::Column(c),
                ComparisonOperator::Equal,
                vec![ctx.bind_empty()],
            )))
            .select(vec![a, b])
            .build();

        let rewritten = DeferFetchOnScan.apply(&plan).unwrap().unwrap();

        // Select(a,b) over Fetch(a,b) over Filter(c) over Scan(c).
        let LogicalPlan::Select { input: fetch, .. } = &rewritten else {
            panic!("expected Select at the top, got {rewritten}");
        };
        let LogicalPlan::Fetch {
            input: filter,
            columns,
            ..
        } = fetch.as_ref()
        else {
            panic!("expected Fetch below Select, got {fetch}");
        };
        assert_eq!(names(columns), vec!["a", "b"]);
        let LogicalPlan::Filter { input: scan, .. } = filter.as_ref() else {
            panic!("expected Filter below Fetch, got {filter}");
        };
        let LogicalPlan::EntityScan { columns, .. } = scan.as_ref() else {
            panic!("expected EntityScan at the bottom, got {scan}");
        };
        assert_eq!(names(columns), vec!["c"]);
    }

    #[test]
    fn test_defer_fetch_without_projection_fetches_everything_back() {
        let entity = entity();
        let ctx = BindingContext::new();
        let c = entity.column_for_name("c").unwrap();

        let plan = LogicalPlanBuilder::scan(GroupId(0), entity)
            .filter(BooleanPredicate::Atomic(AtomicPredicate::new(
                Binding::Column(c),
                ComparisonOperator::Equal,
                vec![ctx.bind(Value::Long(1))],
            )))
            .build();

        let rewritten = DeferFetchOnScan.apply(&plan).unwrap().unwrap();

        // The output schema is unchanged.
        assert_eq!(names(&rewritten.columns()), names(&plan.columns()));
        let LogicalPlan::Fetch { columns, .. } = &rewritten else {
            panic!("expected Fetch at the top, got {rewritten}");
        };
        assert_eq!(names(columns), vec!["a", "b", "d"]);
    }

    #[test]
    fn test_defer_fetch_is_idempotent() {
        let entity = entity();
        let ctx = BindingContext::new();
        let c = entity.column_for_name("c").unwrap();
        let plan = LogicalPlanBuilder::scan(GroupId(0), entity)
            .filter(BooleanPredicate::Atomic(AtomicPredicate::new(
                Binding::Column(c),
                ComparisonOperator::Equal,
                vec![ctx.bind(Value::Long(1))],
            )))
            .build();

        let once = DeferFetchOnScan.apply(&plan).unwrap().unwrap();
        // The rewritten chain contains a Fetch, so the rule backs off.
        assert!(DeferFetchOnScan.apply(&once).unwrap().is_none());
    }

    #[test]
    fn test_fetch_moves_past_limit() {
        let entity = entity();
        let ctx = BindingContext::new();
        let c = entity.column_for_name("c").unwrap();
        let plan = LogicalPlanBuilder::scan(GroupId(0), entity)
            .filter(BooleanPredicate::Atomic(AtomicPredicate::new(
                Binding::Column(c),
                ComparisonOperator::Equal,
                vec![ctx.bind(Value::Long(1))],
            )))
            .build();
        let deferred = DeferFetchOnScan.apply(&plan).unwrap().unwrap();
        let limited = LogicalPlan::Limit {
            input: Arc::new(deferred),
            limit: 5,
        };

        let moved = DeferFetchOnFetch.apply(&limited).unwrap().unwrap();
        assert!(matches!(moved, LogicalPlan::Fetch { .. }));
        let LogicalPlan::Fetch { input, .. } = &moved else {
            unreachable!()
        };
        assert!(matches!(input.as_ref(), LogicalPlan::Limit { .. }));
    }

    #[test]
    fn test_unused_fetch_is_eliminated() {
        let entity = entity();
        let ctx = BindingContext::new();
        let c = entity.column_for_name("c").unwrap();
        let plan = LogicalPlanBuilder::scan(GroupId(0), entity)
            .filter(BooleanPredicate::Atomic(AtomicPredicate::new(
                Binding::Column(c.clone()),
                ComparisonOperator::Equal,
                vec![ctx.bind(Value::Long(1))],
            )))
            .build();
        let deferred = DeferFetchOnScan.apply(&plan).unwrap().unwrap();
        // Project onto the scanned column only: the fetch becomes useless.
        let projected = LogicalPlan::Select {
            input: Arc::new(deferred),
            fields: vec![c],
        };

        let pruned = DeferFetchOnFetch.apply(&projected).unwrap().unwrap();
        let LogicalPlan::Select { input, .. } = &pruned else {
            panic!("expected Select, got {pruned}");
        };
        assert!(matches!(input.as_ref(), LogicalPlan::Filter { .. }));
    }
}
