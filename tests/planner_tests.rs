//! Integration tests for the planner: rewrite rules, plan caching and
//! access-path selection.

use std::sync::Arc;

use quiver::catalog::memory::MemoryEntity;
use quiver::catalog::{Cursor, Entity, Index};
use quiver::cost::{Cost, CostPolicy};
use quiver::expr::{
    AtomicPredicate, Binding, BindingContext, BooleanPredicate, ComparisonOperator, GroupId,
    Predicate,
};
use quiver::catalog::functions::FunctionRegistry;
use quiver::plan::logical::{LogicalPlan, LogicalPlanBuilder};
use quiver::plan::physical::PhysicalPlan;
use quiver::plan::planner::Planner;
use quiver::plan::rules::{
    CountPushdown, DeferFetchOnFetch, DeferFetchOnScan, LeftConjunctionRewrite, RewriteRule,
    RightConjunctionRewrite,
};
use quiver::plan::traits::TraitMap;
use quiver::types::{ColumnDef, DataType, Name, Value};

// ============================================================================
// Helpers
// ============================================================================

fn wide_entity(rows: i64) -> Arc<MemoryEntity> {
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
    let entity = MemoryEntity::new(Name::entity("main", "features").unwrap(), columns);
    for i in 0..rows {
        entity
            .insert(vec![
                Value::Long(i),
                Value::Long(i * 2),
                Value::Long(i % 5),
                Value::Long(-i),
            ])
            .unwrap();
    }
    entity
}

fn planner() -> Planner {
    Planner::new(CostPolicy::default(), 1, Arc::new(FunctionRegistry::new()))
}

fn eq_predicate(ctx: &BindingContext, entity: &Arc<MemoryEntity>, column: &str) -> BooleanPredicate {
    BooleanPredicate::Atomic(AtomicPredicate::new(
        Binding::Column(entity.column_for_name(column).unwrap()),
        ComparisonOperator::Equal,
        vec![ctx.bind(Value::Long(3))],
    ))
}

/// Collect every node of a logical tree, depth first.
fn logical_nodes(plan: &LogicalPlan) -> Vec<&LogicalPlan> {
    let mut nodes = vec![plan];
    for child in plan.children() {
        nodes.extend(logical_nodes(child));
    }
    nodes
}

// ============================================================================
// Property 1: rewrite idempotence
// ============================================================================

#[test]
fn test_rewrite_rules_are_idempotent() {
    let entity = wide_entity(10);
    let ctx = BindingContext::new();
    let planner = planner();

    let trees = vec![
        LogicalPlanBuilder::scan(GroupId(0), entity.clone())
            .filter(
                eq_predicate(&ctx, &entity, "a").and(eq_predicate(&ctx, &entity, "b")),
            )
            .build(),
        LogicalPlanBuilder::scan(GroupId(0), entity.clone())
            .filter(eq_predicate(&ctx, &entity, "c"))
            .select(vec![
                entity.column_for_name("a").unwrap(),
                entity.column_for_name("b").unwrap(),
            ])
            .build(),
        LogicalPlanBuilder::scan(GroupId(0), entity.clone()).count().build(),
        LogicalPlanBuilder::scan(GroupId(0), entity.clone())
            .sort(vec![(
                entity.column_for_name("a").unwrap(),
                quiver::plan::traits::SortDirection::Ascending,
            )])
            .limit(4)
            .build(),
    ];

    let rules: Vec<Box<dyn RewriteRule>> = vec![
        Box::new(LeftConjunctionRewrite),
        Box::new(RightConjunctionRewrite),
        Box::new(CountPushdown),
        Box::new(DeferFetchOnScan),
        Box::new(DeferFetchOnFetch),
    ];

    for tree in &trees {
        for rule in &rules {
            let once = planner.apply_rule(rule.as_ref(), tree).unwrap();
            let twice = planner.apply_rule(rule.as_ref(), &once).unwrap();
            assert_eq!(
                once,
                twice,
                "rule {} is not idempotent on:\n{tree}",
                rule.name()
            );
        }
    }
}

// ============================================================================
// Property 2: defer-fetch correctness
// ============================================================================

fn scan_and_fetch_columns(plan: &LogicalPlan) -> (Vec<String>, Vec<String>) {
    let mut scanned = Vec::new();
    let mut fetched = Vec::new();
    for node in logical_nodes(plan) {
        match node {
            LogicalPlan::EntityScan { columns, .. } => {
                scanned.extend(columns.iter().map(|c| c.name.simple().to_string()));
            }
            LogicalPlan::Fetch { columns, .. } => {
                fetched.extend(columns.iter().map(|c| c.name.simple().to_string()));
            }
            _ => {}
        }
    }
    (scanned, fetched)
}

#[test]
fn test_defer_fetch_preserves_used_columns() {
    // Every scanned column is used: the union of the narrowed scan and the
    // fetches must equal the original scan set.
    let entity = wide_entity(10);
    let ctx = BindingContext::new();
    let planner = planner();

    let plan = LogicalPlanBuilder::scan(GroupId(0), entity.clone())
        .filter(eq_predicate(&ctx, &entity, "c"))
        .build();

    let rewritten = planner.rewrite(&plan).unwrap();
    let (scanned, fetched) = scan_and_fetch_columns(&rewritten);

    assert_eq!(scanned, vec!["c"]);
    let mut union: Vec<String> = scanned.into_iter().chain(fetched).collect();
    union.sort();
    assert_eq!(union, vec!["a", "b", "c", "d"]);

    // The output schema is untouched by the rewrite.
    assert_eq!(rewritten.columns().len(), plan.columns().len());
}

#[test]
fn test_defer_fetch_scenario_shape() {
    // Scan(a,b,c,d) -> Filter(c=?) -> Select(a,b) rewrites to
    // Scan(c) -> Filter(c=?) -> Fetch(a,b) -> Select(a,b).
    let entity = wide_entity(10);
    let ctx = BindingContext::new();
    let planner = planner();

    let plan = LogicalPlanBuilder::scan(GroupId(0), entity.clone())
        .filter(eq_predicate(&ctx, &entity, "c"))
        .select(vec![
            entity.column_for_name("a").unwrap(),
            entity.column_for_name("b").unwrap(),
        ])
        .build();

    let rewritten = planner.rewrite(&plan).unwrap();

    let LogicalPlan::Select { input, .. } = &rewritten else {
        panic!("expected Select at the top:\n{rewritten}");
    };
    let LogicalPlan::Fetch { input, columns, .. } = input.as_ref() else {
        panic!("expected Fetch below Select:\n{rewritten}");
    };
    let fetched: Vec<_> = columns.iter().map(|c| c.name.simple()).collect();
    assert_eq!(fetched, vec!["a", "b"]);
    let LogicalPlan::Filter { input, .. } = input.as_ref() else {
        panic!("expected Filter below Fetch:\n{rewritten}");
    };
    let LogicalPlan::EntityScan { columns, .. } = input.as_ref() else {
        panic!("expected EntityScan at the bottom:\n{rewritten}");
    };
    let scanned: Vec<_> = columns.iter().map(|c| c.name.simple()).collect();
    assert_eq!(scanned, vec!["c"]);
}

// ============================================================================
// Property 5: plan cache coherence
// ============================================================================

#[test]
fn test_identical_trees_share_the_cached_plan() {
    let entity = wide_entity(10);
    let planner = planner();

    let build = |value: i64| {
        let ctx = BindingContext::new();
        LogicalPlanBuilder::scan(GroupId(0), entity.clone())
            .filter(BooleanPredicate::Atomic(AtomicPredicate::new(
                Binding::Column(entity.column_for_name("a").unwrap()),
                ComparisonOperator::Equal,
                vec![ctx.bind(Value::Long(value))],
            )))
            .build()
    };

    // Identical structure, even with a different bound literal, shares the
    // digest: literals are parameter slots.
    let first = planner.plan_and_select(&build(1), false, true).unwrap();
    let second = planner.plan_and_select(&build(2), false, true).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn test_predicate_digest_changes_the_lookup_key() {
    let entity = wide_entity(10);
    let planner = planner();
    let ctx = BindingContext::new();

    let build = |op: ComparisonOperator| {
        LogicalPlanBuilder::scan(GroupId(0), entity.clone())
            .filter(BooleanPredicate::Atomic(AtomicPredicate::new(
                Binding::Column(entity.column_for_name("a").unwrap()),
                op,
                vec![ctx.bind(Value::Long(1))],
            )))
            .build()
    };

    let equal = build(ComparisonOperator::Equal);
    let greater = build(ComparisonOperator::Greater);
    assert_ne!(equal.digest(), greater.digest());

    let first = planner.plan_and_select(&equal, false, true).unwrap();
    let second = planner.plan_and_select(&greater, false, true).unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
}

// ============================================================================
// Property 6: index-scan preference
// ============================================================================

/// A stub boolean index advertising a fixed, very low cost.
struct CheapBooleanIndex {
    name: Name,
    column: ColumnDef,
}

impl Index for CheapBooleanIndex {
    fn name(&self) -> &Name {
        &self.name
    }

    fn can_process(&self, predicate: &Predicate) -> bool {
        matches!(predicate, Predicate::Boolean(p)
            if p.columns().iter().any(|c| c.name.matches(&self.column.name)))
    }

    fn cost(&self, predicate: &Predicate) -> Cost {
        if self.can_process(predicate) {
            Cost::new(1.0, 1.0, 0.0, 0.0)
        } else {
            Cost::INVALID
        }
    }

    fn columns_for(&self, predicate: &Predicate) -> Vec<ColumnDef> {
        match self.can_process(predicate) {
            true => vec![self.column.clone()],
            false => Vec::new(),
        }
    }

    fn traits_for(&self, _predicate: &Predicate) -> TraitMap {
        TraitMap::new()
    }

    fn filter(
        &self,
        _predicate: &Predicate,
        _ctx: &BindingContext,
        _partition: Option<quiver::types::TupleIdRange>,
    ) -> quiver::Result<Box<dyn Cursor>> {
        Ok(Box::new(quiver::catalog::memory::MemoryCursor::new(vec![])))
    }
}

#[test]
fn test_cheaper_index_replaces_scan_and_filter() {
    let entity = wide_entity(1_000);
    let column = entity.column_for_name("a").unwrap();
    entity.add_index(Arc::new(CheapBooleanIndex {
        name: Name::index("main", "features", "cheap").unwrap(),
        column,
    }));

    let ctx = BindingContext::new();
    let plan = LogicalPlanBuilder::scan(GroupId(0), entity.clone())
        .filter(eq_predicate(&ctx, &entity, "a"))
        .build();

    let physical = planner().plan_and_select(&plan, false, false).unwrap();

    // The index produces only column a, so a fetch restores the schema.
    let uses_index = match physical.as_ref() {
        PhysicalPlan::IndexScan { .. } => true,
        PhysicalPlan::Fetch { input, .. } => {
            matches!(input.as_ref(), PhysicalPlan::IndexScan { .. })
        }
        _ => false,
    };
    assert!(uses_index, "expected an index scan:\n{physical}");
}

#[test]
fn test_unmatched_predicate_keeps_the_scan() {
    let entity = wide_entity(1_000);
    let column = entity.column_for_name("a").unwrap();
    entity.add_index(Arc::new(CheapBooleanIndex {
        name: Name::index("main", "features", "cheap").unwrap(),
        column,
    }));

    // The filter touches column b; the index cannot process it.
    let ctx = BindingContext::new();
    let plan = LogicalPlanBuilder::scan(GroupId(0), entity.clone())
        .filter(eq_predicate(&ctx, &entity, "b"))
        .build();

    let physical = planner().plan_and_select(&plan, false, false).unwrap();
    let rendered = format!("{physical}");
    assert!(
        !rendered.contains("IndexScan"),
        "expected the filter over scan to survive:\n{rendered}"
    );
    assert!(rendered.contains("Filter"));
}

// ============================================================================
// Count pushdown end to end
// ============================================================================

#[test]
fn test_count_pushdown_through_the_planner() {
    let entity = wide_entity(25);
    let plan = LogicalPlanBuilder::scan(GroupId(0), entity).count().build();
    let physical = planner().plan_and_select(&plan, false, false).unwrap();
    assert!(matches!(physical.as_ref(), PhysicalPlan::CountEntity { .. }));
}
