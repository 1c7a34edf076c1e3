//! Integration tests for the execution runtime: streaming semantics, cost
//! monotonicity and partitioning safety.

use std::sync::Arc;

use quiver::catalog::memory::{BruteForceIndex, MemoryCatalog, MemoryEntity};
use quiver::catalog::transaction::TransactionType;
use quiver::catalog::Entity;
use quiver::cost::CostPolicy;
use quiver::expr::{
    AtomicPredicate, Binding, BindingContext, BooleanPredicate, ComparisonOperator,
    DistanceMetric, GroupId, Predicate, ProximityPredicate,
};
use quiver::plan::logical::{AggregateFunction, LogicalPlan, LogicalPlanBuilder};
use quiver::plan::physical::PhysicalPlan;
use quiver::plan::traits::SortDirection;
use quiver::types::{ColumnDef, DataType, Name, Record, TupleId, Value};
use quiver::{EngineConfig, QueryEngine, QuiverError, Result};

// ============================================================================
// Helpers
// ============================================================================

fn long_column(entity: &str, column: &str) -> ColumnDef {
    ColumnDef::new(
        Name::column("main", entity, column).unwrap(),
        DataType::Long,
        true,
    )
    .unwrap()
}

/// Entity with rows `{(1,"a"), (2,"a"), (3,"b")}`.
fn labelled_entity() -> Arc<MemoryEntity> {
    let entity = MemoryEntity::new(
        Name::entity("main", "labelled").unwrap(),
        vec![
            long_column("labelled", "id"),
            ColumnDef::new(
                Name::column("main", "labelled", "label").unwrap(),
                DataType::String,
                true,
            )
            .unwrap(),
        ],
    );
    for (id, label) in [(1, "a"), (2, "a"), (3, "b")] {
        entity
            .insert(vec![Value::Long(id), Value::String(label.into())])
            .unwrap();
    }
    entity
}

/// Entity whose single column emits `0..rows`.
fn sequence_entity(name: &str, rows: i64) -> Arc<MemoryEntity> {
    let entity = MemoryEntity::new(
        Name::entity("main", name).unwrap(),
        vec![long_column(name, "id")],
    );
    for i in 0..rows {
        entity.insert(vec![Value::Long(i)]).unwrap();
    }
    entity
}

fn engine_for(entities: &[Arc<MemoryEntity>]) -> QueryEngine {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let catalog = Arc::new(MemoryCatalog::new());
    for entity in entities {
        catalog.register(entity.clone());
    }
    QueryEngine::new(catalog)
}

fn engine_with_config(entities: &[Arc<MemoryEntity>], config: EngineConfig) -> QueryEngine {
    let catalog = Arc::new(MemoryCatalog::new());
    for entity in entities {
        catalog.register(entity.clone());
    }
    QueryEngine::with_config(catalog, config)
}

fn collect(engine: &QueryEngine, plan: &LogicalPlan, bindings: BindingContext) -> Vec<Record> {
    let tx = engine.begin_transaction(TransactionType::ReadOnly);
    let records: Result<Vec<Record>> = engine.query(plan, &tx, bindings).unwrap().collect();
    let records = records.unwrap();
    tx.commit().unwrap();
    records
}

/// A cost policy with unit costs large enough to trigger partitioning on
/// small in-memory entities.
fn aggressive_policy() -> CostPolicy {
    CostPolicy {
        speedup_per_worker: 0.01,
        disk_access_read: 1.0,
        disk_access_write: 1.0,
        memory_access: 1.0,
        flop: 1.0,
        ..CostPolicy::default()
    }
}

// ============================================================================
// Scenario (a): select-distinct after scan
// ============================================================================

#[test]
fn test_select_distinct_after_scan() {
    let entity = labelled_entity();
    let engine = engine_for(&[entity.clone()]);
    let label = entity.column_for_name("label").unwrap();

    let plan = LogicalPlanBuilder::scan(GroupId(0), entity)
        .select_distinct(vec![label])
        .build();

    let mut labels: Vec<String> = collect(&engine, &plan, BindingContext::new())
        .into_iter()
        .map(|r| match &r.values()[0] {
            Value::String(s) => s.clone(),
            other => panic!("expected a string, got {other}"),
        })
        .collect();
    labels.sort();
    assert_eq!(labels, vec!["a", "b"]);
}

// ============================================================================
// Scenario (b): limit/skip composition
// ============================================================================

#[test]
fn test_skip_limit_composition() {
    let entity = sequence_entity("digits", 10);
    let engine = engine_for(&[entity.clone()]);

    let plan = LogicalPlanBuilder::scan(GroupId(0), entity)
        .skip(3)
        .limit(4)
        .build();

    let physical = engine.plan_and_select(&plan, false, false).unwrap();
    assert!(
        physical.traits().not_partitionable(),
        "skip/limit subtree must not be partitionable"
    );

    let ids: Vec<i64> = collect(&engine, &plan, BindingContext::new())
        .into_iter()
        .map(|r| r.values()[0].try_as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![3, 4, 5, 6]);
}

// ============================================================================
// Scenario (c): k-NN via index
// ============================================================================

fn vector_entity() -> (Arc<MemoryEntity>, Arc<BruteForceIndex>) {
    let entity = MemoryEntity::new(
        Name::entity("main", "vectors").unwrap(),
        vec![ColumnDef::new(
            Name::column("main", "vectors", "v").unwrap(),
            DataType::FloatVector(2),
            false,
        )
        .unwrap()],
    );
    for i in 0..4 {
        entity
            .insert(vec![Value::FloatVector(vec![i as f32, i as f32])])
            .unwrap();
    }
    let column = entity.column_for_name("v").unwrap();
    let index = BruteForceIndex::create(&entity, "knn", column).unwrap();
    (entity, index)
}

#[test]
fn test_knn_via_index() {
    let (entity, index) = vector_entity();
    let engine = engine_for(&[entity.clone()]);

    let bindings = BindingContext::new();
    let predicate = Predicate::Proximity(ProximityPredicate::Nns {
        column: entity.column_for_name("v").unwrap(),
        k: 3,
        distance: DistanceMetric::Euclidean,
        query: bindings.bind(Value::FloatVector(vec![0.0, 0.0])),
    });

    let plan = LogicalPlanBuilder::index_scan(GroupId(0), index, predicate).build();
    let records = collect(&engine, &plan, bindings);

    assert_eq!(records.len(), 3);
    let distances: Vec<f64> = records
        .iter()
        .map(|r| r.values()[0].try_as_f64().unwrap())
        .collect();
    assert!(distances.windows(2).all(|w| w[0] <= w[1]));
    let tuple_ids: Vec<TupleId> = records.iter().map(|r| r.tuple_id()).collect();
    assert_eq!(tuple_ids, vec![TupleId(0), TupleId(1), TupleId(2)]);
}

// ============================================================================
// Scenario (d): filter-on-subselect with IN
// ============================================================================

#[test]
fn test_filter_on_subselect_with_in() {
    let main = sequence_entity("mainstream", 5);
    let sub = MemoryEntity::new(
        Name::entity("main", "substream").unwrap(),
        vec![long_column("substream", "val")],
    );
    for v in [2i64, 4, 6] {
        sub.insert(vec![Value::Long(v)]).unwrap();
    }
    let engine = engine_for(&[main.clone(), sub.clone()]);

    // Main stream emits 1..=4; keep ids found in the subquery.
    let bindings = BindingContext::new();
    let subquery_group = GroupId(1);
    let subquery_binding =
        bindings.bind_subquery(subquery_group, sub.column_for_name("val").unwrap());
    let predicate = BooleanPredicate::Atomic(AtomicPredicate::new(
        Binding::Column(main.column_for_name("id").unwrap()),
        ComparisonOperator::In,
        vec![subquery_binding],
    ));
    let subquery = LogicalPlanBuilder::scan(subquery_group, sub).build();
    let plan = LogicalPlanBuilder::scan(GroupId(0), main)
        .skip(1) // ids 1..=4
        .filter_on_subselect(predicate, vec![subquery])
        .build();

    let ids: Vec<i64> = collect(&engine, &plan, bindings)
        .into_iter()
        .map(|r| r.values()[0].try_as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![2, 4]);
}

// ============================================================================
// Scenario (e): sample determinism
// ============================================================================

#[test]
fn test_sample_determinism() {
    let entity = sequence_entity("samples", 200);
    let engine = engine_for(&[entity.clone()]);

    let plan = |seed: u64| {
        LogicalPlanBuilder::sample(GroupId(0), entity.clone(), 0.5, seed).build()
    };

    let ids = |plan: &LogicalPlan| -> Vec<i64> {
        collect(&engine, plan, BindingContext::new())
            .into_iter()
            .map(|r| r.values()[0].try_as_i64().unwrap())
            .collect()
    };

    let first = ids(&plan(42));
    let second = ids(&plan(42));
    assert_eq!(first, second, "equal seeds must produce equal streams");
    assert_ne!(first, ids(&plan(1)), "a different seed samples differently");
}

// ============================================================================
// Property 3: cost monotonicity
// ============================================================================

fn assert_monotone(plan: &PhysicalPlan, policy: &CostPolicy) {
    let own = plan.cost(policy);
    assert!(own.io >= 0.0 && own.cpu >= 0.0 && own.memory >= 0.0 && own.accuracy >= 0.0);

    let total = policy.to_score(&plan.total_cost(policy));
    for child in plan.children() {
        let child_total = policy.to_score(&child.total_cost(policy));
        assert!(
            total >= child_total,
            "total cost of {} ({total}) is below its input ({child_total})",
            plan.label()
        );
        assert_monotone(child, policy);
    }
}

#[test]
fn test_cost_monotonicity() {
    let entity = labelled_entity();
    let engine = engine_for(&[entity.clone()]);
    let policy = CostPolicy::default();

    let plans = vec![
        LogicalPlanBuilder::scan(GroupId(0), entity.clone())
            .sort(vec![(
                entity.column_for_name("id").unwrap(),
                SortDirection::Descending,
            )])
            .limit(2)
            .build(),
        LogicalPlanBuilder::scan(GroupId(0), entity.clone())
            .select_distinct(vec![entity.column_for_name("label").unwrap()])
            .build(),
        LogicalPlanBuilder::scan(GroupId(0), entity.clone())
            .aggregate(
                AggregateFunction::Mean,
                vec![entity.column_for_name("id").unwrap()],
            )
            .build(),
    ];
    for plan in &plans {
        let physical = engine.plan_and_select(plan, true, false).unwrap();
        assert_monotone(&physical, &policy);
    }
}

// ============================================================================
// Property 4: partitioning safety
// ============================================================================

#[test]
fn test_partitioned_scan_preserves_the_multiset() {
    let entity = sequence_entity("partitioned", 100);

    let serial = engine_for(&[entity.clone()]);
    let parallel = engine_with_config(
        &[entity.clone()],
        EngineConfig::new()
            .with_policy(aggressive_policy())
            .with_max_workers(4),
    );

    let plan = LogicalPlanBuilder::scan(GroupId(0), entity).build();

    let physical = parallel.plan_and_select(&plan, false, false).unwrap();
    assert!(
        matches!(physical.as_ref(), PhysicalPlan::Merge { .. }),
        "expected a merge over partitions:\n{physical}"
    );

    let ids = |engine: &QueryEngine| -> Vec<i64> {
        let mut ids: Vec<i64> = collect(engine, &plan, BindingContext::new())
            .into_iter()
            .map(|r| r.values()[0].try_as_i64().unwrap())
            .collect();
        ids.sort();
        ids
    };
    assert_eq!(ids(&serial), ids(&parallel));
}

#[test]
fn test_partitioned_knn_uses_merge_limiting_sort() {
    let (entity, index) = vector_entity();
    let engine = engine_with_config(
        &[entity.clone()],
        EngineConfig::new()
            .with_policy(aggressive_policy())
            .with_max_workers(4),
    );

    let bindings = BindingContext::new();
    let predicate = Predicate::Proximity(ProximityPredicate::Nns {
        column: entity.column_for_name("v").unwrap(),
        k: 3,
        distance: DistanceMetric::Euclidean,
        query: bindings.bind(Value::FloatVector(vec![0.0, 0.0])),
    });
    let plan = LogicalPlanBuilder::index_scan(GroupId(0), index, predicate).build();

    let physical = engine.plan_and_select(&plan, false, false).unwrap();
    assert!(
        matches!(physical.as_ref(), PhysicalPlan::MergeLimitingSort { .. }),
        "expected a limiting sort merge over partitions:\n{physical}"
    );

    // Output is the global top 3, in ascending distance order.
    let tx = engine.begin_transaction(TransactionType::ReadOnly);
    let records: Result<Vec<Record>> =
        engine.execute(&physical, &tx, bindings).unwrap().collect();
    let records = records.unwrap();
    tx.commit().unwrap();

    assert_eq!(records.len(), 3);
    let distances: Vec<f64> = records
        .iter()
        .map(|r| r.values()[0].try_as_f64().unwrap())
        .collect();
    assert!(distances.windows(2).all(|w| w[0] <= w[1]));
    let mut tuple_ids: Vec<TupleId> = records.iter().map(|r| r.tuple_id()).collect();
    tuple_ids.sort();
    assert_eq!(tuple_ids, vec![TupleId(0), TupleId(1), TupleId(2)]);
}

// ============================================================================
// Aggregations and management operations
// ============================================================================

#[test]
fn test_aggregations() {
    let entity = sequence_entity("numbers", 5);
    let engine = engine_for(&[entity.clone()]);
    let id = entity.column_for_name("id").unwrap();

    let check = |function: AggregateFunction, expected: Value| {
        let plan = LogicalPlanBuilder::scan(GroupId(0), entity.clone())
            .aggregate(function, vec![id.clone()])
            .build();
        let records = collect(&engine, &plan, BindingContext::new());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].values()[0], expected, "{function:?}");
    };

    check(AggregateFunction::Sum, Value::Double(10.0));
    check(AggregateFunction::Mean, Value::Double(2.0));
    check(AggregateFunction::Min, Value::Long(0));
    check(AggregateFunction::Max, Value::Long(4));
}

#[test]
fn test_exists_and_count() {
    let entity = sequence_entity("present", 3);
    let engine = engine_for(&[entity.clone()]);

    let exists = LogicalPlanBuilder::scan(GroupId(0), entity.clone())
        .exists()
        .build();
    let records = collect(&engine, &exists, BindingContext::new());
    assert_eq!(records[0].values()[0], Value::Boolean(true));

    let count = LogicalPlanBuilder::scan(GroupId(0), entity).count().build();
    let records = collect(&engine, &count, BindingContext::new());
    assert_eq!(records[0].values()[0], Value::Long(3));
}

#[test]
fn test_insert_update_delete() {
    let entity = sequence_entity("mutable", 0);
    let engine = engine_for(&[entity.clone()]);
    let id = entity.column_for_name("id").unwrap();

    // Insert three rows.
    let insert = LogicalPlan::Insert {
        group: GroupId(0),
        entity: entity.clone(),
        rows: vec![
            vec![Value::Long(1)],
            vec![Value::Long(2)],
            vec![Value::Long(3)],
        ],
    };
    let tx = engine.begin_transaction(TransactionType::ReadWrite);
    let physical = engine.plan_and_select(&insert, false, false).unwrap();
    let records: Result<Vec<Record>> = engine
        .execute(&physical, &tx, BindingContext::new())
        .unwrap()
        .collect();
    assert_eq!(records.unwrap()[0].values()[0], Value::Long(3));
    tx.commit().unwrap();
    assert_eq!(entity.count().unwrap(), 3);

    // Update every row matched by a filter.
    let bindings = BindingContext::new();
    let predicate = BooleanPredicate::Atomic(AtomicPredicate::new(
        Binding::Column(id.clone()),
        ComparisonOperator::Greater,
        vec![bindings.bind(Value::Long(1))],
    ));
    let update = LogicalPlan::Update {
        input: Arc::new(
            LogicalPlanBuilder::scan(GroupId(0), entity.clone())
                .filter(predicate.clone())
                .build(),
        ),
        entity: entity.clone(),
        values: vec![(id.clone(), bindings.bind(Value::Long(99)))],
    };
    let tx = engine.begin_transaction(TransactionType::ReadWrite);
    let physical = engine.plan_and_select(&update, false, false).unwrap();
    let records: Result<Vec<Record>> = engine
        .execute(&physical, &tx, bindings.clone())
        .unwrap()
        .collect();
    assert_eq!(records.unwrap()[0].values()[0], Value::Long(2));
    tx.commit().unwrap();

    // Delete the updated rows.
    let bindings = BindingContext::new();
    let delete = LogicalPlan::Delete {
        input: Arc::new(
            LogicalPlanBuilder::scan(GroupId(0), entity.clone())
                .filter(BooleanPredicate::Atomic(AtomicPredicate::new(
                    Binding::Column(id),
                    ComparisonOperator::Equal,
                    vec![bindings.bind(Value::Long(99))],
                )))
                .build(),
        ),
        entity: entity.clone(),
    };
    let tx = engine.begin_transaction(TransactionType::ReadWrite);
    let physical = engine.plan_and_select(&delete, false, false).unwrap();
    let records: Result<Vec<Record>> = engine
        .execute(&physical, &tx, bindings)
        .unwrap()
        .collect();
    assert_eq!(records.unwrap()[0].values()[0], Value::Long(2));
    tx.commit().unwrap();
    assert_eq!(entity.count().unwrap(), 1);
}

// ============================================================================
// Functions and cancellation
// ============================================================================

#[test]
fn test_distance_function_operator() {
    let (entity, _) = vector_entity();
    let engine = engine_for(&[entity.clone()]);

    let bindings = BindingContext::new();
    let v = entity.column_for_name("v").unwrap();
    let out = ColumnDef::new(
        Name::column("main", "vectors", "distance").unwrap(),
        DataType::Double,
        false,
    )
    .unwrap();
    let signature = quiver::catalog::functions::Signature::new(
        "euclidean",
        vec![DataType::FloatVector(2), DataType::FloatVector(2)],
    );
    let plan = LogicalPlanBuilder::scan(GroupId(0), entity)
        .function(
            signature,
            vec![
                Binding::Column(v),
                bindings.bind(Value::FloatVector(vec![0.0, 0.0])),
            ],
            out.clone(),
        )
        .sort(vec![(out, SortDirection::Ascending)])
        .limit(2)
        .build();

    let records = collect(&engine, &plan, bindings);
    assert_eq!(records.len(), 2);
    // The two closest vectors to the origin, with their distances last in
    // the layout.
    let distances: Vec<f64> = records
        .iter()
        .map(|r| r.values().last().unwrap().try_as_f64().unwrap())
        .collect();
    assert!((distances[0] - 0.0).abs() < 1e-9);
    assert!((distances[1] - (2.0f64).sqrt()).abs() < 1e-9);
}

#[test]
fn test_cancellation_surfaces_and_rolls_back() {
    let entity = sequence_entity("cancellable", 10);
    let engine = engine_for(&[entity.clone()]);

    let plan = LogicalPlanBuilder::scan(GroupId(0), entity).build();
    let physical = engine.plan_and_select(&plan, false, false).unwrap();

    let tx = engine.begin_transaction(TransactionType::ReadOnly);
    let mut stream = engine
        .execute(&physical, &tx, BindingContext::new())
        .unwrap();
    assert!(stream.next().unwrap().is_ok());

    tx.token().cancel();
    let outcome = stream.next().unwrap();
    assert!(matches!(outcome, Err(QuiverError::Cancelled)));
    tx.rollback().unwrap();
}

// ============================================================================
// Selectivity-driven estimates survive end to end
// ============================================================================

#[test]
fn test_output_size_estimates_are_monotone_on_filters() {
    let entity = sequence_entity("estimates", 50);
    let engine = engine_for(&[entity.clone()]);
    let bindings = BindingContext::new();

    let plan = LogicalPlanBuilder::scan(GroupId(0), entity.clone())
        .filter(BooleanPredicate::Atomic(AtomicPredicate::new(
            Binding::Column(entity.column_for_name("id").unwrap()),
            ComparisonOperator::Equal,
            vec![bindings.bind(Value::Long(7))],
        )))
        .limit(5)
        .build();
    let physical = engine.plan_and_select(&plan, false, false).unwrap();

    // Output sizes shrink monotonically along filter and limit chains.
    let mut sizes = Vec::new();
    let mut node: &PhysicalPlan = &physical;
    loop {
        sizes.push(node.output_size());
        match node.children().first() {
            Some(child) => node = child,
            None => break,
        }
    }
    for pair in sizes.windows(2) {
        assert!(pair[0] <= pair[1], "sizes grow downstream: {sizes:?}");
    }
}
