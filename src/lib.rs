//! Quiver - Embedded Query-Engine Core for Similarity Search
//!
//! Quiver is the query-engine core of a column-oriented database specialised
//! for similarity search over high-dimensional vector data alongside
//! classical boolean predicates. It provides the tree of logical and
//! physical operator nodes, a rule-based planner with cost-driven access
//! path selection and intra-query partitioning, and a runtime that streams
//! records through operators under a transactional execution context.
//!
//! Storage engines, index structures, distance kernels and the service
//! surface are collaborators consumed through narrow contracts in
//! [`catalog`]; in-memory reference implementations back the examples and
//! tests.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use quiver::catalog::memory::{MemoryCatalog, MemoryEntity};
//! use quiver::catalog::transaction::TransactionType;
//! use quiver::expr::GroupId;
//! use quiver::plan::logical::LogicalPlanBuilder;
//! use quiver::types::{ColumnDef, DataType, Name, Value};
//! use quiver::{QueryEngine, Result};
//!
//! fn main() -> Result<()> {
//!     // Register an entity with the in-memory catalogue.
//!     let catalog = Arc::new(MemoryCatalog::new());
//!     let entity = MemoryEntity::new(
//!         Name::entity("main", "features")?,
//!         vec![ColumnDef::new(
//!             Name::column("main", "features", "id")?,
//!             DataType::Long,
//!             false,
//!         )?],
//!     );
//!     entity.insert(vec![Value::Long(1)])?;
//!     catalog.register(entity.clone());
//!
//!     // Plan and execute a query.
//!     let engine = QueryEngine::new(catalog);
//!     let tx = engine.begin_transaction(TransactionType::ReadOnly);
//!     let plan = LogicalPlanBuilder::scan(GroupId(0), entity).limit(10).build();
//!     let physical = engine.plan_and_select(&plan, false, true)?;
//!     for record in engine.execute(&physical, &tx, Default::default())? {
//!         println!("{:?}", record?.values());
//!     }
//!     tx.commit()?;
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod cost;
pub mod error;
pub mod exec;
pub mod expr;
pub mod plan;
pub mod statistics;
pub mod types;

// Re-export commonly used types
pub use error::{QuiverError, Result};
pub use types::{ColumnDef, DataType, Name, Record, TupleId, Value};

use std::sync::Arc;

use catalog::functions::FunctionRegistry;
use catalog::transaction::{TransactionContext, TransactionManager, TransactionType};
use catalog::Catalog;
use cost::CostPolicy;
use exec::{ExecutionContext, RecordIterator};
use expr::BindingContext;
use plan::logical::LogicalPlan;
use plan::physical::PhysicalPlan;
use plan::planner::Planner;

/// Configuration of a [`QueryEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// The cost policy driving plan selection and parallelisation
    pub policy: CostPolicy,
    /// Upper bound on workers for a partitioned subtree
    pub max_workers: usize,
    /// Bound of the channels joining partitioned subtrees
    pub channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            policy: CostPolicy::default(),
            max_workers: std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4),
            channel_capacity: 1_024,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cost policy.
    pub fn with_policy(mut self, policy: CostPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the worker bound for partitioned execution.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    /// Set the partition channel capacity.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }
}

/// The query-engine core: planner, function registry and transaction
/// management over a catalogue of entities.
pub struct QueryEngine {
    catalog: Arc<dyn Catalog>,
    registry: Arc<FunctionRegistry>,
    planner: Planner,
    transactions: TransactionManager,
    config: EngineConfig,
}

impl QueryEngine {
    /// Create an engine with the default configuration.
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self::with_config(catalog, EngineConfig::default())
    }

    /// Create an engine with a custom configuration.
    pub fn with_config(catalog: Arc<dyn Catalog>, config: EngineConfig) -> Self {
        let registry = Arc::new(FunctionRegistry::new());
        Self {
            planner: Planner::new(config.policy.clone(), config.max_workers, registry.clone()),
            transactions: TransactionManager::new(catalog.clone()),
            catalog,
            registry,
            config,
        }
    }

    /// The catalogue backing this engine.
    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    /// The process-wide function registry.
    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    /// The planner of this engine.
    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    /// Begin a new transaction.
    pub fn begin_transaction(&self, tx_type: TransactionType) -> Arc<TransactionContext> {
        self.transactions.begin(tx_type)
    }

    /// Plan a bound logical tree and select the best physical plan.
    pub fn plan_and_select(
        &self,
        plan: &LogicalPlan,
        bypass_cache: bool,
        cache: bool,
    ) -> Result<Arc<PhysicalPlan>> {
        self.planner.plan_and_select(plan, bypass_cache, cache)
    }

    /// Execute a physical plan under a transaction, streaming records.
    pub fn execute(
        &self,
        plan: &PhysicalPlan,
        transaction: &Arc<TransactionContext>,
        bindings: BindingContext,
    ) -> Result<RecordIterator> {
        let ctx = ExecutionContext::new(transaction.clone(), bindings)
            .with_channel_capacity(self.config.channel_capacity);
        let operator = exec::to_operator_tree(plan, &ctx)?;
        Ok(exec::run(operator))
    }

    /// Plan and execute a logical tree in one call.
    pub fn query(
        &self,
        plan: &LogicalPlan,
        transaction: &Arc<TransactionContext>,
        bindings: BindingContext,
    ) -> Result<RecordIterator> {
        let physical = self.plan_and_select(plan, false, true)?;
        self.execute(&physical, transaction, bindings)
    }
}

/// Prelude module for common imports.
pub mod prelude {
    pub use crate::catalog::transaction::TransactionType;
    pub use crate::error::{QuiverError, Result};
    pub use crate::expr::{BindingContext, GroupId};
    pub use crate::plan::logical::LogicalPlanBuilder;
    pub use crate::types::{ColumnDef, DataType, Name, Record, TupleId, Value};
    pub use crate::{EngineConfig, QueryEngine};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::memory::{MemoryCatalog, MemoryEntity};
    use crate::catalog::Entity;
    use crate::expr::GroupId;
    use crate::plan::logical::LogicalPlanBuilder;

    fn engine_with_rows(rows: i64) -> (QueryEngine, Arc<MemoryEntity>) {
        let catalog = Arc::new(MemoryCatalog::new());
        let entity = MemoryEntity::new(
            Name::entity("main", "features").unwrap(),
            vec![ColumnDef::new(
                Name::column("main", "features", "id").unwrap(),
                DataType::Long,
                false,
            )
            .unwrap()],
        );
        for i in 0..rows {
            entity.insert(vec![Value::Long(i)]).unwrap();
        }
        catalog.register(entity.clone());
        (QueryEngine::new(catalog), entity)
    }

    #[test]
    fn test_plan_and_execute_roundtrip() {
        let (engine, entity) = engine_with_rows(5);
        let tx = engine.begin_transaction(TransactionType::ReadOnly);
        let plan = LogicalPlanBuilder::scan(GroupId(0), entity).build();

        let records: Result<Vec<_>> = engine
            .query(&plan, &tx, BindingContext::new())
            .unwrap()
            .collect();
        assert_eq!(records.unwrap().len(), 5);
        tx.commit().unwrap();
    }

    #[test]
    fn test_engine_config_builder() {
        let config = EngineConfig::new()
            .with_max_workers(2)
            .with_channel_capacity(16);
        assert_eq!(config.max_workers, 2);
        assert_eq!(config.channel_capacity, 16);
    }
}
