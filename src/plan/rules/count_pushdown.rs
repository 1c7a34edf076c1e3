//! Count pushdown: counting a bare scan is a metadata lookup.

use super::RewriteRule;
use crate::error::Result;
use crate::plan::logical::LogicalPlan;

/// Replace `Count` directly above an `EntityScan` by a metadata count.
pub struct CountPushdown;

impl RewriteRule for CountPushdown {
    fn name(&self) -> &'static str {
        "CountPushdown"
    }

    fn can_be_applied(&self, plan: &LogicalPlan) -> bool {
        matches!(
            plan,
            LogicalPlan::Count { input, .. }
                if matches!(input.as_ref(), LogicalPlan::EntityScan { .. })
        )
    }

    fn apply(&self, plan: &LogicalPlan) -> Result<Option<LogicalPlan>> {
        let LogicalPlan::Count { input, out } = plan else {
            return Ok(None);
        };
        let LogicalPlan::EntityScan { group, entity, .. } = input.as_ref() else {
            return Ok(None);
        };
        Ok(Some(LogicalPlan::CountEntity {
            group: *group,
            entity: entity.clone(),
            out: out.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::memory::MemoryEntity;
    use crate::expr::GroupId;
    use crate::plan::logical::LogicalPlanBuilder;
    use crate::types::{ColumnDef, DataType, Name};

    fn scan() -> LogicalPlanBuilder {
        let entity = MemoryEntity::new(
            Name::entity("main", "features").unwrap(),
            vec![ColumnDef::new(
                Name::column("main", "features", "id").unwrap(),
                DataType::Long,
                false,
            )
            .unwrap()],
        );
        LogicalPlanBuilder::scan(GroupId(0), entity)
    }

    #[test]
    fn test_count_over_scan_becomes_metadata_count() {
        let plan = scan().count().build();
        assert!(CountPushdown.can_be_applied(&plan));
        let rewritten = CountPushdown.apply(&plan).unwrap().unwrap();
        assert!(matches!(rewritten, LogicalPlan::CountEntity { .. }));
    }

    #[test]
    fn test_count_over_limit_is_untouched() {
        let plan = scan().limit(10).count().build();
        assert!(!CountPushdown.can_be_applied(&plan));
    }
}
