//! Index-based access-path selection.

use std::sync::Arc;

use tracing::debug;

use super::PhysicalRewriteRule;
use crate::cost::CostPolicy;
use crate::error::Result;
use crate::expr::Predicate;
use crate::plan::physical::PhysicalPlan;
use crate::types::ColumnDef;

/// Replace `Filter` over `EntityScan` by an `IndexScan` when an index can
/// process the predicate more cheaply.
///
/// Among qualifying indexes the cheapest score wins; among equal scores,
/// indexes whose output carries `Order`/`Limit` traits are preferred since
/// they satisfy downstream demands for free. When the index produces fewer
/// columns than the scan, a `Fetch` restores the schema.
pub struct BooleanIndexScan;

impl PhysicalRewriteRule for BooleanIndexScan {
    fn name(&self) -> &'static str {
        "BooleanIndexScan"
    }

    fn can_be_applied(&self, plan: &PhysicalPlan) -> bool {
        matches!(
            plan,
            PhysicalPlan::Filter { input, .. }
                if matches!(input.as_ref(), PhysicalPlan::EntityScan { .. })
        )
    }

    fn apply(&self, plan: &PhysicalPlan, policy: &CostPolicy) -> Result<Option<PhysicalPlan>> {
        let PhysicalPlan::Filter {
            input,
            predicate,
            selectivity,
        } = plan
        else {
            return Ok(None);
        };
        let PhysicalPlan::EntityScan {
            entity,
            columns,
            rows,
            ..
        } = input.as_ref()
        else {
            return Ok(None);
        };

        let candidate_predicate = Predicate::Boolean(predicate.clone());
        let alternative_score = policy.to_score(&plan.total_cost(policy));

        // Rank qualifying indexes by score, then by trait support.
        let mut best: Option<(f32, usize, Arc<dyn crate::catalog::Index>)> = None;
        for index in entity.indexes() {
            if !index.can_process(&candidate_predicate) {
                continue;
            }
            let cost = index.cost(&candidate_predicate);
            if cost.is_invalid() {
                continue;
            }
            let score = policy.to_score(&scaled_units(&cost, policy));
            let traits = index.traits_for(&candidate_predicate);
            let support = traits.order().is_some() as usize + traits.limit().is_some() as usize;
            let better = match &best {
                None => true,
                Some((s, sup, _)) => score < *s || (score == *s && support > *sup),
            };
            if better {
                best = Some((score, support, index));
            }
        }
        let Some((score, _, index)) = best else {
            return Ok(None);
        };
        if score >= alternative_score {
            return Ok(None);
        }
        debug!(
            index = %index.name(),
            score,
            alternative_score,
            "replacing scan and filter by index scan"
        );

        let scan = PhysicalPlan::IndexScan {
            group: plan.group(),
            index: index.clone(),
            predicate: candidate_predicate.clone(),
            rows: selectivity.apply(*rows),
            partition: None,
        };

        // Restore columns the index does not produce.
        let produced = index.columns_for(&candidate_predicate);
        let missing: Vec<ColumnDef> = columns
            .iter()
            .filter(|c| !produced.iter().any(|p| p.name.matches(&c.name)))
            .cloned()
            .collect();
        if missing.is_empty() {
            Ok(Some(scan))
        } else {
            Ok(Some(PhysicalPlan::Fetch {
                input: Arc::new(scan),
                entity: entity.clone(),
                columns: missing,
            }))
        }
    }
}

/// Convert abstract index cost units into policy-comparable figures.
fn scaled_units(units: &crate::cost::Cost, policy: &CostPolicy) -> crate::cost::Cost {
    crate::cost::Cost {
        io: units.io * policy.disk_access_read,
        cpu: units.cpu * policy.flop,
        memory: units.memory * policy.memory_access,
        accuracy: units.accuracy,
    }
}
