//! The cost-based planner.
//!
//! Planning has three phases. Phase 1 drives the logical rewrite rules to a
//! fixed point, bottom-up. Phase 2 implements every logical node into one or
//! more physical candidates; a `Filter` above a scan additionally yields an
//! `IndexScan` candidate per qualifying index. Phase 3 refines candidates
//! through the physical rules, selects the minimum-score plan under the
//! active policy, asks the policy for an optimal worker count and partitions
//! the chosen plan when more than one worker pays off. Selected plans are
//! cached under the logical tree's structural digest.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace};

use super::cache::PlanCache;
use super::logical::LogicalPlan;
use super::physical::PhysicalPlan;
use super::rules::{
    BooleanIndexScan, CountPushdown, DeferFetchOnFetch, DeferFetchOnScan, LeftConjunctionRewrite,
    PhysicalRewriteRule, RewriteRule, RightConjunctionRewrite,
};
use super::GroupIdGenerator;
use crate::catalog::functions::FunctionRegistry;
use crate::catalog::Entity;
use crate::cost::CostPolicy;
use crate::error::{QuiverError, Result};
use crate::expr::Predicate;
use crate::statistics::{NaiveSelectivityCalculator, Selectivity, ValueStatistics};
use crate::types::ColumnDef;

/// Upper bound on rewrite passes; a correct rule set converges long before.
const MAX_REWRITE_PASSES: usize = 16;

/// Upper bound on physical candidates carried through selection.
const MAX_CANDIDATES: usize = 16;

/// Output-size estimate for index scans that advertise no limit.
const DEFAULT_INDEX_ROWS: u64 = 1_000;

/// The cost-based query planner.
pub struct Planner {
    policy: CostPolicy,
    max_workers: usize,
    registry: Arc<FunctionRegistry>,
    logical_rules: Vec<Arc<dyn RewriteRule>>,
    physical_rules: Vec<Arc<dyn PhysicalRewriteRule>>,
    cache: PlanCache,
    groups: GroupIdGenerator,
}

impl Planner {
    /// Create a planner with the stock rule set.
    pub fn new(policy: CostPolicy, max_workers: usize, registry: Arc<FunctionRegistry>) -> Self {
        Self {
            policy,
            max_workers: max_workers.max(1),
            registry,
            logical_rules: vec![
                Arc::new(LeftConjunctionRewrite),
                Arc::new(RightConjunctionRewrite),
                Arc::new(CountPushdown),
                Arc::new(DeferFetchOnScan),
                Arc::new(DeferFetchOnFetch),
            ],
            physical_rules: vec![Arc::new(BooleanIndexScan)],
            cache: PlanCache::default(),
            groups: GroupIdGenerator::new(),
        }
    }

    /// Replace the logical rule set.
    pub fn with_logical_rules(mut self, rules: Vec<Arc<dyn RewriteRule>>) -> Self {
        self.logical_rules = rules;
        self
    }

    /// The active cost policy.
    pub fn policy(&self) -> &CostPolicy {
        &self.policy
    }

    /// The planner's plan cache.
    pub fn cache(&self) -> &PlanCache {
        &self.cache
    }

    /// Plan a logical tree and select the best physical plan.
    ///
    /// `bypass_cache` forces a recompute even on a cache hit; `cache`
    /// controls whether the selected plan is stored.
    pub fn plan_and_select(
        &self,
        plan: &LogicalPlan,
        bypass_cache: bool,
        cache: bool,
    ) -> Result<Arc<PhysicalPlan>> {
        let digest = plan.digest();
        if !bypass_cache {
            if let Some(cached) = self.cache.get(digest) {
                trace!(digest, "plan cache hit");
                return Ok(cached);
            }
        }
        trace!(digest, "plan cache miss");

        let rewritten = self.rewrite(plan)?;
        let candidates = self.implement(&rewritten)?;
        let candidates = self.optimise_physical(candidates)?;
        let selected = self.select(candidates)?;
        let selected = match self.try_partition(&selected)? {
            Some(partitioned) => partitioned,
            None => selected,
        };
        selected.validate()?;

        let selected = Arc::new(selected);
        if cache {
            self.cache.put(digest, selected.clone());
        }
        Ok(selected)
    }

    /// Phase 1: drive all logical rules to a fixed point.
    pub fn rewrite(&self, plan: &LogicalPlan) -> Result<LogicalPlan> {
        let mut current = plan.clone();
        for _pass in 0..MAX_REWRITE_PASSES {
            let mut changed = false;
            for rule in &self.logical_rules {
                let next = Self::apply_rule_bottom_up(rule.as_ref(), &current)?;
                if let Some(next) = next {
                    debug!(rule = rule.name(), "rewrite rule applied");
                    current = next;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        Ok(current)
    }

    /// Apply one rule to a fixed point over the whole tree.
    pub fn apply_rule(&self, rule: &dyn RewriteRule, plan: &LogicalPlan) -> Result<LogicalPlan> {
        let mut current = plan.clone();
        for _pass in 0..MAX_REWRITE_PASSES {
            match Self::apply_rule_bottom_up(rule, &current)? {
                Some(next) => current = next,
                None => break,
            }
        }
        Ok(current)
    }

    /// One bottom-up pass of a rule; `None` when nothing changed.
    fn apply_rule_bottom_up(
        rule: &dyn RewriteRule,
        plan: &LogicalPlan,
    ) -> Result<Option<LogicalPlan>> {
        let children = plan.children();
        let mut rebuilt = Vec::with_capacity(children.len());
        let mut changed = false;
        for child in children {
            match Self::apply_rule_bottom_up(rule, child)? {
                Some(new_child) => {
                    rebuilt.push(new_child);
                    changed = true;
                }
                None => rebuilt.push(child.clone()),
            }
        }
        let current = if changed {
            plan.with_children(rebuilt)
        } else {
            plan.clone()
        };

        if rule.can_be_applied(&current) {
            if let Some(applied) = rule.apply(&current)? {
                if applied != current {
                    return Ok(Some(applied));
                }
            }
        }
        if changed {
            Ok(Some(current))
        } else {
            Ok(None)
        }
    }

    /// Phase 2: implement a logical tree into physical candidates.
    fn implement(&self, plan: &LogicalPlan) -> Result<Vec<PhysicalPlan>> {
        let mut candidates = match plan {
            LogicalPlan::EntityScan {
                group,
                entity,
                columns,
            } => vec![PhysicalPlan::EntityScan {
                group: *group,
                entity: entity.clone(),
                columns: columns.clone(),
                rows: entity.count()?,
                partition: None,
            }],
            LogicalPlan::EntitySample {
                group,
                entity,
                columns,
                probability,
                seed,
            } => vec![PhysicalPlan::EntitySample {
                group: *group,
                entity: entity.clone(),
                columns: columns.clone(),
                probability: *probability,
                seed: *seed,
                rows: entity.count()?,
                partition: None,
            }],
            LogicalPlan::IndexScan {
                group,
                index,
                predicate,
            } => vec![PhysicalPlan::IndexScan {
                group: *group,
                index: index.clone(),
                predicate: predicate.clone(),
                rows: index
                    .traits_for(predicate)
                    .limit()
                    .unwrap_or(DEFAULT_INDEX_ROWS),
                partition: None,
            }],
            LogicalPlan::CountEntity { group, entity, out } => {
                vec![PhysicalPlan::CountEntity {
                    group: *group,
                    entity: entity.clone(),
                    out: out.clone(),
                }]
            }
            LogicalPlan::Insert { group, entity, rows } => vec![PhysicalPlan::Insert {
                group: *group,
                entity: entity.clone(),
                rows: rows.clone(),
            }],
            LogicalPlan::Filter { input, predicate } => {
                let selectivity = self.selectivity(input, predicate);
                let mut all: Vec<PhysicalPlan> = self
                    .implement(input)?
                    .into_iter()
                    .map(|i| PhysicalPlan::Filter {
                        input: Arc::new(i),
                        predicate: predicate.clone(),
                        selectivity,
                    })
                    .collect();
                // Access-path branch: an index scan per qualifying index.
                all.extend(self.index_candidates(input, predicate, selectivity)?);
                all
            }
            LogicalPlan::FilterOnSubSelect {
                input,
                subqueries,
                predicate,
            } => {
                let selectivity = self.selectivity(input, predicate);
                let implemented_subqueries = subqueries
                    .iter()
                    .map(|s| {
                        self.implement(s)?
                            .into_iter()
                            .next()
                            .ok_or_else(|| QuiverError::plan("subquery yields no candidate"))
                            .map(Arc::new)
                    })
                    .collect::<Result<Vec<_>>>()?;
                self.implement(input)?
                    .into_iter()
                    .map(|i| PhysicalPlan::FilterOnSubSelect {
                        input: Arc::new(i),
                        subqueries: implemented_subqueries.clone(),
                        predicate: predicate.clone(),
                        selectivity,
                    })
                    .collect()
            }
            LogicalPlan::Function {
                input,
                signature,
                arguments,
                out,
            } => {
                let function = self.registry.obtain(signature)?;
                self.implement(input)?
                    .into_iter()
                    .map(|i| PhysicalPlan::Function {
                        input: Arc::new(i),
                        function: function.clone(),
                        arguments: arguments.clone(),
                        out: out.clone(),
                    })
                    .collect()
            }
            LogicalPlan::NestedFunction {
                input,
                signature,
                arguments,
                out,
            } => {
                let function = self.registry.obtain(signature)?;
                self.implement(input)?
                    .into_iter()
                    .map(|i| PhysicalPlan::NestedFunction {
                        input: Arc::new(i),
                        function: function.clone(),
                        arguments: arguments.clone(),
                        out: out.clone(),
                    })
                    .collect()
            }
            other => {
                // Structure-preserving unary operators.
                let input = other
                    .children()
                    .first()
                    .copied()
                    .ok_or_else(|| {
                        QuiverError::disconnected(format!("operator without input: {other}"))
                    })?;
                self.implement(input)?
                    .into_iter()
                    .map(|i| self.implement_unary(other, i))
                    .collect::<Result<Vec<_>>>()?
            }
        };
        candidates.truncate(MAX_CANDIDATES);
        Ok(candidates)
    }

    /// Implement a structure-preserving unary node over an implemented input.
    fn implement_unary(&self, plan: &LogicalPlan, input: PhysicalPlan) -> Result<PhysicalPlan> {
        let input = Arc::new(input);
        Ok(match plan {
            LogicalPlan::Fetch {
                entity, columns, ..
            } => PhysicalPlan::Fetch {
                input,
                entity: entity.clone(),
                columns: columns.clone(),
            },
            LogicalPlan::Select { fields, .. } => PhysicalPlan::Select {
                input,
                fields: fields.clone(),
            },
            LogicalPlan::SelectDistinct { fields, .. } => PhysicalPlan::SelectDistinct {
                input,
                fields: fields.clone(),
            },
            LogicalPlan::Count { out, .. } => PhysicalPlan::Count {
                input,
                out: out.clone(),
            },
            LogicalPlan::Exists { out, .. } => PhysicalPlan::Exists {
                input,
                out: out.clone(),
            },
            LogicalPlan::Aggregate {
                function, columns, ..
            } => PhysicalPlan::Aggregate {
                input,
                function: *function,
                columns: columns.clone(),
            },
            LogicalPlan::Limit { limit, .. } => PhysicalPlan::Limit {
                input,
                limit: *limit,
            },
            LogicalPlan::Skip { skip, .. } => PhysicalPlan::Skip {
                input,
                skip: *skip,
            },
            LogicalPlan::Sort { order, .. } => PhysicalPlan::Sort {
                input,
                order: order.clone(),
            },
            LogicalPlan::Update {
                entity, values, ..
            } => PhysicalPlan::Update {
                input,
                entity: entity.clone(),
                values: values.clone(),
            },
            LogicalPlan::Delete { entity, .. } => PhysicalPlan::Delete {
                input,
                entity: entity.clone(),
            },
            other => {
                return Err(QuiverError::internal(format!(
                    "operator cannot be implemented as unary: {other}"
                )))
            }
        })
    }

    /// Index-scan candidates for a filter above an entity scan.
    fn index_candidates(
        &self,
        input: &LogicalPlan,
        predicate: &crate::expr::BooleanPredicate,
        selectivity: Selectivity,
    ) -> Result<Vec<PhysicalPlan>> {
        let LogicalPlan::EntityScan {
            group,
            entity,
            columns,
        } = input
        else {
            return Ok(Vec::new());
        };
        let candidate_predicate = Predicate::Boolean(predicate.clone());
        let rows = entity.count()?;
        let mut candidates = Vec::new();
        for index in entity.indexes() {
            if !index.can_process(&candidate_predicate)
                || index.cost(&candidate_predicate).is_invalid()
            {
                continue;
            }
            let scan = PhysicalPlan::IndexScan {
                group: *group,
                index: index.clone(),
                predicate: candidate_predicate.clone(),
                rows: selectivity.apply(rows),
                partition: None,
            };
            let produced = index.columns_for(&candidate_predicate);
            let missing: Vec<ColumnDef> = columns
                .iter()
                .filter(|c| !produced.iter().any(|p| p.name.matches(&c.name)))
                .cloned()
                .collect();
            candidates.push(if missing.is_empty() {
                scan
            } else {
                PhysicalPlan::Fetch {
                    input: Arc::new(scan),
                    entity: entity.clone(),
                    columns: missing,
                }
            });
        }
        Ok(candidates)
    }

    /// Estimate the selectivity of a predicate over its source entity.
    fn selectivity(
        &self,
        input: &LogicalPlan,
        predicate: &crate::expr::BooleanPredicate,
    ) -> Selectivity {
        let Some(entity) = source_entity(input) else {
            return NaiveSelectivityCalculator::estimate(predicate, &HashMap::new());
        };
        let mut statistics: HashMap<ColumnDef, ValueStatistics> = HashMap::new();
        for column in predicate.columns() {
            if let Ok(stats) = entity.statistics(&column) {
                statistics.insert(column, stats);
            }
        }
        NaiveSelectivityCalculator::estimate(predicate, &statistics)
    }

    /// Phase 3: refine candidates through the physical rules.
    fn optimise_physical(&self, candidates: Vec<PhysicalPlan>) -> Result<Vec<PhysicalPlan>> {
        let mut all = candidates.clone();
        for candidate in candidates {
            let mut refined = candidate;
            let mut changed = false;
            for rule in &self.physical_rules {
                if let Some(next) =
                    Self::apply_physical_bottom_up(rule.as_ref(), &refined, &self.policy)?
                {
                    refined = next;
                    changed = true;
                }
            }
            if changed && !all.contains(&refined) {
                all.push(refined);
            }
        }
        all.truncate(MAX_CANDIDATES);
        Ok(all)
    }

    fn apply_physical_bottom_up(
        rule: &dyn PhysicalRewriteRule,
        plan: &PhysicalPlan,
        policy: &CostPolicy,
    ) -> Result<Option<PhysicalPlan>> {
        let children = plan.children();
        let mut rebuilt = Vec::with_capacity(children.len());
        let mut changed = false;
        for child in children {
            match Self::apply_physical_bottom_up(rule, child, policy)? {
                Some(new_child) => {
                    rebuilt.push(new_child);
                    changed = true;
                }
                None => rebuilt.push(child.clone()),
            }
        }
        let current = if changed {
            plan.with_children(rebuilt)
        } else {
            plan.clone()
        };
        if rule.can_be_applied(&current) {
            if let Some(applied) = rule.apply(&current, policy)? {
                debug!(rule = rule.name(), "physical rule applied");
                return Ok(Some(applied));
            }
        }
        if changed {
            Ok(Some(current))
        } else {
            Ok(None)
        }
    }

    /// Select the minimum-score executable candidate.
    fn select(&self, candidates: Vec<PhysicalPlan>) -> Result<PhysicalPlan> {
        let mut best: Option<(f32, PhysicalPlan)> = None;
        for candidate in candidates {
            if candidate.validate().is_err() {
                continue;
            }
            let cost = candidate.total_cost(&self.policy);
            if cost.is_invalid() {
                continue;
            }
            let score = self.policy.to_score(&cost);
            match &best {
                Some((s, _)) if *s <= score => {}
                _ => best = Some((score, candidate)),
            }
        }
        best.map(|(score, plan)| {
            debug!(score, "selected physical plan");
            plan
        })
        .ok_or_else(|| QuiverError::plan("no executable physical candidate"))
    }

    /// Partition the topmost partitionable subtree, if the policy pays for
    /// more than one worker.
    fn try_partition(&self, plan: &PhysicalPlan) -> Result<Option<PhysicalPlan>> {
        if !plan.traits().not_partitionable() {
            let total = plan.total_cost(&self.policy);
            let parallelisable = plan.parallelisable_cost(&self.policy);
            let p = self
                .policy
                .parallelisation(&parallelisable, &total, self.max_workers);
            if p <= 1 {
                return Ok(None);
            }
            let partitions = (0..p)
                .map(|i| plan.partition(p, i, &self.groups).map(Arc::new))
                .collect::<Result<Vec<_>>>();
            let Ok(inputs) = partitions else {
                return Ok(None);
            };
            let traits = plan.traits();
            debug!(workers = p, "partitioning subtree");
            let merged = match (traits.limit(), traits.order()) {
                (Some(limit), Some(order)) => PhysicalPlan::MergeLimitingSort {
                    inputs,
                    order: order.clone(),
                    limit,
                },
                (Some(limit), None) => PhysicalPlan::Limit {
                    input: Arc::new(PhysicalPlan::Merge {
                        inputs,
                        order: None,
                    }),
                    limit,
                },
                (None, Some(order)) => PhysicalPlan::Merge {
                    inputs,
                    order: Some(order.clone()),
                },
                (None, None) => PhysicalPlan::Merge {
                    inputs,
                    order: None,
                },
            };
            return Ok(Some(merged));
        }

        // The node itself blocks partitioning; try below.
        let children = plan.children();
        let mut rebuilt = Vec::with_capacity(children.len());
        let mut changed = false;
        for child in children {
            match self.try_partition(child)? {
                Some(partitioned) => {
                    rebuilt.push(partitioned);
                    changed = true;
                }
                None => rebuilt.push(child.clone()),
            }
        }
        if changed {
            Ok(Some(plan.with_children(rebuilt)))
        } else {
            Ok(None)
        }
    }
}

/// The entity scanned at the source of a unary chain, if any.
fn source_entity(plan: &LogicalPlan) -> Option<Arc<dyn Entity>> {
    match plan {
        LogicalPlan::EntityScan { entity, .. }
        | LogicalPlan::EntitySample { entity, .. } => Some(entity.clone()),
        LogicalPlan::IndexScan { .. } => None,
        other => other.children().first().and_then(|c| source_entity(c)),
    }
}
