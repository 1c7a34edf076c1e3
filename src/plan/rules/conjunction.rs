//! Conjunction-splitting rewrites.
//!
//! Splitting `Filter(A ∧ B)` into two stacked filters lets each conjunct be
//! pushed down or matched against an index independently. The two rules
//! produce the two possible orderings.

use std::sync::Arc;

use super::RewriteRule;
use crate::error::Result;
use crate::expr::BooleanPredicate;
use crate::plan::logical::LogicalPlan;

fn split(
    plan: &LogicalPlan,
    inner_first: bool,
) -> Option<LogicalPlan> {
    let LogicalPlan::Filter { input, predicate } = plan else {
        return None;
    };
    let BooleanPredicate::Conjunction(left, right) = predicate else {
        return None;
    };
    let (inner, outer) = if inner_first {
        (left, right)
    } else {
        (right, left)
    };
    Some(LogicalPlan::Filter {
        input: Arc::new(LogicalPlan::Filter {
            input: input.clone(),
            predicate: inner.as_ref().clone(),
        }),
        predicate: outer.as_ref().clone(),
    })
}

/// Split `Filter(A ∧ B)` into `Filter(B)` over `Filter(A)`: the left
/// conjunct is applied closer to the source.
pub struct LeftConjunctionRewrite;

impl RewriteRule for LeftConjunctionRewrite {
    fn name(&self) -> &'static str {
        "LeftConjunctionRewrite"
    }

    fn can_be_applied(&self, plan: &LogicalPlan) -> bool {
        matches!(
            plan,
            LogicalPlan::Filter {
                predicate: BooleanPredicate::Conjunction(..),
                ..
            }
        )
    }

    fn apply(&self, plan: &LogicalPlan) -> Result<Option<LogicalPlan>> {
        Ok(split(plan, true))
    }
}

/// Split `Filter(A ∧ B)` into `Filter(A)` over `Filter(B)`: the right
/// conjunct is applied closer to the source.
pub struct RightConjunctionRewrite;

impl RewriteRule for RightConjunctionRewrite {
    fn name(&self) -> &'static str {
        "RightConjunctionRewrite"
    }

    fn can_be_applied(&self, plan: &LogicalPlan) -> bool {
        LeftConjunctionRewrite.can_be_applied(plan)
    }

    fn apply(&self, plan: &LogicalPlan) -> Result<Option<LogicalPlan>> {
        Ok(split(plan, false))
    }
}
