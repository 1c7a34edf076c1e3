//! Cost policy: weights, unit costs and the parallelisation estimator.

use super::Cost;

/// Weights and unit costs that turn [`Cost`] vectors into comparable scores
/// and drive the intra-query parallelisation decision.
///
/// The reference unit costs (disk access, memory access, one floating-point
/// operation) are inputs of the policy, not constants of the engine; callers
/// tune them to the deployment.
#[derive(Debug, Clone)]
pub struct CostPolicy {
    /// Weight of the I/O component
    pub wio: f32,
    /// Weight of the CPU component
    pub wcpu: f32,
    /// Weight of the memory component
    pub wmemory: f32,
    /// Weight of the accuracy component
    pub waccuracy: f32,
    /// Minimum marginal speedup a further worker must contribute
    pub speedup_per_worker: f32,
    /// Fraction of I/O cost that cannot be parallelised
    pub non_parallelisable_io: f32,
    /// Unit cost of one random disk read
    pub disk_access_read: f32,
    /// Unit cost of one random disk write
    pub disk_access_write: f32,
    /// Unit cost of one memory access
    pub memory_access: f32,
    /// Unit cost of one floating-point operation
    pub flop: f32,
}

impl Default for CostPolicy {
    fn default() -> Self {
        Self {
            wio: 0.6,
            wcpu: 0.3,
            wmemory: 0.05,
            waccuracy: 0.05,
            speedup_per_worker: 0.1,
            non_parallelisable_io: 0.25,
            disk_access_read: 1.0e-5,
            disk_access_write: 5.0e-5,
            memory_access: 1.0e-8,
            flop: 1.0e-9,
        }
    }
}

impl CostPolicy {
    /// Collapse a cost vector to a scalar score.
    ///
    /// Invalid costs score to `NaN`, which loses every comparison and so
    /// rejects the plan.
    pub fn to_score(&self, cost: &Cost) -> f32 {
        self.wio * cost.io
            + self.wcpu * cost.cpu
            + self.wmemory * cost.memory
            + self.waccuracy * cost.accuracy
    }

    /// Estimate the optimal number of workers for a plan.
    ///
    /// `parallelisable` is the portion of `total` that partitioning can
    /// spread over workers. The estimate follows Amdahl's law with a fixed
    /// coordination overhead of 1% of the parallelisable cost, and walks
    /// `p = 2..=max_workers` as long as each additional worker still
    /// contributes at least `speedup_per_worker` of marginal speedup.
    pub fn parallelisation(
        &self,
        parallelisable: &Cost,
        total: &Cost,
        max_workers: usize,
    ) -> usize {
        if parallelisable.cpu < 1.0 || max_workers <= 2 {
            return 1;
        }

        let total_score = self.to_score(total);
        if !total_score.is_finite() || total_score <= 0.0 {
            return 1;
        }

        // Only the non-serial fraction of parallelisable I/O spreads.
        let spread = Cost {
            io: parallelisable.io * (1.0 - self.non_parallelisable_io),
            ..*parallelisable
        };
        let parallel_score = self.to_score(&spread).min(total_score);
        let serial_score = total_score - parallel_score;
        let overhead = 0.01 * parallel_score;

        let speedup = |p: usize| total_score / (serial_score + parallel_score / p as f32 + overhead);

        let mut best = 1;
        let mut previous = 1.0f32;
        for p in 2..=max_workers {
            let current = speedup(p);
            if current - previous < self.speedup_per_worker {
                break;
            }
            best = p;
            previous = current;
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_is_weighted_sum() {
        let policy = CostPolicy {
            wio: 1.0,
            wcpu: 1.0,
            wmemory: 1.0,
            waccuracy: 1.0,
            ..CostPolicy::default()
        };
        let score = policy.to_score(&Cost::new(1.0, 2.0, 3.0, 4.0));
        assert!((score - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_cost_scores_nan() {
        let policy = CostPolicy::default();
        assert!(policy.to_score(&Cost::INVALID).is_nan());
    }

    #[test]
    fn test_no_parallelisation_below_thresholds() {
        let policy = CostPolicy::default();
        let tiny = Cost::cpu(0.5);
        assert_eq!(policy.parallelisation(&tiny, &tiny, 16), 1);

        let big = Cost::cpu(1.0e9);
        assert_eq!(policy.parallelisation(&big, &big, 2), 1);
    }

    #[test]
    fn test_fully_parallel_work_uses_many_workers() {
        let policy = CostPolicy::default();
        let work = Cost::cpu(1.0e9);
        let p = policy.parallelisation(&work, &work, 16);
        assert!(p > 1, "expected parallelisation, got {p}");
    }

    #[test]
    fn test_serial_tail_limits_workers() {
        let policy = CostPolicy::default();
        let total = Cost::cpu(1.0e9);
        let parallelisable = Cost::cpu(1.0e8);
        let few = policy.parallelisation(&parallelisable, &total, 16);
        let many = policy.parallelisation(&total, &total, 16);
        assert!(few <= many);
    }
}
