//! Cost model driving plan selection and parallelisation.

mod policy;

pub use policy::CostPolicy;

use std::fmt;
use std::ops::{Add, AddAssign, Mul};

/// A multi-dimensional cost estimate.
///
/// Costs form a vector space over `(io, cpu, memory, accuracy)`: they can be
/// added and scaled, and a [`CostPolicy`] collapses them to a scalar score
/// for comparison. `accuracy` expresses the expected loss of result quality
/// (0 = exact) rather than a resource expense.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cost {
    pub io: f32,
    pub cpu: f32,
    pub memory: f32,
    pub accuracy: f32,
}

impl Cost {
    /// The zero cost.
    pub const ZERO: Cost = Cost {
        io: 0.0,
        cpu: 0.0,
        memory: 0.0,
        accuracy: 0.0,
    };

    /// A cost that rejects the plan carrying it.
    pub const INVALID: Cost = Cost {
        io: f32::NAN,
        cpu: f32::NAN,
        memory: f32::NAN,
        accuracy: f32::NAN,
    };

    pub fn new(io: f32, cpu: f32, memory: f32, accuracy: f32) -> Self {
        Self {
            io,
            cpu,
            memory,
            accuracy,
        }
    }

    /// A cost with only an I/O component.
    pub fn io(io: f32) -> Self {
        Self {
            io,
            ..Cost::ZERO
        }
    }

    /// A cost with only a CPU component.
    pub fn cpu(cpu: f32) -> Self {
        Self {
            cpu,
            ..Cost::ZERO
        }
    }

    /// A cost with only a memory component.
    pub fn memory(memory: f32) -> Self {
        Self {
            memory,
            ..Cost::ZERO
        }
    }

    /// Whether this cost rejects its plan.
    pub fn is_invalid(&self) -> bool {
        self.io.is_nan() || self.cpu.is_nan() || self.memory.is_nan() || self.accuracy.is_nan()
    }
}

impl Default for Cost {
    fn default() -> Self {
        Cost::ZERO
    }
}

impl Add for Cost {
    type Output = Cost;

    fn add(self, other: Cost) -> Cost {
        Cost {
            io: self.io + other.io,
            cpu: self.cpu + other.cpu,
            memory: self.memory + other.memory,
            accuracy: self.accuracy + other.accuracy,
        }
    }
}

impl AddAssign for Cost {
    fn add_assign(&mut self, other: Cost) {
        *self = *self + other;
    }
}

impl Mul<f32> for Cost {
    type Output = Cost;

    fn mul(self, factor: f32) -> Cost {
        Cost {
            io: self.io * factor,
            cpu: self.cpu * factor,
            memory: self.memory * factor,
            accuracy: self.accuracy * factor,
        }
    }
}

impl fmt::Display for Cost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(io={:.2}, cpu={:.2}, memory={:.2}, accuracy={:.4})",
            self.io, self.cpu, self.memory, self.accuracy
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_addition() {
        let sum = Cost::new(1.0, 2.0, 3.0, 0.0) + Cost::new(0.5, 1.5, 2.5, 0.1);
        assert!((sum.io - 1.5).abs() < 1e-6);
        assert!((sum.cpu - 3.5).abs() < 1e-6);
        assert!((sum.memory - 5.5).abs() < 1e-6);
        assert!((sum.accuracy - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_cost_scaling() {
        let scaled = Cost::new(1.0, 2.0, 4.0, 0.0) * 0.5;
        assert!((scaled.cpu - 1.0).abs() < 1e-6);
        assert!((scaled.memory - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_propagates() {
        assert!(Cost::INVALID.is_invalid());
        assert!((Cost::INVALID + Cost::ZERO).is_invalid());
        assert!(!Cost::ZERO.is_invalid());
    }
}
