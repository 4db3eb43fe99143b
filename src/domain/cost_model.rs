//! Cost Model
//!
//! Compute-unit pricing of provider calls. A batched call over `n` tokens is
//! priced sub-linearly: `ceil(n^0.8 * base_cost)`. Costs are integral, so a
//! batch never costs more than the equivalent individual calls.

use serde::{Deserialize, Serialize};

/// Default batch scaling exponent
pub const DEFAULT_BATCH_EXPONENT: f64 = 0.8;

/// Pure pricing function for individual and batched provider calls
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    exponent: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            exponent: DEFAULT_BATCH_EXPONENT,
        }
    }
}

impl CostModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cost of one non-batched call
    pub fn individual_cost(&self, base_cost: u64) -> u64 {
        base_cost
    }

    /// Cost of one batched call covering `n` tokens
    pub fn batch_cost(&self, base_cost: u64, n: usize) -> u64 {
        if n == 0 || base_cost == 0 {
            return 0;
        }
        let scaled = (n as f64).powf(self.exponent) * base_cost as f64;
        // Guard against float error pushing past the linear price
        (scaled.ceil() as u64).min(base_cost.saturating_mul(n as u64))
    }

    /// Units saved by batching `n` tokens instead of `n` individual calls
    pub fn savings(&self, n: usize, base_cost: u64) -> u64 {
        self.individual_cost(base_cost)
            .saturating_mul(n as u64)
            .saturating_sub(self.batch_cost(base_cost, n))
    }

    /// Savings as a percentage of the individual price
    pub fn savings_pct(&self, n: usize, base_cost: u64) -> f64 {
        let individual = self.individual_cost(base_cost).saturating_mul(n as u64);
        if individual == 0 {
            return 0.0;
        }
        self.savings(n, base_cost) as f64 / individual as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_individual_cost_is_base() {
        let model = CostModel::new();
        assert_eq!(model.individual_cost(7), 7);
    }

    #[test]
    fn test_batch_cost_known_values() {
        let model = CostModel::new();
        assert_eq!(model.batch_cost(10, 0), 0);
        assert_eq!(model.batch_cost(10, 1), 10);
        // 10^0.8 = 6.3096 -> 63.096 -> 64
        assert_eq!(model.batch_cost(10, 10), 64);
        // 100^0.8 = 39.81 -> 39.81 -> 40
        assert_eq!(model.batch_cost(1, 100), 40);
    }

    #[test]
    fn test_batch_cost_monotonic_and_bounded() {
        let model = CostModel::new();
        for base in [1u64, 3, 10, 60, 250] {
            let mut previous = 0;
            for n in 1..=500usize {
                let cost = model.batch_cost(base, n);
                assert!(cost >= previous, "not monotonic at base={} n={}", base, n);
                assert!(cost <= base * n as u64, "above linear at base={} n={}", base, n);
                previous = cost;
            }
        }
    }

    #[test]
    fn test_savings() {
        let model = CostModel::new();
        assert_eq!(model.savings(1, 10), 0);
        assert_eq!(model.savings(10, 10), 100 - 64);
        assert!(model.savings_pct(100, 10) > 50.0);
        assert_eq!(model.savings_pct(0, 10), 0.0);
    }
}
