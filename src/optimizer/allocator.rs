//! Greedy budget allocator.
//!
//! Iteratively commits signal to whichever deployment offers the highest
//! post-dilution return rate for the next increment, under a per-position
//! floor and a concentration cap. The step size halves when no deployment
//! can absorb a full step, refining the split near the end of the budget.

use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use super::returns::ReturnModel;
use super::OptimizerError;
use crate::models::Opportunity;

/// Allocator parameters.
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    /// Floor for any retained assignment, in GRT
    pub min_allocation: Decimal,

    /// Maximum fraction of the budget placed on a single deployment
    pub max_concentration: Decimal,

    /// Initial increment per iteration; `min_allocation` when unset
    pub step_size: Option<Decimal>,

    /// Safety bound on allocation iterations
    pub max_iterations: usize,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            min_allocation: dec!(100),   // 100 GRT floor per position
            max_concentration: dec!(0.25), // Max 25% of budget per deployment
            step_size: None,
            max_iterations: 10_000,
        }
    }
}

/// Allocator state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocatorState {
    /// Looking for the first placeable increment
    Seeking,
    /// At least one increment committed, budget remains
    Allocating,
    /// Remaining budget fell below the floor (or the iteration bound was hit)
    Converged,
    /// Budget remains but no deployment has headroom for the floor
    Exhausted,
}

/// Allocation produced for one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationPlan {
    /// GRT assigned per deployment; every retained value is at least the floor
    pub assignments: BTreeMap<String, Decimal>,

    /// Budget the plan was built against
    pub total_budget: Decimal,

    /// Budget left unassigned
    pub unspent: Decimal,

    /// Terminal allocator state (`Converged` or `Exhausted`)
    pub state: AllocatorState,
}

impl AllocationPlan {
    /// Total GRT assigned.
    pub fn allocated(&self) -> Decimal {
        self.assignments.values().copied().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}

/// Distributes a GRT budget across opportunities by marginal return rate.
pub struct BudgetAllocator {
    config: AllocatorConfig,
    model: ReturnModel,
}

impl BudgetAllocator {
    pub fn new(config: AllocatorConfig, model: ReturnModel) -> Self {
        Self { config, model }
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Allocate `total_budget` GRT across `opportunities`.
    ///
    /// Deterministic: equal marginal rates break toward the opportunity
    /// appearing first in input order, so identical inputs always produce
    /// identical plans. An `Exhausted` plan is valid and leaves part of the
    /// budget unassigned.
    pub fn allocate(
        &self,
        opportunities: &[Opportunity],
        total_budget: Decimal,
        unit_price: Decimal,
    ) -> Result<AllocationPlan, OptimizerError> {
        if total_budget < Decimal::ZERO {
            return Err(OptimizerError::NegativeQuantity {
                field: "total_budget",
            });
        }

        let mut seen = BTreeSet::new();
        for opp in opportunities {
            if !seen.insert(opp.id.as_str()) {
                return Err(OptimizerError::DuplicateId {
                    id: opp.id.clone(),
                });
            }
        }

        if opportunities.is_empty() {
            return Ok(AllocationPlan {
                assignments: BTreeMap::new(),
                total_budget,
                unspent: total_budget,
                state: AllocatorState::Converged,
            });
        }

        if total_budget < self.config.min_allocation {
            return Err(OptimizerError::BudgetBelowMinimum {
                budget: total_budget,
                min_allocation: self.config.min_allocation,
            });
        }

        let cap = total_budget * self.config.max_concentration;
        let mut step = self
            .config
            .step_size
            .unwrap_or(self.config.min_allocation)
            .max(self.config.min_allocation);

        let mut allocations = vec![Decimal::ZERO; opportunities.len()];
        let mut remaining = total_budget;
        let mut state = AllocatorState::Seeking;
        let mut iterations = 0usize;

        loop {
            if remaining < self.config.min_allocation {
                state = AllocatorState::Converged;
                break;
            }
            if iterations >= self.config.max_iterations {
                state = AllocatorState::Converged;
                break;
            }
            iterations += 1;

            // Pick the deployment with the best post-dilution rate for the
            // next increment, among those with headroom for the floor.
            let mut best: Option<(usize, Decimal)> = None;
            let mut best_rate = f64::NEG_INFINITY;
            let mut any_headroom = false;
            let mut full_step_possible = false;

            for (i, opp) in opportunities.iter().enumerate() {
                let headroom = cap - allocations[i];
                if headroom < self.config.min_allocation {
                    continue;
                }
                any_headroom = true;
                if headroom >= step && remaining >= step {
                    full_step_possible = true;
                }

                let increment = step.min(headroom).min(remaining);
                // Marginal rate accounts for capital already assigned here
                // this run: dilution is cumulative.
                let rate = self
                    .model
                    .evaluate_with_addition(opp, allocations[i] + increment, unit_price)
                    .return_rate;

                if rate > best_rate {
                    best_rate = rate;
                    best = Some((i, increment));
                }
            }

            if !any_headroom {
                state = AllocatorState::Exhausted;
                break;
            }

            if !full_step_possible && step > self.config.min_allocation {
                // Nobody can absorb a full step: refine the increment.
                step = (step / dec!(2)).max(self.config.min_allocation);
                continue;
            }

            match best {
                Some((idx, increment)) => {
                    allocations[idx] += increment;
                    remaining -= increment;
                    if state == AllocatorState::Seeking {
                        state = AllocatorState::Allocating;
                    }
                    debug!(
                        deployment = %opportunities[idx].id,
                        increment = %increment,
                        rate = best_rate,
                        remaining = %remaining,
                        "Committed increment"
                    );
                }
                None => {
                    state = AllocatorState::Exhausted;
                    break;
                }
            }
        }

        // Drop sub-floor assignments rather than keeping zeroed entries.
        let assignments: BTreeMap<String, Decimal> = opportunities
            .iter()
            .zip(&allocations)
            .filter(|(_, amount)| **amount >= self.config.min_allocation)
            .map(|(opp, amount)| (opp.id.clone(), *amount))
            .collect();

        let allocated: Decimal = assignments.values().copied().sum();

        Ok(AllocationPlan {
            assignments,
            total_budget,
            unspent: total_budget - allocated,
            state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn opp(id: &str, stake: Decimal, pool: Decimal, revenue: Decimal) -> Opportunity {
        Opportunity::new(id, stake, pool, revenue, dec!(0.10), 10_000).unwrap()
    }

    fn allocator(min: Decimal, max_concentration: Decimal) -> BudgetAllocator {
        BudgetAllocator::new(
            AllocatorConfig {
                min_allocation: min,
                max_concentration,
                step_size: None,
                max_iterations: 10_000,
            },
            ReturnModel::default(),
        )
    }

    #[test]
    fn test_greedy_follows_highest_marginal_rate() {
        // A owns its whole pool: marginal rate 100/(100+a), which stays
        // above 0.5 for the entire budget. B's best possible marginal rate
        // is 20/(50+10) - 0.005 ~= 0.328, so every increment must go to A.
        let opportunities = vec![
            opp("A", dec!(100), dec!(100), dec!(1000)),
            opp("B", dec!(0), dec!(50), dec!(200)),
        ];

        let plan = allocator(dec!(10), dec!(1.0))
            .allocate(&opportunities, dec!(100), dec!(1))
            .unwrap();

        assert_eq!(plan.assignments.len(), 1);
        assert_eq!(plan.assignments["A"], dec!(100));
        assert_eq!(plan.state, AllocatorState::Converged);
        assert_eq!(plan.unspent, Decimal::ZERO);
    }

    #[test]
    fn test_marginal_rates_cross_and_budget_splits() {
        // With a much larger budget, A dilutes below B's entry rate and the
        // remainder flows to B.
        let opportunities = vec![
            opp("A", dec!(100), dec!(100), dec!(1000)),
            opp("B", dec!(0), dec!(50), dec!(200)),
        ];

        let plan = allocator(dec!(10), dec!(1.0))
            .allocate(&opportunities, dec!(1000), dec!(1))
            .unwrap();

        assert!(plan.assignments["A"] > plan.assignments["B"]);
        assert!(plan.assignments["B"] >= dec!(10));
        assert_eq!(plan.allocated(), dec!(1000));
    }

    #[test]
    fn test_plan_invariants() {
        let opportunities = vec![
            opp("A", dec!(148), dec!(167), dec!(2031)),
            opp("B", dec!(159), dec!(605), dec!(2990)),
            opp("C", dec!(248), dec!(254), dec!(936)),
            opp("D", dec!(496), dec!(501), dec!(1700)),
        ];

        let budget = dec!(5000);
        let config = AllocatorConfig::default();
        let cap = budget * config.max_concentration;
        let plan = BudgetAllocator::new(config, ReturnModel::default())
            .allocate(&opportunities, budget, dec!(0.12))
            .unwrap();

        assert!(plan.allocated() <= budget);
        for amount in plan.assignments.values() {
            assert!(*amount >= dec!(100));
            assert!(*amount <= cap);
        }
        assert_eq!(plan.unspent, budget - plan.allocated());
    }

    #[test]
    fn test_idempotent() {
        let opportunities = vec![
            opp("A", dec!(148), dec!(167), dec!(2031)),
            opp("B", dec!(159), dec!(605), dec!(2990)),
            opp("C", dec!(248), dec!(254), dec!(936)),
        ];

        let alloc = allocator(dec!(100), dec!(0.5));
        let first = alloc.allocate(&opportunities, dec!(3000), dec!(0.12)).unwrap();
        let second = alloc.allocate(&opportunities, dec!(3000), dec!(0.12)).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_tie_breaks_to_first_in_input_order() {
        // Identical opportunities and budget for a single step: the first
        // in input order must win, even though "alpha" sorts before "zeta".
        let opportunities = vec![
            opp("zeta", dec!(100), dec!(200), dec!(1000)),
            opp("alpha", dec!(100), dec!(200), dec!(1000)),
        ];

        let plan = allocator(dec!(100), dec!(1.0))
            .allocate(&opportunities, dec!(100), dec!(1))
            .unwrap();

        assert_eq!(plan.assignments["zeta"], dec!(100));
        assert!(!plan.assignments.contains_key("alpha"));
    }

    #[test]
    fn test_budget_below_minimum_is_invalid_input() {
        let opportunities = vec![opp("A", dec!(100), dec!(100), dec!(1000))];

        let err = allocator(dec!(100), dec!(1.0))
            .allocate(&opportunities, dec!(50), dec!(1))
            .unwrap_err();

        assert_eq!(
            err,
            OptimizerError::BudgetBelowMinimum {
                budget: dec!(50),
                min_allocation: dec!(100),
            }
        );
    }

    #[test]
    fn test_no_opportunities_yields_empty_converged_plan() {
        let plan = allocator(dec!(100), dec!(1.0))
            .allocate(&[], dec!(50), dec!(1))
            .unwrap();

        assert!(plan.is_empty());
        assert_eq!(plan.state, AllocatorState::Converged);
        assert_eq!(plan.unspent, dec!(50));
    }

    #[test]
    fn test_exhausted_when_caps_block_placement() {
        // Cap of 5% of a 1000 GRT budget is 50 GRT, below the 100 GRT
        // floor: nothing can be placed anywhere.
        let opportunities = vec![
            opp("A", dec!(100), dec!(100), dec!(1000)),
            opp("B", dec!(0), dec!(50), dec!(200)),
        ];

        let plan = allocator(dec!(100), dec!(0.05))
            .allocate(&opportunities, dec!(1000), dec!(1))
            .unwrap();

        assert!(plan.is_empty());
        assert_eq!(plan.state, AllocatorState::Exhausted);
        assert_eq!(plan.unspent, dec!(1000));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let opportunities = vec![
            opp("A", dec!(100), dec!(100), dec!(1000)),
            opp("A", dec!(0), dec!(50), dec!(200)),
        ];

        let err = allocator(dec!(10), dec!(1.0))
            .allocate(&opportunities, dec!(100), dec!(1))
            .unwrap_err();

        assert_eq!(err, OptimizerError::DuplicateId { id: "A".to_string() });
    }
}
