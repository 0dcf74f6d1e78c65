//! Opportunity model: an immutable snapshot of one curatable subgraph deployment.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::optimizer::OptimizerError;

/// A curation opportunity captured at evaluation time.
///
/// Constructed fresh each cycle from network data and never mutated;
/// the next cycle's snapshot supersedes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    /// Deployment IPFS hash
    pub id: String,

    /// Signal we have already minted on this deployment, in GRT
    pub current_stake: Decimal,

    /// Total signal minted by all curators, in GRT
    pub pool_total: Decimal,

    /// Annualized query-fee revenue attributable to the deployment, in USD
    pub period_revenue: Decimal,

    /// Share of query fees distributable to curators (protocol constant)
    pub revenue_share_rate: Decimal,

    /// Weekly query volume backing the revenue figure
    pub weekly_queries: u64,
}

impl Opportunity {
    /// Build a validated snapshot. Quantities must be non-negative, the
    /// share rate must lie in [0, 1], and our stake cannot exceed the pool.
    pub fn new(
        id: impl Into<String>,
        current_stake: Decimal,
        pool_total: Decimal,
        period_revenue: Decimal,
        revenue_share_rate: Decimal,
        weekly_queries: u64,
    ) -> Result<Self, OptimizerError> {
        let id = id.into();
        if id.is_empty() {
            return Err(OptimizerError::EmptyId);
        }
        if current_stake < Decimal::ZERO {
            return Err(OptimizerError::NegativeQuantity {
                field: "current_stake",
            });
        }
        if pool_total < Decimal::ZERO {
            return Err(OptimizerError::NegativeQuantity { field: "pool_total" });
        }
        if period_revenue < Decimal::ZERO {
            return Err(OptimizerError::NegativeQuantity {
                field: "period_revenue",
            });
        }
        if revenue_share_rate < Decimal::ZERO || revenue_share_rate > Decimal::ONE {
            return Err(OptimizerError::ShareOutOfRange {
                share: revenue_share_rate,
            });
        }
        if current_stake > pool_total {
            return Err(OptimizerError::StakeExceedsPool { id });
        }

        Ok(Self {
            id,
            current_stake,
            pool_total,
            period_revenue,
            revenue_share_rate,
            weekly_queries,
        })
    }

    /// Fraction of the pool our stake owns (0 when the pool is empty).
    pub fn owned_fraction(&self) -> Decimal {
        if self.pool_total.is_zero() {
            Decimal::ZERO
        } else {
            self.current_stake / self.pool_total
        }
    }

    /// Revenue distributable to curators, in USD per year.
    pub fn distributable(&self) -> Decimal {
        self.period_revenue * self.revenue_share_rate
    }

    /// Whether signaling here would open a fresh position.
    pub fn is_new_position(&self) -> bool {
        self.current_stake.is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_valid_construction() {
        let opp = Opportunity::new("Qm123", dec!(100), dec!(500), dec!(2000), dec!(0.10), 5000)
            .expect("valid opportunity");

        assert_eq!(opp.owned_fraction(), dec!(0.2));
        assert_eq!(opp.distributable(), dec!(200));
        assert!(!opp.is_new_position());
    }

    #[test]
    fn test_empty_pool_owns_nothing() {
        let opp = Opportunity::new("Qm123", dec!(0), dec!(0), dec!(2000), dec!(0.10), 5000)
            .expect("valid opportunity");

        assert_eq!(opp.owned_fraction(), Decimal::ZERO);
        assert!(opp.is_new_position());
    }

    #[test]
    fn test_stake_exceeding_pool_rejected() {
        let err = Opportunity::new("Qm123", dec!(600), dec!(500), dec!(2000), dec!(0.10), 5000)
            .unwrap_err();

        assert_eq!(
            err,
            OptimizerError::StakeExceedsPool {
                id: "Qm123".to_string()
            }
        );
    }

    #[test]
    fn test_negative_revenue_rejected() {
        let err = Opportunity::new("Qm123", dec!(0), dec!(500), dec!(-1), dec!(0.10), 5000)
            .unwrap_err();

        assert!(matches!(
            err,
            OptimizerError::NegativeQuantity {
                field: "period_revenue"
            }
        ));
    }

    #[test]
    fn test_share_rate_bounds() {
        assert!(Opportunity::new("Qm123", dec!(0), dec!(500), dec!(100), dec!(1.5), 0).is_err());
        assert!(Opportunity::new("Qm123", dec!(0), dec!(500), dec!(100), dec!(1.0), 0).is_ok());
    }
}
