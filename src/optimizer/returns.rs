//! Return model: converts a deployment's stake, pool, and query-fee revenue
//! into an annualized return rate, with a dilution law for added capital.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::models::Opportunity;

/// Entry cost deducted from a freshly opened position's return rate,
/// covering the bonding-curve tax charged when minting on a new deployment.
pub const DEFAULT_ENTRY_COST: f64 = 0.005;

/// Result of evaluating one opportunity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReturnEstimate {
    /// Query-fee revenue distributable to curators, USD per year
    pub distributable: Decimal,

    /// Share of the distributable revenue earned by this stake, USD per year
    pub estimated_return: Decimal,

    /// Annualized return on the stake's USD value (0.15 = 15% APR)
    pub return_rate: f64,
}

/// Pure calculator for curation returns.
#[derive(Debug, Clone, Copy)]
pub struct ReturnModel {
    entry_cost: f64,
}

impl ReturnModel {
    pub fn new(entry_cost: f64) -> Self {
        Self { entry_cost }
    }

    /// Evaluate a position's return.
    ///
    /// Total over non-negative inputs: an empty pool owns nothing, and a
    /// stake with zero USD value earns a zero rate. Opening a new position
    /// pays the entry cost as a flat deduction from the rate.
    pub fn evaluate(
        &self,
        current_stake: Decimal,
        pool_total: Decimal,
        period_revenue: Decimal,
        revenue_share_rate: Decimal,
        unit_price: Decimal,
        is_new_position: bool,
    ) -> ReturnEstimate {
        let distributable = period_revenue * revenue_share_rate;

        let owned_fraction = if pool_total.is_zero() {
            Decimal::ZERO
        } else {
            current_stake / pool_total
        };

        let estimated_return = distributable * owned_fraction;

        let stake_value = current_stake * unit_price;
        let mut return_rate = if stake_value > Decimal::ZERO {
            (estimated_return / stake_value).to_f64().unwrap_or(0.0)
        } else {
            0.0
        };

        if is_new_position {
            return_rate -= self.entry_cost;
        }

        ReturnEstimate {
            distributable,
            estimated_return,
            return_rate,
        }
    }

    /// Evaluate the return rate after minting `additional` GRT of signal.
    ///
    /// The added signal joins both our stake and the pool, so every
    /// increment dilutes all curators including us. The marginal rate is
    /// strictly decreasing in `additional` and tends to zero as the
    /// addition dwarfs the deployment's revenue.
    pub fn evaluate_with_addition(
        &self,
        opportunity: &Opportunity,
        additional: Decimal,
        unit_price: Decimal,
    ) -> ReturnEstimate {
        self.evaluate(
            opportunity.current_stake + additional,
            opportunity.pool_total + additional,
            opportunity.period_revenue,
            opportunity.revenue_share_rate,
            unit_price,
            opportunity.is_new_position(),
        )
    }
}

impl Default for ReturnModel {
    fn default() -> Self {
        Self::new(DEFAULT_ENTRY_COST)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn opportunity(stake: Decimal, pool: Decimal, revenue: Decimal) -> Opportunity {
        Opportunity::new("Qm123", stake, pool, revenue, dec!(0.10), 10_000).unwrap()
    }

    #[test]
    fn test_evaluate_basic() {
        let model = ReturnModel::default();
        let est = model.evaluate(dec!(100), dec!(500), dec!(2000), dec!(0.10), dec!(1), false);

        assert_eq!(est.distributable, dec!(200));
        assert_eq!(est.estimated_return, dec!(40));
        // 40 / (100 * 1) = 0.4
        assert!((est.return_rate - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_zero_stake_rate_is_zero() {
        let model = ReturnModel::default();
        let est = model.evaluate(dec!(0), dec!(500), dec!(2000), dec!(0.10), dec!(1), false);
        assert_eq!(est.return_rate, 0.0);

        // Zero price behaves the same as zero stake
        let est = model.evaluate(dec!(100), dec!(500), dec!(2000), dec!(0.10), dec!(0), false);
        assert_eq!(est.return_rate, 0.0);
    }

    #[test]
    fn test_entry_cost_applied_to_new_position() {
        let model = ReturnModel::new(0.005);
        let opp = opportunity(dec!(0), dec!(50), dec!(200));

        let with = model.evaluate_with_addition(&opp, dec!(10), dec!(1));
        // 20 * (10/60) / 10 = 0.3333, minus 0.005 entry cost
        assert!((with.return_rate - (20.0 / 60.0 - 0.005)).abs() < 1e-9);
    }

    #[test]
    fn test_marginal_return_monotonically_non_increasing() {
        let model = ReturnModel::default();
        let opp = opportunity(dec!(100), dec!(400), dec!(1500));

        let mut previous = f64::INFINITY;
        for step in 1..=50 {
            let additional = Decimal::from(step * 20);
            let rate = model
                .evaluate_with_addition(&opp, additional, dec!(1))
                .return_rate;
            assert!(
                rate <= previous + 1e-12,
                "rate increased at additional={additional}: {rate} > {previous}"
            );
            previous = rate;
        }
    }

    #[test]
    fn test_dilution_vanishes_at_scale() {
        let model = ReturnModel::default();
        let opp = opportunity(dec!(100), dec!(400), dec!(1500));

        let rate = model
            .evaluate_with_addition(&opp, dec!(100000000), dec!(1))
            .return_rate;
        assert!(rate < 1e-4);
    }
}
